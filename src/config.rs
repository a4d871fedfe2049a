//! Store configuration, read from the environment.
//!
//! | Variable | Default |
//! |----------|---------|
//! | `LEDGER_DATABASE_URL` | `sqlite:ledger.db` |
//! | `LEDGER_BUSY_TIMEOUT_MS` | `5000` |

use std::path::Path;
use std::time::Duration;

pub const DATABASE_URL_VAR: &str = "LEDGER_DATABASE_URL";
pub const BUSY_TIMEOUT_VAR: &str = "LEDGER_BUSY_TIMEOUT_MS";

pub const DEFAULT_DATABASE_URL: &str = "sqlite:ledger.db";
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_millis(5000);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    /// sqlx SQLite connection string, e.g. `sqlite:ledger.db`
    pub database_url: String,
    /// How long a connection waits on a locked database before failing
    pub busy_timeout: Duration,
    /// Create the database file when it is missing
    pub create_if_missing: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database_url: DEFAULT_DATABASE_URL.to_string(),
            busy_timeout: DEFAULT_BUSY_TIMEOUT,
            create_if_missing: false,
        }
    }
}

impl StoreConfig {
    pub fn new(database_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
            ..Self::default()
        }
    }

    /// Config for a database file on disk.
    pub fn for_path(path: impl AsRef<Path>) -> Self {
        Self::new(format!("sqlite:{}", path.as_ref().display()))
    }

    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(url) = lookup(DATABASE_URL_VAR).filter(|url| !url.trim().is_empty()) {
            config.database_url = url;
        }

        if let Some(raw) = lookup(BUSY_TIMEOUT_VAR) {
            match raw.trim().parse::<u64>() {
                Ok(ms) => config.busy_timeout = Duration::from_millis(ms),
                Err(_) => tracing::warn!(
                    value = %raw,
                    "{} is not a number of milliseconds; using default",
                    BUSY_TIMEOUT_VAR
                ),
            }
        }

        config
    }

    pub fn with_busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout = timeout;
        self
    }

    pub fn create_if_missing(mut self, create: bool) -> Self {
        self.create_if_missing = create;
        self
    }
}
