use std::str::FromStr;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode};
use sqlx::{Connection, SqliteConnection};

use crate::config::StoreConfig;
use crate::error::LedgerError;

/// Opens connections to the ledger database.
///
/// Every call to [`ConnectionProvider::open`] returns a fresh connection owned
/// by the caller. Dropping it closes it, so it is released on every exit path.
///
/// In-memory databases are rejected: one lives only as long as a connection
/// to it, and no connection outlives a single store call.
#[derive(Debug, Clone)]
pub struct ConnectionProvider {
    options: SqliteConnectOptions,
}

impl ConnectionProvider {
    pub fn new(config: &StoreConfig) -> Result<Self, LedgerError> {
        if is_in_memory(&config.database_url) {
            return Err(LedgerError::Connection(sqlx::Error::Configuration(
                format!(
                    "in-memory database '{}' is not supported, use a file path",
                    config.database_url
                )
                .into(),
            )));
        }

        let options = SqliteConnectOptions::from_str(&config.database_url)
            .map_err(LedgerError::Connection)?
            .create_if_missing(config.create_if_missing)
            .foreign_keys(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(config.busy_timeout);

        Ok(Self { options })
    }

    pub async fn open(&self) -> Result<SqliteConnection, LedgerError> {
        SqliteConnection::connect_with(&self.options)
            .await
            .map_err(LedgerError::Connection)
    }
}

fn is_in_memory(database_url: &str) -> bool {
    database_url.contains(":memory:") || database_url.contains("mode=memory")
}
