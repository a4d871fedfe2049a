pub mod cli;
pub mod config;
pub mod domain;
pub mod error;
pub mod storage;
pub mod telemetry;

pub use config::StoreConfig;
pub use domain::*;
pub use error::LedgerError;
pub use storage::{ConnectionProvider, LedgerStore};
pub use tokio_util::sync::CancellationToken;
