use thiserror::Error;

use crate::domain::{AccountId, OperationId};

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Cannot open store connection: {0}")]
    Connection(#[source] sqlx::Error),

    #[error("Store failure while {context}: {source}")]
    Persistence {
        context: String,
        #[source]
        source: sqlx::Error,
    },

    #[error("Account not found: {0}")]
    AccountNotFound(AccountId),

    #[error("Operation not found: {0}")]
    OperationNotFound(OperationId),

    #[error("Transaction aborted while {context}: {source}")]
    TransactionAborted {
        context: String,
        #[source]
        source: Box<LedgerError>,
    },

    #[error("Cancelled while {0}")]
    Cancelled(String),

    #[error("Invalid stored data: {0}")]
    InvalidData(String),
}

impl LedgerError {
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            LedgerError::AccountNotFound(_) | LedgerError::OperationNotFound(_)
        )
    }

    /// Wrap a failure raised inside an open transaction.
    /// Not-found and cancellation pass through unchanged.
    pub(crate) fn aborted(context: &str, err: LedgerError) -> LedgerError {
        match err {
            LedgerError::AccountNotFound(_)
            | LedgerError::OperationNotFound(_)
            | LedgerError::Cancelled(_)
            | LedgerError::TransactionAborted { .. } => err,
            other => LedgerError::TransactionAborted {
                context: context.to_string(),
                source: Box::new(other),
            },
        }
    }
}

/// Attach "while doing X" context to a raw sqlx result.
pub(crate) trait StoreResultExt<T> {
    fn context(self, context: &str) -> Result<T, LedgerError>;
}

impl<T> StoreResultExt<T> for Result<T, sqlx::Error> {
    fn context(self, context: &str) -> Result<T, LedgerError> {
        self.map_err(|source| match source {
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                LedgerError::Connection(source)
            }
            source => LedgerError::Persistence {
                context: context.to_string(),
                source,
            },
        })
    }
}
