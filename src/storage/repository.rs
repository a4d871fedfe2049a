use std::future::Future;

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Connection, Row, Sqlite, SqliteConnection, Transaction};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use crate::config::StoreConfig;
use crate::domain::{
    Account, AccountChanges, AccountId, BalanceDrift, Cents, NewAccount, NewOperation, Operation,
    OperationChanges, OperationId, UserId, day_key, decode_moment, encode_moment,
};
use crate::error::{LedgerError, StoreResultExt};

use super::{ConnectionProvider, MIGRATION_001_INITIAL};

const ACCOUNT_COLUMNS: &str = "id, user_id, currency_id, balance, name, moment";
const OPERATION_COLUMNS: &str =
    "id, account_id, operation_type_id, amount, category_id, comment, moment";

/// Writes the sum of the account's operations into its balance in one
/// statement, so the read and the write cannot be split by another writer.
const RECOMPUTE_BALANCE: &str = r#"
    UPDATE account
    SET balance = (SELECT COALESCE(SUM(amount), 0) FROM operation WHERE account_id = ?)
    WHERE id = ?
    RETURNING balance
"#;

/// Persistent store for accounts and operations.
///
/// Every operation mutation recomputes the owning account's balance inside
/// the same transaction, keeping `account.balance == SUM(operation.amount)`.
/// Each call opens its own connection and never shares a transaction.
///
/// All calls take a [`CancellationToken`]. A call cancelled before it commits
/// returns [`LedgerError::Cancelled`] and leaves no partial state.
#[derive(Debug, Clone)]
pub struct LedgerStore {
    connections: ConnectionProvider,
}

impl LedgerStore {
    pub fn new(connections: ConnectionProvider) -> Self {
        Self { connections }
    }

    /// Connect to the configured database, checking that it can be opened.
    pub async fn connect(config: &StoreConfig) -> Result<Self, LedgerError> {
        let connections = ConnectionProvider::new(config)?;
        let conn = connections.open().await?;
        conn.close().await.map_err(LedgerError::Connection)?;
        Ok(Self::new(connections))
    }

    /// Apply the schema. Safe to run against an initialized database.
    pub async fn migrate(&self) -> Result<(), LedgerError> {
        let mut conn = self.connections.open().await?;
        sqlx::query(MIGRATION_001_INITIAL)
            .execute(&mut conn)
            .await
            .context("running migration 001")?;
        Ok(())
    }

    /// Connect and migrate.
    pub async fn init(config: &StoreConfig) -> Result<Self, LedgerError> {
        let store = Self::connect(config).await?;
        store.migrate().await?;
        Ok(store)
    }

    pub fn connections(&self) -> &ConnectionProvider {
        &self.connections
    }

    // ========================
    // Reads
    // ========================

    /// Operations of an account effective on or after the day of `since`.
    /// Time of day is ignored on both sides. Ordered by moment, then id.
    #[instrument(skip(self, cancel))]
    pub async fn list_operations(
        &self,
        account_id: AccountId,
        since: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> Result<Vec<Operation>, LedgerError> {
        let context = format!("listing operations of account {account_id}");

        until_cancelled(cancel, &context, async {
            let mut conn = self.connections.open().await?;
            let rows = sqlx::query(&format!(
                "SELECT {OPERATION_COLUMNS} FROM operation \
                 WHERE account_id = ? AND substr(moment, 1, 10) >= ? \
                 ORDER BY moment, id"
            ))
            .bind(account_id)
            .bind(day_key(since))
            .fetch_all(&mut conn)
            .await
            .context(&context)?;

            debug!(count = rows.len(), "loaded operations");
            rows.iter().map(row_to_operation).collect()
        })
        .await
    }

    /// Sum of the account's operation amounts. Zero when there are none.
    #[instrument(skip(self, cancel))]
    pub async fn get_account_balance(
        &self,
        account_id: AccountId,
        cancel: &CancellationToken,
    ) -> Result<Cents, LedgerError> {
        let context = format!("summing operations of account {account_id}");

        until_cancelled(cancel, &context, async {
            let mut conn = self.connections.open().await?;
            let row = sqlx::query(
                "SELECT COALESCE(SUM(amount), 0) AS balance FROM operation WHERE account_id = ?",
            )
            .bind(account_id)
            .fetch_one(&mut conn)
            .await
            .context(&context)?;

            Ok(row.get("balance"))
        })
        .await
    }

    #[instrument(skip(self, cancel))]
    pub async fn get_account(
        &self,
        account_id: AccountId,
        cancel: &CancellationToken,
    ) -> Result<Option<Account>, LedgerError> {
        let context = format!("loading account {account_id}");

        until_cancelled(cancel, &context, async {
            let mut conn = self.connections.open().await?;
            let row = sqlx::query(&format!(
                "SELECT {ACCOUNT_COLUMNS} FROM account WHERE id = ?"
            ))
            .bind(account_id)
            .fetch_optional(&mut conn)
            .await
            .context(&context)?;

            row.as_ref().map(row_to_account).transpose()
        })
        .await
    }

    /// All accounts owned by a user, ordered by id.
    #[instrument(skip(self, cancel))]
    pub async fn list_accounts(
        &self,
        user_id: UserId,
        cancel: &CancellationToken,
    ) -> Result<Vec<Account>, LedgerError> {
        let context = format!("listing accounts of user {user_id}");

        until_cancelled(cancel, &context, async {
            let mut conn = self.connections.open().await?;
            let rows = sqlx::query(&format!(
                "SELECT {ACCOUNT_COLUMNS} FROM account WHERE user_id = ? ORDER BY id"
            ))
            .bind(user_id)
            .fetch_all(&mut conn)
            .await
            .context(&context)?;

            rows.iter().map(row_to_account).collect()
        })
        .await
    }

    #[instrument(skip(self, cancel))]
    pub async fn get_operation(
        &self,
        operation_id: OperationId,
        cancel: &CancellationToken,
    ) -> Result<Option<Operation>, LedgerError> {
        let context = format!("loading operation {operation_id}");

        until_cancelled(cancel, &context, async {
            let mut conn = self.connections.open().await?;
            let row = sqlx::query(&format!(
                "SELECT {OPERATION_COLUMNS} FROM operation WHERE id = ?"
            ))
            .bind(operation_id)
            .fetch_optional(&mut conn)
            .await
            .context(&context)?;

            row.as_ref().map(row_to_operation).transpose()
        })
        .await
    }

    /// Accounts whose stored balance differs from the sum of their operations.
    /// Only direct balance writes, including a non-zero opening balance, produce these.
    #[instrument(skip(self, cancel))]
    pub async fn find_balance_drift(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Vec<BalanceDrift>, LedgerError> {
        const CONTEXT: &str = "checking balances";

        until_cancelled(cancel, CONTEXT, async {
            let mut conn = self.connections.open().await?;
            let rows = sqlx::query(
                r#"
                SELECT a.id AS account_id,
                       a.balance AS stored,
                       COALESCE(SUM(o.amount), 0) AS computed
                FROM account a
                LEFT JOIN operation o ON o.account_id = a.id
                GROUP BY a.id, a.balance
                HAVING a.balance <> COALESCE(SUM(o.amount), 0)
                ORDER BY a.id
                "#,
            )
            .fetch_all(&mut conn)
            .await
            .context(CONTEXT)?;

            Ok(rows
                .iter()
                .map(|row| BalanceDrift {
                    account_id: row.get("account_id"),
                    stored: row.get("stored"),
                    computed: row.get("computed"),
                })
                .collect())
        })
        .await
    }

    // ========================
    // Account mutations
    // ========================
    //
    // Single statements still run inside a transaction: a cancelled call
    // drops it, and the rollback discards a statement the connection was
    // already executing.

    /// Insert an account. The opening balance is stored as given.
    #[instrument(skip(self, cancel, account), fields(user_id = account.user_id))]
    pub async fn create_account(
        &self,
        account: NewAccount,
        cancel: &CancellationToken,
    ) -> Result<AccountId, LedgerError> {
        let context = format!("creating account '{}' for user {}", account.name, account.user_id);

        let mut conn = until_cancelled(cancel, &context, self.connections.open()).await?;
        let mut tx = conn.begin().await.context(&context)?;

        let work = async {
            let result = sqlx::query(
                r#"
                INSERT INTO account (user_id, currency_id, balance, name, moment)
                VALUES (?, ?, ?, ?, ?)
                "#,
            )
            .bind(account.user_id)
            .bind(account.currency_id)
            .bind(account.balance)
            .bind(&account.name)
            .bind(encode_moment(account.moment))
            .execute(&mut *tx)
            .await
            .context(&context)?;

            let id = result.last_insert_rowid();
            debug!(account_id = id, "account created");
            Ok::<_, LedgerError>(id)
        };

        let result = until_cancelled(cancel, &context, work).await;
        finish(tx, cancel, &context, result).await
    }

    /// Overwrite name, balance, moment and currency of an account.
    ///
    /// The balance is written verbatim, without checking it against the
    /// operations; [`LedgerStore::find_balance_drift`] reports the result.
    #[instrument(skip(self, cancel, changes))]
    pub async fn update_account(
        &self,
        account_id: AccountId,
        changes: AccountChanges,
        cancel: &CancellationToken,
    ) -> Result<(), LedgerError> {
        let context = format!("updating account {account_id}");

        let mut conn = until_cancelled(cancel, &context, self.connections.open()).await?;
        let mut tx = conn.begin().await.context(&context)?;

        let work = async {
            let result = sqlx::query(
                r#"
                UPDATE account
                SET currency_id = ?, balance = ?, name = ?, moment = ?
                WHERE id = ?
                "#,
            )
            .bind(changes.currency_id)
            .bind(changes.balance)
            .bind(&changes.name)
            .bind(encode_moment(changes.moment))
            .bind(account_id)
            .execute(&mut *tx)
            .await
            .context(&context)?;

            if result.rows_affected() == 0 {
                return Err(LedgerError::AccountNotFound(account_id));
            }
            Ok(())
        };

        let result = until_cancelled(cancel, &context, work).await;
        finish(tx, cancel, &context, result).await
    }

    /// Delete an account and, through the foreign key, its operations.
    /// Returns false when there was nothing to delete.
    #[instrument(skip(self, cancel))]
    pub async fn delete_account(
        &self,
        account_id: AccountId,
        cancel: &CancellationToken,
    ) -> Result<bool, LedgerError> {
        let context = format!("deleting account {account_id}");

        let mut conn = until_cancelled(cancel, &context, self.connections.open()).await?;
        let mut tx = conn.begin().await.context(&context)?;

        let work = async {
            let result = sqlx::query("DELETE FROM account WHERE id = ?")
                .bind(account_id)
                .execute(&mut *tx)
                .await
                .context(&context)?;

            let deleted = result.rows_affected() > 0;
            debug!(deleted, "account delete finished");
            Ok::<_, LedgerError>(deleted)
        };

        let result = until_cancelled(cancel, &context, work).await;
        finish(tx, cancel, &context, result).await
    }

    /// Set the stored balance to `amount`, ignoring the operations.
    /// See [`LedgerStore::recompute_balance`] for the derived value.
    #[instrument(skip(self, cancel))]
    pub async fn set_balance_direct(
        &self,
        account_id: AccountId,
        amount: Cents,
        cancel: &CancellationToken,
    ) -> Result<(), LedgerError> {
        let context = format!("overwriting balance of account {account_id}");

        let mut conn = until_cancelled(cancel, &context, self.connections.open()).await?;
        let mut tx = conn.begin().await.context(&context)?;

        let work = async {
            let result = sqlx::query("UPDATE account SET balance = ? WHERE id = ?")
                .bind(amount)
                .bind(account_id)
                .execute(&mut *tx)
                .await
                .context(&context)?;

            if result.rows_affected() == 0 {
                return Err(LedgerError::AccountNotFound(account_id));
            }
            Ok(())
        };

        let result = until_cancelled(cancel, &context, work).await;
        finish(tx, cancel, &context, result).await
    }

    /// Store the sum of the account's operations as its balance and return it.
    #[instrument(skip(self, cancel))]
    pub async fn recompute_balance(
        &self,
        account_id: AccountId,
        cancel: &CancellationToken,
    ) -> Result<Cents, LedgerError> {
        let context = format!("recomputing balance of account {account_id}");

        let mut conn = until_cancelled(cancel, &context, self.connections.open()).await?;
        let mut tx = conn.begin().await.context(&context)?;

        let result = until_cancelled(cancel, &context, recompute_in(&mut tx, account_id)).await;
        finish(tx, cancel, &context, result).await
    }

    // ========================
    // Operation mutations
    // ========================

    /// Insert an operation and recompute its account's balance atomically.
    #[instrument(skip(self, cancel, operation), fields(account_id = operation.account_id))]
    pub async fn create_operation(
        &self,
        operation: NewOperation,
        cancel: &CancellationToken,
    ) -> Result<OperationId, LedgerError> {
        let context = format!("creating operation for account {}", operation.account_id);

        let mut conn = until_cancelled(cancel, &context, self.connections.open()).await?;
        let mut tx = conn.begin().await.context(&context)?;

        let work = async {
            let result = sqlx::query(
                r#"
                INSERT INTO operation (account_id, operation_type_id, amount, category_id, comment, moment)
                SELECT ?, ?, ?, ?, ?, ?
                WHERE EXISTS (SELECT 1 FROM account WHERE id = ?)
                "#,
            )
            .bind(operation.account_id)
            .bind(operation.operation_type_id)
            .bind(operation.amount)
            .bind(operation.category_id)
            .bind(&operation.comment)
            .bind(encode_moment(operation.moment))
            .bind(operation.account_id)
            .execute(&mut *tx)
            .await
            .context(&context)?;

            if result.rows_affected() == 0 {
                return Err(LedgerError::AccountNotFound(operation.account_id));
            }
            let id = result.last_insert_rowid();

            let balance = recompute_in(&mut tx, operation.account_id).await?;
            debug!(operation_id = id, balance, "operation created");
            Ok(id)
        };

        let result = until_cancelled(cancel, &context, work).await;
        finish(tx, cancel, &context, result).await
    }

    /// Overwrite an operation and recompute its account's balance atomically.
    ///
    /// `account_id` must own the operation; otherwise the operation is
    /// reported as not found and nothing changes.
    #[instrument(skip(self, cancel, changes))]
    pub async fn update_operation(
        &self,
        account_id: AccountId,
        operation_id: OperationId,
        changes: OperationChanges,
        cancel: &CancellationToken,
    ) -> Result<(), LedgerError> {
        let context = format!("updating operation {operation_id} of account {account_id}");

        let mut conn = until_cancelled(cancel, &context, self.connections.open()).await?;
        let mut tx = conn.begin().await.context(&context)?;

        let work = async {
            let result = sqlx::query(
                r#"
                UPDATE operation
                SET operation_type_id = ?, amount = ?, category_id = ?, comment = ?, moment = ?
                WHERE id = ? AND account_id = ?
                "#,
            )
            .bind(changes.operation_type_id)
            .bind(changes.amount)
            .bind(changes.category_id)
            .bind(&changes.comment)
            .bind(encode_moment(changes.moment))
            .bind(operation_id)
            .bind(account_id)
            .execute(&mut *tx)
            .await
            .context(&context)?;

            if result.rows_affected() == 0 {
                return Err(LedgerError::OperationNotFound(operation_id));
            }

            let balance = recompute_in(&mut tx, account_id).await?;
            debug!(balance, "operation updated");
            Ok(())
        };

        let result = until_cancelled(cancel, &context, work).await;
        finish(tx, cancel, &context, result).await
    }

    /// Delete an operation and recompute its account's balance atomically.
    /// Returns false when there was nothing to delete.
    #[instrument(skip(self, cancel))]
    pub async fn delete_operation(
        &self,
        operation_id: OperationId,
        cancel: &CancellationToken,
    ) -> Result<bool, LedgerError> {
        let context = format!("deleting operation {operation_id}");

        let mut conn = until_cancelled(cancel, &context, self.connections.open()).await?;
        let mut tx = conn.begin().await.context(&context)?;

        let work = async {
            let owner: Option<AccountId> =
                sqlx::query("DELETE FROM operation WHERE id = ? RETURNING account_id")
                    .bind(operation_id)
                    .fetch_optional(&mut *tx)
                    .await
                    .context(&context)?
                    .map(|row| row.get("account_id"));

            let Some(account_id) = owner else {
                debug!("operation already absent");
                return Ok(false);
            };

            let balance = recompute_in(&mut tx, account_id).await?;
            debug!(account_id, balance, "operation deleted");
            Ok::<_, LedgerError>(true)
        };

        let result = until_cancelled(cancel, &context, work).await;
        finish(tx, cancel, &context, result).await
    }
}

/// Race `work` against the cancellation token.
/// Dropping `work` releases its connection and rolls back any open transaction.
async fn until_cancelled<T>(
    cancel: &CancellationToken,
    context: &str,
    work: impl Future<Output = Result<T, LedgerError>>,
) -> Result<T, LedgerError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            warn!("cancelled while {context}");
            Err(LedgerError::Cancelled(context.to_string()))
        }
        result = work => result,
    }
}

/// Commit when the work succeeded and the token is still live, roll back otherwise.
async fn finish<T>(
    tx: Transaction<'_, Sqlite>,
    cancel: &CancellationToken,
    context: &str,
    result: Result<T, LedgerError>,
) -> Result<T, LedgerError> {
    match result {
        Ok(value) if !cancel.is_cancelled() => {
            tx.commit()
                .await
                .context(context)
                .map_err(|err| LedgerError::aborted(context, err))?;
            Ok(value)
        }
        Ok(_) => {
            rollback(tx, context).await;
            warn!("cancelled before commit while {context}");
            Err(LedgerError::Cancelled(context.to_string()))
        }
        // A statement may still be running; dropping the transaction queues
        // its rollback behind it instead of waiting.
        Err(err @ LedgerError::Cancelled(_)) => {
            drop(tx);
            Err(err)
        }
        Err(err) => {
            rollback(tx, context).await;
            Err(LedgerError::aborted(context, err))
        }
    }
}

async fn rollback(tx: Transaction<'_, Sqlite>, context: &str) {
    if let Err(err) = tx.rollback().await {
        warn!(error = %err, "rollback failed while {context}");
    } else {
        debug!("rolled back while {context}");
    }
}

async fn recompute_in(conn: &mut SqliteConnection, account_id: AccountId) -> Result<Cents, LedgerError> {
    let row = sqlx::query(RECOMPUTE_BALANCE)
        .bind(account_id)
        .bind(account_id)
        .fetch_optional(&mut *conn)
        .await
        .context(&format!("recomputing balance of account {account_id}"))?;

    match row {
        Some(row) => Ok(row.get("balance")),
        None => Err(LedgerError::AccountNotFound(account_id)),
    }
}

fn row_to_account(row: &SqliteRow) -> Result<Account, LedgerError> {
    let id: AccountId = row.get("id");
    let moment_str: String = row.get("moment");

    Ok(Account {
        id,
        user_id: row.get("user_id"),
        currency_id: row.get("currency_id"),
        name: row.get("name"),
        balance: row.get("balance"),
        moment: decode_moment(&moment_str).map_err(|err| {
            LedgerError::InvalidData(format!("account {id} moment '{moment_str}': {err}"))
        })?,
    })
}

fn row_to_operation(row: &SqliteRow) -> Result<Operation, LedgerError> {
    let id: OperationId = row.get("id");
    let moment_str: String = row.get("moment");

    Ok(Operation {
        id,
        account_id: row.get("account_id"),
        operation_type_id: row.get("operation_type_id"),
        category_id: row.get("category_id"),
        amount: row.get("amount"),
        comment: row.get("comment"),
        moment: decode_moment(&moment_str).map_err(|err| {
            LedgerError::InvalidData(format!("operation {id} moment '{moment_str}': {err}"))
        })?,
    })
}
