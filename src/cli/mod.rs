use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::config::StoreConfig;
use crate::domain::{
    Account, AccountChanges, AccountId, CategoryId, CurrencyId, NewAccount, NewOperation,
    Operation, OperationChanges, OperationId, OperationTypeId, UserId, format_cents, parse_cents,
    parse_moment, sum_for_account,
};
use crate::storage::LedgerStore;

/// Shadow Ledger - accounts and operations with a consistent running balance
#[derive(Parser)]
#[command(name = "shadow-ledger")]
#[command(about = "Accounts and dated operations whose balances always match")]
#[command(version)]
pub struct Cli {
    /// Database file or sqlx URL (overrides LEDGER_DATABASE_URL)
    #[arg(short, long, global = true)]
    pub database: Option<String>,

    /// Print results as JSON
    #[arg(long, global = true)]
    pub json: bool,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create the database and schema
    Init,

    /// Account management commands
    #[command(subcommand)]
    Account(AccountCommands),

    /// Operation commands
    #[command(subcommand)]
    Op(OperationCommands),

    /// Show the sum of an account's operations
    Balance {
        account_id: AccountId,
    },

    /// Report accounts whose stored balance differs from their operations
    Check,
}

#[derive(Subcommand)]
pub enum AccountCommands {
    /// Open a new account
    Create {
        /// Owner user id
        #[arg(long)]
        user: UserId,

        /// Account name
        name: String,

        /// Currency id
        #[arg(long)]
        currency: CurrencyId,

        /// Opening balance (e.g., "50.00")
        #[arg(long, default_value = "0", allow_hyphen_values = true)]
        balance: String,

        /// Opening date (YYYY-MM-DD or RFC 3339, defaults to now)
        #[arg(long)]
        opened: Option<String>,
    },

    /// Change an account; omitted fields keep their value
    Update {
        account_id: AccountId,

        #[arg(long)]
        name: Option<String>,

        /// New stored balance, written without recomputation
        #[arg(long, allow_hyphen_values = true)]
        balance: Option<String>,

        #[arg(long)]
        opened: Option<String>,

        #[arg(long)]
        currency: Option<CurrencyId>,
    },

    /// Delete an account and its operations
    Delete {
        account_id: AccountId,
    },

    /// Overwrite the stored balance with a literal amount
    SetBalance {
        account_id: AccountId,

        #[arg(allow_hyphen_values = true)]
        amount: String,
    },

    /// Rewrite the stored balance from the operations
    Recompute {
        account_id: AccountId,
    },

    /// Show one account
    Show {
        account_id: AccountId,
    },

    /// List a user's accounts
    List {
        #[arg(long)]
        user: UserId,
    },
}

#[derive(Subcommand)]
pub enum OperationCommands {
    /// Record an operation (negative amounts are debits)
    Add {
        account_id: AccountId,

        #[arg(allow_hyphen_values = true)]
        amount: String,

        #[arg(long = "type", default_value_t = 1)]
        operation_type: OperationTypeId,

        #[arg(long, default_value_t = 1)]
        category: CategoryId,

        #[arg(short, long)]
        comment: Option<String>,

        /// Effective date (YYYY-MM-DD or RFC 3339, defaults to now)
        #[arg(long)]
        date: Option<String>,
    },

    /// Change an operation; omitted fields keep their value
    Update {
        account_id: AccountId,

        operation_id: OperationId,

        #[arg(long, allow_hyphen_values = true)]
        amount: Option<String>,

        #[arg(long = "type")]
        operation_type: Option<OperationTypeId>,

        #[arg(long)]
        category: Option<CategoryId>,

        #[arg(short, long)]
        comment: Option<String>,

        /// Remove the comment
        #[arg(long, conflicts_with = "comment")]
        clear_comment: bool,

        #[arg(long)]
        date: Option<String>,
    },

    /// Delete an operation
    Delete {
        operation_id: OperationId,
    },

    /// List an account's operations from a day onwards
    List {
        account_id: AccountId,

        /// First day to include (YYYY-MM-DD)
        #[arg(long, default_value = "1970-01-01")]
        since: String,
    },
}

impl Cli {
    fn config(&self) -> StoreConfig {
        let mut config = StoreConfig::from_env();
        if let Some(database) = &self.database {
            config.database_url = if database.starts_with("sqlite:") {
                database.clone()
            } else {
                StoreConfig::for_path(database).database_url
            };
        }
        config
    }

    pub async fn run(self) -> Result<()> {
        let cancel = CancellationToken::new();
        let on_interrupt = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                on_interrupt.cancel();
            }
        });

        let config = self.config();
        let json = self.json;

        match self.command {
            Commands::Init => {
                LedgerStore::init(&config.clone().create_if_missing(true)).await?;
                println!("Database initialized: {}", config.database_url);
            }

            Commands::Account(cmd) => {
                let store = LedgerStore::connect(&config).await?;
                run_account_command(&store, cmd, json, &cancel).await?;
            }

            Commands::Op(cmd) => {
                let store = LedgerStore::connect(&config).await?;
                run_operation_command(&store, cmd, json, &cancel).await?;
            }

            Commands::Balance { account_id } => {
                let store = LedgerStore::connect(&config).await?;
                let balance = store.get_account_balance(account_id, &cancel).await?;
                if json {
                    print_json(&serde_json::json!({ "account_id": account_id, "balance": balance }))?;
                } else {
                    println!("{}", format_cents(balance));
                }
            }

            Commands::Check => {
                let store = LedgerStore::connect(&config).await?;
                let drift = store.find_balance_drift(&cancel).await?;
                if json {
                    print_json(&drift)?;
                } else if drift.is_empty() {
                    println!("All balances match their operations.");
                } else {
                    println!("{:<10} {:>14} {:>14} {:>14}", "ACCOUNT", "STORED", "COMPUTED", "DIFF");
                    println!("{}", "-".repeat(55));
                    for entry in &drift {
                        println!(
                            "{:<10} {:>14} {:>14} {:>14}",
                            entry.account_id,
                            format_cents(entry.stored),
                            format_cents(entry.computed),
                            format_cents(entry.difference())
                        );
                    }
                    anyhow::bail!("{} account(s) out of balance", drift.len());
                }
            }
        }

        Ok(())
    }
}

async fn run_account_command(
    store: &LedgerStore,
    cmd: AccountCommands,
    json: bool,
    cancel: &CancellationToken,
) -> Result<()> {
    match cmd {
        AccountCommands::Create {
            user,
            name,
            currency,
            balance,
            opened,
        } => {
            let mut account = NewAccount::new(user, name, currency).with_balance(amount(&balance)?);
            if let Some(opened) = opened {
                account = account.opened_at(moment(&opened)?);
            }
            let id = store.create_account(account, cancel).await?;
            if json {
                print_json(&serde_json::json!({ "account_id": id }))?;
            } else {
                println!("Created account {}", id);
            }
        }

        AccountCommands::Update {
            account_id,
            name,
            balance,
            opened,
            currency,
        } => {
            let current = require_account(store, account_id, cancel).await?;
            let mut changes = AccountChanges::from(&current);
            if let Some(name) = name {
                changes.name = name;
            }
            if let Some(balance) = balance {
                changes.balance = amount(&balance)?;
            }
            if let Some(opened) = opened {
                changes.moment = moment(&opened)?;
            }
            if let Some(currency) = currency {
                changes.currency_id = currency;
            }
            store.update_account(account_id, changes, cancel).await?;
            if json {
                print_json(&require_account(store, account_id, cancel).await?)?;
            } else {
                println!("Updated account {}", account_id);
            }
        }

        AccountCommands::Delete { account_id } => {
            let deleted = store.delete_account(account_id, cancel).await?;
            if json {
                print_json(&serde_json::json!({ "account_id": account_id, "deleted": deleted }))?;
            } else if deleted {
                println!("Deleted account {}", account_id);
            } else {
                println!("Account {} did not exist", account_id);
            }
        }

        AccountCommands::SetBalance {
            account_id,
            amount: raw,
        } => {
            let value = amount(&raw)?;
            store.set_balance_direct(account_id, value, cancel).await?;
            if json {
                print_json(&serde_json::json!({ "account_id": account_id, "balance": value }))?;
            } else {
                println!("Balance of account {} set to {}", account_id, format_cents(value));
            }
        }

        AccountCommands::Recompute { account_id } => {
            let balance = store.recompute_balance(account_id, cancel).await?;
            if json {
                print_json(&serde_json::json!({ "account_id": account_id, "balance": balance }))?;
            } else {
                println!("Balance of account {} is {}", account_id, format_cents(balance));
            }
        }

        AccountCommands::Show { account_id } => {
            let account = require_account(store, account_id, cancel).await?;
            if json {
                print_json(&account)?;
            } else {
                println!("Account: {}", account.name);
                println!("  ID:       {}", account.id);
                println!("  User:     {}", account.user_id);
                println!("  Currency: {}", account.currency_id);
                println!("  Opened:   {}", account.moment.format("%Y-%m-%d %H:%M:%S"));
                println!("  Balance:  {}", format_cents(account.balance));
            }
        }

        AccountCommands::List { user } => {
            let accounts = store.list_accounts(user, cancel).await?;
            if json {
                print_json(&accounts)?;
            } else if accounts.is_empty() {
                println!("No accounts found.");
            } else {
                println!("{:<8} {:<24} {:<8} {:>14}", "ID", "NAME", "CURRENCY", "BALANCE");
                println!("{}", "-".repeat(57));
                for account in accounts {
                    println!(
                        "{:<8} {:<24} {:<8} {:>14}",
                        account.id,
                        account.name,
                        account.currency_id,
                        format_cents(account.balance)
                    );
                }
            }
        }
    }
    Ok(())
}

async fn run_operation_command(
    store: &LedgerStore,
    cmd: OperationCommands,
    json: bool,
    cancel: &CancellationToken,
) -> Result<()> {
    match cmd {
        OperationCommands::Add {
            account_id,
            amount: raw,
            operation_type,
            category,
            comment,
            date,
        } => {
            let effective = match date {
                Some(date) => moment(&date)?,
                None => Utc::now(),
            };
            let mut operation = NewOperation::new(account_id, amount(&raw)?, effective)
                .with_type(operation_type)
                .with_category(category);
            if let Some(comment) = comment {
                operation = operation.with_comment(comment);
            }
            let id = store.create_operation(operation, cancel).await?;
            if json {
                print_json(&serde_json::json!({ "operation_id": id }))?;
            } else {
                println!("Recorded operation {} on account {}", id, account_id);
            }
        }

        OperationCommands::Update {
            account_id,
            operation_id,
            amount: raw,
            operation_type,
            category,
            comment,
            clear_comment,
            date,
        } => {
            let current = store
                .get_operation(operation_id, cancel)
                .await?
                .with_context(|| format!("Operation {} not found", operation_id))?;
            let mut changes = OperationChanges::from(&current);
            if let Some(raw) = raw {
                changes.amount = amount(&raw)?;
            }
            if let Some(operation_type) = operation_type {
                changes.operation_type_id = operation_type;
            }
            if let Some(category) = category {
                changes.category_id = category;
            }
            changes.comment = updated_comment(changes.comment, comment, clear_comment);
            if let Some(date) = date {
                changes.moment = moment(&date)?;
            }
            store
                .update_operation(account_id, operation_id, changes, cancel)
                .await?;
            if json {
                let updated = store
                    .get_operation(operation_id, cancel)
                    .await?
                    .with_context(|| format!("Operation {} not found", operation_id))?;
                print_json(&updated)?;
            } else {
                println!("Updated operation {}", operation_id);
            }
        }

        OperationCommands::Delete { operation_id } => {
            let deleted = store.delete_operation(operation_id, cancel).await?;
            if json {
                print_json(&serde_json::json!({ "operation_id": operation_id, "deleted": deleted }))?;
            } else if deleted {
                println!("Deleted operation {}", operation_id);
            } else {
                println!("Operation {} did not exist", operation_id);
            }
        }

        OperationCommands::List { account_id, since } => {
            let operations = store
                .list_operations(account_id, moment(&since)?, cancel)
                .await?;
            if json {
                print_json(&operations)?;
            } else {
                print_operations(account_id, &operations);
            }
        }
    }
    Ok(())
}

fn print_operations(account_id: AccountId, operations: &[Operation]) {
    if operations.is_empty() {
        println!("No operations found.");
        return;
    }

    println!(
        "{:<8} {:<12} {:>14} {:<6} {:<8} COMMENT",
        "ID", "DATE", "AMOUNT", "TYPE", "CATEGORY"
    );
    println!("{}", "-".repeat(64));
    for op in operations {
        println!(
            "{:<8} {:<12} {:>14} {:<6} {:<8} {}",
            op.id,
            op.moment.format("%Y-%m-%d"),
            format_cents(op.amount),
            op.operation_type_id,
            op.category_id,
            op.comment.as_deref().unwrap_or("")
        );
    }
    println!("{}", "-".repeat(64));
    println!(
        "{:<21} {:>14}",
        "TOTAL",
        format_cents(sum_for_account(account_id, operations))
    );
}

async fn require_account(
    store: &LedgerStore,
    account_id: AccountId,
    cancel: &CancellationToken,
) -> Result<Account> {
    store
        .get_account(account_id, cancel)
        .await?
        .with_context(|| format!("Account {} not found", account_id))
}

/// Comment after an update: cleared on request or when given empty, replaced
/// when given, kept otherwise.
fn updated_comment(current: Option<String>, given: Option<String>, clear: bool) -> Option<String> {
    if clear {
        return None;
    }
    match given {
        Some(comment) if comment.is_empty() => None,
        Some(comment) => Some(comment),
        None => current,
    }
}

fn amount(raw: &str) -> Result<i64> {
    parse_cents(raw).with_context(|| format!("Invalid amount '{}'. Use '50.00' or '-50'", raw))
}

fn moment(raw: &str) -> Result<DateTime<Utc>> {
    Ok(parse_moment(raw)?)
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
