// Allow dead_code because these helpers are used across different test files
// which are compiled separately
#![allow(dead_code)]

use anyhow::Result;
use chrono::{DateTime, NaiveDate, Utc};
use shadow_ledger::{
    AccountId, Cents, CancellationToken, LedgerStore, NewAccount, NewOperation, OperationId,
    StoreConfig,
};
use tempfile::TempDir;

/// Helper to create a migrated store on a temporary database
pub async fn test_store() -> Result<(LedgerStore, TempDir)> {
    let temp_dir = TempDir::new()?;
    let config = StoreConfig::for_path(temp_dir.path().join("test.db")).create_if_missing(true);
    let store = LedgerStore::init(&config).await?;
    Ok((store, temp_dir))
}

/// Helper to parse a date string into DateTime<Utc>
pub fn parse_date(date_str: &str) -> DateTime<Utc> {
    NaiveDate::parse_from_str(date_str, "%Y-%m-%d")
        .unwrap()
        .and_hms_opt(0, 0, 0)
        .unwrap()
        .and_utc()
}

/// Helper to parse a date and time into DateTime<Utc>
pub fn parse_datetime(date_str: &str, h: u32, m: u32, s: u32) -> DateTime<Utc> {
    NaiveDate::parse_from_str(date_str, "%Y-%m-%d")
        .unwrap()
        .and_hms_opt(h, m, s)
        .unwrap()
        .and_utc()
}

/// Stored balance column of an account
pub async fn stored_balance(store: &LedgerStore, account_id: AccountId) -> Result<Cents> {
    let account = store
        .get_account(account_id, &CancellationToken::new())
        .await?
        .expect("account exists");
    Ok(account.balance)
}

/// Test fixture: the documented walkthrough account
pub struct Scenario {
    pub account_id: AccountId,
    pub credit_id: OperationId,
    pub debit_id: OperationId,
}

impl Scenario {
    /// Account "Test" for user 1 in currency 1, opened 2024-01-01 with balance 0
    pub async fn open_account(store: &LedgerStore) -> Result<AccountId> {
        let account = NewAccount::new(1, "Test", 1).opened_at(parse_date("2024-01-01"));
        Ok(store
            .create_account(account, &CancellationToken::new())
            .await?)
    }

    /// The account plus +100.00 on 2024-01-02 and -30.00 on 2024-01-03
    pub async fn create(store: &LedgerStore) -> Result<Self> {
        let cancel = CancellationToken::new();
        let account_id = Self::open_account(store).await?;

        let credit_id = store
            .create_operation(
                NewOperation::new(account_id, 10000, parse_date("2024-01-02")),
                &cancel,
            )
            .await?;
        let debit_id = store
            .create_operation(
                NewOperation::new(account_id, -3000, parse_date("2024-01-03"))
                    .with_comment("groceries"),
                &cancel,
            )
            .await?;

        Ok(Self {
            account_id,
            credit_id,
            debit_id,
        })
    }
}
