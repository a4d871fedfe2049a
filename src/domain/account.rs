use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Cents;

pub type AccountId = i64;
pub type UserId = i64;
pub type CurrencyId = i64;

/// A named, balance-bearing account owned by a user.
///
/// `balance` is stored, but it is derived: every operation mutation
/// recomputes it as the sum of the account's operation amounts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,
    pub user_id: UserId,
    pub currency_id: CurrencyId,
    pub name: String,
    pub balance: Cents,
    /// Opening date
    pub moment: DateTime<Utc>,
}

/// Fields for a new account. The opening balance is stored verbatim.
#[derive(Debug, Clone)]
pub struct NewAccount {
    pub user_id: UserId,
    pub name: String,
    pub balance: Cents,
    pub moment: DateTime<Utc>,
    pub currency_id: CurrencyId,
}

impl NewAccount {
    pub fn new(user_id: UserId, name: impl Into<String>, currency_id: CurrencyId) -> Self {
        Self {
            user_id,
            name: name.into(),
            balance: 0,
            moment: Utc::now(),
            currency_id,
        }
    }

    pub fn with_balance(mut self, balance: Cents) -> Self {
        self.balance = balance;
        self
    }

    pub fn opened_at(mut self, moment: DateTime<Utc>) -> Self {
        self.moment = moment;
        self
    }
}

/// Overwrite of an account's mutable fields.
///
/// `balance` is written as given, bypassing the operation sum. It is an
/// administrative correction; the next operation mutation recomputes it.
#[derive(Debug, Clone)]
pub struct AccountChanges {
    pub name: String,
    pub balance: Cents,
    pub moment: DateTime<Utc>,
    pub currency_id: CurrencyId,
}

impl From<&Account> for AccountChanges {
    fn from(account: &Account) -> Self {
        Self {
            name: account.name.clone(),
            balance: account.balance,
            moment: account.moment,
            currency_id: account.currency_id,
        }
    }
}

/// An account whose stored balance disagrees with its operations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BalanceDrift {
    pub account_id: AccountId,
    pub stored: Cents,
    pub computed: Cents,
}

impl BalanceDrift {
    pub fn difference(&self) -> Cents {
        self.stored - self.computed
    }
}
