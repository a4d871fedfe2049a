use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{AccountId, Cents};

pub type OperationId = i64;
pub type OperationTypeId = i64;
pub type CategoryId = i64;

/// A signed movement against one account.
/// Positive amounts are credits, negative amounts are debits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Operation {
    pub id: OperationId,
    pub account_id: AccountId,
    pub operation_type_id: OperationTypeId,
    pub category_id: CategoryId,
    pub amount: Cents,
    pub comment: Option<String>,
    /// When the movement is economically effective
    pub moment: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewOperation {
    pub account_id: AccountId,
    pub operation_type_id: OperationTypeId,
    pub amount: Cents,
    pub category_id: CategoryId,
    pub comment: Option<String>,
    pub moment: DateTime<Utc>,
}

impl NewOperation {
    pub fn new(account_id: AccountId, amount: Cents, moment: DateTime<Utc>) -> Self {
        Self {
            account_id,
            operation_type_id: 1,
            amount,
            category_id: 1,
            comment: None,
            moment,
        }
    }

    pub fn with_type(mut self, operation_type_id: OperationTypeId) -> Self {
        self.operation_type_id = operation_type_id;
        self
    }

    pub fn with_category(mut self, category_id: CategoryId) -> Self {
        self.category_id = category_id;
        self
    }

    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }
}

/// Overwrite of an operation's mutable fields. The owning account never changes.
#[derive(Debug, Clone)]
pub struct OperationChanges {
    pub operation_type_id: OperationTypeId,
    pub amount: Cents,
    pub category_id: CategoryId,
    pub comment: Option<String>,
    pub moment: DateTime<Utc>,
}

impl From<&Operation> for OperationChanges {
    fn from(operation: &Operation) -> Self {
        Self {
            operation_type_id: operation.operation_type_id,
            amount: operation.amount,
            category_id: operation.category_id,
            comment: operation.comment.clone(),
            moment: operation.moment,
        }
    }
}

impl OperationChanges {
    pub fn with_amount(mut self, amount: Cents) -> Self {
        self.amount = amount;
        self
    }
}

/// Sum the amounts of the operations belonging to `account_id`.
pub fn sum_for_account(account_id: AccountId, operations: &[Operation]) -> Cents {
    operations
        .iter()
        .filter(|op| op.account_id == account_id)
        .map(|op| op.amount)
        .sum()
}
