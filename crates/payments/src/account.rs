use chrono::{DateTime, Utc};
use common::{Money, UserId};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A user's ledger account.
///
/// `version` increments on every balance change and backs the optimistic
/// concurrency check on debits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: Uuid,
    pub user_id: UserId,
    pub balance: Money,
    pub version: i64,
    pub created_at: DateTime<Utc>,
}

impl Account {
    /// Opens an empty account for a user.
    pub fn new(user_id: UserId) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            balance: Money::zero(),
            version: 0,
            created_at: Utc::now(),
        }
    }

    /// Whether the balance covers a debit of `amount`.
    pub fn can_cover(&self, amount: Money) -> bool {
        self.balance >= amount
    }
}
