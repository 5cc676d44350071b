use chrono::{DateTime, Utc};
use common::{Money, OrderId, UserId};
use serde::{Deserialize, Serialize};

use crate::OrderError;

/// Order lifecycle state: Pending is the only non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    Pending,
    Paid,
    Failed,
}

impl OrderStatus {
    /// Returns true for Paid and Failed.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, OrderStatus::Pending)
    }

    /// Returns the status as its stored string form.
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Paid => "paid",
            OrderStatus::Failed => "failed",
        }
    }

    /// Parses a stored status string.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(OrderStatus::Pending),
            "paid" => Some(OrderStatus::Paid),
            "failed" => Some(OrderStatus::Failed),
            _ => None,
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            OrderStatus::Pending => "Pending",
            OrderStatus::Paid => "Paid",
            OrderStatus::Failed => "Failed",
        })
    }
}

/// An order as held by the orders store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub user_id: UserId,
    pub amount: Money,
    pub status: OrderStatus,
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Order {
    /// Creates a new pending order.
    pub fn new(user_id: UserId, amount: Money) -> Self {
        Self {
            id: OrderId::new(),
            user_id,
            amount,
            status: OrderStatus::Pending,
            failure_reason: None,
            created_at: Utc::now(),
        }
    }

    /// Applies a payment result: Pending → Paid or Pending → Failed,
    /// exactly once. A result arriving for a terminal order is rejected with
    /// `AlreadySettled`; callers treat that as a duplicate, not a failure.
    pub fn apply_payment_result(
        &mut self,
        success: bool,
        reason: Option<String>,
    ) -> Result<(), OrderError> {
        if self.status.is_terminal() {
            return Err(OrderError::AlreadySettled(self.id));
        }

        if success {
            self.status = OrderStatus::Paid;
        } else {
            self.status = OrderStatus::Failed;
            self.failure_reason = reason;
        }
        Ok(())
    }
}
