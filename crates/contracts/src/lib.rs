//! Wire contract between the orders and payments services.
//!
//! These payloads are field-stable: both services deserialize them from the
//! transport, so renaming a field is a breaking protocol change.

use common::{Money, OrderId, UserId};
use serde::{Deserialize, Serialize};

/// Topic the orders service publishes payment requests on.
pub const PAYMENT_REQUESTED_TOPIC: &str = "payment-requested";

/// Topic the payments service publishes results on.
pub const PAYMENT_PROCESSED_TOPIC: &str = "payment-processed";

/// Event type tag for [`PaymentRequested`].
pub const PAYMENT_REQUESTED: &str = "PaymentRequested";

/// Event type tag for [`PaymentProcessed`].
pub const PAYMENT_PROCESSED: &str = "PaymentProcessed";

/// Published by the orders service when a new order needs payment.
///
/// `order_id` is the correlation identifier threading the saga across both
/// stores.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentRequested {
    pub order_id: OrderId,
    pub user_id: UserId,
    pub amount: Money,
}

/// Published by the payments service after a debit attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentProcessed {
    pub order_id: OrderId,
    pub user_id: UserId,
    pub success: bool,
    pub reason: Option<String>,
}

impl PaymentProcessed {
    /// A successful payment result.
    pub fn succeeded(order_id: OrderId, user_id: UserId) -> Self {
        Self {
            order_id,
            user_id,
            success: true,
            reason: None,
        }
    }

    /// A failed payment result with a human-readable reason.
    pub fn failed(order_id: OrderId, user_id: UserId, reason: impl Into<String>) -> Self {
        Self {
            order_id,
            user_id,
            success: false,
            reason: Some(reason.into()),
        }
    }
}
