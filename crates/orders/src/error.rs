use common::{Money, OrderId};
use outbox::OutboxError;
use thiserror::Error;

/// Errors from the orders service.
#[derive(Debug, Error)]
pub enum OrderError {
    /// Order amount must be strictly positive.
    #[error("Invalid order amount: {0}")]
    InvalidAmount(Money),

    /// The order does not exist.
    #[error("Order not found: {0}")]
    NotFound(OrderId),

    /// The order is already in a terminal state.
    #[error("Order {0} is already settled")]
    AlreadySettled(OrderId),

    /// Outbox or database failure.
    #[error(transparent)]
    Store(#[from] OutboxError),

    /// A payload could not be serialized.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<sqlx::Error> for OrderError {
    fn from(e: sqlx::Error) -> Self {
        OrderError::Store(OutboxError::Database(e))
    }
}
