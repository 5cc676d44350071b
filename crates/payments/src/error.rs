use common::{Money, UserId};
use outbox::OutboxError;
use thiserror::Error;

/// Errors of the payments service.
#[derive(Debug, Error)]
pub enum PaymentError {
    /// An account already exists for the user.
    #[error("account already exists for user {0}")]
    AccountExists(UserId),

    /// No account exists for the user.
    #[error("no account for user {0}")]
    AccountNotFound(UserId),

    /// Amount must be strictly positive.
    #[error("invalid amount: {0}")]
    InvalidAmount(Money),

    /// The debit lost the version race too many times in a row.
    #[error("debit for user {0} exhausted its concurrency retries")]
    ConcurrencyExhausted(UserId),

    /// Outbox or inbox persistence failed.
    #[error(transparent)]
    Store(#[from] OutboxError),

    /// Event payload could not be serialized.
    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<sqlx::Error> for PaymentError {
    fn from(e: sqlx::Error) -> Self {
        PaymentError::Store(OutboxError::Database(e))
    }
}
