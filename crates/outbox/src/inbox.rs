use chrono::{DateTime, Utc};
use common::MessageId;

/// Outcome of attempting to admit a message for a consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// First sighting: the caller must apply the business effect in the same
    /// transaction, so effect and record commit together.
    Admitted,
    /// The `(message_id, consumer_id)` pair was already recorded. The caller
    /// skips the effect but may safely re-acknowledge the message.
    AlreadyProcessed,
}

/// A consumed-message record.
///
/// Uniqueness of `(message_id, consumer_id)` is enforced by a constraint,
/// never by a lookup-then-insert check: two concurrent deliveries of the same
/// message race on the insert and exactly one wins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumedRecord {
    pub message_id: MessageId,
    pub consumer_id: String,
    pub processed_at: DateTime<Utc>,
}

impl ConsumedRecord {
    /// Creates a record stamped with the current time.
    pub fn new(message_id: MessageId, consumer_id: impl Into<String>) -> Self {
        Self {
            message_id,
            consumer_id: consumer_id.into(),
            processed_at: Utc::now(),
        }
    }
}
