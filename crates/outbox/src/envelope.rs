use chrono::{DateTime, Utc};
use common::MessageId;
use serde::{Deserialize, Serialize};
use transport::Message;

/// Lifecycle state of an outbox envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EnvelopeStatus {
    /// Awaiting publication.
    Pending,
    /// Confirmed published; `delivered_at` is set.
    Delivered,
    /// Poison envelope removed from the active queue.
    Quarantined,
}

impl EnvelopeStatus {
    /// Returns the status as its stored string form.
    pub fn as_str(&self) -> &'static str {
        match self {
            EnvelopeStatus::Pending => "pending",
            EnvelopeStatus::Delivered => "delivered",
            EnvelopeStatus::Quarantined => "quarantined",
        }
    }

    /// Parses a stored status string.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(EnvelopeStatus::Pending),
            "delivered" => Some(EnvelopeStatus::Delivered),
            "quarantined" => Some(EnvelopeStatus::Quarantined),
            _ => None,
        }
    }
}

/// A domain event recorded for dispatch, plus its delivery metadata.
///
/// Envelopes are written in the same transaction as the business mutation
/// that caused them. `delivered_at` is set at most once, by the dispatcher,
/// after the transport confirmed the publish.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    /// Unique identifier, carried on the wire for consumer deduplication.
    pub message_id: MessageId,

    /// Event kind (e.g. "PaymentRequested").
    pub event_type: String,

    /// The domain event as JSON.
    pub payload: serde_json::Value,

    /// When the envelope was written.
    pub created_at: DateTime<Utc>,

    /// When the publish was confirmed. `None` while pending.
    pub delivered_at: Option<DateTime<Utc>>,

    /// Current lifecycle state.
    pub status: EnvelopeStatus,

    /// Claim lease held by a dispatcher instance, if any. While the lease is
    /// in the future no other instance will pick this envelope up.
    pub claimed_until: Option<DateTime<Utc>>,

    /// Number of publish attempts so far.
    pub attempts: i32,
}

impl Envelope {
    /// Creates a pending envelope wrapping a serializable domain event.
    pub fn for_event<T: Serialize>(
        event_type: impl Into<String>,
        event: &T,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self {
            message_id: MessageId::new(),
            event_type: event_type.into(),
            payload: serde_json::to_value(event)?,
            created_at: Utc::now(),
            delivered_at: None,
            status: EnvelopeStatus::Pending,
            claimed_until: None,
            attempts: 0,
        })
    }

    /// Builds the transport message for this envelope.
    pub fn to_message(&self, topic: &str) -> Result<Message, serde_json::Error> {
        let wire = WireEvent {
            message_id: self.message_id,
            event_type: self.event_type.clone(),
            payload: self.payload.clone(),
        };
        Ok(Message {
            message_id: self.message_id,
            topic: topic.to_string(),
            payload: wire.encode()?,
        })
    }
}

/// The wire form of a published event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireEvent {
    pub message_id: MessageId,
    pub event_type: String,
    pub payload: serde_json::Value,
}

impl WireEvent {
    /// Serializes to transport bytes.
    pub fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Deserializes from transport bytes.
    pub fn decode(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }

    /// Deserializes the payload into a concrete event type.
    pub fn event<T: for<'de> Deserialize<'de>>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.payload.clone())
    }
}
