//! Abstract message transport between the two services.
//!
//! The concrete broker is a pluggable collaborator: the dispatcher and
//! consumers only see the [`Transport`] trait. The in-memory implementation
//! here backs tests and the single-process demo topology, and can inject
//! failures and duplicate deliveries to exercise the at-least-once paths.

mod error;
mod memory;

pub use error::TransportError;
pub use memory::InMemoryTransport;

use async_trait::async_trait;
use common::MessageId;
use tokio::sync::mpsc;

/// A message as it crosses the transport.
///
/// `message_id` is the outbox envelope id; consumers use it for inbox
/// deduplication, so every transport implementation must carry it intact.
#[derive(Debug, Clone)]
pub struct Message {
    pub message_id: MessageId,
    pub topic: String,
    pub payload: Vec<u8>,
}

/// A stream of messages for one topic subscription.
pub struct Subscription {
    receiver: mpsc::UnboundedReceiver<Message>,
}

impl Subscription {
    pub(crate) fn new(receiver: mpsc::UnboundedReceiver<Message>) -> Self {
        Self { receiver }
    }

    /// Receives the next message, or `None` once the transport is closed.
    pub async fn recv(&mut self) -> Option<Message> {
        self.receiver.recv().await
    }

    /// Receives without waiting. Used by tests to drain deterministically.
    pub fn try_recv(&mut self) -> Option<Message> {
        self.receiver.try_recv().ok()
    }
}

/// Publish/subscribe interface the outbox dispatcher and consumers depend on.
///
/// Implementations must be safe to share across tasks (Send + Sync). Publish
/// is at-least-once from the caller's point of view: a successful return means
/// the broker accepted the message, not that any consumer has processed it.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Publishes a message to its topic.
    async fn publish(&self, message: Message) -> Result<(), TransportError>;

    /// Opens a subscription for a topic.
    async fn subscribe(&self, topic: &str) -> Result<Subscription, TransportError>;
}
