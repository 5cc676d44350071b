use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::{Message, Subscription, Transport, TransportError};

#[derive(Default)]
struct InMemoryState {
    subscribers: HashMap<String, Vec<mpsc::UnboundedSender<Message>>>,
    fail_publish: bool,
    duplicate_deliveries: bool,
    published: u64,
}

/// In-memory transport for tests and the single-process demo.
///
/// Delivery is fan-out per topic. Test knobs can make publishes fail (to
/// exercise dispatcher retry) or deliver every message twice (to exercise
/// consumer deduplication).
#[derive(Clone, Default)]
pub struct InMemoryTransport {
    state: Arc<RwLock<InMemoryState>>,
}

impl InMemoryTransport {
    /// Creates a new transport with no subscribers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Configures publish calls to fail until reset.
    pub fn set_fail_publish(&self, fail: bool) {
        self.state.write().unwrap().fail_publish = fail;
    }

    /// Configures every accepted message to be delivered twice.
    pub fn set_duplicate_deliveries(&self, duplicate: bool) {
        self.state.write().unwrap().duplicate_deliveries = duplicate;
    }

    /// Returns the number of successfully accepted publishes.
    pub fn published_count(&self) -> u64 {
        self.state.read().unwrap().published
    }
}

#[async_trait]
impl Transport for InMemoryTransport {
    async fn publish(&self, message: Message) -> Result<(), TransportError> {
        let mut state = self.state.write().unwrap();

        if state.fail_publish {
            return Err(TransportError::Unavailable(
                "broker unreachable".to_string(),
            ));
        }

        state.published += 1;
        let duplicate = state.duplicate_deliveries;

        if let Some(senders) = state.subscribers.get_mut(&message.topic) {
            // Drop subscribers whose receiver side is gone.
            senders.retain(|tx| {
                let delivered = tx.send(message.clone()).is_ok();
                if delivered && duplicate {
                    let _ = tx.send(message.clone());
                }
                delivered
            });
        }

        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> Result<Subscription, TransportError> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.state
            .write()
            .unwrap()
            .subscribers
            .entry(topic.to_string())
            .or_default()
            .push(tx);
        Ok(Subscription::new(rx))
    }
}
