use contracts::PaymentProcessed;
use outbox::WireEvent;
use tokio::sync::watch;
use transport::{Message, Subscription};

use crate::{OrderError, OrderStore, SettleOutcome};

/// Inbox consumer id of the orders service.
pub const ORDERS_CONSUMER_ID: &str = "orders-service";

/// Consumes `PaymentProcessed` events and settles orders.
///
/// Processing is idempotent: the store admits each message through the inbox
/// in the same transaction as the status transition, so redeliveries are
/// no-ops.
pub struct PaymentProcessedConsumer<S: OrderStore> {
    store: S,
}

impl<S: OrderStore> PaymentProcessedConsumer<S> {
    /// Creates a consumer over an orders store.
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Runs the consume loop until shutdown or the transport closes.
    pub async fn run(&self, mut subscription: Subscription, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(consumer = ORDERS_CONSUMER_ID, "consumer started");

        loop {
            tokio::select! {
                message = subscription.recv() => {
                    let Some(message) = message else {
                        tracing::info!(consumer = ORDERS_CONSUMER_ID, "transport closed");
                        return;
                    };
                    if let Err(e) = self.handle(&message).await {
                        // The transaction rolled back with the inbox record;
                        // the transport's redelivery will retry the message.
                        tracing::error!(
                            message_id = %message.message_id,
                            error = %e,
                            "payment result processing failed"
                        );
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        tracing::info!(consumer = ORDERS_CONSUMER_ID, "consumer stopping");
                        return;
                    }
                }
            }
        }
    }

    /// Handles one delivery. Malformed payloads are logged and dropped
    /// rather than retried forever.
    #[tracing::instrument(skip(self, message), fields(message_id = %message.message_id))]
    pub async fn handle(&self, message: &Message) -> Result<Option<SettleOutcome>, OrderError> {
        let event = match WireEvent::decode(&message.payload).and_then(|w| w.event()) {
            Ok(event) => event,
            Err(e) => {
                metrics::counter!("orders_consumer_malformed_total").increment(1);
                tracing::error!(error = %e, "malformed payment result dropped");
                return Ok(None);
            }
        };
        let event: PaymentProcessed = event;

        let outcome = self
            .store
            .settle(
                message.message_id,
                ORDERS_CONSUMER_ID,
                event.order_id,
                event.success,
                event.reason.clone(),
            )
            .await?;

        match outcome {
            SettleOutcome::Settled(status) => {
                metrics::counter!("orders_settled_total").increment(1);
                tracing::info!(order_id = %event.order_id, %status, "order settled");
            }
            SettleOutcome::Duplicate => {
                tracing::debug!(order_id = %event.order_id, "duplicate payment result ignored");
            }
            SettleOutcome::UnknownOrder => {
                // Cross-store inconsistency; ack the message, keep the trace.
                metrics::counter!("orders_unknown_order_total").increment(1);
                tracing::warn!(order_id = %event.order_id, "payment result for unknown order");
            }
        }

        Ok(Some(outcome))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{MemoryOrderStore, OrderService, OrderStatus};
    use common::{MessageId, Money, OrderId, UserId};
    use contracts::PAYMENT_PROCESSED;
    use outbox::Envelope;

    fn delivery(event: &PaymentProcessed) -> Message {
        let envelope = Envelope::for_event(PAYMENT_PROCESSED, event).unwrap();
        envelope.to_message("payment-processed").unwrap()
    }

    async fn pending_order(store: &MemoryOrderStore) -> (OrderId, UserId) {
        let service = OrderService::new(store.clone());
        let user = UserId::new();
        let order = service
            .create_order(user, Money::from_cents(4000))
            .await
            .unwrap();
        (order.id, user)
    }

    #[tokio::test]
    async fn success_result_marks_order_paid() {
        let store = MemoryOrderStore::new();
        let (order_id, user) = pending_order(&store).await;
        let consumer = PaymentProcessedConsumer::new(store.clone());

        let message = delivery(&PaymentProcessed::succeeded(order_id, user));
        let outcome = consumer.handle(&message).await.unwrap();

        assert_eq!(outcome, Some(SettleOutcome::Settled(OrderStatus::Paid)));
        assert_eq!(
            store.get(order_id).await.unwrap().unwrap().status,
            OrderStatus::Paid
        );
    }

    #[tokio::test]
    async fn failure_result_marks_order_failed_with_reason() {
        let store = MemoryOrderStore::new();
        let (order_id, user) = pending_order(&store).await;
        let consumer = PaymentProcessedConsumer::new(store.clone());

        let message = delivery(&PaymentProcessed::failed(
            order_id,
            user,
            "Insufficient funds",
        ));
        consumer.handle(&message).await.unwrap();

        let order = store.get(order_id).await.unwrap().unwrap();
        assert_eq!(order.status, OrderStatus::Failed);
        assert_eq!(order.failure_reason.as_deref(), Some("Insufficient funds"));
    }

    #[tokio::test]
    async fn duplicate_delivery_settles_exactly_once() {
        let store = MemoryOrderStore::new();
        let (order_id, user) = pending_order(&store).await;
        let consumer = PaymentProcessedConsumer::new(store.clone());

        let message = delivery(&PaymentProcessed::succeeded(order_id, user));
        let first = consumer.handle(&message).await.unwrap();
        let second = consumer.handle(&message).await.unwrap();

        assert_eq!(first, Some(SettleOutcome::Settled(OrderStatus::Paid)));
        assert_eq!(second, Some(SettleOutcome::Duplicate));
        assert_eq!(
            store.get(order_id).await.unwrap().unwrap().status,
            OrderStatus::Paid
        );
    }

    #[tokio::test]
    async fn unknown_order_is_acknowledged_not_errored() {
        let store = MemoryOrderStore::new();
        let consumer = PaymentProcessedConsumer::new(store.clone());

        let message = delivery(&PaymentProcessed::succeeded(OrderId::new(), UserId::new()));
        let outcome = consumer.handle(&message).await.unwrap();

        assert_eq!(outcome, Some(SettleOutcome::UnknownOrder));
        assert_eq!(store.consumed_count(), 1);
    }

    #[tokio::test]
    async fn malformed_payload_is_dropped() {
        let store = MemoryOrderStore::new();
        let consumer = PaymentProcessedConsumer::new(store.clone());

        let message = Message {
            message_id: MessageId::new(),
            topic: "payment-processed".to_string(),
            payload: b"not json".to_vec(),
        };
        let outcome = consumer.handle(&message).await.unwrap();

        assert_eq!(outcome, None);
        assert_eq!(store.consumed_count(), 0);
    }
}
