use contracts::PaymentRequested;
use outbox::WireEvent;
use tokio::sync::watch;
use transport::{Message, Subscription};

use crate::{AccountStore, PaymentError, PaymentOutcome};

/// Inbox consumer id of the payments service.
pub const PAYMENTS_CONSUMER_ID: &str = "payments-service";

/// Consumes `PaymentRequested` events and debits accounts.
///
/// Every admitted request produces a `PaymentProcessed` result through the
/// store's outbox, success or failure alike; only duplicates stay silent.
pub struct PaymentRequestedConsumer<S: AccountStore> {
    store: S,
}

impl<S: AccountStore> PaymentRequestedConsumer<S> {
    /// Creates a consumer over an accounts store.
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Runs the consume loop until shutdown or the transport closes.
    pub async fn run(&self, mut subscription: Subscription, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(consumer = PAYMENTS_CONSUMER_ID, "consumer started");

        loop {
            tokio::select! {
                message = subscription.recv() => {
                    let Some(message) = message else {
                        tracing::info!(consumer = PAYMENTS_CONSUMER_ID, "transport closed");
                        return;
                    };
                    if let Err(e) = self.handle(&message).await {
                        // Nothing committed; the transport's redelivery will
                        // retry the message.
                        tracing::error!(
                            message_id = %message.message_id,
                            error = %e,
                            "payment request processing failed"
                        );
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        tracing::info!(consumer = PAYMENTS_CONSUMER_ID, "consumer stopping");
                        return;
                    }
                }
            }
        }
    }

    /// Handles one delivery. Malformed payloads are logged and dropped
    /// rather than retried forever.
    #[tracing::instrument(skip(self, message), fields(message_id = %message.message_id))]
    pub async fn handle(&self, message: &Message) -> Result<Option<PaymentOutcome>, PaymentError> {
        let request: PaymentRequested =
            match WireEvent::decode(&message.payload).and_then(|w| w.event()) {
                Ok(event) => event,
                Err(e) => {
                    metrics::counter!("payments_consumer_malformed_total").increment(1);
                    tracing::error!(error = %e, "malformed payment request dropped");
                    return Ok(None);
                }
            };

        let outcome = self
            .store
            .apply_payment_request(message.message_id, PAYMENTS_CONSUMER_ID, &request)
            .await?;

        match &outcome {
            PaymentOutcome::Processed(result) if result.success => {
                metrics::counter!("payments_processed_total", "result" => "success").increment(1);
                tracing::info!(order_id = %request.order_id, amount = %request.amount, "payment succeeded");
            }
            PaymentOutcome::Processed(result) => {
                metrics::counter!("payments_processed_total", "result" => "failure").increment(1);
                tracing::info!(
                    order_id = %request.order_id,
                    reason = result.reason.as_deref().unwrap_or(""),
                    "payment declined"
                );
            }
            PaymentOutcome::Duplicate => {
                tracing::debug!(order_id = %request.order_id, "duplicate payment request ignored");
            }
        }

        Ok(Some(outcome))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Account, AccountService, MemoryAccountStore};
    use common::{MessageId, Money, OrderId, UserId};
    use contracts::{PAYMENT_REQUESTED, PAYMENT_REQUESTED_TOPIC};
    use outbox::Envelope;

    fn delivery(request: &PaymentRequested) -> Message {
        let envelope = Envelope::for_event(PAYMENT_REQUESTED, request).unwrap();
        envelope.to_message(PAYMENT_REQUESTED_TOPIC).unwrap()
    }

    async fn funded_user(store: &MemoryAccountStore, cents: i64) -> UserId {
        let service = AccountService::new(store.clone());
        let user = UserId::new();
        service.create_account(user).await.unwrap();
        service.deposit(user, Money::from_cents(cents)).await.unwrap();
        user
    }

    #[tokio::test]
    async fn request_with_funds_debits_and_enqueues_success() {
        let store = MemoryAccountStore::new();
        let user = funded_user(&store, 10_000).await;
        let consumer = PaymentRequestedConsumer::new(store.clone());

        let message = delivery(&PaymentRequested {
            order_id: OrderId::new(),
            user_id: user,
            amount: Money::from_cents(4000),
        });
        let outcome = consumer.handle(&message).await.unwrap();

        assert!(matches!(
            outcome,
            Some(PaymentOutcome::Processed(r)) if r.success
        ));
        assert_eq!(
            store.get(user).await.unwrap().unwrap().balance,
            Money::from_cents(6000)
        );
        assert_eq!(store.pending_envelopes(), 1);
    }

    #[tokio::test]
    async fn redelivered_request_is_duplicate() {
        let store = MemoryAccountStore::new();
        let user = funded_user(&store, 10_000).await;
        let consumer = PaymentRequestedConsumer::new(store.clone());

        let message = delivery(&PaymentRequested {
            order_id: OrderId::new(),
            user_id: user,
            amount: Money::from_cents(4000),
        });
        consumer.handle(&message).await.unwrap();
        let second = consumer.handle(&message).await.unwrap();

        assert_eq!(second, Some(PaymentOutcome::Duplicate));
        assert_eq!(
            store.get(user).await.unwrap().unwrap().balance,
            Money::from_cents(6000)
        );
    }

    #[tokio::test]
    async fn request_for_unknown_user_enqueues_failure() {
        let store = MemoryAccountStore::new();
        let consumer = PaymentRequestedConsumer::new(store.clone());

        let message = delivery(&PaymentRequested {
            order_id: OrderId::new(),
            user_id: UserId::new(),
            amount: Money::from_cents(4000),
        });
        let outcome = consumer.handle(&message).await.unwrap();

        assert!(matches!(
            outcome,
            Some(PaymentOutcome::Processed(r)) if !r.success
        ));
        assert_eq!(store.pending_envelopes(), 1);
    }

    #[tokio::test]
    async fn malformed_payload_is_dropped() {
        let store = MemoryAccountStore::new();
        store.create(&Account::new(UserId::new())).await.unwrap();
        let consumer = PaymentRequestedConsumer::new(store.clone());

        let message = Message {
            message_id: MessageId::new(),
            topic: PAYMENT_REQUESTED_TOPIC.to_string(),
            payload: b"not json".to_vec(),
        };
        let outcome = consumer.handle(&message).await.unwrap();

        assert_eq!(outcome, None);
        assert_eq!(store.consumed_count(), 0);
    }
}
