use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{MessageId, OrderId, UserId};
use outbox::{Admission, Envelope, MemoryInbox, MemoryOutbox, OutboxStore};

use crate::{Order, OrderError, OrderStatus};

/// Outcome of settling an order from a `PaymentProcessed` event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettleOutcome {
    /// The order transitioned to the given terminal status.
    Settled(OrderStatus),
    /// The message was already processed, or the order was already terminal.
    /// Either way the message can be acknowledged without side effects.
    Duplicate,
    /// No order with that id exists in this store. Logged as an anomaly; the
    /// message is still recorded as consumed so it cannot loop.
    UnknownOrder,
}

/// Persistence boundary of the orders service.
///
/// `create` and `settle` are composite operations: business row and
/// outbox/inbox row commit in one atomic unit.
#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Writes the order and its `PaymentRequested` envelope atomically.
    async fn create(&self, order: &Order, envelope: &Envelope) -> Result<(), OrderError>;

    /// Loads an order by id.
    async fn get(&self, id: OrderId) -> Result<Option<Order>, OrderError>;

    /// Lists a user's orders, newest first.
    async fn list_for_user(&self, user_id: UserId) -> Result<Vec<Order>, OrderError>;

    /// Admits the message through the inbox and applies the payment result,
    /// atomically. Duplicate admissions and terminal orders are no-ops.
    async fn settle(
        &self,
        message_id: MessageId,
        consumer_id: &str,
        order_id: OrderId,
        success: bool,
        reason: Option<String>,
    ) -> Result<SettleOutcome, OrderError>;

    /// Deletes consumed-message records older than the horizon.
    async fn prune_consumed(&self, older_than: DateTime<Utc>) -> Result<u64, OrderError>;
}

#[derive(Default)]
struct OrdersState {
    orders: HashMap<OrderId, Order>,
    outbox: MemoryOutbox,
    inbox: MemoryInbox,
}

/// In-memory orders store for tests and the demo topology.
///
/// One mutex guards orders, outbox, and inbox together, so every composite
/// operation is atomic the way a database transaction would be.
#[derive(Clone, Default)]
pub struct MemoryOrderStore {
    state: Arc<Mutex<OrdersState>>,
}

impl MemoryOrderStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of pending outbox envelopes. Test helper.
    pub fn pending_envelopes(&self) -> usize {
        self.state.lock().unwrap().outbox.pending_count()
    }

    /// Returns the number of consumed-message records. Test helper.
    pub fn consumed_count(&self) -> usize {
        self.state.lock().unwrap().inbox.len()
    }
}

#[async_trait]
impl OrderStore for MemoryOrderStore {
    async fn create(&self, order: &Order, envelope: &Envelope) -> Result<(), OrderError> {
        let mut state = self.state.lock().unwrap();
        state.orders.insert(order.id, order.clone());
        state.outbox.append(envelope.clone());
        Ok(())
    }

    async fn get(&self, id: OrderId) -> Result<Option<Order>, OrderError> {
        Ok(self.state.lock().unwrap().orders.get(&id).cloned())
    }

    async fn list_for_user(&self, user_id: UserId) -> Result<Vec<Order>, OrderError> {
        let state = self.state.lock().unwrap();
        let mut orders: Vec<Order> = state
            .orders
            .values()
            .filter(|o| o.user_id == user_id)
            .cloned()
            .collect();
        orders.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(orders)
    }

    async fn settle(
        &self,
        message_id: MessageId,
        consumer_id: &str,
        order_id: OrderId,
        success: bool,
        reason: Option<String>,
    ) -> Result<SettleOutcome, OrderError> {
        let mut state = self.state.lock().unwrap();

        if state.inbox.try_admit(message_id, consumer_id, Utc::now())
            == Admission::AlreadyProcessed
        {
            return Ok(SettleOutcome::Duplicate);
        }

        let Some(order) = state.orders.get_mut(&order_id) else {
            // Admission stays recorded: redeliveries of this message must not
            // re-log the anomaly forever.
            return Ok(SettleOutcome::UnknownOrder);
        };

        match order.apply_payment_result(success, reason) {
            Ok(()) => Ok(SettleOutcome::Settled(order.status)),
            Err(OrderError::AlreadySettled(_)) => Ok(SettleOutcome::Duplicate),
            Err(e) => Err(e),
        }
    }

    async fn prune_consumed(&self, older_than: DateTime<Utc>) -> Result<u64, OrderError> {
        Ok(self.state.lock().unwrap().inbox.prune(older_than))
    }
}

// The dispatcher drains the orders outbox through the same store.
#[async_trait]
impl OutboxStore for MemoryOrderStore {
    async fn claim_batch(&self, limit: usize, lease: Duration) -> outbox::Result<Vec<Envelope>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .outbox
            .claim_batch(limit, lease, Utc::now()))
    }

    async fn mark_delivered(&self, id: MessageId) -> outbox::Result<()> {
        self.state
            .lock()
            .unwrap()
            .outbox
            .mark_delivered(id, Utc::now());
        Ok(())
    }

    async fn release(&self, id: MessageId) -> outbox::Result<()> {
        self.state.lock().unwrap().outbox.release(id);
        Ok(())
    }

    async fn quarantine(&self, id: MessageId, reason: &str) -> outbox::Result<()> {
        self.state.lock().unwrap().outbox.quarantine(id, reason);
        Ok(())
    }

    async fn prune_delivered(&self, older_than: DateTime<Utc>) -> outbox::Result<u64> {
        Ok(self.state.lock().unwrap().outbox.prune_delivered(older_than))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::Money;
    use contracts::{PAYMENT_REQUESTED, PaymentRequested};

    fn order_and_envelope() -> (Order, Envelope) {
        let order = Order::new(UserId::new(), Money::from_cents(4000));
        let envelope = Envelope::for_event(
            PAYMENT_REQUESTED,
            &PaymentRequested {
                order_id: order.id,
                user_id: order.user_id,
                amount: order.amount,
            },
        )
        .unwrap();
        (order, envelope)
    }

    #[tokio::test]
    async fn create_writes_order_and_envelope_together() {
        let store = MemoryOrderStore::new();
        let (order, envelope) = order_and_envelope();

        store.create(&order, &envelope).await.unwrap();

        assert_eq!(store.get(order.id).await.unwrap().unwrap().id, order.id);
        assert_eq!(store.pending_envelopes(), 1);
    }

    #[tokio::test]
    async fn list_for_user_filters_and_sorts() {
        let store = MemoryOrderStore::new();
        let user = UserId::new();

        let mut first = Order::new(user, Money::from_cents(100));
        first.created_at = Utc::now() - chrono::Duration::seconds(10);
        let second = Order::new(user, Money::from_cents(200));
        let other = Order::new(UserId::new(), Money::from_cents(300));

        for order in [&first, &second, &other] {
            let (_, envelope) = order_and_envelope();
            store.create(order, &envelope).await.unwrap();
        }

        let orders = store.list_for_user(user).await.unwrap();
        assert_eq!(orders.len(), 2);
        assert_eq!(orders[0].id, second.id);
        assert_eq!(orders[1].id, first.id);
    }

    #[tokio::test]
    async fn settle_transitions_once() {
        let store = MemoryOrderStore::new();
        let (order, envelope) = order_and_envelope();
        store.create(&order, &envelope).await.unwrap();

        let outcome = store
            .settle(MessageId::new(), "orders-service", order.id, true, None)
            .await
            .unwrap();
        assert_eq!(outcome, SettleOutcome::Settled(OrderStatus::Paid));
        assert_eq!(
            store.get(order.id).await.unwrap().unwrap().status,
            OrderStatus::Paid
        );
    }

    #[tokio::test]
    async fn settle_same_message_twice_is_duplicate() {
        let store = MemoryOrderStore::new();
        let (order, envelope) = order_and_envelope();
        store.create(&order, &envelope).await.unwrap();

        let message_id = MessageId::new();
        store
            .settle(message_id, "orders-service", order.id, true, None)
            .await
            .unwrap();
        let second = store
            .settle(message_id, "orders-service", order.id, true, None)
            .await
            .unwrap();

        assert_eq!(second, SettleOutcome::Duplicate);
    }

    #[tokio::test]
    async fn settle_terminal_order_with_new_message_is_duplicate() {
        let store = MemoryOrderStore::new();
        let (order, envelope) = order_and_envelope();
        store.create(&order, &envelope).await.unwrap();

        store
            .settle(MessageId::new(), "orders-service", order.id, true, None)
            .await
            .unwrap();
        // A distinct message targeting the settled order.
        let outcome = store
            .settle(
                MessageId::new(),
                "orders-service",
                order.id,
                false,
                Some("late".to_string()),
            )
            .await
            .unwrap();

        assert_eq!(outcome, SettleOutcome::Duplicate);
        assert_eq!(
            store.get(order.id).await.unwrap().unwrap().status,
            OrderStatus::Paid
        );
    }

    #[tokio::test]
    async fn settle_unknown_order_is_anomaly_but_consumed() {
        let store = MemoryOrderStore::new();
        let message_id = MessageId::new();

        let outcome = store
            .settle(message_id, "orders-service", OrderId::new(), true, None)
            .await
            .unwrap();
        assert_eq!(outcome, SettleOutcome::UnknownOrder);

        // Redelivery of the same message is now a duplicate, not a re-logged
        // anomaly.
        let outcome = store
            .settle(message_id, "orders-service", OrderId::new(), true, None)
            .await
            .unwrap();
        assert_eq!(outcome, SettleOutcome::Duplicate);
    }

    #[tokio::test]
    async fn prune_consumed_removes_old_records() {
        let store = MemoryOrderStore::new();
        let (order, envelope) = order_and_envelope();
        store.create(&order, &envelope).await.unwrap();
        store
            .settle(MessageId::new(), "orders-service", order.id, true, None)
            .await
            .unwrap();

        assert_eq!(store.consumed_count(), 1);
        let removed = store
            .prune_consumed(Utc::now() + chrono::Duration::seconds(1))
            .await
            .unwrap();
        assert_eq!(removed, 1);
        assert_eq!(store.consumed_count(), 0);
    }
}
