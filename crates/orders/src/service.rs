use common::{Money, OrderId, UserId};
use contracts::{PAYMENT_REQUESTED, PaymentRequested};
use outbox::Envelope;

use crate::{Order, OrderError, OrderStore};

/// Application operations of the orders service.
pub struct OrderService<S: OrderStore> {
    store: S,
}

impl<S: OrderStore> OrderService<S> {
    /// Creates a service over a store.
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Creates a pending order and enqueues its `PaymentRequested` event.
    ///
    /// Order row and envelope commit atomically; the outcome of the payment
    /// is only observable later by polling the order status.
    #[tracing::instrument(skip(self))]
    pub async fn create_order(&self, user_id: UserId, amount: Money) -> Result<Order, OrderError> {
        if !amount.is_positive() {
            return Err(OrderError::InvalidAmount(amount));
        }

        let order = Order::new(user_id, amount);
        let envelope = Envelope::for_event(
            PAYMENT_REQUESTED,
            &PaymentRequested {
                order_id: order.id,
                user_id,
                amount,
            },
        )?;

        self.store.create(&order, &envelope).await?;

        metrics::counter!("orders_created_total").increment(1);
        tracing::info!(order_id = %order.id, %user_id, %amount, "order created");

        Ok(order)
    }

    /// Loads an order by id.
    pub async fn get_order(&self, id: OrderId) -> Result<Option<Order>, OrderError> {
        self.store.get(id).await
    }

    /// Lists a user's orders, newest first.
    pub async fn list_orders(&self, user_id: UserId) -> Result<Vec<Order>, OrderError> {
        self.store.list_for_user(user_id).await
    }
}
