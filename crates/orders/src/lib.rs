//! Orders service: accepts order creation, publishes `PaymentRequested`
//! through the transactional outbox, and settles orders from incoming
//! `PaymentProcessed` events.

mod consumer;
mod error;
mod order;
mod pg;
mod service;
mod store;

pub use consumer::{ORDERS_CONSUMER_ID, PaymentProcessedConsumer};
pub use error::OrderError;
pub use order::{Order, OrderStatus};
pub use pg::PgOrderStore;
pub use service::OrderService;
pub use store::{MemoryOrderStore, OrderStore, SettleOutcome};
