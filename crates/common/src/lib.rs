//! Shared types used across the orders and payments services.

mod money;
mod types;

pub use money::Money;
pub use types::{MessageId, OrderId, UserId};
