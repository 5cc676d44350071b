//! Transactional outbox and inbox primitives.
//!
//! The outbox couples event publication to local state mutation: a business
//! operation writes its row changes and an [`Envelope`] in the same store
//! transaction, and the [`Dispatcher`] later drains undelivered envelopes to
//! the transport. Consumers admit each message through the inbox
//! ([`Admission`]) inside their own transaction, which makes processing
//! idempotent under the at-least-once delivery this design guarantees.

mod dispatcher;
mod envelope;
mod error;
mod inbox;
mod memory;
pub mod pg;
mod store;

pub use dispatcher::{Dispatcher, DispatcherConfig};
pub use envelope::{Envelope, EnvelopeStatus, WireEvent};
pub use error::{OutboxError, Result};
pub use inbox::{Admission, ConsumedRecord};
pub use memory::{MemoryInbox, MemoryOutbox};
pub use store::OutboxStore;
