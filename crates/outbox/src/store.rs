use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::MessageId;

use crate::{Envelope, Result};

/// Dispatcher-side view of a service's outbox.
///
/// Appending envelopes is not part of this trait: appends happen inside the
/// service store's own transactions, atomically with the business mutation.
/// The dispatcher only claims, confirms, and quarantines.
#[async_trait]
pub trait OutboxStore: Send + Sync {
    /// Claims up to `limit` pending envelopes in creation order (`created_at`
    /// ascending, ties broken by message id), stamping each with a lease so
    /// concurrent dispatcher instances skip them until the lease expires.
    async fn claim_batch(&self, limit: usize, lease: Duration) -> Result<Vec<Envelope>>;

    /// Records a confirmed publish. Idempotent: marking an already-delivered
    /// envelope is a no-op.
    async fn mark_delivered(&self, id: MessageId) -> Result<()>;

    /// Releases a claim after a failed publish so the envelope is retried on
    /// the next poll.
    async fn release(&self, id: MessageId) -> Result<()>;

    /// Moves a poison envelope out of the active dispatch queue permanently.
    async fn quarantine(&self, id: MessageId, reason: &str) -> Result<()>;

    /// Deletes delivered envelopes older than the given horizon. Returns the
    /// number removed. Undelivered envelopes are never pruned.
    async fn prune_delivered(&self, older_than: DateTime<Utc>) -> Result<u64>;
}
