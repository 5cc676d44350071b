use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use transport::{Transport, TransportError};

use crate::{OutboxStore, Result};

/// Tuning knobs for a dispatcher loop.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Topic the drained envelopes are published on.
    pub topic: String,
    /// Time between outbox scans.
    pub poll_interval: Duration,
    /// Maximum envelopes per scan.
    pub batch_size: usize,
    /// Timeout for a single publish attempt.
    pub publish_timeout: Duration,
    /// How long a claimed envelope is invisible to other dispatcher
    /// instances before it becomes claimable again.
    pub claim_lease: Duration,
    /// Retention horizon for delivered envelopes; `None` keeps them forever.
    pub retention: Option<Duration>,
}

impl DispatcherConfig {
    /// Default knobs for a topic: 1s poll, batches of 100, 5s publish
    /// timeout, 30s claim lease, no retention pruning.
    pub fn for_topic(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            poll_interval: Duration::from_secs(1),
            batch_size: 100,
            publish_timeout: Duration::from_secs(5),
            claim_lease: Duration::from_secs(30),
            retention: None,
        }
    }
}

/// Drains a service's outbox to the transport.
///
/// The loop is the correctness fallback: even if a commit-time publish hint
/// is lost in a crash, polling finds the undelivered envelope and republishes
/// it. A crash between publish and `mark_delivered` causes re-publication,
/// which is why consumers deduplicate through the inbox.
pub struct Dispatcher<S, T> {
    store: S,
    transport: T,
    config: DispatcherConfig,
}

impl<S, T> Dispatcher<S, T>
where
    S: OutboxStore,
    T: Transport,
{
    /// Creates a dispatcher over a store and transport.
    pub fn new(store: S, transport: T, config: DispatcherConfig) -> Self {
        Self {
            store,
            transport,
            config,
        }
    }

    /// Runs the polling loop until `shutdown` flips to true. The in-flight
    /// batch is finished (or its claims released) before returning; no
    /// envelope is left half-marked.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        tracing::info!(topic = %self.config.topic, "outbox dispatcher started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.run_once().await {
                        tracing::error!(topic = %self.config.topic, error = %e, "dispatch scan failed");
                    }
                    if let Some(retention) = self.config.retention {
                        let horizon = Utc::now()
                            - chrono::Duration::from_std(retention).unwrap_or_default();
                        if let Err(e) = self.store.prune_delivered(horizon).await {
                            tracing::warn!(error = %e, "outbox retention sweep failed");
                        }
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        tracing::info!(topic = %self.config.topic, "outbox dispatcher stopping");
                        return;
                    }
                }
            }
        }
    }

    /// Performs one scan: claim a batch, publish each envelope in creation
    /// order, confirm delivery. Returns the number delivered.
    ///
    /// On a transient publish failure the failed envelope and the rest of the
    /// batch are released unpublished, preserving per-correlation ordering on
    /// the next attempt. Envelopes that cannot be encoded are quarantined.
    #[tracing::instrument(skip(self), fields(topic = %self.config.topic))]
    pub async fn run_once(&self) -> Result<usize> {
        let batch = self
            .store
            .claim_batch(self.config.batch_size, self.config.claim_lease)
            .await?;

        if batch.is_empty() {
            return Ok(0);
        }

        metrics::histogram!("outbox_batch_size").record(batch.len() as f64);

        let mut delivered = 0usize;
        let mut batch_iter = batch.into_iter();

        while let Some(envelope) = batch_iter.next() {
            let message = match envelope.to_message(&self.config.topic) {
                Ok(message) => message,
                Err(e) => {
                    tracing::error!(
                        message_id = %envelope.message_id,
                        event_type = %envelope.event_type,
                        error = %e,
                        "poison envelope quarantined"
                    );
                    metrics::counter!("outbox_quarantined_total").increment(1);
                    self.store
                        .quarantine(envelope.message_id, &e.to_string())
                        .await?;
                    continue;
                }
            };

            let publish = tokio::time::timeout(
                self.config.publish_timeout,
                self.transport.publish(message),
            )
            .await
            .unwrap_or(Err(TransportError::Timeout(self.config.publish_timeout)));

            match publish {
                Ok(()) => {
                    self.store.mark_delivered(envelope.message_id).await?;
                    delivered += 1;
                    metrics::counter!("outbox_published_total").increment(1);
                    tracing::debug!(
                        message_id = %envelope.message_id,
                        event_type = %envelope.event_type,
                        "envelope published"
                    );
                }
                Err(e) => {
                    metrics::counter!("outbox_publish_failures_total").increment(1);
                    tracing::warn!(
                        message_id = %envelope.message_id,
                        error = %e,
                        "publish failed, releasing claim for retry"
                    );
                    // Stop the batch: publishing later envelopes ahead of this
                    // one would break per-correlation creation order.
                    self.store.release(envelope.message_id).await?;
                    for remaining in batch_iter {
                        self.store.release(remaining.message_id).await?;
                    }
                    break;
                }
            }
        }

        Ok(delivered)
    }
}
