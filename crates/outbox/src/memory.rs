use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use common::MessageId;

use crate::{Admission, ConsumedRecord, Envelope, EnvelopeStatus};

/// In-memory outbox log.
///
/// Plain mutable state with no interior locking: a service store embeds this
/// inside its own mutex so that business rows and envelopes mutate under one
/// critical section, standing in for the database transaction the Postgres
/// store uses.
#[derive(Debug, Default)]
pub struct MemoryOutbox {
    envelopes: Vec<Envelope>,
    quarantine_reasons: HashMap<MessageId, String>,
}

impl MemoryOutbox {
    /// Creates an empty outbox.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a pending envelope.
    pub fn append(&mut self, envelope: Envelope) {
        self.envelopes.push(envelope);
    }

    /// Claims up to `limit` pending, unclaimed (or lease-expired) envelopes
    /// in creation order and stamps them with a lease ending at `now + lease`.
    pub fn claim_batch(
        &mut self,
        limit: usize,
        lease: Duration,
        now: DateTime<Utc>,
    ) -> Vec<Envelope> {
        let lease_until = now + chrono::Duration::from_std(lease).unwrap_or_default();

        let mut indices: Vec<usize> = self
            .envelopes
            .iter()
            .enumerate()
            .filter(|(_, e)| {
                e.status == EnvelopeStatus::Pending
                    && e.claimed_until.is_none_or(|until| until <= now)
            })
            .map(|(i, _)| i)
            .collect();

        indices.sort_by(|&a, &b| {
            let (ea, eb) = (&self.envelopes[a], &self.envelopes[b]);
            ea.created_at
                .cmp(&eb.created_at)
                .then(ea.message_id.cmp(&eb.message_id))
        });
        indices.truncate(limit);

        indices
            .into_iter()
            .map(|i| {
                let envelope = &mut self.envelopes[i];
                envelope.claimed_until = Some(lease_until);
                envelope.attempts += 1;
                envelope.clone()
            })
            .collect()
    }

    /// Sets `delivered_at` once. No-op for already-delivered envelopes.
    pub fn mark_delivered(&mut self, id: MessageId, now: DateTime<Utc>) {
        if let Some(envelope) = self.find_mut(id)
            && envelope.delivered_at.is_none()
        {
            envelope.delivered_at = Some(now);
            envelope.status = EnvelopeStatus::Delivered;
            envelope.claimed_until = None;
        }
    }

    /// Clears the claim so the envelope is retried on the next poll.
    pub fn release(&mut self, id: MessageId) {
        if let Some(envelope) = self.find_mut(id) {
            envelope.claimed_until = None;
        }
    }

    /// Removes a poison envelope from the active queue permanently.
    pub fn quarantine(&mut self, id: MessageId, reason: &str) {
        if let Some(envelope) = self.find_mut(id)
            && envelope.status == EnvelopeStatus::Pending
        {
            envelope.status = EnvelopeStatus::Quarantined;
            envelope.claimed_until = None;
            self.quarantine_reasons.insert(id, reason.to_string());
        }
    }

    /// Deletes delivered envelopes older than the horizon.
    pub fn prune_delivered(&mut self, older_than: DateTime<Utc>) -> u64 {
        let before = self.envelopes.len();
        self.envelopes.retain(|e| {
            !(e.status == EnvelopeStatus::Delivered
                && e.delivered_at.is_some_and(|at| at < older_than))
        });
        (before - self.envelopes.len()) as u64
    }

    /// Looks up an envelope by id.
    pub fn get(&self, id: MessageId) -> Option<&Envelope> {
        self.envelopes.iter().find(|e| e.message_id == id)
    }

    /// Returns the number of pending envelopes.
    pub fn pending_count(&self) -> usize {
        self.envelopes
            .iter()
            .filter(|e| e.status == EnvelopeStatus::Pending)
            .count()
    }

    /// Returns the recorded quarantine reason, if any.
    pub fn quarantine_reason(&self, id: MessageId) -> Option<&str> {
        self.quarantine_reasons.get(&id).map(String::as_str)
    }

    fn find_mut(&mut self, id: MessageId) -> Option<&mut Envelope> {
        self.envelopes.iter_mut().find(|e| e.message_id == id)
    }
}

/// In-memory consumed-message set, embedded like [`MemoryOutbox`].
#[derive(Debug, Default)]
pub struct MemoryInbox {
    consumed: HashMap<(MessageId, String), ConsumedRecord>,
}

impl MemoryInbox {
    /// Creates an empty inbox.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts the `(message_id, consumer_id)` pair, reporting whether this
    /// was the first sighting. Mirrors the insert-or-conflict semantics of
    /// the Postgres constraint.
    pub fn try_admit(
        &mut self,
        message_id: MessageId,
        consumer_id: &str,
        now: DateTime<Utc>,
    ) -> Admission {
        match self
            .consumed
            .entry((message_id, consumer_id.to_string()))
        {
            std::collections::hash_map::Entry::Occupied(_) => Admission::AlreadyProcessed,
            std::collections::hash_map::Entry::Vacant(entry) => {
                entry.insert(ConsumedRecord {
                    message_id,
                    consumer_id: consumer_id.to_string(),
                    processed_at: now,
                });
                Admission::Admitted
            }
        }
    }

    /// Removes the admission record, undoing a failed "transaction".
    pub fn rollback(&mut self, message_id: MessageId, consumer_id: &str) {
        self.consumed
            .remove(&(message_id, consumer_id.to_string()));
    }

    /// Deletes records older than the horizon.
    pub fn prune(&mut self, older_than: DateTime<Utc>) -> u64 {
        let before = self.consumed.len();
        self.consumed
            .retain(|_, record| record.processed_at >= older_than);
        (before - self.consumed.len()) as u64
    }

    /// Returns the number of recorded messages.
    pub fn len(&self) -> usize {
        self.consumed.len()
    }

    /// Returns true if no messages have been recorded.
    pub fn is_empty(&self) -> bool {
        self.consumed.is_empty()
    }
}
