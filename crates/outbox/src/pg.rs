//! PostgreSQL operations for the outbox and inbox tables.
//!
//! `append` and `try_admit` take a connection so the caller can run them
//! inside its own transaction and commit them atomically with business rows.
//! Claiming, confirming, and pruning are dispatcher-side maintenance and work
//! against the pool directly.

use std::time::Duration;

use chrono::{DateTime, Utc};
use common::MessageId;
use sqlx::postgres::PgRow;
use sqlx::{PgConnection, PgPool, Row};
use uuid::Uuid;

use crate::{Admission, Envelope, EnvelopeStatus, Result};

/// Writes a pending envelope using the caller's connection.
///
/// Run this inside the transaction that also writes the business mutation;
/// that single commit is what rules out "state changed but event lost".
pub async fn append(conn: &mut PgConnection, envelope: &Envelope) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO outbox_events (message_id, event_type, payload, created_at, status, attempts)
        VALUES ($1, $2, $3, $4, $5, $6)
        "#,
    )
    .bind(envelope.message_id.as_uuid())
    .bind(&envelope.event_type)
    .bind(&envelope.payload)
    .bind(envelope.created_at)
    .bind(envelope.status.as_str())
    .bind(envelope.attempts)
    .execute(conn)
    .await?;

    Ok(())
}

/// Claims up to `limit` pending envelopes in creation order, stamping a lease.
///
/// `FOR UPDATE SKIP LOCKED` lets concurrent dispatcher instances claim
/// disjoint batches without blocking each other.
pub async fn claim_batch(pool: &PgPool, limit: usize, lease: Duration) -> Result<Vec<Envelope>> {
    let lease_until = Utc::now() + chrono::Duration::from_std(lease).unwrap_or_default();

    let rows = sqlx::query(
        r#"
        UPDATE outbox_events
        SET claimed_until = $1, attempts = attempts + 1
        WHERE message_id IN (
            SELECT message_id FROM outbox_events
            WHERE status = 'pending'
              AND (claimed_until IS NULL OR claimed_until <= now())
            ORDER BY created_at ASC, message_id ASC
            LIMIT $2
            FOR UPDATE SKIP LOCKED
        )
        RETURNING message_id, event_type, payload, created_at, delivered_at,
                  status, claimed_until, attempts
        "#,
    )
    .bind(lease_until)
    .bind(limit as i64)
    .fetch_all(pool)
    .await?;

    let mut envelopes: Vec<Envelope> = rows
        .into_iter()
        .map(row_to_envelope)
        .collect::<Result<_>>()?;
    // RETURNING does not preserve the subquery order.
    envelopes.sort_by(|a, b| {
        a.created_at
            .cmp(&b.created_at)
            .then(a.message_id.cmp(&b.message_id))
    });

    Ok(envelopes)
}

/// Records a confirmed publish. Idempotent: an already-delivered envelope
/// keeps its original `delivered_at`.
pub async fn mark_delivered(pool: &PgPool, id: MessageId) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE outbox_events
        SET delivered_at = now(), status = 'delivered', claimed_until = NULL
        WHERE message_id = $1 AND delivered_at IS NULL
        "#,
    )
    .bind(id.as_uuid())
    .execute(pool)
    .await?;

    Ok(())
}

/// Clears the claim so the envelope is retried on the next poll.
pub async fn release(pool: &PgPool, id: MessageId) -> Result<()> {
    sqlx::query("UPDATE outbox_events SET claimed_until = NULL WHERE message_id = $1")
        .bind(id.as_uuid())
        .execute(pool)
        .await?;

    Ok(())
}

/// Moves a poison envelope out of the active queue permanently.
pub async fn quarantine(pool: &PgPool, id: MessageId, reason: &str) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE outbox_events
        SET status = 'quarantined', claimed_until = NULL, quarantine_reason = $2
        WHERE message_id = $1 AND status = 'pending'
        "#,
    )
    .bind(id.as_uuid())
    .bind(reason)
    .execute(pool)
    .await?;

    Ok(())
}

/// Deletes delivered envelopes older than the horizon.
pub async fn prune_delivered(pool: &PgPool, older_than: DateTime<Utc>) -> Result<u64> {
    let result =
        sqlx::query("DELETE FROM outbox_events WHERE status = 'delivered' AND delivered_at < $1")
            .bind(older_than)
            .execute(pool)
            .await?;

    Ok(result.rows_affected())
}

/// Attempts to admit a message for a consumer inside the caller's transaction.
///
/// The primary key on `(message_id, consumer_id)` arbitrates concurrent
/// deliveries: the losing insert reports [`Admission::AlreadyProcessed`] and
/// the caller skips the business effect.
pub async fn try_admit(
    conn: &mut PgConnection,
    message_id: MessageId,
    consumer_id: &str,
) -> Result<Admission> {
    // ON CONFLICT instead of catching the unique violation: a raised error
    // would abort the caller's transaction.
    let result = sqlx::query(
        r#"
        INSERT INTO consumed_messages (message_id, consumer_id, processed_at)
        VALUES ($1, $2, now())
        ON CONFLICT (message_id, consumer_id) DO NOTHING
        "#,
    )
    .bind(message_id.as_uuid())
    .bind(consumer_id)
    .execute(conn)
    .await?;

    if result.rows_affected() == 1 {
        Ok(Admission::Admitted)
    } else {
        Ok(Admission::AlreadyProcessed)
    }
}

/// Deletes consumed-message records older than the horizon. Safe once the
/// broker's redelivery window for those messages has passed.
pub async fn prune_consumed(pool: &PgPool, older_than: DateTime<Utc>) -> Result<u64> {
    let result = sqlx::query("DELETE FROM consumed_messages WHERE processed_at < $1")
        .bind(older_than)
        .execute(pool)
        .await?;

    Ok(result.rows_affected())
}

fn row_to_envelope(row: PgRow) -> Result<Envelope> {
    let status: String = row.try_get("status")?;

    Ok(Envelope {
        message_id: MessageId::from_uuid(row.try_get::<Uuid, _>("message_id")?),
        event_type: row.try_get("event_type")?,
        payload: row.try_get("payload")?,
        created_at: row.try_get("created_at")?,
        delivered_at: row.try_get("delivered_at")?,
        status: EnvelopeStatus::parse(&status).unwrap_or(EnvelopeStatus::Quarantined),
        claimed_until: row.try_get("claimed_until")?,
        attempts: row.try_get("attempts")?,
    })
}
