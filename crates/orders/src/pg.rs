use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{MessageId, Money, OrderId, UserId};
use outbox::{Admission, Envelope, OutboxStore, pg as outbox_pg};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::{Order, OrderError, OrderStatus, OrderStore, SettleOutcome};

/// PostgreSQL-backed orders store.
///
/// Orders, outbox, and inbox live in the same database so composite
/// operations run in one transaction.
#[derive(Clone)]
pub struct PgOrderStore {
    pool: PgPool,
}

impl PgOrderStore {
    /// Creates a store over an existing pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the orders-service migrations.
    pub async fn run_migrations(&self) -> Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("./migrations").run(&self.pool).await
    }

    fn row_to_order(row: PgRow) -> Result<Order, OrderError> {
        let status: String = row.try_get("status").map_err(sqlx_err)?;

        Ok(Order {
            id: OrderId::from_uuid(row.try_get::<Uuid, _>("id").map_err(sqlx_err)?),
            user_id: UserId::from_uuid(row.try_get::<Uuid, _>("user_id").map_err(sqlx_err)?),
            amount: Money::from_cents(row.try_get("amount_cents").map_err(sqlx_err)?),
            status: OrderStatus::parse(&status).unwrap_or(OrderStatus::Pending),
            failure_reason: row.try_get("failure_reason").map_err(sqlx_err)?,
            created_at: row.try_get("created_at").map_err(sqlx_err)?,
        })
    }
}

fn sqlx_err(e: sqlx::Error) -> OrderError {
    OrderError::from(e)
}

#[async_trait]
impl OrderStore for PgOrderStore {
    async fn create(&self, order: &Order, envelope: &Envelope) -> Result<(), OrderError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO orders (id, user_id, amount_cents, status, failure_reason, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(order.id.as_uuid())
        .bind(order.user_id.as_uuid())
        .bind(order.amount.cents())
        .bind(order.status.as_str())
        .bind(&order.failure_reason)
        .bind(order.created_at)
        .execute(&mut *tx)
        .await?;

        outbox_pg::append(&mut *tx, envelope).await?;

        tx.commit().await?;
        Ok(())
    }

    async fn get(&self, id: OrderId) -> Result<Option<Order>, OrderError> {
        let row = sqlx::query(
            r#"
            SELECT id, user_id, amount_cents, status, failure_reason, created_at
            FROM orders WHERE id = $1
            "#,
        )
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_order).transpose()
    }

    async fn list_for_user(&self, user_id: UserId) -> Result<Vec<Order>, OrderError> {
        let rows = sqlx::query(
            r#"
            SELECT id, user_id, amount_cents, status, failure_reason, created_at
            FROM orders WHERE user_id = $1
            ORDER BY created_at DESC
            "#,
        )
        .bind(user_id.as_uuid())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_order).collect()
    }

    async fn settle(
        &self,
        message_id: MessageId,
        consumer_id: &str,
        order_id: OrderId,
        success: bool,
        reason: Option<String>,
    ) -> Result<SettleOutcome, OrderError> {
        let mut tx = self.pool.begin().await?;

        if outbox_pg::try_admit(&mut *tx, message_id, consumer_id).await?
            == Admission::AlreadyProcessed
        {
            tx.commit().await?;
            return Ok(SettleOutcome::Duplicate);
        }

        let row = sqlx::query("SELECT status FROM orders WHERE id = $1 FOR UPDATE")
            .bind(order_id.as_uuid())
            .fetch_optional(&mut *tx)
            .await?;

        let Some(row) = row else {
            // Keep the admission so redeliveries don't re-log the anomaly.
            tx.commit().await?;
            return Ok(SettleOutcome::UnknownOrder);
        };

        let status: String = row.try_get("status")?;
        if OrderStatus::parse(&status).is_some_and(|s| s.is_terminal()) {
            tx.commit().await?;
            return Ok(SettleOutcome::Duplicate);
        }

        let new_status = if success {
            OrderStatus::Paid
        } else {
            OrderStatus::Failed
        };

        sqlx::query("UPDATE orders SET status = $2, failure_reason = $3 WHERE id = $1")
            .bind(order_id.as_uuid())
            .bind(new_status.as_str())
            .bind(if success { None } else { reason })
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(SettleOutcome::Settled(new_status))
    }

    async fn prune_consumed(&self, older_than: DateTime<Utc>) -> Result<u64, OrderError> {
        Ok(outbox_pg::prune_consumed(&self.pool, older_than).await?)
    }
}

#[async_trait]
impl OutboxStore for PgOrderStore {
    async fn claim_batch(&self, limit: usize, lease: Duration) -> outbox::Result<Vec<Envelope>> {
        outbox_pg::claim_batch(&self.pool, limit, lease).await
    }

    async fn mark_delivered(&self, id: MessageId) -> outbox::Result<()> {
        outbox_pg::mark_delivered(&self.pool, id).await
    }

    async fn release(&self, id: MessageId) -> outbox::Result<()> {
        outbox_pg::release(&self.pool, id).await
    }

    async fn quarantine(&self, id: MessageId, reason: &str) -> outbox::Result<()> {
        outbox_pg::quarantine(&self.pool, id, reason).await
    }

    async fn prune_delivered(&self, older_than: DateTime<Utc>) -> outbox::Result<u64> {
        outbox_pg::prune_delivered(&self.pool, older_than).await
    }
}
