use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{MessageId, Money, UserId};
use contracts::{PaymentProcessed, PaymentRequested};
use outbox::{Admission, Envelope, OutboxStore, pg as outbox_pg};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::store::{
    AccountStore, INSUFFICIENT_FUNDS_REASON, MAX_DEBIT_ATTEMPTS, NO_ACCOUNT_REASON, PaymentOutcome,
    result_envelope,
};
use crate::{Account, PaymentError};

/// PostgreSQL-backed accounts store.
///
/// Accounts, outbox, and inbox live in the same database so composite
/// operations run in one transaction. Debits use an optimistic version
/// check instead of row locks; the `apply_payment_request` loop retries
/// lost races with a fresh transaction.
#[derive(Clone)]
pub struct PgAccountStore {
    pool: PgPool,
}

impl PgAccountStore {
    /// Creates a store over an existing pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the payments-service migrations.
    pub async fn run_migrations(&self) -> Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("./migrations").run(&self.pool).await
    }

    fn row_to_account(row: PgRow) -> Result<Account, PaymentError> {
        Ok(Account {
            id: row.try_get::<Uuid, _>("id").map_err(sqlx_err)?,
            user_id: UserId::from_uuid(row.try_get::<Uuid, _>("user_id").map_err(sqlx_err)?),
            balance: Money::from_cents(row.try_get("balance_cents").map_err(sqlx_err)?),
            version: row.try_get("version").map_err(sqlx_err)?,
            created_at: row.try_get("created_at").map_err(sqlx_err)?,
        })
    }
}

fn sqlx_err(e: sqlx::Error) -> PaymentError {
    PaymentError::from(e)
}

#[async_trait]
impl AccountStore for PgAccountStore {
    async fn create(&self, account: &Account) -> Result<(), PaymentError> {
        let result = sqlx::query(
            r#"
            INSERT INTO accounts (id, user_id, balance_cents, version, created_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(account.id)
        .bind(account.user_id.as_uuid())
        .bind(account.balance.cents())
        .bind(account.version)
        .bind(account.created_at)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                Err(PaymentError::AccountExists(account.user_id))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn get(&self, user_id: UserId) -> Result<Option<Account>, PaymentError> {
        let row = sqlx::query(
            r#"
            SELECT id, user_id, balance_cents, version, created_at
            FROM accounts WHERE user_id = $1
            "#,
        )
        .bind(user_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_account).transpose()
    }

    async fn deposit(&self, user_id: UserId, amount: Money) -> Result<Money, PaymentError> {
        let row = sqlx::query(
            r#"
            UPDATE accounts
            SET balance_cents = balance_cents + $2, version = version + 1
            WHERE user_id = $1
            RETURNING balance_cents
            "#,
        )
        .bind(user_id.as_uuid())
        .bind(amount.cents())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(Money::from_cents(row.try_get("balance_cents")?)),
            None => Err(PaymentError::AccountNotFound(user_id)),
        }
    }

    async fn apply_payment_request(
        &self,
        message_id: MessageId,
        consumer_id: &str,
        request: &PaymentRequested,
    ) -> Result<PaymentOutcome, PaymentError> {
        for attempt in 0..MAX_DEBIT_ATTEMPTS {
            let mut tx = self.pool.begin().await?;

            if outbox_pg::try_admit(&mut *tx, message_id, consumer_id).await?
                == Admission::AlreadyProcessed
            {
                tx.commit().await?;
                return Ok(PaymentOutcome::Duplicate);
            }

            // Plain read; the version check on UPDATE is the concurrency
            // guard.
            let row = sqlx::query(
                "SELECT balance_cents, version FROM accounts WHERE user_id = $1",
            )
            .bind(request.user_id.as_uuid())
            .fetch_optional(&mut *tx)
            .await?;

            let result = match row {
                None => {
                    PaymentProcessed::failed(request.order_id, request.user_id, NO_ACCOUNT_REASON)
                }
                Some(row) => {
                    let balance = Money::from_cents(row.try_get("balance_cents")?);
                    let version: i64 = row.try_get("version")?;

                    if balance < request.amount {
                        PaymentProcessed::failed(
                            request.order_id,
                            request.user_id,
                            INSUFFICIENT_FUNDS_REASON,
                        )
                    } else {
                        let debited = sqlx::query(
                            r#"
                            UPDATE accounts
                            SET balance_cents = balance_cents - $2, version = version + 1
                            WHERE user_id = $1 AND version = $3 AND balance_cents >= $2
                            "#,
                        )
                        .bind(request.user_id.as_uuid())
                        .bind(request.amount.cents())
                        .bind(version)
                        .execute(&mut *tx)
                        .await?;

                        if debited.rows_affected() == 0 {
                            // Lost the version race; admission rolls back with
                            // the transaction.
                            tx.rollback().await?;
                            tracing::debug!(
                                user_id = %request.user_id,
                                attempt,
                                "debit lost version race, retrying"
                            );
                            continue;
                        }
                        PaymentProcessed::succeeded(request.order_id, request.user_id)
                    }
                }
            };

            outbox_pg::append(&mut *tx, &result_envelope(&result)?).await?;
            tx.commit().await?;
            return Ok(PaymentOutcome::Processed(result));
        }

        Err(PaymentError::ConcurrencyExhausted(request.user_id))
    }

    async fn prune_consumed(&self, older_than: DateTime<Utc>) -> Result<u64, PaymentError> {
        Ok(outbox_pg::prune_consumed(&self.pool, older_than).await?)
    }
}

#[async_trait]
impl OutboxStore for PgAccountStore {
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
