use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{MessageId, Money, UserId};
use contracts::{PAYMENT_PROCESSED, PaymentProcessed, PaymentRequested};
use outbox::{Admission, Envelope, MemoryInbox, MemoryOutbox, OutboxStore};

use crate::{Account, PaymentError};

/// Debit attempts before a version race is reported as exhausted.
pub const MAX_DEBIT_ATTEMPTS: u32 = 5;

/// Reason recorded when a payment request names a user with no account.
pub const NO_ACCOUNT_REASON: &str = "No account";
/// Reason recorded when the balance does not cover the order amount.
pub const INSUFFICIENT_FUNDS_REASON: &str = "Insufficient funds";

/// Outcome of applying a `PaymentRequested` event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentOutcome {
    /// The request was processed and the given result event was enqueued.
    /// Failed payments are processed too; only the inbox distinguishes a
    /// fresh request from a redelivery.
    Processed(PaymentProcessed),
    /// The message was already processed; nothing changed.
    Duplicate,
}

/// Persistence boundary of the payments service.
///
/// `apply_payment_request` is the composite saga step: inbox admission,
/// balance debit, and the `PaymentProcessed` envelope commit in one atomic
/// unit.
#[async_trait]
pub trait AccountStore: Send + Sync {
    /// Inserts a new account. Fails with `AccountExists` if the user already
    /// has one.
    async fn create(&self, account: &Account) -> Result<(), PaymentError>;

    /// Loads a user's account.
    async fn get(&self, user_id: UserId) -> Result<Option<Account>, PaymentError>;

    /// Credits a user's account and returns the new balance.
    async fn deposit(&self, user_id: UserId, amount: Money) -> Result<Money, PaymentError>;

    /// Admits the message through the inbox, attempts the debit under
    /// optimistic concurrency, and enqueues the result event, atomically.
    async fn apply_payment_request(
        &self,
        message_id: MessageId,
        consumer_id: &str,
        request: &PaymentRequested,
    ) -> Result<PaymentOutcome, PaymentError>;

    /// Deletes consumed-message records older than the horizon.
    async fn prune_consumed(&self, older_than: DateTime<Utc>) -> Result<u64, PaymentError>;
}

/// Builds the envelope for a payment result.
pub(crate) fn result_envelope(event: &PaymentProcessed) -> Result<Envelope, PaymentError> {
    Ok(Envelope::for_event(PAYMENT_PROCESSED, event)?)
}

#[derive(Default)]
struct PaymentsState {
    accounts: HashMap<UserId, Account>,
    outbox: MemoryOutbox,
    inbox: MemoryInbox,
    // Test knob: force this many debit attempts to lose the version race.
    forced_cas_failures: u32,
}

/// In-memory accounts store for tests and the demo topology.
///
/// One mutex guards accounts, outbox, and inbox together, so every composite
/// operation is atomic the way a database transaction would be.
#[derive(Clone, Default)]
pub struct MemoryAccountStore {
    state: Arc<Mutex<PaymentsState>>,
}

impl MemoryAccountStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of pending outbox envelopes. Test helper.
    pub fn pending_envelopes(&self) -> usize {
        self.state.lock().unwrap().outbox.pending_count()
    }

    /// Returns the number of consumed-message records. Test helper.
    pub fn consumed_count(&self) -> usize {
        self.state.lock().unwrap().inbox.len()
    }

    /// Makes the next `n` debit attempts lose the version race, as if a
    /// concurrent writer bumped the row between read and write. Test helper.
    pub fn force_cas_failures(&self, n: u32) {
        self.state.lock().unwrap().forced_cas_failures = n;
    }
}

#[async_trait]
impl AccountStore for MemoryAccountStore {
    async fn create(&self, account: &Account) -> Result<(), PaymentError> {
        let mut state = self.state.lock().unwrap();
        if state.accounts.contains_key(&account.user_id) {
            return Err(PaymentError::AccountExists(account.user_id));
        }
        state.accounts.insert(account.user_id, account.clone());
        Ok(())
    }

    async fn get(&self, user_id: UserId) -> Result<Option<Account>, PaymentError> {
        Ok(self.state.lock().unwrap().accounts.get(&user_id).cloned())
    }

    async fn deposit(&self, user_id: UserId, amount: Money) -> Result<Money, PaymentError> {
        let mut state = self.state.lock().unwrap();
        let Some(account) = state.accounts.get_mut(&user_id) else {
            return Err(PaymentError::AccountNotFound(user_id));
        };
        account.balance += amount;
        account.version += 1;
        Ok(account.balance)
    }

    async fn apply_payment_request(
        &self,
        message_id: MessageId,
        consumer_id: &str,
        request: &PaymentRequested,
    ) -> Result<PaymentOutcome, PaymentError> {
        for _ in 0..MAX_DEBIT_ATTEMPTS {
            let mut state = self.state.lock().unwrap();

            if state.inbox.try_admit(message_id, consumer_id, Utc::now())
                == Admission::AlreadyProcessed
            {
                return Ok(PaymentOutcome::Duplicate);
            }

            let result = match state.accounts.get(&request.user_id) {
                None => PaymentProcessed::failed(request.order_id, request.user_id, NO_ACCOUNT_REASON),
                Some(account) if !account.can_cover(request.amount) => PaymentProcessed::failed(
                    request.order_id,
                    request.user_id,
                    INSUFFICIENT_FUNDS_REASON,
                ),
                Some(account) => {
                    let expected_version = account.version;
                    if state.forced_cas_failures > 0 {
                        // A concurrent writer won the race; roll the admission
                        // back with the rest of the attempt and retry.
                        state.forced_cas_failures -= 1;
                        state.inbox.rollback(message_id, consumer_id);
                        continue;
                    }
                    let account = state
                        .accounts
                        .get_mut(&request.user_id)
                        .filter(|a| a.version == expected_version)
                        .ok_or(PaymentError::ConcurrencyExhausted(request.user_id))?;
                    account.balance -= request.amount;
                    account.version += 1;
                    PaymentProcessed::succeeded(request.order_id, request.user_id)
                }
            };

            state.outbox.append(result_envelope(&result)?);
            return Ok(PaymentOutcome::Processed(result));
        }

        Err(PaymentError::ConcurrencyExhausted(request.user_id))
    }

    async fn prune_consumed(&self, older_than: DateTime<Utc>) -> Result<u64, PaymentError> {
        Ok(self.state.lock().unwrap().inbox.prune(older_than))
    }
}

// The dispatcher drains the payments outbox through the same store.
#[async_trait]
impl OutboxStore for MemoryAccountStore {
    async fn claim_batch(&self, limit: usize, lease: Duration) -> outbox::Result<Vec<Envelope>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .outbox
            .claim_batch(limit, lease, Utc::now()))
    }

    async fn mark_delivered(&self, id: MessageId) -> outbox::Result<()> {
        self.state
            .lock()
            .unwrap()
            .outbox
            .mark_delivered(id, Utc::now());
        Ok(())
    }

    async fn release(&self, id: MessageId) -> outbox::Result<()> {
        self.state.lock().unwrap().outbox.release(id);
        Ok(())
    }

    async fn quarantine(&self, id: MessageId, reason: &str) -> outbox::Result<()> {
        self.state.lock().unwrap().outbox.quarantine(id, reason);
        Ok(())
    }

    async fn prune_delivered(&self, older_than: DateTime<Utc>) -> outbox::Result<u64> {
        Ok(self.state.lock().unwrap().outbox.prune_delivered(older_than))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::OrderId;

    fn request(user_id: UserId, cents: i64) -> PaymentRequested {
        PaymentRequested {
            order_id: OrderId::new(),
            user_id,
            amount: Money::from_cents(cents),
        }
    }

    async fn funded_account(store: &MemoryAccountStore, cents: i64) -> UserId {
        let user = UserId::new();
        store.create(&Account::new(user)).await.unwrap();
        store.deposit(user, Money::from_cents(cents)).await.unwrap();
        user
    }

    #[tokio::test]
    async fn create_rejects_second_account_for_same_user() {
        let store = MemoryAccountStore::new();
        let user = UserId::new();

        store.create(&Account::new(user)).await.unwrap();
        let result = store.create(&Account::new(user)).await;

        assert!(matches!(result, Err(PaymentError::AccountExists(u)) if u == user));
    }

    #[tokio::test]
    async fn deposit_accumulates_and_bumps_version() {
        let store = MemoryAccountStore::new();
        let user = funded_account(&store, 1000).await;

        let balance = store.deposit(user, Money::from_cents(500)).await.unwrap();

        assert_eq!(balance, Money::from_cents(1500));
        assert_eq!(store.get(user).await.unwrap().unwrap().version, 2);
    }

    #[tokio::test]
    async fn deposit_to_missing_account_is_not_found() {
        let store = MemoryAccountStore::new();
        let result = store.deposit(UserId::new(), Money::from_cents(100)).await;
        assert!(matches!(result, Err(PaymentError::AccountNotFound(_))));
    }

    #[tokio::test]
    async fn sufficient_funds_debit_succeeds_and_enqueues_result() {
        let store = MemoryAccountStore::new();
        let user = funded_account(&store, 10_000).await;

        let outcome = store
            .apply_payment_request(MessageId::new(), "payments-service", &request(user, 4000))
            .await
            .unwrap();

        let PaymentOutcome::Processed(result) = outcome else {
            panic!("expected processed outcome");
        };
        assert!(result.success);
        assert_eq!(
            store.get(user).await.unwrap().unwrap().balance,
            Money::from_cents(6000)
        );
        assert_eq!(store.pending_envelopes(), 1);
    }

    #[tokio::test]
    async fn insufficient_funds_fails_without_debiting() {
        let store = MemoryAccountStore::new();
        let user = funded_account(&store, 3000).await;

        let outcome = store
            .apply_payment_request(MessageId::new(), "payments-service", &request(user, 4000))
            .await
            .unwrap();

        let PaymentOutcome::Processed(result) = outcome else {
            panic!("expected processed outcome");
        };
        assert!(!result.success);
        assert_eq!(result.reason.as_deref(), Some(INSUFFICIENT_FUNDS_REASON));
        assert_eq!(
            store.get(user).await.unwrap().unwrap().balance,
            Money::from_cents(3000)
        );
        // A failed payment is still a processed message with a result event.
        assert_eq!(store.pending_envelopes(), 1);
    }

    #[tokio::test]
    async fn missing_account_fails_with_reason() {
        let store = MemoryAccountStore::new();

        let outcome = store
            .apply_payment_request(
                MessageId::new(),
                "payments-service",
                &request(UserId::new(), 4000),
            )
            .await
            .unwrap();

        let PaymentOutcome::Processed(result) = outcome else {
            panic!("expected processed outcome");
        };
        assert_eq!(result.reason.as_deref(), Some(NO_ACCOUNT_REASON));
    }

    #[tokio::test]
    async fn duplicate_request_debits_exactly_once() {
        let store = MemoryAccountStore::new();
        let user = funded_account(&store, 10_000).await;
        let message_id = MessageId::new();
        let request = request(user, 4000);

        let first = store
            .apply_payment_request(message_id, "payments-service", &request)
            .await
            .unwrap();
        let second = store
            .apply_payment_request(message_id, "payments-service", &request)
            .await
            .unwrap();

        assert!(matches!(first, PaymentOutcome::Processed(_)));
        assert_eq!(second, PaymentOutcome::Duplicate);
        assert_eq!(
            store.get(user).await.unwrap().unwrap().balance,
            Money::from_cents(6000)
        );
        assert_eq!(store.pending_envelopes(), 1);
    }

    #[tokio::test]
    async fn version_race_retries_until_it_wins() {
        let store = MemoryAccountStore::new();
        let user = funded_account(&store, 10_000).await;
        store.force_cas_failures(MAX_DEBIT_ATTEMPTS - 1);

        let outcome = store
            .apply_payment_request(MessageId::new(), "payments-service", &request(user, 4000))
            .await
            .unwrap();

        assert!(matches!(outcome, PaymentOutcome::Processed(r) if r.success));
        assert_eq!(
            store.get(user).await.unwrap().unwrap().balance,
            Money::from_cents(6000)
        );
        // Lost attempts rolled their admissions back; only the winner stuck.
        assert_eq!(store.consumed_count(), 1);
    }

    #[tokio::test]
    async fn version_race_exhaustion_surfaces_as_error() {
        let store = MemoryAccountStore::new();
        let user = funded_account(&store, 10_000).await;
        store.force_cas_failures(MAX_DEBIT_ATTEMPTS);

        let result = store
            .apply_payment_request(MessageId::new(), "payments-service", &request(user, 4000))
            .await;

        assert!(matches!(result, Err(PaymentError::ConcurrencyExhausted(_))));
        // Nothing committed: balance intact, no admission, no result event.
        assert_eq!(
            store.get(user).await.unwrap().unwrap().balance,
            Money::from_cents(10_000)
        );
        assert_eq!(store.consumed_count(), 0);
        assert_eq!(store.pending_envelopes(), 0);
    }

    #[tokio::test]
    async fn concurrent_debits_cannot_jointly_overdraw() {
        let store = MemoryAccountStore::new();
        let user = funded_account(&store, 5000).await;

        let mut handles = Vec::new();
        for _ in 0..4 {
            let store = store.clone();
            let request = request(user, 2000);
            handles.push(tokio::spawn(async move {
                store
                    .apply_payment_request(MessageId::new(), "payments-service", &request)
                    .await
                    .unwrap()
            }));
        }

        let mut succeeded = 0;
        for handle in handles {
            if let PaymentOutcome::Processed(result) = handle.await.unwrap()
                && result.success
            {
                succeeded += 1;
            }
        }

        assert_eq!(succeeded, 2);
        assert_eq!(
            store.get(user).await.unwrap().unwrap().balance,
            Money::from_cents(1000)
        );
    }
}
