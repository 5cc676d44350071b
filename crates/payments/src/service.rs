use common::{Money, UserId};

use crate::{Account, AccountStore, PaymentError};

/// Application operations of the payments service.
pub struct AccountService<S: AccountStore> {
    store: S,
}

impl<S: AccountStore> AccountService<S> {
    /// Creates a service over a store.
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Opens an account for a user. One account per user.
    #[tracing::instrument(skip(self))]
    pub async fn create_account(&self, user_id: UserId) -> Result<Account, PaymentError> {
        let account = Account::new(user_id);
        self.store.create(&account).await?;

        metrics::counter!("accounts_created_total").increment(1);
        tracing::info!(%user_id, "account created");
        Ok(account)
    }

    /// Credits an account and returns the new balance.
    #[tracing::instrument(skip(self))]
    pub async fn deposit(&self, user_id: UserId, amount: Money) -> Result<Money, PaymentError> {
        if !amount.is_positive() {
            return Err(PaymentError::InvalidAmount(amount));
        }

        let balance = self.store.deposit(user_id, amount).await?;

        metrics::counter!("deposits_total").increment(1);
        tracing::info!(%user_id, %amount, %balance, "deposit applied");
        Ok(balance)
    }

    /// Loads a user's account.
    pub async fn get_account(&self, user_id: UserId) -> Result<Option<Account>, PaymentError> {
        self.store.get(user_id).await
    }
}
