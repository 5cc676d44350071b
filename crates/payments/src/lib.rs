//! Payments service: account ledger and the debit side of the payment saga.
//!
//! Accounts hold integer-cent balances guarded by an optimistic version
//! column. The [`PaymentRequestedConsumer`] admits each request through the
//! inbox, debits (or declines) the account, and enqueues the
//! `PaymentProcessed` result in the same atomic unit, so redelivered
//! requests can never debit twice.

mod account;
mod consumer;
mod error;
mod pg;
mod service;
mod store;

pub use account::Account;
pub use consumer::{PAYMENTS_CONSUMER_ID, PaymentRequestedConsumer};
pub use error::PaymentError;
pub use pg::PgAccountStore;
pub use service::AccountService;
pub use store::{
    AccountStore, INSUFFICIENT_FUNDS_REASON, MAX_DEBIT_ATTEMPTS, MemoryAccountStore,
    NO_ACCOUNT_REASON, PaymentOutcome,
};
