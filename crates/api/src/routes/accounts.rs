//! Payments service endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use common::{Money, UserId};
use payments::{Account, AccountService, AccountStore};
use serde::{Deserialize, Serialize};

use crate::error::ApiError;

/// Shared state of the accounts endpoints.
pub struct PaymentsState<S: AccountStore> {
    pub service: AccountService<S>,
}

// -- Request types --

#[derive(Deserialize)]
pub struct CreateAccountRequest {
    pub user_id: uuid::Uuid,
}

#[derive(Deserialize)]
pub struct DepositRequest {
    pub user_id: uuid::Uuid,
    pub amount_cents: i64,
}

// -- Response types --

#[derive(Serialize)]
pub struct AccountResponse {
    pub user_id: UserId,
    pub balance_cents: i64,
    pub version: i64,
}

impl From<Account> for AccountResponse {
    fn from(account: Account) -> Self {
        Self {
            user_id: account.user_id,
            balance_cents: account.balance.cents(),
            version: account.version,
        }
    }
}

#[derive(Serialize)]
pub struct DepositResponse {
    pub balance_cents: i64,
}

// -- Handlers --

/// POST /accounts — open an account for a user. 409 if one exists.
#[tracing::instrument(skip(state, req))]
pub async fn create<S: AccountStore + 'static>(
    State(state): State<Arc<PaymentsState<S>>>,
    Json(req): Json<CreateAccountRequest>,
) -> Result<(StatusCode, Json<AccountResponse>), ApiError> {
    let account = state
        .service
        .create_account(UserId::from_uuid(req.user_id))
        .await?;

    Ok((StatusCode::CREATED, Json(account.into())))
}

/// POST /accounts/deposit — credit an account, returning the new balance.
#[tracing::instrument(skip(state, req))]
pub async fn deposit<S: AccountStore + 'static>(
    State(state): State<Arc<PaymentsState<S>>>,
    Json(req): Json<DepositRequest>,
) -> Result<Json<DepositResponse>, ApiError> {
    let balance = state
        .service
        .deposit(
            UserId::from_uuid(req.user_id),
            Money::from_cents(req.amount_cents),
        )
        .await?;

    Ok(Json(DepositResponse {
        balance_cents: balance.cents(),
    }))
}

/// GET /accounts/:user_id — load a user's account.
#[tracing::instrument(skip(state))]
pub async fn get<S: AccountStore + 'static>(
    State(state): State<Arc<PaymentsState<S>>>,
    Path(user_id): Path<uuid::Uuid>,
) -> Result<Json<AccountResponse>, ApiError> {
    let account = state
        .service
        .get_account(UserId::from_uuid(user_id))
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("No account for user {user_id}")))?;

    Ok(Json(account.into()))
}
