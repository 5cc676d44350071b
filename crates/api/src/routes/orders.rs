//! Orders service endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use chrono::{DateTime, Utc};
use common::{Money, OrderId, UserId};
use orders::{Order, OrderService, OrderStore};
use serde::{Deserialize, Serialize};

use crate::error::ApiError;

/// Shared state of the orders endpoints.
pub struct OrdersState<S: OrderStore> {
    pub service: OrderService<S>,
}

// -- Request types --

#[derive(Deserialize)]
pub struct CreateOrderRequest {
    pub user_id: uuid::Uuid,
    pub amount_cents: i64,
}

#[derive(Debug, Deserialize)]
pub struct ListOrdersParams {
    pub user_id: uuid::Uuid,
}

// -- Response types --

#[derive(Serialize)]
pub struct OrderAcceptedResponse {
    pub id: OrderId,
    pub status: String,
}

#[derive(Serialize)]
pub struct OrderResponse {
    pub id: OrderId,
    pub user_id: UserId,
    pub amount_cents: i64,
    pub status: String,
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<Order> for OrderResponse {
    fn from(order: Order) -> Self {
        Self {
            id: order.id,
            user_id: order.user_id,
            amount_cents: order.amount.cents(),
            status: order.status.to_string(),
            failure_reason: order.failure_reason,
            created_at: order.created_at,
        }
    }
}

// -- Handlers --

/// POST /orders — accept an order for asynchronous payment.
///
/// Returns 202: the order is pending until the payment saga settles it, so
/// clients poll the order status for the outcome.
#[tracing::instrument(skip(state, req))]
pub async fn create<S: OrderStore + 'static>(
    State(state): State<Arc<OrdersState<S>>>,
    Json(req): Json<CreateOrderRequest>,
) -> Result<(StatusCode, Json<OrderAcceptedResponse>), ApiError> {
    let order = state
        .service
        .create_order(
            UserId::from_uuid(req.user_id),
            Money::from_cents(req.amount_cents),
        )
        .await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(OrderAcceptedResponse {
            id: order.id,
            status: order.status.to_string(),
        }),
    ))
}

/// GET /orders/:id — load an order by id.
#[tracing::instrument(skip(state))]
pub async fn get<S: OrderStore + 'static>(
    State(state): State<Arc<OrdersState<S>>>,
    Path(id): Path<uuid::Uuid>,
) -> Result<Json<OrderResponse>, ApiError> {
    let order = state
        .service
        .get_order(OrderId::from_uuid(id))
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Order {id} not found")))?;

    Ok(Json(order.into()))
}

/// GET /orders?user_id= — list a user's orders, newest first.
#[tracing::instrument(skip(state))]
pub async fn list<S: OrderStore + 'static>(
    State(state): State<Arc<OrdersState<S>>>,
    Query(params): Query<ListOrdersParams>,
) -> Result<Json<Vec<OrderResponse>>, ApiError> {
    let orders = state
        .service
        .list_orders(UserId::from_uuid(params.user_id))
        .await?;

    Ok(Json(orders.into_iter().map(Into::into).collect()))
}
