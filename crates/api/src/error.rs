//! API error types with HTTP response mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use orders::OrderError;
use payments::PaymentError;

/// API-level error type that maps to HTTP responses.
#[derive(Debug)]
pub enum ApiError {
    /// Resource not found.
    NotFound(String),
    /// Bad request from the client.
    BadRequest(String),
    /// The request conflicts with existing state.
    Conflict(String),
    /// Internal server error.
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            ApiError::Internal(msg) => {
                tracing::error!(error = %msg, "internal server error");
                (StatusCode::INTERNAL_SERVER_ERROR, msg)
            }
        };

        let body = serde_json::json!({ "error": message });
        (status, axum::Json(body)).into_response()
    }
}

impl From<OrderError> for ApiError {
    fn from(err: OrderError) -> Self {
        match &err {
            OrderError::InvalidAmount(_) => ApiError::BadRequest(err.to_string()),
            OrderError::NotFound(_) => ApiError::NotFound(err.to_string()),
            OrderError::AlreadySettled(_) => ApiError::Conflict(err.to_string()),
            OrderError::Store(_) | OrderError::Serialization(_) => {
                ApiError::Internal(err.to_string())
            }
        }
    }
}

impl From<PaymentError> for ApiError {
    fn from(err: PaymentError) -> Self {
        match &err {
            PaymentError::AccountExists(_) => ApiError::Conflict(err.to_string()),
            PaymentError::AccountNotFound(_) => ApiError::NotFound(err.to_string()),
            PaymentError::InvalidAmount(_) => ApiError::BadRequest(err.to_string()),
            PaymentError::ConcurrencyExhausted(_) => ApiError::Conflict(err.to_string()),
            PaymentError::Store(_) | PaymentError::Serialization(_) => {
                ApiError::Internal(err.to_string())
            }
        }
    }
}
