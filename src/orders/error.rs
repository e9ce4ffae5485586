use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use crate::orders::models::OrderStatus;

/// Error types for order operations
#[derive(Debug, thiserror::Error)]
pub enum OrderError {
    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Order {0} not found")]
    OrderNotFound(i64),

    #[error("Order {order_id} with status '{actual}' was expected to have status 'created'")]
    UnexpectedStatus {
        order_id: i64,
        actual: OrderStatus,
    },

    #[error("Malformed gateway callback: {0}")]
    MalformedCallback(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error(transparent)]
    BasketError(#[from] crate::basket::BasketError),

    #[error(transparent)]
    CouponError(#[from] crate::coupons::CouponError),
}

impl From<sqlx::Error> for OrderError {
    fn from(err: sqlx::Error) -> Self {
        OrderError::DatabaseError(err.to_string())
    }
}

impl From<crate::catalog::CatalogError> for OrderError {
    fn from(err: crate::catalog::CatalogError) -> Self {
        OrderError::DatabaseError(err.to_string())
    }
}

impl IntoResponse for OrderError {
    fn into_response(self) -> Response {
        match self {
            OrderError::BasketError(err) => err.into_response(),
            OrderError::CouponError(err) => err.into_response(),
            other => {
                let (status, error_message) = match other {
                    OrderError::DatabaseError(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
                    OrderError::OrderNotFound(id) => {
                        (StatusCode::NOT_FOUND, format!("Order {} not found", id))
                    }
                    OrderError::UnexpectedStatus { .. } => {
                        (StatusCode::CONFLICT, other.to_string())
                    }
                    OrderError::MalformedCallback(msg) => (StatusCode::BAD_REQUEST, msg),
                    OrderError::ValidationError(msg) => (StatusCode::BAD_REQUEST, msg),
                    OrderError::BasketError(_) | OrderError::CouponError(_) => unreachable!(),
                };

                let body = Json(json!({
                    "error": error_message,
                }));

                (status, body).into_response()
            }
        }
    }
}
