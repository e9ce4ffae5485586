use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

/// Error types for coupon operations
#[derive(Debug, thiserror::Error)]
pub enum CouponError {
    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Coupon not found")]
    NotFound,

    #[error("Coupon code already exists: {0}")]
    DuplicateCode(String),

    #[error("Coupon {code} is not eligible for product {product_id}")]
    NotEligible { code: String, product_id: i64 },

    #[error("Validation error: {0}")]
    ValidationError(String),
}

impl From<sqlx::Error> for CouponError {
    fn from(err: sqlx::Error) -> Self {
        CouponError::DatabaseError(err.to_string())
    }
}

impl IntoResponse for CouponError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            CouponError::DatabaseError(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
            CouponError::NotFound => (StatusCode::NOT_FOUND, "Coupon not found".to_string()),
            CouponError::DuplicateCode(code) => (
                StatusCode::CONFLICT,
                format!("Coupon code '{}' already exists", code),
            ),
            CouponError::NotEligible { code, product_id } => (
                StatusCode::BAD_REQUEST,
                format!(
                    "Coupon '{}' is not eligible for product {}",
                    code, product_id
                ),
            ),
            CouponError::ValidationError(msg) => (StatusCode::BAD_REQUEST, msg),
        };

        let body = Json(json!({
            "error": error_message,
        }));

        (status, body).into_response()
    }
}
