use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

/// Error types for catalog operations
#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Product not found: {0}")]
    ProductNotFound(i64),

    #[error("Content object not found: {kind} {id}")]
    ContentNotFound { kind: String, id: i64 },

    #[error("Product already exists for {kind} {id}")]
    DuplicateProduct { kind: String, id: i64 },

    #[error("Validation error: {0}")]
    ValidationError(String),
}

impl From<sqlx::Error> for CatalogError {
    fn from(err: sqlx::Error) -> Self {
        CatalogError::DatabaseError(err.to_string())
    }
}

impl IntoResponse for CatalogError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            CatalogError::DatabaseError(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
            CatalogError::ProductNotFound(id) => (
                StatusCode::NOT_FOUND,
                format!("Product with id {} not found", id),
            ),
            CatalogError::ContentNotFound { kind, id } => (
                StatusCode::BAD_REQUEST,
                format!("{} with id {} not found", kind, id),
            ),
            CatalogError::DuplicateProduct { kind, id } => (
                StatusCode::CONFLICT,
                format!("A product already exists for {} {}", kind, id),
            ),
            CatalogError::ValidationError(msg) => (StatusCode::BAD_REQUEST, msg),
        };

        let body = Json(json!({
            "error": error_message,
        }));

        (status, body).into_response()
    }
}
