use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

/// Basket validation failures. Each variant carries the basket section the
/// error should render against, so callers get field-keyed messages rather
/// than one opaque string.
#[derive(Debug, thiserror::Error)]
pub enum BasketError {
    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Your basket is empty")]
    EmptyBasket,

    #[error("Only one product may be checked out at a time")]
    MultipleItems,

    #[error("Product {0} is no longer available")]
    UnavailableProduct(i64),

    #[error("No run selected for course '{0}'")]
    MissingRunSelection(String),

    #[error("Multiple runs selected for course '{0}'")]
    DuplicateRunSelection(String),

    #[error("Selected run {0} does not belong to the purchased program")]
    ExtraRunSelection(i64),

    #[error("Enrollment for run {0} has closed")]
    ExpiredRun(i64),

    #[error("You are already enrolled in run {0}")]
    AlreadyEnrolled(i64),

    #[error("Coupon code '{0}' is not valid for this product")]
    IneligibleCoupon(String),

    #[error("A data sharing consent agreement must be signed before checkout")]
    UnsignedDataConsent,
}

impl BasketError {
    /// The basket section the failure belongs to
    pub fn field(&self) -> &'static str {
        match self {
            BasketError::DatabaseError(_) => "basket",
            BasketError::EmptyBasket | BasketError::MultipleItems => "items",
            BasketError::UnavailableProduct(_) => "items",
            BasketError::MissingRunSelection(_)
            | BasketError::DuplicateRunSelection(_)
            | BasketError::ExtraRunSelection(_)
            | BasketError::ExpiredRun(_)
            | BasketError::AlreadyEnrolled(_) => "runs",
            BasketError::IneligibleCoupon(_) => "coupons",
            BasketError::UnsignedDataConsent => "data_consents",
        }
    }
}

impl From<sqlx::Error> for BasketError {
    fn from(err: sqlx::Error) -> Self {
        BasketError::DatabaseError(err.to_string())
    }
}

impl From<crate::catalog::CatalogError> for BasketError {
    fn from(err: crate::catalog::CatalogError) -> Self {
        BasketError::DatabaseError(err.to_string())
    }
}

impl From<crate::coupons::CouponError> for BasketError {
    fn from(err: crate::coupons::CouponError) -> Self {
        match err {
            crate::coupons::CouponError::NotFound => {
                BasketError::IneligibleCoupon("unknown".to_string())
            }
            crate::coupons::CouponError::NotEligible { code, .. } => {
                BasketError::IneligibleCoupon(code)
            }
            other => BasketError::DatabaseError(other.to_string()),
        }
    }
}

impl IntoResponse for BasketError {
    fn into_response(self) -> Response {
        let status = match self {
            BasketError::DatabaseError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::BAD_REQUEST,
        };

        let body = Json(json!({
            "errors": { self.field(): self.to_string() },
        }));

        (status, body).into_response()
    }
}
