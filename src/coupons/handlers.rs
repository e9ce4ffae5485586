// HTTP handlers for coupon administration

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;

use crate::auth::middleware::AuthenticatedUser;
use crate::coupons::{
    AssignCouponRequest, CouponBatchResponse, CouponError, CouponFilters,
    CreateCouponBatchRequest, CurrentCouponVersion, ProductCouponAssignment,
    UpdateCouponRequest,
};

/// Handler for POST /api/coupons
/// Creates a batch of coupon codes under one payment
#[utoipa::path(
    post,
    path = "/api/coupons",
    responses(
        (status = 201, description = "Coupon batch created"),
        (status = 400, description = "Validation error"),
        (status = 409, description = "Duplicate coupon code")
    ),
    tag = "coupons"
)]
pub async fn create_coupon_batch_handler(
    State(state): State<crate::AppState>,
    _user: AuthenticatedUser, // TODO: Add role check for admin/staff
    Json(request): Json<CreateCouponBatchRequest>,
) -> Result<(StatusCode, Json<CouponBatchResponse>), CouponError> {
    let response = state.coupon_service.create_batch(request).await?;
    Ok((StatusCode::CREATED, Json(response)))
}

/// Handler for PATCH /api/coupons/:id
/// Enables or disables a coupon; the change is audited
#[utoipa::path(
    patch,
    path = "/api/coupons/{id}",
    params(("id" = i64, Path, description = "Coupon ID")),
    responses(
        (status = 200, description = "Coupon updated"),
        (status = 404, description = "Coupon not found")
    ),
    tag = "coupons"
)]
pub async fn update_coupon_handler(
    State(state): State<crate::AppState>,
    user: AuthenticatedUser, // TODO: Add role check for admin/staff
    Path(id): Path<i64>,
    Json(request): Json<UpdateCouponRequest>,
) -> Result<Json<serde_json::Value>, CouponError> {
    let coupon = state
        .coupon_service
        .set_enabled(id, request, Some(user.user_id))
        .await?;
    Ok(Json(serde_json::json!({
        "id": coupon.id,
        "coupon_code": coupon.coupon_code,
        "enabled": coupon.enabled,
    })))
}

/// Handler for POST /api/coupons/:id/assignments
/// Assigns a coupon to invitee emails for a sponsored purchase
#[utoipa::path(
    post,
    path = "/api/coupons/{id}/assignments",
    params(("id" = i64, Path, description = "Coupon ID")),
    responses(
        (status = 201, description = "Assignments created"),
        (status = 404, description = "Coupon not found")
    ),
    tag = "coupons"
)]
pub async fn assign_coupon_handler(
    State(state): State<crate::AppState>,
    _user: AuthenticatedUser, // TODO: Add role check for admin/staff
    Path(id): Path<i64>,
    Json(request): Json<AssignCouponRequest>,
) -> Result<(StatusCode, Json<Vec<ProductCouponAssignment>>), CouponError> {
    let assignments = state.coupon_service.assign_emails(id, request).await?;
    Ok((StatusCode::CREATED, Json(assignments)))
}

#[derive(Debug, Deserialize)]
pub struct CouponLookupQuery {
    pub product_id: i64,
    pub code: Option<String>,
}

/// Handler for GET /api/coupons/valid
/// Lists the coupon versions currently applicable to a product for the
/// authenticated user, best discount first
#[utoipa::path(
    get,
    path = "/api/coupons/valid",
    params(
        ("product_id" = i64, Query, description = "Product ID"),
        ("code" = Option<String>, Query, description = "Exact coupon code filter")
    ),
    responses(
        (status = 200, description = "Applicable coupon versions")
    ),
    tag = "coupons"
)]
pub async fn valid_coupons_handler(
    State(state): State<crate::AppState>,
    user: AuthenticatedUser,
    Query(query): Query<CouponLookupQuery>,
) -> Result<Json<Vec<CurrentCouponVersion>>, CouponError> {
    let filters = CouponFilters {
        code: query.code,
        ..Default::default()
    };
    let versions = state
        .coupon_engine
        .get_valid_coupon_versions(query.product_id, user.user_id, &filters)
        .await?;
    Ok(Json(versions))
}
