// HTTP handlers for checkout, the gateway callback, and order history

use std::collections::HashMap;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Form, Json,
};
use serde_json::json;

use crate::auth::middleware::AuthenticatedUser;
use crate::orders::{
    CheckoutResponse, CreateBulkOrderRequest, OrderError, OrderResponse,
};

/// Handler for POST /api/checkout
/// Creates an order from the user's validated basket
#[utoipa::path(
    post,
    path = "/api/checkout",
    responses(
        (status = 200, description = "Gateway payload or receipt redirect"),
        (status = 400, description = "Basket validation error")
    ),
    tag = "orders"
)]
pub async fn checkout_handler(
    State(state): State<crate::AppState>,
    user: AuthenticatedUser,
) -> Result<Json<CheckoutResponse>, OrderError> {
    let response = state.order_service.create_order(user.user_id).await?;
    Ok(Json(response))
}

/// Handler for POST /api/checkout/bulk
/// B2B purchase of N seats, fulfilled as enrollment codes
#[utoipa::path(
    post,
    path = "/api/checkout/bulk",
    responses(
        (status = 200, description = "Gateway payload or receipt redirect"),
        (status = 400, description = "Validation error")
    ),
    tag = "orders"
)]
pub async fn bulk_checkout_handler(
    State(state): State<crate::AppState>,
    user: AuthenticatedUser,
    Json(request): Json<CreateBulkOrderRequest>,
) -> Result<Json<CheckoutResponse>, OrderError> {
    let response = state
        .order_service
        .create_bulk_order(user.user_id, request)
        .await?;
    Ok(Json(response))
}

/// Handler for POST /api/order-fulfillment
/// The payment gateway's asynchronous callback. The HMAC signature is the
/// sole authentication; a mismatch is treated as a permission failure.
#[utoipa::path(
    post,
    path = "/api/order-fulfillment",
    responses(
        (status = 200, description = "Callback processed"),
        (status = 403, description = "Signature verification failed")
    ),
    tag = "orders"
)]
pub async fn order_fulfillment_handler(
    State(state): State<crate::AppState>,
    Form(payload): Form<HashMap<String, String>>,
) -> Result<Json<serde_json::Value>, (StatusCode, Json<serde_json::Value>)> {
    if !state.gateway.verify(&payload) {
        let expected = state.gateway.expected_signature(&payload);
        let received = payload.get("signature");
        tracing::error!(
            "Gateway callback signature mismatch: expected {:?}, received {:?}, payload {:?}",
            expected,
            received,
            payload
        );
        return Err((
            StatusCode::FORBIDDEN,
            Json(json!({"error": "Signature verification failed"})),
        ));
    }

    state
        .order_service
        .fulfill_order(payload)
        .await
        .map_err(|err| {
            tracing::error!("Gateway callback processing failed: {}", err);
            let status = match err {
                OrderError::UnexpectedStatus { .. } => StatusCode::CONFLICT,
                OrderError::MalformedCallback(_) => StatusCode::BAD_REQUEST,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            };
            (status, Json(json!({"error": err.to_string()})))
        })?;

    Ok(Json(json!({})))
}

/// Handler for GET /api/orders
/// The authenticated user's order history, newest first
#[utoipa::path(
    get,
    path = "/api/orders",
    responses(
        (status = 200, description = "Order history")
    ),
    tag = "orders"
)]
pub async fn order_history_handler(
    State(state): State<crate::AppState>,
    user: AuthenticatedUser,
) -> Result<Json<Vec<OrderResponse>>, OrderError> {
    let orders = state.order_service.order_history(user.user_id).await?;

    let responses = orders
        .into_iter()
        .map(|order| OrderResponse {
            reference_number: state.order_service.order_reference(order.id),
            id: order.id,
            kind: order.kind,
            status: order.status,
            total_price_paid: order.total_price_paid,
            created_at: order.created_at,
        })
        .collect();

    Ok(Json(responses))
}

/// Handler for GET /api/orders/:id/audits
/// Before/after snapshots of every mutation to one of the user's orders,
/// oldest first. Used for dispute resolution.
#[utoipa::path(
    get,
    path = "/api/orders/{id}/audits",
    params(("id" = i64, Path, description = "Order ID")),
    responses(
        (status = 200, description = "Audit history"),
        (status = 404, description = "Order not found")
    ),
    tag = "orders"
)]
pub async fn order_audits_handler(
    State(state): State<crate::AppState>,
    user: AuthenticatedUser,
    Path(id): Path<i64>,
) -> Result<Json<Vec<crate::audit::OrderAudit>>, OrderError> {
    state
        .order_service
        .order_history(user.user_id)
        .await?
        .into_iter()
        .find(|order| order.id == id)
        .ok_or(OrderError::OrderNotFound(id))?;

    let mut conn = state.db.acquire().await?;
    let audits = crate::audit::order_audits(&mut conn, id).await?;
    Ok(Json(audits))
}

/// Handler for GET /api/orders/:id
#[utoipa::path(
    get,
    path = "/api/orders/{id}",
    params(("id" = i64, Path, description = "Order ID")),
    responses(
        (status = 200, description = "Order found"),
        (status = 404, description = "Order not found")
    ),
    tag = "orders"
)]
pub async fn get_order_handler(
    State(state): State<crate::AppState>,
    user: AuthenticatedUser,
    Path(id): Path<i64>,
) -> Result<Json<OrderResponse>, OrderError> {
    let order = state
        .order_service
        .order_history(user.user_id)
        .await?
        .into_iter()
        .find(|order| order.id == id)
        .ok_or(OrderError::OrderNotFound(id))?;

    Ok(Json(OrderResponse {
        reference_number: state.order_service.order_reference(order.id),
        id: order.id,
        kind: order.kind,
        status: order.status,
        total_price_paid: order.total_price_paid,
        created_at: order.created_at,
    }))
}
