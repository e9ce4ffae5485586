// HTTP handlers for the basket

use axum::{extract::State, Json};

use crate::auth::middleware::AuthenticatedUser;
use crate::basket::{BasketError, BasketResponse, UpdateBasketRequest};

/// Handler for GET /api/basket
/// Returns the user's basket, creating an empty one on first access
#[utoipa::path(
    get,
    path = "/api/basket",
    responses(
        (status = 200, description = "The user's basket")
    ),
    tag = "basket"
)]
pub async fn get_basket_handler(
    State(state): State<crate::AppState>,
    user: AuthenticatedUser,
) -> Result<Json<BasketResponse>, BasketError> {
    let response = state.basket_service.get_basket(user.user_id).await?;
    Ok(Json(response))
}

/// Handler for PATCH /api/basket
/// Replaces the basket item, run selections, and/or applied coupon
#[utoipa::path(
    patch,
    path = "/api/basket",
    responses(
        (status = 200, description = "Updated basket"),
        (status = 400, description = "Validation error keyed by basket section")
    ),
    tag = "basket"
)]
pub async fn update_basket_handler(
    State(state): State<crate::AppState>,
    user: AuthenticatedUser,
    Json(request): Json<UpdateBasketRequest>,
) -> Result<Json<BasketResponse>, BasketError> {
    let response = state
        .basket_service
        .update_basket(user.user_id, request)
        .await?;
    Ok(Json(response))
}
