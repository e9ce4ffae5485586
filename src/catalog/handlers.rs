// HTTP handlers for catalog endpoints

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use validator::Validate;

use crate::auth::middleware::AuthenticatedUser;
use crate::catalog::{
    CatalogError, CreateProductRequest, CreateProductVersionRequest, ProductResponse,
    ProductVersion,
};

/// Handler for GET /api/products
/// Lists all products with their current version
#[utoipa::path(
    get,
    path = "/api/products",
    responses(
        (status = 200, description = "List of products", body = Vec<ProductResponse>),
        (status = 500, description = "Internal server error")
    ),
    tag = "products"
)]
pub async fn list_products_handler(
    State(state): State<crate::AppState>,
) -> Result<Json<Vec<ProductResponse>>, CatalogError> {
    let products = state.catalog_repo.list_products().await?;

    let mut responses = Vec::new();
    for product in products {
        let latest_version = state.catalog_repo.latest_version(product.id).await?;
        responses.push(ProductResponse {
            id: product.id,
            content_kind: product.content_kind,
            content_id: product.content_id,
            is_active: product.is_active,
            latest_version,
        });
    }

    Ok(Json(responses))
}

/// Handler for GET /api/products/:id
#[utoipa::path(
    get,
    path = "/api/products/{id}",
    params(("id" = i64, Path, description = "Product ID")),
    responses(
        (status = 200, description = "Product found", body = ProductResponse),
        (status = 404, description = "Product not found")
    ),
    tag = "products"
)]
pub async fn get_product_handler(
    State(state): State<crate::AppState>,
    Path(id): Path<i64>,
) -> Result<Json<ProductResponse>, CatalogError> {
    let product = state
        .catalog_repo
        .find_product(id)
        .await?
        .ok_or(CatalogError::ProductNotFound(id))?;

    let latest_version = state.catalog_repo.latest_version(product.id).await?;

    Ok(Json(ProductResponse {
        id: product.id,
        content_kind: product.content_kind,
        content_id: product.content_id,
        is_active: product.is_active,
        latest_version,
    }))
}

/// Handler for POST /api/products
/// Creates a product for a course run or program
#[utoipa::path(
    post,
    path = "/api/products",
    request_body = CreateProductRequest,
    responses(
        (status = 201, description = "Product created", body = ProductResponse),
        (status = 400, description = "Content object not found"),
        (status = 409, description = "Product already exists for content object")
    ),
    tag = "products"
)]
pub async fn create_product_handler(
    State(state): State<crate::AppState>,
    _user: AuthenticatedUser, // TODO: Add role check for admin/staff
    Json(request): Json<CreateProductRequest>,
) -> Result<(StatusCode, Json<ProductResponse>), CatalogError> {
    request
        .validate()
        .map_err(|e| CatalogError::ValidationError(e.to_string()))?;

    let product = state
        .catalog_repo
        .create_product(request.content_kind, request.content_id)
        .await?;

    tracing::info!(
        "Created product {} for {} {}",
        product.id,
        product.content_kind,
        product.content_id
    );

    Ok((
        StatusCode::CREATED,
        Json(ProductResponse {
            id: product.id,
            content_kind: product.content_kind,
            content_id: product.content_id,
            is_active: product.is_active,
            latest_version: None,
        }),
    ))
}

/// Handler for POST /api/products/:id/versions
/// Appends a new price/description version; prior versions are immutable
#[utoipa::path(
    post,
    path = "/api/products/{id}/versions",
    params(("id" = i64, Path, description = "Product ID")),
    request_body = CreateProductVersionRequest,
    responses(
        (status = 201, description = "Version appended", body = ProductVersion),
        (status = 404, description = "Product not found")
    ),
    tag = "products"
)]
pub async fn create_product_version_handler(
    State(state): State<crate::AppState>,
    _user: AuthenticatedUser, // TODO: Add role check for admin/staff
    Path(id): Path<i64>,
    Json(request): Json<CreateProductVersionRequest>,
) -> Result<(StatusCode, Json<ProductVersion>), CatalogError> {
    request
        .validate()
        .map_err(|e| CatalogError::ValidationError(e.to_string()))?;

    let version = state
        .catalog_repo
        .create_version(id, request.price, &request.description)
        .await?;

    Ok((StatusCode::CREATED, Json(version)))
}
