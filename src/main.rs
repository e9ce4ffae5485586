mod audit;
mod auth;
mod basket;
mod catalog;
mod coupons;
mod db;
mod fulfillment;
mod gateway;
mod orders;
mod validation;

use std::sync::Arc;
use std::time::Duration;

use axum::{
    routing::{get, patch, post},
    Router,
};
use chrono::Utc;
use sqlx::PgPool;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use basket::{BasketRepository, BasketService};
use catalog::CatalogRepository;
use coupons::{CouponEngine, CouponService, CouponsRepository};
use fulfillment::{DbCouponCodeIssuer, DbEnrollmentSink, LoggingCrmSink};
use gateway::CyberSourceGateway;
use orders::{OrderService, OrdersRepository};

/// OpenAPI documentation structure
#[derive(OpenApi)]
#[openapi(
    paths(
        catalog::handlers::list_products_handler,
        catalog::handlers::get_product_handler,
        catalog::handlers::create_product_handler,
        catalog::handlers::create_product_version_handler,
        coupons::handlers::create_coupon_batch_handler,
        coupons::handlers::update_coupon_handler,
        coupons::handlers::assign_coupon_handler,
        coupons::handlers::valid_coupons_handler,
        basket::handlers::get_basket_handler,
        basket::handlers::update_basket_handler,
        orders::handlers::checkout_handler,
        orders::handlers::bulk_checkout_handler,
        orders::handlers::order_fulfillment_handler,
        orders::handlers::order_history_handler,
        orders::handlers::get_order_handler,
        orders::handlers::order_audits_handler,
    ),
    components(
        schemas(
            catalog::Product,
            catalog::ProductVersion,
            catalog::ContentKind,
            catalog::CreateProductRequest,
            catalog::CreateProductVersionRequest,
            catalog::ProductResponse,
        )
    ),
    tags(
        (name = "products", description = "Product catalog and versioned pricing"),
        (name = "coupons", description = "Coupon administration and lookup"),
        (name = "basket", description = "Pre-checkout basket management"),
        (name = "orders", description = "Checkout, fulfillment, and order history")
    ),
    info(
        title = "Seats API",
        version = "1.0.0",
        description = "E-commerce API for selling course and program seats",
    )
)]
struct ApiDoc;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    pub catalog_repo: CatalogRepository,
    pub coupon_service: CouponService,
    pub coupon_engine: CouponEngine,
    pub basket_service: BasketService,
    pub order_service: OrderService,
    pub gateway: CyberSourceGateway,
}

/// Creates and configures the application router
/// Maps all API endpoints to their handlers and adds CORS middleware
fn create_router(state: AppState) -> Router {
    use tower_http::cors::{Any, CorsLayer};

    // Configure CORS to allow all origins, methods, and headers
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Swagger UI
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        // Catalog
        .route(
            "/api/products",
            get(catalog::list_products_handler).post(catalog::create_product_handler),
        )
        .route("/api/products/:id", get(catalog::get_product_handler))
        .route(
            "/api/products/:id/versions",
            post(catalog::create_product_version_handler),
        )
        // Coupons
        .route("/api/coupons", post(coupons::create_coupon_batch_handler))
        .route("/api/coupons/valid", get(coupons::valid_coupons_handler))
        .route("/api/coupons/:id", patch(coupons::update_coupon_handler))
        .route(
            "/api/coupons/:id/assignments",
            post(coupons::assign_coupon_handler),
        )
        // Basket
        .route(
            "/api/basket",
            get(basket::get_basket_handler).patch(basket::update_basket_handler),
        )
        // Checkout and fulfillment
        .route("/api/checkout", post(orders::checkout_handler))
        .route("/api/checkout/bulk", post(orders::bulk_checkout_handler))
        .route(
            "/api/order-fulfillment",
            post(orders::order_fulfillment_handler),
        )
        .route("/api/orders", get(orders::order_history_handler))
        .route("/api/orders/:id", get(orders::get_order_handler))
        .route(
            "/api/orders/:id/audits",
            get(orders::order_audits_handler),
        )
        .layer(cors)
        .with_state(state)
}

/// Build the shared application state from a connection pool and the
/// process environment
fn build_state(db: PgPool, environment: String) -> AppState {
    let catalog_repo = CatalogRepository::new(db.clone());
    let coupons_repo = CouponsRepository::new(db.clone());
    let coupon_engine = CouponEngine::new(coupons_repo.clone());
    let coupon_service = CouponService::new(coupons_repo.clone());
    let basket_repo = BasketRepository::new(db.clone());
    let basket_service = BasketService::new(
        basket_repo,
        catalog_repo.clone(),
        coupons_repo.clone(),
        coupon_engine.clone(),
    );

    let gateway = CyberSourceGateway::from_env().expect("Gateway configuration must be set");

    let order_service = OrderService::new(
        OrdersRepository::new(db.clone()),
        basket_service.clone(),
        catalog_repo.clone(),
        coupons_repo.clone(),
        coupon_engine.clone(),
        gateway.clone(),
        Arc::new(DbEnrollmentSink::new(db.clone())),
        Arc::new(LoggingCrmSink),
        Arc::new(DbCouponCodeIssuer::new(coupons_repo)),
        environment,
    );

    AppState {
        db,
        catalog_repo,
        coupon_service,
        coupon_engine,
        basket_service,
        order_service,
        gateway,
    }
}

/// Periodic cleanup of expired baskets. Runs under SKIP LOCKED row locks,
/// so overlapping runs from multiple instances are safe.
fn spawn_basket_expiry_task(db: PgPool, ttl_days: i64) {
    let basket_repo = BasketRepository::new(db);
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(3600));
        loop {
            interval.tick().await;
            let cutoff = Utc::now() - chrono::Duration::days(ttl_days);
            match basket_repo.delete_expired(cutoff).await {
                Ok(0) => {}
                Ok(deleted) => tracing::info!("Expired {} stale basket(s)", deleted),
                Err(err) => tracing::error!("Basket expiry cleanup failed: {}", err),
            }
        }
    });
}

#[tokio::main]
async fn main() {
    // Load environment variables from .env file
    dotenv::dotenv().ok();

    // Initialize tracing subscriber for logging
    tracing_subscriber::fmt()
        .with_target(false)
        .with_level(true)
        .init();

    tracing::info!("Seats API - Starting...");

    // Get configuration from environment variables
    let database_url =
        std::env::var("DATABASE_URL").expect("DATABASE_URL must be set in environment");
    let host = std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
    let port = std::env::var("PORT").unwrap_or_else(|_| "8080".to_string());
    let environment = std::env::var("ENVIRONMENT").unwrap_or_else(|_| "dev".to_string());
    let basket_ttl_days = std::env::var("BASKET_EXPIRY_DAYS")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(15);

    // Create database connection pool
    tracing::info!("Connecting to database...");
    let db_pool = db::create_pool(&database_url)
        .await
        .expect("Failed to create database pool");

    // Run SQLx migrations on startup
    tracing::info!("Running database migrations...");
    sqlx::migrate!("./migrations")
        .run(&db_pool)
        .await
        .expect("Failed to run database migrations");
    tracing::info!("Migrations completed successfully");

    spawn_basket_expiry_task(db_pool.clone(), basket_ttl_days);

    let state = build_state(db_pool, environment);
    let app = create_router(state);

    // Start the Axum server
    let addr = format!("{}:{}", host, port);
    tracing::info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("Failed to bind to address");

    tracing::info!("Seats API is running on http://{}", addr);
    tracing::info!("Swagger UI available at http://{}/swagger-ui", addr);

    axum::serve(listener, app).await.expect("Server error");
}

#[cfg(test)]
mod tests;
