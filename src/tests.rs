// End-to-end tests for the seats API
// These tests exercise checkout, gateway callbacks, and the append-only
// pricing tables against a real PostgreSQL database, so they are ignored
// by default. Run them with: cargo test -- --ignored

use super::*;
use std::collections::HashMap;

use axum::http::StatusCode;
use axum_test::TestServer;
use rust_decimal_macros::dec;
use serde_json::json;
use sqlx::PgPool;

use crate::coupons::{CouponFilters, CouponType, NewPaymentVersion};
use crate::orders::{OrderError, OrderKind, OrderStatus};

// ============================================================================
// Test Helpers
// ============================================================================

/// Connect to the test database, run migrations, and wipe test data
async fn create_test_pool() -> PgPool {
    let database_url = std::env::var("DATABASE_URL")
        .unwrap_or_else(|_| "postgresql://seats_user:seats_pass@db:5432/seats_db".to_string());

    let pool = crate::db::create_pool(&database_url)
        .await
        .expect("Failed to connect to test database");

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("Failed to run migrations");

    // Truncate skips the append-only row triggers, which only guard
    // UPDATE and DELETE
    sqlx::query(
        r#"
        TRUNCATE users, companies, programs, courses, course_runs, products,
            product_versions, coupon_payments, coupon_payment_versions,
            coupons, coupon_versions, coupon_eligibilities,
            product_coupon_assignments, orders, lines, coupon_redemptions,
            receipts, baskets, basket_items, course_run_selections,
            coupon_selections, enrollments, data_consents, order_audits,
            coupon_audits
        RESTART IDENTITY CASCADE
        "#,
    )
    .execute(&pool)
    .await
    .expect("Failed to clean test data");

    pool
}

/// Gateway and auth configuration the state builder expects
fn set_test_env() {
    std::env::set_var("CYBERSOURCE_ACCESS_KEY", "test-access");
    std::env::set_var("CYBERSOURCE_SECURITY_KEY", "test-secret");
    std::env::set_var("CYBERSOURCE_PROFILE_ID", "test-profile");
    std::env::set_var(
        "CYBERSOURCE_SECURE_ACCEPTANCE_URL",
        "https://testsecureacceptance.example/pay",
    );
    std::env::set_var("CHECKOUT_RECEIPT_URL", "https://shop.example/receipt");
    std::env::set_var("CHECKOUT_CANCEL_URL", "https://shop.example/cancel");
    std::env::set_var("JWT_SECRET", "test-jwt-secret");
}

async fn build_test_state(pool: PgPool) -> AppState {
    set_test_env();
    build_state(pool, "test".to_string())
}

async fn seed_user(pool: &PgPool, email: &str) -> i32 {
    sqlx::query_scalar("INSERT INTO users (email, name) VALUES ($1, 'Test User') RETURNING id")
        .bind(email)
        .fetch_one(pool)
        .await
        .expect("Failed to seed user")
}

/// A live course run with a product priced at `price`.
/// Returns (product_id, run_id).
async fn seed_run_product(pool: &PgPool, price: rust_decimal::Decimal) -> (i64, i64) {
    let course_id: i64 = sqlx::query_scalar(
        "INSERT INTO courses (title, readable_id, is_live) VALUES ('Test Course', gen_random_uuid()::text, TRUE) RETURNING id",
    )
    .fetch_one(pool)
    .await
    .expect("Failed to seed course");

    let run_id: i64 = sqlx::query_scalar(
        r#"
        INSERT INTO course_runs (course_id, title, courseware_id, is_live)
        VALUES ($1, 'Test Run', gen_random_uuid()::text, TRUE)
        RETURNING id
        "#,
    )
    .bind(course_id)
    .fetch_one(pool)
    .await
    .expect("Failed to seed run");

    let product_id: i64 = sqlx::query_scalar(
        "INSERT INTO products (content_kind, content_id) VALUES ('course_run', $1) RETURNING id",
    )
    .bind(run_id)
    .fetch_one(pool)
    .await
    .expect("Failed to seed product");

    sqlx::query(
        r#"
        INSERT INTO product_versions (product_id, version_seq, price, description, text_id)
        VALUES ($1, 1, $2, 'Test Run', 'course-v1:test')
        "#,
    )
    .bind(product_id)
    .bind(price)
    .execute(pool)
    .await
    .expect("Failed to seed product version");

    (product_id, run_id)
}

async fn put_in_basket(pool: &PgPool, user_id: i32, product_id: i64) -> i64 {
    let basket_id: i64 =
        sqlx::query_scalar("INSERT INTO baskets (user_id) VALUES ($1) RETURNING id")
            .bind(user_id)
            .fetch_one(pool)
            .await
            .expect("Failed to seed basket");

    sqlx::query("INSERT INTO basket_items (basket_id, product_id) VALUES ($1, $2)")
        .bind(basket_id)
        .bind(product_id)
        .execute(pool)
        .await
        .expect("Failed to seed basket item");

    basket_id
}

/// Coupon batch of one code, eligible for one product
async fn seed_coupon(
    pool: &PgPool,
    code: &str,
    discount: rust_decimal::Decimal,
    max_redemptions: i32,
    max_per_user: i32,
    product_id: i64,
) -> i64 {
    let repo = coupons::CouponsRepository::new(pool.clone());
    let version = NewPaymentVersion {
        coupon_type: CouponType::Promo,
        discount,
        max_redemptions,
        max_redemptions_per_user: max_per_user,
        activation_date: None,
        expiration_date: None,
        automatic: false,
        company_id: None,
        payment_type: None,
        payment_transaction: None,
    };
    let (_, coupons) = repo
        .create_batch(
            &format!("Batch {code}"),
            &version,
            &[code.to_string()],
            false,
            &[product_id],
        )
        .await
        .expect("Failed to seed coupon");
    coupons[0].id
}

async fn apply_coupon_to_basket(pool: &PgPool, basket_id: i64, coupon_id: i64) {
    sqlx::query("INSERT INTO coupon_selections (basket_id, coupon_id) VALUES ($1, $2)")
        .bind(basket_id)
        .bind(coupon_id)
        .execute(pool)
        .await
        .expect("Failed to apply coupon");
}

fn callback(reference: &str, decision: &str) -> HashMap<String, String> {
    let mut payload = HashMap::new();
    payload.insert("req_reference_number".to_string(), reference.to_string());
    payload.insert("decision".to_string(), decision.to_string());
    payload
}

async fn enrollment_count(pool: &PgPool, order_id: i64) -> i64 {
    sqlx::query_scalar("SELECT COUNT(*) FROM enrollments WHERE order_id = $1")
        .bind(order_id)
        .fetch_one(pool)
        .await
        .expect("Failed to count enrollments")
}

// ============================================================================
// Checkout and fulfillment scenarios
// ============================================================================

/// A $100 product with no coupon checks out at 100.00 in `created` status;
/// an ACCEPT callback fulfills it and creates exactly one enrollment
#[tokio::test]
#[ignore = "requires a PostgreSQL database"]
async fn test_checkout_then_accept_callback_fulfills_once() {
    let pool = create_test_pool().await;
    let state = build_test_state(pool.clone()).await;

    let user_id = seed_user(&pool, "buyer@example.com").await;
    let (product_id, _run_id) = seed_run_product(&pool, dec!(100.00)).await;
    put_in_basket(&pool, user_id, product_id).await;

    let response = state.order_service.create_order(user_id).await.unwrap();
    assert_eq!(response.method, "POST");
    let payload = response.payload.expect("expected a gateway payload");
    assert_eq!(payload["amount"], "100.00");

    let order = state
        .order_service
        .order_history(user_id)
        .await
        .unwrap()
        .remove(0);
    assert_eq!(order.status, OrderStatus::Created);
    assert_eq!(order.total_price_paid, dec!(100.00));

    let reference = order.reference_number("test");
    state
        .order_service
        .fulfill_order(callback(&reference, "ACCEPT"))
        .await
        .unwrap();

    let order = state.order_service.order_history(user_id).await.unwrap().remove(0);
    assert_eq!(order.status, OrderStatus::Fulfilled);
    assert_eq!(enrollment_count(&pool, order.id).await, 1);

    // A second ACCEPT for the same order must fail loudly, not re-fulfill
    let err = state
        .order_service
        .fulfill_order(callback(&reference, "ACCEPT"))
        .await
        .unwrap_err();
    assert!(matches!(err, OrderError::UnexpectedStatus { .. }));
    assert!(err.to_string().contains("expected to have status 'created'"));
    assert_eq!(enrollment_count(&pool, order.id).await, 1);
}

/// The audited save re-checks the status under its row lock: a writer that
/// read `created` before another callback resolved the order gets a
/// conflict instead of overwriting the resolution
#[tokio::test]
#[ignore = "requires a PostgreSQL database"]
async fn test_status_save_rejects_already_resolved_order() {
    let pool = create_test_pool().await;
    let state = build_test_state(pool.clone()).await;

    let user_id = seed_user(&pool, "buyer@example.com").await;
    let (product_id, _run_id) = seed_run_product(&pool, dec!(100.00)).await;
    put_in_basket(&pool, user_id, product_id).await;
    state.order_service.create_order(user_id).await.unwrap();

    let order = state.order_service.order_history(user_id).await.unwrap().remove(0);
    let reference = order.reference_number("test");
    state
        .order_service
        .fulfill_order(callback(&reference, "ACCEPT"))
        .await
        .unwrap();

    // A concurrent callback that read `created` before the first one
    // committed would reach this save; it must lose, not double-resolve
    let repo = orders::OrdersRepository::new(pool.clone());
    let err = repo
        .save_status_audited(order.id, OrderStatus::Fulfilled, None)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        OrderError::UnexpectedStatus {
            order_id,
            actual: OrderStatus::Fulfilled,
        } if order_id == order.id
    ));

    let order = state.order_service.order_history(user_id).await.unwrap().remove(0);
    assert_eq!(order.status, OrderStatus::Fulfilled);
}

/// A 25% coupon eligible for the product discounts 100.00 to 75.00
#[tokio::test]
#[ignore = "requires a PostgreSQL database"]
async fn test_checkout_with_quarter_discount_coupon() {
    let pool = create_test_pool().await;
    let state = build_test_state(pool.clone()).await;

    let user_id = seed_user(&pool, "buyer@example.com").await;
    let (product_id, _run_id) = seed_run_product(&pool, dec!(100.00)).await;
    let basket_id = put_in_basket(&pool, user_id, product_id).await;
    let coupon_id = seed_coupon(&pool, "SAVE25", dec!(0.25), 10, 1, product_id).await;
    apply_coupon_to_basket(&pool, basket_id, coupon_id).await;

    state.order_service.create_order(user_id).await.unwrap();

    let order = state.order_service.order_history(user_id).await.unwrap().remove(0);
    assert_eq!(order.total_price_paid, dec!(75.00));

    let redemptions: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM coupon_redemptions WHERE order_id = $1")
            .bind(order.id)
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(redemptions, 1);
}

/// A zero-price product bypasses the gateway entirely: the order fulfills
/// synchronously and the response redirects to the receipt page
#[tokio::test]
#[ignore = "requires a PostgreSQL database"]
async fn test_zero_price_checkout_skips_gateway() {
    let pool = create_test_pool().await;
    let state = build_test_state(pool.clone()).await;

    let user_id = seed_user(&pool, "buyer@example.com").await;
    let (product_id, _run_id) = seed_run_product(&pool, dec!(0.00)).await;
    put_in_basket(&pool, user_id, product_id).await;

    let response = state.order_service.create_order(user_id).await.unwrap();
    assert_eq!(response.method, "GET");
    assert!(response.payload.is_none());
    assert_eq!(response.url, "https://shop.example/receipt");

    let order = state.order_service.order_history(user_id).await.unwrap().remove(0);
    assert_eq!(order.status, OrderStatus::Fulfilled);
    assert_eq!(enrollment_count(&pool, order.id).await, 1);

    // The basket was cleared atomically on fulfillment
    let items: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM basket_items")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(items, 0);
}

/// Duplicate CANCEL deliveries to a failed order are silent no-ops, but a
/// receipt row is still persisted for every delivery
#[tokio::test]
#[ignore = "requires a PostgreSQL database"]
async fn test_duplicate_cancel_is_idempotent() {
    let pool = create_test_pool().await;
    let state = build_test_state(pool.clone()).await;

    let user_id = seed_user(&pool, "buyer@example.com").await;
    let (product_id, _run_id) = seed_run_product(&pool, dec!(100.00)).await;
    put_in_basket(&pool, user_id, product_id).await;
    state.order_service.create_order(user_id).await.unwrap();

    let order = state.order_service.order_history(user_id).await.unwrap().remove(0);
    let reference = order.reference_number("test");

    state
        .order_service
        .fulfill_order(callback(&reference, "CANCEL"))
        .await
        .unwrap();
    let order = state.order_service.order_history(user_id).await.unwrap().remove(0);
    assert_eq!(order.status, OrderStatus::Failed);

    // Redelivery: no status change, no error
    state
        .order_service
        .fulfill_order(callback(&reference, "CANCEL"))
        .await
        .unwrap();
    let order = state.order_service.order_history(user_id).await.unwrap().remove(0);
    assert_eq!(order.status, OrderStatus::Failed);

    let receipts: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM receipts WHERE order_id = $1")
        .bind(order.id)
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(receipts, 2);
}

/// A callback whose reference number resolves to no order keeps the
/// receipt orphaned instead of crashing
#[tokio::test]
#[ignore = "requires a PostgreSQL database"]
async fn test_unresolvable_reference_keeps_orphan_receipt() {
    let pool = create_test_pool().await;
    let state = build_test_state(pool.clone()).await;

    state
        .order_service
        .fulfill_order(callback("SEATS-test-99999", "ACCEPT"))
        .await
        .unwrap();

    let orphans: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM receipts WHERE order_id IS NULL")
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(orphans, 1);
}

// ============================================================================
// Append-only pricing tables
// ============================================================================

/// Product versions reject UPDATE and DELETE at the storage layer; a new
/// row for the same product becomes the latest version
#[tokio::test]
#[ignore = "requires a PostgreSQL database"]
async fn test_product_versions_are_append_only() {
    let pool = create_test_pool().await;
    let (product_id, _run_id) = seed_run_product(&pool, dec!(100.00)).await;

    let update = sqlx::query("UPDATE product_versions SET price = 1 WHERE product_id = $1")
        .bind(product_id)
        .execute(&pool)
        .await;
    assert!(update.is_err(), "UPDATE should be rejected by trigger");

    let delete = sqlx::query("DELETE FROM product_versions WHERE product_id = $1")
        .bind(product_id)
        .execute(&pool)
        .await;
    assert!(delete.is_err(), "DELETE should be rejected by trigger");

    let repo = catalog::CatalogRepository::new(pool.clone());
    let version = repo
        .create_version(product_id, dec!(150.00), "Repriced")
        .await
        .unwrap();
    assert_eq!(version.version_seq, 2);

    let latest = repo.latest_version(product_id).await.unwrap().unwrap();
    assert_eq!(latest.price, dec!(150.00));
}

// ============================================================================
// Redemption limits
// ============================================================================

/// Redemption limits count fulfilled orders: an exhausted single-use coupon
/// disappears from the valid set for every user, while a coupon with slots
/// remaining stays valid
#[tokio::test]
#[ignore = "requires a PostgreSQL database"]
async fn test_redemption_limits_enforced_at_settlement() {
    let pool = create_test_pool().await;
    let state = build_test_state(pool.clone()).await;

    let (product_id, _run_id) = seed_run_product(&pool, dec!(100.00)).await;
    let exhausted_id = seed_coupon(&pool, "ONESHOT", dec!(0.5), 1, 1, product_id).await;
    let open_id = seed_coupon(&pool, "FIVESHOT", dec!(0.25), 5, 5, product_id).await;

    let orders_repo = orders::OrdersRepository::new(pool.clone());
    let coupons_repo = coupons::CouponsRepository::new(pool.clone());

    // One fulfilled redemption on the single-use coupon, three on the other
    let fulfill_with = |coupon_id: i64, buyer: String| {
        let orders_repo = orders_repo.clone();
        let coupons_repo = coupons_repo.clone();
        let pool = pool.clone();
        async move {
            let user = seed_user(&pool, &buyer).await;
            let version = coupons_repo.current_version(coupon_id).await.unwrap().unwrap();
            let product_version_id: i64 =
                sqlx::query_scalar("SELECT id FROM product_versions WHERE product_id = $1")
                    .bind(product_id)
                    .fetch_one(&pool)
                    .await
                    .unwrap();
            let (order, _line) = orders_repo
                .create_order(
                    user,
                    OrderKind::Standard,
                    dec!(50.00),
                    product_version_id,
                    1,
                    Some(version.version_id),
                    Some(user),
                )
                .await
                .unwrap();
            orders_repo
                .save_status_audited(order.id, OrderStatus::Fulfilled, None)
                .await
                .unwrap();
        }
    };

    fulfill_with(exhausted_id, "a@example.com".to_string()).await;
    fulfill_with(open_id, "b@example.com".to_string()).await;
    fulfill_with(open_id, "c@example.com".to_string()).await;
    fulfill_with(open_id, "d@example.com".to_string()).await;

    let shopper = seed_user(&pool, "shopper@example.com").await;
    let valid = state
        .coupon_engine
        .get_valid_coupon_versions(product_id, shopper, &CouponFilters::default())
        .await
        .unwrap();

    let codes: Vec<&str> = valid.iter().map(|v| v.coupon_code.as_str()).collect();
    assert!(!codes.contains(&"ONESHOT"), "exhausted coupon must be excluded");
    assert!(codes.contains(&"FIVESHOT"), "coupon with slots left stays valid");
}

// ============================================================================
// Gateway callback over HTTP
// ============================================================================

/// The callback endpoint rejects unsigned and mis-signed payloads with 403
/// and accepts a correctly signed one
#[tokio::test]
#[ignore = "requires a PostgreSQL database"]
async fn test_callback_signature_verification() {
    let pool = create_test_pool().await;
    let state = build_test_state(pool.clone()).await;
    let server = TestServer::new(create_router(state.clone())).unwrap();

    let unsigned = [
        ("req_reference_number", "SEATS-test-1"),
        ("decision", "CANCEL"),
    ];
    let response = server.post("/api/order-fulfillment").form(&unsigned).await;
    assert_eq!(response.status_code(), StatusCode::FORBIDDEN);

    // Sign the same payload the way the gateway would
    let mut payload = HashMap::new();
    payload.insert("req_reference_number".to_string(), "SEATS-test-1".to_string());
    payload.insert("decision".to_string(), "CANCEL".to_string());
    payload.insert(
        "signed_field_names".to_string(),
        "decision,req_reference_number,signed_field_names".to_string(),
    );
    let signature = state.gateway.expected_signature(&payload).unwrap();
    payload.insert("signature".to_string(), signature);

    let signed: Vec<(String, String)> = payload.into_iter().collect();
    let response = server.post("/api/order-fulfillment").form(&signed).await;
    assert_eq!(response.status_code(), StatusCode::OK);
    assert_eq!(response.json::<serde_json::Value>(), json!({}));
}

// ============================================================================
// Basket validation and expiry
// ============================================================================

/// An empty basket and a missing basket both fail checkout with the
/// items-keyed error
#[tokio::test]
#[ignore = "requires a PostgreSQL database"]
async fn test_empty_basket_fails_checkout() {
    let pool = create_test_pool().await;
    let state = build_test_state(pool.clone()).await;

    let user_id = seed_user(&pool, "buyer@example.com").await;
    let err = state
        .basket_service
        .validate_basket_for_checkout(user_id)
        .await
        .unwrap_err();
    assert_eq!(err.field(), "items");
}

/// Stale baskets are deleted with their contents by the cleanup pass
#[tokio::test]
#[ignore = "requires a PostgreSQL database"]
async fn test_expired_basket_cleanup() {
    let pool = create_test_pool().await;
    let user_id = seed_user(&pool, "idle@example.com").await;
    let (product_id, _run_id) = seed_run_product(&pool, dec!(100.00)).await;
    let basket_id = put_in_basket(&pool, user_id, product_id).await;

    sqlx::query("UPDATE baskets SET updated_at = NOW() - INTERVAL '30 days' WHERE id = $1")
        .bind(basket_id)
        .execute(&pool)
        .await
        .unwrap();

    let repo = basket::BasketRepository::new(pool.clone());
    let deleted = repo
        .delete_expired(chrono::Utc::now() - chrono::Duration::days(15))
        .await
        .unwrap();
    assert_eq!(deleted, 1);

    let remaining: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM basket_items")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(remaining, 0);
}
