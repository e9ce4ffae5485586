use rust_decimal::Decimal;
use serde_json::{json, Value as JsonValue};
use sqlx::{PgConnection, PgPool};

use crate::audit;
use crate::orders::error::OrderError;
use crate::orders::models::{Line, Order, OrderKind, OrderStatus, Receipt};

const ORDER_COLUMNS: &str =
    "id, purchaser_id, kind, status, total_price_paid, created_at, updated_at";

/// Repository for orders, lines, receipts, and the audited save path.
#[derive(Clone)]
pub struct OrdersRepository {
    pool: PgPool,
}

impl OrdersRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn find(&self, id: i64) -> Result<Option<Order>, OrderError> {
        let order = sqlx::query_as::<_, Order>(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(order)
    }

    pub async fn orders_for_user(&self, user_id: i32) -> Result<Vec<Order>, OrderError> {
        let orders = sqlx::query_as::<_, Order>(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE purchaser_id = $1 ORDER BY created_at DESC"
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(orders)
    }

    pub async fn line_for_order(&self, order_id: i64) -> Result<Option<Line>, OrderError> {
        let line = sqlx::query_as::<_, Line>(
            "SELECT id, order_id, product_version_id, quantity FROM lines WHERE order_id = $1",
        )
        .bind(order_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(line)
    }

    /// Create an order in `created` status with its line, coupon redemption
    /// (when a coupon applied), and creation audit row, all in one
    /// transaction. The UNIQUE constraints on lines and coupon_redemptions
    /// make "one line, at most one redemption per order" hold even if this
    /// is called twice concurrently.
    pub async fn create_order(
        &self,
        purchaser_id: i32,
        kind: OrderKind,
        total_price_paid: Decimal,
        product_version_id: i64,
        quantity: i32,
        coupon_version_id: Option<i64>,
        acting_user_id: Option<i32>,
    ) -> Result<(Order, Line), OrderError> {
        let mut tx = self.pool.begin().await?;

        let order = sqlx::query_as::<_, Order>(&format!(
            r#"
            INSERT INTO orders (purchaser_id, kind, status, total_price_paid)
            VALUES ($1, $2, 'created', $3)
            RETURNING {ORDER_COLUMNS}
            "#
        ))
        .bind(purchaser_id)
        .bind(kind)
        .bind(total_price_paid)
        .fetch_one(&mut *tx)
        .await?;

        let line = sqlx::query_as::<_, Line>(
            r#"
            INSERT INTO lines (order_id, product_version_id, quantity)
            VALUES ($1, $2, $3)
            RETURNING id, order_id, product_version_id, quantity
            "#,
        )
        .bind(order.id)
        .bind(product_version_id)
        .bind(quantity)
        .fetch_one(&mut *tx)
        .await?;

        if let Some(version_id) = coupon_version_id {
            sqlx::query(
                r#"
                INSERT INTO coupon_redemptions (coupon_version_id, order_id)
                VALUES ($1, $2)
                "#,
            )
            .bind(version_id)
            .bind(order.id)
            .execute(&mut *tx)
            .await?;
        }

        let after = order_snapshot(&mut *tx, order.id).await?;
        audit::log_order_audit(&mut *tx, order.id, acting_user_id, None, after).await?;

        tx.commit().await?;
        Ok((order, line))
    }

    /// Persist a new order status through the audited save path: before and
    /// after snapshots are written with the status change in one
    /// transaction. The row is locked for the duration and its status
    /// re-checked under the lock, so of two concurrent callbacks the loser
    /// gets UnexpectedStatus instead of silently overwriting the winner.
    pub async fn save_status_audited(
        &self,
        order_id: i64,
        new_status: OrderStatus,
        acting_user_id: Option<i32>,
    ) -> Result<Order, OrderError> {
        let mut tx = self.pool.begin().await?;

        let current: Option<OrderStatus> =
            sqlx::query_scalar("SELECT status FROM orders WHERE id = $1 FOR UPDATE")
                .bind(order_id)
                .fetch_optional(&mut *tx)
                .await?;
        let current = current.ok_or(OrderError::OrderNotFound(order_id))?;
        if current != OrderStatus::Created {
            return Err(OrderError::UnexpectedStatus {
                order_id,
                actual: current,
            });
        }

        let before = order_snapshot(&mut *tx, order_id).await?;

        let order = sqlx::query_as::<_, Order>(&format!(
            r#"
            UPDATE orders SET status = $2, updated_at = NOW()
            WHERE id = $1
            RETURNING {ORDER_COLUMNS}
            "#
        ))
        .bind(order_id)
        .bind(new_status)
        .fetch_one(&mut *tx)
        .await?;

        let after = order_snapshot(&mut *tx, order_id).await?;
        audit::log_order_audit(&mut *tx, order_id, acting_user_id, Some(before), after).await?;

        tx.commit().await?;
        Ok(order)
    }

    /// Persist a raw gateway payload before any parsing happens
    pub async fn create_receipt(&self, data: JsonValue) -> Result<Receipt, OrderError> {
        let receipt = sqlx::query_as::<_, Receipt>(
            r#"
            INSERT INTO receipts (data)
            VALUES ($1)
            RETURNING id, order_id, data, created_at
            "#,
        )
        .bind(data)
        .fetch_one(&self.pool)
        .await?;

        Ok(receipt)
    }

    pub async fn attach_receipt(&self, receipt_id: i64, order_id: i64) -> Result<(), OrderError> {
        sqlx::query("UPDATE receipts SET order_id = $2 WHERE id = $1")
            .bind(receipt_id)
            .bind(order_id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// The coupon (id and code) redeemed by an order, if any
    pub async fn redeemed_coupon(
        &self,
        order_id: i64,
    ) -> Result<Option<(i64, String)>, OrderError> {
        let row: Option<(i64, String)> = sqlx::query_as(
            r#"
            SELECT c.id, c.coupon_code
            FROM coupon_redemptions r
            JOIN coupon_versions cv ON cv.id = r.coupon_version_id
            JOIN coupons c ON c.id = cv.coupon_id
            WHERE r.order_id = $1
            "#,
        )
        .bind(order_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }
}

/// Serialize the full purchase context of an order as one JSON document:
/// the order, its line with product metadata, the redeemed coupon, any
/// enrollments, and attached receipts. Audit rows built from this are
/// standalone records usable for dispute resolution without joining back
/// to live tables.
pub async fn order_snapshot(
    conn: &mut PgConnection,
    order_id: i64,
) -> Result<JsonValue, OrderError> {
    let order = sqlx::query_as::<_, Order>(&format!(
        "SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1"
    ))
    .bind(order_id)
    .fetch_one(&mut *conn)
    .await?;

    let line: Option<JsonValue> = sqlx::query_scalar(
        r#"
        SELECT to_jsonb(l) || jsonb_build_object(
            'product_version', to_jsonb(pv),
            'product', to_jsonb(p)
        )
        FROM lines l
        JOIN product_versions pv ON pv.id = l.product_version_id
        JOIN products p ON p.id = pv.product_id
        WHERE l.order_id = $1
        "#,
    )
    .bind(order_id)
    .fetch_optional(&mut *conn)
    .await?;

    let coupon: Option<JsonValue> = sqlx::query_scalar(
        r#"
        SELECT to_jsonb(r) || jsonb_build_object('coupon_code', c.coupon_code)
        FROM coupon_redemptions r
        JOIN coupon_versions cv ON cv.id = r.coupon_version_id
        JOIN coupons c ON c.id = cv.coupon_id
        WHERE r.order_id = $1
        "#,
    )
    .bind(order_id)
    .fetch_optional(&mut *conn)
    .await?;

    let enrollments: Vec<JsonValue> = sqlx::query_scalar(
        r#"
        SELECT to_jsonb(e) || jsonb_build_object('run_title', cr.title)
        FROM enrollments e
        JOIN course_runs cr ON cr.id = e.run_id
        WHERE e.order_id = $1
        "#,
    )
    .bind(order_id)
    .fetch_all(&mut *conn)
    .await?;

    let receipts: Vec<JsonValue> =
        sqlx::query_scalar("SELECT to_jsonb(r) FROM receipts r WHERE r.order_id = $1")
            .bind(order_id)
            .fetch_all(&mut *conn)
            .await?;

    Ok(json!({
        "order": order,
        "line": line,
        "coupon_redemption": coupon,
        "enrollments": enrollments,
        "receipts": receipts,
    }))
}
