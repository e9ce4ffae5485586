// Audit trail
//
// Append-only before/after snapshots written once per mutating save. The
// functions here take a live connection so the audit row commits or rolls
// back together with the mutation it records. The audit tables reject
// UPDATE/DELETE at the database layer.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value as JsonValue;
use sqlx::{FromRow, PgConnection};

/// One audit row for an order mutation. data_before is null for creation.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct OrderAudit {
    pub id: i64,
    pub order_id: i64,
    pub acting_user_id: Option<i32>,
    pub data_before: Option<JsonValue>,
    pub data_after: JsonValue,
    pub created_at: DateTime<Utc>,
}

/// Record an order mutation. acting_user_id is None for system-initiated
/// changes such as gateway callbacks.
pub async fn log_order_audit(
    conn: &mut PgConnection,
    order_id: i64,
    acting_user_id: Option<i32>,
    data_before: Option<JsonValue>,
    data_after: JsonValue,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO order_audits (order_id, acting_user_id, data_before, data_after)
        VALUES ($1, $2, $3, $4)
        "#,
    )
    .bind(order_id)
    .bind(acting_user_id)
    .bind(data_before)
    .bind(data_after)
    .execute(conn)
    .await?;

    Ok(())
}

/// Record a coupon mutation.
pub async fn log_coupon_audit(
    conn: &mut PgConnection,
    coupon_id: i64,
    acting_user_id: Option<i32>,
    data_before: Option<JsonValue>,
    data_after: JsonValue,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO coupon_audits (coupon_id, acting_user_id, data_before, data_after)
        VALUES ($1, $2, $3, $4)
        "#,
    )
    .bind(coupon_id)
    .bind(acting_user_id)
    .bind(data_before)
    .bind(data_after)
    .execute(conn)
    .await?;

    Ok(())
}

/// Audit history for an order, oldest first. Used by dispute tooling.
pub async fn order_audits(
    conn: &mut PgConnection,
    order_id: i64,
) -> Result<Vec<OrderAudit>, sqlx::Error> {
    sqlx::query_as::<_, OrderAudit>(
        r#"
        SELECT id, order_id, acting_user_id, data_before, data_after, created_at
        FROM order_audits
        WHERE order_id = $1
        ORDER BY created_at ASC, id ASC
        "#,
    )
    .bind(order_id)
    .fetch_all(conn)
    .await
}
