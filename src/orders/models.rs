use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use sqlx::FromRow;
use validator::Validate;

/// Fixed prefix for gateway reference numbers. The full reference is
/// "{REFERENCE_PREFIX}{environment}-{order_id}" and is the sole key used
/// to correlate gateway callbacks back to orders.
pub const REFERENCE_PREFIX: &str = "SEATS-";

/// Order lifecycle. `created` is initial; the state machine moves an order
/// to `fulfilled` or `failed` exactly once. `refunded` is reached only by
/// an out-of-band administrative action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Created,
    Fulfilled,
    Failed,
    Refunded,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Created => "created",
            OrderStatus::Fulfilled => "fulfilled",
            OrderStatus::Failed => "failed",
            OrderStatus::Refunded => "refunded",
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Standard orders come from a user's basket; bulk orders buy N seats for
/// later distribution as enrollment codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum OrderKind {
    Standard,
    Bulk,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Order {
    pub id: i64,
    pub purchaser_id: i32,
    pub kind: OrderKind,
    pub status: OrderStatus,
    pub total_price_paid: Decimal,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    /// The gateway reference number for this order
    pub fn reference_number(&self, environment: &str) -> String {
        reference_number(environment, self.id)
    }
}

/// Build the reference number sent to the payment gateway
pub fn reference_number(environment: &str, order_id: i64) -> String {
    format!("{REFERENCE_PREFIX}{environment}-{order_id}")
}

/// Parse an order id back out of a gateway-echoed reference number.
/// Returns None when the prefix, environment, or id do not match the
/// format we generate.
pub fn parse_reference_number(reference: &str, environment: &str) -> Option<i64> {
    let expected_prefix = format!("{REFERENCE_PREFIX}{environment}-");
    let id_part = reference.strip_prefix(&expected_prefix)?;
    id_part.parse::<i64>().ok().filter(|id| *id >= 1)
}

/// Exactly one line exists per order; the product version pins the price
/// the purchaser saw.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Line {
    pub id: i64,
    pub order_id: i64,
    pub product_version_id: i64,
    pub quantity: i32,
}

/// A raw gateway callback payload, persisted verbatim before any parsing.
/// order_id stays null when the reference number cannot be resolved.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Receipt {
    pub id: i64,
    pub order_id: Option<i64>,
    pub data: JsonValue,
    pub created_at: DateTime<Utc>,
}

/// Request DTO for the B2B bulk purchase path
#[derive(Debug, Deserialize, Validate)]
pub struct CreateBulkOrderRequest {
    pub product_id: i64,
    #[validate(range(min = 1, message = "At least one seat is required"))]
    pub num_seats: i32,
    pub coupon_code: Option<String>,
}

/// What the frontend does after checkout: POST the payload to the gateway,
/// or GET the receipt page directly for zero-price orders.
#[derive(Debug, Serialize)]
pub struct CheckoutResponse {
    pub order_id: i64,
    pub url: String,
    pub method: &'static str,
    pub payload: Option<BTreeMap<String, String>>,
}

/// Response DTO for order history
#[derive(Debug, Serialize)]
pub struct OrderResponse {
    pub id: i64,
    pub kind: OrderKind,
    pub status: OrderStatus,
    pub total_price_paid: Decimal,
    pub reference_number: String,
    pub created_at: DateTime<Utc>,
}
