use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use validator::Validate;

/// Coupon type: single-use codes are consumed by one redemption; promo
/// codes stay live until their redemption limits are reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text")]
pub enum CouponType {
    #[sqlx(rename = "single-use")]
    #[serde(rename = "single-use")]
    SingleUse,
    #[sqlx(rename = "promo")]
    #[serde(rename = "promo")]
    Promo,
}

impl CouponType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CouponType::SingleUse => "single-use",
            CouponType::Promo => "promo",
        }
    }
}

impl std::fmt::Display for CouponType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A batch of sibling coupons created under one payment
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct CouponPayment {
    pub id: i64,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

/// Append-only terms-of-discount snapshot for a coupon payment
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct CouponPaymentVersion {
    pub id: i64,
    pub payment_id: i64,
    pub version_seq: i32,
    pub coupon_type: CouponType,
    pub discount: Decimal,
    pub max_redemptions: i32,
    pub max_redemptions_per_user: i32,
    pub activation_date: Option<DateTime<Utc>>,
    pub expiration_date: Option<DateTime<Utc>>,
    pub automatic: bool,
    pub company_id: Option<i32>,
    pub payment_type: Option<String>,
    pub payment_transaction: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A redeemable code. The code itself is immutable once assigned; a coupon
/// is never deleted, only disabled.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Coupon {
    pub id: i64,
    pub payment_id: i64,
    pub coupon_code: String,
    pub is_global: bool,
    pub enabled: bool,
    pub include_future_runs: bool,
    pub created_at: DateTime<Utc>,
}

/// Append-only link from a coupon to the payment version governing it
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct CouponVersion {
    pub id: i64,
    pub coupon_id: i64,
    pub payment_version_id: i64,
    pub version_seq: i32,
    pub created_at: DateTime<Utc>,
}

/// Which coupon applies to which product
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct CouponEligibility {
    pub id: i64,
    pub coupon_id: i64,
    pub product_id: i64,
    pub program_run_id: Option<i64>,
}

/// A coupon version used (reserved) for an order
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct CouponRedemption {
    pub id: i64,
    pub coupon_version_id: i64,
    pub order_id: i64,
    pub created_at: DateTime<Utc>,
}

/// Bulk sponsorship assignment of a coupon to an invitee email
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ProductCouponAssignment {
    pub id: i64,
    pub coupon_id: i64,
    pub email: String,
    pub redeemed: bool,
    pub created_at: DateTime<Utc>,
}

/// The current version of a coupon, denormalized with the terms that
/// govern it. This is what the eligibility engine works with.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct CurrentCouponVersion {
    pub coupon_id: i64,
    pub coupon_code: String,
    pub is_global: bool,
    pub version_id: i64,
    pub payment_version_id: i64,
    pub coupon_type: CouponType,
    pub discount: Decimal,
    pub max_redemptions: i32,
    pub max_redemptions_per_user: i32,
    pub activation_date: Option<DateTime<Utc>>,
    pub expiration_date: Option<DateTime<Utc>>,
    pub automatic: bool,
    pub company_id: Option<i32>,
}

impl CurrentCouponVersion {
    /// Whether the discount window contains `now`. An absent activation
    /// date means active from the start; an absent expiration date means
    /// the coupon never expires.
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        let activated = self.activation_date.map_or(true, |d| d <= now);
        let unexpired = self.expiration_date.map_or(true, |d| d > now);
        activated && unexpired
    }

    /// 100%-off coupons qualify for full-discount-only flows
    pub fn is_full_discount(&self) -> bool {
        self.discount == Decimal::ONE
    }
}

/// Request DTO for creating a coupon batch
#[derive(Debug, Deserialize, Validate)]
pub struct CreateCouponBatchRequest {
    #[validate(length(min = 1, message = "Payment name is required"))]
    pub name: String,
    pub coupon_type: CouponType,
    #[validate(custom = "crate::validation::validate_discount_fraction")]
    pub discount: Decimal,
    #[validate(range(min = 1, message = "At least one code is required"))]
    pub num_coupon_codes: i32,
    #[validate(range(min = 1))]
    pub max_redemptions: i32,
    #[validate(range(min = 1))]
    pub max_redemptions_per_user: i32,
    pub activation_date: Option<DateTime<Utc>>,
    pub expiration_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub automatic: bool,
    #[serde(default)]
    pub is_global: bool,
    pub company_id: Option<i32>,
    pub payment_type: Option<String>,
    pub payment_transaction: Option<String>,
    /// Products the batch applies to; may be empty for global coupons
    #[serde(default)]
    pub product_ids: Vec<i64>,
    /// Explicit code for single-code batches; generated when absent
    pub coupon_code: Option<String>,
}

/// Request DTO for assigning a coupon to invitee emails
#[derive(Debug, Deserialize, Validate)]
pub struct AssignCouponRequest {
    #[validate(length(min = 1, message = "At least one email is required"))]
    pub emails: Vec<String>,
}

/// Request DTO for enabling/disabling a coupon
#[derive(Debug, Deserialize, Validate)]
pub struct UpdateCouponRequest {
    pub enabled: bool,
}

/// Response DTO for a created batch
#[derive(Debug, Serialize)]
pub struct CouponBatchResponse {
    pub payment: CouponPayment,
    pub codes: Vec<String>,
}
