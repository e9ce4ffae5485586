use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use validator::Validate;

use crate::catalog::{Product, ProductVersion};
use crate::coupons::CurrentCouponVersion;

/// Pre-checkout state, one per user, created lazily on first access.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Basket {
    pub id: i64,
    pub user_id: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// The single product the user intends to buy
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct BasketItem {
    pub id: i64,
    pub basket_id: i64,
    pub product_id: i64,
    pub quantity: i32,
}

/// A course run chosen for a multi-course program product
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct CourseRunSelection {
    pub id: i64,
    pub basket_id: i64,
    pub run_id: i64,
}

/// The coupon applied to the basket, if any
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct CouponSelection {
    pub id: i64,
    pub basket_id: i64,
    pub coupon_id: i64,
}

/// A data-consent agreement between a user and a sponsoring company.
/// consent_date is null until the user signs.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct DataConsent {
    pub id: i64,
    pub user_id: i32,
    pub company_id: i32,
    pub coupon_id: Option<i64>,
    pub consent_date: Option<DateTime<Utc>>,
}

/// Everything checkout needs, resolved and validated as one immutable
/// bundle. Built only by `validate_basket_for_checkout`.
#[derive(Debug, Clone)]
pub struct ValidatedBasket {
    pub basket: Basket,
    pub item: BasketItem,
    pub product: Product,
    pub product_version: ProductVersion,
    pub coupon_version: Option<CurrentCouponVersion>,
    pub run_ids: Vec<i64>,
    pub signed_consents: Vec<DataConsent>,
}

/// Request DTO for PATCH /api/basket. Absent fields are left untouched;
/// a null coupon_code clears the applied coupon.
#[derive(Debug, Deserialize, Validate)]
pub struct UpdateBasketRequest {
    pub product_id: Option<i64>,
    pub run_ids: Option<Vec<i64>>,
    #[serde(default, deserialize_with = "deserialize_explicit_null")]
    pub coupon_code: Option<Option<String>>,
}

fn deserialize_explicit_null<'de, D>(
    deserializer: D,
) -> Result<Option<Option<String>>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(Some(Option::<String>::deserialize(deserializer)?))
}

/// Response DTO for GET /api/basket
#[derive(Debug, Serialize)]
pub struct BasketResponse {
    pub basket: Basket,
    pub item: Option<BasketItem>,
    pub run_selections: Vec<CourseRunSelection>,
    pub coupon_code: Option<String>,
}
