// Fulfillment collaborators
//
// The order orchestrator talks to enrollment, CRM, and enrollment-code
// concerns through narrow traits so tests can substitute recording fakes
// and so none of these systems can reach back into order state.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use sqlx::PgPool;
use uuid::Uuid;

use crate::coupons::{CouponError, CouponType, CouponsRepository, NewPaymentVersion};
use crate::orders::Order;

/// Creates enrollment records for every purchased course run.
///
/// Implementations must tolerate individual run failures without aborting
/// the whole order: they report which runs succeeded and whether every run
/// succeeded.
#[async_trait]
pub trait EnrollmentSink: Send + Sync {
    /// When `keep_failed` is set, a run that could not be enrolled is
    /// recorded as an inactive enrollment so support can repair it later.
    async fn create_run_enrollments(
        &self,
        user_id: i32,
        run_ids: &[i64],
        order_id: i64,
        keep_failed: bool,
    ) -> (Vec<i64>, bool);
}

/// Notifies the CRM of a settled order. Fire-and-forget: implementations
/// must never propagate failures.
#[async_trait]
pub trait CrmSink: Send + Sync {
    async fn sync_deal(&self, order: &Order);
}

/// Issues single-use enrollment codes for a bulk (B2B) seat purchase.
#[async_trait]
pub trait EnrollmentCodeIssuer: Send + Sync {
    async fn issue_codes(
        &self,
        order: &Order,
        product_id: i64,
        num_seats: i32,
    ) -> Result<Vec<String>, CouponError>;
}

/// Writes enrollments straight to the database.
pub struct DbEnrollmentSink {
    pool: PgPool,
}

impl DbEnrollmentSink {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl EnrollmentSink for DbEnrollmentSink {
    async fn create_run_enrollments(
        &self,
        user_id: i32,
        run_ids: &[i64],
        order_id: i64,
        keep_failed: bool,
    ) -> (Vec<i64>, bool) {
        let mut successful = Vec::with_capacity(run_ids.len());
        let mut all_ok = true;

        for run_id in run_ids {
            let result = sqlx::query(
                r#"
                INSERT INTO enrollments (user_id, run_id, order_id)
                VALUES ($1, $2, $3)
                ON CONFLICT (user_id, run_id) DO NOTHING
                "#,
            )
            .bind(user_id)
            .bind(run_id)
            .bind(order_id)
            .execute(&self.pool)
            .await;

            match result {
                Ok(_) => successful.push(*run_id),
                Err(err) => {
                    all_ok = false;
                    tracing::error!(
                        "Enrollment failed for user {} run {} (order {}): {}",
                        user_id,
                        run_id,
                        order_id,
                        err
                    );
                    if keep_failed {
                        // Best effort; the failure above is already logged
                        let _ = sqlx::query(
                            r#"
                            INSERT INTO enrollments (user_id, run_id, order_id, active)
                            VALUES ($1, $2, $3, FALSE)
                            ON CONFLICT (user_id, run_id) DO NOTHING
                            "#,
                        )
                        .bind(user_id)
                        .bind(run_id)
                        .bind(order_id)
                        .execute(&self.pool)
                        .await;
                    }
                }
            }
        }

        (successful, all_ok)
    }
}

/// Stand-in CRM sink that records the sync intent in the logs. A real
/// deployment substitutes a client for the CRM's API behind the same trait.
pub struct LoggingCrmSink;

#[async_trait]
impl CrmSink for LoggingCrmSink {
    async fn sync_deal(&self, order: &Order) {
        tracing::info!(
            "CRM sync: order {} status {} total {}",
            order.id,
            order.status,
            order.total_price_paid
        );
    }
}

/// Issues enrollment codes as a batch of single-use, 100%-off coupons
/// scoped to the purchased product.
pub struct DbCouponCodeIssuer {
    coupons: CouponsRepository,
    code_expiration_days: i64,
}

impl DbCouponCodeIssuer {
    pub fn new(coupons: CouponsRepository) -> Self {
        Self {
            coupons,
            code_expiration_days: 365,
        }
    }
}

#[async_trait]
impl EnrollmentCodeIssuer for DbCouponCodeIssuer {
    async fn issue_codes(
        &self,
        order: &Order,
        product_id: i64,
        num_seats: i32,
    ) -> Result<Vec<String>, CouponError> {
        let codes: Vec<String> = (0..num_seats)
            .map(|_| Uuid::new_v4().simple().to_string())
            .collect();

        let version = NewPaymentVersion {
            coupon_type: CouponType::SingleUse,
            discount: Decimal::ONE,
            max_redemptions: 1,
            max_redemptions_per_user: 1,
            activation_date: None,
            expiration_date: Some(Utc::now() + Duration::days(self.code_expiration_days)),
            automatic: false,
            company_id: None,
            payment_type: Some("sales".to_string()),
            payment_transaction: Some(format!("order-{}", order.id)),
        };

        let name = format!("Enrollment codes for order {}", order.id);
        let (_, coupons) = self
            .coupons
            .create_batch(&name, &version, &codes, false, &[product_id])
            .await?;

        tracing::info!(
            "Issued {} enrollment code(s) for order {}",
            coupons.len(),
            order.id
        );
        Ok(coupons.into_iter().map(|c| c.coupon_code).collect())
    }
}
