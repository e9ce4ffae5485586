use uuid::Uuid;
use validator::Validate;

use crate::audit;
use crate::coupons::error::CouponError;
use crate::coupons::models::{
    AssignCouponRequest, Coupon, CouponBatchResponse, CreateCouponBatchRequest,
    ProductCouponAssignment, UpdateCouponRequest,
};
use crate::coupons::repository::{CouponsRepository, NewPaymentVersion};

/// Service for coupon administration: batch creation and audited
/// enable/disable. Read-side lookups live on the eligibility engine.
#[derive(Clone)]
pub struct CouponService {
    repository: CouponsRepository,
}

impl CouponService {
    pub fn new(repository: CouponsRepository) -> Self {
        Self { repository }
    }

    /// Create a batch of sibling coupons under one payment.
    ///
    /// When `coupon_code` is given the batch must be of size one; otherwise
    /// codes are generated. Codes are immutable once assigned.
    pub async fn create_batch(
        &self,
        request: CreateCouponBatchRequest,
    ) -> Result<CouponBatchResponse, CouponError> {
        request
            .validate()
            .map_err(|e| CouponError::ValidationError(e.to_string()))?;

        if request.coupon_code.is_some() && request.num_coupon_codes != 1 {
            return Err(CouponError::ValidationError(
                "An explicit coupon code requires num_coupon_codes = 1".to_string(),
            ));
        }

        let codes: Vec<String> = match &request.coupon_code {
            Some(code) => {
                crate::validation::validate_coupon_code(code)
                    .map_err(|e| CouponError::ValidationError(e.to_string()))?;
                vec![code.clone()]
            }
            None => (0..request.num_coupon_codes)
                .map(|_| Uuid::new_v4().simple().to_string())
                .collect(),
        };

        let version = NewPaymentVersion {
            coupon_type: request.coupon_type,
            discount: request.discount,
            max_redemptions: request.max_redemptions,
            max_redemptions_per_user: request.max_redemptions_per_user,
            activation_date: request.activation_date,
            expiration_date: request.expiration_date,
            automatic: request.automatic,
            company_id: request.company_id,
            payment_type: request.payment_type.clone(),
            payment_transaction: request.payment_transaction.clone(),
        };

        let (payment, coupons) = self
            .repository
            .create_batch(
                &request.name,
                &version,
                &codes,
                request.is_global,
                &request.product_ids,
            )
            .await?;

        Ok(CouponBatchResponse {
            payment,
            codes: coupons.into_iter().map(|c| c.coupon_code).collect(),
        })
    }

    /// Assign a coupon to invitee emails for a sponsored bulk purchase.
    /// Assignments are marked redeemed when a matching order settles.
    pub async fn assign_emails(
        &self,
        coupon_id: i64,
        request: AssignCouponRequest,
    ) -> Result<Vec<ProductCouponAssignment>, CouponError> {
        request
            .validate()
            .map_err(|e| CouponError::ValidationError(e.to_string()))?;

        self.repository
            .find_by_id(coupon_id)
            .await?
            .ok_or(CouponError::NotFound)?;

        self.repository
            .create_assignments(coupon_id, &request.emails)
            .await
    }

    /// Enable or disable a coupon, writing a before/after audit row in the
    /// same transaction as the change.
    pub async fn set_enabled(
        &self,
        coupon_id: i64,
        request: UpdateCouponRequest,
        acting_user_id: Option<i32>,
    ) -> Result<Coupon, CouponError> {
        let mut tx = self.repository.pool().begin().await?;

        let before = sqlx::query_as::<_, Coupon>(
            r#"
            SELECT id, payment_id, coupon_code, is_global, enabled, include_future_runs, created_at
            FROM coupons
            WHERE id = $1
            FOR UPDATE
            "#,
        )
        .bind(coupon_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(CouponError::NotFound)?;

        let after = sqlx::query_as::<_, Coupon>(
            r#"
            UPDATE coupons SET enabled = $2
            WHERE id = $1
            RETURNING id, payment_id, coupon_code, is_global, enabled, include_future_runs, created_at
            "#,
        )
        .bind(coupon_id)
        .bind(request.enabled)
        .fetch_one(&mut *tx)
        .await?;

        let before_json = serde_json::to_value(&before)
            .map_err(|e| CouponError::DatabaseError(e.to_string()))?;
        let after_json = serde_json::to_value(&after)
            .map_err(|e| CouponError::DatabaseError(e.to_string()))?;
        audit::log_coupon_audit(&mut *tx, coupon_id, acting_user_id, Some(before_json), after_json)
            .await?;

        tx.commit().await?;

        tracing::info!(
            "Coupon {} ({}) set enabled={}",
            after.id,
            after.coupon_code,
            after.enabled
        );
        Ok(after)
    }
}
