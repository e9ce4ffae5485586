use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::coupons::error::CouponError;
use crate::coupons::models::{
    Coupon, CouponPayment, CouponPaymentVersion, CurrentCouponVersion,
    ProductCouponAssignment,
};

const CURRENT_VERSION_COLUMNS: &str = r#"
    c.id AS coupon_id,
    c.coupon_code,
    c.is_global,
    cv.id AS version_id,
    cv.payment_version_id,
    pv.coupon_type,
    pv.discount,
    pv.max_redemptions,
    pv.max_redemptions_per_user,
    pv.activation_date,
    pv.expiration_date,
    pv.automatic,
    pv.company_id
"#;

/// Repository for coupons, their append-only versions, eligibilities,
/// redemptions, and bulk assignments.
#[derive(Clone)]
pub struct CouponsRepository {
    pool: PgPool,
}

impl CouponsRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Find a coupon by its code
    pub async fn find_by_code(&self, code: &str) -> Result<Option<Coupon>, CouponError> {
        let coupon = sqlx::query_as::<_, Coupon>(
            r#"
            SELECT id, payment_id, coupon_code, is_global, enabled, include_future_runs, created_at
            FROM coupons
            WHERE coupon_code = $1
            "#,
        )
        .bind(code)
        .fetch_optional(&self.pool)
        .await?;

        Ok(coupon)
    }

    /// Find a coupon by ID
    pub async fn find_by_id(&self, id: i64) -> Result<Option<Coupon>, CouponError> {
        let coupon = sqlx::query_as::<_, Coupon>(
            r#"
            SELECT id, payment_id, coupon_code, is_global, enabled, include_future_runs, created_at
            FROM coupons
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(coupon)
    }

    /// Candidate coupons for a product: the union of product-specific
    /// coupons (via the eligibility join) and global coupons, each carrying
    /// its most recent version. Disabled coupons are excluded at the source.
    pub async fn candidate_versions_for_product(
        &self,
        product_id: i64,
    ) -> Result<Vec<CurrentCouponVersion>, CouponError> {
        let query = format!(
            r#"
            SELECT DISTINCT ON (c.id) {CURRENT_VERSION_COLUMNS}
            FROM coupons c
            JOIN coupon_versions cv ON cv.coupon_id = c.id
            JOIN coupon_payment_versions pv ON pv.id = cv.payment_version_id
            WHERE c.enabled
              AND (c.is_global OR EXISTS (
                  SELECT 1 FROM coupon_eligibilities e
                  WHERE e.coupon_id = c.id AND e.product_id = $1
              ))
            ORDER BY c.id, cv.version_seq DESC
            "#
        );

        let versions = sqlx::query_as::<_, CurrentCouponVersion>(&query)
            .bind(product_id)
            .fetch_all(&self.pool)
            .await?;

        Ok(versions)
    }

    /// The most recent version of one coupon, with its governing terms
    pub async fn current_version(
        &self,
        coupon_id: i64,
    ) -> Result<Option<CurrentCouponVersion>, CouponError> {
        let query = format!(
            r#"
            SELECT {CURRENT_VERSION_COLUMNS}
            FROM coupons c
            JOIN coupon_versions cv ON cv.coupon_id = c.id
            JOIN coupon_payment_versions pv ON pv.id = cv.payment_version_id
            WHERE c.id = $1
            ORDER BY cv.version_seq DESC
            LIMIT 1
            "#
        );

        let version = sqlx::query_as::<_, CurrentCouponVersion>(&query)
            .bind(coupon_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(version)
    }

    /// Successful (fulfilled or refunded) redemptions across every version
    /// of a coupon. Pending "created" orders do not reserve a slot; limits
    /// are enforced at settlement time.
    pub async fn successful_redemption_count(&self, coupon_id: i64) -> Result<i64, CouponError> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*)
            FROM coupon_redemptions r
            JOIN coupon_versions cv ON cv.id = r.coupon_version_id
            JOIN orders o ON o.id = r.order_id
            WHERE cv.coupon_id = $1 AND o.status IN ('fulfilled', 'refunded')
            "#,
        )
        .bind(coupon_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(count)
    }

    /// Successful redemptions of a coupon by one user
    pub async fn user_redemption_count(
        &self,
        coupon_id: i64,
        user_id: i32,
    ) -> Result<i64, CouponError> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*)
            FROM coupon_redemptions r
            JOIN coupon_versions cv ON cv.id = r.coupon_version_id
            JOIN orders o ON o.id = r.order_id
            WHERE cv.coupon_id = $1
              AND o.purchaser_id = $2
              AND o.status IN ('fulfilled', 'refunded')
            "#,
        )
        .bind(coupon_id)
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(count)
    }

    /// Create a payment, its first terms version, N sibling coupons, their
    /// first coupon versions, and eligibility rows, all in one transaction.
    #[allow(clippy::too_many_arguments)]
    pub async fn create_batch(
        &self,
        name: &str,
        version: &NewPaymentVersion,
        codes: &[String],
        is_global: bool,
        product_ids: &[i64],
    ) -> Result<(CouponPayment, Vec<Coupon>), CouponError> {
        let mut tx = self.pool.begin().await?;

        let payment = sqlx::query_as::<_, CouponPayment>(
            r#"
            INSERT INTO coupon_payments (name)
            VALUES ($1)
            RETURNING id, name, created_at
            "#,
        )
        .bind(name)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db) if db.is_unique_violation() => {
                CouponError::DuplicateCode(name.to_string())
            }
            other => CouponError::DatabaseError(other.to_string()),
        })?;

        let payment_version = sqlx::query_as::<_, CouponPaymentVersion>(
            r#"
            INSERT INTO coupon_payment_versions
                (payment_id, version_seq, coupon_type, discount, max_redemptions,
                 max_redemptions_per_user, activation_date, expiration_date, automatic,
                 company_id, payment_type, payment_transaction)
            VALUES ($1, 1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            RETURNING id, payment_id, version_seq, coupon_type, discount, max_redemptions,
                      max_redemptions_per_user, activation_date, expiration_date, automatic,
                      company_id, payment_type, payment_transaction, created_at
            "#,
        )
        .bind(payment.id)
        .bind(version.coupon_type)
        .bind(version.discount)
        .bind(version.max_redemptions)
        .bind(version.max_redemptions_per_user)
        .bind(version.activation_date)
        .bind(version.expiration_date)
        .bind(version.automatic)
        .bind(version.company_id)
        .bind(&version.payment_type)
        .bind(&version.payment_transaction)
        .fetch_one(&mut *tx)
        .await?;

        let mut coupons = Vec::with_capacity(codes.len());
        for code in codes {
            let coupon = sqlx::query_as::<_, Coupon>(
                r#"
                INSERT INTO coupons (payment_id, coupon_code, is_global)
                VALUES ($1, $2, $3)
                RETURNING id, payment_id, coupon_code, is_global, enabled, include_future_runs, created_at
                "#,
            )
            .bind(payment.id)
            .bind(code)
            .bind(is_global)
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| match e {
                sqlx::Error::Database(ref db) if db.is_unique_violation() => {
                    CouponError::DuplicateCode(code.clone())
                }
                other => CouponError::DatabaseError(other.to_string()),
            })?;

            sqlx::query(
                r#"
                INSERT INTO coupon_versions (coupon_id, payment_version_id, version_seq)
                VALUES ($1, $2, 1)
                "#,
            )
            .bind(coupon.id)
            .bind(payment_version.id)
            .execute(&mut *tx)
            .await?;

            for product_id in product_ids {
                sqlx::query(
                    r#"
                    INSERT INTO coupon_eligibilities (coupon_id, product_id)
                    VALUES ($1, $2)
                    ON CONFLICT (coupon_id, product_id) DO NOTHING
                    "#,
                )
                .bind(coupon.id)
                .bind(product_id)
                .execute(&mut *tx)
                .await?;
            }

            coupons.push(coupon);
        }

        tx.commit().await?;

        tracing::info!(
            "Created coupon batch '{}' with {} code(s)",
            name,
            coupons.len()
        );
        Ok((payment, coupons))
    }

    /// Record sponsorship assignments of a coupon to invitee emails
    pub async fn create_assignments(
        &self,
        coupon_id: i64,
        emails: &[String],
    ) -> Result<Vec<ProductCouponAssignment>, CouponError> {
        let mut tx = self.pool.begin().await?;
        let mut assignments = Vec::with_capacity(emails.len());

        for email in emails {
            let assignment = sqlx::query_as::<_, ProductCouponAssignment>(
                r#"
                INSERT INTO product_coupon_assignments (coupon_id, email)
                VALUES ($1, $2)
                RETURNING id, coupon_id, email, redeemed, created_at
                "#,
            )
            .bind(coupon_id)
            .bind(email)
            .fetch_one(&mut *tx)
            .await?;
            assignments.push(assignment);
        }

        tx.commit().await?;
        Ok(assignments)
    }

    /// Mark the assignments matching (coupon, email) as redeemed.
    ///
    /// Rows are locked with SELECT ... FOR UPDATE so two concurrent
    /// redemption completions cannot double-credit the same assignment.
    /// Returns the number of assignments newly marked.
    pub async fn mark_assignments_redeemed(
        &self,
        coupon_id: i64,
        email: &str,
    ) -> Result<u64, CouponError> {
        let mut tx = self.pool.begin().await?;

        let ids: Vec<i64> = sqlx::query_scalar(
            r#"
            SELECT id FROM product_coupon_assignments
            WHERE coupon_id = $1 AND email = $2 AND NOT redeemed
            FOR UPDATE
            "#,
        )
        .bind(coupon_id)
        .bind(email)
        .fetch_all(&mut *tx)
        .await?;

        let mut marked = 0u64;
        for id in ids {
            let result = sqlx::query(
                "UPDATE product_coupon_assignments SET redeemed = TRUE WHERE id = $1",
            )
            .bind(id)
            .execute(&mut *tx)
            .await?;
            marked += result.rows_affected();
        }

        tx.commit().await?;
        Ok(marked)
    }
}

/// Terms for a new coupon payment version
#[derive(Debug, Clone)]
pub struct NewPaymentVersion {
    pub coupon_type: crate::coupons::models::CouponType,
    pub discount: rust_decimal::Decimal,
    pub max_redemptions: i32,
    pub max_redemptions_per_user: i32,
    pub activation_date: Option<DateTime<Utc>>,
    pub expiration_date: Option<DateTime<Utc>>,
    pub automatic: bool,
    pub company_id: Option<i32>,
    pub payment_type: Option<String>,
    pub payment_transaction: Option<String>,
}
