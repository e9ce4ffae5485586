use chrono::{DateTime, Utc};
use sqlx::{PgConnection, PgPool};

use crate::basket::error::BasketError;
use crate::basket::models::{
    Basket, BasketItem, CouponSelection, CourseRunSelection, DataConsent,
};

/// Repository for pre-checkout basket state.
#[derive(Clone)]
pub struct BasketRepository {
    pool: PgPool,
}

impl BasketRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// The user's basket, created lazily on first access
    pub async fn get_or_create(&self, user_id: i32) -> Result<Basket, BasketError> {
        let basket = sqlx::query_as::<_, Basket>(
            r#"
            INSERT INTO baskets (user_id)
            VALUES ($1)
            ON CONFLICT (user_id) DO UPDATE SET updated_at = NOW()
            RETURNING id, user_id, created_at, updated_at
            "#,
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(basket)
    }

    pub async fn find_by_user(&self, user_id: i32) -> Result<Option<Basket>, BasketError> {
        let basket = sqlx::query_as::<_, Basket>(
            "SELECT id, user_id, created_at, updated_at FROM baskets WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(basket)
    }

    pub async fn items(&self, basket_id: i64) -> Result<Vec<BasketItem>, BasketError> {
        let items = sqlx::query_as::<_, BasketItem>(
            "SELECT id, basket_id, product_id, quantity FROM basket_items WHERE basket_id = $1",
        )
        .bind(basket_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(items)
    }

    pub async fn run_selections(
        &self,
        basket_id: i64,
    ) -> Result<Vec<CourseRunSelection>, BasketError> {
        let selections = sqlx::query_as::<_, CourseRunSelection>(
            "SELECT id, basket_id, run_id FROM course_run_selections WHERE basket_id = $1",
        )
        .bind(basket_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(selections)
    }

    pub async fn coupon_selection(
        &self,
        basket_id: i64,
    ) -> Result<Option<CouponSelection>, BasketError> {
        let selection = sqlx::query_as::<_, CouponSelection>(
            "SELECT id, basket_id, coupon_id FROM coupon_selections WHERE basket_id = $1",
        )
        .bind(basket_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(selection)
    }

    /// Replace the basket's single item. Run selections are cleared too,
    /// since they only make sense against the product they were made for.
    pub async fn replace_item(
        &self,
        basket_id: i64,
        product_id: i64,
    ) -> Result<BasketItem, BasketError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM basket_items WHERE basket_id = $1")
            .bind(basket_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM course_run_selections WHERE basket_id = $1")
            .bind(basket_id)
            .execute(&mut *tx)
            .await?;

        let item = sqlx::query_as::<_, BasketItem>(
            r#"
            INSERT INTO basket_items (basket_id, product_id)
            VALUES ($1, $2)
            RETURNING id, basket_id, product_id, quantity
            "#,
        )
        .bind(basket_id)
        .bind(product_id)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(item)
    }

    /// Replace the course-run selections wholesale
    pub async fn replace_run_selections(
        &self,
        basket_id: i64,
        run_ids: &[i64],
    ) -> Result<(), BasketError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM course_run_selections WHERE basket_id = $1")
            .bind(basket_id)
            .execute(&mut *tx)
            .await?;

        for run_id in run_ids {
            sqlx::query(
                r#"
                INSERT INTO course_run_selections (basket_id, run_id)
                VALUES ($1, $2)
                ON CONFLICT (basket_id, run_id) DO NOTHING
                "#,
            )
            .bind(basket_id)
            .bind(run_id)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    pub async fn set_coupon(&self, basket_id: i64, coupon_id: i64) -> Result<(), BasketError> {
        sqlx::query(
            r#"
            INSERT INTO coupon_selections (basket_id, coupon_id)
            VALUES ($1, $2)
            ON CONFLICT (basket_id) DO UPDATE SET coupon_id = EXCLUDED.coupon_id
            "#,
        )
        .bind(basket_id)
        .bind(coupon_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn clear_coupon(&self, basket_id: i64) -> Result<(), BasketError> {
        sqlx::query("DELETE FROM coupon_selections WHERE basket_id = $1")
            .bind(basket_id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Consent agreements between a user and a sponsoring company
    pub async fn consents(
        &self,
        user_id: i32,
        company_id: i32,
    ) -> Result<Vec<DataConsent>, BasketError> {
        let consents = sqlx::query_as::<_, DataConsent>(
            r#"
            SELECT id, user_id, company_id, coupon_id, consent_date
            FROM data_consents
            WHERE user_id = $1 AND company_id = $2
            "#,
        )
        .bind(user_id)
        .bind(company_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(consents)
    }

    /// Delete baskets untouched since `cutoff`, together with their items
    /// and selections. Rows are taken with SKIP LOCKED so concurrent cleanup
    /// runs never contend over the same basket. Returns how many baskets
    /// were removed.
    pub async fn delete_expired(&self, cutoff: DateTime<Utc>) -> Result<u64, BasketError> {
        let mut tx = self.pool.begin().await?;

        let expired: Vec<i64> = sqlx::query_scalar(
            r#"
            SELECT id FROM baskets
            WHERE updated_at < $1
            FOR UPDATE SKIP LOCKED
            "#,
        )
        .bind(cutoff)
        .fetch_all(&mut *tx)
        .await?;

        let mut deleted = 0u64;
        for basket_id in expired {
            clear_contents(&mut *tx, basket_id).await?;
            let result = sqlx::query("DELETE FROM baskets WHERE id = $1")
                .bind(basket_id)
                .execute(&mut *tx)
                .await?;
            deleted += result.rows_affected();
        }

        tx.commit().await?;
        Ok(deleted)
    }
}

/// Delete a basket's items, run selections, and coupon selection on the
/// caller's connection, so the clear commits or rolls back with whatever
/// transaction the caller is running. The basket row itself survives.
pub async fn clear_contents(
    conn: &mut PgConnection,
    basket_id: i64,
) -> Result<(), sqlx::Error> {
    sqlx::query("DELETE FROM basket_items WHERE basket_id = $1")
        .bind(basket_id)
        .execute(&mut *conn)
        .await?;
    sqlx::query("DELETE FROM course_run_selections WHERE basket_id = $1")
        .bind(basket_id)
        .execute(&mut *conn)
        .await?;
    sqlx::query("DELETE FROM coupon_selections WHERE basket_id = $1")
        .bind(basket_id)
        .execute(&mut *conn)
        .await?;

    Ok(())
}
