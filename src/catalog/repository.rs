use rust_decimal::Decimal;
use sqlx::PgPool;

use crate::catalog::error::CatalogError;
use crate::catalog::models::{ContentKind, Course, CourseRun, Product, ProductVersion};

/// Repository for products, versions, and the underlying content objects.
///
/// Version rows form an append-only ledger: this repository deliberately
/// exposes no update or delete methods for them, and the database rejects
/// mutation with a trigger even if one sneaks in.
#[derive(Clone)]
pub struct CatalogRepository {
    pool: PgPool,
}

impl CatalogRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Find a product by ID
    pub async fn find_product(&self, id: i64) -> Result<Option<Product>, CatalogError> {
        let product = sqlx::query_as::<_, Product>(
            "SELECT id, content_kind, content_id, is_active, created_at FROM products WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(product)
    }

    /// List all products
    pub async fn list_products(&self) -> Result<Vec<Product>, CatalogError> {
        let products = sqlx::query_as::<_, Product>(
            "SELECT id, content_kind, content_id, is_active, created_at FROM products ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(products)
    }

    /// Create a product for a content object.
    /// Rejects duplicates per the one-product-per-content-object invariant.
    pub async fn create_product(
        &self,
        kind: ContentKind,
        content_id: i64,
    ) -> Result<Product, CatalogError> {
        // The content object must exist before it can be sold
        let exists = match kind {
            ContentKind::CourseRun => {
                sqlx::query_scalar::<_, bool>(
                    "SELECT EXISTS(SELECT 1 FROM course_runs WHERE id = $1)",
                )
                .bind(content_id)
                .fetch_one(&self.pool)
                .await?
            }
            ContentKind::Program => {
                sqlx::query_scalar::<_, bool>(
                    "SELECT EXISTS(SELECT 1 FROM programs WHERE id = $1)",
                )
                .bind(content_id)
                .fetch_one(&self.pool)
                .await?
            }
        };
        if !exists {
            return Err(CatalogError::ContentNotFound {
                kind: kind.to_string(),
                id: content_id,
            });
        }

        let product = sqlx::query_as::<_, Product>(
            r#"
            INSERT INTO products (content_kind, content_id)
            VALUES ($1, $2)
            ON CONFLICT (content_kind, content_id) DO NOTHING
            RETURNING id, content_kind, content_id, is_active, created_at
            "#,
        )
        .bind(kind)
        .bind(content_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(CatalogError::DuplicateProduct {
            kind: kind.to_string(),
            id: content_id,
        })?;

        Ok(product)
    }

    /// Most-recently-appended version for a product, by monotonic sequence
    pub async fn latest_version(
        &self,
        product_id: i64,
    ) -> Result<Option<ProductVersion>, CatalogError> {
        let version = sqlx::query_as::<_, ProductVersion>(
            r#"
            SELECT id, product_id, version_seq, price, description, text_id, created_at
            FROM product_versions
            WHERE product_id = $1
            ORDER BY version_seq DESC
            LIMIT 1
            "#,
        )
        .bind(product_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(version)
    }

    /// Find a specific version row by its ID
    pub async fn find_version(&self, id: i64) -> Result<Option<ProductVersion>, CatalogError> {
        let version = sqlx::query_as::<_, ProductVersion>(
            r#"
            SELECT id, product_id, version_seq, price, description, text_id, created_at
            FROM product_versions
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(version)
    }

    /// Append a new version for a product.
    ///
    /// The product row is locked for the duration of the transaction so
    /// concurrent appends cannot allocate the same version_seq. The text_id
    /// is mirrored from the content object at append time.
    pub async fn create_version(
        &self,
        product_id: i64,
        price: Decimal,
        description: &str,
    ) -> Result<ProductVersion, CatalogError> {
        let mut tx = self.pool.begin().await?;

        let product = sqlx::query_as::<_, Product>(
            r#"
            SELECT id, content_kind, content_id, is_active, created_at
            FROM products
            WHERE id = $1
            FOR UPDATE
            "#,
        )
        .bind(product_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(CatalogError::ProductNotFound(product_id))?;

        let text_id: Option<String> = match product.content_kind {
            ContentKind::CourseRun => {
                sqlx::query_scalar("SELECT courseware_id FROM course_runs WHERE id = $1")
                    .bind(product.content_id)
                    .fetch_optional(&mut *tx)
                    .await?
            }
            ContentKind::Program => {
                sqlx::query_scalar("SELECT readable_id FROM programs WHERE id = $1")
                    .bind(product.content_id)
                    .fetch_optional(&mut *tx)
                    .await?
            }
        };
        let text_id = text_id.ok_or(CatalogError::ContentNotFound {
            kind: product.content_kind.to_string(),
            id: product.content_id,
        })?;

        let next_seq: i32 = sqlx::query_scalar(
            "SELECT COALESCE(MAX(version_seq), 0) + 1 FROM product_versions WHERE product_id = $1",
        )
        .bind(product_id)
        .fetch_one(&mut *tx)
        .await?;

        let version = sqlx::query_as::<_, ProductVersion>(
            r#"
            INSERT INTO product_versions (product_id, version_seq, price, description, text_id)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id, product_id, version_seq, price, description, text_id, created_at
            "#,
        )
        .bind(product_id)
        .bind(next_seq)
        .bind(price)
        .bind(description)
        .bind(&text_id)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        tracing::info!(
            "Appended version {} for product {} at price {}",
            version.version_seq,
            product_id,
            version.price
        );
        Ok(version)
    }

    /// Whether the product's underlying content object is live
    pub async fn is_content_live(&self, product: &Product) -> Result<bool, CatalogError> {
        let live = match product.content_kind {
            ContentKind::CourseRun => {
                sqlx::query_scalar::<_, Option<bool>>(
                    "SELECT is_live FROM course_runs WHERE id = $1",
                )
                .bind(product.content_id)
                .fetch_optional(&self.pool)
                .await?
                .flatten()
            }
            ContentKind::Program => {
                sqlx::query_scalar::<_, Option<bool>>(
                    "SELECT is_live FROM programs WHERE id = $1",
                )
                .bind(product.content_id)
                .fetch_optional(&self.pool)
                .await?
                .flatten()
            }
        };

        Ok(live.unwrap_or(false))
    }

    /// Constituent courses of a program
    pub async fn program_courses(&self, program_id: i64) -> Result<Vec<Course>, CatalogError> {
        let courses = sqlx::query_as::<_, Course>(
            r#"
            SELECT id, program_id, title, readable_id, is_live
            FROM courses
            WHERE program_id = $1
            ORDER BY id
            "#,
        )
        .bind(program_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(courses)
    }

    /// Fetch course runs by IDs
    pub async fn runs_by_ids(&self, ids: &[i64]) -> Result<Vec<CourseRun>, CatalogError> {
        let runs = sqlx::query_as::<_, CourseRun>(
            r#"
            SELECT id, course_id, title, courseware_id, enrollment_start, enrollment_end, is_live
            FROM course_runs
            WHERE id = ANY($1)
            ORDER BY id
            "#,
        )
        .bind(ids)
        .fetch_all(&self.pool)
        .await?;

        Ok(runs)
    }

    /// Fetch a single course run
    pub async fn find_run(&self, id: i64) -> Result<Option<CourseRun>, CatalogError> {
        let run = sqlx::query_as::<_, CourseRun>(
            r#"
            SELECT id, course_id, title, courseware_id, enrollment_start, enrollment_end, is_live
            FROM course_runs
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(run)
    }

    /// Run IDs a user already holds an active enrollment for, out of `run_ids`
    pub async fn enrolled_run_ids(
        &self,
        user_id: i32,
        run_ids: &[i64],
    ) -> Result<Vec<i64>, CatalogError> {
        let ids = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT run_id FROM enrollments
            WHERE user_id = $1 AND active AND run_id = ANY($2)
            ORDER BY run_id
            "#,
        )
        .bind(user_id)
        .bind(run_ids)
        .fetch_all(&self.pool)
        .await?;

        Ok(ids)
    }
}
