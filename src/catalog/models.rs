use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;
use validator::Validate;

/// Discriminant for the content object a product sells.
///
/// Every call site must match exhaustively; there is no dynamic fallthrough
/// for unknown content kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, ToSchema)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ContentKind {
    CourseRun,
    Program,
}

impl ContentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentKind::CourseRun => "course_run",
            ContentKind::Program => "program",
        }
    }
}

impl std::fmt::Display for ContentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A purchasable thing: one course run or one program.
/// At most one product exists per (content_kind, content_id) pair.
/// Products are never deleted, only deactivated.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, ToSchema)]
pub struct Product {
    pub id: i64,
    pub content_kind: ContentKind,
    pub content_id: i64,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

/// Append-only price/description snapshot for a product.
///
/// The current version is the row with the highest version_seq; rows are
/// never updated or deleted (enforced by a database trigger as well as by
/// the repository exposing no mutation methods).
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, ToSchema)]
pub struct ProductVersion {
    pub id: i64,
    pub product_id: i64,
    pub version_seq: i32,
    #[schema(value_type = f64)]
    pub price: Decimal,
    pub description: String,
    pub text_id: String,
    pub created_at: DateTime<Utc>,
}

/// A course; belongs to a program when program_id is set.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Course {
    pub id: i64,
    pub program_id: Option<i64>,
    pub title: String,
    pub readable_id: String,
    pub is_live: bool,
}

/// A scheduled run of a course, with its enrollment window.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct CourseRun {
    pub id: i64,
    pub course_id: i64,
    pub title: String,
    pub courseware_id: String,
    pub enrollment_start: Option<DateTime<Utc>>,
    pub enrollment_end: Option<DateTime<Utc>>,
    pub is_live: bool,
}

impl CourseRun {
    /// A run is open for enrollment when its window contains `now`.
    /// An absent bound means the window is open on that side.
    pub fn is_unexpired(&self, now: DateTime<Utc>) -> bool {
        let started = self.enrollment_start.map_or(true, |start| start <= now);
        let not_ended = self.enrollment_end.map_or(true, |end| end > now);
        started && not_ended
    }
}

/// Request DTO for creating a product
#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct CreateProductRequest {
    pub content_kind: ContentKind,
    pub content_id: i64,
}

/// Request DTO for appending a new product version
#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct CreateProductVersionRequest {
    #[validate(custom = "crate::validation::validate_price")]
    #[schema(value_type = f64)]
    pub price: Decimal,
    #[serde(default)]
    pub description: String,
}

/// Response DTO bundling a product with its current version
#[derive(Debug, Serialize, ToSchema)]
pub struct ProductResponse {
    pub id: i64,
    pub content_kind: ContentKind,
    pub content_id: i64,
    pub is_active: bool,
    pub latest_version: Option<ProductVersion>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn run_with_window(
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> CourseRun {
        CourseRun {
            id: 1,
            course_id: 1,
            title: "Run".to_string(),
            courseware_id: "course-v1:run".to_string(),
            enrollment_start: start,
            enrollment_end: end,
            is_live: true,
        }
    }

    #[test]
    fn test_open_ended_window_is_unexpired() {
        let now = Utc::now();
        assert!(run_with_window(None, None).is_unexpired(now));
    }

    #[test]
    fn test_past_enrollment_end_is_expired() {
        let now = Utc::now();
        let run = run_with_window(None, Some(now - Duration::days(1)));
        assert!(!run.is_unexpired(now));
    }

    #[test]
    fn test_future_enrollment_start_is_not_yet_open() {
        let now = Utc::now();
        let run = run_with_window(Some(now + Duration::days(1)), None);
        assert!(!run.is_unexpired(now));
    }

    #[test]
    fn test_window_containing_now_is_open() {
        let now = Utc::now();
        let run = run_with_window(
            Some(now - Duration::days(1)),
            Some(now + Duration::days(1)),
        );
        assert!(run.is_unexpired(now));
    }
}
