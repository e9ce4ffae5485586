use chrono::{DateTime, Utc};

use crate::coupons::error::CouponError;
use crate::coupons::models::CurrentCouponVersion;
use crate::coupons::repository::CouponsRepository;

/// Optional narrowing filters for a coupon lookup
#[derive(Debug, Clone, Default)]
pub struct CouponFilters {
    /// Only coupons flagged for automatic application
    pub auto_only: bool,
    /// Exact-match on the coupon code
    pub code: Option<String>,
    /// Only 100%-off coupons
    pub full_discount: bool,
    /// Only coupons issued by this company
    pub company_id: Option<i32>,
}

/// Whether one candidate version survives the pure (non-database) filters.
/// Redemption-limit checks need counts and are applied by the engine.
fn passes_filters(version: &CurrentCouponVersion, filters: &CouponFilters, now: DateTime<Utc>) -> bool {
    if !version.is_active_at(now) {
        return false;
    }
    if filters.auto_only && !version.automatic {
        return false;
    }
    if let Some(code) = &filters.code {
        if version.coupon_code != *code {
            return false;
        }
    }
    if filters.full_discount && !version.is_full_discount() {
        return false;
    }
    if let Some(company_id) = filters.company_id {
        if version.company_id != Some(company_id) {
            return false;
        }
    }
    true
}

/// Determines which coupons apply to a product for a user, enforcing
/// activation windows and redemption limits. Pure reads only.
#[derive(Clone)]
pub struct CouponEngine {
    repository: CouponsRepository,
}

impl CouponEngine {
    pub fn new(repository: CouponsRepository) -> Self {
        Self { repository }
    }

    /// Valid coupon versions for a product and user, best discount first.
    ///
    /// Candidates are the product-specific coupons plus the global ones,
    /// each at its most recent version. A candidate is dropped when its
    /// activation/expiration window does not contain now, when the user has
    /// exhausted `max_redemptions_per_user`, or when the coupon overall has
    /// exhausted `max_redemptions`. Only fulfilled and refunded orders count
    /// against the limits; pending orders do not reserve a slot.
    pub async fn get_valid_coupon_versions(
        &self,
        product_id: i64,
        user_id: i32,
        filters: &CouponFilters,
    ) -> Result<Vec<CurrentCouponVersion>, CouponError> {
        let now = Utc::now();
        let candidates = self
            .repository
            .candidate_versions_for_product(product_id)
            .await?;

        let mut valid = Vec::new();
        for version in candidates {
            if !passes_filters(&version, filters, now) {
                continue;
            }

            let total = self
                .repository
                .successful_redemption_count(version.coupon_id)
                .await?;
            if total >= i64::from(version.max_redemptions) {
                continue;
            }

            let by_user = self
                .repository
                .user_redemption_count(version.coupon_id, user_id)
                .await?;
            if by_user >= i64::from(version.max_redemptions_per_user) {
                continue;
            }

            valid.push(version);
        }

        valid.sort_by(|a, b| b.discount.cmp(&a.discount));
        Ok(valid)
    }

    /// The single best applicable coupon version, or None
    pub async fn best_coupon_for_product(
        &self,
        product_id: i64,
        user_id: i32,
        filters: &CouponFilters,
    ) -> Result<Option<CurrentCouponVersion>, CouponError> {
        let mut versions = self
            .get_valid_coupon_versions(product_id, user_id, filters)
            .await?;
        if versions.is_empty() {
            Ok(None)
        } else {
            Ok(Some(versions.remove(0)))
        }
    }

    /// Resolve a code the user typed against a product. Distinguishes a
    /// nonexistent code from one that exists but does not currently apply.
    pub async fn resolve_code_for_product(
        &self,
        code: &str,
        product_id: i64,
        user_id: i32,
    ) -> Result<CurrentCouponVersion, CouponError> {
        let coupon = self
            .repository
            .find_by_code(code)
            .await?
            .ok_or(CouponError::NotFound)?;

        let filters = CouponFilters {
            code: Some(code.to_string()),
            ..Default::default()
        };
        let versions = self
            .get_valid_coupon_versions(product_id, user_id, &filters)
            .await?;

        versions
            .into_iter()
            .find(|v| v.coupon_id == coupon.id)
            .ok_or(CouponError::NotEligible {
                code: code.to_string(),
                product_id,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coupons::models::CouponType;
    use chrono::Duration;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    fn version(code: &str, discount: Decimal) -> CurrentCouponVersion {
        CurrentCouponVersion {
            coupon_id: 1,
            coupon_code: code.to_string(),
            is_global: false,
            version_id: 1,
            payment_version_id: 1,
            coupon_type: CouponType::Promo,
            discount,
            max_redemptions: 10,
            max_redemptions_per_user: 1,
            activation_date: None,
            expiration_date: None,
            automatic: false,
            company_id: None,
        }
    }

    #[test]
    fn test_default_filters_accept_active_coupon() {
        let now = Utc::now();
        let v = version("SAVE25", dec!(0.25));
        assert!(passes_filters(&v, &CouponFilters::default(), now));
    }

    #[test]
    fn test_expired_coupon_rejected() {
        let now = Utc::now();
        let mut v = version("SAVE25", dec!(0.25));
        v.expiration_date = Some(now - Duration::minutes(1));
        assert!(!passes_filters(&v, &CouponFilters::default(), now));
    }

    #[test]
    fn test_auto_only_excludes_manual_coupons() {
        let now = Utc::now();
        let v = version("SAVE25", dec!(0.25));
        let filters = CouponFilters {
            auto_only: true,
            ..Default::default()
        };
        assert!(!passes_filters(&v, &filters, now));

        let mut auto = version("AUTO25", dec!(0.25));
        auto.automatic = true;
        assert!(passes_filters(&auto, &filters, now));
    }

    #[test]
    fn test_code_filter_is_exact_match() {
        let now = Utc::now();
        let v = version("SAVE25", dec!(0.25));
        let matching = CouponFilters {
            code: Some("SAVE25".to_string()),
            ..Default::default()
        };
        let wrong = CouponFilters {
            code: Some("save25".to_string()),
            ..Default::default()
        };
        assert!(passes_filters(&v, &matching, now));
        assert!(!passes_filters(&v, &wrong, now));
    }

    #[test]
    fn test_full_discount_filter() {
        let now = Utc::now();
        let filters = CouponFilters {
            full_discount: true,
            ..Default::default()
        };
        assert!(!passes_filters(&version("HALF", dec!(0.5)), &filters, now));
        assert!(passes_filters(&version("FREE", dec!(1)), &filters, now));
    }

    #[test]
    fn test_company_filter() {
        let now = Utc::now();
        let filters = CouponFilters {
            company_id: Some(7),
            ..Default::default()
        };
        let unaffiliated = version("SAVE25", dec!(0.25));
        assert!(!passes_filters(&unaffiliated, &filters, now));

        let mut affiliated = version("CORP25", dec!(0.25));
        affiliated.company_id = Some(7);
        assert!(passes_filters(&affiliated, &filters, now));

        let mut other_company = version("OTHER25", dec!(0.25));
        other_company.company_id = Some(8);
        assert!(!passes_filters(&other_company, &filters, now));
    }

    #[test]
    fn test_descending_discount_order() {
        let mut versions = vec![
            version("TEN", dec!(0.10)),
            version("FIFTY", dec!(0.50)),
            version("TWENTY", dec!(0.20)),
        ];
        versions.sort_by(|a, b| b.discount.cmp(&a.discount));
        let codes: Vec<_> = versions.iter().map(|v| v.coupon_code.as_str()).collect();
        assert_eq!(codes, vec!["FIFTY", "TWENTY", "TEN"]);
    }
}
