use rust_decimal::{Decimal, RoundingStrategy};

use crate::catalog::ProductVersion;
use crate::coupons::CurrentCouponVersion;

/// Computes discounted prices with fixed rounding semantics.
///
/// Rounding is round-half-up to 2 decimal places (MidpointAwayFromZero),
/// not banker's rounding. The results feed the payment gateway, so they
/// must be bit-exact and reproducible.
pub struct PriceCalculator;

impl PriceCalculator {
    /// The discount amount for a fractional discount applied to a price
    pub fn discount_amount(discount_fraction: Decimal, price: Decimal) -> Decimal {
        (discount_fraction * price)
            .round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
    }

    /// The price of a product version after the coupon's discount.
    ///
    /// The discount applies only when the coupon is global or specifically
    /// eligible for this exact product; otherwise the price is unchanged.
    /// Callers resolve eligibility and pass it in so this stays a pure
    /// function.
    pub fn price_with_discount(
        version: &ProductVersion,
        coupon_version: Option<&CurrentCouponVersion>,
        coupon_applies: bool,
    ) -> Decimal {
        match coupon_version {
            Some(coupon) if coupon_applies => {
                version.price - Self::discount_amount(coupon.discount, version.price)
            }
            _ => version.price,
        }
    }

    /// Total for a multi-seat purchase at a given unit price
    pub fn bulk_total(unit_price: Decimal, num_seats: i32) -> Decimal {
        (unit_price * Decimal::from(num_seats))
            .round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coupons::CouponType;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn version_with_price(price: Decimal) -> ProductVersion {
        ProductVersion {
            id: 1,
            product_id: 1,
            version_seq: 1,
            price,
            description: String::new(),
            text_id: "course-v1:test".to_string(),
            created_at: Utc::now(),
        }
    }

    fn coupon_with_discount(discount: Decimal) -> CurrentCouponVersion {
        CurrentCouponVersion {
            coupon_id: 1,
            coupon_code: "TEST".to_string(),
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
    fn test_quarter_discount_on_hundred() {
        let version = version_with_price(dec!(100.00));
        let coupon = coupon_with_discount(dec!(0.25));
        let price = PriceCalculator::price_with_discount(&version, Some(&coupon), true);
        assert_eq!(price, dec!(75.00));
    }

    #[test]
    fn test_half_up_rounding_not_bankers() {
        // 0.1 * 10.25 = 1.025: half-up -> 1.03, banker's would give 1.02
        assert_eq!(
            PriceCalculator::discount_amount(dec!(0.1), dec!(10.25)),
            dec!(1.03)
        );
        // 0.2 * 5.125 = 1.025: same midpoint, even last digit
        assert_eq!(
            PriceCalculator::discount_amount(dec!(0.2), dec!(5.125)),
            dec!(1.03)
        );
    }

    #[test]
    fn test_ineligible_coupon_leaves_price_unchanged() {
        let version = version_with_price(dec!(100.00));
        let coupon = coupon_with_discount(dec!(0.25));
        let price = PriceCalculator::price_with_discount(&version, Some(&coupon), false);
        assert_eq!(price, dec!(100.00));
    }

    #[test]
    fn test_absent_coupon_leaves_price_unchanged() {
        let version = version_with_price(dec!(100.00));
        let price = PriceCalculator::price_with_discount(&version, None, true);
        assert_eq!(price, dec!(100.00));
    }

    #[test]
    fn test_full_discount_is_exactly_zero() {
        let version = version_with_price(dec!(49.99));
        let coupon = coupon_with_discount(dec!(1));
        let price = PriceCalculator::price_with_discount(&version, Some(&coupon), true);
        assert_eq!(price, dec!(0.00));
    }

    #[test]
    fn test_bulk_total() {
        assert_eq!(PriceCalculator::bulk_total(dec!(100.00), 5), dec!(500.00));
        assert_eq!(PriceCalculator::bulk_total(dec!(33.335), 3), dec!(100.01));
    }
}
