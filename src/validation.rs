// Validation utilities module
// Provides custom validation functions for domain-specific rules

use rust_decimal::Decimal;
use validator::ValidationError;

/// Validates that a product price is non-negative (zero-price products are
/// legal and take the no-gateway checkout path)
pub fn validate_price(price: &Decimal) -> Result<(), ValidationError> {
    if *price < Decimal::ZERO {
        Err(ValidationError::new("price_must_not_be_negative"))
    } else {
        Ok(())
    }
}

/// Validates that a discount fraction is within [0, 1]
pub fn validate_discount_fraction(discount: &Decimal) -> Result<(), ValidationError> {
    if *discount < Decimal::ZERO || *discount > Decimal::ONE {
        Err(ValidationError::new("discount_out_of_range"))
    } else {
        Ok(())
    }
}

/// Validates that a coupon code contains only URL-safe characters
pub fn validate_coupon_code(code: &str) -> Result<(), ValidationError> {
    if code.is_empty() || !code.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_') {
        Err(ValidationError::new("invalid_coupon_code"))
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_validate_price() {
        assert!(validate_price(&dec!(0)).is_ok());
        assert!(validate_price(&dec!(100.00)).is_ok());
        assert!(validate_price(&dec!(-0.01)).is_err());
    }

    #[test]
    fn test_validate_discount_fraction() {
        assert!(validate_discount_fraction(&dec!(0)).is_ok());
        assert!(validate_discount_fraction(&dec!(0.25)).is_ok());
        assert!(validate_discount_fraction(&dec!(1)).is_ok());
        assert!(validate_discount_fraction(&dec!(1.00001)).is_err());
        assert!(validate_discount_fraction(&dec!(-0.1)).is_err());
    }

    #[test]
    fn test_validate_coupon_code() {
        assert!(validate_coupon_code("WELCOME-25").is_ok());
        assert!(validate_coupon_code("bulk_code_01").is_ok());
        assert!(validate_coupon_code("").is_err());
        assert!(validate_coupon_code("has space").is_err());
    }
}
