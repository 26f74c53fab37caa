//! # Validation Module
//!
//! Input validation for every request that reaches the engine.
//!
//! ## Validation Layers
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Layer 1: Request types (serde)                                         │
//! │  ├── Shape: enums, decimals, timestamps parse or the request fails      │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 2: THIS MODULE                                                   │
//! │  ├── Ranges, required reasons, coupon code format                       │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 3: SQLite                                                        │
//! │  ├── UNIQUE (coupon code, ledger reference, cart line, active coupon)   │
//! │  └── CHECK (stock >= 0, quantity > 0)                                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Utc};

use crate::coupon::NewCoupon;
use crate::error::ValidationError;
use crate::money::{Money, Percent};
use crate::types::CouponType;
use crate::{MAX_COUPON_CODE_LENGTH, MAX_ITEM_QUANTITY, MAX_REASON_LENGTH};

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

// =============================================================================
// String Validators
// =============================================================================

/// Normalises a coupon code: trimmed and upper-cased.
///
/// ## Rules
/// - Must not be empty
/// - At most 32 characters
/// - Letters, digits, hyphens and underscores only
///
/// ```rust
/// use folio_core::validation::normalize_coupon_code;
///
/// assert_eq!(normalize_coupon_code(" save10 ").unwrap(), "SAVE10");
/// assert!(normalize_coupon_code("").is_err());
/// assert!(normalize_coupon_code("10% OFF").is_err());
/// ```
pub fn normalize_coupon_code(code: &str) -> ValidationResult<String> {
    let code = code.trim();

    if code.is_empty() {
        return Err(ValidationError::Required {
            field: "code".to_string(),
        });
    }

    if code.chars().count() > MAX_COUPON_CODE_LENGTH {
        return Err(ValidationError::TooLong {
            field: "code".to_string(),
            max: MAX_COUPON_CODE_LENGTH,
        });
    }

    if !code
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(ValidationError::InvalidFormat {
            field: "code".to_string(),
            reason: "must contain only letters, numbers, hyphens, and underscores".to_string(),
        });
    }

    Ok(code.to_ascii_uppercase())
}

/// Validates a mandatory free-text reason (return, rejection).
///
/// Returns the trimmed reason.
pub fn validate_reason(field: &str, reason: &str) -> ValidationResult<String> {
    let reason = reason.trim();

    if reason.is_empty() {
        return Err(ValidationError::Required {
            field: field.to_string(),
        });
    }

    if reason.chars().count() > MAX_REASON_LENGTH {
        return Err(ValidationError::TooLong {
            field: field.to_string(),
            max: MAX_REASON_LENGTH,
        });
    }

    Ok(reason.to_string())
}

/// Like [`validate_reason`] but an empty reason becomes `None`.
pub fn validate_optional_reason(field: &str, reason: Option<&str>) -> ValidationResult<Option<String>> {
    match reason.map(str::trim) {
        None | Some("") => Ok(None),
        Some(r) => validate_reason(field, r).map(Some),
    }
}

// =============================================================================
// Numeric Validators
// =============================================================================

/// Validates a per-book cart quantity.
///
/// ## Rules
/// - Must be positive (> 0)
/// - Must not exceed MAX_ITEM_QUANTITY (5)
pub fn validate_quantity(qty: i64) -> ValidationResult<()> {
    if qty <= 0 {
        return Err(ValidationError::MustBePositive {
            field: "quantity".to_string(),
        });
    }

    if qty > MAX_ITEM_QUANTITY {
        return Err(ValidationError::OutOfRange {
            field: "quantity".to_string(),
            min: 1,
            max: MAX_ITEM_QUANTITY,
        });
    }

    Ok(())
}

/// Validates a non-negative amount such as a delivery charge.
pub fn validate_non_negative(field: &str, amount: Money) -> ValidationResult<()> {
    if amount.is_negative() {
        return Err(ValidationError::MustNotBeNegative {
            field: field.to_string(),
        });
    }
    Ok(())
}

/// Validates an offer's `[start, end)` window.
pub fn validate_window(start: DateTime<Utc>, end: DateTime<Utc>) -> ValidationResult<()> {
    if start >= end {
        return Err(ValidationError::InvalidWindow {
            field: "offer window".to_string(),
        });
    }
    Ok(())
}

// =============================================================================
// Composite Validators
// =============================================================================

/// Validates an admin's new coupon and returns it with the code normalised.
pub fn validate_new_coupon(input: &NewCoupon, now: DateTime<Utc>) -> ValidationResult<NewCoupon> {
    let code = normalize_coupon_code(&input.code)?;

    if !input.value.is_positive() {
        return Err(ValidationError::MustBePositive {
            field: "value".to_string(),
        });
    }

    if input.coupon_type == CouponType::Percent {
        Percent::new(input.value.amount()).map_err(|_| ValidationError::OutOfRange {
            field: "value".to_string(),
            min: 0,
            max: 100,
        })?;
    }

    validate_non_negative("min_order_value", input.min_order_value)?;
    validate_non_negative("max_discount", input.max_discount)?;

    // Percent discounts are capped by max_discount.
    if input.coupon_type == CouponType::Percent && !input.max_discount.is_positive() {
        return Err(ValidationError::MustBePositive {
            field: "max_discount".to_string(),
        });
    }

    if input.usage_limit < 1 {
        return Err(ValidationError::MustBePositive {
            field: "usage_limit".to_string(),
        });
    }

    if input.expiry <= now {
        return Err(ValidationError::InvalidFormat {
            field: "expiry".to_string(),
            reason: "must be in the future".to_string(),
        });
    }

    Ok(NewCoupon {
        code,
        ..input.clone()
    })
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 15, 12, 0, 0).unwrap()
    }

    fn coupon() -> NewCoupon {
        NewCoupon {
            code: "welcome-5".to_string(),
            coupon_type: CouponType::Percent,
            value: Money::from_major(5),
            min_order_value: Money::from_major(200),
            max_discount: Money::from_major(25),
            expiry: now() + Duration::days(10),
            usage_limit: 50,
        }
    }

    #[test]
    fn test_quantity() {
        assert!(validate_quantity(1).is_ok());
        assert!(validate_quantity(5).is_ok());
        assert!(validate_quantity(0).is_err());
        assert!(validate_quantity(6).is_err());
    }

    #[test]
    fn test_reason_required() {
        assert!(validate_reason("reason", "   ").is_err());
        assert_eq!(validate_reason("reason", " torn ").unwrap(), "torn");
        assert!(validate_reason("reason", &"x".repeat(MAX_REASON_LENGTH + 1)).is_err());
        assert_eq!(validate_optional_reason("reason", Some(" ")).unwrap(), None);
    }

    #[test]
    fn test_new_coupon_normalises_code() {
        let valid = validate_new_coupon(&coupon(), now()).unwrap();
        assert_eq!(valid.code, "WELCOME-5");
    }

    #[test]
    fn test_new_coupon_rejections() {
        let mut c = coupon();
        c.value = Money::from_major(101);
        assert!(matches!(
            validate_new_coupon(&c, now()),
            Err(ValidationError::OutOfRange { .. })
        ));

        // Flat coupons may exceed 100.
        c.coupon_type = CouponType::Flat;
        assert!(validate_new_coupon(&c, now()).is_ok());

        let mut c = coupon();
        c.usage_limit = 0;
        assert!(validate_new_coupon(&c, now()).is_err());

        let mut c = coupon();
        c.expiry = now();
        assert!(validate_new_coupon(&c, now()).is_err());

        let mut c = coupon();
        c.value = Money::zero();
        assert!(validate_new_coupon(&c, now()).is_err());

        let mut c = coupon();
        c.max_discount = Money::zero();
        assert!(matches!(
            validate_new_coupon(&c, now()),
            Err(ValidationError::MustBePositive { .. })
        ));
        c.coupon_type = CouponType::Flat;
        assert!(validate_new_coupon(&c, now()).is_ok());
    }

    #[test]
    fn test_window() {
        assert!(validate_window(now(), now() + Duration::hours(1)).is_ok());
        assert!(validate_window(now(), now()).is_err());
    }
}
