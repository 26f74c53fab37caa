//! # Coupon Engine (pure half)
//!
//! Eligibility, discount computation and per-unit allocation for the single
//! coupon a user may have applied. The transactional half (replace the
//! active row, consume at checkout) lives in `folio-db`.
//!
//! ## Apply Pipeline
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  apply(user, code)                                                      │
//! │                                                                         │
//! │  1. coupon live (active, not expired)?     no → CouponNotFound          │
//! │  2. used_count < usage_limit?              no → UsageLimitExceeded      │
//! │  3. no UserCoupon row for (user, coupon)?  no → AlreadyUsed             │
//! │  4. subtotal >= min_order_value?           no → MinOrderNotMet          │
//! │  5. discount = percent: min(subtotal × v/100, max_discount)             │
//! │               flat:    v                                                │
//! │     clamped to what is left after offers                                │
//! │  6. per_unit = discount / Σ quantity                                    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The order of checks is fixed: a caller fixing one problem never
//! discovers an earlier one afterwards.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};
use crate::money::Money;
use crate::pricing::CartPricing;
use crate::types::{Coupon, CouponType};

// =============================================================================
// Eligibility
// =============================================================================

/// Runs checks 1-4 against an already-loaded coupon.
///
/// `already_used` is whether a `UserCoupon` row exists for the caller.
pub fn check_eligibility(
    coupon: &Coupon,
    already_used: bool,
    subtotal: Money,
    now: DateTime<Utc>,
) -> CoreResult<()> {
    if !coupon.is_live(now) {
        return Err(CoreError::CouponNotFound {
            code: coupon.code.clone(),
        });
    }

    if coupon.is_exhausted() {
        return Err(CoreError::CouponUsageLimitExceeded {
            code: coupon.code.clone(),
            limit: coupon.usage_limit,
        });
    }

    if already_used {
        return Err(CoreError::CouponAlreadyUsed {
            code: coupon.code.clone(),
        });
    }

    if subtotal < coupon.min_order_value {
        return Err(CoreError::MinOrderNotMet {
            code: coupon.code.clone(),
            min_order: coupon.min_order_value,
            subtotal,
        });
    }

    Ok(())
}

// =============================================================================
// Discount
// =============================================================================

/// Coupon discount on `subtotal`, never more than `payable`.
///
/// `payable` is the subtotal after product and category offers. The clamp
/// keeps `subtotal − offers − coupon == final_total` exact.
pub fn coupon_discount(coupon: &Coupon, subtotal: Money, payable: Money) -> Money {
    let raw = match coupon.coupon_type {
        CouponType::Percent => {
            let pct = subtotal.ratio(coupon.value, Money::from_major(100));
            pct.min(coupon.max_discount)
        }
        CouponType::Flat => coupon.value,
    };

    raw.min(payable.clamp_non_negative()).clamp_non_negative()
}

/// A priced coupon against a specific cart.
#[derive(Debug, Clone, PartialEq)]
pub struct CouponQuote {
    pub coupon_id: i64,
    pub code: String,
    pub discount: Money,
    /// `discount / Σ quantity`, unrounded.
    pub per_unit: Money,
}

/// Checks eligibility and prices the coupon against `pricing`.
pub fn quote(
    coupon: &Coupon,
    already_used: bool,
    pricing: &CartPricing,
    now: DateTime<Utc>,
) -> CoreResult<CouponQuote> {
    check_eligibility(coupon, already_used, pricing.subtotal, now)?;

    let discount = coupon_discount(coupon, pricing.subtotal, pricing.discounted_subtotal());

    Ok(CouponQuote {
        coupon_id: coupon.id,
        code: coupon.code.clone(),
        discount,
        per_unit: discount.split(pricing.total_quantity()),
    })
}

// =============================================================================
// Allocation
// =============================================================================

/// One line as the allocator sees it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllocationLine {
    pub quantity: i64,
    /// Line total after offers; the most coupon the line can carry.
    pub cap: Money,
}

/// Splits `discount` across lines by quantity, never giving a line more
/// than its `cap`.
///
/// Each line starts at `per_unit × quantity`, cut to its cap. Whatever is
/// left over (capped excess or the division residue) goes to the lines that
/// still have room, last line first. Shares stay within `[0, cap]` and sum to
/// exactly `discount` as long as `discount <= Σ cap`, which the coupon clamp
/// guarantees.
///
/// ```rust
/// use folio_core::coupon::{allocate, AllocationLine};
/// use folio_core::money::Money;
///
/// let lines = [
///     AllocationLine { quantity: 1, cap: Money::from_major(10) },
///     AllocationLine { quantity: 1, cap: Money::from_major(500) },
/// ];
/// let shares = allocate(Money::from_major(100), &lines);
/// assert_eq!(shares, vec![Money::from_major(10), Money::from_major(90)]);
/// ```
pub fn allocate(discount: Money, lines: &[AllocationLine]) -> Vec<Money> {
    let total_quantity: i64 = lines.iter().map(|l| l.quantity).sum();
    let per_unit = discount.split(total_quantity);

    let mut shares: Vec<Money> = lines
        .iter()
        .map(|l| (per_unit * l.quantity).min(l.cap).clamp_non_negative())
        .collect();

    let mut remaining = discount - shares.iter().copied().sum::<Money>();

    for (share, line) in shares.iter_mut().zip(lines).rev() {
        if remaining.is_zero() {
            break;
        }
        // Positive: fill headroom. Negative: the division rounded up, give it back.
        let delta = if remaining.is_positive() {
            remaining.min(line.cap - *share)
        } else {
            remaining.max(Money::zero() - *share)
        };
        *share += delta;
        remaining -= delta;
    }

    shares
}

// =============================================================================
// Coupon Creation
// =============================================================================

/// Admin input for a new coupon. Validated by
/// [`validate_new_coupon`](crate::validation::validate_new_coupon).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewCoupon {
    pub code: String,
    pub coupon_type: CouponType,
    pub value: Money,
    pub min_order_value: Money,
    pub max_discount: Money,
    pub expiry: DateTime<Utc>,
    pub usage_limit: i64,
}

// =============================================================================
// Unit Tests
// =============================================================================
