//! # Money Module
//!
//! Provides the `Money` and `Percent` types for handling monetary values safely.
//!
//! ## Why Decimal Money?
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  THE ROUNDING PROBLEM                                                   │
//! │                                                                         │
//! │  Book: 199.99 × 3, product offer 15%, category offer 5%                 │
//! │                                                                         │
//! │  Round every line, then sum:      rounding error compounds per line     │
//! │  Sum exact values, round once:    at most 0.005 off, at the boundary    │
//! │                                                                         │
//! │  OUR SOLUTION: exact base-10 Decimal internally,                        │
//! │  `to_fixed()` (2 places, half away from zero) only when presenting.     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//! ```rust
//! use folio_core::money::{Money, Percent};
//!
//! let price = Money::parse("199.99").unwrap();
//! let line = price * 3;
//! assert_eq!(line.to_fixed(), "599.97");
//!
//! let offer = Percent::parse("15").unwrap();
//! assert_eq!(line.percent(offer).to_fixed(), "90.00");
//! ```

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign, Mul, Sub, SubAssign};
use std::str::FromStr;

use crate::error::ValidationError;

/// Decimal places used at every presentation boundary.
pub const PRESENTATION_SCALE: u32 = 2;

// =============================================================================
// Money Type
// =============================================================================

/// A monetary amount in major currency units, held as an exact decimal.
///
/// ## Design Decisions
/// - **Decimal (signed)**: order totals shrink on returns, so intermediate
///   arithmetic may dip below zero before clamping
/// - **No implicit rounding**: `Add`/`Sub`/`Mul` keep full precision
/// - **Stored as TEXT**: the database never sees a float
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Money(Decimal);

impl Money {
    /// Wraps a decimal amount.
    #[inline]
    pub const fn new(amount: Decimal) -> Self {
        Money(amount)
    }

    /// Creates money from whole major units.
    ///
    /// ```rust
    /// use folio_core::money::Money;
    /// assert_eq!(Money::from_major(300).to_fixed(), "300.00");
    /// ```
    #[inline]
    pub fn from_major(units: i64) -> Self {
        Money(Decimal::from(units))
    }

    /// Creates money from minor units (hundredths).
    ///
    /// ```rust
    /// use folio_core::money::Money;
    /// assert_eq!(Money::from_minor(1099).to_fixed(), "10.99");
    /// ```
    #[inline]
    pub fn from_minor(minor: i64) -> Self {
        Money(Decimal::new(minor, PRESENTATION_SCALE))
    }

    /// Parses a decimal string such as `"249.50"`.
    pub fn parse(raw: &str) -> Result<Self, ValidationError> {
        Decimal::from_str(raw.trim())
            .map(Money)
            .map_err(|e| ValidationError::InvalidFormat {
                field: "amount".to_string(),
                reason: e.to_string(),
            })
    }

    /// Returns the exact decimal amount.
    #[inline]
    pub const fn amount(&self) -> Decimal {
        self.0
    }

    /// Returns zero money value.
    #[inline]
    pub const fn zero() -> Self {
        Money(Decimal::ZERO)
    }

    /// Checks if the value is zero.
    #[inline]
    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    /// Checks if the value is strictly positive.
    #[inline]
    pub fn is_positive(&self) -> bool {
        self.0 > Decimal::ZERO
    }

    /// Checks if the value is strictly negative.
    #[inline]
    pub fn is_negative(&self) -> bool {
        self.0 < Decimal::ZERO
    }

    /// The amount corresponding to `pct` percent of this value, unrounded.
    ///
    /// ```rust
    /// use folio_core::money::{Money, Percent};
    ///
    /// let subtotal = Money::from_major(300);
    /// let ten = Percent::parse("10").unwrap();
    /// assert_eq!(subtotal.percent(ten), Money::from_major(30));
    /// ```
    pub fn percent(&self, pct: Percent) -> Money {
        Money(self.0 * pct.value() / Decimal::ONE_HUNDRED)
    }

    /// Divides evenly by a positive count without rounding.
    ///
    /// Returns zero for a zero count rather than panicking.
    pub fn split(&self, parts: i64) -> Money {
        if parts <= 0 {
            return Money::zero();
        }
        Money(self.0 / Decimal::from(parts))
    }

    /// `self × numerator / denominator`, zero when the denominator is zero.
    pub fn ratio(&self, numerator: Money, denominator: Money) -> Money {
        if denominator.is_zero() {
            return Money::zero();
        }
        Money(self.0 * numerator.0 / denominator.0)
    }

    /// Clamps negative values to zero.
    #[inline]
    pub fn clamp_non_negative(self) -> Money {
        if self.is_negative() {
            Money::zero()
        } else {
            self
        }
    }

    /// Rounds half away from zero to the presentation scale.
    pub fn round(&self) -> Money {
        Money(
            self.0
                .round_dp_with_strategy(PRESENTATION_SCALE, RoundingStrategy::MidpointAwayFromZero),
        )
    }

    /// Renders the amount as a fixed 2-decimal string.
    ///
    /// This is the presentation boundary: it is the ONLY place an amount is
    /// rounded.
    ///
    /// ```rust
    /// use folio_core::money::Money;
    ///
    /// assert_eq!(Money::from_major(270).to_fixed(), "270.00");
    /// assert_eq!(Money::parse("0.005").unwrap().to_fixed(), "0.01");
    /// assert_eq!(Money::parse("-4.5").unwrap().to_fixed(), "-4.50");
    /// ```
    pub fn to_fixed(&self) -> String {
        let mut rounded = self.round().0;
        rounded.rescale(PRESENTATION_SCALE);
        rounded.to_string()
    }
}

/// Display shows the presentation form.
impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_fixed())
    }
}

impl FromStr for Money {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Money::parse(s)
    }
}

impl Default for Money {
    fn default() -> Self {
        Money::zero()
    }
}

impl Add for Money {
    type Output = Self;

    #[inline]
    fn add(self, other: Self) -> Self {
        Money(self.0 + other.0)
    }
}

impl AddAssign for Money {
    #[inline]
    fn add_assign(&mut self, other: Self) {
        self.0 += other.0;
    }
}

impl Sub for Money {
    type Output = Self;

    #[inline]
    fn sub(self, other: Self) -> Self {
        Money(self.0 - other.0)
    }
}

impl SubAssign for Money {
    #[inline]
    fn sub_assign(&mut self, other: Self) {
        self.0 -= other.0;
    }
}

/// Multiplication by a quantity.
impl Mul<i64> for Money {
    type Output = Self;

    #[inline]
    fn mul(self, qty: i64) -> Self {
        Money(self.0 * Decimal::from(qty))
    }
}

impl Sum for Money {
    fn sum<I: Iterator<Item = Money>>(iter: I) -> Self {
        iter.fold(Money::zero(), |acc, m| acc + m)
    }
}

// =============================================================================
// Percent
// =============================================================================

/// A discount percentage in `0..=100`.
///
/// Offers and percent coupons both carry one. Construction validates the
/// range, so a `Percent` in hand is always sane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "Decimal", into = "Decimal")]
pub struct Percent(Decimal);

impl Percent {
    /// Creates a percent, rejecting values outside `0..=100`.
    pub fn new(value: Decimal) -> Result<Self, ValidationError> {
        if value < Decimal::ZERO || value > Decimal::ONE_HUNDRED {
            return Err(ValidationError::OutOfRange {
                field: "discount_percent".to_string(),
                min: 0,
                max: 100,
            });
        }
        Ok(Percent(value))
    }

    /// Parses and validates a percent string such as `"12.5"`.
    pub fn parse(raw: &str) -> Result<Self, ValidationError> {
        let value = Decimal::from_str(raw.trim()).map_err(|e| ValidationError::InvalidFormat {
            field: "discount_percent".to_string(),
            reason: e.to_string(),
        })?;
        Percent::new(value)
    }

    /// Zero percent (no offer).
    #[inline]
    pub const fn zero() -> Self {
        Percent(Decimal::ZERO)
    }

    /// Returns the percentage value (`12.5` for 12.5%).
    #[inline]
    pub const fn value(&self) -> Decimal {
        self.0
    }

    #[inline]
    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }
}

impl Default for Percent {
    fn default() -> Self {
        Percent::zero()
    }
}

impl TryFrom<Decimal> for Percent {
    type Error = ValidationError;

    fn try_from(value: Decimal) -> Result<Self, Self::Error> {
        Percent::new(value)
    }
}

impl From<Percent> for Decimal {
    fn from(pct: Percent) -> Self {
        pct.0
    }
}

impl fmt::Display for Percent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}%", self.0.normalize())
    }
}

// =============================================================================
// SQLite storage (TEXT columns)
// =============================================================================

#[cfg(feature = "sqlx")]
mod sqlite_text {
    use super::{Money, Percent};
    use rust_decimal::Decimal;
    use sqlx::encode::IsNull;
    use sqlx::error::BoxDynError;
    use sqlx::sqlite::{Sqlite, SqliteTypeInfo, SqliteValueRef};
    use sqlx::{Decode, Encode, Type};
    use std::str::FromStr;

    fn decode_decimal(value: SqliteValueRef<'_>) -> Result<Decimal, BoxDynError> {
        let text = <&str as Decode<Sqlite>>::decode(value)?;
        Ok(Decimal::from_str(text)?)
    }

    impl Type<Sqlite> for Money {
        fn type_info() -> SqliteTypeInfo {
            <str as Type<Sqlite>>::type_info()
        }

        fn compatible(ty: &SqliteTypeInfo) -> bool {
            <str as Type<Sqlite>>::compatible(ty)
        }
    }

    impl<'q> Encode<'q, Sqlite> for Money {
        fn encode_by_ref(
            &self,
            buf: &mut <Sqlite as sqlx::Database>::ArgumentBuffer<'q>,
        ) -> Result<IsNull, BoxDynError> {
            <String as Encode<'q, Sqlite>>::encode(self.0.to_string(), buf)
        }
    }

    impl<'r> Decode<'r, Sqlite> for Money {
        fn decode(value: SqliteValueRef<'r>) -> Result<Self, BoxDynError> {
            Ok(Money(decode_decimal(value)?))
        }
    }

    impl Type<Sqlite> for Percent {
        fn type_info() -> SqliteTypeInfo {
            <str as Type<Sqlite>>::type_info()
        }

        fn compatible(ty: &SqliteTypeInfo) -> bool {
            <str as Type<Sqlite>>::compatible(ty)
        }
    }

    impl<'q> Encode<'q, Sqlite> for Percent {
        fn encode_by_ref(
            &self,
            buf: &mut <Sqlite as sqlx::Database>::ArgumentBuffer<'q>,
        ) -> Result<IsNull, BoxDynError> {
            <String as Encode<'q, Sqlite>>::encode(self.0.to_string(), buf)
        }
    }

    impl<'r> Decode<'r, Sqlite> for Percent {
        fn decode(value: SqliteValueRef<'r>) -> Result<Self, BoxDynError> {
            Ok(Percent::new(decode_decimal(value)?)?)
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn m(raw: &str) -> Money {
        Money::parse(raw).unwrap()
    }

    #[test]
    fn test_to_fixed_pads_and_rounds() {
        assert_eq!(Money::zero().to_fixed(), "0.00");
        assert_eq!(m("5").to_fixed(), "5.00");
        assert_eq!(m("10.1").to_fixed(), "10.10");
        assert_eq!(m("33.333333").to_fixed(), "33.33");
        assert_eq!(m("2.675").to_fixed(), "2.68");
        assert_eq!(m("-0.005").to_fixed(), "-0.01");
    }

    #[test]
    fn test_arithmetic_is_exact() {
        let a = m("0.1");
        let b = m("0.2");
        assert_eq!(a + b, m("0.3"));
        assert_eq!((m("10") - m("2.5")).to_fixed(), "7.50");
        assert_eq!((m("199.99") * 3).to_fixed(), "599.97");
    }

    #[test]
    fn test_accumulating_unrounded_lines() {
        // Three lines of 33.335 each: rounding per line gives 100.02,
        // summing first and rounding once gives 100.01.
        let line = m("33.335");
        let per_line_rounded: Money = (0..3).map(|_| line.round()).sum();
        let summed: Money = (0..3).map(|_| line).sum();
        assert_eq!(per_line_rounded.to_fixed(), "100.02");
        assert_eq!(summed.to_fixed(), "100.01");
    }

    #[test]
    fn test_percent_of() {
        let pct = Percent::parse("12.5").unwrap();
        assert_eq!(m("80").percent(pct), m("10"));
        assert_eq!(m("80").percent(Percent::zero()), Money::zero());
    }

    #[test]
    fn test_percent_range() {
        assert!(Percent::parse("0").is_ok());
        assert!(Percent::parse("100").is_ok());
        assert!(Percent::parse("100.01").is_err());
        assert!(Percent::parse("-1").is_err());
        assert!(Percent::parse("ten").is_err());
    }

    #[test]
    fn test_split_and_ratio() {
        assert_eq!(m("30").split(4), m("7.5"));
        assert_eq!(m("30").split(0), Money::zero());
        assert_eq!(m("30").ratio(m("100"), m("300")), m("10"));
        assert_eq!(m("30").ratio(m("100"), Money::zero()), Money::zero());
    }

    #[test]
    fn test_clamp_non_negative() {
        assert_eq!(m("-3").clamp_non_negative(), Money::zero());
        assert_eq!(m("3").clamp_non_negative(), m("3"));
    }

    #[test]
    fn test_serde_is_string() {
        let json = serde_json::to_string(&m("12.50")).unwrap();
        assert_eq!(json, "\"12.50\"");
    }
}
