//! # Pricing Calculator
//!
//! Prices cart or order lines under product and category offers.
//!
//! ## Per-line formulas
//! ```text
//! lineSubtotal        = price × qty
//! productDiscountAmt  = price × productPercent/100 × qty
//! categoryDiscountAmt = price × categoryPercent/100 × qty
//! lineFinal           = lineSubtotal − productDiscountAmt − categoryDiscountAmt
//! ```
//!
//! Aggregates are plain sums of the unrounded line values. Rounding happens
//! once, in [`PriceBreakdown`], never while accumulating.
//!
//! ## Eligibility
//! A line whose book is inactive, blocked or short on stock is still priced
//! (the shopper sees what it would cost) but flagged `can_checkout = false`.

use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::money::Money;
use crate::offer::ResolvedOffers;
use crate::types::{Book, Order};

// =============================================================================
// Inputs
// =============================================================================

/// One `(book, quantity)` pair with its resolved offers.
#[derive(Debug, Clone, PartialEq)]
pub struct PricingInput {
    pub book_id: i64,
    pub unit_price: Money,
    pub quantity: i64,
    pub offers: ResolvedOffers,
    pub can_checkout: bool,
}

impl PricingInput {
    /// Builds the input from a catalog book, deriving eligibility from it.
    pub fn for_book(book: &Book, quantity: i64, offers: ResolvedOffers) -> Self {
        PricingInput {
            book_id: book.id,
            unit_price: book.price,
            quantity,
            offers,
            can_checkout: book.can_checkout(quantity),
        }
    }
}

// =============================================================================
// Outputs
// =============================================================================

/// Unrounded pricing of one line.
#[derive(Debug, Clone, PartialEq)]
pub struct LinePricing {
    pub book_id: i64,
    pub quantity: i64,
    pub unit_price: Money,
    pub subtotal: Money,
    pub product_discount: Money,
    pub category_discount: Money,
    pub line_final: Money,
    pub can_checkout: bool,
}

/// Unrounded pricing of a whole cart.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CartPricing {
    pub lines: Vec<LinePricing>,
    pub subtotal: Money,
    pub product_discount_total: Money,
    pub category_discount_total: Money,
}

impl CartPricing {
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Σ quantity, the divisor for per-unit coupon allocation.
    pub fn total_quantity(&self) -> i64 {
        self.lines.iter().map(|l| l.quantity).sum()
    }

    /// Product + category discount.
    pub fn offer_discount_total(&self) -> Money {
        self.product_discount_total + self.category_discount_total
    }

    /// Subtotal after offers, before coupon.
    pub fn discounted_subtotal(&self) -> Money {
        self.subtotal - self.offer_discount_total()
    }

    /// Whether every line is eligible.
    pub fn can_checkout(&self) -> bool {
        !self.lines.is_empty() && self.lines.iter().all(|l| l.can_checkout)
    }

    /// Final total with `coupon_discount` applied, clamped at zero.
    pub fn final_total(&self, coupon_discount: Money) -> Money {
        (self.discounted_subtotal() - coupon_discount).clamp_non_negative()
    }

    /// Presentation breakdown with the given coupon discount.
    pub fn breakdown(&self, coupon_discount: Money) -> PriceBreakdown {
        PriceBreakdown::from_parts(
            self.subtotal,
            self.product_discount_total,
            self.category_discount_total,
            coupon_discount,
            self.final_total(coupon_discount),
        )
    }
}

/// Prices a single line.
pub fn price_line(input: &PricingInput) -> LinePricing {
    let subtotal = input.unit_price * input.quantity;
    let product_discount = input.unit_price.percent(input.offers.product_percent) * input.quantity;
    let category_discount = input.unit_price.percent(input.offers.category_percent) * input.quantity;

    LinePricing {
        book_id: input.book_id,
        quantity: input.quantity,
        unit_price: input.unit_price,
        subtotal,
        product_discount,
        category_discount,
        line_final: subtotal - product_discount - category_discount,
        can_checkout: input.can_checkout,
    }
}

/// Prices every line and accumulates the unrounded totals.
pub fn price_lines(inputs: &[PricingInput]) -> CartPricing {
    let mut pricing = CartPricing::default();

    for input in inputs {
        let line = price_line(input);
        pricing.subtotal += line.subtotal;
        pricing.product_discount_total += line.product_discount;
        pricing.category_discount_total += line.category_discount;
        pricing.lines.push(line);
    }

    pricing
}

// =============================================================================
// Presentation Breakdown
// =============================================================================

/// The monetary breakdown returned by every operation.
///
/// Field names and the fixed 2-decimal string format are part of the API
/// contract:
///
/// ```json
/// {"subtotal":"300.00","product_discount":"0.00","category_discount":"0.00",
///  "coupon_discount":"30.00","total_discount":"30.00","final_total":"270.00"}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct PriceBreakdown {
    pub subtotal: String,
    pub product_discount: String,
    pub category_discount: String,
    pub coupon_discount: String,
    pub total_discount: String,
    pub final_total: String,
}

impl PriceBreakdown {
    /// Formats unrounded parts. `total_discount` is summed before rounding.
    pub fn from_parts(
        subtotal: Money,
        product_discount: Money,
        category_discount: Money,
        coupon_discount: Money,
        final_total: Money,
    ) -> Self {
        PriceBreakdown {
            subtotal: subtotal.to_fixed(),
            product_discount: product_discount.to_fixed(),
            category_discount: category_discount.to_fixed(),
            coupon_discount: coupon_discount.to_fixed(),
            total_discount: (product_discount + category_discount + coupon_discount).to_fixed(),
            final_total: final_total.to_fixed(),
        }
    }

    /// Breakdown of an order's current (possibly reduced) totals.
    ///
    /// `final_total` includes the delivery charge.
    pub fn for_order(order: &Order) -> Self {
        PriceBreakdown::from_parts(
            order.total_amount,
            order.product_discount,
            order.category_discount,
            order.coupon_discount,
            order.final_total,
        )
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
