//! # Operation Outcomes
//!
//! One typed response per exposed operation. Every monetary field is a
//! fixed 2-decimal string produced by [`Money::to_fixed`]; the
//! [`PriceBreakdown`] is embedded unchanged so its format cannot drift
//! between operations.
//!
//! All types derive `ts_rs::TS` and export TypeScript bindings on
//! `cargo test`.

use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::error::{CoreError, ErrorKind};
use crate::money::Money;
use crate::pricing::{LinePricing, PriceBreakdown};
use crate::types::{
    CancellationStatus, Order, OrderItem, OrderStatus, PaymentMethod, RefundStatus, ReturnStatus,
};

// =============================================================================
// Cart & Coupon
// =============================================================================

/// One priced cart line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct CartLineView {
    pub book_id: i64,
    pub title: String,
    pub quantity: i64,
    pub unit_price: String,
    pub subtotal: String,
    pub product_discount: String,
    pub category_discount: String,
    /// `discount_per_unit × quantity`, display only.
    pub coupon_share: String,
    pub line_final: String,
    pub can_checkout: bool,
}

impl CartLineView {
    pub fn new(line: &LinePricing, title: &str, coupon_share: Money) -> Self {
        CartLineView {
            book_id: line.book_id,
            title: title.to_string(),
            quantity: line.quantity,
            unit_price: line.unit_price.to_fixed(),
            subtotal: line.subtotal.to_fixed(),
            product_discount: line.product_discount.to_fixed(),
            category_discount: line.category_discount.to_fixed(),
            coupon_share: coupon_share.to_fixed(),
            line_final: line.line_final.to_fixed(),
            can_checkout: line.can_checkout,
        }
    }
}

/// The priced cart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct CartView {
    pub lines: Vec<CartLineView>,
    pub applied_coupon: Option<String>,
    /// Why an applied coupon currently gives no discount.
    pub coupon_notice: Option<String>,
    pub discount_per_unit: String,
    pub can_checkout: bool,
    pub breakdown: PriceBreakdown,
}

/// Result of apply-coupon and remove-coupon.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct CouponOutcome {
    /// The coupon now applied, `None` after removal.
    pub code: Option<String>,
    pub discount_per_unit: String,
    pub breakdown: PriceBreakdown,
}

// =============================================================================
// Orders
// =============================================================================

/// Result of checkout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct CheckoutOutcome {
    pub order_id: i64,
    pub status: OrderStatus,
    pub payment_method: PaymentMethod,
    pub coupon_code: Option<String>,
    pub delivery_charge: String,
    pub breakdown: PriceBreakdown,
}

/// Result of cancel-order and cancel-item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct CancelOutcome {
    pub order_id: i64,
    /// Set for a single-item cancellation.
    pub item_id: Option<i64>,
    pub status: OrderStatus,
    pub refund_status: RefundStatus,
    pub refund_amount: String,
    pub restocked_units: i64,
    pub breakdown: PriceBreakdown,
}

/// Result of return-order and return-order-item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct ReturnOutcome {
    pub order_id: i64,
    pub item_ids: Vec<i64>,
    pub status: OrderStatus,
    /// Refund that approval of every requested item would credit.
    pub pending_refund: String,
    pub breakdown: PriceBreakdown,
}

/// Result of admin-review-return.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct ReviewOutcome {
    pub order_id: i64,
    pub item_id: i64,
    pub return_status: ReturnStatus,
    pub refund_status: Option<RefundStatus>,
    pub refund_amount: String,
    pub restocked: bool,
    pub order_status: OrderStatus,
    pub has_pending_returns: bool,
    pub breakdown: PriceBreakdown,
}

/// One line of an order as captured at checkout plus its sub-state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct OrderItemView {
    pub item_id: i64,
    pub book_id: i64,
    pub quantity: i64,
    pub price: String,
    pub product_discount: String,
    pub category_discount: String,
    pub coupon_discount: String,
    pub total: String,
    pub cancellation_status: CancellationStatus,
    pub return_status: Option<ReturnStatus>,
    pub refund_status: Option<RefundStatus>,
    pub refund_amount: String,
}

impl From<&OrderItem> for OrderItemView {
    fn from(item: &OrderItem) -> Self {
        OrderItemView {
            item_id: item.id,
            book_id: item.book_id,
            quantity: item.quantity,
            price: item.price.to_fixed(),
            product_discount: item.product_discount.to_fixed(),
            category_discount: item.category_discount.to_fixed(),
            coupon_discount: item.coupon_discount.to_fixed(),
            total: item.total.to_fixed(),
            cancellation_status: item.cancellation_status,
            return_status: item.return_status,
            refund_status: item.refund_status,
            refund_amount: item.refund_amount.to_fixed(),
        }
    }
}

/// An order with its lines and current breakdown.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct OrderView {
    pub order_id: i64,
    pub status: OrderStatus,
    pub payment_method: PaymentMethod,
    pub coupon_code: Option<String>,
    pub delivery_charge: String,
    pub has_pending_returns: bool,
    pub refund_status: Option<RefundStatus>,
    pub refund_amount: String,
    pub items: Vec<OrderItemView>,
    pub breakdown: PriceBreakdown,
}

impl OrderView {
    pub fn new(order: &Order, items: &[OrderItem]) -> Self {
        OrderView {
            order_id: order.id,
            status: order.status,
            payment_method: order.payment_method,
            coupon_code: order.coupon_code.clone(),
            delivery_charge: order.delivery_charge.to_fixed(),
            has_pending_returns: order.has_pending_returns,
            refund_status: order.refund_status,
            refund_amount: order.refund_amount.to_fixed(),
            items: items.iter().map(OrderItemView::from).collect(),
            breakdown: PriceBreakdown::for_order(order),
        }
    }
}

/// An item waiting for an admin decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct PendingReturnView {
    pub order_id: i64,
    pub item_id: i64,
    pub book_id: i64,
    pub quantity: i64,
    pub refund_amount: String,
    pub return_reason: Option<String>,
    /// RFC 3339.
    pub requested_at: Option<String>,
}

impl From<&OrderItem> for PendingReturnView {
    fn from(item: &OrderItem) -> Self {
        PendingReturnView {
            order_id: item.order_id,
            item_id: item.id,
            book_id: item.book_id,
            quantity: item.quantity,
            refund_amount: item.refund_amount.to_fixed(),
            return_reason: item.return_reason.clone(),
            requested_at: item.return_requested_at.map(|t| t.to_rfc3339()),
        }
    }
}

// =============================================================================
// Errors
// =============================================================================

/// Serialisable error payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct ErrorResponse {
    /// SCREAMING_SNAKE_CASE, stable across releases.
    pub code: String,
    pub kind: ErrorKind,
    pub message: String,
}

impl From<&CoreError> for ErrorResponse {
    fn from(err: &CoreError) -> Self {
        ErrorResponse {
            code: err.code().to_string(),
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_response_from_core_error() {
        let err = CoreError::OrderNotFound { order_id: 44 };
        let resp = ErrorResponse::from(&err);
        assert_eq!(resp.code, "ORDER_NOT_FOUND");
        assert_eq!(resp.kind, ErrorKind::NotFound);

        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(json["kind"], "not_found");
    }

    #[test]
    fn test_cancel_outcome_serialises_status_snake_case() {
        let outcome = CancelOutcome {
            order_id: 1,
            item_id: None,
            status: OrderStatus::Cancelled,
            refund_status: RefundStatus::NotApplicable,
            refund_amount: Money::zero().to_fixed(),
            restocked_units: 3,
            breakdown: PriceBreakdown::from_parts(
                Money::from_major(500),
                Money::zero(),
                Money::zero(),
                Money::zero(),
                Money::from_major(500),
            ),
        };
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["refund_status"], "not_applicable");
        assert_eq!(json["refund_amount"], "0.00");
        assert_eq!(json["breakdown"]["final_total"], "500.00");
    }
}
