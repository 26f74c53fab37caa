//! # Order Lifecycle Rules
//!
//! Guards, refund math and typed patches for cancellation and returns.
//! Everything here works from pricing captured on the order at checkout;
//! nothing re-resolves offers or re-runs the coupon engine.
//!
//! ## State Machine
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │   Placed ──► Processing ──► Shipped ──► OutForDelivery ──► Delivered    │
//! │     │            │                                            │         │
//! │     └─── cancel ─┴──► Cancelled              whole-order return│         │
//! │        (30 min window)                                         ▼         │
//! │                                                      ReturnRequested    │
//! │   per-item return (order stays Delivered):                 │            │
//! │     item: none ──► Pending ──► Approved (restock if good, credit)       │
//! │                         └────► Rejected (reason required)   │            │
//! │                                                             ▼            │
//! │                          all resolved, any approved ──► ReturnCompleted │
//! │                          all resolved, none approved ─► Delivered       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Refund Timing
//! A return request only marks the item `Pending` and records the refund
//! amount it will receive. Stock and wallet move on admin approval.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::error::{CoreError, CoreResult, ValidationError};
use crate::money::Money;
use crate::types::{
    CancellationStatus, Category, ItemCondition, Order, OrderItem, OrderStatus, PaymentMethod,
    RefundStatus, ReturnStatus,
};
use crate::validation::validate_non_negative;

/// Default minutes after placement during which a customer may cancel.
pub const DEFAULT_CANCEL_WINDOW_MINUTES: i64 = 30;

/// Default days after delivery during which a customer may return.
pub const DEFAULT_RETURN_WINDOW_DAYS: i64 = 7;

// =============================================================================
// Policy
// =============================================================================

/// Time windows applied by the lifecycle guards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderPolicy {
    pub cancel_window: Duration,
    pub default_return_window_days: i64,
}

impl Default for OrderPolicy {
    fn default() -> Self {
        OrderPolicy {
            cancel_window: Duration::minutes(DEFAULT_CANCEL_WINDOW_MINUTES),
            default_return_window_days: DEFAULT_RETURN_WINDOW_DAYS,
        }
    }
}

impl OrderPolicy {
    /// Guard for whole-order and single-item cancellation.
    ///
    /// Status is checked before the window so that a shipped order reports
    /// its status rather than an expired window.
    pub fn check_cancellable(&self, order: &Order, now: DateTime<Utc>) -> CoreResult<()> {
        if !order.status.is_cancellable() {
            return Err(CoreError::InvalidOrderStatus {
                order_id: order.id,
                current_status: order.status,
                operation: "cancel",
            });
        }

        if now - order.created_at > self.cancel_window {
            return Err(CoreError::CancellationWindowExpired {
                order_id: order.id,
                window_minutes: self.cancel_window.num_minutes(),
            });
        }

        Ok(())
    }

    /// Return window for an item of `category`, falling back to the default.
    pub fn return_window_days(&self, category: Option<&Category>) -> i64 {
        category
            .and_then(|c| c.return_window_days)
            .unwrap_or(self.default_return_window_days)
    }

    /// Guard for a return of one item (per-item or as part of a whole-order
    /// return).
    pub fn check_item_returnable(
        &self,
        order: &Order,
        item: &OrderItem,
        window_days: i64,
        now: DateTime<Utc>,
    ) -> CoreResult<()> {
        if order.status != OrderStatus::Delivered {
            return Err(CoreError::InvalidOrderStatus {
                order_id: order.id,
                current_status: order.status,
                operation: "return",
            });
        }

        if item.cancellation_status == CancellationStatus::Cancelled {
            return Err(CoreError::ItemAlreadyCancelled { item_id: item.id });
        }

        if let Some(current_status) = item.return_status {
            return Err(CoreError::ReturnAlreadyRequested {
                item_id: item.id,
                current_status,
            });
        }

        if now > order.return_anchor() + Duration::days(window_days) {
            return Err(CoreError::ReturnWindowExpired {
                order_id: order.id,
                item_id: item.id,
                window_days,
            });
        }

        Ok(())
    }
}

// =============================================================================
// Refund Math
// =============================================================================

/// What the customer actually paid for a line: `total − coupon_discount`.
pub fn item_refund_amount(item: &OrderItem) -> Money {
    (item.total - item.coupon_discount).clamp_non_negative()
}

/// Coupon share removed from the order when one line is cancelled.
///
/// `removed = item.total / original_subtotal × original_coupon_discount`,
/// never more than the coupon discount still on the order.
pub fn prorated_coupon_share(order: &Order, item: &OrderItem) -> Money {
    order
        .original_coupon_discount
        .ratio(item.total, order.original_subtotal)
        .min(order.coupon_discount)
        .clamp_non_negative()
}

// =============================================================================
// Order Totals
// =============================================================================

/// The mutable monetary columns of an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderTotals {
    pub total_amount: Money,
    pub product_discount: Money,
    pub category_discount: Money,
    pub coupon_discount: Money,
    pub delivery_charge: Money,
    pub final_total: Money,
}

impl OrderTotals {
    pub fn of(order: &Order) -> Self {
        OrderTotals {
            total_amount: order.total_amount,
            product_discount: order.product_discount,
            category_discount: order.category_discount,
            coupon_discount: order.coupon_discount,
            delivery_charge: order.delivery_charge,
            final_total: order.final_total,
        }
    }

    /// Totals after taking `item` off the order along with `coupon_removed`
    /// of the order's coupon discount.
    ///
    /// `final_total` drops by exactly `item.total − coupon_removed` unless
    /// the clamp at zero kicks in.
    pub fn without_line(&self, item: &OrderItem, coupon_removed: Money) -> OrderTotals {
        let coupon_removed = coupon_removed.min(self.coupon_discount);
        let removed = item.total - coupon_removed;

        OrderTotals {
            total_amount: (self.total_amount - item.subtotal()).clamp_non_negative(),
            product_discount: (self.product_discount - item.product_discount).clamp_non_negative(),
            category_discount: (self.category_discount - item.category_discount)
                .clamp_non_negative(),
            coupon_discount: self.coupon_discount - coupon_removed,
            delivery_charge: self.delivery_charge,
            final_total: (self.final_total - removed).clamp_non_negative(),
        }
    }
}

// =============================================================================
// Refund References
// =============================================================================

/// Ledger reference for a whole-order cancellation refund.
pub fn cancel_reference(order_id: i64) -> String {
    format!("REFUND-ORDER-{order_id}-CANCEL")
}

/// Ledger reference for an approved item return.
pub fn item_refund_reference(order_id: i64, item_id: i64) -> String {
    format!("REFUND-ORDER-{order_id}-ITEM-{item_id}")
}

/// Ledger reference for a single-item cancellation refund.
pub fn item_cancel_reference(order_id: i64, item_id: i64) -> String {
    format!("REFUND-ORDER-{order_id}-ITEM-{item_id}-CANCEL")
}

/// Ledger reference for a wallet-paid checkout.
pub fn payment_reference(order_id: i64) -> String {
    format!("PAYMENT-ORDER-{order_id}")
}

// =============================================================================
// Requests & Patches
// =============================================================================

/// Admin status change. Only the next fulfilment step is accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct StatusUpdate {
    pub status: OrderStatus,
}

impl StatusUpdate {
    /// Checks the transition from `order`'s current status.
    pub fn check(&self, order: &Order) -> CoreResult<()> {
        let fulfilment = matches!(
            self.status,
            OrderStatus::Processing
                | OrderStatus::Shipped
                | OrderStatus::OutForDelivery
                | OrderStatus::Delivered
        );
        if !fulfilment {
            return Err(ValidationError::InvalidFormat {
                field: "status".to_string(),
                reason: "only fulfilment statuses can be set directly".to_string(),
            }
            .into());
        }

        if order.status.next_fulfilment_step() != Some(self.status) {
            return Err(CoreError::InvalidOrderStatus {
                order_id: order.id,
                current_status: order.status,
                operation: "advance",
            });
        }

        Ok(())
    }
}

/// Customer checkout input. Pricing comes from the cart, never from here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckoutRequest {
    pub payment_method: PaymentMethod,
    #[serde(default)]
    pub delivery_charge: Money,
}

impl CheckoutRequest {
    pub fn check(&self) -> CoreResult<()> {
        validate_non_negative("delivery_charge", self.delivery_charge)?;
        Ok(())
    }
}

/// Admin verdict on a pending item return.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum ReviewDecision {
    Approve { condition: ItemCondition },
    Reject { reason: String },
}

/// Columns written when an item return is requested.
#[derive(Debug, Clone, PartialEq)]
pub struct ReturnRequestPatch {
    pub item_id: i64,
    pub reason: String,
    pub requested_at: DateTime<Utc>,
    pub refund_amount: Money,
}

impl ReturnRequestPatch {
    pub fn new(item: &OrderItem, reason: &str, now: DateTime<Utc>) -> Self {
        ReturnRequestPatch {
            item_id: item.id,
            reason: reason.to_string(),
            requested_at: now,
            refund_amount: item_refund_amount(item),
        }
    }
}

/// Columns written when an admin resolves an item return.
#[derive(Debug, Clone, PartialEq)]
pub struct ReviewPatch {
    pub item_id: i64,
    pub return_status: ReturnStatus,
    pub item_condition: Option<ItemCondition>,
    pub rejection_reason: Option<String>,
    pub refunded_at: Option<DateTime<Utc>>,
    pub stock_restored: bool,
}

/// Columns written when an order is cancelled.
#[derive(Debug, Clone, PartialEq)]
pub struct CancellationPatch {
    pub order_id: i64,
    pub reason: Option<String>,
    pub refund_status: RefundStatus,
    pub refund_amount: Money,
    pub refunded_at: Option<DateTime<Utc>>,
    pub refunded_to_wallet: bool,
}

/// Where an order lands once no item return is pending.
///
/// Whole-order returns resolve to `ReturnCompleted` if anything was
/// approved and back to `Delivered` otherwise. Per-item returns never move
/// the order out of `Delivered`.
pub fn settled_status(order: &Order, items: &[OrderItem]) -> OrderStatus {
    if order.status != OrderStatus::ReturnRequested {
        return order.status;
    }

    if items.iter().any(OrderItem::has_pending_return) {
        return OrderStatus::ReturnRequested;
    }

    if items
        .iter()
        .any(|i| i.return_status == Some(ReturnStatus::Approved))
    {
        OrderStatus::ReturnCompleted
    } else {
        OrderStatus::Delivered
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 4, 2, 9, 0, 0).unwrap()
    }

    fn m(raw: &str) -> Money {
        Money::parse(raw).unwrap()
    }

    fn order(status: OrderStatus) -> Order {
        Order {
            id: 7,
            user_id: 1,
            status,
            total_amount: m("400"),
            product_discount: m("20"),
            category_discount: Money::zero(),
            coupon_discount: m("38"),
            delivery_charge: m("40"),
            final_total: m("382"),
            original_subtotal: m("380"),
            original_coupon_discount: m("38"),
            coupon_code: Some("SAVE10".to_string()),
            payment_method: PaymentMethod::Online,
            has_pending_returns: false,
            cancellation_reason: None,
            return_reason: None,
            refund_status: None,
            refund_amount: Money::zero(),
            refunded_at: None,
            refunded_to_wallet: false,
            created_at: t0(),
            updated_at: t0(),
            delivered_at: None,
        }
    }

    fn item(id: i64, price: &str, qty: i64, product: &str, coupon: &str) -> OrderItem {
        let price = m(price);
        let product = m(product);
        OrderItem {
            id,
            order_id: 7,
            book_id: id * 10,
            quantity: qty,
            price,
            product_discount: product,
            category_discount: Money::zero(),
            coupon_discount: m(coupon),
            total: price * qty - product,
            return_requested: false,
            return_status: None,
            return_reason: None,
            return_requested_at: None,
            item_condition: None,
            rejection_reason: None,
            refund_status: None,
            refund_amount: Money::zero(),
            refunded_at: None,
            cancellation_status: CancellationStatus::Active,
            stock_restored: false,
        }
    }

    #[test]
    fn test_cancel_guard_window() {
        let policy = OrderPolicy::default();
        let o = order(OrderStatus::Placed);
        assert!(policy.check_cancellable(&o, t0() + Duration::minutes(30)).is_ok());

        let err = policy
            .check_cancellable(&o, t0() + Duration::minutes(31))
            .unwrap_err();
        assert!(matches!(
            err,
            CoreError::CancellationWindowExpired { window_minutes: 30, .. }
        ));
    }

    #[test]
    fn test_cancel_guard_status_first() {
        let policy = OrderPolicy::default();
        for status in [
            OrderStatus::Shipped,
            OrderStatus::Delivered,
            OrderStatus::Cancelled,
        ] {
            let err = policy
                .check_cancellable(&order(status), t0() + Duration::days(3))
                .unwrap_err();
            assert!(matches!(err, CoreError::InvalidOrderStatus { current_status, .. } if current_status == status));
        }
    }

    #[test]
    fn test_return_guard() {
        let policy = OrderPolicy::default();
        let mut o = order(OrderStatus::Delivered);
        o.delivered_at = Some(t0() + Duration::days(1));
        let i = item(1, "100", 2, "10", "19");

        assert!(policy
            .check_item_returnable(&o, &i, 7, t0() + Duration::days(8))
            .is_ok());

        let err = policy
            .check_item_returnable(&o, &i, 7, t0() + Duration::days(9))
            .unwrap_err();
        assert!(matches!(err, CoreError::ReturnWindowExpired { window_days: 7, .. }));

        let mut pending = i.clone();
        pending.return_status = Some(ReturnStatus::Pending);
        let err = policy
            .check_item_returnable(&o, &pending, 7, t0())
            .unwrap_err();
        assert!(matches!(err, CoreError::ReturnAlreadyRequested { .. }));

        let err = policy
            .check_item_returnable(&order(OrderStatus::Shipped), &i, 7, t0())
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidOrderStatus { .. }));
    }

    #[test]
    fn test_category_window_override() {
        let policy = OrderPolicy::default();
        let cat = Category {
            id: 1,
            name: "Textbooks".to_string(),
            return_window_days: Some(14),
            is_active: true,
        };
        assert_eq!(policy.return_window_days(Some(&cat)), 14);
        assert_eq!(policy.return_window_days(None), 7);
    }

    #[test]
    fn test_return_removal_drops_final_by_refund() {
        let o = order(OrderStatus::Delivered);
        let a = item(1, "100", 2, "20", "19");
        let b = item(2, "200", 1, "0", "19");

        let refund = item_refund_amount(&a);
        assert_eq!(refund, m("161"));

        let after = OrderTotals::of(&o).without_line(&a, a.coupon_discount);
        assert_eq!(o.final_total - after.final_total, refund);
        assert_eq!(after.total_amount, m("200"));
        assert_eq!(after.coupon_discount, m("19"));

        let mut reduced = o.clone();
        reduced.total_amount = after.total_amount;
        reduced.product_discount = after.product_discount;
        reduced.category_discount = after.category_discount;
        reduced.coupon_discount = after.coupon_discount;
        assert_eq!(reduced.priced_total(), after.final_total);
        assert_eq!(b.total, m("200"));
    }

    #[test]
    fn test_prorated_share() {
        let o = order(OrderStatus::Placed);
        let a = item(1, "100", 2, "20", "19");
        // 180 / 380 × 38 = 18
        assert_eq!(prorated_coupon_share(&o, &a), m("18"));

        let mut spent = o.clone();
        spent.coupon_discount = m("5");
        assert_eq!(prorated_coupon_share(&spent, &a), m("5"));
    }

    #[test]
    fn test_status_update_one_step() {
        let o = order(OrderStatus::Placed);
        assert!(StatusUpdate { status: OrderStatus::Processing }.check(&o).is_ok());

        let err = StatusUpdate { status: OrderStatus::Delivered }
            .check(&o)
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidOrderStatus { .. }));

        let err = StatusUpdate { status: OrderStatus::Cancelled }
            .check(&o)
            .unwrap_err();
        assert!(matches!(err, CoreError::Validation(_)));
    }

    #[test]
    fn test_settled_status() {
        let o = order(OrderStatus::ReturnRequested);
        let mut a = item(1, "100", 1, "0", "0");
        let mut b = item(2, "100", 1, "0", "0");

        a.return_status = Some(ReturnStatus::Approved);
        b.return_status = Some(ReturnStatus::Pending);
        assert_eq!(settled_status(&o, &[a.clone(), b.clone()]), OrderStatus::ReturnRequested);

        b.return_status = Some(ReturnStatus::Rejected);
        assert_eq!(settled_status(&o, &[a.clone(), b.clone()]), OrderStatus::ReturnCompleted);

        a.return_status = Some(ReturnStatus::Rejected);
        assert_eq!(settled_status(&o, &[a, b]), OrderStatus::Delivered);

        assert_eq!(settled_status(&order(OrderStatus::Delivered), &[]), OrderStatus::Delivered);
    }

    #[test]
    fn test_review_decision_wire_shape() {
        let json = r#"{"decision":"approve","condition":"good"}"#;
        let d: ReviewDecision = serde_json::from_str(json).unwrap();
        assert_eq!(d, ReviewDecision::Approve { condition: ItemCondition::Good });

        let json = r#"{"decision":"reject","reason":"torn cover"}"#;
        let d: ReviewDecision = serde_json::from_str(json).unwrap();
        assert!(matches!(d, ReviewDecision::Reject { .. }));
    }

    #[test]
    fn test_references() {
        assert_eq!(item_refund_reference(12, 40), "REFUND-ORDER-12-ITEM-40");
        assert_eq!(cancel_reference(12), "REFUND-ORDER-12-CANCEL");
        assert_eq!(item_cancel_reference(12, 40), "REFUND-ORDER-12-ITEM-40-CANCEL");
    }
}
