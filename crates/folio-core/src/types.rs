//! # Domain Types
//!
//! Core domain types used throughout Folio.
//!
//! ## Type Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Domain Types                                    │
//! │                                                                         │
//! │  Catalog (read-only here)    Discounts               Money movement     │
//! │  ┌─────────────┐            ┌──────────────┐        ┌───────────────┐  │
//! │  │ Book        │◄───────────│ Offer        │        │ Wallet        │  │
//! │  │ Category    │  targets   │ Coupon       │        │ WalletTxn     │  │
//! │  └─────────────┘            │ ActiveCoupon │        └───────▲───────┘  │
//! │         ▲                   └──────────────┘                │          │
//! │         │ snapshot at checkout                     refunds  │          │
//! │  ┌──────┴──────────────────────────────────────────────────┴───────┐  │
//! │  │ Order ──< OrderItem   (price/discount/total frozen as history)  │  │
//! │  └─────────────────────────────────────────────────────────────────┘  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Snapshot Pattern
//! Orders and their items copy pricing at checkout. Nothing downstream
//! re-reads catalog prices or offers for an existing order.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::error::{CoreError, CoreResult};
use crate::money::{Money, Percent};

// =============================================================================
// Caller
// =============================================================================

/// Role resolved by the auth layer before any operation runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Customer,
    Admin,
}

/// The authenticated caller, passed explicitly to every operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Caller {
    pub user_id: i64,
    pub role: Role,
}

impl Caller {
    pub const fn customer(user_id: i64) -> Self {
        Caller {
            user_id,
            role: Role::Customer,
        }
    }

    pub const fn admin(user_id: i64) -> Self {
        Caller {
            user_id,
            role: Role::Admin,
        }
    }

    /// Fails with `AdminRequired` unless the caller is an admin.
    pub fn require_admin(&self) -> CoreResult<()> {
        match self.role {
            Role::Admin => Ok(()),
            Role::Customer => Err(CoreError::AdminRequired),
        }
    }
}

// =============================================================================
// Catalog
// =============================================================================

/// A book as seen by pricing. Owned by the catalog; only stock is touched here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct Book {
    pub id: i64,
    pub title: String,
    /// Unit price.
    pub price: Money,
    /// Units on hand, never negative.
    pub stock: i64,
    pub category_id: i64,
    pub is_active: bool,
    pub blocked: bool,
}

impl Book {
    /// Whether `quantity` units of this book may be checked out right now.
    pub fn can_checkout(&self, quantity: i64) -> bool {
        self.is_active && !self.blocked && self.stock >= quantity
    }
}

/// A catalog category. `return_window_days` overrides the default policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct Category {
    pub id: i64,
    pub name: String,
    pub return_window_days: Option<i64>,
    pub is_active: bool,
}

// =============================================================================
// Offers
// =============================================================================

/// What an offer is scoped to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum OfferTarget {
    Product,
    Category,
}

impl OfferTarget {
    pub const fn as_str(&self) -> &'static str {
        match self {
            OfferTarget::Product => "product",
            OfferTarget::Category => "category",
        }
    }
}

/// A time-bounded percentage discount on one book or one category.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct Offer {
    pub id: i64,
    pub target: OfferTarget,
    pub target_id: i64,
    pub discount_percent: Percent,
    pub start_date: DateTime<Utc>,
    /// Exclusive.
    pub end_date: DateTime<Utc>,
    pub active: bool,
}

impl Offer {
    /// `active AND start_date <= now < end_date`.
    pub fn is_effective(&self, now: DateTime<Utc>) -> bool {
        self.active && self.start_date <= now && now < self.end_date
    }

    /// Whether this offer's window intersects `[start, end)`.
    pub fn overlaps(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> bool {
        self.active && self.start_date < end && start < self.end_date
    }
}

// =============================================================================
// Coupons
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum CouponType {
    /// Fixed amount off.
    Flat,
    /// Percentage of the subtotal, capped by `max_discount`.
    Percent,
}

/// A user-applied discount code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct Coupon {
    pub id: i64,
    /// Stored upper-cased; matched case-insensitively.
    pub code: String,
    pub coupon_type: CouponType,
    /// Amount off for `Flat`, percentage points for `Percent`.
    pub value: Money,
    pub min_order_value: Money,
    pub max_discount: Money,
    pub expiry: DateTime<Utc>,
    pub usage_limit: i64,
    pub used_count: i64,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

impl Coupon {
    /// Active and not yet expired at `now`.
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.active && now < self.expiry
    }

    pub fn is_exhausted(&self) -> bool {
        self.used_count >= self.usage_limit
    }
}

/// The single coupon a user currently has applied to their cart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct UserActiveCoupon {
    pub user_id: i64,
    pub coupon_id: i64,
    pub code: String,
    pub applied_at: DateTime<Utc>,
}

/// Redemption record: one per user per coupon, ever.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct UserCoupon {
    pub user_id: i64,
    pub coupon_id: i64,
    pub order_id: Option<i64>,
    pub used_at: DateTime<Utc>,
}

// =============================================================================
// Cart
// =============================================================================

/// One book in a user's cart. Unique on `(user_id, book_id)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct CartItem {
    pub user_id: i64,
    pub book_id: i64,
    pub quantity: i64,
    pub added_at: DateTime<Utc>,
}

// =============================================================================
// Order Status
// =============================================================================

/// Order lifecycle.
///
/// ```text
/// Placed → Processing → Shipped → OutForDelivery → Delivered → ReturnRequested → ReturnCompleted
///    │          │
///    └──────────┴──► Cancelled
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Placed,
    Processing,
    Shipped,
    OutForDelivery,
    Delivered,
    Cancelled,
    ReturnRequested,
    ReturnCompleted,
}

impl OrderStatus {
    /// The next fulfilment step an admin may move the order to.
    pub const fn next_fulfilment_step(&self) -> Option<OrderStatus> {
        match self {
            OrderStatus::Placed => Some(OrderStatus::Processing),
            OrderStatus::Processing => Some(OrderStatus::Shipped),
            OrderStatus::Shipped => Some(OrderStatus::OutForDelivery),
            OrderStatus::OutForDelivery => Some(OrderStatus::Delivered),
            _ => None,
        }
    }

    /// Statuses from which a customer may still cancel.
    pub const fn is_cancellable(&self) -> bool {
        matches!(self, OrderStatus::Placed | OrderStatus::Processing)
    }
}

impl Default for OrderStatus {
    fn default() -> Self {
        OrderStatus::Placed
    }
}

// =============================================================================
// Payment / Refund / Return enums
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    /// Cash on delivery: nothing collected upfront.
    Cod,
    /// Paid through the external gateway.
    Online,
    /// Paid from the wallet balance.
    Wallet,
}

impl PaymentMethod {
    /// Whether money was collected at checkout (and so must go back on cancel).
    pub const fn is_prepaid(&self) -> bool {
        !matches!(self, PaymentMethod::Cod)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum RefundStatus {
    Pending,
    Completed,
    /// Cancelled COD order: nothing was paid, nothing is owed.
    NotApplicable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum ReturnStatus {
    Pending,
    Approved,
    Rejected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum CancellationStatus {
    Active,
    Cancelled,
}

impl Default for CancellationStatus {
    fn default() -> Self {
        CancellationStatus::Active
    }
}

/// Condition reported by the admin inspecting a returned item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum ItemCondition {
    /// Resellable: goes back on the shelf.
    Good,
    Damaged,
}

// =============================================================================
// Order
// =============================================================================

/// A placed order with its checkout-time pricing snapshot.
///
/// ## Invariant
/// `final_total == (total_amount - discount() - coupon_discount + delivery_charge)`
/// clamped at zero, whenever the order is priced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct Order {
    pub id: i64,
    pub user_id: i64,
    pub status: OrderStatus,
    /// Pre-discount subtotal of the lines still on the order.
    pub total_amount: Money,
    pub product_discount: Money,
    pub category_discount: Money,
    pub coupon_discount: Money,
    pub delivery_charge: Money,
    pub final_total: Money,
    /// Σ line totals (after offers) at checkout. Never changes.
    pub original_subtotal: Money,
    /// Coupon discount at checkout. Never changes.
    pub original_coupon_discount: Money,
    pub coupon_code: Option<String>,
    pub payment_method: PaymentMethod,
    pub has_pending_returns: bool,
    pub cancellation_reason: Option<String>,
    pub return_reason: Option<String>,
    pub refund_status: Option<RefundStatus>,
    pub refund_amount: Money,
    pub refunded_at: Option<DateTime<Utc>>,
    pub refunded_to_wallet: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub delivered_at: Option<DateTime<Utc>>,
}

impl Order {
    /// Product + category discount.
    #[inline]
    pub fn discount(&self) -> Money {
        self.product_discount + self.category_discount
    }

    /// Recomputes `final_total` from its parts.
    pub fn priced_total(&self) -> Money {
        (self.total_amount - self.discount() - self.coupon_discount + self.delivery_charge)
            .clamp_non_negative()
    }

    /// Anchor for return windows.
    pub fn return_anchor(&self) -> DateTime<Utc> {
        self.delivered_at.unwrap_or(self.updated_at)
    }
}

// =============================================================================
// Order Item
// =============================================================================

/// A line on an order. Pricing fields are immutable history; only the
/// return/cancellation sub-state changes after checkout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct OrderItem {
    pub id: i64,
    pub order_id: i64,
    pub book_id: i64,
    pub quantity: i64,
    /// Unit price at checkout.
    pub price: Money,
    pub product_discount: Money,
    pub category_discount: Money,
    /// This line's share of the order coupon discount.
    pub coupon_discount: Money,
    /// Line total after offers, before coupon.
    pub total: Money,
    pub return_requested: bool,
    pub return_status: Option<ReturnStatus>,
    pub return_reason: Option<String>,
    pub return_requested_at: Option<DateTime<Utc>>,
    pub item_condition: Option<ItemCondition>,
    pub rejection_reason: Option<String>,
    pub refund_status: Option<RefundStatus>,
    pub refund_amount: Money,
    pub refunded_at: Option<DateTime<Utc>>,
    pub cancellation_status: CancellationStatus,
    pub stock_restored: bool,
}

impl OrderItem {
    /// `price × quantity`.
    #[inline]
    pub fn subtotal(&self) -> Money {
        self.price * self.quantity
    }

    /// Product + category discount on this line.
    #[inline]
    pub fn discount(&self) -> Money {
        self.product_discount + self.category_discount
    }

    /// Still contributing to the order's totals.
    pub fn is_live(&self) -> bool {
        self.cancellation_status == CancellationStatus::Active
            && self.return_status != Some(ReturnStatus::Approved)
    }

    pub fn has_pending_return(&self) -> bool {
        self.return_status == Some(ReturnStatus::Pending)
    }
}

// =============================================================================
// Wallet
// =============================================================================

/// A user's wallet. `balance` always equals the signed sum of its ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct Wallet {
    pub id: i64,
    pub user_id: i64,
    pub balance: Money,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum TransactionType {
    Credit,
    Debit,
}

/// Append-only ledger row. `amount` is always positive; `tx_type` gives the sign.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct WalletTransaction {
    pub id: i64,
    pub wallet_id: i64,
    pub amount: Money,
    pub tx_type: TransactionType,
    pub description: String,
    pub order_id: Option<i64>,
    /// Unique per logical event, e.g. `REFUND-ORDER-12-ITEM-40`.
    pub reference: String,
    pub created_at: DateTime<Utc>,
}

impl WalletTransaction {
    /// `+amount` for credits, `-amount` for debits.
    pub fn signed_amount(&self) -> Money {
        match self.tx_type {
            TransactionType::Credit => self.amount,
            TransactionType::Debit => Money::zero() - self.amount,
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn at(h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, h, 0, 0).unwrap()
    }

    fn offer(active: bool) -> Offer {
        Offer {
            id: 1,
            target: OfferTarget::Product,
            target_id: 7,
            discount_percent: Percent::parse("10").unwrap(),
            start_date: at(8),
            end_date: at(12),
            active,
        }
    }

    #[test]
    fn test_offer_window_is_half_open() {
        let o = offer(true);
        assert!(!o.is_effective(at(8) - Duration::seconds(1)));
        assert!(o.is_effective(at(8)));
        assert!(o.is_effective(at(11)));
        assert!(!o.is_effective(at(12)));
        assert!(!offer(false).is_effective(at(9)));
    }

    #[test]
    fn test_offer_overlap() {
        let o = offer(true);
        assert!(o.overlaps(at(11), at(13)));
        assert!(!o.overlaps(at(12), at(14)));
        assert!(!offer(false).overlaps(at(9), at(10)));
    }

    #[test]
    fn test_fulfilment_steps() {
        assert_eq!(
            OrderStatus::Placed.next_fulfilment_step(),
            Some(OrderStatus::Processing)
        );
        assert_eq!(
            OrderStatus::OutForDelivery.next_fulfilment_step(),
            Some(OrderStatus::Delivered)
        );
        assert_eq!(OrderStatus::Delivered.next_fulfilment_step(), None);
        assert_eq!(OrderStatus::Cancelled.next_fulfilment_step(), None);
        assert!(OrderStatus::Processing.is_cancellable());
        assert!(!OrderStatus::Shipped.is_cancellable());
    }

    #[test]
    fn test_cod_is_not_prepaid() {
        assert!(!PaymentMethod::Cod.is_prepaid());
        assert!(PaymentMethod::Online.is_prepaid());
        assert!(PaymentMethod::Wallet.is_prepaid());
    }

    #[test]
    fn test_require_admin() {
        assert!(Caller::admin(1).require_admin().is_ok());
        assert!(matches!(
            Caller::customer(1).require_admin(),
            Err(CoreError::AdminRequired)
        ));
    }

    #[test]
    fn test_signed_amount() {
        let mut txn = WalletTransaction {
            id: 1,
            wallet_id: 1,
            amount: Money::from_major(40),
            tx_type: TransactionType::Credit,
            description: "refund".to_string(),
            order_id: None,
            reference: "R-1".to_string(),
            created_at: at(9),
        };
        assert_eq!(txn.signed_amount(), Money::from_major(40));
        txn.tx_type = TransactionType::Debit;
        assert_eq!(txn.signed_amount(), Money::from_major(-40));
    }
}
