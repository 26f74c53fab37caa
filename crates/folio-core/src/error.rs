//! # Error Types
//!
//! Domain-specific error types for folio-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  folio-core errors (this file)                                         │
//! │  ├── CoreError        - Business rule failures, classified by kind     │
//! │  └── ValidationError  - Input shape failures                           │
//! │                                                                         │
//! │  folio-db errors (separate crate)                                      │
//! │  ├── DbError          - Database operation failures                    │
//! │  └── ServiceError     - CoreError | DbError, returned by services      │
//! │                                                                         │
//! │  Flow: ValidationError → CoreError → ServiceError → ErrorResponse      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Error Kinds
//! Every failure lands in exactly one [`ErrorKind`]. Only `TransientInfra`
//! is worth retrying, and only by the caller: nothing partial was persisted.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use ts_rs::TS;

use crate::money::Money;
use crate::types::{OrderStatus, ReturnStatus};

// =============================================================================
// Error Kind
// =============================================================================

/// Failure taxonomy shared by every operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Bad input shape, missing reason, invalid status value. 4xx, never retried.
    Validation,
    /// The entity is in the wrong state for the request. 4xx, carries current state.
    StateConflict,
    /// Entity missing, or owned by someone other than the caller.
    NotFound,
    /// Transaction start/commit failure. 5xx, safe to retry the whole request.
    TransientInfra,
}

// =============================================================================
// Core Error
// =============================================================================

/// A pricing, coupon or lifecycle rule refused the request.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// The operation needs the admin role.
    #[error("Operation requires an administrator")]
    AdminRequired,

    // -------------------------------------------------------------------------
    // Not found (uniform wording: never reveals another user's data)
    // -------------------------------------------------------------------------
    /// Coupon code unknown, inactive or expired.
    #[error("Coupon not found: {code}")]
    CouponNotFound { code: String },

    /// Order missing or not owned by the caller.
    #[error("Order not found: {order_id}")]
    OrderNotFound { order_id: i64 },

    /// Order item missing or not part of the order.
    #[error("Order item not found: {item_id}")]
    OrderItemNotFound { item_id: i64 },

    /// Book missing from the catalog.
    #[error("Book not found: {book_id}")]
    BookNotFound { book_id: i64 },

    /// Book is not in the caller's cart.
    #[error("Book {book_id} is not in the cart")]
    CartItemNotFound { book_id: i64 },

    // -------------------------------------------------------------------------
    // Coupon conflicts
    // -------------------------------------------------------------------------
    /// Global usage limit reached.
    #[error("Coupon {code} has reached its usage limit of {limit}")]
    CouponUsageLimitExceeded { code: String, limit: i64 },

    /// The caller already redeemed this coupon on a previous order.
    #[error("Coupon {code} has already been used")]
    CouponAlreadyUsed { code: String },

    /// Cart subtotal below the coupon's minimum order value.
    #[error("Coupon {code} requires a minimum order of {min_order}, cart subtotal is {subtotal}")]
    MinOrderNotMet {
        code: String,
        min_order: Money,
        subtotal: Money,
    },

    /// Coupon code already exists (case-insensitive).
    #[error("Coupon code {code} already exists")]
    DuplicateCoupon { code: String },

    // -------------------------------------------------------------------------
    // Cart / stock conflicts
    // -------------------------------------------------------------------------
    /// Nothing to price or check out.
    #[error("Cart is empty")]
    CartEmpty,

    /// Book inactive, blocked or out of stock.
    #[error("Book {book_id} is not available for checkout")]
    BookUnavailable { book_id: i64 },

    /// Insufficient stock to cover the requested quantity.
    #[error("Insufficient stock for book {book_id}: available {available}, requested {requested}")]
    InsufficientStock {
        book_id: i64,
        available: i64,
        requested: i64,
    },

    /// Per-book cart quantity ceiling.
    #[error("Quantity {requested} exceeds maximum allowed ({max})")]
    QuantityTooLarge { requested: i64, max: i64 },

    /// Wallet cannot cover a wallet-paid order.
    #[error("Insufficient wallet balance: available {available}, required {required}")]
    InsufficientBalance { available: Money, required: Money },

    /// An offer for the same target already covers part of the window.
    #[error("An active offer already exists for {target} {target_id}")]
    OverlappingOffer { target: String, target_id: i64 },

    // -------------------------------------------------------------------------
    // Order lifecycle conflicts
    // -------------------------------------------------------------------------
    /// Order is not in a state that allows the requested operation.
    #[error("Order {order_id} is {current_status:?}, cannot {operation}")]
    InvalidOrderStatus {
        order_id: i64,
        current_status: OrderStatus,
        operation: &'static str,
    },

    /// Cancellation window has elapsed.
    #[error("Order {order_id} can no longer be cancelled (window of {window_minutes} minutes has passed)")]
    CancellationWindowExpired { order_id: i64, window_minutes: i64 },

    /// Return window for the item's category has elapsed.
    #[error("Return window of {window_days} days has passed for item {item_id} of order {order_id}")]
    ReturnWindowExpired {
        order_id: i64,
        item_id: i64,
        window_days: i64,
    },

    /// A return already exists for the item.
    #[error("Return already requested for item {item_id} (status {current_status:?})")]
    ReturnAlreadyRequested {
        item_id: i64,
        current_status: ReturnStatus,
    },

    /// Admin decision on an item that has no pending return.
    #[error("Item {item_id} has no pending return")]
    NoPendingReturn { item_id: i64 },

    /// Item was already cancelled.
    #[error("Item {item_id} is already cancelled")]
    ItemAlreadyCancelled { item_id: i64 },
}

impl CoreError {
    /// Classifies the error into the shared taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            CoreError::Validation(_) | CoreError::AdminRequired | CoreError::QuantityTooLarge { .. } => {
                ErrorKind::Validation
            }

            CoreError::CouponNotFound { .. }
            | CoreError::OrderNotFound { .. }
            | CoreError::OrderItemNotFound { .. }
            | CoreError::BookNotFound { .. }
            | CoreError::CartItemNotFound { .. } => ErrorKind::NotFound,

            CoreError::CouponUsageLimitExceeded { .. }
            | CoreError::CouponAlreadyUsed { .. }
            | CoreError::MinOrderNotMet { .. }
            | CoreError::DuplicateCoupon { .. }
            | CoreError::CartEmpty
            | CoreError::BookUnavailable { .. }
            | CoreError::InsufficientStock { .. }
            | CoreError::InsufficientBalance { .. }
            | CoreError::OverlappingOffer { .. }
            | CoreError::InvalidOrderStatus { .. }
            | CoreError::CancellationWindowExpired { .. }
            | CoreError::ReturnWindowExpired { .. }
            | CoreError::ReturnAlreadyRequested { .. }
            | CoreError::NoPendingReturn { .. }
            | CoreError::ItemAlreadyCancelled { .. } => ErrorKind::StateConflict,
        }
    }

    /// Stable machine-readable code for API payloads.
    pub fn code(&self) -> &'static str {
        match self {
            CoreError::Validation(_) => "VALIDATION_ERROR",
            CoreError::AdminRequired => "ADMIN_REQUIRED",
            CoreError::CouponNotFound { .. } => "COUPON_NOT_FOUND",
            CoreError::OrderNotFound { .. } => "ORDER_NOT_FOUND",
            CoreError::OrderItemNotFound { .. } => "ORDER_ITEM_NOT_FOUND",
            CoreError::BookNotFound { .. } => "BOOK_NOT_FOUND",
            CoreError::CartItemNotFound { .. } => "CART_ITEM_NOT_FOUND",
            CoreError::CouponUsageLimitExceeded { .. } => "USAGE_LIMIT_EXCEEDED",
            CoreError::CouponAlreadyUsed { .. } => "ALREADY_USED",
            CoreError::MinOrderNotMet { .. } => "MIN_ORDER_NOT_MET",
            CoreError::DuplicateCoupon { .. } => "DUPLICATE_COUPON",
            CoreError::CartEmpty => "CART_EMPTY",
            CoreError::BookUnavailable { .. } => "BOOK_UNAVAILABLE",
            CoreError::InsufficientStock { .. } => "INSUFFICIENT_STOCK",
            CoreError::QuantityTooLarge { .. } => "QUANTITY_TOO_LARGE",
            CoreError::InsufficientBalance { .. } => "INSUFFICIENT_BALANCE",
            CoreError::OverlappingOffer { .. } => "OVERLAPPING_OFFER",
            CoreError::InvalidOrderStatus { .. } => "INVALID_ORDER_STATUS",
            CoreError::CancellationWindowExpired { .. } => "CANCELLATION_WINDOW_EXPIRED",
            CoreError::ReturnWindowExpired { .. } => "RETURN_WINDOW_EXPIRED",
            CoreError::ReturnAlreadyRequested { .. } => "RETURN_ALREADY_REQUESTED",
            CoreError::NoPendingReturn { .. } => "NO_PENDING_RETURN",
            CoreError::ItemAlreadyCancelled { .. } => "ITEM_ALREADY_CANCELLED",
        }
    }
}

// =============================================================================
// Validation Error
// =============================================================================

/// Malformed request input, rejected before any rule or query runs.
///
/// `field` names the request field so a form can highlight it.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// Missing, or blank after trimming.
    #[error("{field} is required")]
    Required { field: String },

    #[error("{field} must be at most {max} characters")]
    TooLong { field: String, max: usize },

    /// Quantities and cart sizes.
    #[error("{field} must be between {min} and {max}")]
    OutOfRange { field: String, min: i64, max: i64 },

    #[error("{field} must be positive")]
    MustBePositive { field: String },

    #[error("{field} must not be negative")]
    MustNotBeNegative { field: String },

    /// Invalid format (e.g., bad decimal, bad code characters).
    #[error("{field} has invalid format: {reason}")]
    InvalidFormat { field: String, reason: String },

    /// A start/end pair is out of order.
    #[error("{field} must start before it ends")]
    InvalidWindow { field: String },
}

// =============================================================================
// Result Type Alias
// =============================================================================

pub type CoreResult<T> = Result<T, CoreError>;

// =============================================================================
// Unit Tests
// =============================================================================
