//! # folio-core: Pricing & Refund Rules for Folio
//!
//! The pure half of the bookstore's pricing, coupon and refund
//! reconciliation engine. No I/O happens here.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Folio Engine                                     │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │               ★ folio-core (THIS CRATE) ★                       │   │
//! │  │                                                                 │   │
//! │  │   offer ──► pricing ──► coupon          lifecycle               │   │
//! │  │   (resolve)  (lines)    (eligibility,   (guards, refund math,   │   │
//! │  │                          allocation)     typed patches)         │   │
//! │  │                                                                 │   │
//! │  │   money · types · validation · error · outcome                  │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO DATABASE • NO CLOCK (callers pass `now`)          │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │                    folio-db (Persistence Layer)                 │   │
//! │  │     SQLite, migrations, repositories, wallet ledger, services   │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`money`] - Exact decimal `Money` and validated `Percent`
//! - [`types`] - Domain types (Book, Offer, Coupon, Order, Wallet, ...)
//! - [`offer`] - Offer Resolver
//! - [`pricing`] - Pricing Calculator and the presentation breakdown
//! - [`coupon`] - Coupon eligibility, discount and allocation
//! - [`lifecycle`] - Cancellation/return guards and refund math
//! - [`outcome`] - Typed per-operation responses
//! - [`validation`] - Input validation
//! - [`error`] - Error taxonomy
//!
//! ## Example
//!
//! ```rust
//! use folio_core::money::Money;
//! use folio_core::offer::ResolvedOffers;
//! use folio_core::pricing::{price_lines, PricingInput};
//!
//! let pricing = price_lines(&[PricingInput {
//!     book_id: 1,
//!     unit_price: Money::from_major(100),
//!     quantity: 3,
//!     offers: ResolvedOffers::default(),
//!     can_checkout: true,
//! }]);
//!
//! let breakdown = pricing.breakdown(Money::from_major(30));
//! assert_eq!(breakdown.final_total, "270.00");
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod coupon;
pub mod error;
pub mod lifecycle;
pub mod money;
pub mod offer;
pub mod outcome;
pub mod pricing;
pub mod types;
pub mod validation;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use error::{CoreError, CoreResult, ErrorKind, ValidationError};
pub use lifecycle::OrderPolicy;
pub use money::{Money, Percent};
pub use pricing::PriceBreakdown;
pub use types::*;

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Maximum quantity of a single book in a cart.
pub const MAX_ITEM_QUANTITY: i64 = 5;

/// Maximum distinct books in a cart.
pub const MAX_CART_ITEMS: usize = 50;

/// Longest accepted coupon code.
pub const MAX_COUPON_CODE_LENGTH: usize = 32;

/// Longest accepted cancellation/return/rejection reason.
pub const MAX_REASON_LENGTH: usize = 500;
