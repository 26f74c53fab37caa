//! # folio-db: Storage and Services for Folio
//!
//! SQLite persistence for the catalog, carts, coupons, orders and the
//! wallet ledger, plus the services that run every multi-step mutation as
//! one transaction.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Folio Engine                                     │
//! │                                                                         │
//! │  caller (HTTP handler, CLI, test)  ── Caller + now ──┐                  │
//! │                                                      ▼                  │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                     folio-db (THIS CRATE)                       │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────────┐   ┌────────────────┐   ┌───────────────┐   │   │
//! │  │   │   Services    │   │  Repositories  │   │  Migrations   │   │   │
//! │  │   │               │   │                │   │  (embedded)   │   │   │
//! │  │   │ CartService   │──►│ catalog offer  │   │               │   │   │
//! │  │   │ CouponService │   │ cart coupon    │   │ 001_initial   │   │   │
//! │  │   │ OrderService  │   │ order wallet   │   │               │   │   │
//! │  │   └───────┬───────┘   └───────┬────────┘   └───────────────┘   │   │
//! │  │           │ rules             │ SQL                            │   │
//! │  │           ▼                   ▼                                │   │
//! │  │      folio-core          SqlitePool (pool.rs)                  │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`pool`] - Connection pool, `Database` handle
//! - [`config`] - Environment configuration
//! - [`migrations`] - Embedded database migrations
//! - [`error`] - Storage and service error types
//! - [`repository`] - SQL, one module per aggregate
//! - [`service`] - Transactional operations
//!
//! ## Usage
//!
//! ```rust,ignore
//! use chrono::Utc;
//! use folio_core::{lifecycle::CheckoutRequest, Caller, PaymentMethod};
//! use folio_db::{Database, EngineConfig};
//!
//! let config = EngineConfig::load()?;
//! let db = Database::new(config.db_config()).await?.with_policy(config.policy());
//!
//! let shopper = Caller::customer(7);
//! db.cart_service().add_item(shopper, 12, 2, Utc::now()).await?;
//! db.coupon_service().apply(shopper, "SAVE10", Utc::now()).await?;
//! let placed = db
//!     .order_service()
//!     .checkout(shopper, CheckoutRequest { payment_method: PaymentMethod::Cod, delivery_charge: Default::default() }, Utc::now())
//!     .await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod config;
pub mod error;
pub mod migrations;
pub mod pool;
pub mod repository;
pub mod service;

// =============================================================================
// Re-exports
// =============================================================================

pub use config::{ConfigError, EngineConfig};
pub use error::{DbError, DbResult, ServiceError, ServiceResult};
pub use pool::{Database, DbConfig};

// Repository re-exports for convenience
pub use repository::cart::CartRepository;
pub use repository::catalog::CatalogRepository;
pub use repository::coupon::CouponRepository;
pub use repository::offer::OfferRepository;
pub use repository::order::OrderRepository;
pub use repository::wallet::{LedgerEntry, Posting, WalletLedger};

pub use service::cart::CartService;
pub use service::coupon::CouponService;
pub use service::order::OrderService;
