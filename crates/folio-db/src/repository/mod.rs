//! # Repository Module
//!
//! SQL for every table lives here and nowhere else.
//!
//! ## Two Levels
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Pool level          db.coupons().get_by_code("SAVE10")                 │
//! │                      acquires a connection, one statement, returns      │
//! │                                                                         │
//! │  Connection level    coupon::fetch_by_code(&mut tx, "SAVE10")           │
//! │                      free functions taking `&mut SqliteConnection`,     │
//! │                      composed by services inside one transaction        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Available Repositories
//!
//! - [`CatalogRepository`](catalog::CatalogRepository) - Books, categories, stock
//! - [`OfferRepository`](offer::OfferRepository) - Product and category offers
//! - [`CartRepository`](cart::CartRepository) - Cart lines
//! - [`CouponRepository`](coupon::CouponRepository) - Coupons, active coupon, redemptions
//! - [`OrderRepository`](order::OrderRepository) - Orders and items
//! - [`WalletLedger`](wallet::WalletLedger) - Wallets and the transaction log

pub mod cart;
pub mod catalog;
pub mod coupon;
pub mod offer;
pub mod order;
pub mod wallet;
