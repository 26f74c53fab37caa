//! # Services
//!
//! The exposed operations. Each one is a single database transaction
//! composed from connection-level repository functions and the pure rules
//! in `folio-core`.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  let mut tx = pool.begin()                                              │
//! │       │                                                                 │
//! │       ├── load      repository::*::fetch_*(&mut tx, ..)                 │
//! │       ├── decide    folio_core::{coupon, lifecycle, pricing}            │
//! │       ├── write     guarded UPDATEs, ledger postings                    │
//! │       │                                                                 │
//! │       ├── any `?`  ──► tx dropped ──► ROLLBACK (nothing persisted)      │
//! │       └── tx.commit()                                                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Callers pass the authenticated [`Caller`](folio_core::Caller) and `now`
//! explicitly. No service reads a clock or request-scoped state.

pub mod cart;
pub mod coupon;
pub mod order;
