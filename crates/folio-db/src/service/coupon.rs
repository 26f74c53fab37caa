//! # Coupon Service
//!
//! Apply, remove and create coupons.
//!
//! ## Apply
//! ```text
//! BEGIN
//!   fetch_by_code ─── none / inactive / expired ──► CouponNotFound
//!   has_redeemed
//!   price_cart
//!   quote()  ── UsageLimit / AlreadyUsed / MinOrderNotMet ──► rollback
//!   replace_active (DELETE + INSERT)
//! COMMIT
//! ```
//! Nothing is consumed here; `used_count` only moves at checkout.

use chrono::{DateTime, Utc};
use folio_core::coupon::{self as coupon_rules, NewCoupon};
use folio_core::outcome::CouponOutcome;
use folio_core::validation::{normalize_coupon_code, validate_new_coupon};
use folio_core::{Caller, CoreError, Coupon, Money};
use sqlx::SqlitePool;
use tracing::{info, warn};

use crate::error::{DbError, ServiceError, ServiceResult};
use crate::repository::coupon;
use crate::service::cart::price_cart;

/// Coupon operations.
#[derive(Debug, Clone)]
pub struct CouponService {
    pool: SqlitePool,
}

impl CouponService {
    pub fn new(pool: SqlitePool) -> Self {
        CouponService { pool }
    }

    /// Applies `code` to the caller's cart, replacing any applied coupon.
    pub async fn apply(&self, caller: Caller, code: &str, now: DateTime<Utc>) -> ServiceResult<CouponOutcome> {
        let code = normalize_coupon_code(code)?;

        let mut tx = self.pool.begin().await.map_err(DbError::transaction)?;

        let found = coupon::fetch_by_code(&mut tx, &code)
            .await?
            .ok_or_else(|| CoreError::CouponNotFound { code: code.clone() })?;

        let already_used = coupon::has_redeemed(&mut tx, caller.user_id, found.id).await?;
        let priced = price_cart(&mut tx, caller.user_id, now).await?;

        let quote = match coupon_rules::quote(&found, already_used, &priced.pricing, now) {
            Ok(quote) => quote,
            Err(err) => {
                warn!(user_id = caller.user_id, code = %code, reason = err.code(), "Coupon rejected");
                return Err(err.into());
            }
        };

        coupon::replace_active(&mut tx, caller.user_id, &found, now).await?;

        tx.commit().await.map_err(DbError::transaction)?;

        info!(
            user_id = caller.user_id,
            coupon_id = found.id,
            code = %found.code,
            discount = %quote.discount,
            "Coupon applied"
        );

        Ok(CouponOutcome {
            code: Some(found.code),
            discount_per_unit: quote.per_unit.to_fixed(),
            breakdown: priced.pricing.breakdown(quote.discount),
        })
    }

    /// Removes the applied coupon `code` and returns the cart without it.
    ///
    /// Fails with `CouponNotFound` when `code` is not the applied coupon.
    pub async fn remove(&self, caller: Caller, code: &str, now: DateTime<Utc>) -> ServiceResult<CouponOutcome> {
        let code = normalize_coupon_code(code)?;

        let mut tx = self.pool.begin().await.map_err(DbError::transaction)?;

        let applied = coupon::fetch_active(&mut tx, caller.user_id).await?;
        if !applied.is_some_and(|a| a.code.eq_ignore_ascii_case(&code)) {
            return Err(CoreError::CouponNotFound { code }.into());
        }

        coupon::clear_active(&mut tx, caller.user_id).await?;
        let priced = price_cart(&mut tx, caller.user_id, now).await?;

        tx.commit().await.map_err(DbError::transaction)?;

        info!(user_id = caller.user_id, code = %code, "Coupon removed");

        Ok(CouponOutcome {
            code: None,
            discount_per_unit: Money::zero().to_fixed(),
            breakdown: priced.pricing.breakdown(Money::zero()),
        })
    }

    /// Creates a coupon. Admin only.
    pub async fn create_coupon(&self, caller: Caller, input: NewCoupon, now: DateTime<Utc>) -> ServiceResult<Coupon> {
        caller.require_admin()?;
        let input = validate_new_coupon(&input, now)?;

        let mut tx = self.pool.begin().await.map_err(DbError::transaction)?;

        if coupon::fetch_by_code(&mut tx, &input.code).await?.is_some() {
            warn!(code = %input.code, "Duplicate coupon code");
            return Err(CoreError::DuplicateCoupon { code: input.code }.into());
        }

        let created = match coupon::insert_coupon(&mut tx, &input, now).await {
            Ok(created) => created,
            Err(DbError::UniqueViolation { .. }) => {
                return Err(ServiceError::from(CoreError::DuplicateCoupon { code: input.code }));
            }
            Err(err) => return Err(err.into()),
        };

        tx.commit().await.map_err(DbError::transaction)?;

        info!(
            coupon_id = created.id,
            code = %created.code,
            coupon_type = ?created.coupon_type,
            value = %created.value,
            usage_limit = created.usage_limit,
            "Coupon created"
        );
        Ok(created)
    }
}
