//! # Coupon Repository
//!
//! Coupons, the per-user active coupon, and redemption records.
//!
//! ## Single Active Coupon
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  user_active_coupons.user_id is the PRIMARY KEY                         │
//! │                                                                         │
//! │  replace_active():  DELETE WHERE user_id = ?                            │
//! │                     INSERT (user_id, coupon_id, code, applied_at)       │
//! │                     ── same transaction as the eligibility reads ──     │
//! │                                                                         │
//! │  Two racing applies: the second writer fails on the write lock or the   │
//! │  primary key and rolls back. Never two rows.                            │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Consumption
//! Happens only at checkout: `used_count + 1` guarded by
//! `used_count < usage_limit`, a `user_coupons` row, and the active row
//! removed.

use chrono::{DateTime, Utc};
use folio_core::coupon::NewCoupon;
use folio_core::{Coupon, UserActiveCoupon, UserCoupon};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::debug;

use crate::error::{DbError, DbResult};

/// Repository for coupon database operations.
#[derive(Debug, Clone)]
pub struct CouponRepository {
    pool: SqlitePool,
}

impl CouponRepository {
    pub fn new(pool: SqlitePool) -> Self {
        CouponRepository { pool }
    }

    /// Looks a coupon up by code, case-insensitively.
    pub async fn get_by_code(&self, code: &str) -> DbResult<Option<Coupon>> {
        let mut conn = self.pool.acquire().await?;
        fetch_by_code(&mut conn, code).await
    }

    /// The coupon currently applied to the user's cart.
    pub async fn active_for(&self, user_id: i64) -> DbResult<Option<UserActiveCoupon>> {
        let mut conn = self.pool.acquire().await?;
        fetch_active(&mut conn, user_id).await
    }

    /// Number of active-coupon rows for a user (0 or 1).
    pub async fn active_row_count(&self, user_id: i64) -> DbResult<i64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM user_active_coupons WHERE user_id = ?1")
                .bind(user_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(count)
    }

    /// Redemption records of a user.
    pub async fn redemptions(&self, user_id: i64) -> DbResult<Vec<UserCoupon>> {
        let rows = sqlx::query_as::<_, UserCoupon>(
            r#"
            SELECT user_id, coupon_id, order_id, used_at
            FROM user_coupons
            WHERE user_id = ?1
            ORDER BY id
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    /// Sets `used_count` directly (seeding and tests).
    pub async fn set_used_count(&self, coupon_id: i64, used_count: i64) -> DbResult<()> {
        let result = sqlx::query("UPDATE coupons SET used_count = ?2 WHERE id = ?1")
            .bind(coupon_id)
            .bind(used_count)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("Coupon", coupon_id));
        }
        Ok(())
    }
}

// =============================================================================
// Connection-level operations
// =============================================================================

pub async fn fetch_by_code(conn: &mut SqliteConnection, code: &str) -> DbResult<Option<Coupon>> {
    // `code` is declared COLLATE NOCASE, so `=` ignores case.
    let coupon = sqlx::query_as::<_, Coupon>(
        r#"
        SELECT id, code, coupon_type, value, min_order_value, max_discount,
               expiry, usage_limit, used_count, active, created_at
        FROM coupons
        WHERE code = ?1
        "#,
    )
    .bind(code)
    .fetch_optional(&mut *conn)
    .await?;

    Ok(coupon)
}

pub async fn fetch_by_id(conn: &mut SqliteConnection, id: i64) -> DbResult<Option<Coupon>> {
    let coupon = sqlx::query_as::<_, Coupon>(
        r#"
        SELECT id, code, coupon_type, value, min_order_value, max_discount,
               expiry, usage_limit, used_count, active, created_at
        FROM coupons
        WHERE id = ?1
        "#,
    )
    .bind(id)
    .fetch_optional(&mut *conn)
    .await?;

    Ok(coupon)
}

/// Inserts a validated coupon. A duplicate code surfaces as
/// `DbError::UniqueViolation`.
pub async fn insert_coupon(
    conn: &mut SqliteConnection,
    coupon: &NewCoupon,
    now: DateTime<Utc>,
) -> DbResult<Coupon> {
    let id = sqlx::query(
        r#"
        INSERT INTO coupons (
            code, coupon_type, value, min_order_value, max_discount,
            expiry, usage_limit, used_count, active, created_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 0, 1, ?8)
        "#,
    )
    .bind(&coupon.code)
    .bind(coupon.coupon_type)
    .bind(coupon.value)
    .bind(coupon.min_order_value)
    .bind(coupon.max_discount)
    .bind(coupon.expiry)
    .bind(coupon.usage_limit)
    .bind(now)
    .execute(&mut *conn)
    .await?
    .last_insert_rowid();

    Ok(Coupon {
        id,
        code: coupon.code.clone(),
        coupon_type: coupon.coupon_type,
        value: coupon.value,
        min_order_value: coupon.min_order_value,
        max_discount: coupon.max_discount,
        expiry: coupon.expiry,
        usage_limit: coupon.usage_limit,
        used_count: 0,
        active: true,
        created_at: now,
    })
}

/// Whether the user already redeemed this coupon.
pub async fn has_redeemed(conn: &mut SqliteConnection, user_id: i64, coupon_id: i64) -> DbResult<bool> {
    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM user_coupons WHERE user_id = ?1 AND coupon_id = ?2",
    )
    .bind(user_id)
    .bind(coupon_id)
    .fetch_one(&mut *conn)
    .await?;

    Ok(count > 0)
}

pub async fn fetch_active(conn: &mut SqliteConnection, user_id: i64) -> DbResult<Option<UserActiveCoupon>> {
    let row = sqlx::query_as::<_, UserActiveCoupon>(
        r#"
        SELECT user_id, coupon_id, code, applied_at
        FROM user_active_coupons
        WHERE user_id = ?1
        "#,
    )
    .bind(user_id)
    .fetch_optional(&mut *conn)
    .await?;

    Ok(row)
}

/// Delete-then-insert of the user's active coupon.
pub async fn replace_active(
    conn: &mut SqliteConnection,
    user_id: i64,
    coupon: &Coupon,
    now: DateTime<Utc>,
) -> DbResult<()> {
    let removed = clear_active(conn, user_id).await?;

    sqlx::query(
        r#"
        INSERT INTO user_active_coupons (user_id, coupon_id, code, applied_at)
        VALUES (?1, ?2, ?3, ?4)
        "#,
    )
    .bind(user_id)
    .bind(coupon.id)
    .bind(&coupon.code)
    .bind(now)
    .execute(&mut *conn)
    .await?;

    debug!(user_id, coupon_id = coupon.id, replaced = removed, "Active coupon replaced");
    Ok(())
}

/// Removes the user's active coupon. Returns whether one existed.
pub async fn clear_active(conn: &mut SqliteConnection, user_id: i64) -> DbResult<bool> {
    let result = sqlx::query("DELETE FROM user_active_coupons WHERE user_id = ?1")
        .bind(user_id)
        .execute(&mut *conn)
        .await?;

    Ok(result.rows_affected() > 0)
}

/// Consumes one use of the coupon for `order_id`.
///
/// Returns `false` if the usage limit was reached in the meantime.
pub async fn consume(
    conn: &mut SqliteConnection,
    coupon_id: i64,
    user_id: i64,
    order_id: i64,
    now: DateTime<Utc>,
) -> DbResult<bool> {
    let result = sqlx::query(
        r#"
        UPDATE coupons SET used_count = used_count + 1
        WHERE id = ?1 AND used_count < usage_limit
        "#,
    )
    .bind(coupon_id)
    .execute(&mut *conn)
    .await?;

    if result.rows_affected() == 0 {
        return Ok(false);
    }

    sqlx::query(
        r#"
        INSERT INTO user_coupons (user_id, coupon_id, order_id, used_at)
        VALUES (?1, ?2, ?3, ?4)
        "#,
    )
    .bind(user_id)
    .bind(coupon_id)
    .bind(order_id)
    .bind(now)
    .execute(&mut *conn)
    .await?;

    clear_active(conn, user_id).await?;

    debug!(coupon_id, user_id, order_id, "Coupon consumed");
    Ok(true)
}
