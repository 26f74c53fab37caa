//! # Cart Repository
//!
//! Cart lines, unique per `(user_id, book_id)`. Lines exist only until
//! checkout or removal.

use chrono::{DateTime, Utc};
use folio_core::CartItem;
use sqlx::{SqliteConnection, SqlitePool};
use tracing::debug;

use crate::error::DbResult;

/// Repository for cart lines.
#[derive(Debug, Clone)]
pub struct CartRepository {
    pool: SqlitePool,
}

impl CartRepository {
    pub fn new(pool: SqlitePool) -> Self {
        CartRepository { pool }
    }

    /// The user's cart, oldest line first.
    pub async fn get_cart(&self, user_id: i64) -> DbResult<Vec<CartItem>> {
        let mut conn = self.pool.acquire().await?;
        fetch_cart(&mut conn, user_id).await
    }
}

// =============================================================================
// Connection-level operations
// =============================================================================

pub async fn fetch_cart(conn: &mut SqliteConnection, user_id: i64) -> DbResult<Vec<CartItem>> {
    let items = sqlx::query_as::<_, CartItem>(
        r#"
        SELECT user_id, book_id, quantity, added_at
        FROM cart_items
        WHERE user_id = ?1
        ORDER BY id
        "#,
    )
    .bind(user_id)
    .fetch_all(&mut *conn)
    .await?;

    Ok(items)
}

pub async fn fetch_line(
    conn: &mut SqliteConnection,
    user_id: i64,
    book_id: i64,
) -> DbResult<Option<CartItem>> {
    let item = sqlx::query_as::<_, CartItem>(
        r#"
        SELECT user_id, book_id, quantity, added_at
        FROM cart_items
        WHERE user_id = ?1 AND book_id = ?2
        "#,
    )
    .bind(user_id)
    .bind(book_id)
    .fetch_optional(&mut *conn)
    .await?;

    Ok(item)
}

/// Inserts the line or sets its quantity.
pub async fn upsert_line(
    conn: &mut SqliteConnection,
    user_id: i64,
    book_id: i64,
    quantity: i64,
    now: DateTime<Utc>,
) -> DbResult<()> {
    debug!(user_id, book_id, quantity, "Upserting cart line");

    sqlx::query(
        r#"
        INSERT INTO cart_items (user_id, book_id, quantity, added_at)
        VALUES (?1, ?2, ?3, ?4)
        ON CONFLICT (user_id, book_id) DO UPDATE SET quantity = excluded.quantity
        "#,
    )
    .bind(user_id)
    .bind(book_id)
    .bind(quantity)
    .bind(now)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

/// Deletes one line. Returns whether it existed.
pub async fn delete_line(conn: &mut SqliteConnection, user_id: i64, book_id: i64) -> DbResult<bool> {
    let result = sqlx::query("DELETE FROM cart_items WHERE user_id = ?1 AND book_id = ?2")
        .bind(user_id)
        .bind(book_id)
        .execute(&mut *conn)
        .await?;

    Ok(result.rows_affected() > 0)
}

/// Empties the cart after checkout.
pub async fn clear_cart(conn: &mut SqliteConnection, user_id: i64) -> DbResult<u64> {
    let result = sqlx::query("DELETE FROM cart_items WHERE user_id = ?1")
        .bind(user_id)
        .execute(&mut *conn)
        .await?;

    Ok(result.rows_affected())
}
