//! # Catalog Repository
//!
//! The narrow catalog interface this engine consumes: book and category
//! lookups plus the two stock movements it owns.
//!
//! ## Stock Movements
//! ```text
//! checkout        reserve_stock  UPDATE ... SET stock = stock - q
//!                                WHERE id = ? AND stock >= q
//!                                0 rows → InsufficientStock (no oversell)
//!
//! cancel/return   restock        UPDATE ... SET stock = stock + q
//! ```

use folio_core::{Book, Category, Money};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::debug;

use crate::error::{DbError, DbResult};

/// Repository for catalog reads and stock movement.
#[derive(Debug, Clone)]
pub struct CatalogRepository {
    pool: SqlitePool,
}

impl CatalogRepository {
    /// Creates a new CatalogRepository.
    pub fn new(pool: SqlitePool) -> Self {
        CatalogRepository { pool }
    }

    /// `getBook(id)`.
    pub async fn get_book(&self, id: i64) -> DbResult<Option<Book>> {
        let mut conn = self.pool.acquire().await?;
        fetch_book(&mut conn, id).await
    }

    /// `getCategory(id)`.
    pub async fn get_category(&self, id: i64) -> DbResult<Option<Category>> {
        let mut conn = self.pool.acquire().await?;
        fetch_category(&mut conn, id).await
    }

    /// Inserts a category (seeding and tests).
    pub async fn insert_category(&self, name: &str, return_window_days: Option<i64>) -> DbResult<Category> {
        debug!(name = %name, ?return_window_days, "Inserting category");

        let id = sqlx::query(
            "INSERT INTO categories (name, return_window_days, is_active) VALUES (?1, ?2, 1)",
        )
        .bind(name)
        .bind(return_window_days)
        .execute(&self.pool)
        .await?
        .last_insert_rowid();

        Ok(Category {
            id,
            name: name.to_string(),
            return_window_days,
            is_active: true,
        })
    }

    /// Inserts an active, unblocked book (seeding and tests).
    pub async fn insert_book(
        &self,
        title: &str,
        price: Money,
        stock: i64,
        category_id: i64,
    ) -> DbResult<Book> {
        debug!(title = %title, price = %price, stock, category_id, "Inserting book");

        let id = sqlx::query(
            r#"
            INSERT INTO books (title, price, stock, category_id, is_active, blocked)
            VALUES (?1, ?2, ?3, ?4, 1, 0)
            "#,
        )
        .bind(title)
        .bind(price)
        .bind(stock)
        .bind(category_id)
        .execute(&self.pool)
        .await?
        .last_insert_rowid();

        Ok(Book {
            id,
            title: title.to_string(),
            price,
            stock,
            category_id,
            is_active: true,
            blocked: false,
        })
    }

    /// Sets the blocked flag (catalog moderation; used by tests).
    pub async fn set_blocked(&self, book_id: i64, blocked: bool) -> DbResult<()> {
        let result = sqlx::query("UPDATE books SET blocked = ?2 WHERE id = ?1")
            .bind(book_id)
            .bind(blocked)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("Book", book_id));
        }
        Ok(())
    }

    /// Current stock level.
    pub async fn stock_of(&self, book_id: i64) -> DbResult<i64> {
        let stock: Option<i64> = sqlx::query_scalar("SELECT stock FROM books WHERE id = ?1")
            .bind(book_id)
            .fetch_optional(&self.pool)
            .await?;

        stock.ok_or_else(|| DbError::not_found("Book", book_id))
    }
}

// =============================================================================
// Connection-level operations (run inside a caller's transaction)
// =============================================================================

pub async fn fetch_book(conn: &mut SqliteConnection, id: i64) -> DbResult<Option<Book>> {
    let book = sqlx::query_as::<_, Book>(
        r#"
        SELECT id, title, price, stock, category_id, is_active, blocked
        FROM books
        WHERE id = ?1
        "#,
    )
    .bind(id)
    .fetch_optional(&mut *conn)
    .await?;

    Ok(book)
}

pub async fn fetch_category(conn: &mut SqliteConnection, id: i64) -> DbResult<Option<Category>> {
    let category = sqlx::query_as::<_, Category>(
        r#"
        SELECT id, name, return_window_days, is_active
        FROM categories
        WHERE id = ?1
        "#,
    )
    .bind(id)
    .fetch_optional(&mut *conn)
    .await?;

    Ok(category)
}

/// Takes `quantity` units if available. Returns `false` when stock is short
/// (including when a concurrent checkout took the last units first).
pub async fn reserve_stock(conn: &mut SqliteConnection, book_id: i64, quantity: i64) -> DbResult<bool> {
    let result = sqlx::query(
        r#"
        UPDATE books SET stock = stock - ?2
        WHERE id = ?1 AND stock >= ?2
        "#,
    )
    .bind(book_id)
    .bind(quantity)
    .execute(&mut *conn)
    .await?;

    debug!(book_id, quantity, reserved = result.rows_affected() == 1, "Reserve stock");
    Ok(result.rows_affected() == 1)
}

/// Puts `quantity` units back on the shelf.
pub async fn restock(conn: &mut SqliteConnection, book_id: i64, quantity: i64) -> DbResult<()> {
    let result = sqlx::query("UPDATE books SET stock = stock + ?2 WHERE id = ?1")
        .bind(book_id)
        .bind(quantity)
        .execute(&mut *conn)
        .await?;

    if result.rows_affected() == 0 {
        return Err(DbError::not_found("Book", book_id));
    }

    debug!(book_id, quantity, "Restocked");
    Ok(())
}

#[cfg(test)]
mod tests {
    use crate::pool::{Database, DbConfig};
    use folio_core::Money;

    #[tokio::test]
    async fn test_reserve_never_oversells() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let cat = db.catalog().insert_category("Fiction", None).await.unwrap();
        let book = db
            .catalog()
            .insert_book("Dune", Money::from_major(12), 2, cat.id)
            .await
            .unwrap();

        let mut conn = db.pool().acquire().await.unwrap();
        assert!(super::reserve_stock(&mut conn, book.id, 2).await.unwrap());
        assert!(!super::reserve_stock(&mut conn, book.id, 1).await.unwrap());
        super::restock(&mut conn, book.id, 1).await.unwrap();
        drop(conn);

        assert_eq!(db.catalog().stock_of(book.id).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_get_book_and_category() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let cat = db.catalog().insert_category("Textbooks", Some(14)).await.unwrap();
        let book = db
            .catalog()
            .insert_book("Calculus", Money::parse("899.50").unwrap(), 4, cat.id)
            .await
            .unwrap();

        let loaded = db.catalog().get_book(book.id).await.unwrap().unwrap();
        assert_eq!(loaded, book);
        assert_eq!(loaded.price.to_fixed(), "899.50");

        let loaded = db.catalog().get_category(cat.id).await.unwrap().unwrap();
        assert_eq!(loaded.return_window_days, Some(14));

        assert!(db.catalog().get_book(999).await.unwrap().is_none());
    }
}
