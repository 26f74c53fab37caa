//! # Offer Repository
//!
//! Stores product and category offers. Resolution (which offer wins) is the
//! pure [`folio_core::offer::resolve`]; this module only loads candidates.

use chrono::{DateTime, Utc};
use folio_core::validation::validate_window;
use folio_core::{CoreError, Offer, OfferTarget, Percent};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::{info, warn};

use crate::error::{DbError, DbResult, ServiceResult};

/// Repository for offer database operations.
#[derive(Debug, Clone)]
pub struct OfferRepository {
    pool: SqlitePool,
}

impl OfferRepository {
    /// Creates a new OfferRepository.
    pub fn new(pool: SqlitePool) -> Self {
        OfferRepository { pool }
    }

    /// Creates an offer after checking its window against existing ones.
    ///
    /// The overlap check and the insert share one transaction, but two
    /// concurrent creations can still both pass on a busy database; the
    /// resolver's tie-break covers that case.
    pub async fn create_offer(
        &self,
        target: OfferTarget,
        target_id: i64,
        discount_percent: Percent,
        start_date: DateTime<Utc>,
        end_date: DateTime<Utc>,
    ) -> ServiceResult<Offer> {
        validate_window(start_date, end_date)?;

        let mut tx = self.pool.begin().await.map_err(DbError::transaction)?;

        let existing = offers_for_target(&mut tx, target, target_id).await?;
        if existing.iter().any(|o| o.overlaps(start_date, end_date)) {
            warn!(target = target.as_str(), target_id, "Rejected overlapping offer");
            return Err(CoreError::OverlappingOffer {
                target: target.as_str().to_string(),
                target_id,
            }
            .into());
        }

        let id = sqlx::query(
            r#"
            INSERT INTO offers (target, target_id, discount_percent, start_date, end_date, active)
            VALUES (?1, ?2, ?3, ?4, ?5, 1)
            "#,
        )
        .bind(target)
        .bind(target_id)
        .bind(discount_percent)
        .bind(start_date)
        .bind(end_date)
        .execute(&mut *tx)
        .await?
        .last_insert_rowid();

        tx.commit().await.map_err(DbError::transaction)?;

        info!(
            offer_id = id,
            target = target.as_str(),
            target_id,
            percent = %discount_percent,
            "Offer created"
        );

        Ok(Offer {
            id,
            target,
            target_id,
            discount_percent,
            start_date,
            end_date,
            active: true,
        })
    }

    /// Inserts an offer row without the overlap check.
    ///
    /// Only for reproducing overlapping data in tests and imports.
    pub async fn insert_unchecked(
        &self,
        target: OfferTarget,
        target_id: i64,
        discount_percent: Percent,
        start_date: DateTime<Utc>,
        end_date: DateTime<Utc>,
    ) -> DbResult<i64> {
        let id = sqlx::query(
            r#"
            INSERT INTO offers (target, target_id, discount_percent, start_date, end_date, active)
            VALUES (?1, ?2, ?3, ?4, ?5, 1)
            "#,
        )
        .bind(target)
        .bind(target_id)
        .bind(discount_percent)
        .bind(start_date)
        .bind(end_date)
        .execute(&self.pool)
        .await?
        .last_insert_rowid();

        Ok(id)
    }

    /// All offers that could apply to a book.
    pub async fn offers_for(&self, book_id: i64, category_id: i64) -> DbResult<Vec<Offer>> {
        let mut conn = self.pool.acquire().await?;
        offers_for(&mut conn, book_id, category_id).await
    }
}

// =============================================================================
// Connection-level operations
// =============================================================================

/// Candidate offers for a book: rows targeting the book or its category.
/// Effectiveness at `now` is decided by the resolver.
pub async fn offers_for(
    conn: &mut SqliteConnection,
    book_id: i64,
    category_id: i64,
) -> DbResult<Vec<Offer>> {
    let offers = sqlx::query_as::<_, Offer>(
        r#"
        SELECT id, target, target_id, discount_percent, start_date, end_date, active
        FROM offers
        WHERE active = 1
          AND ((target = 'product' AND target_id = ?1)
            OR (target = 'category' AND target_id = ?2))
        ORDER BY id
        "#,
    )
    .bind(book_id)
    .bind(category_id)
    .fetch_all(&mut *conn)
    .await?;

    Ok(offers)
}

async fn offers_for_target(
    conn: &mut SqliteConnection,
    target: OfferTarget,
    target_id: i64,
) -> DbResult<Vec<Offer>> {
    let offers = sqlx::query_as::<_, Offer>(
        r#"
        SELECT id, target, target_id, discount_percent, start_date, end_date, active
        FROM offers
        WHERE active = 1 AND target = ?1 AND target_id = ?2
        "#,
    )
    .bind(target)
    .bind(target_id)
    .fetch_all(&mut *conn)
    .await?;

    Ok(offers)
}
