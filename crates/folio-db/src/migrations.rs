//! # Schema Migrations
//!
//! The SQL under `migrations/sqlite` is compiled into the binary and applied
//! by [`run_migrations`] when a [`crate::Database`] opens.
//!
//! ```text
//! migrations/sqlite/
//!   001_initial_schema.sql   catalog · offers · coupons · cart · orders · ledger
//! ```
//!
//! Applied versions are recorded in sqlx's `_sqlx_migrations` table. Files
//! are append-only: a change to the schema is a new `NNN_*.sql`, never an
//! edit to an applied one (sqlx rejects a checksum mismatch).

use sqlx::SqlitePool;
use tracing::{debug, info};

use crate::error::DbResult;

static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("../../migrations/sqlite");

/// Applies every embedded migration the store has not seen yet.
pub async fn run_migrations(pool: &SqlitePool) -> DbResult<()> {
    let pending = pending_versions(pool).await?;
    if pending.is_empty() {
        debug!("Schema up to date");
        return Ok(());
    }

    info!(versions = ?pending, "Applying migrations");
    MIGRATOR.run(pool).await?;
    info!(applied = pending.len(), "Schema migrated");
    Ok(())
}

/// Embedded versions not yet recorded as applied, in order.
pub async fn pending_versions(pool: &SqlitePool) -> DbResult<Vec<i64>> {
    // The bookkeeping table only exists after the first run.
    let applied: Vec<i64> =
        match sqlx::query_scalar("SELECT version FROM _sqlx_migrations WHERE success = 1")
            .fetch_all(pool)
            .await
        {
            Ok(versions) => versions,
            Err(sqlx::Error::Database(_)) => Vec::new(),
            Err(err) => return Err(err.into()),
        };

    Ok(MIGRATOR
        .iter()
        .map(|m| m.version)
        .filter(|v| !applied.contains(v))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{Database, DbConfig};

    #[tokio::test]
    async fn test_fresh_store_lists_every_version() {
        let db = Database::new(DbConfig::in_memory().migrate(false)).await.unwrap();
        let pending = pending_versions(db.pool()).await.unwrap();
        assert_eq!(pending.first(), Some(&1));
    }

    #[tokio::test]
    async fn test_rerun_is_noop() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        assert!(pending_versions(db.pool()).await.unwrap().is_empty());
        run_migrations(db.pool()).await.unwrap();
    }
}
