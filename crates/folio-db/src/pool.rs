//! # Database Handle
//!
//! Opens the SQLite store and hands out repositories and services that
//! share one pool.
//!
//! ## Layout
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  DbConfig ──connect_options()──► SqliteConnectOptions                   │
//! │                                    WAL · synchronous=NORMAL · FKs on    │
//! │                                    busy_timeout                         │
//! │                                                                         │
//! │  Database::new(config)                                                  │
//! │    ├── SqlitePool (pool_size connections)                               │
//! │    ├── embedded migrations (unless disabled)                            │
//! │    │                                                                    │
//! │    ├── reads:     catalog()  offers()  carts()  coupons()  orders()     │
//! │    │              wallet()                                              │
//! │    └── writes:    cart_service()  coupon_service()  order_service()     │
//! │                   one transaction per call, committed or dropped        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Write Contention
//! WAL lets readers run beside the single writer. Two writers serialise on
//! SQLite's lock; one that waits past `busy_timeout` fails with
//! `SQLITE_BUSY` and its transaction rolls back whole.

use folio_core::OrderPolicy;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::SqlitePool;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::{DbError, DbResult};
use crate::migrations;
use crate::repository::cart::CartRepository;
use crate::repository::catalog::CatalogRepository;
use crate::repository::coupon::CouponRepository;
use crate::repository::offer::OfferRepository;
use crate::repository::order::OrderRepository;
use crate::repository::wallet::WalletLedger;
use crate::service::cart::CartService;
use crate::service::coupon::CouponService;
use crate::service::order::OrderService;

const MEMORY_PATH: &str = ":memory:";

// =============================================================================
// Configuration
// =============================================================================

/// How to open the store.
///
/// ```rust,ignore
/// let config = DbConfig::new("/var/lib/folio/folio.db")
///     .pool_size(8)
///     .busy_timeout(Duration::from_secs(2));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DbConfig {
    /// SQLite file, or `:memory:`.
    pub path: PathBuf,

    /// Connections in the pool. Default: 5
    pub pool_size: u32,

    /// How long a caller waits for a free connection. Default: 30s
    pub acquire_timeout: Duration,

    /// How long a writer waits on SQLite's lock before failing. Default: 5s
    pub busy_timeout: Duration,

    /// Apply embedded migrations when opening. Default: true
    pub migrate: bool,
}

impl DbConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        DbConfig {
            path: path.into(),
            pool_size: 5,
            acquire_timeout: Duration::from_secs(30),
            busy_timeout: Duration::from_secs(5),
            migrate: true,
        }
    }

    /// A private in-memory store.
    ///
    /// The database only exists while its connection does, so the pool is
    /// pinned to a single connection and every service call queues on it.
    pub fn in_memory() -> Self {
        DbConfig {
            pool_size: 1,
            acquire_timeout: Duration::from_secs(5),
            busy_timeout: Duration::from_secs(1),
            ..DbConfig::new(MEMORY_PATH)
        }
    }

    pub fn pool_size(mut self, size: u32) -> Self {
        self.pool_size = size;
        self
    }

    pub fn acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    pub fn busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout = timeout;
        self
    }

    /// Skip migrations, for stores whose schema is managed elsewhere.
    pub fn migrate(mut self, migrate: bool) -> Self {
        self.migrate = migrate;
        self
    }

    pub fn is_in_memory(&self) -> bool {
        self.path == Path::new(MEMORY_PATH)
    }

    /// Per-connection settings: WAL journal, NORMAL sync, foreign keys,
    /// busy timeout. File stores are created on first open.
    pub fn connect_options(&self) -> DbResult<SqliteConnectOptions> {
        let base = if self.is_in_memory() {
            SqliteConnectOptions::from_str("sqlite::memory:")
                .map_err(|e| DbError::ConnectionFailed(e.to_string()))?
        } else {
            SqliteConnectOptions::new()
                .filename(&self.path)
                .create_if_missing(true)
        };

        Ok(base
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .foreign_keys(true)
            .busy_timeout(self.busy_timeout))
    }
}

// =============================================================================
// Database
// =============================================================================

/// Shared handle to the store. Cloning is cheap; clones share the pool.
#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
    policy: OrderPolicy,
}

impl Database {
    /// Opens the pool and, unless disabled, migrates the schema.
    pub async fn new(config: DbConfig) -> DbResult<Self> {
        info!(
            path = %config.path.display(),
            pool_size = config.pool_size,
            "Opening store"
        );

        let options = config.connect_options()?;
        let pool = SqlitePoolOptions::new()
            .max_connections(config.pool_size)
            .min_connections(1)
            .acquire_timeout(config.acquire_timeout)
            .connect_with(options)
            .await
            .map_err(|e| DbError::ConnectionFailed(e.to_string()))?;

        debug!(in_memory = config.is_in_memory(), "Pool ready");

        let db = Database {
            pool,
            policy: OrderPolicy::default(),
        };

        if config.migrate {
            migrations::run_migrations(&db.pool).await?;
        } else {
            warn!("Migrations disabled; schema assumed current");
        }

        Ok(db)
    }

    /// Replaces the lifecycle windows used by [`Database::order_service`].
    pub fn with_policy(mut self, policy: OrderPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn policy(&self) -> OrderPolicy {
        self.policy
    }

    // -------------------------------------------------------------------------
    // Repositories
    // -------------------------------------------------------------------------

    pub fn catalog(&self) -> CatalogRepository {
        CatalogRepository::new(self.pool.clone())
    }

    pub fn offers(&self) -> OfferRepository {
        OfferRepository::new(self.pool.clone())
    }

    pub fn carts(&self) -> CartRepository {
        CartRepository::new(self.pool.clone())
    }

    pub fn coupons(&self) -> CouponRepository {
        CouponRepository::new(self.pool.clone())
    }

    pub fn orders(&self) -> OrderRepository {
        OrderRepository::new(self.pool.clone())
    }

    pub fn wallet(&self) -> WalletLedger {
        WalletLedger::new(self.pool.clone())
    }

    // -------------------------------------------------------------------------
    // Services
    // -------------------------------------------------------------------------

    pub fn cart_service(&self) -> CartService {
        CartService::new(self.pool.clone())
    }

    pub fn coupon_service(&self) -> CouponService {
        CouponService::new(self.pool.clone())
    }

    pub fn order_service(&self) -> OrderService {
        OrderService::new(self.pool.clone(), self.policy)
    }

    /// Waits for in-flight transactions, then closes every connection.
    pub async fn close(&self) {
        info!("Closing store");
        self.pool.close().await;
    }

    /// True when the store answers and the ledger table exists.
    pub async fn is_ready(&self) -> bool {
        sqlx::query("SELECT 1 FROM wallet_transactions LIMIT 1")
            .fetch_optional(&self.pool)
            .await
            .is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_in_memory_store_is_migrated() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        assert!(db.is_ready().await);
    }

    #[tokio::test]
    async fn test_unmigrated_store_is_not_ready() {
        let db = Database::new(DbConfig::in_memory().migrate(false)).await.unwrap();
        assert!(!db.is_ready().await);
    }

    #[test]
    fn test_builder_and_memory_detection() {
        let config = DbConfig::new("/tmp/folio-test.db")
            .pool_size(10)
            .busy_timeout(Duration::from_millis(250));

        assert_eq!(config.pool_size, 10);
        assert_eq!(config.busy_timeout, Duration::from_millis(250));
        assert!(config.migrate);
        assert!(!config.is_in_memory());

        let memory = DbConfig::in_memory();
        assert!(memory.is_in_memory());
        assert_eq!(memory.pool_size, 1);
    }

    #[tokio::test]
    async fn test_policy_override() {
        let policy = OrderPolicy {
            cancel_window: chrono::Duration::minutes(5),
            default_return_window_days: 3,
        };
        let db = Database::new(DbConfig::in_memory())
            .await
            .unwrap()
            .with_policy(policy);
        assert_eq!(db.policy(), policy);
    }
}
