//! # Database & Service Error Types
//!
//! ## Error Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Error Propagation                                    │
//! │                                                                         │
//! │  SQLite Error (sqlx::Error)          CoreError (folio-core rules)      │
//! │       │                                     │                           │
//! │       ▼                                     │                           │
//! │  DbError ← categorised                      │                           │
//! │       │                                     │                           │
//! │       └──────────────┬──────────────────────┘                           │
//! │                      ▼                                                  │
//! │               ServiceError ← returned by every service operation       │
//! │                      │                                                  │
//! │                      ▼                                                  │
//! │               ErrorResponse { code, kind, message }                    │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! A `ServiceError` is always returned after the transaction has been
//! dropped, so nothing partial is ever committed alongside it.

use folio_core::outcome::ErrorResponse;
use folio_core::{CoreError, ErrorKind, ValidationError};
use thiserror::Error;

// =============================================================================
// DbError
// =============================================================================

/// SQLite primary result codes that mean "another writer holds the lock".
const SQLITE_BUSY: i32 = 5;
const SQLITE_LOCKED: i32 = 6;

/// Storage failures, categorised so services can tell a conflicting request
/// from a store that is briefly unavailable.
#[derive(Debug, Error)]
pub enum DbError {
    #[error("{entity} {id} does not exist")]
    NotFound { entity: String, id: String },

    /// A UNIQUE index rejected the row.
    ///
    /// ## When This Occurs
    /// - Duplicate coupon code (case-insensitive)
    /// - Duplicate ledger reference raced past the pre-check
    /// - Second redemption of the same coupon by one user
    #[error("Unique index {constraint} rejected the row")]
    UniqueViolation { constraint: String },

    #[error("Referenced row missing: {0}")]
    ForeignKeyViolation(String),

    /// CHECK constraint violation (negative stock, over-used coupon).
    #[error("Check constraint rejected the row: {0}")]
    CheckViolation(String),

    /// Lock contention outlasted `busy_timeout`.
    #[error("Store busy: {0}")]
    Busy(String),

    #[error("Cannot open store: {0}")]
    ConnectionFailed(String),

    #[error("Schema migration failed: {0}")]
    MigrationFailed(String),

    #[error("Statement failed: {0}")]
    QueryFailed(String),

    /// `begin` or `commit` failed.
    #[error("Transaction failed: {0}")]
    TransactionFailed(String),

    #[error("No connection available before the acquire timeout")]
    PoolExhausted,

    #[error("Unexpected storage error: {0}")]
    Internal(String),
}

impl DbError {
    pub fn not_found(entity: impl Into<String>, id: impl ToString) -> Self {
        DbError::NotFound {
            entity: entity.into(),
            id: id.to_string(),
        }
    }

    /// Wraps a failed `begin`/`commit`. Lock contention keeps its own variant.
    pub fn transaction(err: sqlx::Error) -> Self {
        match DbError::from(err) {
            busy @ DbError::Busy(_) => busy,
            other => DbError::TransactionFailed(other.to_string()),
        }
    }
}

fn is_lock_contention(db_err: &dyn sqlx::error::DatabaseError) -> bool {
    let primary = db_err
        .code()
        .and_then(|code| code.parse::<i32>().ok())
        .map(|code| code & 0xff);

    matches!(primary, Some(SQLITE_BUSY) | Some(SQLITE_LOCKED))
}

/// ```text
/// RowNotFound            → NotFound
/// Database, by kind      → UniqueViolation / ForeignKeyViolation / CheckViolation
/// Database, BUSY/LOCKED  → Busy
/// PoolTimedOut           → PoolExhausted
/// anything else          → Internal
/// ```
impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        use sqlx::error::ErrorKind as SqlxKind;

        match err {
            sqlx::Error::RowNotFound => DbError::not_found("Row", "?"),

            sqlx::Error::Database(db_err) => {
                let message = db_err.message().to_string();
                match db_err.kind() {
                    SqlxKind::UniqueViolation => DbError::UniqueViolation {
                        // "UNIQUE constraint failed: coupons.code"
                        constraint: message
                            .rsplit(": ")
                            .next()
                            .unwrap_or_default()
                            .to_string(),
                    },
                    SqlxKind::ForeignKeyViolation => DbError::ForeignKeyViolation(message),
                    SqlxKind::CheckViolation => DbError::CheckViolation(message),
                    _ if is_lock_contention(&*db_err) => DbError::Busy(message),
                    _ => DbError::QueryFailed(message),
                }
            }

            sqlx::Error::PoolTimedOut => DbError::PoolExhausted,
            sqlx::Error::PoolClosed => DbError::ConnectionFailed("pool closed".to_string()),
            other => DbError::Internal(other.to_string()),
        }
    }
}

impl From<sqlx::migrate::MigrateError> for DbError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        DbError::MigrationFailed(err.to_string())
    }
}

pub type DbResult<T> = Result<T, DbError>;

// =============================================================================
// ServiceError
// =============================================================================

/// Error returned by every transactional operation.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    Db(#[from] DbError),
}

impl From<ValidationError> for ServiceError {
    fn from(err: ValidationError) -> Self {
        ServiceError::Core(CoreError::Validation(err))
    }
}

impl From<sqlx::Error> for ServiceError {
    fn from(err: sqlx::Error) -> Self {
        ServiceError::Db(DbError::from(err))
    }
}

impl ServiceError {
    /// Classifies the failure. Database failures are transient unless a
    /// constraint says the request conflicts with existing state.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ServiceError::Core(err) => err.kind(),
            ServiceError::Db(DbError::NotFound { .. }) => ErrorKind::NotFound,
            ServiceError::Db(DbError::UniqueViolation { .. })
            | ServiceError::Db(DbError::CheckViolation(_)) => ErrorKind::StateConflict,
            ServiceError::Db(_) => ErrorKind::TransientInfra,
        }
    }

    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            ServiceError::Core(err) => err.code(),
            ServiceError::Db(DbError::NotFound { .. }) => "NOT_FOUND",
            ServiceError::Db(DbError::UniqueViolation { .. }) => "DUPLICATE",
            ServiceError::Db(DbError::CheckViolation(_)) => "CONSTRAINT_VIOLATION",
            ServiceError::Db(DbError::Busy(_)) => "STORE_BUSY",
            ServiceError::Db(_) => "DATABASE_ERROR",
        }
    }

    /// Whether the caller may safely retry the whole request.
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::TransientInfra
    }

    /// Returns the core error, if this is one.
    pub fn as_core(&self) -> Option<&CoreError> {
        match self {
            ServiceError::Core(err) => Some(err),
            ServiceError::Db(_) => None,
        }
    }
}

impl From<&ServiceError> for ErrorResponse {
    fn from(err: &ServiceError) -> Self {
        match err {
            ServiceError::Core(core) => ErrorResponse::from(core),
            // Infrastructure detail stays in the logs.
            ServiceError::Db(_) => ErrorResponse {
                code: err.code().to_string(),
                kind: err.kind(),
                message: match err.kind() {
                    ErrorKind::TransientInfra => {
                        "A temporary error occurred, please retry".to_string()
                    }
                    _ => err.to_string(),
                },
            },
        }
    }
}

/// Result type for service operations.
pub type ServiceResult<T> = Result<T, ServiceError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kinds() {
        let err: ServiceError = DbError::UniqueViolation {
            constraint: "coupons.code".to_string(),
        }
        .into();
        assert_eq!(err.kind(), ErrorKind::StateConflict);

        let err: ServiceError = DbError::TransactionFailed("disk I/O error".to_string()).into();
        assert_eq!(err.kind(), ErrorKind::TransientInfra);
        assert!(err.is_retryable());

        let err: ServiceError = CoreError::CartEmpty.into();
        assert_eq!(err.kind(), ErrorKind::StateConflict);
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_transient_response_hides_detail() {
        let err: ServiceError = DbError::Busy("database is locked".to_string()).into();
        let resp = ErrorResponse::from(&err);
        assert_eq!(resp.code, "STORE_BUSY");
        assert!(err.is_retryable());
        assert!(!resp.message.contains("locked"));
    }

    #[test]
    fn test_core_response_passes_through() {
        let err: ServiceError = CoreError::OrderNotFound { order_id: 3 }.into();
        let resp = ErrorResponse::from(&err);
        assert_eq!(resp.code, "ORDER_NOT_FOUND");
        assert_eq!(resp.kind, ErrorKind::NotFound);
    }
}
