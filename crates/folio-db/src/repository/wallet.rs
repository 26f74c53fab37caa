//! # Wallet Ledger
//!
//! Append-only transaction log per wallet. The stored balance is a cache of
//! the log: `balance == Σ credits − Σ debits` at every commit.
//!
//! ## Posting
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  post(wallet, type, amount, reference)                  (inside a tx)   │
//! │                                                                         │
//! │  1. SELECT ... WHERE reference = ?  ── found ──► Duplicate(existing)    │
//! │  2. SELECT balance                                                      │
//! │  3. debit and balance < amount      ──────────► InsufficientBalance     │
//! │  4. INSERT wallet_transactions      (UNIQUE(reference) backs step 1)    │
//! │  5. UPDATE wallets SET balance = <computed in Rust>                     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! A retried refund with the same reference therefore never credits twice,
//! whether the retry is sequential (step 1) or concurrent (step 4 fails and
//! the whole transaction rolls back).

use chrono::{DateTime, Utc};
use folio_core::{CoreError, Money, TransactionType, ValidationError, Wallet, WalletTransaction};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::{debug, info, warn};

use crate::error::{DbError, DbResult, ServiceResult};

/// Result of posting to the ledger.
#[derive(Debug, Clone, PartialEq)]
pub enum LedgerEntry {
    /// A new transaction was written and the balance moved.
    Recorded(WalletTransaction),
    /// The reference was already posted; nothing changed.
    Duplicate(WalletTransaction),
}

impl LedgerEntry {
    pub fn transaction(&self) -> &WalletTransaction {
        match self {
            LedgerEntry::Recorded(txn) | LedgerEntry::Duplicate(txn) => txn,
        }
    }

    pub fn is_duplicate(&self) -> bool {
        matches!(self, LedgerEntry::Duplicate(_))
    }
}

/// A ledger movement to post.
#[derive(Debug, Clone, PartialEq)]
pub struct Posting<'a> {
    pub wallet_id: i64,
    pub amount: Money,
    pub description: &'a str,
    pub order_id: Option<i64>,
    pub reference: &'a str,
}

// =============================================================================
// Ledger
// =============================================================================

/// Pool-level wallet operations. Each call is its own transaction.
#[derive(Debug, Clone)]
pub struct WalletLedger {
    pool: SqlitePool,
}

impl WalletLedger {
    pub fn new(pool: SqlitePool) -> Self {
        WalletLedger { pool }
    }

    /// Returns the user's wallet, creating an empty one on first use.
    pub async fn open(&self, user_id: i64, now: DateTime<Utc>) -> DbResult<Wallet> {
        let mut conn = self.pool.acquire().await?;
        ensure_wallet(&mut conn, user_id, now).await
    }

    /// Credits a wallet atomically.
    pub async fn credit(&self, posting: Posting<'_>, now: DateTime<Utc>) -> ServiceResult<LedgerEntry> {
        let mut tx = self.pool.begin().await.map_err(DbError::transaction)?;
        let entry = credit(&mut tx, &posting, now).await?;
        tx.commit().await.map_err(DbError::transaction)?;
        Ok(entry)
    }

    /// Debits a wallet atomically. Fails without side effects when the
    /// balance does not cover `amount`.
    pub async fn debit(&self, posting: Posting<'_>, now: DateTime<Utc>) -> ServiceResult<LedgerEntry> {
        let mut tx = self.pool.begin().await.map_err(DbError::transaction)?;
        let entry = debit(&mut tx, &posting, now).await?;
        tx.commit().await.map_err(DbError::transaction)?;
        Ok(entry)
    }

    /// Current balance; zero if the user has no wallet yet.
    pub async fn balance(&self, user_id: i64) -> DbResult<Money> {
        let mut conn = self.pool.acquire().await?;
        let wallet = fetch_wallet(&mut conn, user_id).await?;
        Ok(wallet.map(|w| w.balance).unwrap_or_default())
    }

    /// The user's transactions, oldest first.
    pub async fn history(&self, user_id: i64) -> DbResult<Vec<WalletTransaction>> {
        let rows = sqlx::query_as::<_, WalletTransaction>(
            r#"
            SELECT t.id, t.wallet_id, t.amount, t.tx_type, t.description, t.order_id,
                   t.reference, t.created_at
            FROM wallet_transactions t
            JOIN wallets w ON w.id = t.wallet_id
            WHERE w.user_id = ?1
            ORDER BY t.id
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    /// Recomputes the balance from the transaction log.
    pub async fn replay(&self, wallet_id: i64) -> DbResult<Money> {
        let rows = sqlx::query_as::<_, WalletTransaction>(
            r#"
            SELECT id, wallet_id, amount, tx_type, description, order_id, reference, created_at
            FROM wallet_transactions
            WHERE wallet_id = ?1
            ORDER BY id
            "#,
        )
        .bind(wallet_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(WalletTransaction::signed_amount).sum())
    }

    /// Whether the stored balance matches the replayed log.
    pub async fn verify(&self, wallet_id: i64) -> DbResult<bool> {
        let stored: Option<Money> = sqlx::query_scalar("SELECT balance FROM wallets WHERE id = ?1")
            .bind(wallet_id)
            .fetch_optional(&self.pool)
            .await?;
        let stored = stored.ok_or_else(|| DbError::not_found("Wallet", wallet_id))?;

        let replayed = self.replay(wallet_id).await?;
        if stored != replayed {
            warn!(wallet_id, stored = %stored, replayed = %replayed, "Wallet balance drift");
        }
        Ok(stored == replayed)
    }

    /// Looks a transaction up by its reference.
    pub async fn by_reference(&self, reference: &str) -> DbResult<Option<WalletTransaction>> {
        let mut conn = self.pool.acquire().await?;
        fetch_by_reference(&mut conn, reference).await
    }
}

// =============================================================================
// Connection-level operations
// =============================================================================

pub async fn fetch_wallet(conn: &mut SqliteConnection, user_id: i64) -> DbResult<Option<Wallet>> {
    let wallet = sqlx::query_as::<_, Wallet>(
        "SELECT id, user_id, balance, created_at, updated_at FROM wallets WHERE user_id = ?1",
    )
    .bind(user_id)
    .fetch_optional(&mut *conn)
    .await?;

    Ok(wallet)
}

pub async fn ensure_wallet(conn: &mut SqliteConnection, user_id: i64, now: DateTime<Utc>) -> DbResult<Wallet> {
    sqlx::query(
        r#"
        INSERT INTO wallets (user_id, balance, created_at, updated_at)
        VALUES (?1, '0', ?2, ?2)
        ON CONFLICT (user_id) DO NOTHING
        "#,
    )
    .bind(user_id)
    .bind(now)
    .execute(&mut *conn)
    .await?;

    fetch_wallet(conn, user_id)
        .await?
        .ok_or_else(|| DbError::not_found("Wallet", user_id))
}

pub async fn fetch_by_reference(
    conn: &mut SqliteConnection,
    reference: &str,
) -> DbResult<Option<WalletTransaction>> {
    let txn = sqlx::query_as::<_, WalletTransaction>(
        r#"
        SELECT id, wallet_id, amount, tx_type, description, order_id, reference, created_at
        FROM wallet_transactions
        WHERE reference = ?1
        "#,
    )
    .bind(reference)
    .fetch_optional(&mut *conn)
    .await?;

    Ok(txn)
}

pub async fn credit(
    conn: &mut SqliteConnection,
    posting: &Posting<'_>,
    now: DateTime<Utc>,
) -> ServiceResult<LedgerEntry> {
    post(conn, TransactionType::Credit, posting, now).await
}

pub async fn debit(
    conn: &mut SqliteConnection,
    posting: &Posting<'_>,
    now: DateTime<Utc>,
) -> ServiceResult<LedgerEntry> {
    post(conn, TransactionType::Debit, posting, now).await
}

async fn post(
    conn: &mut SqliteConnection,
    tx_type: TransactionType,
    posting: &Posting<'_>,
    now: DateTime<Utc>,
) -> ServiceResult<LedgerEntry> {
    if !posting.amount.is_positive() {
        return Err(ValidationError::MustBePositive {
            field: "amount".to_string(),
        }
        .into());
    }

    if let Some(existing) = fetch_by_reference(conn, posting.reference).await? {
        warn!(
            reference = %posting.reference,
            wallet_id = posting.wallet_id,
            "Duplicate ledger reference, skipping"
        );
        return Ok(LedgerEntry::Duplicate(existing));
    }

    let balance: Option<Money> = sqlx::query_scalar("SELECT balance FROM wallets WHERE id = ?1")
        .bind(posting.wallet_id)
        .fetch_optional(&mut *conn)
        .await?;
    let balance = balance.ok_or_else(|| DbError::not_found("Wallet", posting.wallet_id))?;

    let new_balance = match tx_type {
        TransactionType::Credit => balance + posting.amount,
        TransactionType::Debit => {
            // Balances never go negative.
            if balance < posting.amount {
                return Err(CoreError::InsufficientBalance {
                    available: balance,
                    required: posting.amount,
                }
                .into());
            }
            balance - posting.amount
        }
    };

    let id = sqlx::query(
        r#"
        INSERT INTO wallet_transactions (
            wallet_id, amount, tx_type, description, order_id, reference, created_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
        "#,
    )
    .bind(posting.wallet_id)
    .bind(posting.amount)
    .bind(tx_type)
    .bind(posting.description)
    .bind(posting.order_id)
    .bind(posting.reference)
    .bind(now)
    .execute(&mut *conn)
    .await?
    .last_insert_rowid();

    sqlx::query("UPDATE wallets SET balance = ?2, updated_at = ?3 WHERE id = ?1")
        .bind(posting.wallet_id)
        .bind(new_balance)
        .bind(now)
        .execute(&mut *conn)
        .await?;

    debug!(wallet_id = posting.wallet_id, balance = %new_balance, "Wallet balance updated");
    info!(
        transaction_id = id,
        wallet_id = posting.wallet_id,
        tx_type = ?tx_type,
        amount = %posting.amount,
        reference = %posting.reference,
        "Ledger entry recorded"
    );

    Ok(LedgerEntry::Recorded(WalletTransaction {
        id,
        wallet_id: posting.wallet_id,
        amount: posting.amount,
        tx_type,
        description: posting.description.to_string(),
        order_id: posting.order_id,
        reference: posting.reference.to_string(),
        created_at: now,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{Database, DbConfig};
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 5, 1, 12, 0, 0).unwrap()
    }

    fn posting<'a>(wallet_id: i64, amount: &str, reference: &'a str) -> Posting<'a> {
        Posting {
            wallet_id,
            amount: Money::parse(amount).unwrap(),
            description: "test",
            order_id: None,
            reference,
        }
    }

    #[tokio::test]
    async fn test_replay_matches_balance() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let ledger = db.wallet();
        let wallet = ledger.open(7, now()).await.unwrap();

        ledger.credit(posting(wallet.id, "120.50", "A"), now()).await.unwrap();
        ledger.credit(posting(wallet.id, "0.25", "B"), now()).await.unwrap();
        ledger.debit(posting(wallet.id, "40.75", "C"), now()).await.unwrap();

        assert_eq!(ledger.balance(7).await.unwrap(), Money::parse("80.00").unwrap());
        assert_eq!(ledger.replay(wallet.id).await.unwrap(), Money::parse("80.00").unwrap());
        assert!(ledger.verify(wallet.id).await.unwrap());
        assert_eq!(ledger.history(7).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_duplicate_reference_credits_once() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let ledger = db.wallet();
        let wallet = ledger.open(3, now()).await.unwrap();

        let first = ledger
            .credit(posting(wallet.id, "500", "REFUND-ORDER-1-CANCEL"), now())
            .await
            .unwrap();
        let second = ledger
            .credit(posting(wallet.id, "500", "REFUND-ORDER-1-CANCEL"), now())
            .await
            .unwrap();

        assert!(!first.is_duplicate());
        assert!(second.is_duplicate());
        assert_eq!(first.transaction().id, second.transaction().id);
        assert_eq!(ledger.balance(3).await.unwrap(), Money::from_major(500));
    }

    #[tokio::test]
    async fn test_overdraft_rejected_without_side_effects() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let ledger = db.wallet();
        let wallet = ledger.open(4, now()).await.unwrap();
        ledger.credit(posting(wallet.id, "10", "SEED"), now()).await.unwrap();

        let err = ledger
            .debit(posting(wallet.id, "10.01", "PAY"), now())
            .await
            .unwrap_err();
        assert!(matches!(err.as_core(), Some(CoreError::InsufficientBalance { .. })));

        assert_eq!(ledger.balance(4).await.unwrap(), Money::from_major(10));
        assert!(ledger.by_reference("PAY").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_non_positive_amount_is_validation() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let ledger = db.wallet();
        let wallet = ledger.open(5, now()).await.unwrap();

        let err = ledger.credit(posting(wallet.id, "0", "Z"), now()).await.unwrap_err();
        assert_eq!(err.kind(), folio_core::ErrorKind::Validation);
    }
}
