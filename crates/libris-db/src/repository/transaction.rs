//! # Transaction Ledger Repository
//!
//! Donation and borrowing entries. Entries are appended and completed only
//! inside a book write (see [`LedgerWrite`]); everything else here reads.
//!
//! ## Keyset Paging
//! ```text
//! ORDER BY date, id
//!
//! page 1: ─────────────────────────────┐ last = (2024-03-01T10:00, "7f..")
//! page 2: WHERE date > last.date       │
//!            OR (date = last.date AND id > last.id)
//! ```
//! Rows appended mid-stream after the cursor still show up; rows before it
//! never repeat.

use chrono::{DateTime, Utc};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::debug;

use crate::error::{DbError, DbResult};
use crate::repository::Cursor;
use libris_core::{DateRange, DonationOutcome, Transaction};

const SELECT_TRANSACTION: &str = r#"
    SELECT id, user_id, book_id, kind, copies, date, return_date, status, completed_at, outcome
    FROM transactions
"#;

/// A ledger change applied in the same SQLite transaction as a book write.
#[derive(Debug, Clone)]
pub enum LedgerWrite {
    /// Insert a new entry.
    Append(Transaction),
    /// Move an active entry to completed.
    Complete {
        id: String,
        at: DateTime<Utc>,
        return_date: Option<DateTime<Utc>>,
        outcome: Option<DonationOutcome>,
    },
    /// Fail unless `user_id` holds at most `max` active borrowings once the
    /// writes before it are applied. Runs under the write lock, so racing
    /// borrows of different books cannot both slip under the cap.
    CapActiveLoans { user_id: String, max: i64 },
}

impl LedgerWrite {
    /// Builds the completion write for an already-completed in-memory entry.
    pub fn completion_of(tx: &Transaction) -> Self {
        LedgerWrite::Complete {
            id: tx.id.clone(),
            at: tx.completed_at.unwrap_or(tx.date),
            return_date: tx.return_date,
            outcome: tx.outcome,
        }
    }
}

/// Applies ledger writes on an open connection (normally inside a transaction).
///
/// A completion that matches no active row means another writer got there
/// first; it fails with `VersionConflict` so the caller rolls back.
pub(crate) async fn apply(conn: &mut SqliteConnection, writes: &[LedgerWrite]) -> DbResult<()> {
    for write in writes {
        match write {
            LedgerWrite::Append(tx) => {
                debug!(id = %tx.id, kind = %tx.kind, book_id = %tx.book_id, "Appending ledger entry");

                sqlx::query(
                    r#"
                    INSERT INTO transactions (
                        id, user_id, book_id, kind, copies,
                        date, return_date, status, completed_at, outcome
                    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
                    "#,
                )
                .bind(&tx.id)
                .bind(&tx.user_id)
                .bind(&tx.book_id)
                .bind(tx.kind)
                .bind(tx.copies)
                .bind(tx.date)
                .bind(tx.return_date)
                .bind(tx.status)
                .bind(tx.completed_at)
                .bind(tx.outcome)
                .execute(&mut *conn)
                .await
                .map_err(|e| DbError::from(e).with_value(format!("{}/{}", tx.user_id, tx.book_id)))?;
            }
            LedgerWrite::Complete {
                id,
                at,
                return_date,
                outcome,
            } => {
                debug!(id = %id, "Completing ledger entry");

                let result = sqlx::query(
                    r#"
                    UPDATE transactions SET
                        status = 'completed',
                        completed_at = ?2,
                        return_date = COALESCE(?3, return_date),
                        outcome = COALESCE(?4, outcome)
                    WHERE id = ?1 AND status = 'active'
                    "#,
                )
                .bind(id)
                .bind(at)
                .bind(return_date)
                .bind(outcome)
                .execute(&mut *conn)
                .await?;

                if result.rows_affected() == 0 {
                    return Err(DbError::conflict("Transaction", id, 0));
                }
            }
            LedgerWrite::CapActiveLoans { user_id, max } => {
                let active: i64 = sqlx::query_scalar(
                    "SELECT COUNT(*) FROM transactions WHERE user_id = ?1 AND kind = 'borrowing' AND status = 'active'",
                )
                .bind(user_id)
                .fetch_one(&mut *conn)
                .await?;

                if active > *max {
                    debug!(user_id = %user_id, active, max = *max, "Loan cap exceeded");
                    return Err(DbError::LimitExceeded {
                        field: "activeLoans".to_string(),
                        user_id: user_id.clone(),
                        max: *max,
                    });
                }
            }
        }
    }

    Ok(())
}

/// Ledger entry joined with the genre of its book, for reports.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct LedgerRow {
    #[sqlx(flatten)]
    pub transaction: Transaction,
    pub genre: String,
}

/// Which entries a history stream covers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerFilter {
    All,
    User(String),
    Book(String),
}

/// Repository for the transaction ledger.
#[derive(Debug, Clone)]
pub struct TransactionRepository {
    pool: SqlitePool,
}

impl TransactionRepository {
    /// Creates a new TransactionRepository.
    pub fn new(pool: SqlitePool) -> Self {
        TransactionRepository { pool }
    }

    /// Gets an entry by ID.
    pub async fn get_by_id(&self, id: &str) -> DbResult<Option<Transaction>> {
        let sql = format!("{SELECT_TRANSACTION} WHERE id = ?1");

        let tx = sqlx::query_as::<_, Transaction>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(tx)
    }

    /// Active donations of a book, oldest first.
    pub async fn active_donations(&self, book_id: &str) -> DbResult<Vec<Transaction>> {
        let sql = format!(
            "{SELECT_TRANSACTION} WHERE book_id = ?1 AND kind = 'donation' AND status = 'active' ORDER BY date, id"
        );

        let txs = sqlx::query_as::<_, Transaction>(&sql)
            .bind(book_id)
            .fetch_all(&self.pool)
            .await?;

        debug!(book_id = %book_id, count = txs.len(), "Loaded active donations");
        Ok(txs)
    }

    /// The open borrowing of `(user, book)`, if any.
    pub async fn find_active_borrowing(
        &self,
        book_id: &str,
        user_id: &str,
    ) -> DbResult<Option<Transaction>> {
        let sql = format!(
            "{SELECT_TRANSACTION} WHERE book_id = ?1 AND user_id = ?2 AND kind = 'borrowing' AND status = 'active'"
        );

        let tx = sqlx::query_as::<_, Transaction>(&sql)
            .bind(book_id)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(tx)
    }

    /// Number of open borrowings held by a user.
    pub async fn count_active_borrowings(&self, user_id: &str) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM transactions WHERE user_id = ?1 AND kind = 'borrowing' AND status = 'active'",
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(count)
    }

    /// One page of entries, date-ascending, strictly after `after`.
    pub async fn page(
        &self,
        filter: &LedgerFilter,
        after: Option<&Cursor>,
        limit: u32,
    ) -> DbResult<Vec<Transaction>> {
        let (user_id, book_id) = match filter {
            LedgerFilter::All => (None, None),
            LedgerFilter::User(user) => (Some(user.as_str()), None),
            LedgerFilter::Book(book) => (None, Some(book.as_str())),
        };
        let (after_date, after_id) = split_cursor(after);

        let sql = format!(
            r#"{SELECT_TRANSACTION}
            WHERE (?1 IS NULL OR user_id = ?1)
              AND (?2 IS NULL OR book_id = ?2)
              AND (?3 IS NULL OR date > ?3 OR (date = ?3 AND id > ?4))
            ORDER BY date, id
            LIMIT ?5
            "#
        );

        let txs = sqlx::query_as::<_, Transaction>(&sql)
            .bind(user_id)
            .bind(book_id)
            .bind(after_date)
            .bind(after_id)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;

        debug!(filter = ?filter, count = txs.len(), "Loaded ledger page");
        Ok(txs)
    }

    /// One page of entries inside `range`, each with its book's genre.
    pub async fn page_in_range(
        &self,
        range: &DateRange,
        after: Option<&Cursor>,
        limit: u32,
    ) -> DbResult<Vec<LedgerRow>> {
        let (after_date, after_id) = split_cursor(after);

        let rows = sqlx::query_as::<_, LedgerRow>(
            r#"
            SELECT t.id, t.user_id, t.book_id, t.kind, t.copies,
                   t.date, t.return_date, t.status, t.completed_at, t.outcome,
                   b.genre
            FROM transactions t
            INNER JOIN books b ON b.id = t.book_id
            WHERE t.date >= ?1 AND t.date < ?2
              AND (?3 IS NULL OR t.date > ?3 OR (t.date = ?3 AND t.id > ?4))
            ORDER BY t.date, t.id
            LIMIT ?5
            "#,
        )
        .bind(range.from)
        .bind(range.to)
        .bind(after_date)
        .bind(after_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    /// Counts all ledger entries (for diagnostics).
    pub async fn count(&self) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM transactions")
            .fetch_one(&self.pool)
            .await?;

        Ok(count)
    }
}

fn split_cursor(after: Option<&Cursor>) -> (Option<DateTime<Utc>>, Option<&str>) {
    match after {
        Some((date, id)) => (Some(*date), Some(id.as_str())),
        None => (None, None),
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
