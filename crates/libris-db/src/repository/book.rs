//! # Book Repository
//!
//! One row per ISBN. The borrow list is stored as a JSON column so a book and
//! its loans change together under a single version number.
//!
//! ## Versioned Put
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    put_if_version(book, expected, ledger)               │
//! │                                                                         │
//! │  BEGIN                                                                  │
//! │    UPDATE books SET ..., version = version + 1                         │
//! │    WHERE id = ? AND version = expected      ── 0 rows? ──► ROLLBACK    │
//! │                                                  VersionConflict        │
//! │    INSERT / UPDATE transactions ...         (LedgerWrite list)         │
//! │  COMMIT                                                                 │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//! The UPDATE is the first statement of the transaction so SQLite takes the
//! write lock up front instead of upgrading a read snapshot mid-way.

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tracing::debug;

use crate::error::{DbError, DbResult};
use crate::repository::transaction::{self, LedgerWrite};
use libris_core::{Book, BookOrder, BookQuery, BookStatus, Loan, DEFAULT_PAGE_SIZE};

const SELECT_BOOK: &str = r#"
    SELECT id, isbn, title, author, genre, description, published_year,
           status, total_copies, available_copies, pending_copies,
           donated_by, approved_by, approved_at, loans,
           created_at, updated_at, version
    FROM books
"#;

/// Raw `books` row; `loans` is still JSON text.
#[derive(Debug, sqlx::FromRow)]
struct BookRow {
    id: String,
    isbn: String,
    title: String,
    author: String,
    genre: String,
    description: Option<String>,
    published_year: Option<i32>,
    status: BookStatus,
    total_copies: i64,
    available_copies: i64,
    pending_copies: i64,
    donated_by: String,
    approved_by: Option<String>,
    approved_at: Option<DateTime<Utc>>,
    loans: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    version: i64,
}

impl TryFrom<BookRow> for Book {
    type Error = DbError;

    fn try_from(row: BookRow) -> Result<Self, Self::Error> {
        let loans: Vec<Loan> = serde_json::from_str(&row.loans).map_err(|e| DbError::Corrupt {
            entity: "Book".to_string(),
            id: row.id.clone(),
            reason: format!("loans: {e}"),
        })?;

        Ok(Book {
            id: row.id,
            isbn: row.isbn,
            title: row.title,
            author: row.author,
            genre: row.genre,
            description: row.description,
            published_year: row.published_year,
            status: row.status,
            total_copies: row.total_copies,
            available_copies: row.available_copies,
            pending_copies: row.pending_copies,
            donated_by: row.donated_by,
            approved_by: row.approved_by,
            approved_at: row.approved_at,
            loans,
            created_at: row.created_at,
            updated_at: row.updated_at,
            version: row.version,
        })
    }
}

fn encode_loans(book: &Book) -> DbResult<String> {
    serde_json::to_string(&book.loans).map_err(|e| DbError::Corrupt {
        entity: "Book".to_string(),
        id: book.id.clone(),
        reason: format!("loans: {e}"),
    })
}

/// Repository for book database operations.
///
/// ## Usage
/// ```rust,ignore
/// let repo = db.books();
///
/// let book = repo.get_by_id("uuid-here").await?;
/// let latest = repo.list(&BookQuery::latest(10)).await?;
/// ```
#[derive(Debug, Clone)]
pub struct BookRepository {
    pool: SqlitePool,
}

impl BookRepository {
    /// Creates a new BookRepository.
    pub fn new(pool: SqlitePool) -> Self {
        BookRepository { pool }
    }

    /// Gets a book by its ID.
    ///
    /// ## Returns
    /// * `Ok(Some(Book))` - Book found
    /// * `Ok(None)` - Book not found
    pub async fn get_by_id(&self, id: &str) -> DbResult<Option<Book>> {
        let sql = format!("{SELECT_BOOK} WHERE id = ?1");

        let row = sqlx::query_as::<_, BookRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(Book::try_from).transpose()
    }

    /// Gets a book by its ISBN.
    pub async fn find_by_isbn(&self, isbn: &str) -> DbResult<Option<Book>> {
        let sql = format!("{SELECT_BOOK} WHERE isbn = ?1");

        let row = sqlx::query_as::<_, BookRow>(&sql)
            .bind(isbn)
            .fetch_optional(&self.pool)
            .await?;

        row.map(Book::try_from).transpose()
    }

    /// Inserts a new book together with its ledger writes.
    ///
    /// ## Returns
    /// * `Err(DbError::UniqueViolation)` - the ISBN already exists (a
    ///   concurrent first donation won); nothing is written
    pub async fn insert_with_ledger(&self, book: &Book, ledger: &[LedgerWrite]) -> DbResult<()> {
        debug!(id = %book.id, isbn = %book.isbn, "Inserting book");

        let loans = encode_loans(book)?;
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO books (
                id, isbn, title, author, genre, description, published_year,
                status, total_copies, available_copies, pending_copies,
                donated_by, approved_by, approved_at, loans,
                created_at, updated_at, version
            ) VALUES (
                ?1, ?2, ?3, ?4, ?5, ?6, ?7,
                ?8, ?9, ?10, ?11,
                ?12, ?13, ?14, ?15,
                ?16, ?17, ?18
            )
            "#,
        )
        .bind(&book.id)
        .bind(&book.isbn)
        .bind(&book.title)
        .bind(&book.author)
        .bind(&book.genre)
        .bind(&book.description)
        .bind(book.published_year)
        .bind(book.status)
        .bind(book.total_copies)
        .bind(book.available_copies)
        .bind(book.pending_copies)
        .bind(&book.donated_by)
        .bind(&book.approved_by)
        .bind(book.approved_at)
        .bind(&loans)
        .bind(book.created_at)
        .bind(book.updated_at)
        .bind(book.version)
        .execute(&mut *tx)
        .await
        .map_err(|e| DbError::from(e).with_value(book.isbn.as_str()))?;

        transaction::apply(&mut tx, ledger).await?;
        tx.commit().await?;

        Ok(())
    }

    /// Writes `book` only if the stored version still equals `expected`.
    ///
    /// ## Returns
    /// * `Ok(Book)` - the stored book, version bumped
    /// * `Err(DbError::VersionConflict)` - someone else wrote first; nothing
    ///   is written, the caller re-reads and retries
    pub async fn put_if_version(
        &self,
        book: &Book,
        expected: i64,
        ledger: &[LedgerWrite],
    ) -> DbResult<Book> {
        debug!(id = %book.id, expected_version = expected, "Versioned book write");

        let loans = encode_loans(book)?;
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            r#"
            UPDATE books SET
                title = ?3,
                author = ?4,
                genre = ?5,
                description = ?6,
                published_year = ?7,
                status = ?8,
                total_copies = ?9,
                available_copies = ?10,
                pending_copies = ?11,
                approved_by = ?12,
                approved_at = ?13,
                loans = ?14,
                updated_at = ?15,
                version = version + 1
            WHERE id = ?1 AND version = ?2
            "#,
        )
        .bind(&book.id)
        .bind(expected)
        .bind(&book.title)
        .bind(&book.author)
        .bind(&book.genre)
        .bind(&book.description)
        .bind(book.published_year)
        .bind(book.status)
        .bind(book.total_copies)
        .bind(book.available_copies)
        .bind(book.pending_copies)
        .bind(&book.approved_by)
        .bind(book.approved_at)
        .bind(&loans)
        .bind(book.updated_at)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            // Dropping `tx` rolls back.
            return Err(DbError::conflict("Book", &book.id, expected));
        }

        transaction::apply(&mut tx, ledger).await?;
        tx.commit().await?;

        let mut stored = book.clone();
        stored.version = expected + 1;
        Ok(stored)
    }

    /// Lists books matching `query`.
    pub async fn list(&self, query: &BookQuery) -> DbResult<Vec<Book>> {
        let order = match query.order {
            BookOrder::Newest => "created_at DESC, id",
            BookOrder::Title => "title COLLATE NOCASE, id",
        };
        let limit = query.limit.unwrap_or(DEFAULT_PAGE_SIZE);

        debug!(status = ?query.status, genre = ?query.genre, limit = %limit, "Listing books");

        let sql = format!(
            r#"{SELECT_BOOK}
            WHERE (?1 IS NULL OR status = ?1)
              AND (?2 IS NULL OR genre = ?2)
            ORDER BY {order}
            LIMIT ?3
            "#
        );

        let rows = sqlx::query_as::<_, BookRow>(&sql)
            .bind(query.status)
            .bind(query.genre.as_deref())
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(Book::try_from).collect()
    }

    /// One page of books holding at least one active loan (optionally of
    /// `user_id`), ordered by id, strictly after `after_id`.
    pub async fn page_with_active_loans(
        &self,
        user_id: Option<&str>,
        after_id: Option<&str>,
        limit: u32,
    ) -> DbResult<Vec<Book>> {
        let sql = format!(
            r#"{SELECT_BOOK}
            WHERE (?2 IS NULL OR id > ?2)
              AND EXISTS (
                  SELECT 1 FROM json_each(books.loans) AS l
                  WHERE json_extract(l.value, '$.return_date') IS NULL
                    AND (?1 IS NULL OR json_extract(l.value, '$.user_id') = ?1)
              )
            ORDER BY id
            LIMIT ?3
            "#
        );

        let rows = sqlx::query_as::<_, BookRow>(&sql)
            .bind(user_id)
            .bind(after_id)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(Book::try_from).collect()
    }

    /// Counts books (for diagnostics).
    pub async fn count(&self) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM books")
            .fetch_one(&self.pool)
            .await?;

        Ok(count)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
