//! # Lending
//!
//! Borrow and return against approved books.
//!
//! ## Loan State Machine (per book, per borrower)
//! ```text
//!   no loan ──borrow──► active loan ──return──► returned
//!      ▲                                          │
//!      └──────────── borrow again (new entry) ────┘
//! ```
//!
//! A borrow is one versioned put: the book's counter and loan list change
//! together with the new borrowing entry, or nothing changes at all.

use chrono::Utc;
use futures_util::stream::Stream;
use tracing::info;

use libris_core::lifecycle::new_transaction;
use libris_core::validation::validate_ref;
use libris_core::{Book, CoreError, IssuedBook, Transaction, TransactionKind, ValidationError};
use libris_db::{generate_id, Database, DbError, LedgerWrite};

use crate::error::{EngineError, EngineResult};
use crate::inventory::load_book;
use crate::ledger::{next_cursor, paged};
use crate::retry::RetryPolicy;

/// Borrow / return service.
#[derive(Debug, Clone)]
pub struct Lending {
    db: Database,
    retry: RetryPolicy,
    /// 0 = unlimited.
    max_active_loans: u32,
    page_size: u32,
}

impl Lending {
    pub fn new(db: Database, retry: RetryPolicy, max_active_loans: u32) -> Self {
        Lending {
            db,
            retry,
            max_active_loans,
            page_size: libris_core::DEFAULT_PAGE_SIZE,
        }
    }

    /// Overrides how many books each issued-books page fetches.
    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Lends one copy of `book_id` to `user_id`.
    ///
    /// ## Returns
    /// * `Ok(Transaction)` - the new active borrowing
    /// * `Err(NotAvailable)` - book not approved, or no copy on the shelf
    /// * `Err(DuplicateLoan)` - the user already holds this book
    /// * `Err(Validation(LimitReached))` - the user is at the loan limit
    /// * `Err(ConcurrencyConflict)` - lost the race for the book too often
    pub async fn borrow(&self, book_id: &str, user_id: &str) -> EngineResult<Transaction> {
        validate_ref("bookId", book_id)?;
        validate_ref("userId", user_id)?;

        self.retry
            .run("borrow", || self.try_borrow(book_id, user_id))
            .await
    }

    async fn try_borrow(&self, book_id: &str, user_id: &str) -> EngineResult<Transaction> {
        let now = Utc::now();
        let mut book = load_book(&self.db, book_id).await?;
        let expected = book.version;

        book.lend_to(user_id, now)?;
        self.check_loan_limit(user_id).await?;

        let borrowing = new_transaction(
            generate_id(),
            TransactionKind::Borrowing,
            user_id,
            book_id,
            1,
            now,
        );

        let mut writes = vec![LedgerWrite::Append(borrowing.clone())];
        if self.max_active_loans > 0 {
            writes.push(LedgerWrite::CapActiveLoans {
                user_id: user_id.to_string(),
                max: i64::from(self.max_active_loans),
            });
        }

        let stored = self
            .db
            .books()
            .put_if_version(&book, expected, &writes)
            .await
            .map_err(|e| duplicate_loan_or(e, book_id, user_id))?;

        info!(
            book_id = %book_id,
            user_id = %user_id,
            available = stored.available_copies,
            "Book borrowed"
        );
        Ok(borrowing)
    }

    /// Early rejection before touching the book; the cap itself is enforced
    /// by the `CapActiveLoans` write.
    async fn check_loan_limit(&self, user_id: &str) -> EngineResult<()> {
        if self.max_active_loans == 0 {
            return Ok(());
        }

        let active = self.db.transactions().count_active_borrowings(user_id).await?;
        if active >= i64::from(self.max_active_loans) {
            return Err(ValidationError::LimitReached {
                field: "activeLoans".to_string(),
                max: i64::from(self.max_active_loans),
            }
            .into());
        }

        Ok(())
    }

    /// Takes back the copy of `book_id` held by `user_id`.
    ///
    /// ## Returns
    /// * `Ok(Transaction)` - the completed borrowing, `return_date` set
    /// * `Err(NoActiveLoan)` - the user holds no copy of this book
    pub async fn return_book(&self, book_id: &str, user_id: &str) -> EngineResult<Transaction> {
        validate_ref("bookId", book_id)?;
        validate_ref("userId", user_id)?;

        self.retry
            .run("return_book", || self.try_return(book_id, user_id))
            .await
    }

    async fn try_return(&self, book_id: &str, user_id: &str) -> EngineResult<Transaction> {
        let now = Utc::now();
        let mut book = load_book(&self.db, book_id).await?;
        let expected = book.version;

        book.take_back(user_id, now)?;

        let mut borrowing = self
            .db
            .transactions()
            .find_active_borrowing(book_id, user_id)
            .await?
            .ok_or_else(|| DbError::Corrupt {
                entity: "Book".to_string(),
                id: book_id.to_string(),
                reason: format!("active loan of {user_id} has no open borrowing entry"),
            })?;
        borrowing.close_loan(now)?;

        let stored = self
            .db
            .books()
            .put_if_version(&book, expected, &[LedgerWrite::completion_of(&borrowing)])
            .await?;

        info!(
            book_id = %book_id,
            user_id = %user_id,
            available = stored.available_copies,
            "Book returned"
        );
        Ok(borrowing)
    }

    /// Every copy currently out, optionally only those held by `user_id`.
    ///
    /// Books are read a page at a time as the stream is consumed.
    pub fn issued_books(
        &self,
        user_id: Option<&str>,
    ) -> impl Stream<Item = EngineResult<IssuedBook>> + Send + 'static {
        let repo = self.db.books();
        let limit = self.page_size;
        let user_id = user_id.map(str::to_string);

        paged(move |after: Option<String>| {
            let repo = repo.clone();
            let user_id = user_id.clone();
            async move {
                let page = repo
                    .page_with_active_loans(user_id.as_deref(), after.as_deref(), limit)
                    .await?;
                let next = next_cursor(&page, limit, |book| book.id.clone());
                let issued: Vec<IssuedBook> = page
                    .into_iter()
                    .flat_map(|book| issued_from(book, user_id.as_deref()))
                    .collect();
                Ok::<_, EngineError>((issued, next))
            }
        })
    }
}

/// Maps a lost race on the one-open-loan index to `DuplicateLoan`.
fn duplicate_loan_or(err: DbError, book_id: &str, user_id: &str) -> EngineError {
    if err.is_unique_violation_on("transactions.user_id") {
        return CoreError::DuplicateLoan {
            book_id: book_id.to_string(),
            user_id: user_id.to_string(),
        }
        .into();
    }
    err.into()
}

fn issued_from(book: Book, user_id: Option<&str>) -> Vec<IssuedBook> {
    book.active_loans()
        .filter(|loan| user_id.map_or(true, |u| loan.user_id == u))
        .map(|loan| IssuedBook {
            book: book.clone(),
            user_id: loan.user_id.clone(),
            borrow_date: loan.borrow_date,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RedonationPolicy;
    use crate::inventory::Inventory;
    use futures_util::TryStreamExt;
    use libris_core::{BookMeta, TransactionStatus};
    use libris_db::DbConfig;

    async fn approved_book(copies: i64) -> (Database, String) {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let inv = Inventory::new(db.clone(), RetryPolicy::default(), RedonationPolicy::Refuse);
        let meta = BookMeta {
            title: "A Wizard of Earthsea".into(),
            author: "Ursula K. Le Guin".into(),
            genre: "Fantasy".into(),
            ..Default::default()
        };
        let (book, _) = inv.submit_donation("978-0-553-38304-3", &meta, "d1", copies).await.unwrap();
        inv.approve_book(&book.id, "admin").await.unwrap();
        (db, book.id)
    }

    #[tokio::test]
    async fn test_borrow_then_return_restores_counter() {
        let (db, book_id) = approved_book(2).await;
        let lending = Lending::new(db.clone(), RetryPolicy::default(), 0);

        let tx = lending.borrow(&book_id, "u1").await.unwrap();
        assert_eq!(tx.status, TransactionStatus::Active);
        assert_eq!(db.books().get_by_id(&book_id).await.unwrap().unwrap().available_copies, 1);

        let done = lending.return_book(&book_id, "u1").await.unwrap();
        assert_eq!(done.id, tx.id);
        assert_eq!(done.status, TransactionStatus::Completed);
        assert!(done.return_date.is_some());

        let book = db.books().get_by_id(&book_id).await.unwrap().unwrap();
        assert_eq!(book.available_copies, 2);
        assert_eq!(book.total_copies, 2);
        assert_eq!(book.counter_violation(), None);
    }

    #[tokio::test]
    async fn test_duplicate_loan_and_missing_loan() {
        let (db, book_id) = approved_book(2).await;
        let lending = Lending::new(db, RetryPolicy::default(), 0);

        lending.borrow(&book_id, "u1").await.unwrap();
        let err = lending.borrow(&book_id, "u1").await.unwrap_err();
        assert!(matches!(err, EngineError::Core(CoreError::DuplicateLoan { .. })));

        let err = lending.return_book(&book_id, "u2").await.unwrap_err();
        assert!(matches!(err, EngineError::Core(CoreError::NoActiveLoan { .. })));
    }

    #[tokio::test]
    async fn test_loan_limit() {
        let (db, first) = approved_book(1).await;
        let inv = Inventory::new(db.clone(), RetryPolicy::default(), RedonationPolicy::Refuse);
        let tehanu = BookMeta {
            title: "Tehanu".into(),
            author: "Ursula K. Le Guin".into(),
            genre: "Fantasy".into(),
            ..Default::default()
        };
        let (second, _) = inv.submit_donation("978-0-1", &tehanu, "d1", 1).await.unwrap();
        inv.approve_book(&second.id, "admin").await.unwrap();

        let lending = Lending::new(db, RetryPolicy::default(), 1);
        lending.borrow(&first, "u1").await.unwrap();
        let err = lending.borrow(&second.id, "u1").await.unwrap_err();
        assert!(matches!(
            err,
            EngineError::Core(CoreError::Validation(ValidationError::LimitReached { .. }))
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_loan_limit_holds_under_concurrent_borrows() {
        let dir = tempfile::tempdir().unwrap();
        let config = DbConfig::new(dir.path().join("loans.db")).max_connections(8);
        let db = Database::new(config).await.unwrap();
        let inv = Inventory::new(db.clone(), RetryPolicy::default(), RedonationPolicy::Refuse);

        let mut book_ids = Vec::new();
        for i in 0..6 {
            let meta = BookMeta {
                title: format!("Volume {i}"),
                author: "Ursula K. Le Guin".into(),
                genre: "Fantasy".into(),
                ..Default::default()
            };
            let (book, _) = inv.submit_donation(&format!("9780{i}"), &meta, "d1", 1).await.unwrap();
            inv.approve_book(&book.id, "admin").await.unwrap();
            book_ids.push(book.id);
        }

        let lending = Lending::new(db.clone(), RetryPolicy::default(), 1);
        let handles: Vec<_> = book_ids
            .into_iter()
            .map(|book_id| {
                let lending = lending.clone();
                tokio::spawn(async move { lending.borrow(&book_id, "u1").await })
            })
            .collect();

        let mut borrowed = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => borrowed += 1,
                Err(EngineError::Core(CoreError::Validation(ValidationError::LimitReached { .. }))) => {}
                Err(other) => panic!("unexpected error: {other:?}"),
            }
        }

        assert_eq!(borrowed, 1);
        assert_eq!(db.transactions().count_active_borrowings("u1").await.unwrap(), 1);
        db.close().await;
    }

    #[tokio::test]
    async fn test_issued_books_pages_and_filters() {
        let (db, book_id) = approved_book(3).await;
        let lending = Lending::new(db, RetryPolicy::default(), 0).with_page_size(1);

        lending.borrow(&book_id, "u1").await.unwrap();
        lending.borrow(&book_id, "u2").await.unwrap();

        let all: Vec<IssuedBook> = lending.issued_books(None).try_collect().await.unwrap();
        assert_eq!(all.len(), 2);

        let mine: Vec<IssuedBook> = lending.issued_books(Some("u2")).try_collect().await.unwrap();
        assert_eq!(mine.len(), 1);
        assert_eq!(mine[0].user_id, "u2");
        assert_eq!(mine[0].book.id, book_id);

        lending.return_book(&book_id, "u1").await.unwrap();
        let all: Vec<IssuedBook> = lending.issued_books(None).try_collect().await.unwrap();
        assert_eq!(all.len(), 1);
    }
}
