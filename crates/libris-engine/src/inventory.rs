//! # Inventory
//!
//! Donation intake and admin review.
//!
//! ## Donation Workflow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  submit_donation(isbn)                                                  │
//! │       │                                                                 │
//! │       ├── ISBN unknown ──► INSERT book (pending) + donation   ──┐      │
//! │       │                    (unique isbn lost? → conflict, retry)│      │
//! │       │                                                         │      │
//! │       └── ISBN known ────► total += n, pending += n             │      │
//! │                            versioned put + donation             │      │
//! │                                                                 ▼      │
//! │  approve_book / reject_book ─► book decided, every active donation     │
//! │                                completed ─► BookEvent                  │
//! │                                                                         │
//! │  confirm_donation / decline_donation ─► one donation on an approved    │
//! │                                         book settled ─► BookEvent      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::Utc;
use tracing::{debug, info};

use libris_core::lifecycle::{new_book, new_transaction};
use libris_core::validation::{validate_book_meta, validate_copies, validate_isbn, validate_ref};
use libris_core::{
    Book, BookMeta, BookQuery, BookStatus, CoreError, DonationOutcome, Transaction,
    TransactionKind,
};
use libris_db::{generate_id, Database, LedgerWrite};

use crate::config::RedonationPolicy;
use crate::error::{EngineError, EngineResult};
use crate::events::BookEvent;
use crate::retry::RetryPolicy;

/// Loads a book or fails with `BookNotFound`.
pub(crate) async fn load_book(db: &Database, book_id: &str) -> EngineResult<Book> {
    db.books()
        .get_by_id(book_id)
        .await?
        .ok_or_else(|| CoreError::BookNotFound(book_id.to_string()).into())
}

/// Loads a ledger entry or fails with `TransactionNotFound`.
pub(crate) async fn load_transaction(db: &Database, id: &str) -> EngineResult<Transaction> {
    db.transactions()
        .get_by_id(id)
        .await?
        .ok_or_else(|| CoreError::TransactionNotFound(id.to_string()).into())
}

/// Donation intake and review.
#[derive(Debug, Clone)]
pub struct Inventory {
    db: Database,
    retry: RetryPolicy,
    redonation: RedonationPolicy,
}

impl Inventory {
    pub fn new(db: Database, retry: RetryPolicy, redonation: RedonationPolicy) -> Self {
        Inventory {
            db,
            retry,
            redonation,
        }
    }

    // =========================================================================
    // Donations
    // =========================================================================

    /// Records a donation of `copies` copies of `isbn` by `donor_id`.
    ///
    /// The first donation of an ISBN creates the book (pending review);
    /// later donations add pending copies to it. Metadata of later donations
    /// is ignored: the catalog keeps what the first donor entered.
    ///
    /// ## Returns
    /// * `Ok((Book, Transaction))` - stored book and the new active donation
    /// * `Err(EngineError::Core(CoreError::Validation(_)))` - malformed input
    /// * `Err(EngineError::Core(CoreError::InvalidState { .. }))` - the ISBN
    ///   was rejected and re-donation is refused
    pub async fn submit_donation(
        &self,
        isbn: &str,
        meta: &BookMeta,
        donor_id: &str,
        copies: i64,
    ) -> EngineResult<(Book, Transaction)> {
        let isbn = validate_isbn(isbn)?;
        let meta = validate_book_meta(meta)?;
        validate_ref("donorId", donor_id)?;
        validate_copies(copies)?;

        self.retry
            .run("submit_donation", || self.try_donate(&isbn, &meta, donor_id, copies))
            .await
    }

    async fn try_donate(
        &self,
        isbn: &str,
        meta: &BookMeta,
        donor_id: &str,
        copies: i64,
    ) -> EngineResult<(Book, Transaction)> {
        let now = Utc::now();
        let books = self.db.books();

        let Some(mut book) = books.find_by_isbn(isbn).await? else {
            let book = new_book(generate_id(), isbn.to_string(), meta.clone(), donor_id, copies, now);
            let donation = new_transaction(
                generate_id(),
                TransactionKind::Donation,
                donor_id,
                &book.id,
                copies,
                now,
            );

            return match books
                .insert_with_ledger(&book, &[LedgerWrite::Append(donation.clone())])
                .await
            {
                Ok(()) => {
                    info!(book_id = %book.id, isbn = %isbn, donor = %donor_id, copies, "New book donated, pending review");
                    Ok((book, donation))
                }
                Err(e) if e.is_unique_violation_on("books.isbn") => {
                    debug!(isbn = %isbn, "Concurrent first donation won the insert");
                    Err(EngineError::ConcurrencyConflict {
                        entity: "Book".to_string(),
                        id: isbn.to_string(),
                    })
                }
                Err(e) => Err(e.into()),
            };
        };

        let expected = book.version;
        if book.status == BookStatus::Rejected && self.redonation == RedonationPolicy::Reopen {
            book.reopen(now)?;
            info!(book_id = %book.id, isbn = %isbn, "Rejected book reopened by new donation");
        }
        book.add_donated_copies(copies, now)?;

        let donation = new_transaction(
            generate_id(),
            TransactionKind::Donation,
            donor_id,
            &book.id,
            copies,
            now,
        );
        let stored = books
            .put_if_version(&book, expected, &[LedgerWrite::Append(donation.clone())])
            .await?;

        info!(
            book_id = %stored.id,
            isbn = %isbn,
            donor = %donor_id,
            copies,
            pending = stored.pending_copies,
            "Donation added to existing book"
        );
        Ok((stored, donation))
    }

    // =========================================================================
    // Review
    // =========================================================================

    /// Pending → Approved. Completes every active donation of the book as
    /// accepted, in the same write.
    pub async fn approve_book(&self, book_id: &str, admin_id: &str) -> EngineResult<(Book, BookEvent)> {
        validate_ref("bookId", book_id)?;
        validate_ref("adminId", admin_id)?;

        self.retry
            .run("approve_book", || self.try_review(book_id, admin_id, DonationOutcome::Accepted))
            .await
    }

    /// Pending → Rejected. Completes every active donation as declined.
    pub async fn reject_book(&self, book_id: &str, admin_id: &str) -> EngineResult<(Book, BookEvent)> {
        validate_ref("bookId", book_id)?;
        validate_ref("adminId", admin_id)?;

        self.retry
            .run("reject_book", || self.try_review(book_id, admin_id, DonationOutcome::Declined))
            .await
    }

    async fn try_review(
        &self,
        book_id: &str,
        admin_id: &str,
        verdict: DonationOutcome,
    ) -> EngineResult<(Book, BookEvent)> {
        let now = Utc::now();
        let mut book = load_book(&self.db, book_id).await?;
        let expected = book.version;

        match verdict {
            DonationOutcome::Accepted => book.approve(admin_id, now)?,
            DonationOutcome::Declined => book.reject(now)?,
        }

        let mut donations = self.db.transactions().active_donations(book_id).await?;
        for donation in &mut donations {
            donation.resolve(verdict, now)?;
        }
        let writes: Vec<LedgerWrite> = donations.iter().map(LedgerWrite::completion_of).collect();

        let stored = self.db.books().put_if_version(&book, expected, &writes).await?;

        let completed_donations: Vec<String> = donations.into_iter().map(|d| d.id).collect();
        info!(
            book_id = %book_id,
            admin = %admin_id,
            status = %stored.status,
            donations = completed_donations.len(),
            available = stored.available_copies,
            "Book reviewed"
        );

        let event = match verdict {
            DonationOutcome::Accepted => BookEvent::Approved {
                book_id: book_id.to_string(),
                admin_id: admin_id.to_string(),
                completed_donations,
            },
            DonationOutcome::Declined => BookEvent::Rejected {
                book_id: book_id.to_string(),
                admin_id: admin_id.to_string(),
                completed_donations,
            },
        };
        Ok((stored, event))
    }

    /// Releases the copies of one donation to an approved book.
    pub async fn confirm_donation(
        &self,
        transaction_id: &str,
        admin_id: &str,
    ) -> EngineResult<(Book, Transaction, BookEvent)> {
        validate_ref("transactionId", transaction_id)?;
        validate_ref("adminId", admin_id)?;

        self.retry
            .run("confirm_donation", || {
                self.try_settle(transaction_id, admin_id, DonationOutcome::Accepted)
            })
            .await
    }

    /// Drops the copies of one donation to an approved book from the count.
    pub async fn decline_donation(
        &self,
        transaction_id: &str,
        admin_id: &str,
    ) -> EngineResult<(Book, Transaction, BookEvent)> {
        validate_ref("transactionId", transaction_id)?;
        validate_ref("adminId", admin_id)?;

        self.retry
            .run("decline_donation", || {
                self.try_settle(transaction_id, admin_id, DonationOutcome::Declined)
            })
            .await
    }

    async fn try_settle(
        &self,
        transaction_id: &str,
        admin_id: &str,
        outcome: DonationOutcome,
    ) -> EngineResult<(Book, Transaction, BookEvent)> {
        let now = Utc::now();
        let mut donation = load_transaction(&self.db, transaction_id).await?;
        donation.resolve(outcome, now)?;

        let mut book = load_book(&self.db, &donation.book_id).await?;
        let expected = book.version;
        match outcome {
            DonationOutcome::Accepted => book.confirm_copies(donation.copies, now)?,
            DonationOutcome::Declined => book.decline_copies(donation.copies, now)?,
        }

        let stored = self
            .db
            .books()
            .put_if_version(&book, expected, &[LedgerWrite::completion_of(&donation)])
            .await?;

        info!(
            book_id = %stored.id,
            transaction_id = %transaction_id,
            admin = %admin_id,
            outcome = %outcome,
            copies = donation.copies,
            "Donation settled"
        );

        let event = match outcome {
            DonationOutcome::Accepted => BookEvent::DonationConfirmed {
                book_id: stored.id.clone(),
                admin_id: admin_id.to_string(),
                transaction_id: donation.id.clone(),
            },
            DonationOutcome::Declined => BookEvent::DonationDeclined {
                book_id: stored.id.clone(),
                admin_id: admin_id.to_string(),
                transaction_id: donation.id.clone(),
            },
        };
        Ok((stored, donation, event))
    }

    // =========================================================================
    // Catalog Reads
    // =========================================================================

    /// Gets a book by ID.
    pub async fn get_book(&self, book_id: &str) -> EngineResult<Book> {
        validate_ref("bookId", book_id)?;
        load_book(&self.db, book_id).await
    }

    /// Lists books matching `query`.
    pub async fn list_books(&self, query: &BookQuery) -> EngineResult<Vec<Book>> {
        Ok(self.db.books().list(query).await?)
    }
}
