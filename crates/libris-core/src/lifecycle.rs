//! # Lifecycle Rules
//!
//! Pure state transitions for books and ledger entries. Every function here
//! takes the current record plus `now` and either mutates it into the next
//! valid state or returns a [`CoreError`] leaving it untouched.
//!
//! The engine reads a record, applies one of these rules, and writes the
//! result back with a version check. Keeping the rules here means the same
//! checks run no matter which store sits underneath.
//!
//! ## Book Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  donate (new ISBN)        donate (existing ISBN)                       │
//! │     │                        │ total += n, pending += n                 │
//! │     ▼                        ▼                                          │
//! │  ┌─────────┐  approve   ┌──────────┐  confirm_copies(n)                │
//! │  │ Pending │──────────► │ Approved │  pending -= n, available += n     │
//! │  └────┬────┘            └──────────┘  decline_copies(n)                │
//! │       │ reject             │   ▲      pending -= n, total -= n         │
//! │       ▼                    │   │                                        │
//! │  ┌──────────┐      lend_to │   │ take_back                              │
//! │  │ Rejected │   available-1│   │available+1                             │
//! │  └──────────┘              ▼   │                                        │
//! │       │ reopen          ┌────────┐                                      │
//! │       └───► Pending     │ loans  │                                      │
//! │                         └────────┘                                      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Utc};

use crate::error::{CoreError, CoreResult};
use crate::types::{
    Book, BookMeta, BookStatus, DonationOutcome, Loan, Transaction, TransactionKind,
    TransactionStatus,
};

// =============================================================================
// Constructors
// =============================================================================

/// Builds the catalog entry for the first donation of an ISBN.
///
/// The book starts pending with every copy unconfirmed and none lendable.
pub fn new_book(
    id: String,
    isbn: String,
    meta: BookMeta,
    donor_id: &str,
    copies: i64,
    now: DateTime<Utc>,
) -> Book {
    Book {
        id,
        isbn,
        title: meta.title,
        author: meta.author,
        genre: meta.genre,
        description: meta.description,
        published_year: meta.published_year,
        status: BookStatus::Pending,
        total_copies: copies,
        available_copies: 0,
        pending_copies: copies,
        donated_by: donor_id.to_string(),
        approved_by: None,
        approved_at: None,
        loans: Vec::new(),
        created_at: now,
        updated_at: now,
        version: 0,
    }
}

/// Builds an active ledger entry.
pub fn new_transaction(
    id: String,
    kind: TransactionKind,
    user_id: &str,
    book_id: &str,
    copies: i64,
    now: DateTime<Utc>,
) -> Transaction {
    Transaction {
        id,
        user_id: user_id.to_string(),
        book_id: book_id.to_string(),
        kind,
        copies,
        date: now,
        return_date: None,
        status: TransactionStatus::Active,
        completed_at: None,
        outcome: None,
    }
}

// =============================================================================
// Inventory Rules
// =============================================================================

impl Book {
    /// Counts freshly donated copies. They stay unavailable until an admin
    /// approves the book or confirms the donation.
    pub fn add_donated_copies(&mut self, copies: i64, now: DateTime<Utc>) -> CoreResult<()> {
        if self.status == BookStatus::Rejected {
            return Err(CoreError::book_state(&self.id, self.status, "accept donations"));
        }

        self.total_copies += copies;
        self.pending_copies += copies;
        self.updated_at = now;
        Ok(())
    }

    /// Puts a rejected book back into review so a new donation can be counted.
    ///
    /// Copies from the rejected donations are dropped from the count.
    pub fn reopen(&mut self, now: DateTime<Utc>) -> CoreResult<()> {
        if self.status != BookStatus::Rejected {
            return Err(CoreError::book_state(&self.id, self.status, "reopen"));
        }

        self.status = BookStatus::Pending;
        self.approved_by = None;
        self.approved_at = None;
        self.total_copies = self.active_loan_count();
        self.available_copies = 0;
        self.pending_copies = 0;
        self.updated_at = now;
        Ok(())
    }

    /// Pending → Approved. Every copy not out on loan becomes lendable.
    pub fn approve(&mut self, admin_id: &str, now: DateTime<Utc>) -> CoreResult<()> {
        if !self.status.can_transition_to(BookStatus::Approved) {
            return Err(CoreError::book_state(&self.id, self.status, "approve"));
        }

        self.status = BookStatus::Approved;
        self.approved_by = Some(admin_id.to_string());
        self.approved_at = Some(now);
        self.pending_copies = 0;
        self.available_copies = (self.total_copies - self.active_loan_count()).max(0);
        self.updated_at = now;
        Ok(())
    }

    /// Pending → Rejected. Nothing is ever lendable again.
    pub fn reject(&mut self, now: DateTime<Utc>) -> CoreResult<()> {
        if !self.status.can_transition_to(BookStatus::Rejected) {
            return Err(CoreError::book_state(&self.id, self.status, "reject"));
        }

        self.status = BookStatus::Rejected;
        self.available_copies = 0;
        self.pending_copies = 0;
        self.updated_at = now;
        Ok(())
    }

    /// Releases `copies` confirmed by an admin onto the shelf.
    pub fn confirm_copies(&mut self, copies: i64, now: DateTime<Utc>) -> CoreResult<()> {
        self.ensure_pending_copies(copies, "confirm copies")?;

        self.pending_copies -= copies;
        self.available_copies += copies;
        self.updated_at = now;
        Ok(())
    }

    /// Removes `copies` an admin declined from the count.
    pub fn decline_copies(&mut self, copies: i64, now: DateTime<Utc>) -> CoreResult<()> {
        self.ensure_pending_copies(copies, "decline copies")?;

        self.pending_copies -= copies;
        self.total_copies -= copies;
        self.updated_at = now;
        Ok(())
    }

    fn ensure_pending_copies(&self, copies: i64, operation: &'static str) -> CoreResult<()> {
        if self.status != BookStatus::Approved {
            return Err(CoreError::book_state(&self.id, self.status, operation));
        }

        if copies <= 0 || copies > self.pending_copies {
            return Err(CoreError::InvalidState {
                entity: "Book",
                id: self.id.clone(),
                current: format!("holding {} unconfirmed copies", self.pending_copies),
                operation,
            });
        }

        Ok(())
    }

    // =========================================================================
    // Lending Rules
    // =========================================================================

    /// Hands one copy to `user_id`.
    ///
    /// ## Check Order
    /// 1. Book must be approved                → `NotAvailable`
    /// 2. User must not already hold a copy     → `DuplicateLoan`
    /// 3. A copy must be on the shelf           → `NotAvailable`
    pub fn lend_to(&mut self, user_id: &str, now: DateTime<Utc>) -> CoreResult<()> {
        if self.status != BookStatus::Approved {
            return Err(self.not_available());
        }

        if self.active_loan_of(user_id).is_some() {
            return Err(CoreError::DuplicateLoan {
                book_id: self.id.clone(),
                user_id: user_id.to_string(),
            });
        }

        if self.available_copies <= 0 {
            return Err(self.not_available());
        }

        self.available_copies -= 1;
        self.loans.push(Loan {
            user_id: user_id.to_string(),
            borrow_date: now,
            return_date: None,
        });
        self.updated_at = now;
        Ok(())
    }

    /// Takes back the copy `user_id` holds. Returns the original borrow date.
    pub fn take_back(&mut self, user_id: &str, now: DateTime<Utc>) -> CoreResult<DateTime<Utc>> {
        let loan = self
            .loans
            .iter_mut()
            .find(|l| l.is_active() && l.user_id == user_id)
            .ok_or_else(|| CoreError::NoActiveLoan {
                book_id: self.id.clone(),
                user_id: user_id.to_string(),
            })?;

        loan.return_date = Some(now);
        let borrowed_at = loan.borrow_date;

        let ceiling = self.total_copies - self.pending_copies - self.active_loan_count();
        self.available_copies = (self.available_copies + 1).min(ceiling.max(0));
        self.updated_at = now;
        Ok(borrowed_at)
    }

    fn not_available(&self) -> CoreError {
        CoreError::NotAvailable {
            book_id: self.id.clone(),
            status: self.status,
            available: self.borrowable_copies(),
        }
    }

    // =========================================================================
    // Invariants
    // =========================================================================

    /// Checks the copy counters against each other.
    ///
    /// Returns a description of the first broken rule, if any.
    pub fn counter_violation(&self) -> Option<String> {
        let active = self.active_loan_count();

        if self.total_copies < 0 || self.pending_copies < 0 {
            return Some(format!(
                "negative counter: total={} pending={}",
                self.total_copies, self.pending_copies
            ));
        }

        if self.available_copies < 0 || self.available_copies > self.total_copies {
            return Some(format!(
                "available {} outside 0..={}",
                self.available_copies, self.total_copies
            ));
        }

        match self.status {
            BookStatus::Approved => {
                let accounted = self.available_copies + active + self.pending_copies;
                if accounted != self.total_copies {
                    return Some(format!(
                        "available {} + loans {} + pending {} != total {}",
                        self.available_copies, active, self.pending_copies, self.total_copies
                    ));
                }
            }
            BookStatus::Pending | BookStatus::Rejected => {
                if self.available_copies != 0 || active != 0 {
                    return Some(format!(
                        "{} book has available={} loans={}",
                        self.status, self.available_copies, active
                    ));
                }
            }
        }

        let mut holders: Vec<&str> = self.active_loans().map(|l| l.user_id.as_str()).collect();
        holders.sort_unstable();
        if holders.windows(2).any(|w| w[0] == w[1]) {
            return Some("a user holds two active loans".to_string());
        }

        None
    }
}

// =============================================================================
// Ledger Rules
// =============================================================================

impl Transaction {
    /// Active → Completed.
    pub fn complete(&mut self, now: DateTime<Utc>) -> CoreResult<()> {
        if !self.status.can_transition_to(TransactionStatus::Completed) {
            return Err(CoreError::transaction_state(&self.id, self.status, "complete"));
        }

        self.status = TransactionStatus::Completed;
        self.completed_at = Some(now);
        Ok(())
    }

    /// Completes a donation with the admin's decision.
    pub fn resolve(&mut self, outcome: DonationOutcome, now: DateTime<Utc>) -> CoreResult<()> {
        self.ensure_kind(TransactionKind::Donation)?;
        self.complete(now)?;
        self.outcome = Some(outcome);
        Ok(())
    }

    /// Completes a borrowing and stamps its return date.
    pub fn close_loan(&mut self, now: DateTime<Utc>) -> CoreResult<()> {
        self.ensure_kind(TransactionKind::Borrowing)?;
        self.complete(now)?;
        self.return_date = Some(now);
        Ok(())
    }

    /// Fails with `WrongTransactionKind` unless this entry is `expected`.
    pub fn ensure_kind(&self, expected: TransactionKind) -> CoreResult<()> {
        if self.kind != expected {
            return Err(CoreError::WrongTransactionKind {
                id: self.id.clone(),
                expected,
                actual: self.kind,
            });
        }
        Ok(())
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn meta() -> BookMeta {
        BookMeta {
            title: "Dune".into(),
            author: "Frank Herbert".into(),
            genre: "Science Fiction".into(),
            description: None,
            published_year: Some(1965),
        }
    }

    fn pending(copies: i64) -> Book {
        new_book("b1".into(), "978-0-1".into(), meta(), "donor", copies, Utc::now())
    }

    fn approved(copies: i64) -> Book {
        let mut book = pending(copies);
        book.approve("admin", Utc::now()).unwrap();
        book
    }

    #[test]
    fn test_new_book_is_pending_and_unlendable() {
        let book = pending(2);
        assert_eq!(book.status, BookStatus::Pending);
        assert_eq!(book.total_copies, 2);
        assert_eq!(book.available_copies, 0);
        assert_eq!(book.borrowable_copies(), 0);
        assert!(book.counter_violation().is_none());
    }

    #[test]
    fn test_approve_realizes_copies() {
        let book = approved(2);
        assert_eq!(book.available_copies, 2);
        assert_eq!(book.pending_copies, 0);
        assert_eq!(book.approved_by.as_deref(), Some("admin"));
        assert!(book.approved_at.is_some());
        assert!(book.counter_violation().is_none());
    }

    #[test]
    fn test_approve_twice_fails() {
        let mut book = approved(1);
        let err = book.approve("admin", Utc::now()).unwrap_err();
        assert!(matches!(err, CoreError::InvalidState { .. }));
    }

    #[test]
    fn test_reject_is_terminal() {
        let mut book = pending(3);
        book.reject(Utc::now()).unwrap();
        assert_eq!(book.available_copies, 0);
        assert!(book.approve("admin", Utc::now()).is_err());
        assert!(book.reject(Utc::now()).is_err());
        assert!(book.add_donated_copies(1, Utc::now()).is_err());
    }

    #[test]
    fn test_reopen_drops_rejected_copies() {
        let mut book = pending(3);
        book.reject(Utc::now()).unwrap();
        book.reopen(Utc::now()).unwrap();
        book.add_donated_copies(1, Utc::now()).unwrap();
        assert_eq!(book.status, BookStatus::Pending);
        assert_eq!(book.total_copies, 1);
        assert!(book.counter_violation().is_none());

        assert!(approved(1).reopen(Utc::now()).is_err());
    }

    #[test]
    fn test_donation_to_approved_book_waits_for_confirmation() {
        let mut book = approved(1);
        book.add_donated_copies(2, Utc::now()).unwrap();
        assert_eq!(book.total_copies, 3);
        assert_eq!(book.available_copies, 1);
        assert_eq!(book.pending_copies, 2);
        assert!(book.counter_violation().is_none());

        book.confirm_copies(1, Utc::now()).unwrap();
        assert_eq!(book.available_copies, 2);
        book.decline_copies(1, Utc::now()).unwrap();
        assert_eq!(book.total_copies, 2);
        assert_eq!(book.pending_copies, 0);
        assert!(book.counter_violation().is_none());

        assert!(book.confirm_copies(1, Utc::now()).is_err());
    }

    #[test]
    fn test_confirm_on_pending_book_fails() {
        let mut book = pending(1);
        assert!(book.confirm_copies(1, Utc::now()).is_err());
    }

    #[test]
    fn test_lend_and_take_back_round_trip() {
        let mut book = approved(2);
        book.lend_to("u1", Utc::now()).unwrap();
        assert_eq!(book.available_copies, 1);
        assert_eq!(book.active_loan_count(), 1);
        assert!(book.counter_violation().is_none());

        book.take_back("u1", Utc::now()).unwrap();
        assert_eq!(book.available_copies, 2);
        assert_eq!(book.total_copies, 2);
        assert_eq!(book.active_loan_count(), 0);
        assert_eq!(book.loans.len(), 1);
        assert!(book.counter_violation().is_none());
    }

    #[test]
    fn test_lend_rejects_duplicate_and_empty_shelf() {
        let mut book = approved(1);
        book.lend_to("u1", Utc::now()).unwrap();

        let err = book.lend_to("u1", Utc::now()).unwrap_err();
        assert!(matches!(err, CoreError::DuplicateLoan { .. }));

        let err = book.lend_to("u2", Utc::now()).unwrap_err();
        assert!(matches!(err, CoreError::NotAvailable { available: 0, .. }));
    }

    #[test]
    fn test_lend_pending_book_fails() {
        let mut book = pending(1);
        let err = book.lend_to("u1", Utc::now()).unwrap_err();
        assert!(matches!(
            err,
            CoreError::NotAvailable {
                status: BookStatus::Pending,
                ..
            }
        ));
    }

    #[test]
    fn test_take_back_without_loan_fails() {
        let mut book = approved(1);
        let err = book.take_back("u1", Utc::now()).unwrap_err();
        assert!(matches!(err, CoreError::NoActiveLoan { .. }));
    }

    #[test]
    fn test_take_back_never_exceeds_total() {
        let mut book = approved(1);
        book.lend_to("u1", Utc::now()).unwrap();
        // A corrupted counter must not push availability past the total.
        book.available_copies = 1;
        book.take_back("u1", Utc::now()).unwrap();
        assert_eq!(book.available_copies, 1);
    }

    #[test]
    fn test_transaction_completion() {
        let now = Utc::now();
        let mut tx = new_transaction("t1".into(), TransactionKind::Borrowing, "u1", "b1", 1, now);
        tx.close_loan(now).unwrap();
        assert_eq!(tx.status, TransactionStatus::Completed);
        assert_eq!(tx.return_date, Some(now));
        assert!(tx.complete(now).is_err());

        let mut donation = new_transaction("t2".into(), TransactionKind::Donation, "u1", "b1", 2, now);
        assert!(donation.is_open_donation());
        assert!(matches!(
            donation.close_loan(now),
            Err(CoreError::WrongTransactionKind { .. })
        ));
        donation.resolve(DonationOutcome::Accepted, now).unwrap();
        assert!(!donation.is_open_donation());
        assert!(donation.is_accepted_donation());
        assert!(donation.resolve(DonationOutcome::Declined, now).is_err());
    }
}
