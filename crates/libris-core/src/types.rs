//! # Domain Types
//!
//! Core domain types used throughout Libris.
//!
//! ## Type Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Domain Types                                    │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────┐       │
//! │  │      Book       │   │   Transaction   │   │   Certificate   │       │
//! │  │  ─────────────  │   │  ─────────────  │   │  ─────────────  │       │
//! │  │  id (UUID)      │   │  id (UUID)      │   │  id (UUID)      │       │
//! │  │  isbn (unique)  │   │  kind           │   │  transaction_id │       │
//! │  │  status         │   │  status         │   │  certificate_url│       │
//! │  │  copy counters  │   │  copies         │   │                 │       │
//! │  │  loans          │   │  return_date    │   │                 │       │
//! │  └─────────────────┘   └─────────────────┘   └─────────────────┘       │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────┐       │
//! │  │   BookStatus    │   │TransactionStatus│   │ TransactionKind │       │
//! │  │  Pending        │   │  Active         │   │  Donation       │       │
//! │  │  Approved       │   │  Completed      │   │  Borrowing      │       │
//! │  │  Rejected       │   └─────────────────┘   └─────────────────┘       │
//! │  └─────────────────┘                                                    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Dual-Key Identity Pattern
//! Every entity has:
//! - `id`: UUID v4 - immutable, used for relations
//! - Business key where one exists: `isbn` for books, `user_id`/`email` for accounts

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

// =============================================================================
// Book Status
// =============================================================================

/// Review state of a donated book.
///
/// ## Transition Table
/// ```text
///            approve
///   Pending ─────────► Approved   (terminal)
///      │
///      │ reject
///      ▼
///   Rejected  (terminal, unless the re-donation policy reopens it)
/// ```
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize, TS,
)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum BookStatus {
    /// Donated, waiting for an admin decision.
    #[default]
    Pending,
    /// Accepted into the catalog; copies may be lent.
    Approved,
    /// Refused; never lent.
    Rejected,
}

impl BookStatus {
    /// Returns true if the transition table allows `self → next`.
    pub const fn can_transition_to(self, next: BookStatus) -> bool {
        matches!(
            (self, next),
            (BookStatus::Pending, BookStatus::Approved) | (BookStatus::Pending, BookStatus::Rejected)
        )
    }

    /// Returns true for states no admin decision can leave.
    pub const fn is_terminal(self) -> bool {
        !matches!(self, BookStatus::Pending)
    }
}

impl std::fmt::Display for BookStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BookStatus::Pending => write!(f, "pending"),
            BookStatus::Approved => write!(f, "approved"),
            BookStatus::Rejected => write!(f, "rejected"),
        }
    }
}

impl std::str::FromStr for BookStatus {
    type Err = crate::ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" | "in review" => Ok(BookStatus::Pending),
            "approved" | "accepted" => Ok(BookStatus::Approved),
            "rejected" => Ok(BookStatus::Rejected),
            _ => Err(crate::ValidationError::NotAllowed {
                field: "status".to_string(),
                allowed: vec!["pending".into(), "approved".into(), "rejected".into()],
            }),
        }
    }
}

// =============================================================================
// Transaction Kind / Status
// =============================================================================

/// What a ledger entry records.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS,
)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    /// A donor contributed copies.
    Donation,
    /// One copy went out on loan.
    Borrowing,
}

impl std::fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransactionKind::Donation => write!(f, "donation"),
            TransactionKind::Borrowing => write!(f, "borrowing"),
        }
    }
}

/// Ledger entry state. `Active → Completed` is the only transition.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize, TS,
)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    /// Donation awaiting review, or loan not yet returned.
    #[default]
    Active,
    /// Donation reviewed, or loan returned.
    Completed,
}

impl TransactionStatus {
    /// Returns true if the transition table allows `self → next`.
    pub const fn can_transition_to(self, next: TransactionStatus) -> bool {
        matches!(
            (self, next),
            (TransactionStatus::Active, TransactionStatus::Completed)
        )
    }
}

impl std::fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransactionStatus::Active => write!(f, "active"),
            TransactionStatus::Completed => write!(f, "completed"),
        }
    }
}

/// How an admin resolved a donation. Only accepted donations earn a certificate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum DonationOutcome {
    /// Copies approved with the book, or confirmed on an approved book.
    Accepted,
    /// Book rejected, or copies declined.
    Declined,
}

impl std::fmt::Display for DonationOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DonationOutcome::Accepted => write!(f, "accepted"),
            DonationOutcome::Declined => write!(f, "declined"),
        }
    }
}

// =============================================================================
// Loan
// =============================================================================

/// One entry of a book's borrow list.
///
/// Returned loans stay on the book as history; only loans without a
/// `return_date` hold a copy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Loan {
    pub user_id: String,
    #[ts(as = "String")]
    pub borrow_date: DateTime<Utc>,
    #[ts(as = "Option<String>")]
    pub return_date: Option<DateTime<Utc>>,
}

impl Loan {
    /// Returns true while the copy is still out.
    #[inline]
    pub fn is_active(&self) -> bool {
        self.return_date.is_none()
    }
}

// =============================================================================
// Book
// =============================================================================

/// Caller-supplied descriptive fields for a donation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct BookMeta {
    pub title: String,
    pub author: String,
    pub genre: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub published_year: Option<i32>,
}

/// Catalog entry for one ISBN, aggregating every donated copy.
///
/// ## Copy Counters
/// ```text
/// total_copies = available_copies + active loans + pending_copies
///                └── lendable ──┘   └─ out ──┘    └─ awaiting admin ─┘
/// ```
/// The identity holds once the book is approved. Pending and rejected books
/// keep `available_copies` at 0.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Book {
    /// Unique identifier (UUID v4).
    pub id: String,

    /// ISBN as donated (hyphens preserved); unique across the catalog.
    pub isbn: String,

    pub title: String,
    pub author: String,
    pub genre: String,
    pub description: Option<String>,
    pub published_year: Option<i32>,

    /// Review state.
    pub status: BookStatus,

    /// Every copy ever donated under this ISBN and not declined.
    pub total_copies: i64,

    /// Copies on the shelf that may be lent right now.
    pub available_copies: i64,

    /// Copies donated to an approved book that an admin has not confirmed.
    pub pending_copies: i64,

    /// Account that first donated this ISBN.
    pub donated_by: String,

    pub approved_by: Option<String>,
    #[ts(as = "Option<String>")]
    pub approved_at: Option<DateTime<Utc>>,

    /// Borrow list: active loans plus returned history.
    pub loans: Vec<Loan>,

    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
    #[ts(as = "String")]
    pub updated_at: DateTime<Utc>,

    /// Record version for optimistic concurrency. Bumped on every write.
    pub version: i64,
}

impl Book {
    /// Iterates over loans that still hold a copy.
    pub fn active_loans(&self) -> impl Iterator<Item = &Loan> {
        self.loans.iter().filter(|l| l.is_active())
    }

    /// Number of copies currently out.
    pub fn active_loan_count(&self) -> i64 {
        self.active_loans().count() as i64
    }

    /// Returns the active loan held by `user_id`, if any.
    pub fn active_loan_of(&self, user_id: &str) -> Option<&Loan> {
        self.active_loans().find(|l| l.user_id == user_id)
    }

    /// Copies a borrower may take, as the borrower sees it.
    ///
    /// Zero for any book that isn't approved, regardless of the stored counter.
    pub fn borrowable_copies(&self) -> i64 {
        match self.status {
            BookStatus::Approved => self.available_copies,
            BookStatus::Pending | BookStatus::Rejected => 0,
        }
    }

    /// Returns true if `user_id` could borrow this book right now.
    pub fn can_borrow(&self, user_id: &str) -> bool {
        self.borrowable_copies() > 0 && self.active_loan_of(user_id).is_none()
    }
}

// =============================================================================
// Transaction
// =============================================================================

/// Ledger entry for a donation or a loan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct Transaction {
    pub id: String,
    pub user_id: String,
    pub book_id: String,
    pub kind: TransactionKind,
    /// Copies donated; always 1 for a borrowing.
    pub copies: i64,
    #[ts(as = "String")]
    pub date: DateTime<Utc>,
    /// Set when a borrowing is returned.
    #[ts(as = "Option<String>")]
    pub return_date: Option<DateTime<Utc>>,
    pub status: TransactionStatus,
    #[ts(as = "Option<String>")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Set when a donation is resolved; always `None` for a borrowing.
    pub outcome: Option<DonationOutcome>,
}

impl Transaction {
    /// Returns true for an active (unreviewed) donation.
    pub fn is_open_donation(&self) -> bool {
        self.kind == TransactionKind::Donation && self.status == TransactionStatus::Active
    }

    /// Returns true for a donation whose copies were accepted.
    pub fn is_accepted_donation(&self) -> bool {
        self.kind == TransactionKind::Donation
            && self.status == TransactionStatus::Completed
            && self.outcome == Some(DonationOutcome::Accepted)
    }
}

// =============================================================================
// Certificate
// =============================================================================

/// Proof-of-donation record. At most one per donation transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct Certificate {
    pub id: String,
    pub user_id: String,
    pub book_id: String,
    /// The donation this certificate acknowledges (unique).
    pub transaction_id: String,
    #[ts(as = "String")]
    pub issued_date: DateTime<Utc>,
    /// Opaque reference to the rendered artifact.
    pub certificate_url: String,
}

// =============================================================================
// Accounts
// =============================================================================

/// Account role. Authentication happens upstream; the role is informational.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum AccountRole {
    #[default]
    Member,
    Admin,
}

/// A donor / borrower / administrator account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct Account {
    pub id: String,
    /// Login handle (unique).
    pub user_id: String,
    pub username: String,
    /// Contact email (unique, stored lowercase).
    pub email: String,
    pub role: AccountRole,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
}

/// Registration input.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct NewAccount {
    pub user_id: String,
    pub username: String,
    pub email: String,
    #[serde(default)]
    pub role: AccountRole,
}

// =============================================================================
// Read Models
// =============================================================================

/// One row of the issued-books view: a book and when it went out.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct IssuedBook {
    pub book: Book,
    pub user_id: String,
    #[ts(as = "String")]
    pub borrow_date: DateTime<Utc>,
}

/// Half-open time window `[from, to)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct DateRange {
    #[ts(as = "String")]
    pub from: DateTime<Utc>,
    #[ts(as = "String")]
    pub to: DateTime<Utc>,
}

impl DateRange {
    /// Creates a range; `from` must not be after `to`.
    pub fn new(from: DateTime<Utc>, to: DateTime<Utc>) -> Result<Self, crate::ValidationError> {
        if from > to {
            return Err(crate::ValidationError::invalid_format(
                "date range",
                "start is after end",
            ));
        }
        Ok(DateRange { from, to })
    }

    /// Returns true if `at` falls inside the window.
    #[inline]
    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        at >= self.from && at < self.to
    }
}

/// Sort order for catalog listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum BookOrder {
    /// Most recently donated first (the "latest" shelf).
    #[default]
    Newest,
    /// Alphabetical by title.
    Title,
}

/// Catalog listing filter.
#[derive(Debug, Clone, Default, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct BookQuery {
    #[serde(default)]
    pub status: Option<BookStatus>,
    #[serde(default)]
    pub genre: Option<String>,
    #[serde(default)]
    pub order: BookOrder,
    /// Maximum rows; `None` uses the default page size.
    #[serde(default)]
    pub limit: Option<u32>,
}

impl BookQuery {
    /// Approved books only, newest first (what borrowers browse).
    pub fn available() -> Self {
        BookQuery {
            status: Some(BookStatus::Approved),
            ..Default::default()
        }
    }

    /// Newest `limit` books regardless of status.
    pub fn latest(limit: u32) -> Self {
        BookQuery {
            limit: Some(limit),
            ..Default::default()
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
