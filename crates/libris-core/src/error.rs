//! # Error Types
//!
//! Domain-specific error types for libris-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  libris-core errors (this file)                                        │
//! │  ├── CoreError        - Lifecycle rule violations                      │
//! │  └── ValidationError  - Input validation failures                      │
//! │                                                                         │
//! │  libris-db errors (separate crate)                                     │
//! │  └── DbError          - Catalog store failures                         │
//! │                                                                         │
//! │  libris-engine errors (separate crate)                                 │
//! │  └── EngineError      - What callers see (code + status class)         │
//! │                                                                         │
//! │  Flow: ValidationError → CoreError → EngineError ← DbError             │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Design Principles
//! 1. Use `thiserror` for derive macros (not manual impl)
//! 2. Include context in error messages (ISBN, book ID, user ID)
//! 3. Errors are enum variants, never String
//! 4. None of these are retryable: re-running the same request yields the same answer

use thiserror::Error;

use crate::types::{BookStatus, TransactionKind, TransactionStatus};

// =============================================================================
// Core Error
// =============================================================================

/// Lifecycle rule violations.
///
/// These are surfaced verbatim to the caller and never retried.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Book cannot be found.
    #[error("Book not found: {0}")]
    BookNotFound(String),

    /// Transaction cannot be found.
    #[error("Transaction not found: {0}")]
    TransactionNotFound(String),

    /// Certificate cannot be found.
    #[error("Certificate not found: {0}")]
    CertificateNotFound(String),

    /// Account cannot be found.
    #[error("Account not found: {0}")]
    AccountNotFound(String),

    /// Book cannot be lent right now.
    ///
    /// ## When This Occurs
    /// - Book is still pending review, or was rejected
    /// - Every copy is out on loan (or awaiting confirmation)
    ///
    /// ## User Workflow
    /// ```text
    /// borrow(book, U2)
    ///      │
    ///      ▼
    /// Check: status=approved, available=0
    ///      │
    ///      ▼
    /// NotAvailable { book_id, status: Approved, available: 0 }
    ///      │
    ///      ▼
    /// UI shows: "No copies available"
    /// ```
    #[error("Book {book_id} is not available ({status}, {available} copies free)")]
    NotAvailable {
        book_id: String,
        status: BookStatus,
        available: i64,
    },

    /// The borrower already holds an active loan of this book.
    #[error("User {user_id} already has an active loan of book {book_id}")]
    DuplicateLoan { book_id: String, user_id: String },

    /// Return attempted without a matching active loan.
    #[error("User {user_id} has no active loan of book {book_id}")]
    NoActiveLoan { book_id: String, user_id: String },

    /// Requested operation is not valid in the entity's current state.
    ///
    /// ## When This Occurs
    /// - Approving or rejecting a book that is not pending
    /// - Completing a transaction that is already completed
    /// - Donating to a rejected ISBN while re-donation is refused
    #[error("{entity} {id} is {current}, cannot {operation}")]
    InvalidState {
        entity: &'static str,
        id: String,
        current: String,
        operation: &'static str,
    },

    /// Transaction is the wrong kind for the requested operation.
    #[error("Transaction {id} is a {actual} transaction, expected {expected}")]
    WrongTransactionKind {
        id: String,
        expected: TransactionKind,
        actual: TransactionKind,
    },

    /// A certificate already exists for this donation.
    ///
    /// Callers may treat this as success: the desired end-state holds.
    #[error("Certificate already issued for donation {transaction_id}")]
    DuplicateCertificate { transaction_id: String },

    /// Validation error (wraps ValidationError).
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

impl CoreError {
    /// Builds an `InvalidState` error for a book.
    pub fn book_state(id: impl Into<String>, current: BookStatus, operation: &'static str) -> Self {
        CoreError::InvalidState {
            entity: "Book",
            id: id.into(),
            current: current.to_string(),
            operation,
        }
    }

    /// Builds an `InvalidState` error for a transaction.
    pub fn transaction_state(
        id: impl Into<String>,
        current: TransactionStatus,
        operation: &'static str,
    ) -> Self {
        CoreError::InvalidState {
            entity: "Transaction",
            id: id.into(),
            current: current.to_string(),
            operation,
        }
    }

    /// Returns true when the error means "the desired end-state already holds".
    pub fn is_already_satisfied(&self) -> bool {
        matches!(self, CoreError::DuplicateCertificate { .. })
    }

    /// Returns true for lookups that found nothing.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            CoreError::BookNotFound(_)
                | CoreError::TransactionNotFound(_)
                | CoreError::CertificateNotFound(_)
                | CoreError::AccountNotFound(_)
        )
    }
}

// =============================================================================
// Validation Error
// =============================================================================

/// Input validation errors.
///
/// These errors occur when caller input doesn't meet requirements.
/// The caller must correct and resubmit; nothing is retried automatically.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// A required field is missing or empty.
    #[error("{field} is required")]
    Required { field: String },

    /// Field value is too long.
    #[error("{field} must be at most {max} characters")]
    TooLong { field: String, max: usize },

    /// Numeric value is out of range.
    #[error("{field} must be between {min} and {max}")]
    OutOfRange { field: String, min: i64, max: i64 },

    /// Invalid format (e.g., malformed ISBN, invalid email).
    #[error("{field} has invalid format: {reason}")]
    InvalidFormat { field: String, reason: String },

    /// Value is not in allowed set.
    #[error("{field} must be one of: {allowed:?}")]
    NotAllowed { field: String, allowed: Vec<String> },

    /// Duplicate value (e.g., email already registered).
    #[error("{field} '{value}' already exists")]
    Duplicate { field: String, value: String },

    /// A per-user limit would be exceeded.
    #[error("{field} limit of {max} reached")]
    LimitReached { field: String, max: i64 },
}

impl ValidationError {
    /// Creates a `Required` error.
    pub fn required(field: impl Into<String>) -> Self {
        ValidationError::Required {
            field: field.into(),
        }
    }

    /// Creates an `InvalidFormat` error.
    pub fn invalid_format(field: impl Into<String>, reason: impl Into<String>) -> Self {
        ValidationError::InvalidFormat {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// Convenience type alias for Results with CoreError.
pub type CoreResult<T> = Result<T, CoreError>;

// =============================================================================
// Unit Tests
// =============================================================================
