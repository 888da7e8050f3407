//! # Engine Error Type
//!
//! What callers of [`crate::Library`] see when an operation fails.
//!
//! ## Error Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Error Flow in Libris                                 │
//! │                                                                         │
//! │  ValidationError ──► CoreError ──────────────┐                         │
//! │                                              ▼                          │
//! │  DbError::VersionConflict ─────────► EngineError::ConcurrencyConflict  │
//! │  DbError::Busy / PoolExhausted ────► EngineError::Store (retryable)    │
//! │  DbError::* ───────────────────────► EngineError::Store                │
//! │                                              │                          │
//! │                               retry budget spent?                       │
//! │                                              │                          │
//! │        Store(busy) ──► StoreUnavailable      ▼                          │
//! │                                     code() + status()                   │
//! │                                                                         │
//! │  { "code": "NOT_AVAILABLE", "status": 409,                              │
//! │    "message": "Book b1 is not available (approved, 0 copies free)" }    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use serde::Serialize;
use thiserror::Error;

use libris_core::{CoreError, ValidationError};
use libris_db::DbError;

// =============================================================================
// Config Error
// =============================================================================

/// Configuration loading and validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the config file.
    #[error("Failed to read config: {0}")]
    Read(#[from] std::io::Error),

    /// Config file is not valid TOML for [`crate::LibraryConfig`].
    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// A value is out of range or inconsistent.
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

// =============================================================================
// Engine Error
// =============================================================================

/// Errors returned by engine operations.
#[derive(Debug, Error)]
pub enum EngineError {
    /// A lifecycle rule or input validation rejected the request.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// Another writer changed the record between our read and our write.
    ///
    /// ## When This Occurs
    /// - Retried internally; surfaced only once the retry budget is spent
    /// - Two first donations of one ISBN: the loser sees this, retries,
    ///   and increments the winner's record
    #[error("{entity} {id} was modified concurrently, please retry")]
    ConcurrencyConflict { entity: String, id: String },

    /// The store stayed busy or unreachable for the whole retry budget.
    #[error("Catalog store unavailable: {0}")]
    StoreUnavailable(String),

    /// Any other store failure.
    #[error("Catalog store error: {0}")]
    Store(DbError),

    /// Configuration could not be loaded.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl From<DbError> for EngineError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::VersionConflict { entity, id, .. } => {
                EngineError::ConcurrencyConflict { entity, id }
            }
            DbError::LimitExceeded { field, max, .. } => {
                EngineError::Core(CoreError::Validation(ValidationError::LimitReached { field, max }))
            }
            DbError::ConnectionFailed(reason) => {
                tracing::error!("Catalog store connection failed: {}", reason);
                EngineError::StoreUnavailable(reason)
            }
            DbError::QueryFailed(ref reason) | DbError::Internal(ref reason) => {
                tracing::error!("Catalog store query failed: {}", reason);
                EngineError::Store(err)
            }
            DbError::Corrupt { ref entity, ref id, ref reason } => {
                tracing::error!(entity = %entity, id = %id, "Corrupt record: {}", reason);
                EngineError::Store(err)
            }
            other => EngineError::Store(other),
        }
    }
}

impl From<ValidationError> for EngineError {
    fn from(err: ValidationError) -> Self {
        EngineError::Core(CoreError::Validation(err))
    }
}

impl EngineError {
    /// Returns true when re-running the operation may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            EngineError::ConcurrencyConflict { .. } => true,
            EngineError::Store(db) => db.is_transient(),
            _ => false,
        }
    }

    /// Returns true when the failure means "the desired end-state already holds".
    pub fn is_already_satisfied(&self) -> bool {
        matches!(self, EngineError::Core(core) if core.is_already_satisfied())
    }

    /// Converts a transient store fault into [`EngineError::StoreUnavailable`]
    /// once the caller has given up retrying.
    pub(crate) fn exhausted(self) -> Self {
        match self {
            EngineError::Store(db) if db.is_transient() => {
                tracing::error!("Catalog store still busy after retries: {}", db);
                EngineError::StoreUnavailable(db.to_string())
            }
            other => other,
        }
    }

    /// Machine-readable code for the caller.
    pub fn code(&self) -> ErrorCode {
        match self {
            EngineError::Core(core) => match core {
                CoreError::BookNotFound(_)
                | CoreError::TransactionNotFound(_)
                | CoreError::CertificateNotFound(_)
                | CoreError::AccountNotFound(_) => ErrorCode::NotFound,
                CoreError::NotAvailable { .. } => ErrorCode::NotAvailable,
                CoreError::DuplicateLoan { .. } => ErrorCode::DuplicateLoan,
                CoreError::NoActiveLoan { .. } => ErrorCode::NoActiveLoan,
                CoreError::InvalidState { .. } | CoreError::WrongTransactionKind { .. } => {
                    ErrorCode::InvalidState
                }
                CoreError::DuplicateCertificate { .. } => ErrorCode::DuplicateCertificate,
                CoreError::Validation(_) => ErrorCode::ValidationError,
            },
            EngineError::ConcurrencyConflict { .. } => ErrorCode::ConcurrencyConflict,
            EngineError::StoreUnavailable(_) => ErrorCode::StoreUnavailable,
            EngineError::Store(db) => match db {
                DbError::NotFound { .. } => ErrorCode::NotFound,
                DbError::UniqueViolation { .. } => ErrorCode::ValidationError,
                DbError::Busy(_) | DbError::PoolExhausted => ErrorCode::StoreUnavailable,
                _ => ErrorCode::DatabaseError,
            },
            EngineError::Config(_) => ErrorCode::ConfigError,
        }
    }

    /// HTTP-style status class for the code.
    pub fn status(&self) -> u16 {
        self.code().status()
    }

    /// Serializable body for a transport layer.
    pub fn to_body(&self) -> ErrorBody {
        ErrorBody {
            code: self.code(),
            status: self.status(),
            message: self.to_string(),
        }
    }
}

// =============================================================================
// Error Codes
// =============================================================================

/// Error codes for API responses.
///
/// ```typescript
/// switch (e.code) {
///   case 'NOT_AVAILABLE':        showNotification('No copies left'); break;
///   case 'CONCURRENCY_CONFLICT': retry(); break;
/// }
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Input validation failed (400)
    ValidationError,

    /// Book, transaction, certificate or account missing (404)
    NotFound,

    /// Book not approved or no copies free (409)
    NotAvailable,

    /// Borrower already holds this book (409)
    DuplicateLoan,

    /// Return without an active loan (422)
    NoActiveLoan,

    /// Operation not valid in the current state (422)
    InvalidState,

    /// Certificate already issued (409)
    DuplicateCertificate,

    /// Lost an optimistic-versioning race; safe to retry (409)
    ConcurrencyConflict,

    /// Store busy or unreachable (503)
    StoreUnavailable,

    /// Unexpected store failure (500)
    DatabaseError,

    /// Configuration could not be loaded (500)
    ConfigError,
}

impl ErrorCode {
    /// HTTP-style status class.
    pub const fn status(self) -> u16 {
        match self {
            ErrorCode::ValidationError => 400,
            ErrorCode::NotFound => 404,
            ErrorCode::NotAvailable
            | ErrorCode::DuplicateLoan
            | ErrorCode::DuplicateCertificate
            | ErrorCode::ConcurrencyConflict => 409,
            ErrorCode::NoActiveLoan | ErrorCode::InvalidState => 422,
            ErrorCode::StoreUnavailable => 503,
            ErrorCode::DatabaseError | ErrorCode::ConfigError => 500,
        }
    }
}

/// What a transport layer sends back on failure.
///
/// ```json
/// { "code": "NO_ACTIVE_LOAN", "status": 422, "message": "User u1 has no active loan of book b1" }
/// ```
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    pub code: ErrorCode,
    pub status: u16,
    pub message: String,
}

/// Convenience type alias for Results with EngineError.
pub type EngineResult<T> = Result<T, EngineError>;

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use libris_core::BookStatus;

    #[test]
    fn test_loan_cap_in_store_is_a_validation_error() {
        let err: EngineError = DbError::LimitExceeded {
            field: "activeLoans".into(),
            user_id: "u1".into(),
            max: 2,
        }
        .into();
        assert!(matches!(
            err,
            EngineError::Core(CoreError::Validation(ValidationError::LimitReached { max: 2, .. }))
        ));
        assert!(!err.is_retryable());
        assert_eq!(err.status(), 400);
    }

    #[test]
    fn test_version_conflict_becomes_retryable_conflict() {
        let err: EngineError = DbError::conflict("Book", "b1", 3).into();
        assert!(matches!(err, EngineError::ConcurrencyConflict { .. }));
        assert!(err.is_retryable());
        assert_eq!(err.status(), 409);
    }

    #[test]
    fn test_busy_store_is_retryable_then_unavailable() {
        let err: EngineError = DbError::Busy("database is locked".into()).into();
        assert!(err.is_retryable());

        let err = err.exhausted();
        assert!(matches!(err, EngineError::StoreUnavailable(_)));
        assert!(!err.is_retryable());
        assert_eq!(err.code(), ErrorCode::StoreUnavailable);
        assert_eq!(err.status(), 503);
    }

    #[test]
    fn test_lifecycle_errors_are_not_retryable() {
        let err: EngineError = CoreError::NotAvailable {
            book_id: "b1".into(),
            status: BookStatus::Approved,
            available: 0,
        }
        .into();
        assert!(!err.is_retryable());
        assert_eq!(err.code(), ErrorCode::NotAvailable);
        assert_eq!(err.status(), 409);

        let err: EngineError = CoreError::book_state("b1", BookStatus::Rejected, "approve").into();
        assert_eq!(err.status(), 422);

        let err: EngineError = ValidationError::required("isbn").into();
        assert_eq!(err.code(), ErrorCode::ValidationError);
        assert_eq!(err.status(), 400);
    }

    #[test]
    fn test_duplicate_certificate_is_already_satisfied() {
        let err: EngineError = CoreError::DuplicateCertificate {
            transaction_id: "tx-1".into(),
        }
        .into();
        assert!(err.is_already_satisfied());
        assert_eq!(err.status(), 409);
        assert!(!EngineError::StoreUnavailable("x".into()).is_already_satisfied());
    }

    #[test]
    fn test_error_body_serialization() {
        let err: EngineError = CoreError::NoActiveLoan {
            book_id: "b1".into(),
            user_id: "u1".into(),
        }
        .into();

        let json = serde_json::to_value(err.to_body()).unwrap();
        assert_eq!(json["code"], "NO_ACTIVE_LOAN");
        assert_eq!(json["status"], 422);
        assert_eq!(json["message"], "User u1 has no active loan of book b1");
    }
}
