//! # Database Error Types
//!
//! Error types for catalog store operations.
//!
//! ## Error Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Error Propagation                                    │
//! │                                                                         │
//! │  SQLite Error (sqlx::Error)                                            │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  DbError (this module) ← Adds context and categorization               │
//! │       │                                                                 │
//! │       ├── VersionConflict / Busy / PoolExhausted ──► engine retries    │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  EngineError (libris-engine) ← code + status class for the caller      │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;

/// Catalog store errors.
///
/// These wrap sqlx errors and add the context the engine needs to decide
/// between retrying, translating, and surfacing.
#[derive(Debug, Error)]
pub enum DbError {
    /// Entity not found in database.
    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    /// Unique constraint violation.
    ///
    /// ## When This Occurs
    /// - Two first donations of one ISBN race; the second insert loses
    /// - A certificate already exists for the donation
    /// - Email or user id already registered
    /// - A second active borrowing for the same (user, book)
    #[error("Duplicate {field}: '{value}' already exists")]
    UniqueViolation { field: String, value: String },

    /// A per-user cap checked inside a write was exceeded; the write is
    /// rolled back.
    #[error("{field} limit of {max} exceeded by {user_id}")]
    LimitExceeded {
        field: String,
        user_id: String,
        max: i64,
    },

    /// Foreign key constraint violation.
    #[error("Foreign key violation: {message}")]
    ForeignKeyViolation { message: String },

    /// Versioned put lost the race: the stored version moved on.
    ///
    /// ## When This Occurs
    /// ```text
    /// Request A: read book (v3) ─────────────── UPDATE ... WHERE version=3 ✓ (v4)
    /// Request B: read book (v3) ───── UPDATE ... WHERE version=3 ✗ 0 rows
    ///                                             │
    ///                                             ▼
    ///                                   VersionConflict { expected: 3 }
    /// ```
    #[error("{entity} {id} changed concurrently (expected version {expected})")]
    VersionConflict {
        entity: String,
        id: String,
        expected: i64,
    },

    /// SQLite reported the database busy or locked.
    #[error("Database busy: {0}")]
    Busy(String),

    /// A stored column could not be decoded.
    #[error("Corrupt {entity} {id}: {reason}")]
    Corrupt {
        entity: String,
        id: String,
        reason: String,
    },

    /// Database connection failed.
    ///
    /// ## When This Occurs
    /// - Database file doesn't exist and can't be created
    /// - File permissions issue
    /// - Disk full
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Migration failed.
    #[error("Migration failed: {0}")]
    MigrationFailed(String),

    /// Query execution failed.
    #[error("Query failed: {0}")]
    QueryFailed(String),

    /// Pool exhausted (all connections in use).
    #[error("Connection pool exhausted")]
    PoolExhausted,

    /// Internal database error.
    #[error("Internal database error: {0}")]
    Internal(String),
}

impl DbError {
    /// Creates a NotFound error for a given entity type and ID.
    pub fn not_found(entity: impl Into<String>, id: impl Into<String>) -> Self {
        DbError::NotFound {
            entity: entity.into(),
            id: id.into(),
        }
    }

    /// Creates a UniqueViolation error.
    pub fn duplicate(field: impl Into<String>, value: impl Into<String>) -> Self {
        DbError::UniqueViolation {
            field: field.into(),
            value: value.into(),
        }
    }

    /// Creates a VersionConflict error.
    pub fn conflict(entity: impl Into<String>, id: impl Into<String>, expected: i64) -> Self {
        DbError::VersionConflict {
            entity: entity.into(),
            id: id.into(),
            expected,
        }
    }

    /// Returns true for faults that may clear up on their own
    /// (lock contention, pool timeout).
    pub fn is_transient(&self) -> bool {
        matches!(self, DbError::Busy(_) | DbError::PoolExhausted)
    }

    /// Returns true if this is a unique violation on `column`
    /// (e.g. `"books.isbn"`).
    pub fn is_unique_violation_on(&self, column: &str) -> bool {
        match self {
            DbError::UniqueViolation { field, .. } => field.contains(column),
            _ => false,
        }
    }

    /// Attaches the offending value to a UniqueViolation parsed from SQLite.
    pub fn with_value(self, value: impl Into<String>) -> Self {
        match self {
            DbError::UniqueViolation { field, .. } => DbError::UniqueViolation {
                field,
                value: value.into(),
            },
            other => other,
        }
    }
}

/// Convert sqlx errors to DbError.
///
/// ## Error Mapping
/// ```text
/// sqlx::Error::RowNotFound    → DbError::NotFound
/// sqlx::Error::Database       → Analyze message for constraint / lock type
/// sqlx::Error::PoolTimedOut   → DbError::PoolExhausted
/// Other                       → DbError::Internal
/// ```
impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => DbError::NotFound {
                entity: "Record".to_string(),
                id: "unknown".to_string(),
            },

            sqlx::Error::Database(db_err) => {
                let msg = db_err.message();

                // UNIQUE constraint: "UNIQUE constraint failed: <table>.<column>[, ...]"
                // FK constraint: "FOREIGN KEY constraint failed"
                // SQLITE_BUSY / SQLITE_LOCKED: "database is locked", "database table is locked"
                if msg.contains("UNIQUE constraint failed") {
                    let field = msg
                        .split("UNIQUE constraint failed: ")
                        .nth(1)
                        .unwrap_or("unknown")
                        .to_string();
                    DbError::UniqueViolation {
                        field,
                        value: "unknown".to_string(),
                    }
                } else if msg.contains("FOREIGN KEY constraint failed") {
                    DbError::ForeignKeyViolation {
                        message: msg.to_string(),
                    }
                } else if msg.contains("is locked") || msg.contains("is busy") {
                    DbError::Busy(msg.to_string())
                } else {
                    DbError::QueryFailed(msg.to_string())
                }
            }

            sqlx::Error::PoolTimedOut => DbError::PoolExhausted,

            sqlx::Error::PoolClosed => DbError::ConnectionFailed("Pool is closed".to_string()),

            _ => DbError::Internal(err.to_string()),
        }
    }
}

impl From<sqlx::migrate::MigrateError> for DbError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        DbError::MigrationFailed(err.to_string())
    }
}

/// Result type for database operations.
pub type DbResult<T> = Result<T, DbError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(DbError::Busy("database is locked".into()).is_transient());
        assert!(DbError::PoolExhausted.is_transient());
        assert!(!DbError::conflict("Book", "b1", 3).is_transient());
        assert!(!DbError::not_found("Book", "b1").is_transient());
    }

    #[test]
    fn test_unique_violation_matching() {
        let err = DbError::duplicate("books.isbn", "unknown").with_value("978-0-1");
        assert!(err.is_unique_violation_on("books.isbn"));
        assert!(!err.is_unique_violation_on("certificates.transaction_id"));
        assert_eq!(err.to_string(), "Duplicate books.isbn: '978-0-1' already exists");
    }
}
