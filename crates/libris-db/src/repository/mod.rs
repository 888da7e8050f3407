//! # Repository Module
//!
//! Catalog store repositories for Libris.
//!
//! ## Repository Pattern
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Repository Layout                                    │
//! │                                                                         │
//! │  libris-engine                                                         │
//! │       │                                                                 │
//! │       │  db.books().put_if_version(&book, v, &[LedgerWrite::...])      │
//! │       ▼                                                                 │
//! │  BookRepository ──────────── one versioned row per ISBN                │
//! │  ├── get_by_id / find_by_isbn / list                                   │
//! │  ├── insert_with_ledger       (first donation)                         │
//! │  └── put_if_version           (every later change)                     │
//! │       │                                                                 │
//! │       │  same SQLite transaction                                       │
//! │       ▼                                                                 │
//! │  TransactionRepository ───── ledger appends / completions + streams    │
//! │  CertificateRepository ───── unique on transaction_id                  │
//! │  AccountRepository ───────── unique on user_id, email                  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Queries use runtime-checked `sqlx::query_as` with `FromRow` row structs so
//! the crate builds without a live `DATABASE_URL`.

pub mod account;
pub mod book;
pub mod certificate;
pub mod transaction;

/// Business keys the store keeps unique.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UniqueKey {
    /// `books.isbn`
    Isbn,
    /// `accounts.email`
    Email,
    /// `accounts.user_id`
    UserId,
}

/// Keyset cursor for date-ordered streams: the `(date, id)` of the last row seen.
pub type Cursor = (chrono::DateTime<chrono::Utc>, String);

/// Generates a new entity ID.
pub fn generate_id() -> String {
    uuid::Uuid::new_v4().to_string()
}
