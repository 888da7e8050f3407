//! # libris-db: Catalog Store for Libris
//!
//! SQLite storage for books, the transaction ledger, certificates, and
//! accounts, through `sqlx`.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Libris Data Flow                                 │
//! │                                                                         │
//! │  libris-engine (borrow / approve / donate ...)                          │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                     libris-db (THIS CRATE)                      │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────────┐    ┌────────────────┐    ┌──────────────┐  │   │
//! │  │   │   Database    │    │  Repositories  │    │  Migrations  │  │   │
//! │  │   │   (pool.rs)   │    │                │    │  (embedded)  │  │   │
//! │  │   │               │    │ BookRepo       │    │              │  │   │
//! │  │   │ SqlitePool    │◄───│ TransactionRepo│    │ 001_init.sql │  │   │
//! │  │   │ find_unique   │    │ CertificateRepo│    │              │  │   │
//! │  │   │               │    │ AccountRepo    │    │              │  │   │
//! │  │   └───────────────┘    └────────────────┘    └──────────────┘  │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                     SQLite Database (WAL)                       │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`pool`] - Connection pool creation and configuration
//! - [`migrations`] - Embedded database migrations
//! - [`error`] - Database error types
//! - [`repository`] - Book, ledger, certificate, and account repositories
//!
//! ## Usage
//!
//! ```rust,ignore
//! use libris_db::{Database, DbConfig};
//!
//! let db = Database::new(DbConfig::new("libris.db")).await?;
//! let book = db.books().find_by_isbn("978-0-1").await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod migrations;
pub mod pool;
pub mod repository;

// =============================================================================
// Re-exports
// =============================================================================

pub use error::{DbError, DbResult};
pub use pool::{Database, DbConfig};

pub use repository::account::AccountRepository;
pub use repository::book::BookRepository;
pub use repository::certificate::CertificateRepository;
pub use repository::transaction::{LedgerFilter, LedgerRow, LedgerWrite, TransactionRepository};
pub use repository::{generate_id, Cursor, UniqueKey};
