//! # libris-core: Pure Lifecycle Rules for Libris
//!
//! Everything that decides *whether* a donation, approval, loan, or return is
//! allowed lives here as plain functions over plain data. Storage and retries
//! live in the crates above.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Libris Architecture                              │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │            HTTP layer / clients (outside this workspace)        │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │ verified user / admin ids              │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │                 libris-engine (Library facade)                  │   │
//! │  │   inventory • lending • certificate • ledger • retry            │   │
//! │  └──────────────┬──────────────────────────────┬───────────────────┘   │
//! │                 │ rules                        │ versioned writes       │
//! │  ┌──────────────▼──────────────────┐  ┌────────▼──────────────────┐   │
//! │  │   ★ libris-core (THIS CRATE) ★  │  │   libris-db (SQLite)      │   │
//! │  │  types • lifecycle • validation │  │  books • transactions     │   │
//! │  │  report • error                 │  │  certificates • accounts  │   │
//! │  │  NO I/O • NO CLOCK              │  └───────────────────────────┘   │
//! │  └─────────────────────────────────┘                                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`types`] - Book, Transaction, Certificate, Account and their states
//! - [`lifecycle`] - State transitions and copy-count bookkeeping
//! - [`validation`] - Input checks for donations and accounts
//! - [`report`] - Ledger aggregation
//! - [`error`] - Domain error types
//!
//! ## Example Usage
//!
//! ```rust
//! use chrono::Utc;
//! use libris_core::lifecycle::new_book;
//! use libris_core::{BookMeta, BookStatus};
//!
//! let meta = BookMeta {
//!     title: "Dune".into(),
//!     author: "Frank Herbert".into(),
//!     genre: "Science Fiction".into(),
//!     ..Default::default()
//! };
//!
//! let mut book = new_book("b1".into(), "978-0-1".into(), meta, "donor", 2, Utc::now());
//! assert_eq!(book.borrowable_copies(), 0);
//!
//! book.approve("admin", Utc::now()).unwrap();
//! book.lend_to("reader", Utc::now()).unwrap();
//! assert_eq!(book.status, BookStatus::Approved);
//! assert_eq!(book.available_copies, 1);
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod lifecycle;
pub mod report;
pub mod types;
pub mod validation;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use error::{CoreError, CoreResult, ValidationError};
pub use report::{KindSummary, Report, ReportBuilder};
pub use types::*;

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Largest number of copies one donation may carry.
///
/// ## Business Reason
/// Catches typos (1000 for 10) before they inflate the catalog.
pub const MAX_DONATION_COPIES: i64 = 100;

/// Maximum length of title, author, genre, and username.
pub const MAX_TEXT_FIELD_LEN: usize = 200;

/// Rows per page for catalog listings and ledger streams.
pub const DEFAULT_PAGE_SIZE: u32 = 50;
