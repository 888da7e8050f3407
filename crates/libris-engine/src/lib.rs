//! # libris-engine: Donation Library Lifecycle
//!
//! Services that move books and ledger entries through their lifecycle on
//! top of the `libris-db` catalog store.
//!
//! ## Architecture Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                           libris-engine                                 │
//! │                                                                         │
//! │  ┌──────────────────────────────────────────────────────────────────┐  │
//! │  │                        Library (facade)                          │  │
//! │  └──────┬──────────────┬───────────────┬──────────────┬────────────┘  │
//! │         ▼              ▼               ▼              ▼                 │
//! │  ┌────────────┐ ┌────────────┐ ┌──────────────┐ ┌────────────┐         │
//! │  │ Inventory  │ │  Lending   │ │ Certificate  │ │   Ledger   │         │
//! │  │            │ │            │ │   Issuer     │ │            │         │
//! │  │ donations  │ │ borrow /   │ │ one cert per │ │ histories  │         │
//! │  │ review     │ │ return     │ │ accepted     │ │ reports    │         │
//! │  │            │ │ issued     │ │ donation     │ │            │         │
//! │  └─────┬──────┘ └─────┬──────┘ └──────┬───────┘ └─────┬──────┘         │
//! │        │  BookEvent ──┼───────────────┘               │                 │
//! │        └──────────────┴───────────┬───────────────────┘                 │
//! │                                   ▼                                     │
//! │             RetryPolicy ──► versioned put (libris-db)                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Concurrency
//! Every mutation re-reads the book, applies the change in memory and writes
//! it back only if the stored version is unchanged. A lost race is retried
//! with exponential backoff (see [`retry`]); the caller sees
//! [`EngineError::ConcurrencyConflict`] only once attempts run out.
//!
//! ## Usage
//! ```rust,ignore
//! use libris_engine::{Library, LibraryConfig};
//!
//! let config = LibraryConfig::load_or_default(None);
//! let library = Library::open(&config).await?;
//!
//! let (book, _) = library.donate("978-0-441-17271-9", &meta, "donor-1", 2).await?;
//! let approval = library.approve(&book.id, "admin").await?;
//! let loan = library.borrow(&book.id, "reader-7").await?;
//! ```

pub mod certificate;
pub mod config;
pub mod error;
pub mod events;
pub mod inventory;
pub mod ledger;
pub mod lending;
pub mod library;
pub mod retry;

pub use certificate::{CertificateIssuer, Issuance};
pub use config::{LibraryConfig, RedonationPolicy};
pub use error::{ConfigError, EngineError, EngineResult, ErrorBody, ErrorCode};
pub use events::BookEvent;
pub use inventory::Inventory;
pub use ledger::Ledger;
pub use lending::Lending;
pub use library::{Approval, Confirmation, Library};
pub use retry::RetryPolicy;

pub use libris_core::{
    Account, AccountRole, Book, BookMeta, BookQuery, BookStatus, Certificate, DateRange,
    DonationOutcome, IssuedBook, NewAccount, Report, Transaction, TransactionKind,
    TransactionStatus,
};
