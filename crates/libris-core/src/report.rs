//! # Ledger Reports
//!
//! Aggregates ledger entries over a time window into donation and borrowing
//! summaries. The engine streams the entries in and calls [`ReportBuilder::finish`];
//! nothing here touches the store.
//!
//! Every map is a `BTreeMap`, so two reports over the same ledger serialize
//! identically.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::types::{DateRange, Transaction, TransactionKind, TransactionStatus};

/// Totals for one transaction kind.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct KindSummary {
    /// Number of ledger entries.
    pub transactions: u64,
    /// Copies moved (donation sizes, or one per borrowing).
    pub copies: i64,
    pub by_status: BTreeMap<TransactionStatus, u64>,
    /// Entry counts keyed by the book's genre.
    pub by_genre: BTreeMap<String, u64>,
}

impl KindSummary {
    fn record(&mut self, tx: &Transaction, genre: &str) {
        self.transactions += 1;
        self.copies += tx.copies;
        *self.by_status.entry(tx.status).or_insert(0) += 1;
        *self.by_genre.entry(genre.to_string()).or_insert(0) += 1;
    }
}

/// Donations vs borrowings within `range`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Report {
    pub range: DateRange,
    pub donations: KindSummary,
    pub borrowings: KindSummary,
    /// Distinct books touched by any entry in the window.
    pub distinct_books: u64,
    /// Distinct donors and borrowers in the window.
    pub distinct_users: u64,
}

/// Incremental report accumulator.
///
/// ```rust
/// use chrono::{Duration, Utc};
/// use libris_core::report::ReportBuilder;
/// use libris_core::DateRange;
///
/// let now = Utc::now();
/// let range = DateRange::new(now - Duration::days(7), now).unwrap();
/// let report = ReportBuilder::new(range).finish();
/// assert_eq!(report.donations.transactions, 0);
/// ```
#[derive(Debug)]
pub struct ReportBuilder {
    range: DateRange,
    donations: KindSummary,
    borrowings: KindSummary,
    books: BTreeSet<String>,
    users: BTreeSet<String>,
}

impl ReportBuilder {
    pub fn new(range: DateRange) -> Self {
        ReportBuilder {
            range,
            donations: KindSummary::default(),
            borrowings: KindSummary::default(),
            books: BTreeSet::new(),
            users: BTreeSet::new(),
        }
    }

    /// Counts `tx` if it falls inside the window. Returns whether it was counted.
    pub fn add(&mut self, tx: &Transaction, genre: &str) -> bool {
        if !self.range.contains(tx.date) {
            return false;
        }

        match tx.kind {
            TransactionKind::Donation => self.donations.record(tx, genre),
            TransactionKind::Borrowing => self.borrowings.record(tx, genre),
        }
        self.books.insert(tx.book_id.clone());
        self.users.insert(tx.user_id.clone());
        true
    }

    pub fn finish(self) -> Report {
        Report {
            range: self.range,
            donations: self.donations,
            borrowings: self.borrowings,
            distinct_books: self.books.len() as u64,
            distinct_users: self.users.len() as u64,
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
