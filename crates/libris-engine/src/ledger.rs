//! # Transaction Ledger
//!
//! Read models over donation and borrowing history, plus reports.
//!
//! Histories are lazy streams: each page is fetched only when the consumer
//! reaches it, keyed on the last `(date, id)` seen, so a consumer that stops
//! early never loads the rest and a stream can be restarted from any point.
//!
//! ```text
//! page(after = None)      ──► [t1 t2 ... t50]   cursor = (t50.date, t50.id)
//! page(after = cursor)    ──► [t51 ... t73]     short page → done
//! ```

use std::future::Future;

use futures_util::stream::{self, Stream, TryStreamExt};
use tracing::debug;

use libris_core::validation::validate_ref;
use libris_core::{DateRange, Report, ReportBuilder, Transaction, DEFAULT_PAGE_SIZE};
use libris_db::{Cursor, Database, LedgerFilter};

use crate::error::{EngineError, EngineResult};
use crate::inventory::load_transaction;

// =============================================================================
// Paging
// =============================================================================

/// Flattens a keyset-paged source into one stream of items.
///
/// `fetch(after)` returns one page plus the cursor to continue from, or
/// `None` when that page was the last.
pub(crate) fn paged<C, T, F, Fut>(fetch: F) -> impl Stream<Item = EngineResult<T>> + Send
where
    C: Send + 'static,
    T: Send + 'static,
    F: FnMut(Option<C>) -> Fut + Send + 'static,
    Fut: Future<Output = EngineResult<(Vec<T>, Option<C>)>> + Send,
{
    // None = exhausted, Some(None) = first page, Some(Some(c)) = after c.
    let start: Option<Option<C>> = Some(None);

    stream::try_unfold((fetch, start), |(mut fetch, state)| async move {
        let Some(after) = state else {
            return Ok::<_, EngineError>(None);
        };

        let (items, next) = fetch(after).await?;
        let page = stream::iter(items.into_iter().map(Ok::<T, EngineError>));
        Ok(Some((page, (fetch, next.map(Some)))))
    })
    .try_flatten()
}

/// Cursor to resume after `page`, or `None` if it was the last page.
pub(crate) fn next_cursor<T, C>(page: &[T], limit: u32, key: impl Fn(&T) -> C) -> Option<C> {
    if page.len() < limit as usize {
        return None;
    }
    page.last().map(key)
}

fn transaction_cursor(tx: &Transaction) -> Cursor {
    (tx.date, tx.id.clone())
}

// =============================================================================
// Ledger
// =============================================================================

/// Ledger read models.
#[derive(Debug, Clone)]
pub struct Ledger {
    db: Database,
    page_size: u32,
}

impl Ledger {
    pub fn new(db: Database) -> Self {
        Ledger {
            db,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    /// Overrides how many rows each store round-trip fetches.
    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Gets one ledger entry.
    pub async fn get_transaction(&self, id: &str) -> EngineResult<Transaction> {
        validate_ref("transactionId", id)?;
        load_transaction(&self.db, id).await
    }

    /// Every entry involving `user_id`, oldest first.
    pub fn user_history(
        &self,
        user_id: &str,
    ) -> impl Stream<Item = EngineResult<Transaction>> + Send + 'static {
        self.history(LedgerFilter::User(user_id.to_string()))
    }

    /// Every entry for `book_id`, oldest first.
    pub fn book_history(
        &self,
        book_id: &str,
    ) -> impl Stream<Item = EngineResult<Transaction>> + Send + 'static {
        self.history(LedgerFilter::Book(book_id.to_string()))
    }

    /// The whole ledger, oldest first.
    pub fn all_transactions(&self) -> impl Stream<Item = EngineResult<Transaction>> + Send + 'static {
        self.history(LedgerFilter::All)
    }

    fn history(
        &self,
        filter: LedgerFilter,
    ) -> impl Stream<Item = EngineResult<Transaction>> + Send + 'static {
        let repo = self.db.transactions();
        let limit = self.page_size;

        paged(move |after: Option<Cursor>| {
            let repo = repo.clone();
            let filter = filter.clone();
            async move {
                let page = repo.page(&filter, after.as_ref(), limit).await?;
                let next = next_cursor(&page, limit, transaction_cursor);
                Ok::<_, EngineError>((page, next))
            }
        })
    }

    /// Aggregates donations and borrowings dated inside `range`.
    pub async fn generate_report(&self, range: DateRange) -> EngineResult<Report> {
        let repo = self.db.transactions();
        let limit = self.page_size;

        let rows = paged(move |after: Option<Cursor>| {
            let repo = repo.clone();
            async move {
                let page = repo.page_in_range(&range, after.as_ref(), limit).await?;
                let next = next_cursor(&page, limit, |row| transaction_cursor(&row.transaction));
                Ok::<_, EngineError>((page, next))
            }
        });

        let report = rows
            .try_fold(ReportBuilder::new(range), |mut builder, row| async move {
                builder.add(&row.transaction, &row.genre);
                Ok::<_, EngineError>(builder)
            })
            .await?
            .finish();

        debug!(
            from = %range.from,
            to = %range.to,
            donations = report.donations.transactions,
            borrowings = report.borrowings.transactions,
            "Report generated"
        );
        Ok(report)
    }
}
