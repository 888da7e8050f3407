//! # Library Facade
//!
//! The one handle callers hold. Wires the services to a shared catalog
//! store and forwards review events to the certificate issuer.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                           Library                                       │
//! │                                                                         │
//! │  donate / approve / reject ─────► Inventory ───┐                        │
//! │  confirm / decline                     │       │ BookEvent              │
//! │                                        │       ├──► CertificateIssuer   │
//! │  borrow / return / issued_books ─► Lending     └──► subscribers         │
//! │                                        │                                │
//! │  history / reports ──────────────► Ledger                               │
//! │                                        │                                │
//! │                                        ▼                                │
//! │                                  Database (libris-db)                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::Utc;
use futures_util::stream::Stream;
use tokio::sync::broadcast;
use tracing::{debug, info};

use libris_core::validation::{validate_new_account, validate_ref};
use libris_core::{
    Account, Book, BookMeta, BookQuery, Certificate, CoreError, DateRange, IssuedBook, NewAccount,
    Report, Transaction, ValidationError,
};
use libris_db::{generate_id, Database, DbError, UniqueKey};

use crate::certificate::CertificateIssuer;
use crate::config::LibraryConfig;
use crate::error::{EngineError, EngineResult};
use crate::events::BookEvent;
use crate::inventory::Inventory;
use crate::ledger::Ledger;
use crate::lending::Lending;
use crate::retry::RetryPolicy;

/// Book events buffered per subscriber before the slowest one lags.
const EVENT_CAPACITY: usize = 256;

/// Result of approving a book.
#[derive(Debug, Clone)]
pub struct Approval {
    pub book: Book,
    /// Certificates issued for the donations the approval completed.
    pub certificates: Vec<Certificate>,
    /// Completed donations still missing a certificate (store trouble);
    /// pass each to [`Library::issue_certificate`].
    pub uncertified: Vec<String>,
}

/// Result of confirming one donation on an approved book.
#[derive(Debug, Clone)]
pub struct Confirmation {
    pub book: Book,
    pub transaction: Transaction,
    /// `None` if issuance failed; re-run [`Library::issue_certificate`].
    pub certificate: Option<Certificate>,
}

/// Donation library lifecycle engine.
#[derive(Debug, Clone)]
pub struct Library {
    db: Database,
    inventory: Inventory,
    lending: Lending,
    certificates: CertificateIssuer,
    ledger: Ledger,
    events: broadcast::Sender<BookEvent>,
}

impl Library {
    /// Opens the catalog store named in `config` and builds the engine.
    pub async fn open(config: &LibraryConfig) -> EngineResult<Self> {
        config.validate()?;
        let db = Database::new(config.db_config()).await?;
        info!(path = ?config.database.path, "Library opened");
        Ok(Self::with_database(db, config))
    }

    /// Builds the engine on an already opened store.
    pub fn with_database(db: Database, config: &LibraryConfig) -> Self {
        let retry = RetryPolicy::from(&config.retry);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        Library {
            inventory: Inventory::new(db.clone(), retry.clone(), config.inventory.redonation_policy),
            lending: Lending::new(db.clone(), retry.clone(), config.lending.max_active_loans_per_user),
            certificates: CertificateIssuer::new(db.clone(), retry, config.certificates.base_url.clone()),
            ledger: Ledger::new(db.clone()),
            db,
            events,
        }
    }

    /// Receives every committed review decision from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<BookEvent> {
        self.events.subscribe()
    }

    /// The underlying catalog store.
    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Closes the store's connection pool.
    pub async fn close(&self) {
        self.db.close().await;
    }

    fn publish(&self, event: BookEvent) {
        if self.events.send(event).is_err() {
            debug!("No book event subscribers");
        }
    }

    // =========================================================================
    // Inventory
    // =========================================================================

    /// Records a donation. See [`Inventory::submit_donation`].
    pub async fn donate(
        &self,
        isbn: &str,
        meta: &BookMeta,
        donor_id: &str,
        copies: i64,
    ) -> EngineResult<(Book, Transaction)> {
        self.inventory.submit_donation(isbn, meta, donor_id, copies).await
    }

    /// Approves a pending book and certifies every donation it completed.
    pub async fn approve(&self, book_id: &str, admin_id: &str) -> EngineResult<Approval> {
        let (book, event) = self.inventory.approve_book(book_id, admin_id).await?;
        let issuance = self.certificates.handle(&event).await;
        self.publish(event);

        Ok(Approval {
            book,
            certificates: issuance.issued,
            uncertified: issuance.uncertified,
        })
    }

    /// Rejects a pending book. No certificates.
    pub async fn reject(&self, book_id: &str, admin_id: &str) -> EngineResult<Book> {
        let (book, event) = self.inventory.reject_book(book_id, admin_id).await?;
        self.publish(event);
        Ok(book)
    }

    /// Confirms the copies of a donation to an approved book and certifies it.
    pub async fn confirm_donation(
        &self,
        transaction_id: &str,
        admin_id: &str,
    ) -> EngineResult<Confirmation> {
        let (book, transaction, event) =
            self.inventory.confirm_donation(transaction_id, admin_id).await?;
        let certificate = self.certificates.handle(&event).await.issued.into_iter().next();
        self.publish(event);

        Ok(Confirmation {
            book,
            transaction,
            certificate,
        })
    }

    /// Declines the copies of a donation to an approved book.
    pub async fn decline_donation(
        &self,
        transaction_id: &str,
        admin_id: &str,
    ) -> EngineResult<(Book, Transaction)> {
        let (book, transaction, event) =
            self.inventory.decline_donation(transaction_id, admin_id).await?;
        self.publish(event);
        Ok((book, transaction))
    }

    pub async fn book(&self, book_id: &str) -> EngineResult<Book> {
        self.inventory.get_book(book_id).await
    }

    pub async fn books(&self, query: &BookQuery) -> EngineResult<Vec<Book>> {
        self.inventory.list_books(query).await
    }

    // =========================================================================
    // Lending
    // =========================================================================

    pub async fn borrow(&self, book_id: &str, user_id: &str) -> EngineResult<Transaction> {
        self.lending.borrow(book_id, user_id).await
    }

    pub async fn return_book(&self, book_id: &str, user_id: &str) -> EngineResult<Transaction> {
        self.lending.return_book(book_id, user_id).await
    }

    /// Copies currently out, optionally only those of `user_id`.
    pub fn issued_books(
        &self,
        user_id: Option<&str>,
    ) -> impl Stream<Item = EngineResult<IssuedBook>> + Send + 'static {
        self.lending.issued_books(user_id)
    }

    // =========================================================================
    // Ledger
    // =========================================================================

    pub async fn transaction(&self, id: &str) -> EngineResult<Transaction> {
        self.ledger.get_transaction(id).await
    }

    pub fn transactions(&self) -> impl Stream<Item = EngineResult<Transaction>> + Send + 'static {
        self.ledger.all_transactions()
    }

    pub fn user_history(
        &self,
        user_id: &str,
    ) -> impl Stream<Item = EngineResult<Transaction>> + Send + 'static {
        self.ledger.user_history(user_id)
    }

    pub fn book_history(
        &self,
        book_id: &str,
    ) -> impl Stream<Item = EngineResult<Transaction>> + Send + 'static {
        self.ledger.book_history(book_id)
    }

    /// Donation and borrowing totals for `range`.
    pub async fn reports(&self, range: DateRange) -> EngineResult<Report> {
        self.ledger.generate_report(range).await
    }

    // =========================================================================
    // Certificates
    // =========================================================================

    pub async fn issue_certificate(&self, transaction_id: &str) -> EngineResult<Certificate> {
        self.certificates.issue_certificate(transaction_id).await
    }

    pub async fn certificate(&self, id: &str) -> EngineResult<Certificate> {
        self.certificates.get_certificate(id).await
    }

    pub async fn certificates(&self, limit: u32) -> EngineResult<Vec<Certificate>> {
        self.certificates.list_certificates(limit).await
    }

    pub async fn user_certificates(&self, user_id: &str) -> EngineResult<Vec<Certificate>> {
        self.certificates.certificates_for_user(user_id).await
    }

    // =========================================================================
    // Accounts
    // =========================================================================

    /// Registers an account. `user_id` and `email` must be unused.
    pub async fn register_account(&self, input: &NewAccount) -> EngineResult<Account> {
        let input = validate_new_account(input)?;

        if self.db.find_unique(UniqueKey::UserId, &input.user_id).await?.is_some() {
            return Err(duplicate("userId", &input.user_id).into());
        }
        if self.db.find_unique(UniqueKey::Email, &input.email).await?.is_some() {
            return Err(duplicate("email", &input.email).into());
        }

        let account = Account {
            id: generate_id(),
            user_id: input.user_id,
            username: input.username,
            email: input.email,
            role: input.role,
            created_at: Utc::now(),
        };

        // A concurrent registration can still win between the check and the insert.
        self.db.accounts().insert(&account).await.map_err(|e| -> EngineError {
            match e {
                DbError::UniqueViolation { field, value } if field.contains("email") => {
                    duplicate("email", &value).into()
                }
                DbError::UniqueViolation { value, .. } => duplicate("userId", &value).into(),
                other => other.into(),
            }
        })?;

        info!(user_id = %account.user_id, role = ?account.role, "Account registered");
        Ok(account)
    }

    /// Looks an account up by its login handle.
    pub async fn account(&self, user_id: &str) -> EngineResult<Account> {
        validate_ref("userId", user_id)?;
        self.db
            .accounts()
            .get_by_user_id(user_id)
            .await?
            .ok_or_else(|| CoreError::AccountNotFound(user_id.to_string()).into())
    }
}

fn duplicate(field: &str, value: &str) -> ValidationError {
    ValidationError::Duplicate {
        field: field.to_string(),
        value: value.to_string(),
    }
}
