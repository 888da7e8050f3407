//! End-to-end lifecycle scenarios through the `Library` facade.

use chrono::{Duration, Utc};
use futures_util::TryStreamExt;

use libris_core::{CoreError, ValidationError};
use libris_db::{Database, DbConfig};
use libris_engine::{
    Book, BookEvent, BookMeta, BookQuery, BookStatus, CertificateIssuer, DateRange, EngineError,
    Inventory, IssuedBook, Library, LibraryConfig, NewAccount, RedonationPolicy, RetryPolicy,
    Transaction, TransactionKind, TransactionStatus,
};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("libris_engine=debug")
        .with_test_writer()
        .try_init();
}

async fn library() -> Library {
    init_tracing();
    Library::open(&LibraryConfig::in_memory()).await.unwrap()
}

async fn library_with(policy: RedonationPolicy) -> Library {
    init_tracing();
    let mut config = LibraryConfig::in_memory();
    config.inventory.redonation_policy = policy;
    Library::open(&config).await.unwrap()
}

fn dune() -> BookMeta {
    BookMeta {
        title: "Dune".into(),
        author: "Frank Herbert".into(),
        genre: "Science Fiction".into(),
        published_year: Some(1965),
        ..Default::default()
    }
}

fn assert_counters(book: &Book) {
    assert_eq!(book.counter_violation(), None, "broken counters: {book:?}");
    assert!(0 <= book.available_copies && book.available_copies <= book.total_copies);
}

async fn approved_book(library: &Library, copies: i64) -> Book {
    let (book, _) = library.donate("978-0-1", &dune(), "donor1", copies).await.unwrap();
    library.approve(&book.id, "admin").await.unwrap().book
}

// =============================================================================
// Scenarios
// =============================================================================

#[tokio::test]
async fn scenario_a_donate_then_approve_issues_certificate() {
    let library = library().await;

    let (book, donation) = library.donate("978-0-1", &dune(), "donor1", 2).await.unwrap();
    assert_eq!(book.status, BookStatus::Pending);
    assert_eq!(book.total_copies, 2);
    assert_eq!(book.available_copies, 0);
    assert_eq!(donation.status, TransactionStatus::Active);
    assert_counters(&book);

    let approval = library.approve(&book.id, "admin").await.unwrap();
    assert_eq!(approval.book.status, BookStatus::Approved);
    assert_eq!(approval.book.available_copies, 2);
    assert_eq!(approval.book.approved_by.as_deref(), Some("admin"));
    assert_counters(&approval.book);

    assert_eq!(approval.certificates.len(), 1);
    assert!(approval.uncertified.is_empty());
    let certificate = &approval.certificates[0];
    assert_eq!(certificate.user_id, "donor1");
    assert_eq!(certificate.transaction_id, donation.id);

    let completed = library.transaction(&donation.id).await.unwrap();
    assert_eq!(completed.status, TransactionStatus::Completed);
    assert_eq!(library.user_certificates("donor1").await.unwrap().len(), 1);
}

#[tokio::test]
async fn scenario_b_second_borrower_finds_no_copy() {
    let library = library().await;
    let book = approved_book(&library, 1).await;

    let loan = library.borrow(&book.id, "reader1").await.unwrap();
    assert_eq!(loan.kind, TransactionKind::Borrowing);
    assert_eq!(loan.status, TransactionStatus::Active);

    let after = library.book(&book.id).await.unwrap();
    assert_eq!(after.available_copies, 0);
    assert_eq!(after.active_loans().count(), 1);
    assert_counters(&after);

    let err = library.borrow(&book.id, "reader2").await.unwrap_err();
    assert!(matches!(err, EngineError::Core(CoreError::NotAvailable { .. })));
}

#[tokio::test]
async fn scenario_c_return_frees_the_copy() {
    let library = library().await;
    let book = approved_book(&library, 1).await;
    let loan = library.borrow(&book.id, "reader1").await.unwrap();

    let returned = library.return_book(&book.id, "reader1").await.unwrap();
    assert_eq!(returned.id, loan.id);
    assert_eq!(returned.status, TransactionStatus::Completed);
    assert!(returned.return_date.is_some());

    let after = library.book(&book.id).await.unwrap();
    assert_eq!(after.available_copies, 1);
    assert_eq!(after.total_copies, 1);
    assert_counters(&after);

    library.borrow(&book.id, "reader2").await.unwrap();
}

#[tokio::test]
async fn scenario_d_rejected_book_stays_rejected() {
    let library = library().await;
    let (book, _) = library.donate("978-0-1", &dune(), "donor1", 3).await.unwrap();

    let rejected = library.reject(&book.id, "admin").await.unwrap();
    assert_eq!(rejected.status, BookStatus::Rejected);
    assert_eq!(rejected.available_copies, 0);

    let err = library.approve(&book.id, "admin").await.unwrap_err();
    assert!(matches!(err, EngineError::Core(CoreError::InvalidState { .. })));

    let err = library.borrow(&book.id, "reader1").await.unwrap_err();
    assert!(matches!(err, EngineError::Core(CoreError::NotAvailable { .. })));
    assert_eq!(library.book(&book.id).await.unwrap().available_copies, 0);
    assert!(library.certificates(10).await.unwrap().is_empty());
}

// =============================================================================
// Invariants
// =============================================================================

#[tokio::test]
async fn certificate_is_issued_once() {
    let library = library().await;
    let (book, donation) = library.donate("978-0-1", &dune(), "donor1", 1).await.unwrap();
    library.approve(&book.id, "admin").await.unwrap();

    let err = library.issue_certificate(&donation.id).await.unwrap_err();
    assert!(matches!(err, EngineError::Core(CoreError::DuplicateCertificate { .. })));
    assert!(err.is_already_satisfied());
    assert_eq!(library.certificates(10).await.unwrap().len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn concurrent_certificate_issuance_stores_one() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let db = Database::new(DbConfig::new(dir.path().join("certs.db")).max_connections(4))
        .await
        .unwrap();
    let inventory = Inventory::new(db.clone(), RetryPolicy::default(), RedonationPolicy::Refuse);
    let issuer = CertificateIssuer::new(db.clone(), RetryPolicy::default(), "certificates");

    let (book, donation) = inventory.submit_donation("978-0-1", &dune(), "donor1", 1).await.unwrap();
    inventory.approve_book(&book.id, "admin").await.unwrap();

    let attempts: Vec<_> = (0..2)
        .map(|_| {
            let issuer = issuer.clone();
            let id = donation.id.clone();
            tokio::spawn(async move { issuer.issue_certificate(&id).await })
        })
        .collect();

    let mut issued = 0;
    let mut duplicates = 0;
    for attempt in attempts {
        match attempt.await.unwrap() {
            Ok(certificate) => {
                assert_eq!(certificate.transaction_id, donation.id);
                issued += 1;
            }
            Err(EngineError::Core(CoreError::DuplicateCertificate { .. })) => duplicates += 1,
            Err(other) => panic!("unexpected error: {other:?}"),
        }
    }

    assert_eq!((issued, duplicates), (1, 1));
    assert_eq!(issuer.list_certificates(10).await.unwrap().len(), 1);
    db.close().await;
}

#[tokio::test]
async fn isbn_spellings_resolve_to_one_book() {
    let library = library().await;
    let (first, _) = library.donate("978-0-1", &dune(), "donor1", 1).await.unwrap();
    let (second, _) = library.donate("97801", &dune(), "donor2", 2).await.unwrap();

    assert_eq!(first.id, second.id);
    assert_eq!(second.total_copies, 3);
    assert_eq!(library.books(&BookQuery::default()).await.unwrap().len(), 1);

    let approval = library.approve(&first.id, "admin").await.unwrap();
    assert_eq!(approval.certificates.len(), 2);
}

#[tokio::test]
async fn one_active_loan_per_reader_and_book() {
    let library = library().await;
    let book = approved_book(&library, 3).await;

    library.borrow(&book.id, "reader1").await.unwrap();
    let err = library.borrow(&book.id, "reader1").await.unwrap_err();
    assert!(matches!(err, EngineError::Core(CoreError::DuplicateLoan { .. })));

    let active: Vec<Transaction> = library
        .user_history("reader1")
        .try_filter(|tx| futures_util::future::ready(tx.status == TransactionStatus::Active))
        .try_collect()
        .await
        .unwrap();
    assert_eq!(active.len(), 1);

    let after = library.book(&book.id).await.unwrap();
    assert_eq!(after.available_copies, 2);
    assert_counters(&after);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn concurrent_borrows_of_last_copy() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let mut config = LibraryConfig::default();
    config.database.path = dir.path().join("libris.db");
    config.database.max_connections = 4;

    let library = Library::open(&config).await.unwrap();
    let book = approved_book(&library, 1).await;

    let first = tokio::spawn({
        let library = library.clone();
        let book_id = book.id.clone();
        async move { library.borrow(&book_id, "reader1").await }
    });
    let second = tokio::spawn({
        let library = library.clone();
        let book_id = book.id.clone();
        async move { library.borrow(&book_id, "reader2").await }
    });

    let results = [first.await.unwrap(), second.await.unwrap()];
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);

    let loser = results.iter().find_map(|r| r.as_ref().err()).unwrap();
    assert!(
        matches!(
            loser,
            EngineError::Core(CoreError::NotAvailable { .. }) | EngineError::ConcurrencyConflict { .. }
        ),
        "unexpected error: {loser:?}"
    );

    let after = library.book(&book.id).await.unwrap();
    assert_eq!(after.available_copies, 0);
    assert_eq!(after.active_loans().count(), 1);
    assert_counters(&after);
    library.close().await;
}

#[tokio::test]
async fn borrow_and_return_round_trip_keeps_totals() {
    let library = library().await;
    let book = approved_book(&library, 2).await;

    for reader in ["reader1", "reader2"] {
        library.borrow(&book.id, reader).await.unwrap();
    }
    for reader in ["reader2", "reader1"] {
        library.return_book(&book.id, reader).await.unwrap();
        assert_counters(&library.book(&book.id).await.unwrap());
    }

    let after = library.book(&book.id).await.unwrap();
    assert_eq!(after.available_copies, book.available_copies);
    assert_eq!(after.total_copies, book.total_copies);

    let err = library.return_book(&book.id, "reader1").await.unwrap_err();
    assert!(matches!(err, EngineError::Core(CoreError::NoActiveLoan { .. })));
}

// =============================================================================
// Donations to approved books
// =============================================================================

#[tokio::test]
async fn confirm_and_decline_later_donations() {
    let library = library().await;
    let book = approved_book(&library, 1).await;

    let (pending, extra) = library.donate("978-0-1", &dune(), "donor2", 3).await.unwrap();
    assert_eq!(pending.status, BookStatus::Approved);
    assert_eq!(pending.pending_copies, 3);
    assert_eq!(pending.total_copies, 4);
    assert_eq!(pending.available_copies, 1);
    assert_counters(&pending);

    let confirmation = library.confirm_donation(&extra.id, "admin").await.unwrap();
    assert_eq!(confirmation.book.available_copies, 4);
    assert_eq!(confirmation.book.pending_copies, 0);
    assert_eq!(confirmation.transaction.status, TransactionStatus::Completed);
    assert_eq!(confirmation.certificate.unwrap().user_id, "donor2");

    let (_, refused) = library.donate("978-0-1", &dune(), "donor3", 2).await.unwrap();
    let (declined, tx) = library.decline_donation(&refused.id, "admin").await.unwrap();
    assert_eq!(declined.total_copies, 4);
    assert_eq!(declined.pending_copies, 0);
    assert_eq!(tx.status, TransactionStatus::Completed);
    assert_counters(&declined);

    let err = library.issue_certificate(&refused.id).await.unwrap_err();
    assert!(matches!(err, EngineError::Core(CoreError::InvalidState { .. })));
    assert!(library.user_certificates("donor3").await.unwrap().is_empty());

    let err = library.confirm_donation(&refused.id, "admin").await.unwrap_err();
    assert!(matches!(err, EngineError::Core(CoreError::InvalidState { .. })));
    assert_eq!(library.book(&book.id).await.unwrap().total_copies, 4);
}

#[tokio::test]
async fn redonation_after_rejection_is_refused_by_default() {
    let library = library().await;
    let (book, _) = library.donate("978-0-1", &dune(), "donor1", 1).await.unwrap();
    library.reject(&book.id, "admin").await.unwrap();

    let err = library.donate("978-0-1", &dune(), "donor2", 1).await.unwrap_err();
    assert!(matches!(err, EngineError::Core(CoreError::InvalidState { .. })));
    assert_eq!(library.book(&book.id).await.unwrap().status, BookStatus::Rejected);
}

#[tokio::test]
async fn redonation_reopens_when_configured() {
    let library = library_with(RedonationPolicy::Reopen).await;
    let (book, _) = library.donate("978-0-1", &dune(), "donor1", 1).await.unwrap();
    library.reject(&book.id, "admin").await.unwrap();

    let (reopened, _) = library.donate("978-0-1", &dune(), "donor2", 2).await.unwrap();
    assert_eq!(reopened.id, book.id);
    assert_eq!(reopened.status, BookStatus::Pending);
    assert_eq!(reopened.approved_by, None);
    assert_counters(&reopened);

    let approval = library.approve(&book.id, "admin").await.unwrap();
    assert_eq!(approval.book.status, BookStatus::Approved);
    assert_eq!(approval.certificates.len(), 1);
    assert_eq!(approval.certificates[0].user_id, "donor2");
}

#[tokio::test]
async fn approval_is_published_to_subscribers() {
    let library = library().await;
    let mut events = library.subscribe();

    let (book, first) = library.donate("978-0-1", &dune(), "donor1", 1).await.unwrap();
    let (_, second) = library.donate("978-0-1", &dune(), "donor2", 1).await.unwrap();
    let approval = library.approve(&book.id, "admin").await.unwrap();
    assert_eq!(approval.certificates.len(), 2);

    match events.recv().await.unwrap() {
        BookEvent::Approved {
            book_id,
            completed_donations,
            ..
        } => {
            assert_eq!(book_id, book.id);
            let mut ids = completed_donations;
            ids.sort();
            let mut expected = vec![first.id, second.id];
            expected.sort();
            assert_eq!(ids, expected);
        }
        other => panic!("unexpected event: {other:?}"),
    }
}

// =============================================================================
// Read models
// =============================================================================

#[tokio::test]
async fn histories_are_date_ascending() {
    let library = library().await;
    let book = approved_book(&library, 2).await;
    library.borrow(&book.id, "reader1").await.unwrap();
    library.return_book(&book.id, "reader1").await.unwrap();
    library.borrow(&book.id, "reader1").await.unwrap();

    let history: Vec<Transaction> = library.book_history(&book.id).try_collect().await.unwrap();
    assert_eq!(history.len(), 3);
    assert_eq!(history[0].kind, TransactionKind::Donation);
    assert!(history
        .windows(2)
        .all(|w| (w[0].date, &w[0].id) <= (w[1].date, &w[1].id)));

    let mine: Vec<Transaction> = library.user_history("reader1").try_collect().await.unwrap();
    assert_eq!(mine.len(), 2);
    assert_eq!(mine[0].status, TransactionStatus::Completed);
    assert_eq!(mine[1].status, TransactionStatus::Active);

    let all: Vec<Transaction> = library.transactions().try_collect().await.unwrap();
    assert_eq!(all.len(), 3);

    let issued: Vec<IssuedBook> = library.issued_books(Some("reader1")).try_collect().await.unwrap();
    assert_eq!(issued.len(), 1);
    assert_eq!(issued[0].book.id, book.id);
}

#[tokio::test]
async fn reports_are_deterministic() {
    let library = library().await;
    let book = approved_book(&library, 2).await;
    library.borrow(&book.id, "reader1").await.unwrap();

    let other = BookMeta {
        title: "Beloved".into(),
        author: "Toni Morrison".into(),
        genre: "Fiction".into(),
        ..Default::default()
    };
    library.donate("978-1-4000-3341-6", &other, "donor2", 1).await.unwrap();

    let now = Utc::now();
    let range = DateRange::new(now - Duration::hours(1), now + Duration::hours(1)).unwrap();
    let report = library.reports(range).await.unwrap();

    assert_eq!(report.donations.transactions, 2);
    assert_eq!(report.donations.copies, 3);
    assert_eq!(report.borrowings.transactions, 1);
    assert_eq!(report.donations.by_genre.get("Fiction"), Some(&1));
    assert_eq!(report.donations.by_genre.get("Science Fiction"), Some(&1));
    assert_eq!(report.distinct_books, 2);
    assert_eq!(report.distinct_users, 3);

    assert_eq!(library.reports(range).await.unwrap(), report);

    let past = DateRange::new(now - Duration::days(2), now - Duration::days(1)).unwrap();
    let empty = library.reports(past).await.unwrap();
    assert_eq!(empty.donations.transactions, 0);
    assert_eq!(empty.borrowings.transactions, 0);
}

#[tokio::test]
async fn catalog_listing_filters_by_status() {
    let library = library().await;
    approved_book(&library, 1).await;
    library.donate("978-1-4000-3341-6", &dune(), "donor2", 1).await.unwrap();

    let approved = library
        .books(&BookQuery {
            status: Some(BookStatus::Approved),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(approved.len(), 1);
    assert_eq!(library.books(&BookQuery::default()).await.unwrap().len(), 2);

    let err = library.book("missing").await.unwrap_err();
    assert!(matches!(err, EngineError::Core(CoreError::BookNotFound(_))));
    assert_eq!(err.status(), 404);
}

// =============================================================================
// Accounts
// =============================================================================

#[tokio::test]
async fn register_account_rejects_duplicates() {
    let library = library().await;
    let input = NewAccount {
        user_id: "reader_7".into(),
        username: "Reader Seven".into(),
        email: "Reader7@Example.org".into(),
        role: Default::default(),
    };

    let account = library.register_account(&input).await.unwrap();
    assert_eq!(account.email, "reader7@example.org");
    assert_eq!(library.account("reader_7").await.unwrap(), account);

    let err = library.register_account(&input).await.unwrap_err();
    assert!(matches!(
        err,
        EngineError::Core(CoreError::Validation(ValidationError::Duplicate { .. }))
    ));

    let same_email = NewAccount {
        user_id: "reader_8".into(),
        ..input
    };
    let err = library.register_account(&same_email).await.unwrap_err();
    match err {
        EngineError::Core(CoreError::Validation(ValidationError::Duplicate { field, .. })) => {
            assert_eq!(field, "email");
        }
        other => panic!("unexpected error: {other:?}"),
    }

    let err = library.account("nobody").await.unwrap_err();
    assert!(matches!(err, EngineError::Core(CoreError::AccountNotFound(_))));
}
