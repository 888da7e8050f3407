//! # Seed Data Generator
//!
//! Populates a development database with accounts, approved books, donation
//! certificates, and a few open loans.
//!
//! ## Usage
//! ```bash
//! # 200 books (default)
//! cargo run -p libris-db --bin seed
//!
//! # Custom amount and path
//! cargo run -p libris-db --bin seed -- --count 1000 --db ./data/libris.db
//!
//! # More logging
//! RUST_LOG=libris_db=debug cargo run -p libris-db --bin seed
//! ```
//!
//! Every third book gets one copy out on loan; every seventh stays pending.

use chrono::{Duration, Utc};
use std::env;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use libris_core::lifecycle::{new_book, new_transaction};
use libris_core::{Account, AccountRole, BookMeta, Certificate, DonationOutcome, TransactionKind};
use libris_db::{generate_id, Database, DbConfig, LedgerWrite};

/// (genre, [(title, author)])
const SHELVES: &[(&str, &[(&str, &str)])] = &[
    (
        "Fiction",
        &[
            ("Pride and Prejudice", "Jane Austen"),
            ("Middlemarch", "George Eliot"),
            ("Things Fall Apart", "Chinua Achebe"),
            ("The Remains of the Day", "Kazuo Ishiguro"),
            ("Beloved", "Toni Morrison"),
        ],
    ),
    (
        "Science Fiction",
        &[
            ("Dune", "Frank Herbert"),
            ("The Left Hand of Darkness", "Ursula K. Le Guin"),
            ("Solaris", "Stanislaw Lem"),
            ("Kindred", "Octavia E. Butler"),
        ],
    ),
    (
        "History",
        &[
            ("The Guns of August", "Barbara Tuchman"),
            ("SPQR", "Mary Beard"),
            ("The Silk Roads", "Peter Frankopan"),
        ],
    ),
    (
        "Science",
        &[
            ("The Selfish Gene", "Richard Dawkins"),
            ("A Brief History of Time", "Stephen Hawking"),
            ("The Double Helix", "James D. Watson"),
        ],
    ),
];

const DONORS: &[&str] = &["donor.ada", "donor.grace", "donor.alan"];
const READERS: &[&str] = &["reader.kim", "reader.lee", "reader.sam", "reader.noor"];
const ADMIN: &str = "admin.root";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args: Vec<String> = env::args().collect();

    let mut count: usize = 200;
    let mut db_path = String::from("./libris_dev.db");

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--count" | "-c" => {
                if i + 1 < args.len() {
                    count = args[i + 1].parse().unwrap_or(200);
                    i += 1;
                }
            }
            "--db" | "-d" => {
                if i + 1 < args.len() {
                    db_path = args[i + 1].clone();
                    i += 1;
                }
            }
            "--help" | "-h" => {
                println!("Libris Seed Data Generator");
                println!();
                println!("Usage: seed [OPTIONS]");
                println!();
                println!("Options:");
                println!("  -c, --count <N>    Number of books to generate (default: 200)");
                println!("  -d, --db <PATH>    Database file path (default: ./libris_dev.db)");
                println!("  -h, --help         Show this help message");
                return Ok(());
            }
            _ => {}
        }
        i += 1;
    }

    info!(db = %db_path, books = count, "Seeding Libris database");

    let db = Database::new(DbConfig::new(&db_path)).await?;

    let existing = db.books().count().await?;
    if existing > 0 {
        warn!(existing, "Database already has books; skipping seed. Delete the file to regenerate.");
        return Ok(());
    }

    seed_accounts(&db).await?;

    let start = std::time::Instant::now();
    let titles: Vec<(&str, &str, &str)> = SHELVES
        .iter()
        .flat_map(|(genre, books)| books.iter().map(move |(title, author)| (*genre, *title, *author)))
        .collect();

    let mut generated = 0;
    for n in 0..count {
        let (genre, title, author) = titles[n % titles.len()];
        let edition = n / titles.len();
        let title = if edition == 0 {
            title.to_string()
        } else {
            format!("{title} (Edition {})", edition + 1)
        };

        if let Err(e) = seed_book(&db, n, genre, &title, author).await {
            warn!(title = %title, error = %e, "Failed to seed book");
            continue;
        }

        generated += 1;
        if generated % 50 == 0 {
            info!(generated, "Progress");
        }
    }

    let elapsed = start.elapsed();
    info!(
        books = generated,
        transactions = db.transactions().count().await?,
        certificates = db.certificates().count().await?,
        elapsed_ms = elapsed.as_millis() as u64,
        "Seed complete"
    );

    db.close().await;
    Ok(())
}

async fn seed_accounts(db: &Database) -> Result<(), Box<dyn std::error::Error>> {
    let now = Utc::now();
    let people = DONORS
        .iter()
        .chain(READERS.iter())
        .map(|u| (*u, AccountRole::Member))
        .chain(std::iter::once((ADMIN, AccountRole::Admin)));

    for (user_id, role) in people {
        let account = Account {
            id: generate_id(),
            user_id: user_id.to_string(),
            username: user_id.replace('.', " "),
            email: format!("{user_id}@libris.example"),
            role,
            created_at: now,
        };
        db.accounts().insert(&account).await?;
    }

    Ok(())
}

/// Donates one book, approves most of them, and lends some.
async fn seed_book(
    db: &Database,
    n: usize,
    genre: &str,
    title: &str,
    author: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let donated_at = Utc::now() - Duration::days(90) + Duration::minutes(n as i64 * 7);
    let donor = DONORS[n % DONORS.len()];
    let copies = 1 + (n % 3) as i64;

    let meta = BookMeta {
        title: title.to_string(),
        author: author.to_string(),
        genre: genre.to_string(),
        description: None,
        published_year: Some(1900 + (n % 120) as i32),
    };

    let book_id = generate_id();
    let mut book = new_book(
        book_id.clone(),
        format!("978-1-{:06}", n),
        meta,
        donor,
        copies,
        donated_at,
    );
    let mut donation = new_transaction(
        generate_id(),
        TransactionKind::Donation,
        donor,
        &book_id,
        copies,
        donated_at,
    );

    let pending = n % 7 == 6;
    if !pending {
        let approved_at = donated_at + Duration::hours(6);
        book.approve(ADMIN, approved_at)?;
        donation.resolve(DonationOutcome::Accepted, approved_at)?;
    }

    db.books()
        .insert_with_ledger(&book, &[LedgerWrite::Append(donation.clone())])
        .await?;

    if pending {
        return Ok(());
    }

    let cert_id = generate_id();
    db.certificates()
        .insert(&Certificate {
            user_id: donor.to_string(),
            book_id: book_id.clone(),
            transaction_id: donation.id.clone(),
            issued_date: book.updated_at,
            certificate_url: format!("certificates/{cert_id}.pdf"),
            id: cert_id,
        })
        .await?;

    if n % 3 == 0 {
        let reader = READERS[n % READERS.len()];
        let borrowed_at = donated_at + Duration::days(1);
        let version = book.version;
        book.lend_to(reader, borrowed_at)?;
        let borrowing = new_transaction(
            generate_id(),
            TransactionKind::Borrowing,
            reader,
            &book_id,
            1,
            borrowed_at,
        );
        db.books()
            .put_if_version(&book, version, &[LedgerWrite::Append(borrowing)])
            .await?;
    }

    Ok(())
}
