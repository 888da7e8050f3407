//! # Validation Module
//!
//! Input validation for donations, accounts, and identifiers.
//!
//! ## Validation Strategy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Validation Layers                                  │
//! │                                                                         │
//! │  Layer 1: Client forms (React / React Native)                          │
//! │  └── Immediate feedback                                                │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 2: Engine entry points                                          │
//! │  └── THIS MODULE: ISBN shape, required metadata, copy counts           │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 3: Catalog store (SQLite)                                       │
//! │  ├── UNIQUE(isbn), UNIQUE(email), UNIQUE(user_id)                      │
//! │  └── UNIQUE(certificates.transaction_id)                               │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use crate::error::ValidationError;
use crate::types::{BookMeta, NewAccount};
use crate::{MAX_DONATION_COPIES, MAX_TEXT_FIELD_LEN};

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

// =============================================================================
// ISBN
// =============================================================================

/// Validates an ISBN and returns it trimmed.
///
/// ## Rules
/// - Must not be empty
/// - Only digits and hyphens (an ISBN-10 check character `X` may end it)
/// - At most 13 digits, at least one
/// - No leading, trailing, or doubled hyphens
///
/// Checksums are not verified: catalog entries created before ISBN-13
/// carry short house numbers.
///
/// Returns the catalog key: hyphens removed and a trailing `x` uppercased,
/// so every spelling of one ISBN maps to the same book.
///
/// ## Example
/// ```rust
/// use libris_core::validation::validate_isbn;
///
/// assert!(validate_isbn("978-0-13-468599-1").is_ok());
/// assert!(validate_isbn("0-306-40615-X").is_ok());
/// assert_eq!(validate_isbn("978-0-1").unwrap(), "97801");
/// assert_eq!(validate_isbn("0-306-40615-x").unwrap(), "030640615X");
/// assert!(validate_isbn("ISBN 123").is_err());
/// assert!(validate_isbn("").is_err());
/// ```
pub fn validate_isbn(isbn: &str) -> ValidationResult<String> {
    let isbn = isbn.trim();

    if isbn.is_empty() {
        return Err(ValidationError::required("isbn"));
    }

    if isbn.starts_with('-') || isbn.ends_with('-') || isbn.contains("--") {
        return Err(ValidationError::invalid_format(
            "isbn",
            "hyphens must separate digit groups",
        ));
    }

    let body: Vec<char> = isbn.chars().filter(|c| *c != '-').collect();
    let last = body.len().saturating_sub(1);

    for (i, c) in body.iter().enumerate() {
        let ok = c.is_ascii_digit() || (i == last && i > 0 && (*c == 'X' || *c == 'x'));
        if !ok {
            return Err(ValidationError::invalid_format(
                "isbn",
                "must contain only digits and hyphens",
            ));
        }
    }

    if body.len() > 13 {
        return Err(ValidationError::invalid_format(
            "isbn",
            "must have at most 13 digits",
        ));
    }

    Ok(body.iter().map(|c| c.to_ascii_uppercase()).collect())
}

// =============================================================================
// Donation Metadata
// =============================================================================

/// Validates a required, bounded text field and returns it trimmed.
pub fn validate_text(field: &str, value: &str) -> ValidationResult<String> {
    let value = value.trim();

    if value.is_empty() {
        return Err(ValidationError::required(field));
    }

    if value.chars().count() > MAX_TEXT_FIELD_LEN {
        return Err(ValidationError::TooLong {
            field: field.to_string(),
            max: MAX_TEXT_FIELD_LEN,
        });
    }

    Ok(value.to_string())
}

/// Validates donation metadata and returns a normalized copy.
///
/// ## Rules
/// - title, author, genre: required, at most 200 characters
/// - description: optional; blank becomes `None`
/// - published_year: optional, between 1450 and 2100
pub fn validate_book_meta(meta: &BookMeta) -> ValidationResult<BookMeta> {
    let title = validate_text("title", &meta.title)?;
    let author = validate_text("author", &meta.author)?;
    let genre = validate_text("genre", &meta.genre)?;

    let description = meta
        .description
        .as_deref()
        .map(str::trim)
        .filter(|d| !d.is_empty())
        .map(str::to_string);

    if let Some(year) = meta.published_year {
        if !(1450..=2100).contains(&year) {
            return Err(ValidationError::OutOfRange {
                field: "publishedYear".to_string(),
                min: 1450,
                max: 2100,
            });
        }
    }

    Ok(BookMeta {
        title,
        author,
        genre,
        description,
        published_year: meta.published_year,
    })
}

/// Validates the number of copies in one donation.
///
/// ## Rules
/// - Must be at least 1
/// - Must not exceed MAX_DONATION_COPIES (100)
pub fn validate_copies(copies: i64) -> ValidationResult<()> {
    if !(1..=MAX_DONATION_COPIES).contains(&copies) {
        return Err(ValidationError::OutOfRange {
            field: "copies".to_string(),
            min: 1,
            max: MAX_DONATION_COPIES,
        });
    }

    Ok(())
}

// =============================================================================
// Accounts
// =============================================================================

/// Validates an email address and returns it lowercased.
///
/// Only the shape is checked: one `@`, a non-empty local part, and a
/// dotted domain.
pub fn validate_email(email: &str) -> ValidationResult<String> {
    let email = email.trim().to_lowercase();

    if email.is_empty() {
        return Err(ValidationError::required("email"));
    }

    let mut parts = email.split('@');
    let (local, domain) = match (parts.next(), parts.next(), parts.next()) {
        (Some(local), Some(domain), None) => (local, domain),
        _ => return Err(ValidationError::invalid_format("email", "must contain one '@'")),
    };

    let domain_ok = domain.contains('.')
        && !domain.starts_with('.')
        && !domain.ends_with('.')
        && !domain.contains("..");

    if local.is_empty() || !domain_ok || email.contains(char::is_whitespace) {
        return Err(ValidationError::invalid_format(
            "email",
            "must look like name@example.org",
        ));
    }

    Ok(email)
}

/// Validates a login handle.
///
/// ## Rules
/// - 3 to 50 characters
/// - Letters, digits, `.`, `-`, `_`
pub fn validate_user_id(user_id: &str) -> ValidationResult<String> {
    let user_id = user_id.trim();

    if user_id.is_empty() {
        return Err(ValidationError::required("userId"));
    }

    if user_id.len() < 3 || user_id.len() > 50 {
        return Err(ValidationError::OutOfRange {
            field: "userId length".to_string(),
            min: 3,
            max: 50,
        });
    }

    if !user_id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'))
    {
        return Err(ValidationError::invalid_format(
            "userId",
            "must contain only letters, numbers, '.', '-' and '_'",
        ));
    }

    Ok(user_id.to_string())
}

/// Validates registration input and returns a normalized copy.
pub fn validate_new_account(account: &NewAccount) -> ValidationResult<NewAccount> {
    Ok(NewAccount {
        user_id: validate_user_id(&account.user_id)?,
        username: validate_text("username", &account.username)?,
        email: validate_email(&account.email)?,
        role: account.role,
    })
}

// =============================================================================
// Identifiers
// =============================================================================

/// Validates a caller-supplied reference (book, user, admin, transaction id).
///
/// IDs are opaque to the engine; only emptiness and length are checked.
pub fn validate_ref(field: &str, id: &str) -> ValidationResult<()> {
    if id.trim().is_empty() {
        return Err(ValidationError::required(field));
    }

    if id.len() > 64 {
        return Err(ValidationError::TooLong {
            field: field.to_string(),
            max: 64,
        });
    }

    Ok(())
}

/// Validates a UUID string format.
///
/// ## Example
/// ```rust
/// use libris_core::validation::validate_uuid;
///
/// assert!(validate_uuid("550e8400-e29b-41d4-a716-446655440000").is_ok());
/// assert!(validate_uuid("not-a-uuid").is_err());
/// ```
pub fn validate_uuid(id: &str) -> ValidationResult<()> {
    if id.trim().is_empty() {
        return Err(ValidationError::required("id"));
    }

    uuid::Uuid::parse_str(id).map_err(|_| ValidationError::InvalidFormat {
        field: "id".to_string(),
        reason: "must be a valid UUID".to_string(),
    })?;

    Ok(())
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn meta() -> BookMeta {
        BookMeta {
            title: "  Dune ".to_string(),
            author: "Frank Herbert".to_string(),
            genre: "Science Fiction".to_string(),
            description: Some("   ".to_string()),
            published_year: Some(1965),
        }
    }

    #[test]
    fn test_validate_isbn() {
        assert_eq!(validate_isbn(" 978-0-1 ").unwrap(), "97801");
        assert_eq!(validate_isbn("97801").unwrap(), "97801");
        assert_eq!(
            validate_isbn("0-306-40615-x").unwrap(),
            validate_isbn("0306-40615-X").unwrap()
        );
        assert!(validate_isbn("9780134685991").is_ok());
        assert!(validate_isbn("0-306-40615-x").is_ok());

        assert!(validate_isbn("").is_err());
        assert!(validate_isbn("-978").is_err());
        assert!(validate_isbn("978--0").is_err());
        assert!(validate_isbn("X123").is_err());
        assert!(validate_isbn("97801346859912").is_err());
        assert!(validate_isbn("978 0 1").is_err());
    }

    #[test]
    fn test_validate_book_meta() {
        let normalized = validate_book_meta(&meta()).unwrap();
        assert_eq!(normalized.title, "Dune");
        assert_eq!(normalized.description, None);

        let mut missing = meta();
        missing.genre = " ".to_string();
        assert!(matches!(
            validate_book_meta(&missing),
            Err(ValidationError::Required { .. })
        ));

        let mut ancient = meta();
        ancient.published_year = Some(1200);
        assert!(validate_book_meta(&ancient).is_err());

        let mut long = meta();
        long.title = "A".repeat(MAX_TEXT_FIELD_LEN + 1);
        assert!(validate_book_meta(&long).is_err());
    }

    #[test]
    fn test_validate_copies() {
        assert!(validate_copies(1).is_ok());
        assert!(validate_copies(MAX_DONATION_COPIES).is_ok());
        assert!(validate_copies(0).is_err());
        assert!(validate_copies(-2).is_err());
        assert!(validate_copies(MAX_DONATION_COPIES + 1).is_err());
    }

    #[test]
    fn test_validate_email() {
        assert_eq!(validate_email(" Ada@Example.org ").unwrap(), "ada@example.org");
        assert!(validate_email("").is_err());
        assert!(validate_email("ada").is_err());
        assert!(validate_email("ada@example").is_err());
        assert!(validate_email("a@b@c.org").is_err());
        assert!(validate_email("@example.org").is_err());
    }

    #[test]
    fn test_validate_user_id() {
        assert!(validate_user_id("reader_01").is_ok());
        assert!(validate_user_id("ab").is_err());
        assert!(validate_user_id("has space").is_err());
    }

    #[test]
    fn test_validate_ref_and_uuid() {
        assert!(validate_ref("bookId", "abc").is_ok());
        assert!(validate_ref("bookId", "  ").is_err());
        assert!(validate_uuid("550e8400-e29b-41d4-a716-446655440000").is_ok());
        assert!(validate_uuid("123").is_err());
    }
}
