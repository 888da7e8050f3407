//! # Certificate Repository
//!
//! `certificates.transaction_id` is UNIQUE, so the insert itself is the
//! exactly-once check: a second insert for the same donation fails with
//! `UniqueViolation` and leaves the table untouched.

use sqlx::SqlitePool;
use tracing::debug;

use crate::error::{DbError, DbResult};
use libris_core::Certificate;

const SELECT_CERTIFICATE: &str = r#"
    SELECT id, user_id, book_id, transaction_id, issued_date, certificate_url
    FROM certificates
"#;

/// Repository for donation certificates.
#[derive(Debug, Clone)]
pub struct CertificateRepository {
    pool: SqlitePool,
}

impl CertificateRepository {
    /// Creates a new CertificateRepository.
    pub fn new(pool: SqlitePool) -> Self {
        CertificateRepository { pool }
    }

    /// Inserts a certificate.
    ///
    /// ## Returns
    /// * `Err(DbError::UniqueViolation)` - the donation already has one
    pub async fn insert(&self, cert: &Certificate) -> DbResult<()> {
        debug!(id = %cert.id, transaction_id = %cert.transaction_id, "Inserting certificate");

        sqlx::query(
            r#"
            INSERT INTO certificates (
                id, user_id, book_id, transaction_id, issued_date, certificate_url
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
        )
        .bind(&cert.id)
        .bind(&cert.user_id)
        .bind(&cert.book_id)
        .bind(&cert.transaction_id)
        .bind(cert.issued_date)
        .bind(&cert.certificate_url)
        .execute(&self.pool)
        .await
        .map_err(|e| DbError::from(e).with_value(cert.transaction_id.as_str()))?;

        Ok(())
    }

    /// Gets a certificate by ID.
    pub async fn get_by_id(&self, id: &str) -> DbResult<Option<Certificate>> {
        let sql = format!("{SELECT_CERTIFICATE} WHERE id = ?1");

        let cert = sqlx::query_as::<_, Certificate>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(cert)
    }

    /// Gets the certificate issued for a donation, if any.
    pub async fn find_by_transaction(&self, transaction_id: &str) -> DbResult<Option<Certificate>> {
        let sql = format!("{SELECT_CERTIFICATE} WHERE transaction_id = ?1");

        let cert = sqlx::query_as::<_, Certificate>(&sql)
            .bind(transaction_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(cert)
    }

    /// Certificates earned by a donor, oldest first.
    pub async fn for_user(&self, user_id: &str) -> DbResult<Vec<Certificate>> {
        let sql = format!("{SELECT_CERTIFICATE} WHERE user_id = ?1 ORDER BY issued_date, id");

        let certs = sqlx::query_as::<_, Certificate>(&sql)
            .bind(user_id)
            .fetch_all(&self.pool)
            .await?;

        Ok(certs)
    }

    /// All certificates, newest first.
    pub async fn list(&self, limit: u32) -> DbResult<Vec<Certificate>> {
        let sql = format!("{SELECT_CERTIFICATE} ORDER BY issued_date DESC, id LIMIT ?1");

        let certs = sqlx::query_as::<_, Certificate>(&sql)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;

        Ok(certs)
    }

    /// Counts certificates (for diagnostics).
    pub async fn count(&self) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM certificates")
            .fetch_one(&self.pool)
            .await?;

        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::transaction::LedgerWrite;
    use crate::{Database, DbConfig};
    use chrono::Utc;
    use libris_core::lifecycle::{new_book, new_transaction};
    use libris_core::{BookMeta, TransactionKind};

    #[tokio::test]
    async fn test_second_certificate_for_donation_is_rejected() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let now = Utc::now();
        let meta = BookMeta {
            title: "Dune".into(),
            author: "Frank Herbert".into(),
            genre: "SF".into(),
            ..Default::default()
        };
        let book = new_book("b1".into(), "978-0-1".into(), meta, "d1", 1, now);
        let donation = new_transaction("t1".into(), TransactionKind::Donation, "d1", "b1", 1, now);
        db.books()
            .insert_with_ledger(&book, &[LedgerWrite::Append(donation)])
            .await
            .unwrap();

        let cert = Certificate {
            id: "c1".into(),
            user_id: "d1".into(),
            book_id: "b1".into(),
            transaction_id: "t1".into(),
            issued_date: now,
            certificate_url: "certificates/c1.pdf".into(),
        };
        db.certificates().insert(&cert).await.unwrap();

        let again = Certificate {
            id: "c2".into(),
            ..cert.clone()
        };
        let err = db.certificates().insert(&again).await.unwrap_err();
        assert!(err.is_unique_violation_on("certificates.transaction_id"));

        assert_eq!(db.certificates().count().await.unwrap(), 1);
        assert_eq!(db.certificates().find_by_transaction("t1").await.unwrap(), Some(cert));
        assert_eq!(db.certificates().for_user("d1").await.unwrap().len(), 1);
        assert!(db.certificates().get_by_id("c2").await.unwrap().is_none());
    }
}
