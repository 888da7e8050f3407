//! # Certificate Issuer
//!
//! One proof-of-donation certificate per accepted donation.
//!
//! Issuance is idempotent through the unique index on
//! `certificates.transaction_id`: whichever insert lands first wins, every
//! later attempt (a re-sent event, a retry after a crash, a manual re-issue)
//! fails with `DuplicateCertificate` and changes nothing.
//!
//! ```text
//! BookEvent::Approved { completed_donations: [t1, t2] }
//!      │
//!      ├── issue(t1) ──► INSERT certificate ✓
//!      └── issue(t2) ──► UNIQUE(transaction_id) ✗ ──► already satisfied, skip
//! ```

use chrono::Utc;
use tracing::{debug, error, info};

use libris_core::validation::validate_ref;
use libris_core::{BookStatus, Certificate, CoreError, DonationOutcome, TransactionKind, TransactionStatus};
use libris_db::{generate_id, Database};

use crate::error::EngineResult;
use crate::events::BookEvent;
use crate::inventory::{load_book, load_transaction};
use crate::retry::RetryPolicy;

/// What handling one [`BookEvent`] produced.
#[derive(Debug, Clone, Default)]
pub struct Issuance {
    /// Certificates created for this event.
    pub issued: Vec<Certificate>,
    /// Donations whose certificate could not be issued; re-run
    /// [`CertificateIssuer::issue_certificate`] for them.
    pub uncertified: Vec<String>,
}

/// Issues and looks up donation certificates.
#[derive(Debug, Clone)]
pub struct CertificateIssuer {
    db: Database,
    retry: RetryPolicy,
    base_url: String,
}

impl CertificateIssuer {
    pub fn new(db: Database, retry: RetryPolicy, base_url: impl Into<String>) -> Self {
        CertificateIssuer {
            db,
            retry,
            base_url: base_url.into(),
        }
    }

    /// Issues the certificate for one donation.
    ///
    /// ## Returns
    /// * `Ok(Certificate)` - newly stored certificate
    /// * `Err(DuplicateCertificate)` - one already exists (already satisfied)
    /// * `Err(InvalidState)` - donation still active or declined, or its
    ///   book is not approved
    /// * `Err(WrongTransactionKind)` - the transaction is a borrowing
    pub async fn issue_certificate(&self, transaction_id: &str) -> EngineResult<Certificate> {
        validate_ref("transactionId", transaction_id)?;

        self.retry
            .run("issue_certificate", || self.try_issue(transaction_id))
            .await
    }

    async fn try_issue(&self, transaction_id: &str) -> EngineResult<Certificate> {
        let donation = load_transaction(&self.db, transaction_id).await?;
        donation.ensure_kind(TransactionKind::Donation)?;

        if donation.status != TransactionStatus::Completed {
            return Err(
                CoreError::transaction_state(&donation.id, donation.status, "issue certificate")
                    .into(),
            );
        }

        if donation.outcome != Some(DonationOutcome::Accepted) {
            return Err(CoreError::InvalidState {
                entity: "Transaction",
                id: donation.id.clone(),
                current: "declined".to_string(),
                operation: "issue certificate",
            }
            .into());
        }

        let book = load_book(&self.db, &donation.book_id).await?;
        if book.status != BookStatus::Approved {
            return Err(CoreError::book_state(&book.id, book.status, "issue certificate").into());
        }

        let id = generate_id();
        let certificate = Certificate {
            certificate_url: self.url_for(&id),
            id,
            user_id: donation.user_id,
            book_id: book.id,
            transaction_id: donation.id,
            issued_date: Utc::now(),
        };

        match self.db.certificates().insert(&certificate).await {
            Ok(()) => {
                info!(
                    certificate_id = %certificate.id,
                    transaction_id = %certificate.transaction_id,
                    user_id = %certificate.user_id,
                    "Certificate issued"
                );
                Ok(certificate)
            }
            Err(e) if e.is_unique_violation_on("certificates.transaction_id") => {
                Err(CoreError::DuplicateCertificate {
                    transaction_id: certificate.transaction_id,
                }
                .into())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Issues a certificate for every donation the event accepted.
    ///
    /// Donations that already hold a certificate are skipped. Failures are
    /// logged and reported in [`Issuance::uncertified`].
    pub async fn handle(&self, event: &BookEvent) -> Issuance {
        let mut issuance = Issuance::default();

        for transaction_id in event.certifiable_donations() {
            match self.issue_certificate(transaction_id).await {
                Ok(certificate) => issuance.issued.push(certificate),
                Err(e) if e.is_already_satisfied() => {
                    debug!(transaction_id = %transaction_id, "Certificate already issued");
                }
                Err(e) => {
                    error!(
                        book_id = %event.book_id(),
                        transaction_id = %transaction_id,
                        error = %e,
                        "Certificate issuance failed"
                    );
                    issuance.uncertified.push(transaction_id.to_string());
                }
            }
        }

        issuance
    }

    /// `<base_url>/<certificate id>.pdf`
    fn url_for(&self, certificate_id: &str) -> String {
        format!("{}/{}.pdf", self.base_url.trim_end_matches('/'), certificate_id)
    }

    // =========================================================================
    // Lookups
    // =========================================================================

    pub async fn get_certificate(&self, id: &str) -> EngineResult<Certificate> {
        validate_ref("certificateId", id)?;
        self.db
            .certificates()
            .get_by_id(id)
            .await?
            .ok_or_else(|| CoreError::CertificateNotFound(id.to_string()).into())
    }

    /// Certificates earned by `user_id`, oldest first.
    pub async fn certificates_for_user(&self, user_id: &str) -> EngineResult<Vec<Certificate>> {
        validate_ref("userId", user_id)?;
        Ok(self.db.certificates().for_user(user_id).await?)
    }

    /// Most recently issued certificates.
    pub async fn list_certificates(&self, limit: u32) -> EngineResult<Vec<Certificate>> {
        Ok(self.db.certificates().list(limit).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RedonationPolicy;
    use crate::error::EngineError;
    use crate::inventory::Inventory;
    use libris_core::BookMeta;
    use libris_db::DbConfig;

    async fn setup() -> (Inventory, CertificateIssuer) {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let inv = Inventory::new(db.clone(), RetryPolicy::default(), RedonationPolicy::Refuse);
        let issuer = CertificateIssuer::new(db, RetryPolicy::default(), "https://lib.example/certs/");
        (inv, issuer)
    }

    fn meta() -> BookMeta {
        BookMeta {
            title: "Kindred".into(),
            author: "Octavia E. Butler".into(),
            genre: "Fiction".into(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_issue_once_then_duplicate() {
        let (inv, issuer) = setup().await;
        let (book, donation) = inv.submit_donation("978-0-8070-8305-7", &meta(), "d1", 1).await.unwrap();
        inv.approve_book(&book.id, "admin").await.unwrap();

        let cert = issuer.issue_certificate(&donation.id).await.unwrap();
        assert_eq!(cert.user_id, "d1");
        assert_eq!(cert.book_id, book.id);
        assert_eq!(cert.certificate_url, format!("https://lib.example/certs/{}.pdf", cert.id));

        let err = issuer.issue_certificate(&donation.id).await.unwrap_err();
        assert!(err.is_already_satisfied());
        assert_eq!(issuer.certificates_for_user("d1").await.unwrap(), vec![cert.clone()]);
        assert_eq!(issuer.get_certificate(&cert.id).await.unwrap(), cert);
    }

    #[tokio::test]
    async fn test_no_certificate_for_pending_or_rejected() {
        let (inv, issuer) = setup().await;
        let (book, donation) = inv.submit_donation("978-0-1", &meta(), "d1", 1).await.unwrap();

        let err = issuer.issue_certificate(&donation.id).await.unwrap_err();
        assert!(matches!(err, EngineError::Core(CoreError::InvalidState { .. })));

        inv.reject_book(&book.id, "admin").await.unwrap();
        let err = issuer.issue_certificate(&donation.id).await.unwrap_err();
        assert!(matches!(err, EngineError::Core(CoreError::InvalidState { .. })));
        assert!(issuer.list_certificates(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_handle_skips_existing_certificates() {
        let (inv, issuer) = setup().await;
        let (book, first) = inv.submit_donation("978-0-1", &meta(), "d1", 1).await.unwrap();
        inv.submit_donation("978-0-1", &meta(), "d2", 1).await.unwrap();
        let (_, event) = inv.approve_book(&book.id, "admin").await.unwrap();

        issuer.issue_certificate(&first.id).await.unwrap();
        let issuance = issuer.handle(&event).await;
        assert_eq!(issuance.issued.len(), 1);
        assert_eq!(issuance.issued[0].user_id, "d2");
        assert!(issuance.uncertified.is_empty());

        let again = issuer.handle(&event).await;
        assert!(again.issued.is_empty());
        assert!(again.uncertified.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_transaction() {
        let (_, issuer) = setup().await;
        let err = issuer.issue_certificate("missing").await.unwrap_err();
        assert!(matches!(err, EngineError::Core(CoreError::TransactionNotFound(_))));
    }
}
