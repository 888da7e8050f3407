//! # Book Events
//!
//! Review decisions the inventory emits after they commit. The certificate
//! issuer consumes them; other subscribers get them through
//! [`crate::Library::subscribe`].

use serde::Serialize;

/// A committed admin decision about a book or one of its donations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BookEvent {
    /// Book approved; every listed donation was completed as accepted.
    Approved {
        book_id: String,
        admin_id: String,
        completed_donations: Vec<String>,
    },

    /// Book rejected; every listed donation was completed as declined.
    Rejected {
        book_id: String,
        admin_id: String,
        completed_donations: Vec<String>,
    },

    /// Copies donated to an approved book were confirmed.
    DonationConfirmed {
        book_id: String,
        admin_id: String,
        transaction_id: String,
    },

    /// Copies donated to an approved book were declined.
    DonationDeclined {
        book_id: String,
        admin_id: String,
        transaction_id: String,
    },
}

impl BookEvent {
    /// The book this event is about.
    pub fn book_id(&self) -> &str {
        match self {
            BookEvent::Approved { book_id, .. }
            | BookEvent::Rejected { book_id, .. }
            | BookEvent::DonationConfirmed { book_id, .. }
            | BookEvent::DonationDeclined { book_id, .. } => book_id,
        }
    }

    /// Donation transactions that now deserve a certificate.
    pub fn certifiable_donations(&self) -> Vec<&str> {
        match self {
            BookEvent::Approved {
                completed_donations,
                ..
            } => completed_donations.iter().map(String::as_str).collect(),
            BookEvent::DonationConfirmed { transaction_id, .. } => vec![transaction_id.as_str()],
            BookEvent::Rejected { .. } | BookEvent::DonationDeclined { .. } => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_accepting_events_certify() {
        let approved = BookEvent::Approved {
            book_id: "b1".into(),
            admin_id: "admin".into(),
            completed_donations: vec!["t1".into(), "t2".into()],
        };
        assert_eq!(approved.certifiable_donations(), vec!["t1", "t2"]);
        assert_eq!(approved.book_id(), "b1");

        let rejected = BookEvent::Rejected {
            book_id: "b1".into(),
            admin_id: "admin".into(),
            completed_donations: vec!["t1".into()],
        };
        assert!(rejected.certifiable_donations().is_empty());

        let declined = BookEvent::DonationDeclined {
            book_id: "b1".into(),
            admin_id: "admin".into(),
            transaction_id: "t3".into(),
        };
        assert!(declined.certifiable_donations().is_empty());
    }

    #[test]
    fn test_event_serialization() {
        let event = BookEvent::DonationConfirmed {
            book_id: "b1".into(),
            admin_id: "admin".into(),
            transaction_id: "t3".into(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "donation_confirmed");
        assert_eq!(json["transaction_id"], "t3");
    }
}
