//! Send eligibility shared by flow sends and broadcasts.

use serde::Serialize;

use lifecycle_core::types::{Contact, ContactStatus};

use crate::suppression::SuppressionLedger;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Ineligible {
    MissingEmail,
    Status(ContactStatus),
    Suppressed(String),
}

impl Ineligible {
    pub fn reason(&self) -> String {
        match self {
            Self::MissingEmail => "Contact has no email address".to_string(),
            Self::Status(status) => format!("Contact status is {}", status.as_str()),
            Self::Suppressed(reason) => format!("Contact is suppressed ({reason})"),
        }
    }
}

/// A contact is sendable iff it has an email, is ACTIVE and has no ledger
/// entry.
pub fn check_eligibility(contact: &Contact, ledger: &SuppressionLedger) -> Result<(), Ineligible> {
    if contact.email_address().is_none() {
        return Err(Ineligible::MissingEmail);
    }
    if contact.status != ContactStatus::Active {
        return Err(Ineligible::Status(contact.status));
    }
    if let Some(entry) = ledger.entries_for(&contact.id).first() {
        return Err(Ineligible::Suppressed(entry.reason.clone()));
    }
    Ok(())
}
