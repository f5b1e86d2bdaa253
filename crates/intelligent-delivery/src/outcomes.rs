//! Message outcome recording: applies provider feedback to contacts, the
//! suppression ledger and the histogram cache.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::info;

use lifecycle_core::error::{LifecycleError, LifecycleResult};
use lifecycle_core::store::{ContactStore, MessageStore};
use lifecycle_core::types::{ContactStatus, MessageOutcome};

use crate::histogram::HistogramStore;
use crate::suppression::{SuppressionLedger, BOUNCE_REASON, COMPLAINT_REASON};

const OUTCOME_SOURCE: &str = "webhook";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct OutcomeEffect {
    pub status_change: Option<ContactStatus>,
    pub suppression_created: bool,
}

pub struct OutcomeRecorder {
    messages: Arc<dyn MessageStore>,
    contacts: Arc<dyn ContactStore>,
    ledger: Arc<SuppressionLedger>,
    histograms: Arc<HistogramStore>,
}

impl OutcomeRecorder {
    pub fn new(
        messages: Arc<dyn MessageStore>,
        contacts: Arc<dyn ContactStore>,
        ledger: Arc<SuppressionLedger>,
        histograms: Arc<HistogramStore>,
    ) -> Self {
        Self {
            messages,
            contacts,
            ledger,
            histograms,
        }
    }

    /// Upsert `outcome`. Complaints and bounces move an ACTIVE contact to the
    /// matching exclusion status and add one ledger entry per reason.
    pub fn record(
        &self,
        outcome: MessageOutcome,
        now: DateTime<Utc>,
    ) -> LifecycleResult<OutcomeEffect> {
        let message = self
            .messages
            .get(&outcome.message_id)?
            .ok_or_else(|| LifecycleError::not_found("Message", outcome.message_id))?;
        let contact = self
            .contacts
            .get(&message.contact_id)?
            .ok_or_else(|| LifecycleError::not_found("Contact", message.contact_id))?;

        let exclusion = if outcome.complained {
            Some((ContactStatus::Complained, COMPLAINT_REASON))
        } else if outcome.bounced {
            Some((ContactStatus::Bounced, BOUNCE_REASON))
        } else {
            None
        };

        self.messages.upsert_outcome(outcome)?;
        self.histograms.invalidate();

        let mut effect = OutcomeEffect::default();
        if let Some((status, reason)) = exclusion {
            if contact.status == ContactStatus::Active {
                self.contacts.update_status(&contact.id, status)?;
                effect.status_change = Some(status);
            }
            effect.suppression_created = self
                .ledger
                .record_once(contact.id, reason, OUTCOME_SOURCE, None, now)
                .is_some();
            info!(
                contact_id = %contact.id,
                message_id = %message.id,
                reason,
                "exclusion outcome recorded"
            );
        }

        Ok(effect)
    }
}
