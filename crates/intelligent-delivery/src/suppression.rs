//! Suppression ledger: append-only record of why and when a contact was
//! excluded from sending. Shared by the hygiene sweep, outcome recording
//! and the send paths.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use uuid::Uuid;

use lifecycle_core::types::Suppression;

/// Reason written by the hygiene sweep.
pub const HYGIENE_RISK_REASON: &str = "hygiene-risk";
pub const BOUNCE_REASON: &str = "bounce";
pub const COMPLAINT_REASON: &str = "complaint";

/// Thread-safe ledger backed by `DashMap`, keyed by contact id.
#[derive(Default)]
pub struct SuppressionLedger {
    entries: DashMap<Uuid, Vec<Suppression>>,
}

impl SuppressionLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a suppression unconditionally.
    pub fn record(
        &self,
        contact_id: Uuid,
        reason: &str,
        source: &str,
        notes: Option<String>,
        now: DateTime<Utc>,
    ) -> Suppression {
        let entry = Suppression {
            id: Uuid::new_v4(),
            contact_id,
            reason: reason.to_string(),
            source: source.to_string(),
            notes,
            created_at: now,
        };
        self.entries
            .entry(contact_id)
            .or_default()
            .push(entry.clone());

        tracing::info!(
            contact_id = %contact_id,
            reason,
            source,
            "suppression recorded"
        );
        entry
    }

    /// Append a suppression unless one with the same reason already exists
    /// for the contact. Returns the new entry, if any.
    pub fn record_once(
        &self,
        contact_id: Uuid,
        reason: &str,
        source: &str,
        notes: Option<String>,
        now: DateTime<Utc>,
    ) -> Option<Suppression> {
        let mut list = self.entries.entry(contact_id).or_default();
        if list.iter().any(|e| e.reason == reason) {
            return None;
        }
        let entry = Suppression {
            id: Uuid::new_v4(),
            contact_id,
            reason: reason.to_string(),
            source: source.to_string(),
            notes,
            created_at: now,
        };
        list.push(entry.clone());
        drop(list);

        tracing::info!(
            contact_id = %contact_id,
            reason,
            source,
            "suppression recorded"
        );
        Some(entry)
    }

    pub fn has_reason(&self, contact_id: &Uuid, reason: &str) -> bool {
        self.entries
            .get(contact_id)
            .map(|list| list.iter().any(|e| e.reason == reason))
            .unwrap_or(false)
    }

    pub fn is_suppressed(&self, contact_id: &Uuid) -> bool {
        self.entries
            .get(contact_id)
            .map(|list| !list.is_empty())
            .unwrap_or(false)
    }

    pub fn entries_for(&self, contact_id: &Uuid) -> Vec<Suppression> {
        self.entries
            .get(contact_id)
            .map(|list| list.clone())
            .unwrap_or_default()
    }

    /// Total number of suppression entries across all contacts.
    pub fn count(&self) -> usize {
        self.entries.iter().map(|e| e.value().len()).sum()
    }

    pub fn count_reason(&self, reason: &str) -> usize {
        self.entries
            .iter()
            .map(|e| e.value().iter().filter(|s| s.reason == reason).count())
            .sum()
    }
}
