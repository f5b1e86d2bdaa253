//! `DashMap`-backed implementations of the storage contracts.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::collections::HashSet;
use uuid::Uuid;

use crate::error::{LifecycleError, LifecycleResult};
use crate::store::{AuditLog, ContactStore, MessageStore, SegmentMembership};
use crate::types::{
    Contact, ContactFilter, ContactStatus, HygieneEvaluation, Message, MessageOutcome,
    MessageStatus, OptimizerDecision, RiskLevel,
};

// ─── Contacts ───────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct InMemoryContacts {
    contacts: DashMap<Uuid, Contact>,
}

impl InMemoryContacts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.contacts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contacts.is_empty()
    }

    fn modify(&self, id: &Uuid, f: impl FnOnce(&mut Contact)) -> LifecycleResult<()> {
        let mut entry = self
            .contacts
            .get_mut(id)
            .ok_or_else(|| LifecycleError::not_found("Contact", id))?;
        f(entry.value_mut());
        Ok(())
    }
}

impl ContactStore for InMemoryContacts {
    fn get(&self, id: &Uuid) -> LifecycleResult<Option<Contact>> {
        Ok(self.contacts.get(id).map(|c| c.clone()))
    }

    fn upsert(&self, contact: Contact) -> LifecycleResult<()> {
        self.contacts.insert(contact.id, contact);
        Ok(())
    }

    fn update_status(&self, id: &Uuid, status: ContactStatus) -> LifecycleResult<()> {
        self.modify(id, |c| {
            c.status = status;
            c.updated_at = Utc::now();
        })
    }

    fn record_send(&self, id: &Uuid, at: DateTime<Utc>) -> LifecycleResult<()> {
        self.modify(id, |c| {
            c.last_send_at = Some(at);
            c.updated_at = at;
        })
    }

    fn record_event(&self, id: &Uuid, at: DateTime<Utc>) -> LifecycleResult<()> {
        self.modify(id, |c| {
            if c.last_event_at.map_or(true, |prev| prev < at) {
                c.last_event_at = Some(at);
            }
            c.updated_at = at;
        })
    }

    fn update_risk(
        &self,
        id: &Uuid,
        level: RiskLevel,
        score: f64,
        at: DateTime<Utc>,
    ) -> LifecycleResult<()> {
        self.modify(id, |c| {
            c.risk_level = Some(level);
            c.risk_score = Some(score);
            c.risk_evaluated_at = Some(at);
            c.updated_at = at;
        })
    }

    fn list(&self, filter: &ContactFilter) -> LifecycleResult<Vec<Contact>> {
        let mut contacts: Vec<Contact> = self
            .contacts
            .iter()
            .filter(|c| filter.matches(c.value()))
            .map(|c| c.value().clone())
            .collect();
        contacts.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        if let Some(limit) = filter.limit {
            contacts.truncate(limit);
        }
        Ok(contacts)
    }
}

// ─── Segments ───────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct InMemorySegments {
    members: DashMap<Uuid, HashSet<Uuid>>,
}

impl InMemorySegments {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_member(&self, segment_id: Uuid, contact_id: Uuid) {
        self.members.entry(segment_id).or_default().insert(contact_id);
    }

    pub fn remove_member(&self, segment_id: &Uuid, contact_id: &Uuid) {
        if let Some(mut set) = self.members.get_mut(segment_id) {
            set.remove(contact_id);
        }
    }
}

impl SegmentMembership for InMemorySegments {
    fn is_member(&self, segment_id: &Uuid, contact_id: &Uuid) -> LifecycleResult<bool> {
        Ok(self
            .members
            .get(segment_id)
            .map(|set| set.contains(contact_id))
            .unwrap_or(false))
    }
}

// ─── Messages ───────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct InMemoryMessages {
    messages: DashMap<Uuid, Message>,
    outcomes: DashMap<Uuid, MessageOutcome>,
}

impl InMemoryMessages {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn all(&self) -> Vec<Message> {
        let mut messages: Vec<Message> = self.messages.iter().map(|m| m.value().clone()).collect();
        messages.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        messages
    }

    pub fn outcome(&self, message_id: &Uuid) -> Option<MessageOutcome> {
        self.outcomes.get(message_id).map(|o| o.clone())
    }
}

impl MessageStore for InMemoryMessages {
    fn create(&self, message: Message) -> LifecycleResult<()> {
        self.messages.insert(message.id, message);
        Ok(())
    }

    fn list_for_contact(&self, contact_id: &Uuid) -> LifecycleResult<Vec<Message>> {
        Ok(self
            .all()
            .into_iter()
            .filter(|m| m.contact_id == *contact_id)
            .collect())
    }

    fn sent_with_outcomes(&self) -> LifecycleResult<Vec<(Message, Option<MessageOutcome>)>> {
        Ok(self
            .all()
            .into_iter()
            .filter(|m| m.status == MessageStatus::Sent)
            .map(|m| {
                let outcome = self.outcome(&m.id);
                (m, outcome)
            })
            .collect())
    }

    fn upsert_outcome(&self, outcome: MessageOutcome) -> LifecycleResult<()> {
        if !self.messages.contains_key(&outcome.message_id) {
            return Err(LifecycleError::not_found("Message", outcome.message_id));
        }
        self.outcomes.insert(outcome.message_id, outcome);
        Ok(())
    }

    fn get(&self, id: &Uuid) -> LifecycleResult<Option<Message>> {
        Ok(self.messages.get(id).map(|m| m.clone()))
    }
}

// ─── Audit log ──────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct InMemoryAuditLog {
    decisions: DashMap<Uuid, Vec<OptimizerDecision>>,
    evaluations: DashMap<Uuid, Vec<HygieneEvaluation>>,
}

impl InMemoryAuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn decision_count(&self) -> usize {
        self.decisions.iter().map(|e| e.value().len()).sum()
    }

    pub fn evaluation_count(&self) -> usize {
        self.evaluations.iter().map(|e| e.value().len()).sum()
    }
}

impl AuditLog for InMemoryAuditLog {
    fn record_decision(&self, decision: OptimizerDecision) -> LifecycleResult<()> {
        self.decisions
            .entry(decision.contact_id)
            .or_default()
            .push(decision);
        Ok(())
    }

    fn record_evaluation(&self, evaluation: HygieneEvaluation) -> LifecycleResult<()> {
        self.evaluations
            .entry(evaluation.contact_id)
            .or_default()
            .push(evaluation);
        Ok(())
    }

    fn decisions_for(&self, contact_id: &Uuid) -> LifecycleResult<Vec<OptimizerDecision>> {
        Ok(self
            .decisions
            .get(contact_id)
            .map(|d| d.clone())
            .unwrap_or_default())
    }

    fn evaluations_for(&self, contact_id: &Uuid) -> LifecycleResult<Vec<HygieneEvaluation>> {
        Ok(self
            .evaluations
            .get(contact_id)
            .map(|e| e.clone())
            .unwrap_or_default())
    }
}
