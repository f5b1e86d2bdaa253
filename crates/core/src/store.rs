//! Storage contracts consumed by the lifecycle engines.
//!
//! Persistence technology is a collaborator concern; the engines only see
//! these traits. In-memory implementations live in [`crate::memory`].

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::LifecycleResult;
use crate::types::{
    Contact, ContactFilter, ContactStatus, HygieneEvaluation, Message, MessageOutcome,
    OptimizerDecision, RiskLevel,
};

pub trait ContactStore: Send + Sync {
    fn get(&self, id: &Uuid) -> LifecycleResult<Option<Contact>>;

    fn upsert(&self, contact: Contact) -> LifecycleResult<()>;

    fn update_status(&self, id: &Uuid, status: ContactStatus) -> LifecycleResult<()>;

    fn record_send(&self, id: &Uuid, at: DateTime<Utc>) -> LifecycleResult<()>;

    fn record_event(&self, id: &Uuid, at: DateTime<Utc>) -> LifecycleResult<()>;

    fn update_risk(
        &self,
        id: &Uuid,
        level: RiskLevel,
        score: f64,
        at: DateTime<Utc>,
    ) -> LifecycleResult<()>;

    /// Contacts matching `filter`, ordered by creation time then id.
    fn list(&self, filter: &ContactFilter) -> LifecycleResult<Vec<Contact>>;
}

/// Point lookups into precomputed segment membership.
pub trait SegmentMembership: Send + Sync {
    fn is_member(&self, segment_id: &Uuid, contact_id: &Uuid) -> LifecycleResult<bool>;
}

pub trait MessageStore: Send + Sync {
    fn create(&self, message: Message) -> LifecycleResult<()>;

    fn list_for_contact(&self, contact_id: &Uuid) -> LifecycleResult<Vec<Message>>;

    /// Every SENT message joined with its outcome, if one was reported.
    fn sent_with_outcomes(&self) -> LifecycleResult<Vec<(Message, Option<MessageOutcome>)>>;

    fn upsert_outcome(&self, outcome: MessageOutcome) -> LifecycleResult<()>;

    fn get(&self, id: &Uuid) -> LifecycleResult<Option<Message>>;
}

/// Sink for the immutable optimizer and hygiene audit trail.
pub trait AuditLog: Send + Sync {
    fn record_decision(&self, decision: OptimizerDecision) -> LifecycleResult<()>;

    fn record_evaluation(&self, evaluation: HygieneEvaluation) -> LifecycleResult<()>;

    fn decisions_for(&self, contact_id: &Uuid) -> LifecycleResult<Vec<OptimizerDecision>>;

    fn evaluations_for(&self, contact_id: &Uuid) -> LifecycleResult<Vec<HygieneEvaluation>>;
}
