//! Deliverability hygiene: rule-based risk tiers per contact and the
//! periodic sweep that applies them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use lifecycle_core::config::HygieneConfig;
use lifecycle_core::error::LifecycleResult;
use lifecycle_core::event_bus::{make_event, EventSink, LifecycleEventType};
use lifecycle_core::store::{AuditLog, ContactStore};
use lifecycle_core::types::{Contact, ContactFilter, ContactStatus, HygieneEvaluation, RiskLevel};

use crate::suppression::{SuppressionLedger, HYGIENE_RISK_REASON};

const SEND_INACTIVITY_DAYS: f64 = 90.0;
const EVENT_INACTIVITY_DAYS: f64 = 60.0;
const LOW_PROPENSITY: f64 = 0.15;
const SCORE_EPSILON: f64 = 0.001;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskAssessment {
    pub risk_level: RiskLevel,
    pub score: f64,
    pub reasons: Vec<String>,
    pub should_suppress: bool,
}

/// Days elapsed since `at`; a missing timestamp counts as never.
fn days_since(at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> f64 {
    match at {
        Some(at) => (now - at).num_seconds() as f64 / 86_400.0,
        None => f64::INFINITY,
    }
}

/// Score one contact. Pure: no store access.
pub fn score(contact: &Contact, now: DateTime<Utc>) -> RiskAssessment {
    let terminal = match contact.status {
        ContactStatus::Bounced => Some((95.0, "Hard bounce detected")),
        ContactStatus::Complained => Some((98.0, "Complaint reported")),
        ContactStatus::Suppressed => Some((90.0, "Contact already suppressed")),
        ContactStatus::Active => None,
    };

    let mut assessment = match terminal {
        Some((score, reason)) => RiskAssessment {
            risk_level: RiskLevel::High,
            score,
            reasons: vec![reason.to_string()],
            should_suppress: true,
        },
        None => score_active(contact, now),
    };

    if assessment.risk_level == RiskLevel::High && contact.is_synthetic() {
        assessment.should_suppress = false;
        assessment
            .reasons
            .push("Synthetic contact safeguard".to_string());
    }

    assessment
}

fn score_active(contact: &Contact, now: DateTime<Utc>) -> RiskAssessment {
    let mut level = RiskLevel::Low;
    let mut score: f64 = 20.0;
    let mut reasons = Vec::new();

    let send_age = days_since(contact.last_send_at, now);
    let event_age = days_since(contact.last_event_at, now);

    if level != RiskLevel::High && send_age > SEND_INACTIVITY_DAYS {
        level = RiskLevel::Medium;
        score = score.max(65.0);
        reasons.push("No sends in last 90 days".to_string());
    }

    if level != RiskLevel::High && event_age > EVENT_INACTIVITY_DAYS {
        if level == RiskLevel::Low {
            level = RiskLevel::Medium;
        }
        score = score.max(55.0);
        reasons.push("No engagement events in last 60 days".to_string());
    }

    if let Some(propensity) = contact.propensity {
        if level != RiskLevel::High && propensity > 0.0 && propensity < LOW_PROPENSITY {
            if level == RiskLevel::Low {
                level = RiskLevel::Medium;
            }
            score = score.max(50.0);
            reasons.push("Low propensity segment".to_string());
        }
    }

    if level == RiskLevel::Low
        && contact.propensity.map_or(false, |p| p >= LOW_PROPENSITY)
        && event_age < EVENT_INACTIVITY_DAYS
    {
        score = 25.0;
        reasons.push("Healthy engagement".to_string());
    }

    RiskAssessment {
        risk_level: level,
        score,
        reasons,
        should_suppress: false,
    }
}

// ─── Sweep ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SweepOptions {
    /// `None` defers to configuration; only an explicit `false` disables
    /// auto-suppression.
    pub suppress_high_risk: Option<bool>,
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepSummary {
    pub evaluated: usize,
    pub high_risk: usize,
    pub medium_risk: usize,
    pub low_risk: usize,
    pub risk_updates: usize,
    pub contacts_suppressed: usize,
    pub suppressions_created: usize,
    pub failed: usize,
}

pub struct HygieneSweeper {
    contacts: Arc<dyn ContactStore>,
    audit: Arc<dyn AuditLog>,
    ledger: Arc<SuppressionLedger>,
    event_sink: Arc<dyn EventSink>,
    config: HygieneConfig,
}

impl HygieneSweeper {
    pub fn new(
        contacts: Arc<dyn ContactStore>,
        audit: Arc<dyn AuditLog>,
        ledger: Arc<SuppressionLedger>,
        config: HygieneConfig,
    ) -> Self {
        Self {
            contacts,
            audit,
            ledger,
            event_sink: lifecycle_core::event_bus::noop_sink(),
            config,
        }
    }

    /// Attach an event sink for suppression events.
    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.event_sink = sink;
        self
    }

    /// Score every contact (up to `limit`), write an evaluation for each,
    /// refresh changed risk fields and suppress newly high-risk contacts.
    pub fn sweep(
        &self,
        options: SweepOptions,
        now: DateTime<Utc>,
    ) -> LifecycleResult<SweepSummary> {
        let suppress = options
            .suppress_high_risk
            .unwrap_or(self.config.suppress_high_risk);
        let limit = options.limit.or(self.config.sweep_limit);
        let contacts = self.contacts.list(&ContactFilter {
            limit,
            ..Default::default()
        })?;

        let mut summary = SweepSummary::default();
        for contact in &contacts {
            let assessment = score(contact, now);
            summary.evaluated += 1;
            match assessment.risk_level {
                RiskLevel::High => summary.high_risk += 1,
                RiskLevel::Medium => summary.medium_risk += 1,
                RiskLevel::Low => summary.low_risk += 1,
            }

            if let Err(e) = self.apply(contact, &assessment, suppress, now, &mut summary) {
                warn!(contact_id = %contact.id, error = %e, "hygiene evaluation failed");
                summary.failed += 1;
            }
        }

        metrics::counter!("hygiene.evaluations").increment(summary.evaluated as u64);
        metrics::counter!("hygiene.suppressions").increment(summary.suppressions_created as u64);
        info!(
            evaluated = summary.evaluated,
            high = summary.high_risk,
            medium = summary.medium_risk,
            low = summary.low_risk,
            suppressed = summary.contacts_suppressed,
            suppressions_created = summary.suppressions_created,
            "hygiene sweep complete"
        );
        Ok(summary)
    }

    fn apply(
        &self,
        contact: &Contact,
        assessment: &RiskAssessment,
        suppress: bool,
        now: DateTime<Utc>,
        summary: &mut SweepSummary,
    ) -> LifecycleResult<()> {
        self.audit.record_evaluation(HygieneEvaluation {
            id: Uuid::new_v4(),
            contact_id: contact.id,
            risk_level: assessment.risk_level,
            score: assessment.score,
            suppressed: assessment.should_suppress,
            reasons: assessment.reasons.clone(),
            created_at: now,
        })?;

        let changed = contact.risk_level != Some(assessment.risk_level)
            || contact
                .risk_score
                .map_or(true, |prev| (prev - assessment.score).abs() > SCORE_EPSILON);
        if changed {
            self.contacts
                .update_risk(&contact.id, assessment.risk_level, assessment.score, now)?;
            summary.risk_updates += 1;
        }

        if assessment.should_suppress && suppress && contact.status != ContactStatus::Suppressed {
            self.contacts
                .update_status(&contact.id, ContactStatus::Suppressed)?;
            summary.contacts_suppressed += 1;

            let notes = Some(assessment.reasons.join("; "));
            if self
                .ledger
                .record_once(contact.id, HYGIENE_RISK_REASON, "hygiene-sweep", notes, now)
                .is_some()
            {
                summary.suppressions_created += 1;
            }

            self.event_sink.emit(make_event(
                LifecycleEventType::ContactSuppressed,
                contact.id,
                Some(contact.id),
                Some(HYGIENE_RISK_REASON.to_string()),
                now,
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use lifecycle_core::demo::{seed_synthetic_contacts, SyntheticMix};
    use lifecycle_core::event_bus::capture_sink;
    use lifecycle_core::memory::{InMemoryAuditLog, InMemoryContacts};

    fn healthy(now: DateTime<Utc>) -> Contact {
        let mut c = Contact::new("h@example.com", now);
        c.last_send_at = Some(now - Duration::days(3));
        c.last_event_at = Some(now - Duration::days(1));
        c.propensity = Some(0.4);
        c
    }

    #[test]
    fn test_terminal_statuses() {
        let now = Utc::now();
        let mut c = healthy(now);

        c.status = ContactStatus::Bounced;
        let a = score(&c, now);
        assert_eq!((a.risk_level, a.score), (RiskLevel::High, 95.0));
        assert_eq!(a.reasons, vec!["Hard bounce detected"]);
        assert!(a.should_suppress);

        c.status = ContactStatus::Complained;
        let a = score(&c, now);
        assert_eq!((a.risk_level, a.score), (RiskLevel::High, 98.0));

        c.status = ContactStatus::Suppressed;
        let a = score(&c, now);
        assert_eq!(a.score, 90.0);
        assert_eq!(a.reasons, vec!["Contact already suppressed"]);
    }

    #[test]
    fn test_thresholds_are_strict() {
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();

        // Exactly 90 days since the last send does not count as dormant.
        let mut c = healthy(now);
        c.last_send_at = Some(now - Duration::days(90));
        let a = score(&c, now);
        assert_eq!((a.risk_level, a.score), (RiskLevel::Low, 25.0));
        assert_eq!(a.reasons, vec!["Healthy engagement"]);

        c.last_send_at = Some(now - Duration::days(90) - Duration::seconds(1));
        let a = score(&c, now);
        assert_eq!((a.risk_level, a.score), (RiskLevel::Medium, 65.0));

        // Exactly 60 days since the last event: neither dormant nor healthy.
        let mut c = healthy(now);
        c.last_event_at = Some(now - Duration::days(60));
        let a = score(&c, now);
        assert_eq!((a.risk_level, a.score), (RiskLevel::Low, 20.0));
        assert!(a.reasons.is_empty());

        // Propensity of exactly 0.15 is healthy, not low.
        let mut c = healthy(now);
        c.propensity = Some(0.15);
        let a = score(&c, now);
        assert_eq!((a.risk_level, a.score), (RiskLevel::Low, 25.0));
        assert_eq!(a.reasons, vec!["Healthy engagement"]);
    }

    #[test]
    fn test_healthy_contact() {
        let now = Utc::now();
        let a = score(&healthy(now), now);
        assert_eq!(a.risk_level, RiskLevel::Low);
        assert_eq!(a.score, 25.0);
        assert_eq!(a.reasons, vec!["Healthy engagement"]);
        assert!(!a.should_suppress);
    }

    #[test]
    fn test_inactivity_checks_accumulate() {
        let now = Utc::now();
        let mut c = healthy(now);
        c.last_send_at = Some(now - Duration::days(120));
        c.last_event_at = Some(now - Duration::days(70));
        c.propensity = Some(0.05);

        let a = score(&c, now);
        assert_eq!(a.risk_level, RiskLevel::Medium);
        assert_eq!(a.score, 65.0);
        assert_eq!(
            a.reasons,
            vec![
                "No sends in last 90 days",
                "No engagement events in last 60 days",
                "Low propensity segment",
            ]
        );
        assert!(!a.should_suppress);
    }

    #[test]
    fn test_low_propensity_alone() {
        let now = Utc::now();
        let mut c = healthy(now);
        c.propensity = Some(0.1);
        let a = score(&c, now);
        assert_eq!((a.risk_level, a.score), (RiskLevel::Medium, 50.0));

        // Zero propensity is "unknown", not low.
        c.propensity = Some(0.0);
        let a = score(&c, now);
        assert_eq!((a.risk_level, a.score), (RiskLevel::Low, 20.0));
        assert!(a.reasons.is_empty());
    }

    #[test]
    fn test_missing_history_counts_as_inactive() {
        let now = Utc::now();
        let c = Contact::new("new@example.com", now);
        let a = score(&c, now);
        assert_eq!(a.risk_level, RiskLevel::Medium);
        assert_eq!(a.score, 65.0);
        assert_eq!(a.reasons.len(), 2);
    }

    #[test]
    fn test_synthetic_complaint_safeguard() {
        let now = Utc::now();
        let mut c = healthy(now).with_tag("synthetic");
        c.status = ContactStatus::Complained;
        let a = score(&c, now);
        assert_eq!(a.risk_level, RiskLevel::High);
        assert_eq!(a.score, 98.0);
        assert!(!a.should_suppress);
        assert_eq!(a.reasons.last().unwrap(), "Synthetic contact safeguard");
    }

    struct Harness {
        contacts: Arc<InMemoryContacts>,
        audit: Arc<InMemoryAuditLog>,
        ledger: Arc<SuppressionLedger>,
        sweeper: HygieneSweeper,
    }

    fn harness() -> Harness {
        let contacts = Arc::new(InMemoryContacts::new());
        let audit = Arc::new(InMemoryAuditLog::new());
        let ledger = Arc::new(SuppressionLedger::new());
        let sweeper = HygieneSweeper::new(
            contacts.clone(),
            audit.clone(),
            ledger.clone(),
            HygieneConfig::default(),
        );
        Harness {
            contacts,
            audit,
            ledger,
            sweeper,
        }
    }

    #[test]
    fn test_sweep_synthetic_population() {
        let h = harness();
        let now = Utc::now();
        seed_synthetic_contacts(h.contacts.as_ref(), SyntheticMix::default(), now, 42).unwrap();

        let summary = h
            .sweeper
            .sweep(
                SweepOptions {
                    suppress_high_risk: Some(true),
                    limit: None,
                },
                now,
            )
            .unwrap();

        assert_eq!(summary.evaluated, 228);
        assert!(summary.high_risk >= 28);
        assert_eq!(summary.contacts_suppressed, 20);
        assert_eq!(summary.suppressions_created, 20);
        assert_eq!(summary.failed, 0);
        assert_eq!(h.audit.evaluation_count(), 228);

        let suppressed = h
            .contacts
            .list(&ContactFilter {
                status: Some(ContactStatus::Suppressed),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(suppressed.len(), 25);

        let complained = h
            .contacts
            .list(&ContactFilter {
                status: Some(ContactStatus::Complained),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(complained.len(), 3);
    }

    #[test]
    fn test_repeated_sweeps_do_not_duplicate_suppressions() {
        let h = harness();
        let now = Utc::now();
        seed_synthetic_contacts(h.contacts.as_ref(), SyntheticMix::default(), now, 42).unwrap();

        h.sweeper.sweep(SweepOptions::default(), now).unwrap();
        let second = h.sweeper.sweep(SweepOptions::default(), now).unwrap();

        assert_eq!(second.contacts_suppressed, 0);
        assert_eq!(second.suppressions_created, 0);
        // Only the freshly suppressed contacts move from 95 to 90.
        assert_eq!(second.risk_updates, 20);
        assert_eq!(h.ledger.count_reason(HYGIENE_RISK_REASON), 20);
        assert_eq!(h.audit.evaluation_count(), 456);
    }

    #[test]
    fn test_sweep_respects_explicit_opt_out() {
        let h = harness();
        let now = Utc::now();
        let mut bounced = Contact::new("b@example.com", now);
        bounced.status = ContactStatus::Bounced;
        let id = bounced.id;
        h.contacts.upsert(bounced).unwrap();

        let summary = h
            .sweeper
            .sweep(
                SweepOptions {
                    suppress_high_risk: Some(false),
                    limit: None,
                },
                now,
            )
            .unwrap();
        assert_eq!(summary.high_risk, 1);
        assert_eq!(summary.contacts_suppressed, 0);
        assert_eq!(h.ledger.count(), 0);

        let stored = h.contacts.get(&id).unwrap().unwrap();
        assert_eq!(stored.status, ContactStatus::Bounced);
        assert_eq!(stored.risk_level, Some(RiskLevel::High));
        assert_eq!(stored.risk_score, Some(95.0));
    }

    #[test]
    fn test_sweep_limit_and_events() {
        let contacts = Arc::new(InMemoryContacts::new());
        let sink = capture_sink();
        let sweeper = HygieneSweeper::new(
            contacts.clone(),
            Arc::new(InMemoryAuditLog::new()),
            Arc::new(SuppressionLedger::new()),
            HygieneConfig::default(),
        )
        .with_event_sink(sink.clone());

        let now = Utc::now();
        for i in 0..4 {
            let mut c = Contact::new(format!("b{i}@example.com"), now + Duration::seconds(i));
            c.status = ContactStatus::Bounced;
            contacts.upsert(c).unwrap();
        }

        let summary = sweeper
            .sweep(
                SweepOptions {
                    suppress_high_risk: None,
                    limit: Some(3),
                },
                now,
            )
            .unwrap();
        assert_eq!(summary.evaluated, 3);
        assert_eq!(summary.contacts_suppressed, 3);
        assert_eq!(sink.count_type(LifecycleEventType::ContactSuppressed), 3);
    }
}
