//! Send-time optimization: picks the hour-of-week a contact is most likely
//! to click, with segment fallback and a post-send cooldown.

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use lifecycle_core::config::OptimizerConfig;
use lifecycle_core::error::{LifecycleError, LifecycleResult};
use lifecycle_core::store::{AuditLog, ContactStore};
use lifecycle_core::types::{ContactStatus, DecisionRationale, OptimizerDecision};

use crate::histogram::HistogramStore;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recommendation {
    pub contact_id: Uuid,
    /// Winning hour-of-week; `None` for contacts that cannot be sent to.
    pub hour: Option<u32>,
    pub send_at: Option<DateTime<Utc>>,
    pub score: f64,
    /// Score of the same hour against the global histogram.
    pub baseline_score: f64,
    pub reason: String,
    pub throttled: bool,
    pub segment: Option<String>,
}

impl Recommendation {
    fn inactive(contact_id: Uuid, status: ContactStatus) -> Self {
        Self {
            contact_id,
            hour: None,
            send_at: None,
            score: 0.0,
            baseline_score: 0.0,
            reason: format!("contact inactive ({})", status.as_str()),
            throttled: false,
            segment: None,
        }
    }

    /// Relative improvement of the personalised score over the baseline.
    pub fn uplift(&self) -> f64 {
        if self.baseline_score > 0.0 {
            self.score / self.baseline_score - 1.0
        } else {
            0.0
        }
    }
}

/// Anything that can recommend a send instant for a contact.
pub trait SendTimeAdvisor: Send + Sync {
    fn recommend(
        &self,
        contact_id: &Uuid,
        reference: DateTime<Utc>,
    ) -> LifecycleResult<Recommendation>;
}

pub struct SendTimeOptimizer {
    contacts: Arc<dyn ContactStore>,
    histograms: Arc<HistogramStore>,
    audit: Arc<dyn AuditLog>,
    config: OptimizerConfig,
}

impl SendTimeOptimizer {
    pub fn new(
        contacts: Arc<dyn ContactStore>,
        histograms: Arc<HistogramStore>,
        audit: Arc<dyn AuditLog>,
        config: OptimizerConfig,
    ) -> Self {
        Self {
            contacts,
            histograms,
            audit,
            config,
        }
    }

    pub fn histograms(&self) -> &Arc<HistogramStore> {
        &self.histograms
    }

    /// Drop cached histograms; the next recommendation rebuilds them.
    pub fn invalidate(&self) {
        self.histograms.invalidate();
    }
}

impl SendTimeAdvisor for SendTimeOptimizer {
    fn recommend(
        &self,
        contact_id: &Uuid,
        reference: DateTime<Utc>,
    ) -> LifecycleResult<Recommendation> {
        let contact = self
            .contacts
            .get(contact_id)?
            .ok_or_else(|| LifecycleError::not_found("Contact", contact_id))?;

        if contact.status != ContactStatus::Active {
            self.audit.record_decision(OptimizerDecision {
                id: Uuid::new_v4(),
                contact_id: contact.id,
                hour_of_week: None,
                score: 0.0,
                baseline_score: 0.0,
                rationale: DecisionRationale {
                    segment: contact.segment().map(str::to_string),
                    segment_has_data: false,
                    throttled: false,
                    send_at: None,
                },
                created_at: reference,
            })?;
            metrics::counter!("optimizer.inactive").increment(1);
            return Ok(Recommendation::inactive(contact.id, contact.status));
        }

        let alpha = self.config.smoothing_alpha;
        let default_prior = self.config.default_prior;
        let set = self.histograms.histograms(reference)?;

        let segment = contact.segment().map(str::to_string);
        let segment_histogram = segment
            .as_deref()
            .and_then(|name| set.segment(name))
            .filter(|h| h.has_data());
        let segment_has_data = segment_histogram.is_some();
        let histogram = segment_histogram.unwrap_or(&set.global);

        let (hour, score) = histogram.best_hour(alpha, default_prior);
        let baseline_score = set.global.score(hour, alpha, default_prior);

        let tz = contact
            .timezone
            .as_deref()
            .and_then(|name| name.parse::<Tz>().ok())
            .unwrap_or(Tz::UTC);
        let mut send_at = next_occurrence(hour, reference, tz);

        let mut throttled = false;
        if let Some(last_send) = contact.last_send_at {
            let earliest = last_send + Duration::hours(self.config.cooldown_hours);
            if reference < earliest {
                throttled = true;
            }
            if send_at < earliest {
                send_at = next_occurrence(hour, earliest, tz);
            }
        }

        let reason = match (&segment, segment_has_data) {
            (Some(name), true) => format!("segment histogram ({name})"),
            (Some(name), false) => format!("global histogram (segment {name} has no sends)"),
            (None, _) => "global histogram".to_string(),
        };

        self.audit.record_decision(OptimizerDecision {
            id: Uuid::new_v4(),
            contact_id: contact.id,
            hour_of_week: Some(hour),
            score,
            baseline_score,
            rationale: DecisionRationale {
                segment: segment.clone(),
                segment_has_data,
                throttled,
                send_at: Some(send_at),
            },
            created_at: reference,
        })?;

        metrics::counter!("optimizer.recommendations").increment(1);
        if throttled {
            metrics::counter!("optimizer.throttled").increment(1);
        }
        debug!(
            contact_id = %contact.id,
            hour,
            score,
            baseline_score,
            throttled,
            send_at = %send_at,
            "send time recommended"
        );

        Ok(Recommendation {
            contact_id: contact.id,
            hour: Some(hour),
            send_at: Some(send_at),
            score,
            baseline_score,
            reason,
            throttled,
            segment,
        })
    }
}

/// Next instant strictly after `from` whose local weekday/hour in `tz`
/// matches `hour_of_week`.
pub fn next_occurrence(hour_of_week: u32, from: DateTime<Utc>, tz: Tz) -> DateTime<Utc> {
    let target_day = (hour_of_week / 24) % 7;
    let target_hour = hour_of_week % 24;

    let local = from.with_timezone(&tz);
    let current_day = local.weekday().num_days_from_sunday();
    let day_delta = (target_day + 7 - current_day) % 7;
    let date = local.date_naive() + Duration::days(i64::from(day_delta));

    let candidate = resolve_local(tz, date, target_hour);
    if candidate > from {
        candidate
    } else {
        resolve_local(tz, date + Duration::days(7), target_hour)
    }
}

/// Map a local wall-clock hour to UTC. Ambiguous times take the earlier
/// instant; times skipped by a DST jump move forward an hour.
fn resolve_local(tz: Tz, date: NaiveDate, hour: u32) -> DateTime<Utc> {
    let naive = date.and_time(NaiveTime::from_hms_opt(hour, 0, 0).unwrap_or(NaiveTime::MIN));
    tz.from_local_datetime(&naive)
        .earliest()
        .or_else(|| tz.from_local_datetime(&(naive + Duration::hours(1))).earliest())
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or_else(|| Utc.from_utc_datetime(&naive))
}

#[cfg(test)]
mod tests {
    use super::*;
    use lifecycle_core::types::hour_of_week;
    use lifecycle_core::memory::{InMemoryAuditLog, InMemoryContacts, InMemoryMessages};
    use lifecycle_core::store::MessageStore;
    use lifecycle_core::types::{Contact, Message, MessageOutcome, MessageStatus};

    struct Harness {
        contacts: Arc<InMemoryContacts>,
        messages: Arc<InMemoryMessages>,
        audit: Arc<InMemoryAuditLog>,
        optimizer: SendTimeOptimizer,
    }

    fn harness() -> Harness {
        let contacts = Arc::new(InMemoryContacts::new());
        let messages = Arc::new(InMemoryMessages::new());
        let audit = Arc::new(InMemoryAuditLog::new());
        let histograms = Arc::new(HistogramStore::new(
            messages.clone(),
            contacts.clone(),
            Duration::seconds(60),
        ));
        let optimizer = SendTimeOptimizer::new(
            contacts.clone(),
            histograms,
            audit.clone(),
            OptimizerConfig::default(),
        );
        Harness {
            contacts,
            messages,
            audit,
            optimizer,
        }
    }

    fn sent(h: &Harness, contact_id: Uuid, at: DateTime<Utc>, clicked: bool) {
        let message = Message {
            id: Uuid::new_v4(),
            contact_id,
            flow_id: None,
            run_id: None,
            template_id: None,
            subject: "s".into(),
            status: MessageStatus::Sent,
            provider_message_id: None,
            scheduled_at: None,
            sent_at: Some(at),
            created_at: at,
        };
        let id = message.id;
        h.messages.create(message).unwrap();
        h.messages
            .upsert_outcome(MessageOutcome {
                message_id: id,
                clicked,
                ..Default::default()
            })
            .unwrap();
    }

    // Monday 2024-01-08 00:00 UTC.
    fn monday() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 8, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_unknown_contact_is_not_found() {
        let h = harness();
        let err = h.optimizer.recommend(&Uuid::new_v4(), monday()).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_inactive_contact_short_circuits() {
        let h = harness();
        let mut contact = Contact::new("b@example.com", monday());
        contact.status = ContactStatus::Bounced;
        let id = contact.id;
        h.contacts.upsert(contact).unwrap();

        let rec = h.optimizer.recommend(&id, monday()).unwrap();
        assert_eq!(rec.hour, None);
        assert_eq!(rec.send_at, None);
        assert_eq!(rec.score, 0.0);
        assert!(!h.optimizer.histograms().is_warm());

        let decisions = h.audit.decisions_for(&id).unwrap();
        assert_eq!(decisions.len(), 1);
        assert_eq!(decisions[0].hour_of_week, None);
        assert_eq!(decisions[0].rationale.send_at, None);
    }

    #[test]
    fn test_empty_history_picks_first_hour() {
        let h = harness();
        let contact = Contact::new("a@example.com", monday());
        let id = contact.id;
        h.contacts.upsert(contact).unwrap();

        // Tuesday 10:00; hour 0 (Sunday 00:00) is next on Sunday 2024-01-14.
        let reference = monday() + Duration::hours(34);
        let rec = h.optimizer.recommend(&id, reference).unwrap();
        assert_eq!(rec.hour, Some(0));
        assert!((rec.score - 0.05).abs() < 1e-12);
        assert_eq!(
            rec.send_at,
            Some(Utc.with_ymd_and_hms(2024, 1, 14, 0, 0, 0).unwrap())
        );
        assert!(!rec.throttled);
        assert_eq!(h.audit.decisions_for(&id).unwrap().len(), 1);
    }

    #[test]
    fn test_segment_histogram_preferred_when_populated() {
        let h = harness();
        let now = monday();
        let vip = Contact::new("vip@example.com", now).with_tag("segment=vip");
        let other = Contact::new("o@example.com", now);
        let (vip_id, other_id) = (vip.id, other.id);
        h.contacts.upsert(vip).unwrap();
        h.contacts.upsert(other).unwrap();

        // Globally Wednesday 15:00 wins; the vip segment clicks Monday 09:00.
        let wed_15 = Utc.with_ymd_and_hms(2024, 1, 3, 15, 0, 0).unwrap();
        let mon_09 = Utc.with_ymd_and_hms(2024, 1, 1, 9, 0, 0).unwrap();
        for _ in 0..20 {
            sent(&h, other_id, wed_15, true);
        }
        for _ in 0..3 {
            sent(&h, vip_id, mon_09, true);
        }
        let thu_12 = Utc.with_ymd_and_hms(2024, 1, 4, 12, 0, 0).unwrap();
        for _ in 0..5 {
            sent(&h, vip_id, thu_12, false);
        }

        let rec = h.optimizer.recommend(&vip_id, now).unwrap();
        assert_eq!(rec.hour, Some(hour_of_week(mon_09)));
        assert_eq!(rec.segment.as_deref(), Some("vip"));
        assert!(rec.reason.starts_with("segment"));
        assert_eq!(rec.send_at, Some(now + Duration::hours(9)));
        let global = h.optimizer.histograms().histograms(now).unwrap();
        let expected_baseline = global.global.score(33, 5.0, 0.05);
        assert!((rec.baseline_score - expected_baseline).abs() < 1e-12);

        let rec = h.optimizer.recommend(&other_id, now).unwrap();
        assert_eq!(rec.hour, Some(hour_of_week(wed_15)));
        assert!((rec.score - rec.baseline_score).abs() < 1e-12);
    }

    #[test]
    fn test_segment_without_sends_falls_back_to_global() {
        let h = harness();
        let now = monday();
        let contact = Contact::new("n@example.com", now).with_tag("segment=new");
        let id = contact.id;
        h.contacts.upsert(contact).unwrap();

        let rec = h.optimizer.recommend(&id, now).unwrap();
        let decision = &h.audit.decisions_for(&id).unwrap()[0];
        assert_eq!(decision.rationale.segment.as_deref(), Some("new"));
        assert!(!decision.rationale.segment_has_data);
        assert!(rec.reason.contains("has no sends"));
    }

    #[test]
    fn test_cooldown_throttles_and_pushes_out() {
        let h = harness();
        let last_send = monday();
        let mut contact = Contact::new("a@example.com", last_send);
        contact.last_send_at = Some(last_send);
        let id = contact.id;
        h.contacts.upsert(contact).unwrap();

        // Everyone clicks Monday 02:00, one hour after the reference.
        let mon_02 = Utc.with_ymd_and_hms(2024, 1, 1, 2, 0, 0).unwrap();
        let other = Contact::new("o@example.com", last_send);
        let other_id = other.id;
        h.contacts.upsert(other).unwrap();
        let wed_15 = Utc.with_ymd_and_hms(2024, 1, 3, 15, 0, 0).unwrap();
        for _ in 0..10 {
            sent(&h, other_id, mon_02, true);
            sent(&h, other_id, wed_15, false);
        }

        let reference = last_send + Duration::hours(1);
        let rec = h.optimizer.recommend(&id, reference).unwrap();
        assert!(rec.throttled);
        let send_at = rec.send_at.unwrap();
        assert!(send_at >= last_send + Duration::hours(24));
        assert_eq!(send_at, last_send + Duration::days(7) + Duration::hours(2));
        assert_eq!(rec.hour, Some(hour_of_week(mon_02)));
    }

    #[test]
    fn test_cooldown_elapsed_not_throttled() {
        let h = harness();
        let mut contact = Contact::new("a@example.com", monday());
        contact.last_send_at = Some(monday() - Duration::days(3));
        let id = contact.id;
        h.contacts.upsert(contact).unwrap();

        let rec = h.optimizer.recommend(&id, monday()).unwrap();
        assert!(!rec.throttled);
    }

    #[test]
    fn test_next_occurrence_utc() {
        let from = monday() + Duration::hours(9);
        // Same hour-of-week as `from` is pushed a full week.
        assert_eq!(next_occurrence(33, from, Tz::UTC), from + Duration::days(7));
        assert_eq!(
            next_occurrence(34, from, Tz::UTC),
            from + Duration::hours(1)
        );
        assert_eq!(
            next_occurrence(32, from, Tz::UTC),
            from + Duration::days(7) - Duration::hours(1)
        );
    }

    #[test]
    fn test_next_occurrence_in_contact_timezone() {
        let tz: Tz = "Asia/Tokyo".parse().unwrap();
        // Monday 00:00 UTC is Monday 09:00 in Tokyo; Monday 10:00 local is 01:00 UTC.
        let at = next_occurrence(34, monday(), tz);
        assert_eq!(at, monday() + Duration::hours(1));
    }

    #[test]
    fn test_uplift() {
        let rec = Recommendation {
            contact_id: Uuid::new_v4(),
            hour: Some(1),
            send_at: None,
            score: 0.15,
            baseline_score: 0.1,
            reason: String::new(),
            throttled: false,
            segment: None,
        };
        assert!((rec.uplift() - 0.5).abs() < 1e-9);
    }
}
