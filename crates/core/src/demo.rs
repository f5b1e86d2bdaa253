//! Deterministic synthetic data for the demo runner and scenario tests.

use chrono::{DateTime, Duration, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use crate::error::LifecycleResult;
use crate::store::{ContactStore, MessageStore};
use crate::types::{
    hour_of_week, Contact, ContactStatus, Message, MessageOutcome, MessageStatus,
    HOURS_PER_WEEK, SEGMENT_TAG_PREFIX, SYNTHETIC_TAG,
};

const WEEK: u32 = HOURS_PER_WEEK as u32;

pub const DEMO_SEGMENTS: [&str; 3] = ["newsletter", "trial", "customers"];

const DEMO_TIMEZONES: [Option<&str>; 4] = [
    None,
    Some("America/New_York"),
    Some("Europe/Berlin"),
    Some("Asia/Tokyo"),
];

/// Contact counts per status produced by [`seed_synthetic_contacts`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SyntheticMix {
    pub active: usize,
    pub bounced: usize,
    pub suppressed: usize,
    pub complained: usize,
}

impl Default for SyntheticMix {
    fn default() -> Self {
        Self {
            active: 200,
            bounced: 20,
            suppressed: 5,
            complained: 3,
        }
    }
}

impl SyntheticMix {
    pub fn total(&self) -> usize {
        self.active + self.bounced + self.suppressed + self.complained
    }
}

/// Generate the synthetic contact base. Complained contacts carry the
/// `synthetic` tag so the hygiene sweep keeps them visible but never
/// suppresses them.
pub fn seed_synthetic_contacts(
    store: &dyn ContactStore,
    mix: SyntheticMix,
    now: DateTime<Utc>,
    seed: u64,
) -> LifecycleResult<Vec<Uuid>> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut ids = Vec::with_capacity(mix.total());

    let plan = [
        (ContactStatus::Active, mix.active),
        (ContactStatus::Bounced, mix.bounced),
        (ContactStatus::Suppressed, mix.suppressed),
        (ContactStatus::Complained, mix.complained),
    ];

    let mut index = 0usize;
    for (status, count) in plan {
        for _ in 0..count {
            let created_at = now - Duration::days(120) + Duration::seconds(index as i64);
            let mut contact = Contact::new(format!("demo{index:03}@example.com"), created_at);
            contact.first_name = Some(format!("Demo {index}"));
            contact.status = status;
            contact.timezone = DEMO_TIMEZONES[index % DEMO_TIMEZONES.len()].map(str::to_string);
            contact.tags.push("demo".to_string());
            contact.tags.push(format!(
                "{SEGMENT_TAG_PREFIX}{}",
                DEMO_SEGMENTS[index % DEMO_SEGMENTS.len()]
            ));

            match status {
                ContactStatus::Active => {
                    // Every tenth active contact has gone quiet.
                    let event_age = if index % 10 == 9 {
                        rng.gen_range(61..90)
                    } else {
                        rng.gen_range(0..30)
                    };
                    contact.last_event_at = Some(now - Duration::days(event_age));
                    contact.last_send_at = Some(now - Duration::days(rng.gen_range(2..30)));
                    contact.propensity = Some(rng.gen_range(0.15..0.9));
                }
                ContactStatus::Complained => {
                    contact.tags.push(SYNTHETIC_TAG.to_string());
                    contact.last_event_at = Some(now - Duration::days(rng.gen_range(5..40)));
                    contact.last_send_at = Some(now - Duration::days(rng.gen_range(5..40)));
                    contact.propensity = Some(rng.gen_range(0.0..0.2));
                }
                _ => {
                    contact.last_event_at = Some(now - Duration::days(rng.gen_range(30..200)));
                    contact.last_send_at = Some(now - Duration::days(rng.gen_range(30..200)));
                    contact.propensity = Some(rng.gen_range(0.0..0.3));
                }
            }

            ids.push(contact.id);
            store.upsert(contact)?;
            index += 1;
        }
    }

    info!(
        total = ids.len(),
        active = mix.active,
        bounced = mix.bounced,
        suppressed = mix.suppressed,
        complained = mix.complained,
        "synthetic contacts seeded"
    );
    Ok(ids)
}

/// Generate eight weeks of sent messages for `contact_ids`. Click-through
/// is biased towards `peak_hour_of_week` so the optimizer has a signal.
pub fn seed_engagement_history(
    messages: &dyn MessageStore,
    contact_ids: &[Uuid],
    peak_hour_of_week: u32,
    now: DateTime<Utc>,
    seed: u64,
) -> LifecycleResult<usize> {
    let mut rng = StdRng::seed_from_u64(seed);
    let start = now - Duration::weeks(8);
    let mut created = 0usize;

    for contact_id in contact_ids {
        for _ in 0..6 {
            let offset_hours = rng.gen_range(0..(8 * HOURS_PER_WEEK as i64));
            let sent_at = start + Duration::hours(offset_hours);
            let click_rate = if hour_of_week(sent_at) == peak_hour_of_week {
                0.6
            } else {
                0.03
            };

            let message = Message {
                id: Uuid::new_v4(),
                contact_id: *contact_id,
                flow_id: None,
                run_id: None,
                template_id: None,
                subject: "Demo broadcast".to_string(),
                status: MessageStatus::Sent,
                provider_message_id: None,
                scheduled_at: None,
                sent_at: Some(sent_at),
                created_at: sent_at,
            };
            let message_id = message.id;
            messages.create(message)?;
            messages.upsert_outcome(MessageOutcome {
                message_id,
                delivered: true,
                opened: rng.gen_bool(0.3),
                clicked: rng.gen_bool(click_rate),
                updated_at: Some(sent_at),
                ..Default::default()
            })?;
            created += 1;
        }
        // Guarantee traffic in the peak bucket.
        let weeks_back = rng.gen_range(1..8);
        let peak_at = start
            + Duration::hours(
                i64::from((peak_hour_of_week + WEEK - hour_of_week(start)) % WEEK),
            )
            + Duration::weeks(weeks_back - 1);
        let message = Message {
            id: Uuid::new_v4(),
            contact_id: *contact_id,
            flow_id: None,
            run_id: None,
            template_id: None,
            subject: "Demo broadcast".to_string(),
            status: MessageStatus::Sent,
            provider_message_id: None,
            scheduled_at: None,
            sent_at: Some(peak_at),
            created_at: peak_at,
        };
        let message_id = message.id;
        messages.create(message)?;
        messages.upsert_outcome(MessageOutcome {
            message_id,
            delivered: true,
            opened: true,
            clicked: true,
            updated_at: Some(peak_at),
            ..Default::default()
        })?;
        created += 1;
    }

    info!(messages = created, peak_hour_of_week, "engagement history seeded");
    Ok(created)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{InMemoryContacts, InMemoryMessages};
    use crate::types::ContactFilter;

    #[test]
    fn test_synthetic_mix() {
        let store = InMemoryContacts::new();
        let now = Utc::now();
        let ids = seed_synthetic_contacts(&store, SyntheticMix::default(), now, 7).unwrap();
        assert_eq!(ids.len(), 228);

        let count = |status| {
            store
                .list(&ContactFilter {
                    status: Some(status),
                    ..Default::default()
                })
                .unwrap()
                .len()
        };
        assert_eq!(count(ContactStatus::Active), 200);
        assert_eq!(count(ContactStatus::Bounced), 20);
        assert_eq!(count(ContactStatus::Suppressed), 5);
        assert_eq!(count(ContactStatus::Complained), 3);

        let synthetic = store
            .list(&ContactFilter {
                tag: Some(SYNTHETIC_TAG.into()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(synthetic.len(), 3);
        assert!(synthetic.iter().all(|c| c.status == ContactStatus::Complained));
        assert!(synthetic.iter().all(|c| c.segment().is_some()));
    }

    #[test]
    fn test_engagement_history_hits_peak_bucket() {
        let messages = InMemoryMessages::new();
        let now = Utc::now();
        let contacts = vec![Uuid::new_v4(), Uuid::new_v4()];
        let created = seed_engagement_history(&messages, &contacts, 34, now, 11).unwrap();
        assert_eq!(created, 14);

        let rows = messages.sent_with_outcomes().unwrap();
        let peak_clicks = rows
            .iter()
            .filter(|(m, o)| {
                hour_of_week(m.send_instant()) == 34
                    && o.as_ref().map(|o| o.clicked).unwrap_or(false)
            })
            .count();
        assert!(peak_clicks >= 2);
    }
}
