use chrono::{DateTime, Datelike, Timelike, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Tag prefix that assigns a contact to an audience segment.
pub const SEGMENT_TAG_PREFIX: &str = "segment=";

/// Tag that marks demo/test data which must never be auto-suppressed.
pub const SYNTHETIC_TAG: &str = "synthetic";

pub const HOURS_PER_WEEK: usize = 168;

/// `weekday(0=Sun) * 24 + hour`, both in UTC.
pub fn hour_of_week(at: DateTime<Utc>) -> u32 {
    at.weekday().num_days_from_sunday() * 24 + at.hour()
}

// ─── Contacts ───────────────────────────────────────────────────────────────

/// Sending lifecycle of a contact. Everything except `Active` excludes the
/// contact from sending.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ContactStatus {
    Active,
    Bounced,
    Complained,
    Suppressed,
}

impl ContactStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "ACTIVE",
            Self::Bounced => "BOUNCED",
            Self::Complained => "COMPLAINED",
            Self::Suppressed => "SUPPRESSED",
        }
    }
}

/// Deliverability risk tier assigned by the hygiene sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Contact {
    pub id: Uuid,
    pub email: Option<String>,
    pub first_name: Option<String>,
    pub status: ContactStatus,
    pub tags: Vec<String>,
    /// IANA timezone name, e.g. `Europe/Berlin`.
    pub timezone: Option<String>,
    pub last_event_at: Option<DateTime<Utc>>,
    pub last_send_at: Option<DateTime<Utc>>,
    /// Prior probability of engagement in `0..=1`.
    pub propensity: Option<f64>,
    pub risk_level: Option<RiskLevel>,
    pub risk_score: Option<f64>,
    pub risk_evaluated_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Contact {
    /// A fresh ACTIVE contact with no history.
    pub fn new(email: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            email: Some(email.into()),
            first_name: None,
            status: ContactStatus::Active,
            tags: Vec::new(),
            timezone: None,
            last_event_at: None,
            last_send_at: None,
            propensity: None,
            risk_level: None,
            risk_score: None,
            risk_evaluated_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }

    /// The segment named by the first `segment=<name>` tag, if any.
    pub fn segment(&self) -> Option<&str> {
        self.tags
            .iter()
            .filter_map(|t| t.strip_prefix(SEGMENT_TAG_PREFIX))
            .map(str::trim)
            .find(|s| !s.is_empty())
    }

    pub fn is_synthetic(&self) -> bool {
        self.has_tag(SYNTHETIC_TAG)
    }

    /// Non-empty email address, if present.
    pub fn email_address(&self) -> Option<&str> {
        self.email.as_deref().map(str::trim).filter(|e| !e.is_empty())
    }
}

/// Attribute filter for listing contacts.
#[derive(Debug, Clone, Default)]
pub struct ContactFilter {
    pub status: Option<ContactStatus>,
    pub tag: Option<String>,
    pub limit: Option<usize>,
}

impl ContactFilter {
    pub fn matches(&self, contact: &Contact) -> bool {
        if let Some(status) = self.status {
            if contact.status != status {
                return false;
            }
        }
        match &self.tag {
            Some(tag) => contact.has_tag(tag),
            None => true,
        }
    }
}

/// A behavioural event reported for a contact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContactEvent {
    pub id: Uuid,
    pub contact_id: Uuid,
    pub name: String,
    #[serde(default)]
    pub properties: serde_json::Value,
    pub occurred_at: DateTime<Utc>,
}

// ─── Messages ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageStatus {
    Scheduled,
    Sent,
    Failed,
}

/// A message created for a contact, either dispatched or queued for a
/// future send instant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub contact_id: Uuid,
    pub flow_id: Option<Uuid>,
    pub run_id: Option<Uuid>,
    pub template_id: Option<Uuid>,
    pub subject: String,
    pub status: MessageStatus,
    pub provider_message_id: Option<String>,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub sent_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Message {
    /// Instant used to bucket the message into the hour-of-week histogram.
    pub fn send_instant(&self) -> DateTime<Utc> {
        self.sent_at.unwrap_or(self.created_at)
    }
}

/// Engagement/delivery outcome reported for a message.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MessageOutcome {
    pub message_id: Uuid,
    pub delivered: bool,
    pub opened: bool,
    pub clicked: bool,
    pub bounced: bool,
    pub complained: bool,
    pub updated_at: Option<DateTime<Utc>>,
}

// ─── Suppression & audit records ────────────────────────────────────────────

/// Append-only record of why a contact was excluded from sending.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Suppression {
    pub id: Uuid,
    pub contact_id: Uuid,
    pub reason: String,
    pub source: String,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Rationale captured alongside an optimizer recommendation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionRationale {
    pub segment: Option<String>,
    pub segment_has_data: bool,
    pub throttled: bool,
    pub send_at: Option<DateTime<Utc>>,
}

/// Immutable audit record of one send-time recommendation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizerDecision {
    pub id: Uuid,
    pub contact_id: Uuid,
    pub hour_of_week: Option<u32>,
    pub score: f64,
    pub baseline_score: f64,
    pub rationale: DecisionRationale,
    pub created_at: DateTime<Utc>,
}

/// Immutable audit record of one hygiene scoring pass over one contact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HygieneEvaluation {
    pub id: Uuid,
    pub contact_id: Uuid,
    pub risk_level: RiskLevel,
    pub score: f64,
    pub suppressed: bool,
    pub reasons: Vec<String>,
    pub created_at: DateTime<Utc>,
}

/// Rounds a ratio for display. Internal comparisons use unrounded values.
pub fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_hour_of_week() {
        // 2024-01-07 is a Sunday.
        let sunday = Utc.with_ymd_and_hms(2024, 1, 7, 0, 30, 0).unwrap();
        assert_eq!(hour_of_week(sunday), 0);
        let monday_nine = Utc.with_ymd_and_hms(2024, 1, 8, 9, 0, 0).unwrap();
        assert_eq!(hour_of_week(monday_nine), 33);
        let saturday_last = Utc.with_ymd_and_hms(2024, 1, 13, 23, 59, 0).unwrap();
        assert_eq!(hour_of_week(saturday_last), 167);
    }

    #[test]
    fn test_segment_tag_parsing() {
        let now = Utc::now();
        let contact = Contact::new("a@example.com", now)
            .with_tag("vip")
            .with_tag("segment=newsletter");
        assert_eq!(contact.segment(), Some("newsletter"));

        let blank = Contact::new("b@example.com", now).with_tag("segment=");
        assert_eq!(blank.segment(), None);
    }

    #[test]
    fn test_email_address_ignores_blank() {
        let mut contact = Contact::new("  ", Utc::now());
        assert_eq!(contact.email_address(), None);
        contact.email = None;
        assert_eq!(contact.email_address(), None);
    }

    #[test]
    fn test_contact_filter() {
        let now = Utc::now();
        let mut contact = Contact::new("a@example.com", now).with_tag("synthetic");
        contact.status = ContactStatus::Bounced;

        let by_status = ContactFilter {
            status: Some(ContactStatus::Bounced),
            ..Default::default()
        };
        assert!(by_status.matches(&contact));

        let by_tag = ContactFilter {
            tag: Some("vip".into()),
            ..Default::default()
        };
        assert!(!by_tag.matches(&contact));
    }

    #[test]
    fn test_round4() {
        assert_eq!(round4(0.123456), 0.1235);
        assert_eq!(round4(0.05), 0.05);
    }

    #[test]
    fn test_status_serde() {
        let json = serde_json::to_string(&ContactStatus::Complained).unwrap();
        assert_eq!(json, "\"COMPLAINED\"");
    }
}
