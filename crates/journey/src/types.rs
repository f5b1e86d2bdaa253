use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// An automation definition: trigger, ordered steps and send defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Flow {
    pub id: Uuid,
    pub name: String,
    /// Event name that enrols a contact.
    pub trigger_event: String,
    pub steps: Vec<Step>,
    /// Fallback segment for SEGMENT_FILTER steps without their own.
    pub segment_id: Option<Uuid>,
    /// Fallback minutes for DELAY steps without their own.
    pub delay_minutes: Option<i64>,
    pub optimizer_enabled: bool,
    /// Fallback template for SEND_TEMPLATE steps without their own.
    pub template_id: Option<Uuid>,
    pub status: FlowStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Flow {
    pub fn new(
        name: impl Into<String>,
        trigger_event: impl Into<String>,
        steps: Vec<Step>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            trigger_event: trigger_event.into(),
            steps,
            segment_id: None,
            delay_minutes: None,
            optimizer_enabled: false,
            template_id: None,
            status: FlowStatus::Draft,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn step_at(&self, order: u32) -> Option<&Step> {
        self.steps.iter().find(|s| s.order == order)
    }

    /// Smallest order strictly greater than `current`, or `current + 1`
    /// when there is none.
    pub fn next_order(&self, current: u32) -> u32 {
        self.steps
            .iter()
            .map(|s| s.order)
            .filter(|&o| o > current)
            .min()
            .unwrap_or(current + 1)
    }

    /// Pointer for a freshly enrolled run: the first non-TRIGGER step.
    pub fn entry_order(&self) -> u32 {
        let mut current = 0;
        loop {
            let next = self.next_order(current);
            match self.step_at(next) {
                Some(step) if matches!(step.config, StepConfig::Trigger) => current = next,
                _ => return next,
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FlowStatus {
    Draft,
    Active,
    Paused,
}

/// A single node of a flow. Orders are 1-based and need not be contiguous.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    pub id: Uuid,
    pub order: u32,
    pub config: StepConfig,
}

impl Step {
    pub fn new(order: u32, config: StepConfig) -> Self {
        Self {
            id: Uuid::new_v4(),
            order,
            config,
        }
    }
}

/// Typed step configuration keyed by step type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepConfig {
    Trigger,
    Delay {
        #[serde(default)]
        minutes: Option<i64>,
    },
    SegmentFilter {
        #[serde(default)]
        segment_id: Option<Uuid>,
    },
    SendTemplate {
        #[serde(default)]
        template_id: Option<Uuid>,
    },
    /// Step types this engine does not know; stepped over.
    #[serde(other)]
    Unknown,
}

impl StepConfig {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Trigger => "TRIGGER",
            Self::Delay { .. } => "DELAY",
            Self::SegmentFilter { .. } => "SEGMENT_FILTER",
            Self::SendTemplate { .. } => "SEND_TEMPLATE",
            Self::Unknown => "UNKNOWN",
        }
    }
}

/// Runtime status of a flow run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    Pending,
    Waiting,
    Completed,
    Cancelled,
    Failed,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled | Self::Failed)
    }

    pub fn is_due_candidate(&self) -> bool {
        matches!(self, Self::Pending | Self::Waiting)
    }
}

/// What enrolled the contact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerContext {
    pub event_id: Uuid,
    pub event_name: String,
    #[serde(default)]
    pub properties: serde_json::Value,
    pub triggered_at: DateTime<Utc>,
}

/// One contact's progress through one flow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowRun {
    pub id: Uuid,
    pub flow_id: Uuid,
    pub contact_id: Uuid,
    pub status: RunStatus,
    pub next_step_order: u32,
    pub scheduled_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Human-readable reason for CANCELLED and FAILED runs.
    pub cancelled_reason: Option<String>,
    pub context: TriggerContext,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Options for one scheduling tick.
#[derive(Debug, Clone, Default)]
pub struct TickOptions {
    pub now: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

/// Per-tick counts returned to the job caller.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TickSummary {
    pub evaluated: usize,
    pub completed: usize,
    pub rescheduled: usize,
    pub cancelled: usize,
    pub failed: usize,
}
