use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use lifecycle_core::error::{LifecycleError, LifecycleResult};
use lifecycle_core::store::SegmentMembership;

use crate::types::{Flow, FlowRun, StepConfig};

/// Result of evaluating the step under a run's pointer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StepAction {
    /// No step at the pointer; the run is finished.
    Complete,
    /// Move the pointer and keep walking in this tick.
    Advance { next: u32 },
    /// Park the run until `minutes` from now with the pointer at `next`.
    Wait { minutes: i64, next: u32 },
    Cancel { reason: String },
    Send { template_id: Uuid, next: u32 },
}

/// Evaluates flow steps for a given run. Side-effect free apart from
/// segment membership reads.
pub struct StepEvaluator {
    segments: Arc<dyn SegmentMembership>,
}

impl StepEvaluator {
    pub fn new(segments: Arc<dyn SegmentMembership>) -> Self {
        Self { segments }
    }

    pub fn evaluate(&self, flow: &Flow, run: &FlowRun) -> LifecycleResult<StepAction> {
        let current = run.next_step_order;
        let step = match flow.step_at(current) {
            Some(step) => step,
            None => return Ok(StepAction::Complete),
        };
        let next = flow.next_order(current);

        debug!(
            run_id = %run.id,
            order = current,
            step_type = step.config.label(),
            "Evaluating flow step"
        );

        let action = match &step.config {
            StepConfig::Delay { minutes } => {
                let minutes = minutes.or(flow.delay_minutes).unwrap_or(0);
                if minutes <= 0 {
                    StepAction::Advance { next }
                } else {
                    StepAction::Wait { minutes, next }
                }
            }
            StepConfig::SegmentFilter { segment_id } => {
                match segment_id.or(flow.segment_id) {
                    Some(segment_id) => {
                        if self.segments.is_member(&segment_id, &run.contact_id)? {
                            StepAction::Advance { next }
                        } else {
                            StepAction::Cancel {
                                reason: "Contact no longer in segment".to_string(),
                            }
                        }
                    }
                    None => StepAction::Advance { next },
                }
            }
            StepConfig::SendTemplate { template_id } => {
                let template_id = template_id.or(flow.template_id).ok_or_else(|| {
                    LifecycleError::validation(format!(
                        "SEND_TEMPLATE step {} of flow {} has no template",
                        current, flow.id
                    ))
                })?;
                StepAction::Send { template_id, next }
            }
            StepConfig::Trigger | StepConfig::Unknown => StepAction::Advance { next },
        };

        Ok(action)
    }
}
