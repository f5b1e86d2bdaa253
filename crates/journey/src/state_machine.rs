use anyhow::anyhow;
use serde::{Deserialize, Serialize};

use lifecycle_core::error::{LifecycleError, LifecycleResult};

use crate::types::RunStatus;

/// Describes a single valid state transition for a flow run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateTransition {
    pub from: RunStatus,
    pub to: RunStatus,
    pub trigger: String,
}

/// Guards the flow-run lifecycle by enforcing a finite set of valid state
/// transitions. Terminal states have no outgoing transitions.
#[derive(Debug, Clone)]
pub struct RunStateMachine {
    pub transitions: Vec<StateTransition>,
}

impl RunStateMachine {
    pub fn new() -> Self {
        let edge = |from: RunStatus, to: RunStatus, trigger: &str| StateTransition {
            from,
            to,
            trigger: trigger.to_string(),
        };
        let transitions = vec![
            // Pending ->
            edge(RunStatus::Pending, RunStatus::Waiting, "delay_step"),
            edge(RunStatus::Pending, RunStatus::Completed, "flow_complete"),
            edge(RunStatus::Pending, RunStatus::Cancelled, "cancel"),
            edge(RunStatus::Pending, RunStatus::Failed, "processing_error"),
            // Waiting ->
            edge(RunStatus::Waiting, RunStatus::Pending, "wait_complete"),
            edge(RunStatus::Waiting, RunStatus::Waiting, "delay_step"),
            edge(RunStatus::Waiting, RunStatus::Completed, "flow_complete"),
            edge(RunStatus::Waiting, RunStatus::Cancelled, "cancel"),
            edge(RunStatus::Waiting, RunStatus::Failed, "processing_error"),
        ];

        Self { transitions }
    }

    /// Returns `true` if the given transition is allowed.
    pub fn can_transition(&self, from: RunStatus, to: RunStatus) -> bool {
        self.transitions.iter().any(|t| t.from == from && t.to == to)
    }

    pub fn check(&self, from: RunStatus, to: RunStatus) -> LifecycleResult<()> {
        if self.can_transition(from, to) {
            Ok(())
        } else {
            Err(LifecycleError::Internal(anyhow!(
                "Invalid run state transition from {:?} to {:?}",
                from,
                to
            )))
        }
    }
}

impl Default for RunStateMachine {
    fn default() -> Self {
        Self::new()
    }
}
