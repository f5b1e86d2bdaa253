//! Flow, step and run persistence contract plus a `DashMap` implementation.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use uuid::Uuid;

use lifecycle_core::error::{LifecycleError, LifecycleResult};

use crate::types::{Flow, FlowRun, FlowStatus};

pub trait FlowStore: Send + Sync {
    fn create_flow(&self, flow: Flow) -> LifecycleResult<()>;

    fn get_flow(&self, id: &Uuid) -> LifecycleResult<Option<Flow>>;

    fn list_flows(&self, status: Option<FlowStatus>) -> LifecycleResult<Vec<Flow>>;

    fn set_flow_status(
        &self,
        id: &Uuid,
        status: FlowStatus,
        at: DateTime<Utc>,
    ) -> LifecycleResult<()>;

    fn create_run(&self, run: FlowRun) -> LifecycleResult<()>;

    fn get_run(&self, id: &Uuid) -> LifecycleResult<Option<FlowRun>>;

    fn update_run(&self, run: &FlowRun) -> LifecycleResult<()>;

    /// PENDING/WAITING runs with `scheduled_at <= now`, oldest first.
    fn due_runs(&self, now: DateTime<Utc>, limit: usize) -> LifecycleResult<Vec<FlowRun>>;

    fn runs_for_flow(&self, flow_id: &Uuid) -> LifecycleResult<Vec<FlowRun>>;

    fn find_run(
        &self,
        flow_id: &Uuid,
        contact_id: &Uuid,
        triggered_at: DateTime<Utc>,
    ) -> LifecycleResult<Option<FlowRun>>;
}

#[derive(Default)]
pub struct InMemoryFlowStore {
    flows: DashMap<Uuid, Flow>,
    runs: DashMap<Uuid, FlowRun>,
}

impl InMemoryFlowStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn run_count(&self) -> usize {
        self.runs.len()
    }
}

impl FlowStore for InMemoryFlowStore {
    fn create_flow(&self, flow: Flow) -> LifecycleResult<()> {
        self.flows.insert(flow.id, flow);
        Ok(())
    }

    fn get_flow(&self, id: &Uuid) -> LifecycleResult<Option<Flow>> {
        Ok(self.flows.get(id).map(|f| f.clone()))
    }

    fn list_flows(&self, status: Option<FlowStatus>) -> LifecycleResult<Vec<Flow>> {
        let mut flows: Vec<Flow> = self
            .flows
            .iter()
            .filter(|f| status.map_or(true, |s| f.status == s))
            .map(|f| f.value().clone())
            .collect();
        flows.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(flows)
    }

    fn set_flow_status(
        &self,
        id: &Uuid,
        status: FlowStatus,
        at: DateTime<Utc>,
    ) -> LifecycleResult<()> {
        let mut flow = self
            .flows
            .get_mut(id)
            .ok_or_else(|| LifecycleError::not_found("Flow", id))?;
        flow.status = status;
        flow.updated_at = at;
        Ok(())
    }

    fn create_run(&self, run: FlowRun) -> LifecycleResult<()> {
        self.runs.insert(run.id, run);
        Ok(())
    }

    fn get_run(&self, id: &Uuid) -> LifecycleResult<Option<FlowRun>> {
        Ok(self.runs.get(id).map(|r| r.clone()))
    }

    fn update_run(&self, run: &FlowRun) -> LifecycleResult<()> {
        let mut stored = self
            .runs
            .get_mut(&run.id)
            .ok_or_else(|| LifecycleError::not_found("FlowRun", run.id))?;
        *stored = run.clone();
        Ok(())
    }

    fn due_runs(&self, now: DateTime<Utc>, limit: usize) -> LifecycleResult<Vec<FlowRun>> {
        let mut due: Vec<FlowRun> = self
            .runs
            .iter()
            .filter(|r| r.status.is_due_candidate() && r.scheduled_at <= now)
            .map(|r| r.value().clone())
            .collect();
        due.sort_by(|a, b| a.scheduled_at.cmp(&b.scheduled_at).then(a.id.cmp(&b.id)));
        due.truncate(limit);
        Ok(due)
    }

    fn runs_for_flow(&self, flow_id: &Uuid) -> LifecycleResult<Vec<FlowRun>> {
        let mut runs: Vec<FlowRun> = self
            .runs
            .iter()
            .filter(|r| r.flow_id == *flow_id)
            .map(|r| r.value().clone())
            .collect();
        runs.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(runs)
    }

    fn find_run(
        &self,
        flow_id: &Uuid,
        contact_id: &Uuid,
        triggered_at: DateTime<Utc>,
    ) -> LifecycleResult<Option<FlowRun>> {
        Ok(self
            .runs
            .iter()
            .find(|r| {
                r.flow_id == *flow_id
                    && r.contact_id == *contact_id
                    && r.context.triggered_at == triggered_at
            })
            .map(|r| r.value().clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    use crate::types::{RunStatus, TriggerContext};

    fn run(scheduled_at: DateTime<Utc>, status: RunStatus) -> FlowRun {
        FlowRun {
            id: Uuid::new_v4(),
            flow_id: Uuid::new_v4(),
            contact_id: Uuid::new_v4(),
            status,
            next_step_order: 1,
            scheduled_at,
            completed_at: None,
            cancelled_reason: None,
            context: TriggerContext {
                event_id: Uuid::new_v4(),
                event_name: "e".into(),
                properties: serde_json::Value::Null,
                triggered_at: scheduled_at,
            },
            created_at: scheduled_at,
            updated_at: scheduled_at,
        }
    }

    #[test]
    fn test_due_runs_filters_and_orders() {
        let store = InMemoryFlowStore::new();
        let now = Utc::now();
        let late = run(now - Duration::minutes(1), RunStatus::Waiting);
        let early = run(now - Duration::minutes(10), RunStatus::Pending);
        let future = run(now + Duration::minutes(10), RunStatus::Pending);
        let done = run(now - Duration::minutes(20), RunStatus::Completed);
        let (late_id, early_id) = (late.id, early.id);
        for r in [late, early, future, done] {
            store.create_run(r).unwrap();
        }

        let due = store.due_runs(now, 20).unwrap();
        let ids: Vec<Uuid> = due.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![early_id, late_id]);

        let capped = store.due_runs(now, 1).unwrap();
        assert_eq!(capped.len(), 1);
        assert_eq!(capped[0].id, early_id);
    }

    #[test]
    fn test_update_unknown_run() {
        let store = InMemoryFlowStore::new();
        let err = store
            .update_run(&run(Utc::now(), RunStatus::Pending))
            .unwrap_err();
        assert!(err.is_not_found());
    }
}
