use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use lifecycle_core::config::FlowEngineConfig;
use lifecycle_core::error::{LifecycleError, LifecycleResult};
use lifecycle_core::event_bus::{make_event, EventSink, LifecycleEventType};
use lifecycle_core::mail::{MailTransport, OutboundEmail};
use lifecycle_core::store::{ContactStore, MessageStore, SegmentMembership};
use lifecycle_core::templates::{EmailTemplate, RenderedEmail, TemplateCatalog};
use lifecycle_core::types::{Contact, ContactEvent, Message, MessageStatus};
use lifecycle_delivery::eligibility::check_eligibility;
use lifecycle_delivery::send_time::{Recommendation, SendTimeAdvisor};
use lifecycle_delivery::suppression::SuppressionLedger;

use crate::evaluator::{StepAction, StepEvaluator};
use crate::state_machine::RunStateMachine;
use crate::store::FlowStore;
use crate::types::{
    Flow, FlowRun, FlowStatus, RunStatus, Step, StepConfig, TickOptions, TickSummary,
    TriggerContext,
};
use crate::validation::validate_flow;

/// How a single run left the current tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunOutcome {
    Completed,
    Rescheduled,
    Cancelled,
}

/// Aggregate run counts for a flow.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowStats {
    pub flow_id: Uuid,
    pub total: usize,
    pub pending: usize,
    pub waiting: usize,
    pub completed: usize,
    pub cancelled: usize,
    pub failed: usize,
}

/// Stores and services the flow engine depends on.
#[derive(Clone)]
pub struct FlowCollaborators {
    pub flows: Arc<dyn FlowStore>,
    pub contacts: Arc<dyn ContactStore>,
    pub messages: Arc<dyn MessageStore>,
    pub segments: Arc<dyn SegmentMembership>,
    pub templates: Arc<TemplateCatalog>,
    pub ledger: Arc<SuppressionLedger>,
    pub transport: Arc<dyn MailTransport>,
}

/// Core orchestration engine. Owns flow definitions and advances due runs
/// one step sequence at a time.
pub struct FlowEngine {
    flows: Arc<dyn FlowStore>,
    contacts: Arc<dyn ContactStore>,
    messages: Arc<dyn MessageStore>,
    templates: Arc<TemplateCatalog>,
    ledger: Arc<SuppressionLedger>,
    transport: Arc<dyn MailTransport>,
    advisor: Option<Arc<dyn SendTimeAdvisor>>,
    evaluator: StepEvaluator,
    state_machine: RunStateMachine,
    event_sink: Arc<dyn EventSink>,
    config: FlowEngineConfig,
}

impl std::fmt::Debug for FlowEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlowEngine")
            .field("optimizer", &self.advisor.is_some())
            .field("config", &self.config)
            .finish()
    }
}

impl FlowEngine {
    pub fn new(collaborators: FlowCollaborators, config: FlowEngineConfig) -> Self {
        Self {
            flows: collaborators.flows,
            contacts: collaborators.contacts,
            messages: collaborators.messages,
            templates: collaborators.templates,
            ledger: collaborators.ledger,
            transport: collaborators.transport,
            advisor: None,
            evaluator: StepEvaluator::new(collaborators.segments),
            state_machine: RunStateMachine::new(),
            event_sink: lifecycle_core::event_bus::noop_sink(),
            config,
        }
    }

    /// Attach the send-time advisor consulted by optimizer-enabled flows.
    pub fn with_advisor(mut self, advisor: Arc<dyn SendTimeAdvisor>) -> Self {
        self.advisor = Some(advisor);
        self
    }

    /// Attach an event sink for run and message events.
    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.event_sink = sink;
        self
    }

    // ─── Definitions ────────────────────────────────────────────────────────

    /// Validates and stores a flow, returning its id.
    pub fn create_flow(&self, flow: Flow) -> LifecycleResult<Uuid> {
        validate_flow(&flow, &self.templates)?;
        let id = flow.id;
        info!(flow_id = %id, name = %flow.name, trigger = %flow.trigger_event, "Creating flow");
        self.flows.create_flow(flow)?;
        Ok(id)
    }

    pub fn get_flow(&self, id: &Uuid) -> LifecycleResult<Flow> {
        self.flows
            .get_flow(id)?
            .ok_or_else(|| LifecycleError::not_found("Flow", id))
    }

    pub fn list_flows(&self) -> LifecycleResult<Vec<Flow>> {
        self.flows.list_flows(None)
    }

    pub fn set_flow_status(
        &self,
        id: &Uuid,
        status: FlowStatus,
        now: DateTime<Utc>,
    ) -> LifecycleResult<()> {
        info!(flow_id = %id, ?status, "Updating flow status");
        self.flows.set_flow_status(id, status, now)
    }

    pub fn get_run(&self, id: &Uuid) -> LifecycleResult<FlowRun> {
        self.flows
            .get_run(id)?
            .ok_or_else(|| LifecycleError::not_found("FlowRun", id))
    }

    // ─── Enrolment ──────────────────────────────────────────────────────────

    /// Records the event on the contact and enrols it into every ACTIVE flow
    /// triggered by the event name. Returns the ids of newly created runs.
    pub fn ingest_event(&self, event: &ContactEvent) -> LifecycleResult<Vec<Uuid>> {
        let contact = self
            .contacts
            .get(&event.contact_id)?
            .ok_or_else(|| LifecycleError::not_found("Contact", event.contact_id))?;
        self.contacts.record_event(&contact.id, event.occurred_at)?;

        let mut created = Vec::new();
        for flow in self.flows.list_flows(Some(FlowStatus::Active))? {
            if flow.trigger_event != event.name {
                continue;
            }
            if self
                .flows
                .find_run(&flow.id, &contact.id, event.occurred_at)?
                .is_some()
            {
                debug!(
                    flow_id = %flow.id,
                    contact_id = %contact.id,
                    "Run already exists for trigger"
                );
                continue;
            }

            let run = FlowRun {
                id: Uuid::new_v4(),
                flow_id: flow.id,
                contact_id: contact.id,
                status: RunStatus::Pending,
                next_step_order: flow.entry_order(),
                scheduled_at: event.occurred_at,
                completed_at: None,
                cancelled_reason: None,
                context: TriggerContext {
                    event_id: event.id,
                    event_name: event.name.clone(),
                    properties: event.properties.clone(),
                    triggered_at: event.occurred_at,
                },
                created_at: event.occurred_at,
                updated_at: event.occurred_at,
            };
            info!(
                run_id = %run.id,
                flow_id = %flow.id,
                contact_id = %contact.id,
                "Contact entered flow"
            );
            self.emit(LifecycleEventType::RunCreated, &run, None, event.occurred_at);
            created.push(run.id);
            self.flows.create_run(run)?;
        }

        Ok(created)
    }

    // ─── Ticking ────────────────────────────────────────────────────────────

    /// Advances every due run. Runs are processed sequentially in
    /// `scheduled_at` order; a failing run is marked FAILED and the batch
    /// continues.
    pub fn process_due_runs(&self, options: TickOptions) -> LifecycleResult<TickSummary> {
        let now = options.now.unwrap_or_else(Utc::now);
        let limit = options.limit.unwrap_or(self.config.batch_limit);
        let due = self.flows.due_runs(now, limit)?;

        let mut summary = TickSummary::default();
        for mut run in due {
            summary.evaluated += 1;
            match self.process_run(&mut run, now) {
                Ok(RunOutcome::Completed) => summary.completed += 1,
                Ok(RunOutcome::Rescheduled) => summary.rescheduled += 1,
                Ok(RunOutcome::Cancelled) => summary.cancelled += 1,
                Err(e) => {
                    summary.failed += 1;
                    self.record_failure(&mut run, &e, now);
                }
            }
        }

        metrics::counter!("flows.runs_evaluated").increment(summary.evaluated as u64);
        metrics::counter!("flows.runs_completed").increment(summary.completed as u64);
        metrics::counter!("flows.runs_rescheduled").increment(summary.rescheduled as u64);
        metrics::counter!("flows.runs_cancelled").increment(summary.cancelled as u64);
        metrics::counter!("flows.runs_failed").increment(summary.failed as u64);
        info!(
            evaluated = summary.evaluated,
            completed = summary.completed,
            rescheduled = summary.rescheduled,
            cancelled = summary.cancelled,
            failed = summary.failed,
            "Flow tick complete"
        );
        Ok(summary)
    }

    /// Walks one run's steps until it waits, cancels, sends or runs off the
    /// end of the flow.
    pub fn process_run(
        &self,
        run: &mut FlowRun,
        now: DateTime<Utc>,
    ) -> LifecycleResult<RunOutcome> {
        let flow = self.get_flow(&run.flow_id)?;

        if run.status == RunStatus::Waiting {
            self.transition(run, RunStatus::Pending, now)?;
        }

        loop {
            match self.evaluator.evaluate(&flow, run)? {
                StepAction::Complete => {
                    self.complete(run, now)?;
                    return Ok(RunOutcome::Completed);
                }
                StepAction::Advance { next } => {
                    run.next_step_order = next;
                }
                StepAction::Wait { minutes, next } => {
                    self.transition(run, RunStatus::Waiting, now)?;
                    run.scheduled_at = now + Duration::minutes(minutes);
                    run.next_step_order = next;
                    self.flows.update_run(run)?;
                    debug!(run_id = %run.id, minutes, next, "Flow run waiting");
                    self.emit(LifecycleEventType::RunWaiting, run, None, now);
                    return Ok(RunOutcome::Rescheduled);
                }
                StepAction::Cancel { reason } => {
                    self.cancel(run, reason, now)?;
                    return Ok(RunOutcome::Cancelled);
                }
                StepAction::Send { template_id, next } => {
                    return self.execute_send(&flow, run, template_id, next, now);
                }
            }
        }
    }

    fn execute_send(
        &self,
        flow: &Flow,
        run: &mut FlowRun,
        template_id: Uuid,
        next: u32,
        now: DateTime<Utc>,
    ) -> LifecycleResult<RunOutcome> {
        let contact = self
            .contacts
            .get(&run.contact_id)?
            .ok_or_else(|| LifecycleError::not_found("Contact", run.contact_id))?;

        if let Err(ineligible) = check_eligibility(&contact, &self.ledger) {
            self.cancel(run, ineligible.reason(), now)?;
            return Ok(RunOutcome::Cancelled);
        }
        let to = contact.email_address().unwrap_or_default().to_string();

        let recommendation = if flow.optimizer_enabled {
            self.recommend(&contact, now)
        } else {
            None
        };

        let rendered = self
            .templates
            .render(&template_id, &template_variables(&contact, &run.context))?;

        let threshold = now + Duration::seconds(self.config.schedule_threshold_secs);
        if let Some(send_at) = recommendation
            .as_ref()
            .and_then(|r| r.send_at)
            .filter(|at| *at > threshold)
        {
            let message = self.message(flow, run, &rendered, MessageStatus::Scheduled, now);
            let message = Message {
                scheduled_at: Some(send_at),
                ..message
            };
            let message_id = message.id;
            self.messages.create(message)?;

            run.next_step_order = next;
            self.complete(run, now)?;
            metrics::counter!("flows.messages_scheduled").increment(1);
            info!(run_id = %run.id, %message_id, send_at = %send_at, "Flow send scheduled");
            self.emit_message(LifecycleEventType::MessageScheduled, message_id, run, now);
            return Ok(RunOutcome::Completed);
        }

        let email = OutboundEmail {
            to,
            subject: rendered.subject.clone(),
            html: rendered.html.clone(),
            tags: vec![
                format!("flow:{}", flow.id),
                format!("run:{}", run.id),
                format!("template:{}", template_id),
            ],
        };

        match self.transport.send(&email) {
            Ok(receipt) => {
                let message = self.message(flow, run, &rendered, MessageStatus::Sent, now);
                let message = Message {
                    provider_message_id: Some(receipt.id),
                    sent_at: Some(now),
                    ..message
                };
                let message_id = message.id;
                self.messages.create(message)?;
                self.contacts.record_send(&contact.id, now)?;

                run.next_step_order = next;
                self.complete(run, now)?;
                metrics::counter!("flows.messages_sent").increment(1);
                info!(run_id = %run.id, %message_id, "Flow message sent");
                self.emit_message(LifecycleEventType::MessageSent, message_id, run, now);
                Ok(RunOutcome::Completed)
            }
            Err(err) => {
                warn!(
                    run_id = %run.id,
                    status = err.status,
                    error = %err.message,
                    "Flow send failed"
                );
                self.transition(run, RunStatus::Failed, now)?;
                run.cancelled_reason = Some(err.message.clone());
                self.flows.update_run(run)?;
                self.emit(LifecycleEventType::RunFailed, run, Some(err.message.clone()), now);
                Err(err.into())
            }
        }
    }

    /// Optimizer failures downgrade to "no recommendation".
    fn recommend(&self, contact: &Contact, now: DateTime<Utc>) -> Option<Recommendation> {
        let advisor = self.advisor.as_ref()?;
        match advisor.recommend(&contact.id, now) {
            Ok(recommendation) => Some(recommendation),
            Err(e) => {
                warn!(contact_id = %contact.id, error = %e, "Send-time recommendation failed");
                None
            }
        }
    }

    fn message(
        &self,
        flow: &Flow,
        run: &FlowRun,
        rendered: &RenderedEmail,
        status: MessageStatus,
        now: DateTime<Utc>,
    ) -> Message {
        Message {
            id: Uuid::new_v4(),
            contact_id: run.contact_id,
            flow_id: Some(flow.id),
            run_id: Some(run.id),
            template_id: Some(rendered.template_id),
            subject: rendered.subject.clone(),
            status,
            provider_message_id: None,
            scheduled_at: None,
            sent_at: None,
            created_at: now,
        }
    }

    // ─── Run state writes ───────────────────────────────────────────────────

    fn transition(
        &self,
        run: &mut FlowRun,
        to: RunStatus,
        now: DateTime<Utc>,
    ) -> LifecycleResult<()> {
        self.state_machine.check(run.status, to)?;
        run.status = to;
        run.updated_at = now;
        Ok(())
    }

    fn complete(&self, run: &mut FlowRun, now: DateTime<Utc>) -> LifecycleResult<()> {
        self.transition(run, RunStatus::Completed, now)?;
        run.completed_at = Some(now);
        self.flows.update_run(run)?;
        self.emit(LifecycleEventType::RunCompleted, run, None, now);
        Ok(())
    }

    fn cancel(&self, run: &mut FlowRun, reason: String, now: DateTime<Utc>) -> LifecycleResult<()> {
        self.transition(run, RunStatus::Cancelled, now)?;
        info!(run_id = %run.id, reason = %reason, "Flow run cancelled");
        run.cancelled_reason = Some(reason.clone());
        self.flows.update_run(run)?;
        self.emit(LifecycleEventType::RunCancelled, run, Some(reason), now);
        Ok(())
    }

    /// Persist FAILED for a run whose processing errored, unless the send
    /// path already did.
    fn record_failure(&self, run: &mut FlowRun, err: &LifecycleError, now: DateTime<Utc>) {
        warn!(run_id = %run.id, error = %err, "Flow run failed");
        if run.status == RunStatus::Failed {
            return;
        }
        run.status = RunStatus::Failed;
        run.cancelled_reason = Some(err.to_string());
        run.updated_at = now;
        if let Err(e) = self.flows.update_run(run) {
            error!(run_id = %run.id, error = %e, "Failed to persist run failure");
        }
        self.emit(LifecycleEventType::RunFailed, run, Some(err.to_string()), now);
    }

    fn emit(
        &self,
        event_type: LifecycleEventType,
        run: &FlowRun,
        detail: Option<String>,
        now: DateTime<Utc>,
    ) {
        self.event_sink
            .emit(make_event(event_type, run.id, Some(run.contact_id), detail, now));
    }

    fn emit_message(
        &self,
        event_type: LifecycleEventType,
        message_id: Uuid,
        run: &FlowRun,
        now: DateTime<Utc>,
    ) {
        self.event_sink.emit(make_event(
            event_type,
            message_id,
            Some(run.contact_id),
            Some(run.id.to_string()),
            now,
        ));
    }

    // ─── Reporting & demo data ──────────────────────────────────────────────

    /// Counts runs of a flow by status.
    pub fn flow_stats(&self, flow_id: &Uuid) -> LifecycleResult<FlowStats> {
        let mut stats = FlowStats {
            flow_id: *flow_id,
            ..Default::default()
        };
        for run in self.flows.runs_for_flow(flow_id)? {
            stats.total += 1;
            match run.status {
                RunStatus::Pending => stats.pending += 1,
                RunStatus::Waiting => stats.waiting += 1,
                RunStatus::Completed => stats.completed += 1,
                RunStatus::Cancelled => stats.cancelled += 1,
                RunStatus::Failed => stats.failed += 1,
            }
        }
        Ok(stats)
    }

    /// Seeds two active demo flows and their templates. A send completes its
    /// run, so each flow ends with exactly one send step.
    pub fn seed_demo_flows(&self) -> LifecycleResult<Vec<Uuid>> {
        info!("Seeding demo flows");

        let welcome_template = self.templates.register(EmailTemplate::new(
            "welcome_email",
            "Welcome aboard, {{first_name}}",
            "<h1>Welcome {{first_name}}</h1><p>We're glad you joined.</p>",
        ));
        let nurture_template = self.templates.register(EmailTemplate::new(
            "trial_nurture",
            "How is your trial going?",
            "<p>{{first_name}}, your trial of {{plan}} is underway.</p>",
        ));

        // ---- 1. Welcome Series ----
        let mut welcome = Flow::new(
            "Welcome Series",
            "user_signup",
            vec![
                Step::new(1, StepConfig::Trigger),
                Step::new(
                    2,
                    StepConfig::SendTemplate {
                        template_id: Some(welcome_template),
                    },
                ),
            ],
        );
        welcome.status = FlowStatus::Active;

        // ---- 2. Trial Nurture (optimised send time) ----
        let mut nurture = Flow::new(
            "Trial Nurture",
            "trial_started",
            vec![
                Step::new(1, StepConfig::Trigger),
                Step::new(10, StepConfig::Delay { minutes: Some(45) }),
                Step::new(20, StepConfig::SendTemplate { template_id: None }),
            ],
        );
        nurture.template_id = Some(nurture_template);
        nurture.optimizer_enabled = true;
        nurture.status = FlowStatus::Active;

        let ids = vec![self.create_flow(welcome)?, self.create_flow(nurture)?];
        info!(flows = ids.len(), "Seeded demo flows");
        Ok(ids)
    }
}

/// Placeholder values available to templates: contact fields plus scalar
/// trigger properties.
fn template_variables(contact: &Contact, context: &TriggerContext) -> HashMap<String, String> {
    let mut vars = HashMap::new();
    if let Some(props) = context.properties.as_object() {
        for (key, value) in props {
            let rendered = match value {
                serde_json::Value::String(s) => s.clone(),
                serde_json::Value::Number(n) => n.to_string(),
                serde_json::Value::Bool(b) => b.to_string(),
                _ => continue,
            };
            vars.insert(key.clone(), rendered);
        }
    }
    vars.insert("event_name".to_string(), context.event_name.clone());
    if let Some(email) = contact.email_address() {
        vars.insert("email".to_string(), email.to_string());
    }
    vars.insert(
        "first_name".to_string(),
        contact
            .first_name
            .clone()
            .unwrap_or_else(|| "there".to_string()),
    );
    vars
}
