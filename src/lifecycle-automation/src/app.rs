//! In-memory wiring of the flow engine, send-time optimizer and hygiene
//! sweeper, shared by every subcommand.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use lifecycle_core::config::AppConfig;
use lifecycle_core::demo::{seed_engagement_history, seed_synthetic_contacts, SyntheticMix};
use lifecycle_core::error::LifecycleResult;
use lifecycle_core::event_bus::{capture_sink, CaptureSink};
use lifecycle_core::mail::RecordingTransport;
use lifecycle_core::memory::{
    InMemoryAuditLog, InMemoryContacts, InMemoryMessages, InMemorySegments,
};
use lifecycle_core::store::ContactStore;
use lifecycle_core::templates::TemplateCatalog;
use lifecycle_core::types::{ContactEvent, ContactFilter, ContactStatus};
use lifecycle_delivery::histogram::HistogramStore;
use lifecycle_delivery::hygiene::{HygieneSweeper, SweepOptions, SweepSummary};
use lifecycle_delivery::send_time::{Recommendation, SendTimeAdvisor, SendTimeOptimizer};
use lifecycle_delivery::suppression::SuppressionLedger;
use lifecycle_journey::{FlowCollaborators, FlowEngine, InMemoryFlowStore, TickOptions, TickSummary};

/// Tuesday 10:00 UTC, the hour demo engagement clusters around.
const DEMO_PEAK_HOUR_OF_WEEK: u32 = 2 * 24 + 10;

/// What `seed_demo` put into the stores.
#[derive(Debug, Clone, Serialize)]
pub struct DemoReport {
    pub contacts: usize,
    pub messages: usize,
    pub flows: usize,
    pub runs: usize,
}

pub struct App {
    pub config: AppConfig,
    pub contacts: Arc<InMemoryContacts>,
    pub messages: Arc<InMemoryMessages>,
    pub audit: Arc<InMemoryAuditLog>,
    pub ledger: Arc<SuppressionLedger>,
    pub transport: Arc<RecordingTransport>,
    pub events: Arc<CaptureSink>,
    pub optimizer: Arc<SendTimeOptimizer>,
    pub engine: FlowEngine,
    pub sweeper: HygieneSweeper,
}

impl App {
    pub fn new(config: AppConfig) -> Self {
        let contacts = Arc::new(InMemoryContacts::new());
        let messages = Arc::new(InMemoryMessages::new());
        let audit = Arc::new(InMemoryAuditLog::new());
        let ledger = Arc::new(SuppressionLedger::new());
        let transport = Arc::new(RecordingTransport::new());
        let events = capture_sink();

        let histograms = Arc::new(HistogramStore::new(
            messages.clone(),
            contacts.clone(),
            Duration::seconds(config.optimizer.cache_ttl_secs),
        ));
        let optimizer = Arc::new(SendTimeOptimizer::new(
            contacts.clone(),
            histograms,
            audit.clone(),
            config.optimizer.clone(),
        ));

        let engine = FlowEngine::new(
            FlowCollaborators {
                flows: Arc::new(InMemoryFlowStore::new()),
                contacts: contacts.clone(),
                messages: messages.clone(),
                segments: Arc::new(InMemorySegments::new()),
                templates: Arc::new(TemplateCatalog::new()),
                ledger: ledger.clone(),
                transport: transport.clone(),
            },
            config.flows.clone(),
        )
        .with_advisor(optimizer.clone())
        .with_event_sink(events.clone());

        let sweeper = HygieneSweeper::new(
            contacts.clone(),
            audit.clone(),
            ledger.clone(),
            config.hygiene.clone(),
        )
        .with_event_sink(events.clone());

        Self {
            config,
            contacts,
            messages,
            audit,
            ledger,
            transport,
            events,
            optimizer,
            engine,
            sweeper,
        }
    }

    /// Seed synthetic contacts, engagement history and the demo flows, then
    /// fire a signup event for every active contact and a trial event for
    /// those in the trial segment.
    pub fn seed_demo(&self, now: DateTime<Utc>, seed: u64) -> LifecycleResult<DemoReport> {
        let ids = seed_synthetic_contacts(
            self.contacts.as_ref(),
            SyntheticMix::default(),
            now,
            seed,
        )?;

        let active = self.active_contacts()?;
        let active_ids: Vec<Uuid> = active.iter().map(|c| c.id).collect();
        let messages = seed_engagement_history(
            self.messages.as_ref(),
            &active_ids,
            DEMO_PEAK_HOUR_OF_WEEK,
            now,
            seed,
        )?;

        let flows = self.engine.seed_demo_flows()?;

        let mut runs = 0usize;
        for contact in &active {
            let mut names = vec!["user_signup"];
            if contact.segment() == Some("trial") {
                names.push("trial_started");
            }
            for name in names {
                let event = ContactEvent {
                    id: Uuid::new_v4(),
                    contact_id: contact.id,
                    name: name.to_string(),
                    properties: serde_json::json!({ "plan": "growth" }),
                    occurred_at: now,
                };
                runs += self.engine.ingest_event(&event)?.len();
            }
        }

        let report = DemoReport {
            contacts: ids.len(),
            messages,
            flows: flows.len(),
            runs,
        };
        info!(
            contacts = report.contacts,
            messages = report.messages,
            flows = report.flows,
            runs = report.runs,
            "Demo data seeded"
        );
        Ok(report)
    }

    pub fn tick(&self, now: DateTime<Utc>, limit: Option<usize>) -> LifecycleResult<TickSummary> {
        self.engine.process_due_runs(TickOptions {
            now: Some(now),
            limit,
        })
    }

    /// Tick repeatedly until a tick finds nothing due.
    pub fn drain(&self, now: DateTime<Utc>) -> LifecycleResult<TickSummary> {
        let mut total = TickSummary::default();
        loop {
            let summary = self.tick(now, None)?;
            if summary.evaluated == 0 {
                return Ok(total);
            }
            total.evaluated += summary.evaluated;
            total.completed += summary.completed;
            total.rescheduled += summary.rescheduled;
            total.cancelled += summary.cancelled;
            total.failed += summary.failed;
        }
    }

    pub fn sweep(
        &self,
        now: DateTime<Utc>,
        suppress_high_risk: Option<bool>,
        limit: Option<usize>,
    ) -> LifecycleResult<SweepSummary> {
        self.sweeper.sweep(
            SweepOptions {
                suppress_high_risk,
                limit: limit.or(self.config.hygiene.sweep_limit),
            },
            now,
        )
    }

    pub fn recommend(
        &self,
        count: usize,
        now: DateTime<Utc>,
    ) -> LifecycleResult<Vec<Recommendation>> {
        self.active_contacts()?
            .iter()
            .take(count)
            .map(|c| self.optimizer.recommend(&c.id, now))
            .collect()
    }

    pub fn recommend_for(
        &self,
        contact_id: &Uuid,
        now: DateTime<Utc>,
    ) -> LifecycleResult<Recommendation> {
        self.optimizer.recommend(contact_id, now)
    }

    fn active_contacts(&self) -> LifecycleResult<Vec<lifecycle_core::types::Contact>> {
        self.contacts.list(&ContactFilter {
            status: Some(ContactStatus::Active),
            ..Default::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use lifecycle_core::event_bus::LifecycleEventType;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 4, 9, 0, 0).unwrap()
    }

    #[test]
    fn test_seed_demo_enrols_active_contacts() {
        let app = App::new(AppConfig::default());
        let report = app.seed_demo(now(), 7).unwrap();
        assert_eq!(report.contacts, 228);
        assert_eq!(report.flows, 2);
        assert!(report.runs >= 200);
        assert!(report.messages > 0);
    }

    #[test]
    fn test_demo_pipeline_sends_and_sweeps() {
        let app = App::new(AppConfig::default());
        let report = app.seed_demo(now(), 7).unwrap();

        let first = app.tick(now(), None).unwrap();
        assert_eq!(first.evaluated, 20);

        let rest = app.drain(now()).unwrap();
        assert_eq!(first.evaluated + rest.evaluated, report.runs);
        assert_eq!(first.failed + rest.failed, 0);
        // Welcome sends go out immediately; trial runs wait out their delay.
        assert_eq!(app.transport.count(), 200);
        assert!(app.events.count_type(LifecycleEventType::RunWaiting) > 0);

        let summary = app.sweep(now(), None, None).unwrap();
        assert_eq!(summary.evaluated, 228);
        assert_eq!(summary.contacts_suppressed, 20);
        assert_eq!(app.ledger.count(), 20);
    }

    #[test]
    fn test_recommend_uses_seeded_history() {
        let app = App::new(AppConfig::default());
        app.seed_demo(now(), 7).unwrap();
        let recs = app.recommend(3, now()).unwrap();
        assert_eq!(recs.len(), 3);
        assert!(recs.iter().all(|r| r.send_at.map_or(false, |at| at > now())));
        assert_eq!(app.audit.decision_count(), 3);
    }

    #[test]
    fn test_heatmap_covers_whole_week() {
        let app = App::new(AppConfig::default());
        app.seed_demo(now(), 7).unwrap();
        let heatmap = app.optimizer.histograms().heatmap(None, now()).unwrap();
        assert_eq!(heatmap.cells.len(), 168);
        assert!(heatmap.cells.iter().map(|c| c.sends).sum::<u64>() > 0);
    }

    #[test]
    fn test_recommend_for_unknown_contact() {
        let app = App::new(AppConfig::default());
        let err = app.recommend_for(&Uuid::new_v4(), now()).unwrap_err();
        assert!(err.is_not_found());
    }
}
