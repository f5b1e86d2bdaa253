//! Lifecycle Automation: flow execution, send-time optimisation and list
//! hygiene jobs.
//!
//! Every subcommand runs against freshly seeded in-memory demo state.

mod app;

use std::time::Duration as StdDuration;

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use lifecycle_core::config::AppConfig;
use serde::Serialize;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::app::App;

#[derive(Parser, Debug)]
#[command(name = "lifecycle-automation")]
#[command(about = "Lifecycle email automation: flow ticks, send-time advice and hygiene sweeps")]
#[command(version)]
struct Cli {
    /// Reference instant (RFC 3339); defaults to the current time
    #[arg(long, global = true, env = "LIFECYCLE__NOW")]
    now: Option<DateTime<Utc>>,

    /// Seed for the synthetic demo data
    #[arg(long, global = true, default_value_t = 42)]
    seed: u64,

    /// Flow batch size (overrides config)
    #[arg(long, global = true, env = "LIFECYCLE__FLOWS__BATCH_LIMIT")]
    batch_limit: Option<usize>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Advance due flow runs once
    Tick {
        /// Maximum runs to process (defaults to the batch limit)
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Score every contact and auto-suppress high-risk ones
    Sweep {
        /// Record evaluations without suppressing anyone
        #[arg(long, default_value_t = false)]
        no_suppress: bool,

        /// Maximum contacts to evaluate
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Print send-time recommendations for one contact, or the first active contacts
    Recommend {
        /// Contact id; omit to sample seeded contacts
        contact: Option<Uuid>,

        #[arg(long, default_value_t = 5)]
        count: usize,
    },

    /// Print the hour-of-week engagement heatmap
    Heatmap {
        /// Segment name; omit for the global histogram
        #[arg(long)]
        segment: Option<String>,
    },

    /// Seed, drain every due run, sweep, and print a report
    Demo,

    /// Run the tick and sweep jobs on their configured intervals
    Run {
        /// Stop after this many ticks
        #[arg(long)]
        ticks: Option<u64>,
    },
}

#[derive(Serialize)]
struct DemoOutput {
    seeded: app::DemoReport,
    flows: lifecycle_journey::TickSummary,
    hygiene: lifecycle_delivery::hygiene::SweepSummary,
    emails_sent: usize,
    messages: usize,
    optimizer_decisions: usize,
    hygiene_evaluations: usize,
    suppressions: usize,
    events: usize,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "lifecycle_automation=info,lifecycle_journey=info,lifecycle_delivery=info".into()
            }),
        )
        .json()
        .init();

    let cli = Cli::parse();

    let mut config = AppConfig::load().unwrap_or_else(|e| {
        warn!(error = %e, "Failed to load config, using defaults");
        AppConfig::default()
    });
    if let Some(limit) = cli.batch_limit {
        config.flows.batch_limit = limit;
    }

    info!(
        batch_limit = config.flows.batch_limit,
        tick_interval_secs = config.flows.tick_interval_secs,
        sweep_interval_secs = config.hygiene.sweep_interval_secs,
        "Configuration loaded"
    );

    let now = cli.now.unwrap_or_else(Utc::now);
    let app = App::new(config);
    let seeded = app.seed_demo(now, cli.seed)?;

    match cli.command {
        Commands::Tick { limit } => print_json(&app.tick(now, limit)?)?,
        Commands::Sweep { no_suppress, limit } => {
            let suppress = if no_suppress { Some(false) } else { None };
            print_json(&app.sweep(now, suppress, limit)?)?
        }
        Commands::Recommend { contact: Some(id), .. } => {
            print_json(&app.recommend_for(&id, now)?)?
        }
        Commands::Recommend { contact: None, count } => print_json(&app.recommend(count, now)?)?,
        Commands::Heatmap { segment } => {
            print_json(&app.optimizer.histograms().heatmap(segment.as_deref(), now)?)?
        }
        Commands::Demo => {
            let flows = app.drain(now)?;
            let hygiene = app.sweep(now, None, None)?;
            let output = DemoOutput {
                seeded,
                flows,
                hygiene,
                emails_sent: app.transport.count(),
                messages: app.messages.all().len(),
                optimizer_decisions: app.audit.decision_count(),
                hygiene_evaluations: app.audit.evaluation_count(),
                suppressions: app.ledger.count(),
                events: app.events.count(),
            };
            print_json(&output)?
        }
        Commands::Run { ticks } => run_jobs(&app, ticks).await,
    }

    Ok(())
}

/// Tick and sweep sequentially on their own intervals so neither job ever
/// overlaps itself or the other.
async fn run_jobs(app: &App, max_ticks: Option<u64>) {
    let tick_every = StdDuration::from_secs(app.config.flows.tick_interval_secs.max(1));
    let sweep_every = StdDuration::from_secs(app.config.hygiene.sweep_interval_secs.max(1));
    let mut tick_interval = tokio::time::interval(tick_every);
    let mut sweep_interval = tokio::time::interval(sweep_every);
    let mut ticks = 0u64;

    info!("Lifecycle automation jobs started");

    loop {
        tokio::select! {
            _ = tick_interval.tick() => {
                match app.tick(Utc::now(), None) {
                    Ok(summary) => info!(
                        evaluated = summary.evaluated,
                        completed = summary.completed,
                        failed = summary.failed,
                        "Scheduled flow tick finished"
                    ),
                    Err(e) => error!(error = %e, "Flow tick failed"),
                }
                ticks += 1;
                if max_ticks.is_some_and(|max| ticks >= max) {
                    break;
                }
            }
            _ = sweep_interval.tick() => {
                match app.sweep(Utc::now(), None, None) {
                    Ok(summary) => info!(
                        evaluated = summary.evaluated,
                        suppressed = summary.contacts_suppressed,
                        "Scheduled hygiene sweep finished"
                    ),
                    Err(e) => error!(error = %e, "Hygiene sweep failed"),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received");
                break;
            }
        }
    }

    info!(ticks, "Lifecycle automation jobs stopped");
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
