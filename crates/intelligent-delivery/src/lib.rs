//! Intelligent delivery: hour-of-week send-time optimization, hygiene risk
//! scoring, the suppression ledger and send eligibility.

pub mod eligibility;
pub mod histogram;
pub mod hygiene;
pub mod outcomes;
pub mod send_time;
pub mod suppression;

pub use eligibility::{check_eligibility, Ineligible};
pub use histogram::{HistogramStore, HourHistogram};
pub use hygiene::{HygieneSweeper, SweepOptions, SweepSummary};
pub use outcomes::OutcomeRecorder;
pub use send_time::{Recommendation, SendTimeAdvisor, SendTimeOptimizer};
pub use suppression::SuppressionLedger;
