//! Flow execution: contacts enter flows on trigger events and advance
//! through delay, segment-filter and send steps on each tick.

pub mod engine;
pub mod evaluator;
pub mod state_machine;
pub mod store;
pub mod types;
pub mod validation;

pub use engine::{FlowCollaborators, FlowEngine, FlowStats, RunOutcome};
pub use evaluator::{StepAction, StepEvaluator};
pub use store::{FlowStore, InMemoryFlowStore};
pub use types::*;
