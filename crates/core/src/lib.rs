//! Shared data model, collaborator contracts and ambient plumbing for the
//! lifecycle automation engines.

pub mod config;
pub mod demo;
pub mod error;
pub mod event_bus;
pub mod mail;
pub mod memory;
pub mod store;
pub mod templates;
pub mod types;

pub use config::AppConfig;
pub use error::{LifecycleError, LifecycleResult};
