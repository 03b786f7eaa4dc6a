//! Scheduling of replay runs across networks.

pub mod orchestrator;

pub use orchestrator::{NetworkRunSummary, OrchestrationError, Orchestrator};
