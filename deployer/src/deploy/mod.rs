//! Deployment module

pub mod descriptor;
pub mod fsm;
pub mod naming;
pub mod orchestrator;

pub use orchestrator::{DeployOutcome, Orchestrator, OrchestratorOptions};
