//! Deployment orchestration.
//!
//! This module drives a run from pre-flight validation through image build,
//! service deploy, permission binding and scheduling.

mod orchestrator;

pub use orchestrator::{DeploymentManager, DeploymentRequest, RunOutcome};
