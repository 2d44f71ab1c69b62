//! Common test utilities for herald-control integration tests.

#![allow(dead_code)]

pub mod fixtures;

use herald_control::config::TimeoutConfig;
use herald_control::{
    ControlConfig, DeploymentManager, DeploymentRequest, MemoryControlPlane, Pipeline, RunReport,
};
use std::sync::Arc;

/// An in-memory control plane wired to a deployment manager.
pub struct TestHarness {
    pub plane: Arc<MemoryControlPlane>,
    pub manager: DeploymentManager,
}

impl TestHarness {
    /// Creates a harness with default timeouts.
    pub fn new() -> Self {
        Self::with_timeouts(TimeoutConfig::default())
    }

    /// Creates a harness with custom per-call timeouts.
    pub fn with_timeouts(timeouts: TimeoutConfig) -> Self {
        let plane = Arc::new(MemoryControlPlane::new());
        let manager = DeploymentManager::new(plane.clone(), timeouts);
        Self { plane, manager }
    }

    /// Runs a request to its terminal state and returns the report.
    pub async fn run(&self, request: &DeploymentRequest) -> RunReport {
        self.manager.run(request).await.into_report()
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

/// Builds a request from configuration, panicking on invalid config.
pub fn request(config: &ControlConfig, pipeline: Pipeline) -> DeploymentRequest {
    DeploymentRequest::from_config(config, pipeline).expect("valid test configuration")
}
