//! Herald Control
//!
//! This crate provisions the analytics agent on a managed compute platform
//! and keeps a recurring trigger pointed at it. Every step is idempotent:
//! running the same deployment twice converges on the same remote state.
//!
//! # Architecture
//!
//! - **Precondition gate**: rejects placeholder endpoints and missing
//!   credentials before anything remote is touched
//! - **Resource client**: typed, time-bounded calls to the control plane,
//!   over a pluggable [`ControlPlane`] backend
//! - **Reconciler**: turns create calls into idempotent steps reporting a
//!   [`ReconciliationResult`]
//! - **Permission binder**: ensures the scheduler identity exists and may
//!   invoke the service
//! - **Deployment orchestration**: drives a run through its phases and
//!   produces a [`RunReport`]
//!
//! # State Machine
//!
//! Runs follow a strict state machine enforced at compile time using the
//! typestate pattern:
//!
//! ```text
//! Validating ──▶ BuildingImage ──▶ Deploying ──▶ AwaitingServiceUrl
//!                                                     │
//!                                                     ▼
//!                      Done ◀── SchedulingJob ◀── BindingPermissions
//!
//! any non-terminal state ──▶ Aborted
//! ```
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//!
//! use herald_control::{
//!     ControlConfig, DeploymentManager, DeploymentRequest, MemoryControlPlane, Pipeline,
//! };
//!
//! let config = ControlConfig::load()?;
//! let request = DeploymentRequest::from_config(&config, Pipeline::Full)?;
//! let manager = DeploymentManager::new(
//!     Arc::new(MemoryControlPlane::new()),
//!     config.control_plane.timeouts,
//! );
//!
//! let report = manager.run(&request).await.into_report();
//! println!("{}", report.render());
//! ```

#![forbid(unsafe_code)]

pub mod binder;
pub mod config;
pub mod control_plane;
pub mod decision;
pub mod deployment;
pub mod error;
pub mod gate;
pub mod reconcile;
pub mod report;
pub mod state;
pub mod types;

// Re-export commonly used types at the crate root
pub use binder::PermissionBinder;
pub use config::ControlConfig;
pub use control_plane::{
    create_control_plane, ControlPlane, GcloudControlPlane, MemoryControlPlane, Operation,
    ResourceClient, ResourceId,
};
pub use decision::{decide, Answer, Decision, Prompt};
pub use deployment::{DeploymentManager, DeploymentRequest, RunOutcome};
pub use error::{ControlError, ControlResult};
pub use gate::GateOverrides;
pub use reconcile::{ReconciliationResult, Reconciler, StepError};
pub use report::{RunReport, StepRecord, TerminalState, TriggerOutcome};
pub use state::{Phase, Pipeline, Run};
pub use types::{DeploymentSpec, ImageRef, ProjectId, SchedulerSpec, ServiceAccountRef, ServiceUrl};
