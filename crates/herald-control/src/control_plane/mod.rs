//! Access to the cloud control plane.
//!
//! [`ControlPlane`] is the raw backend seam: one method per remote call,
//! failures reported as classified [`RemoteFailure`]s. [`ResourceClient`]
//! sits on top and turns those into the typed per-step errors, bounding
//! every call with its configured timeout.

mod client;
mod gcloud;
mod memory;

pub use client::{JobReplacement, ResourceClient};
pub use gcloud::GcloudControlPlane;
pub use memory::MemoryControlPlane;

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;

use crate::config::{BackendType, ControlPlaneConfig};
use crate::error::{ControlResult, RemoteFailure};
use crate::types::{DeploymentSpec, ImageRef, ProjectId, SchedulerSpec, ServiceAccountRef, ServiceUrl};

/// A named, regional resource inside a project.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct ResourceId {
    /// Owning project.
    pub project: ProjectId,
    /// Region or location.
    pub region: String,
    /// Resource name.
    pub name: String,
}

impl ResourceId {
    /// Create a resource identifier.
    #[must_use]
    pub fn new(project: ProjectId, region: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            project,
            region: region.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.project, self.region, self.name)
    }
}

/// Remote calls issued against the control plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    /// Look up a deployed service.
    DescribeService,
    /// Check whether an image tag exists in the registry.
    ImageExists,
    /// Build and push an image.
    BuildImage,
    /// Create or update a service.
    DeployService,
    /// Create a service account.
    CreateServiceAccount,
    /// Grant the invoker role on a service.
    AddInvokerBinding,
    /// Look up a scheduler job.
    DescribeJob,
    /// Delete a scheduler job.
    DeleteJob,
    /// Create a scheduler job.
    CreateJob,
    /// Run a scheduler job once.
    RunJob,
}

impl Operation {
    /// Operation name as a static string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::DescribeService => "describe_service",
            Self::ImageExists => "image_exists",
            Self::BuildImage => "build_image",
            Self::DeployService => "deploy_service",
            Self::CreateServiceAccount => "create_service_account",
            Self::AddInvokerBinding => "add_invoker_binding",
            Self::DescribeJob => "describe_job",
            Self::DeleteJob => "delete_job",
            Self::CreateJob => "create_job",
            Self::RunJob => "run_job",
        }
    }

    /// Whether the call changes remote state.
    #[must_use]
    pub const fn is_mutation(&self) -> bool {
        !matches!(
            self,
            Self::DescribeService | Self::ImageExists | Self::DescribeJob
        )
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Backend for the raw control-plane calls.
///
/// Implementations report failures verbatim; they never decide whether a
/// failure is fatal.
#[async_trait]
pub trait ControlPlane: Send + Sync {
    /// Look up a service. Absence is `Ok(None)`, not an error.
    async fn describe_service(&self, id: &ResourceId) -> Result<Option<ServiceUrl>, RemoteFailure>;

    /// Whether an image tag already exists in the registry.
    async fn image_exists(
        &self,
        project: &ProjectId,
        image: &ImageRef,
    ) -> Result<bool, RemoteFailure>;

    /// Build `source` with the external build service and push it as `image`.
    async fn build_image(
        &self,
        project: &ProjectId,
        source: &Path,
        image: &ImageRef,
    ) -> Result<ImageRef, RemoteFailure>;

    /// Create the service running `image`, or replace its configuration if
    /// it exists.
    async fn deploy_service(
        &self,
        spec: &DeploymentSpec,
        image: &ImageRef,
    ) -> Result<ServiceUrl, RemoteFailure>;

    /// Create a service account.
    async fn create_service_account(&self, account: &ServiceAccountRef)
        -> Result<(), RemoteFailure>;

    /// Grant `member_email` the invoker role on a service.
    async fn add_invoker_binding(
        &self,
        service: &ResourceId,
        member_email: &str,
    ) -> Result<(), RemoteFailure>;

    /// Whether a scheduler job exists.
    async fn describe_job(&self, job: &ResourceId) -> Result<bool, RemoteFailure>;

    /// Delete a scheduler job.
    async fn delete_job(&self, job: &ResourceId) -> Result<(), RemoteFailure>;

    /// Create a scheduler job.
    async fn create_job(&self, spec: &SchedulerSpec) -> Result<(), RemoteFailure>;

    /// Fire a scheduler job once, outside its schedule.
    async fn run_job(&self, job: &ResourceId) -> Result<(), RemoteFailure>;
}

/// Create a control-plane backend from configuration.
pub fn create_control_plane(config: &ControlPlaneConfig) -> ControlResult<Arc<dyn ControlPlane>> {
    match config.backend {
        BackendType::Gcloud => {
            let plane = GcloudControlPlane::new(&config.gcloud_binary)?;
            Ok(Arc::new(plane))
        }
        BackendType::Memory => Ok(Arc::new(MemoryControlPlane::new())),
    }
}
