//! Typed, time-bounded access to the control plane.

use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::config::TimeoutConfig;
use crate::error::{AccountError, BindError, BuildError, DeployError, DiscoveryError, SchedulerError};
use crate::types::{DeploymentSpec, ImageRef, ProjectId, SchedulerSpec, ServiceAccountRef, ServiceUrl};

use super::{ControlPlane, ResourceId};

/// How [`ResourceClient::create_or_replace_scheduler_job`] reached its result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobReplacement {
    /// No job existed; one was created.
    Created,
    /// An existing job was deleted and recreated.
    Replaced,
}

/// Client for the remote resources a deployment touches.
///
/// Every call is bounded by the matching timeout in [`TimeoutConfig`]. A
/// call that runs out of time surfaces as the `TimedOut` variant of its
/// error type and is not retried.
#[derive(Clone)]
pub struct ResourceClient {
    plane: Arc<dyn ControlPlane>,
    timeouts: TimeoutConfig,
}

impl std::fmt::Debug for ResourceClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceClient")
            .field("timeouts", &self.timeouts)
            .finish_non_exhaustive()
    }
}

async fn bounded<T, E>(
    limit: Duration,
    call: impl Future<Output = Result<T, E>>,
    timed_out: impl FnOnce(Duration) -> E,
) -> Result<T, E> {
    tokio::time::timeout(limit, call)
        .await
        .unwrap_or_else(|_| Err(timed_out(limit)))
}

impl ResourceClient {
    /// Create a client over a control-plane backend.
    #[must_use]
    pub fn new(plane: Arc<dyn ControlPlane>, timeouts: TimeoutConfig) -> Self {
        Self { plane, timeouts }
    }

    /// Look up the URL of a deployed service, if it exists.
    pub async fn describe_service(
        &self,
        id: &ResourceId,
    ) -> Result<Option<ServiceUrl>, DiscoveryError> {
        bounded(
            self.timeouts.describe(),
            async { self.plane.describe_service(id).await.map_err(Into::into) },
            DiscoveryError::TimedOut,
        )
        .await
    }

    /// Look up a service that must already exist.
    pub async fn require_service(&self, id: &ResourceId) -> Result<ServiceUrl, DiscoveryError> {
        self.describe_service(id)
            .await?
            .ok_or_else(|| DiscoveryError::NotDeployed {
                service: id.name.clone(),
                region: id.region.clone(),
            })
    }

    /// Whether an image tag exists in the registry.
    pub async fn image_exists(
        &self,
        project: &ProjectId,
        image: &ImageRef,
    ) -> Result<bool, BuildError> {
        bounded(
            self.timeouts.describe(),
            async { self.plane.image_exists(project, image).await.map_err(Into::into) },
            BuildError::TimedOut,
        )
        .await
    }

    /// Build `source` and push it under `tag`.
    pub async fn build_and_push_image(
        &self,
        project: &ProjectId,
        source: &Path,
        tag: &ImageRef,
    ) -> Result<ImageRef, BuildError> {
        info!(image = %tag, source = %source.display(), "submitting image build");
        let image = bounded(
            self.timeouts.build(),
            async { self.plane.build_image(project, source, tag).await.map_err(Into::into) },
            BuildError::TimedOut,
        )
        .await?;
        info!(image = %image, "image pushed");
        Ok(image)
    }

    /// Create the service running `image`, or update it in place, and return its URL.
    pub async fn deploy_service(
        &self,
        spec: &DeploymentSpec,
        image: &ImageRef,
    ) -> Result<ServiceUrl, DeployError> {
        info!(service = %spec.service, region = %spec.region, image = %image, "deploying service");
        let url = bounded(
            self.timeouts.deploy(),
            async { self.plane.deploy_service(spec, image).await.map_err(Into::into) },
            DeployError::TimedOut,
        )
        .await?;
        info!(service = %spec.service, url = %url, "service deployed");
        Ok(url)
    }

    /// Create a service account. An existing account is `AccountError::AlreadyExists`.
    pub async fn create_service_account(
        &self,
        account: &ServiceAccountRef,
    ) -> Result<(), AccountError> {
        debug!(account = %account.email(), "creating service account");
        bounded(
            self.timeouts.iam(),
            async { self.plane.create_service_account(account).await.map_err(Into::into) },
            AccountError::TimedOut,
        )
        .await
    }

    /// Grant `member_email` the invoker role on `service`.
    pub async fn bind_invoker_role(
        &self,
        service: &ResourceId,
        member_email: &str,
    ) -> Result<(), BindError> {
        bounded(
            self.timeouts.iam(),
            async {
                self.plane
                    .add_invoker_binding(service, member_email)
                    .await
                    .map_err(Into::into)
            },
            BindError::TimedOut,
        )
        .await
    }

    /// Whether a scheduler job exists.
    pub async fn scheduler_job_exists(&self, job: &ResourceId) -> Result<bool, SchedulerError> {
        bounded(
            self.timeouts.scheduler(),
            async { self.plane.describe_job(job).await.map_err(Into::into) },
            SchedulerError::TimedOut,
        )
        .await
    }

    /// Delete a scheduler job.
    pub async fn delete_scheduler_job(&self, job: &ResourceId) -> Result<(), SchedulerError> {
        bounded(
            self.timeouts.scheduler(),
            async { self.plane.delete_job(job).await.map_err(Into::into) },
            SchedulerError::TimedOut,
        )
        .await
    }

    /// Create a scheduler job. An existing job is `SchedulerError::AlreadyExists`.
    pub async fn create_scheduler_job(&self, spec: &SchedulerSpec) -> Result<(), SchedulerError> {
        bounded(
            self.timeouts.scheduler(),
            async { self.plane.create_job(spec).await.map_err(Into::into) },
            SchedulerError::TimedOut,
        )
        .await
    }

    /// Make the job match `spec`: delete it if present, then create it.
    ///
    /// Between the delete and the create no job exists, so a trigger due in
    /// that window is missed. A job deleted by someone else between the
    /// lookup and the delete is treated as already gone.
    pub async fn create_or_replace_scheduler_job(
        &self,
        spec: &SchedulerSpec,
    ) -> Result<JobReplacement, SchedulerError> {
        let job = ResourceId::new(spec.project.clone(), &spec.region, &spec.name);

        let replaced = if self.scheduler_job_exists(&job).await? {
            info!(job = %spec.name, "replacing existing scheduler job");
            match self.delete_scheduler_job(&job).await {
                Ok(()) | Err(SchedulerError::NotFound(_)) => true,
                Err(e) => return Err(e),
            }
        } else {
            false
        };

        self.create_scheduler_job(spec).await?;
        info!(job = %spec.name, cron = %spec.cron, timezone = %spec.timezone, "scheduler job created");

        Ok(if replaced {
            JobReplacement::Replaced
        } else {
            JobReplacement::Created
        })
    }

    /// Fire a scheduler job once.
    pub async fn run_scheduler_job(&self, job: &ResourceId) -> Result<(), SchedulerError> {
        let result = bounded(
            self.timeouts.scheduler(),
            async { self.plane.run_job(job).await.map_err(Into::into) },
            SchedulerError::TimedOut,
        )
        .await;
        if let Err(e) = &result {
            warn!(job = %job.name, error = %e, "manual trigger failed");
        }
        result
    }
}
