//! Idempotent wrappers over the resource client.
//!
//! Every mutating step is reduced to a [`ReconciliationResult`]. Only create
//! calls ever turn an "already exists" failure into success; updates and
//! replacements report what they did.

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use serde::{Serialize, Serializer};
use tracing::{info, warn};

use crate::control_plane::{JobReplacement, ResourceClient, ResourceId};
use crate::error::{
    AccountError, AlreadyExists, BindError, BuildError, DeployError, DiscoveryError,
    SchedulerError, ValidationError,
};
use crate::types::{DeploymentSpec, ImageRef, ProjectId, SchedulerSpec, ServiceAccountRef, ServiceUrl};

/// The typed cause of a failed step.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StepError {
    /// Pre-flight validation failed.
    #[error(transparent)]
    Validation(#[from] ValidationError),
    /// Image build failed.
    #[error(transparent)]
    Build(#[from] BuildError),
    /// Service deploy failed.
    #[error(transparent)]
    Deploy(#[from] DeployError),
    /// Service account creation failed.
    #[error(transparent)]
    Account(#[from] AccountError),
    /// Invoker binding failed.
    #[error(transparent)]
    Bind(#[from] BindError),
    /// Scheduler job creation failed.
    #[error(transparent)]
    Scheduler(#[from] SchedulerError),
    /// Service lookup failed.
    #[error(transparent)]
    Discovery(#[from] DiscoveryError),
}

impl StepError {
    /// Short name of the concern that failed.
    #[must_use]
    pub const fn source_name(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::Build(_) => "build",
            Self::Deploy(_) => "deploy",
            Self::Account(_) => "service_account",
            Self::Bind(_) => "binding",
            Self::Scheduler(_) => "scheduler",
            Self::Discovery(_) => "discovery",
        }
    }
}

impl Serialize for StepError {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Outcome of one reconciled step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "cause", rename_all = "snake_case")]
pub enum ReconciliationResult {
    /// The resource did not exist and was created.
    Created,
    /// The resource was already in the desired state.
    AlreadyExists,
    /// The resource existed and was brought to the desired state.
    Updated,
    /// The step failed.
    Failed(StepError),
}

impl ReconciliationResult {
    /// Whether the step failed.
    #[must_use]
    pub const fn is_failed(&self) -> bool {
        matches!(self, Self::Failed(_))
    }

    /// The failure cause, if any.
    #[must_use]
    pub const fn error(&self) -> Option<&StepError> {
        match self {
            Self::Failed(error) => Some(error),
            _ => None,
        }
    }

    /// `Updated` if the resource existed beforehand, otherwise `Created`.
    #[must_use]
    pub const fn applied(existed: bool) -> Self {
        if existed {
            Self::Updated
        } else {
            Self::Created
        }
    }

    /// Normalise the result of a create call.
    ///
    /// "Already exists" counts as success; every other error fails the step.
    pub fn from_create<E>(result: Result<(), E>) -> Self
    where
        E: AlreadyExists + Into<StepError>,
    {
        match result {
            Ok(()) => Self::Created,
            Err(e) if e.is_already_exists() => Self::AlreadyExists,
            Err(e) => Self::Failed(e.into()),
        }
    }
}

impl fmt::Display for ReconciliationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created => f.write_str("created"),
            Self::AlreadyExists => f.write_str("already exists"),
            Self::Updated => f.write_str("updated"),
            Self::Failed(error) => write!(f, "failed: {error}"),
        }
    }
}

/// Wraps resource client calls so that re-running a step is safe.
///
/// Steps that produce a value the next phase needs return it alongside the
/// result; their `Ok` result is never `Failed`.
#[derive(Debug, Clone)]
pub struct Reconciler {
    client: Arc<ResourceClient>,
}

impl Reconciler {
    /// Create a reconciler over a shared client.
    #[must_use]
    pub fn new(client: Arc<ResourceClient>) -> Self {
        Self { client }
    }

    /// Make sure `tag` exists in the registry.
    ///
    /// With `skip_build` the tag must already exist. Otherwise the image is
    /// always rebuilt, reporting `Updated` when the tag was overwritten.
    pub async fn ensure_image(
        &self,
        project: &ProjectId,
        source: &Path,
        tag: &ImageRef,
        skip_build: bool,
    ) -> Result<(ReconciliationResult, ImageRef), StepError> {
        if skip_build {
            if !self.client.image_exists(project, tag).await? {
                return Err(BuildError::MissingImage(tag.to_string()).into());
            }
            info!(image = %tag, "build skipped, using existing image");
            return Ok((ReconciliationResult::AlreadyExists, tag.clone()));
        }

        // Only decides Created vs Updated; the build itself is authoritative.
        let existed = match self.client.image_exists(project, tag).await {
            Ok(existed) => existed,
            Err(e) => {
                warn!(image = %tag, error = %e, "could not look up existing image, building anyway");
                false
            }
        };

        let image = self
            .client
            .build_and_push_image(project, source, tag)
            .await?;
        Ok((ReconciliationResult::applied(existed), image))
    }

    /// Create or update the service to run `image`, returning its URL.
    pub async fn ensure_service(
        &self,
        spec: &DeploymentSpec,
        image: &ImageRef,
    ) -> Result<(ReconciliationResult, ServiceUrl), StepError> {
        let id = ResourceId::new(spec.project.clone(), &spec.region, &spec.service);
        let existed = self.client.describe_service(&id).await?.is_some();
        let url = self.client.deploy_service(spec, image).await?;
        Ok((ReconciliationResult::applied(existed), url))
    }

    /// Make sure the signing identity exists.
    pub async fn ensure_service_account(&self, account: &ServiceAccountRef) -> ReconciliationResult {
        let result =
            ReconciliationResult::from_create(self.client.create_service_account(account).await);
        if result == ReconciliationResult::AlreadyExists {
            info!(account = %account.email(), "service account already exists");
        }
        result
    }

    /// Make the scheduler job match `spec`, replacing any existing one.
    pub async fn ensure_scheduler_job(&self, spec: &SchedulerSpec) -> ReconciliationResult {
        match self.client.create_or_replace_scheduler_job(spec).await {
            Ok(JobReplacement::Created) => ReconciliationResult::Created,
            Ok(JobReplacement::Replaced) => ReconciliationResult::Updated,
            Err(e) if e.is_already_exists() => {
                // Recreated concurrently between our delete and create.
                warn!(job = %spec.name, "scheduler job reappeared during replacement");
                ReconciliationResult::AlreadyExists
            }
            Err(e) => ReconciliationResult::Failed(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use rstest::rstest;

    use super::*;
    use crate::config::TimeoutConfig;
    use crate::control_plane::{MemoryControlPlane, Operation};
    use crate::error::FailureKind;

    fn account() -> ServiceAccountRef {
        ServiceAccountRef {
            short_name: "ga4-scheduler-invoker".to_owned(),
            display_name: "GA4 Analytics Scheduler".to_owned(),
            description: "Invokes the analytics agent".to_owned(),
            project: ProjectId::new("p"),
        }
    }

    fn reconciler(plane: &Arc<MemoryControlPlane>) -> Reconciler {
        let client = ResourceClient::new(Arc::clone(plane) as Arc<dyn crate::control_plane::ControlPlane>, TimeoutConfig::default());
        Reconciler::new(Arc::new(client))
    }

    #[rstest]
    #[case(Ok(()), ReconciliationResult::Created)]
    #[case(
        Err(AccountError::AlreadyExists("exists".to_owned())),
        ReconciliationResult::AlreadyExists
    )]
    #[case(
        Err(AccountError::PermissionDenied("denied".to_owned())),
        ReconciliationResult::Failed(StepError::Account(AccountError::PermissionDenied("denied".to_owned())))
    )]
    fn create_normalisation(
        #[case] result: Result<(), AccountError>,
        #[case] expected: ReconciliationResult,
    ) {
        assert_eq!(ReconciliationResult::from_create(result), expected);
    }

    #[tokio::test]
    async fn existing_account_is_success() {
        let plane = Arc::new(MemoryControlPlane::new());
        plane.seed_account(account().email());

        let result = reconciler(&plane).ensure_service_account(&account()).await;

        assert_eq!(result, ReconciliationResult::AlreadyExists);
    }

    #[tokio::test]
    async fn account_permission_failure_is_reported() {
        let plane = Arc::new(MemoryControlPlane::new());
        plane.fail_with(
            Operation::CreateServiceAccount,
            FailureKind::PermissionDenied,
            "PERMISSION_DENIED: iam.serviceAccounts.create",
        );

        let result = reconciler(&plane).ensure_service_account(&account()).await;

        assert!(matches!(
            result,
            ReconciliationResult::Failed(StepError::Account(AccountError::PermissionDenied(_)))
        ));
    }

    #[tokio::test]
    async fn skip_build_requires_existing_image() {
        let plane = Arc::new(MemoryControlPlane::new());
        let tag = ImageRef::new("gcr.io/p/agent:latest");
        let source = PathBuf::from(".");

        let result = reconciler(&plane)
            .ensure_image(&ProjectId::new("p"), &source, &tag, true)
            .await;

        assert_eq!(
            result,
            Err(StepError::Build(BuildError::MissingImage(
                "gcr.io/p/agent:latest".to_owned()
            )))
        );
        assert_eq!(plane.call_count(Operation::BuildImage), 0);
    }

    #[tokio::test]
    async fn rebuild_over_existing_tag_is_update() {
        let plane = Arc::new(MemoryControlPlane::new());
        let tag = ImageRef::new("gcr.io/p/agent:latest");
        plane.seed_image(tag.clone());

        let (result, image) = reconciler(&plane)
            .ensure_image(&ProjectId::new("p"), Path::new("."), &tag, false)
            .await
            .unwrap();

        assert_eq!(result, ReconciliationResult::Updated);
        assert!(image.as_str().starts_with("gcr.io/p/agent@sha256:"));
    }

    #[tokio::test]
    async fn unreadable_registry_does_not_block_build() {
        let plane = Arc::new(MemoryControlPlane::new());
        plane.fail_with(
            Operation::ImageExists,
            FailureKind::Other,
            "ERROR: (gcloud.container.images.describe) unexpected registry response",
        );
        let tag = ImageRef::new("gcr.io/p/agent:latest");

        let (result, _) = reconciler(&plane)
            .ensure_image(&ProjectId::new("p"), Path::new("."), &tag, false)
            .await
            .unwrap();

        assert_eq!(result, ReconciliationResult::Created);
        assert_eq!(plane.call_count(Operation::BuildImage), 1);
    }

    #[tokio::test]
    async fn unreadable_registry_fails_skip_build() {
        let plane = Arc::new(MemoryControlPlane::new());
        plane.fail_with(
            Operation::ImageExists,
            FailureKind::Other,
            "ERROR: (gcloud.container.images.describe) unexpected registry response",
        );
        let tag = ImageRef::new("gcr.io/p/agent:latest");

        let result = reconciler(&plane)
            .ensure_image(&ProjectId::new("p"), Path::new("."), &tag, true)
            .await;

        assert!(matches!(result, Err(StepError::Build(_))));
        assert_eq!(plane.call_count(Operation::BuildImage), 0);
    }

    #[tokio::test]
    async fn second_deploy_is_update() {
        use std::collections::BTreeMap;

        use crate::types::{AccessPolicy, ResourceLimits};

        let plane = Arc::new(MemoryControlPlane::new());
        let image = ImageRef::new("gcr.io/p/agent:latest");
        plane.seed_image(image.clone());
        let spec = DeploymentSpec {
            service: "agent".to_owned(),
            region: "europe-west1".to_owned(),
            project: ProjectId::new("p"),
            image: image.clone(),
            env: BTreeMap::new(),
            limits: ResourceLimits::default(),
            access: AccessPolicy::Authenticated,
        };
        let reconciler = reconciler(&plane);

        let (first, url) = reconciler.ensure_service(&spec, &image).await.unwrap();
        let (second, again) = reconciler.ensure_service(&spec, &image).await.unwrap();

        assert_eq!(first, ReconciliationResult::Created);
        assert_eq!(second, ReconciliationResult::Updated);
        assert_eq!(url, again);
    }

    #[test]
    fn failed_result_serialises_cause() {
        let result = ReconciliationResult::Failed(StepError::Bind(BindError::NotFound(
            "svc".to_owned(),
        )));
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["outcome"], "failed");
        assert_eq!(json["cause"], "binding target not found: svc");
    }
}
