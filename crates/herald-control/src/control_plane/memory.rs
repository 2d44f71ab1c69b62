//! In-memory control plane for testing and dry runs.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::error::{FailureKind, RemoteFailure};
use crate::types::{
    DeploymentSpec, ImageRef, ProjectId, SchedulerSpec, ServiceAccountRef, ServiceUrl,
};

use super::{ControlPlane, Operation, ResourceId};

/// A service as the in-memory control plane holds it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceRecord {
    /// Public URL.
    pub url: ServiceUrl,
    /// Image the current revision runs.
    pub image: ImageRef,
    /// Environment variable names set on the current revision.
    pub env_names: Vec<String>,
    /// Number of deploys applied to this service.
    pub revisions: u32,
}

#[derive(Debug, Default)]
struct State {
    images: HashSet<ImageRef>,
    services: HashMap<ResourceId, ServiceRecord>,
    accounts: HashSet<String>,
    bindings: HashSet<(ResourceId, String)>,
    jobs: HashMap<ResourceId, SchedulerSpec>,
    job_runs: HashMap<ResourceId, u32>,
    calls: Vec<Operation>,
    failures: HashMap<Operation, RemoteFailure>,
    latency: HashMap<Operation, Duration>,
    builds: u32,
}

/// Control plane that keeps every resource in process memory.
///
/// Resources behave like the real control plane for the calls this crate
/// issues: creating something that exists fails with `AlreadyExists`,
/// binding to a missing service or account fails with `NotFound`. Failures
/// and latency can be injected per [`Operation`], and every call is
/// recorded in order. A build pushes the tag and answers with a
/// digest-pinned reference, as a registry would.
#[derive(Debug, Default)]
pub struct MemoryControlPlane {
    state: Mutex<State>,
}

impl MemoryControlPlane {
    /// Create an empty control plane.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent `operation` fail with `failure`.
    pub fn fail(&self, operation: Operation, failure: RemoteFailure) {
        self.state.lock().failures.insert(operation, failure);
    }

    /// Make every subsequent `operation` fail with a message of `kind`.
    pub fn fail_with(&self, operation: Operation, kind: FailureKind, message: impl Into<String>) {
        self.fail(operation, RemoteFailure::new(kind, message));
    }

    /// Remove all injected failures.
    pub fn clear_failures(&self) {
        self.state.lock().failures.clear();
    }

    /// Delay every subsequent `operation` by `delay`.
    pub fn delay(&self, operation: Operation, delay: Duration) {
        self.state.lock().latency.insert(operation, delay);
    }

    /// Register an image as already present in the registry.
    pub fn seed_image(&self, image: ImageRef) {
        self.state.lock().images.insert(image);
    }

    /// Register a service as already deployed.
    pub fn seed_service(&self, id: ResourceId, url: ServiceUrl, image: ImageRef) {
        self.state.lock().services.insert(
            id,
            ServiceRecord {
                url,
                image,
                env_names: Vec::new(),
                revisions: 1,
            },
        );
    }

    /// Register a service account as already existing.
    pub fn seed_account(&self, email: impl Into<String>) {
        self.state.lock().accounts.insert(email.into());
    }

    /// Register a scheduler job as already existing.
    pub fn seed_job(&self, spec: SchedulerSpec) {
        let id = job_id(&spec);
        self.state.lock().jobs.insert(id, spec);
    }

    /// Every call issued so far, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<Operation> {
        self.state.lock().calls.clone()
    }

    /// Calls issued so far that change remote state.
    #[must_use]
    pub fn mutations(&self) -> Vec<Operation> {
        self.calls()
            .into_iter()
            .filter(Operation::is_mutation)
            .collect()
    }

    /// Number of times `operation` was issued.
    #[must_use]
    pub fn call_count(&self, operation: Operation) -> usize {
        self.state
            .lock()
            .calls
            .iter()
            .filter(|call| **call == operation)
            .count()
    }

    /// Current state of a service.
    #[must_use]
    pub fn service(&self, id: &ResourceId) -> Option<ServiceRecord> {
        self.state.lock().services.get(id).cloned()
    }

    /// Whether a service account exists.
    #[must_use]
    pub fn has_account(&self, email: &str) -> bool {
        self.state.lock().accounts.contains(email)
    }

    /// Whether `member_email` holds the invoker role on `service`.
    #[must_use]
    pub fn has_binding(&self, service: &ResourceId, member_email: &str) -> bool {
        self.state
            .lock()
            .bindings
            .contains(&(service.clone(), member_email.to_owned()))
    }

    /// Current definition of a scheduler job.
    #[must_use]
    pub fn job(&self, id: &ResourceId) -> Option<SchedulerSpec> {
        self.state.lock().jobs.get(id).cloned()
    }

    /// Number of manual runs of a scheduler job.
    #[must_use]
    pub fn job_runs(&self, id: &ResourceId) -> u32 {
        self.state.lock().job_runs.get(id).copied().unwrap_or(0)
    }

    /// Record the call, then apply latency and any injected failure.
    async fn enter(&self, operation: Operation) -> Result<(), RemoteFailure> {
        let (delay, failure) = {
            let mut state = self.state.lock();
            state.calls.push(operation);
            (
                state.latency.get(&operation).copied(),
                state.failures.get(&operation).cloned(),
            )
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        failure.map_or(Ok(()), Err)
    }
}

fn job_id(spec: &SchedulerSpec) -> ResourceId {
    ResourceId::new(spec.project.clone(), &spec.region, &spec.name)
}

/// The digest-pinned form of `tag` for the `build`th push.
fn pinned(tag: &ImageRef, build: u32) -> ImageRef {
    let repository = match tag.as_str().rsplit_once(':') {
        Some((repository, version)) if !version.contains('/') => repository,
        _ => tag.as_str(),
    };
    ImageRef::new(format!("{repository}@sha256:{build:064x}"))
}

fn service_url(id: &ResourceId) -> ServiceUrl {
    ServiceUrl::new(format!(
        "https://{}-{}.{}.run.app",
        id.name, id.project, id.region
    ))
}

#[async_trait]
impl ControlPlane for MemoryControlPlane {
    async fn describe_service(&self, id: &ResourceId) -> Result<Option<ServiceUrl>, RemoteFailure> {
        self.enter(Operation::DescribeService).await?;
        Ok(self.state.lock().services.get(id).map(|s| s.url.clone()))
    }

    async fn image_exists(
        &self,
        _project: &ProjectId,
        image: &ImageRef,
    ) -> Result<bool, RemoteFailure> {
        self.enter(Operation::ImageExists).await?;
        Ok(self.state.lock().images.contains(image))
    }

    async fn build_image(
        &self,
        _project: &ProjectId,
        _source: &Path,
        image: &ImageRef,
    ) -> Result<ImageRef, RemoteFailure> {
        self.enter(Operation::BuildImage).await?;
        let mut state = self.state.lock();
        state.builds += 1;
        let pushed = pinned(image, state.builds);
        state.images.insert(image.clone());
        state.images.insert(pushed.clone());
        Ok(pushed)
    }

    async fn deploy_service(
        &self,
        spec: &DeploymentSpec,
        image: &ImageRef,
    ) -> Result<ServiceUrl, RemoteFailure> {
        self.enter(Operation::DeployService).await?;
        let mut state = self.state.lock();
        if !state.images.contains(image) {
            return Err(RemoteFailure::new(
                FailureKind::InvalidArgument,
                format!("Image '{image}' not found."),
            ));
        }

        let id = ResourceId::new(spec.project.clone(), &spec.region, &spec.service);
        let env_names = spec.env.keys().map(|name| (*name).to_owned()).collect();
        let record = state
            .services
            .entry(id.clone())
            .and_modify(|record| {
                record.revisions += 1;
            })
            .or_insert_with(|| ServiceRecord {
                url: service_url(&id),
                image: image.clone(),
                env_names: Vec::new(),
                revisions: 1,
            });
        record.image = image.clone();
        record.env_names = env_names;
        Ok(record.url.clone())
    }

    async fn create_service_account(
        &self,
        account: &ServiceAccountRef,
    ) -> Result<(), RemoteFailure> {
        self.enter(Operation::CreateServiceAccount).await?;
        let email = account.email();
        let mut state = self.state.lock();
        if state.accounts.contains(&email) {
            return Err(RemoteFailure::new(
                FailureKind::AlreadyExists,
                format!("Service account {} already exists within project", account.short_name),
            ));
        }
        state.accounts.insert(email);
        Ok(())
    }

    async fn add_invoker_binding(
        &self,
        service: &ResourceId,
        member_email: &str,
    ) -> Result<(), RemoteFailure> {
        self.enter(Operation::AddInvokerBinding).await?;
        let mut state = self.state.lock();
        if !state.services.contains_key(service) {
            return Err(RemoteFailure::new(
                FailureKind::NotFound,
                format!("Service [{}] could not be found.", service.name),
            ));
        }
        if !state.accounts.contains(member_email) {
            return Err(RemoteFailure::new(
                FailureKind::NotFound,
                format!("Service account {member_email} does not exist."),
            ));
        }
        state
            .bindings
            .insert((service.clone(), member_email.to_owned()));
        Ok(())
    }

    async fn describe_job(&self, job: &ResourceId) -> Result<bool, RemoteFailure> {
        self.enter(Operation::DescribeJob).await?;
        Ok(self.state.lock().jobs.contains_key(job))
    }

    async fn delete_job(&self, job: &ResourceId) -> Result<(), RemoteFailure> {
        self.enter(Operation::DeleteJob).await?;
        if self.state.lock().jobs.remove(job).is_none() {
            return Err(RemoteFailure::new(
                FailureKind::NotFound,
                format!("Job {job} not found."),
            ));
        }
        Ok(())
    }

    async fn create_job(&self, spec: &SchedulerSpec) -> Result<(), RemoteFailure> {
        self.enter(Operation::CreateJob).await?;
        let id = job_id(spec);
        let mut state = self.state.lock();
        if state.jobs.contains_key(&id) {
            return Err(RemoteFailure::new(
                FailureKind::AlreadyExists,
                format!("Job {id} already exists."),
            ));
        }
        state.jobs.insert(id, spec.clone());
        Ok(())
    }

    async fn run_job(&self, job: &ResourceId) -> Result<(), RemoteFailure> {
        self.enter(Operation::RunJob).await?;
        let mut state = self.state.lock();
        if !state.jobs.contains_key(job) {
            return Err(RemoteFailure::new(
                FailureKind::NotFound,
                format!("Job {job} not found."),
            ));
        }
        *state.job_runs.entry(job.clone()).or_default() += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn account() -> ServiceAccountRef {
        ServiceAccountRef {
            short_name: "ga4-scheduler-invoker".to_owned(),
            display_name: "GA4 Analytics Scheduler".to_owned(),
            description: "Invokes the analytics agent".to_owned(),
            project: ProjectId::new("p"),
        }
    }

    #[tokio::test]
    async fn second_account_create_conflicts() {
        let plane = MemoryControlPlane::new();
        plane.create_service_account(&account()).await.unwrap();

        let err = plane.create_service_account(&account()).await.unwrap_err();
        assert_eq!(err.kind, FailureKind::AlreadyExists);
        assert!(plane.has_account(&account().email()));
    }

    #[tokio::test]
    async fn binding_requires_service() {
        let plane = MemoryControlPlane::new();
        plane.seed_account(account().email());
        let service = ResourceId::new(ProjectId::new("p"), "europe-west1", "svc");

        let err = plane
            .add_invoker_binding(&service, &account().email())
            .await
            .unwrap_err();
        assert_eq!(err.kind, FailureKind::NotFound);
    }

    #[tokio::test]
    async fn injected_failure_is_recorded_and_returned() {
        let plane = MemoryControlPlane::new();
        plane.fail_with(
            Operation::DescribeJob,
            FailureKind::PermissionDenied,
            "PERMISSION_DENIED",
        );
        let job = ResourceId::new(ProjectId::new("p"), "europe-west1", "job");

        let err = plane.describe_job(&job).await.unwrap_err();
        assert_eq!(err.kind, FailureKind::PermissionDenied);
        assert_eq!(plane.calls(), vec![Operation::DescribeJob]);
        assert!(plane.mutations().is_empty());

        plane.clear_failures();
        assert!(!plane.describe_job(&job).await.unwrap());
    }

    #[tokio::test]
    async fn delete_missing_job_is_not_found() {
        let plane = MemoryControlPlane::new();
        let job = ResourceId::new(ProjectId::new("p"), "europe-west1", "job");
        let err = plane.delete_job(&job).await.unwrap_err();
        assert_eq!(err.kind, FailureKind::NotFound);
    }
}
