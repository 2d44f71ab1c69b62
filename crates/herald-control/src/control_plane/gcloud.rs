//! Control plane driven through the `gcloud` command-line tool.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, instrument};

use crate::error::{ControlError, ControlResult, FailureKind, RemoteFailure};
use crate::types::{
    AccessPolicy, DeploymentSpec, ImageRef, ProjectId, SchedulerSpec, ServiceAccountRef,
    ServiceUrl,
};

use super::{ControlPlane, ResourceId};

/// Delimiter for `--set-env-vars` so values may contain commas.
const ENV_DELIMITER: &str = "@@";

/// Role granted to the scheduler identity.
pub const INVOKER_ROLE: &str = "roles/run.invoker";

/// Control plane backed by the `gcloud` CLI.
///
/// Every call spawns a child process with `kill_on_drop`, so a caller that
/// abandons the future (for example on timeout) also stops the process.
#[derive(Debug, Clone)]
pub struct GcloudControlPlane {
    binary: PathBuf,
}

impl GcloudControlPlane {
    /// Locate the gcloud binary and create the backend.
    pub fn new(binary: impl AsRef<Path>) -> ControlResult<Self> {
        let binary = which::which(binary.as_ref()).map_err(|e| {
            ControlError::Unavailable(format!(
                "`{}` not found ({e}); install the Google Cloud SDK or set control_plane.gcloud_binary",
                binary.as_ref().display()
            ))
        })?;
        Ok(Self { binary })
    }

    async fn run(&self, args: Vec<String>) -> Result<String, RemoteFailure> {
        // Only the command path is logged; flags may carry credentials.
        let command: Vec<&str> = args
            .iter()
            .take_while(|arg| !arg.starts_with("--"))
            .map(String::as_str)
            .collect();
        debug!(command = %command.join(" "), "invoking gcloud");

        let output = Command::new(&self.binary)
            .args(&args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| {
                RemoteFailure::new(
                    FailureKind::Other,
                    format!("failed to run {}: {e}", self.binary.display()),
                )
            })?;

        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).trim().to_owned())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            Err(RemoteFailure::from_message(stderr.trim()))
        }
    }
}

fn scoped(project: &ProjectId, mut args: Vec<String>) -> Vec<String> {
    args.push(format!("--project={project}"));
    args
}

fn env_vars_arg(spec: &DeploymentSpec) -> String {
    let pairs: Vec<String> = spec
        .env
        .iter()
        .map(|(name, value)| format!("{name}={}", value.expose()))
        .collect();
    format!("--set-env-vars=^{ENV_DELIMITER}^{}", pairs.join(ENV_DELIMITER))
}

fn deploy_args(spec: &DeploymentSpec, image: &ImageRef) -> Vec<String> {
    let limits = &spec.limits;
    let access = match spec.access {
        AccessPolicy::Public => "--allow-unauthenticated",
        AccessPolicy::Authenticated => "--no-allow-unauthenticated",
    };
    scoped(
        &spec.project,
        vec![
            "run".to_owned(),
            "deploy".to_owned(),
            spec.service.clone(),
            format!("--image={image}"),
            format!("--region={}", spec.region),
            "--platform=managed".to_owned(),
            format!("--memory={}", limits.memory),
            format!("--cpu={}", limits.cpu),
            format!("--timeout={}", limits.timeout_secs),
            format!("--min-instances={}", limits.min_instances),
            format!("--max-instances={}", limits.max_instances),
            env_vars_arg(spec),
            access.to_owned(),
            "--quiet".to_owned(),
        ],
    )
}

fn create_job_args(spec: &SchedulerSpec) -> Vec<String> {
    scoped(
        &spec.project,
        vec![
            "scheduler".to_owned(),
            "jobs".to_owned(),
            "create".to_owned(),
            "http".to_owned(),
            spec.name.clone(),
            format!("--location={}", spec.region),
            format!("--schedule={}", spec.cron),
            format!("--time-zone={}", spec.timezone),
            format!("--uri={}", spec.target_uri),
            format!("--http-method={}", spec.method),
            format!("--message-body={}", spec.body),
            "--headers=Content-Type=application/json".to_owned(),
            format!("--oidc-service-account-email={}", spec.signer_email),
            format!("--oidc-token-audience={}", spec.audience),
            "--quiet".to_owned(),
        ],
    )
}

fn job_args(verb: &str, job: &ResourceId) -> Vec<String> {
    scoped(
        &job.project,
        vec![
            "scheduler".to_owned(),
            "jobs".to_owned(),
            verb.to_owned(),
            job.name.clone(),
            format!("--location={}", job.region),
        ],
    )
}

fn image_describe_args(image: &ImageRef) -> Vec<String> {
    let registry: &[&str] = if image.as_str().contains("-docker.pkg.dev/") {
        &["artifacts", "docker", "images"]
    } else {
        &["container", "images"]
    };
    let mut args: Vec<String> = registry.iter().map(|part| (*part).to_owned()).collect();
    args.push("describe".to_owned());
    args.push(image.to_string());
    args.push("--format=value(image_summary.digest)".to_owned());
    args
}

#[async_trait]
impl ControlPlane for GcloudControlPlane {
    #[instrument(skip(self), fields(service = %id.name, region = %id.region))]
    async fn describe_service(&self, id: &ResourceId) -> Result<Option<ServiceUrl>, RemoteFailure> {
        let args = scoped(
            &id.project,
            vec![
                "run".to_owned(),
                "services".to_owned(),
                "describe".to_owned(),
                id.name.clone(),
                format!("--region={}", id.region),
                "--format=value(status.url)".to_owned(),
            ],
        );
        match self.run(args).await {
            Ok(url) if url.is_empty() => Ok(None),
            Ok(url) => Ok(Some(ServiceUrl::new(url))),
            Err(failure) if failure.kind == FailureKind::NotFound => Ok(None),
            Err(failure) => Err(failure),
        }
    }

    async fn image_exists(
        &self,
        project: &ProjectId,
        image: &ImageRef,
    ) -> Result<bool, RemoteFailure> {
        match self.run(scoped(project, image_describe_args(image))).await {
            Ok(_) => Ok(true),
            Err(failure) if failure.kind == FailureKind::NotFound => Ok(false),
            Err(failure) => Err(failure),
        }
    }

    #[instrument(skip(self), fields(image = %image))]
    async fn build_image(
        &self,
        project: &ProjectId,
        source: &Path,
        image: &ImageRef,
    ) -> Result<ImageRef, RemoteFailure> {
        let args = scoped(
            project,
            vec![
                "builds".to_owned(),
                "submit".to_owned(),
                source.display().to_string(),
                format!("--tag={image}"),
                "--quiet".to_owned(),
            ],
        );
        self.run(args).await?;
        Ok(image.clone())
    }

    #[instrument(skip(self, spec), fields(service = %spec.service, region = %spec.region))]
    async fn deploy_service(
        &self,
        spec: &DeploymentSpec,
        image: &ImageRef,
    ) -> Result<ServiceUrl, RemoteFailure> {
        self.run(deploy_args(spec, image)).await?;

        let id = ResourceId::new(spec.project.clone(), &spec.region, &spec.service);
        self.describe_service(&id).await?.ok_or_else(|| {
            RemoteFailure::new(
                FailureKind::Other,
                format!("service {id} deployed but reported no URL"),
            )
        })
    }

    async fn create_service_account(
        &self,
        account: &ServiceAccountRef,
    ) -> Result<(), RemoteFailure> {
        let args = scoped(
            &account.project,
            vec![
                "iam".to_owned(),
                "service-accounts".to_owned(),
                "create".to_owned(),
                account.short_name.clone(),
                format!("--display-name={}", account.display_name),
                format!("--description={}", account.description),
            ],
        );
        self.run(args).await.map(drop)
    }

    async fn add_invoker_binding(
        &self,
        service: &ResourceId,
        member_email: &str,
    ) -> Result<(), RemoteFailure> {
        let args = scoped(
            &service.project,
            vec![
                "run".to_owned(),
                "services".to_owned(),
                "add-iam-policy-binding".to_owned(),
                service.name.clone(),
                format!("--region={}", service.region),
                format!("--member=serviceAccount:{member_email}"),
                format!("--role={INVOKER_ROLE}"),
                "--quiet".to_owned(),
            ],
        );
        self.run(args).await.map(drop)
    }

    async fn describe_job(&self, job: &ResourceId) -> Result<bool, RemoteFailure> {
        let mut args = job_args("describe", job);
        args.push("--format=value(name)".to_owned());
        match self.run(args).await {
            Ok(_) => Ok(true),
            Err(failure) if failure.kind == FailureKind::NotFound => Ok(false),
            Err(failure) => Err(failure),
        }
    }

    async fn delete_job(&self, job: &ResourceId) -> Result<(), RemoteFailure> {
        let mut args = job_args("delete", job);
        args.push("--quiet".to_owned());
        self.run(args).await.map(drop)
    }

    #[instrument(skip(self, spec), fields(job = %spec.name, region = %spec.region))]
    async fn create_job(&self, spec: &SchedulerSpec) -> Result<(), RemoteFailure> {
        self.run(create_job_args(spec)).await.map(drop)
    }

    async fn run_job(&self, job: &ResourceId) -> Result<(), RemoteFailure> {
        self.run(job_args("run", job)).await.map(drop)
    }
}
