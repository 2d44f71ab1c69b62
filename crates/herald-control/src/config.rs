//! Configuration for herald.
//!
//! Loaded once at startup and passed by reference into every component.
//! Nothing below the CLI reads the process environment directly.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::providers::{Env, Format, Toml};
use figment::Figment;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{ControlError, ControlResult, CredentialName};
use crate::types::{
    env, AccessPolicy, DeploymentSpec, EnvValue, HttpMethod, ImageRef, ProjectId, ResourceLimits,
    SchedulerTemplate, ServiceAccountRef,
};

/// Default configuration file name.
pub const DEFAULT_CONFIG_FILE: &str = "herald.toml";

/// Environment variable prefix for overrides.
pub const ENV_PREFIX: &str = "HERALD_";

/// Top-level configuration.
#[derive(Debug, Deserialize, Default)]
pub struct ControlConfig {
    /// Cloud project and region.
    #[serde(default)]
    pub project: ProjectConfig,

    /// Deployed service settings.
    #[serde(default)]
    pub service: ServiceConfig,

    /// Recurring trigger settings.
    #[serde(default)]
    pub schedule: ScheduleConfig,

    /// OAuth2 credentials forwarded to the service.
    #[serde(default)]
    pub credentials: CredentialsConfig,

    /// Control-plane backend settings.
    #[serde(default)]
    pub control_plane: ControlPlaneConfig,
}

impl ControlConfig {
    /// Load configuration from the default sources.
    ///
    /// Configuration is loaded in the following order (later sources override earlier):
    /// 1. Default values
    /// 2. `herald.toml` in the current directory (if present)
    /// 3. Environment variables with `HERALD_` prefix, `__` separating sections
    pub fn load() -> ControlResult<Self> {
        Self::from_figment(Figment::new().merge(Toml::file(DEFAULT_CONFIG_FILE)))
    }

    /// Load configuration from a specific TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> ControlResult<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ControlError::config(format!(
                "configuration file not found: {}",
                path.display()
            )));
        }
        Self::from_figment(Figment::new().merge(Toml::file(path)))
    }

    fn from_figment(figment: Figment) -> ControlResult<Self> {
        figment
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .map_err(|e| ControlError::Config(e.to_string()))
    }

    /// Load from defaults plus an in-memory TOML document.
    pub fn from_toml_str(content: &str) -> ControlResult<Self> {
        Figment::new()
            .merge(Toml::string(content))
            .extract()
            .map_err(|e| ControlError::Config(e.to_string()))
    }

    fn project_id(&self) -> ControlResult<ProjectId> {
        let id = self.project.id.trim();
        if id.is_empty() {
            return Err(ControlError::config(
                "project.id is required (set HERALD_PROJECT__ID)",
            ));
        }
        Ok(ProjectId::new(id))
    }

    /// The image to build and run.
    ///
    /// Defaults to `gcr.io/{project}/{service}:latest`.
    pub fn image(&self) -> ControlResult<ImageRef> {
        match &self.service.image {
            Some(image) if !image.trim().is_empty() => Ok(ImageRef::new(image.trim())),
            _ => Ok(ImageRef::new(format!(
                "gcr.io/{}/{}:latest",
                self.project_id()?,
                self.service.name
            ))),
        }
    }

    /// Build the immutable deployment description.
    ///
    /// Credentials that are unset are forwarded as empty strings; the gate
    /// rejects them before any deploy is attempted.
    pub fn deployment_spec(&self) -> ControlResult<DeploymentSpec> {
        let project = self.project_id()?;
        let mut vars = BTreeMap::new();
        vars.insert(
            env::ANALYTICS_ENDPOINT,
            EnvValue::Plain(self.service.analytics_endpoint.clone()),
        );
        vars.insert(
            env::SENDER_EMAIL,
            EnvValue::Plain(self.service.sender_email.clone()),
        );
        vars.insert(
            env::GOOGLE_CLOUD_PROJECT,
            EnvValue::Plain(project.to_string()),
        );
        for name in CredentialName::ALL {
            let value = self.credentials.get(name).map_or_else(
                || SecretString::from(String::new()),
                |secret| SecretString::from(secret.expose_secret().to_owned()),
            );
            vars.insert(name.env_var(), EnvValue::Secret(value));
        }

        Ok(DeploymentSpec {
            service: self.service.name.clone(),
            region: self.project.region.clone(),
            image: self.image()?,
            project,
            env: vars,
            limits: self.service.limits.clone(),
            access: self.service.access,
        })
    }

    /// The identity that signs scheduler triggers.
    pub fn scheduler_account(&self) -> ControlResult<ServiceAccountRef> {
        let account = &self.schedule.account;
        Ok(ServiceAccountRef {
            short_name: account.short_name.clone(),
            display_name: account.display_name.clone(),
            description: account.description.clone(),
            project: self.project_id()?,
        })
    }

    /// The job definition, minus the parts derived from the service URL.
    pub fn scheduler_template(&self) -> ControlResult<SchedulerTemplate> {
        Ok(SchedulerTemplate {
            name: self.schedule.job_name.clone(),
            region: self.project.region.clone(),
            project: self.project_id()?,
            cron: self.schedule.cron.clone(),
            timezone: self.schedule.timezone.clone(),
            method: self.schedule.http_method,
            body: self.schedule.body.clone(),
        })
    }
}

/// Cloud project and region.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProjectConfig {
    /// Project identifier. Required.
    #[serde(default)]
    pub id: String,

    /// Region for the service and the scheduler job.
    #[serde(default = "default_region")]
    pub region: String,
}

fn default_region() -> String {
    "europe-west1".to_owned()
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            id: String::new(),
            region: default_region(),
        }
    }
}

/// Deployed service settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServiceConfig {
    /// Service name.
    #[serde(default = "default_service_name")]
    pub name: String,

    /// Image reference; derived from project and service name when unset.
    pub image: Option<String>,

    /// Build context handed to the build service.
    #[serde(default = "default_source_dir")]
    pub source_dir: PathBuf,

    /// Endpoint of the analytics data source.
    #[serde(default = "default_analytics_endpoint")]
    pub analytics_endpoint: String,

    /// Sender address for report mail.
    #[serde(default = "default_sender_email")]
    pub sender_email: String,

    /// Resource limits.
    #[serde(default)]
    pub limits: ResourceLimits,

    /// Network access policy.
    #[serde(default)]
    pub access: AccessPolicy,
}

fn default_service_name() -> String {
    "ga4-analytics-agent".to_owned()
}

fn default_source_dir() -> PathBuf {
    PathBuf::from(".")
}

/// Template value shipped in the default configuration.
pub const PLACEHOLDER_ANALYTICS_ENDPOINT: &str = "https://ga4-mcp-server-XXXXXXXXXX.run.app";

fn default_analytics_endpoint() -> String {
    PLACEHOLDER_ANALYTICS_ENDPOINT.to_owned()
}

fn default_sender_email() -> String {
    "noreply@avisia.fr".to_owned()
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: default_service_name(),
            image: None,
            source_dir: default_source_dir(),
            analytics_endpoint: default_analytics_endpoint(),
            sender_email: default_sender_email(),
            limits: ResourceLimits::default(),
            access: AccessPolicy::default(),
        }
    }
}

/// Recurring trigger settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ScheduleConfig {
    /// Scheduler job name.
    #[serde(default = "default_job_name")]
    pub job_name: String,

    /// Cron expression.
    #[serde(default = "default_cron")]
    pub cron: String,

    /// IANA timezone the cron expression is evaluated in.
    #[serde(default = "default_timezone")]
    pub timezone: String,

    /// HTTP method of the trigger call.
    #[serde(default)]
    pub http_method: HttpMethod,

    /// Static JSON body of the trigger call.
    #[serde(default = "default_body")]
    pub body: String,

    /// Signing identity.
    #[serde(default)]
    pub account: AccountConfig,
}

fn default_job_name() -> String {
    "ga4-analytics-agent-trigger".to_owned()
}

fn default_cron() -> String {
    "0 7 * * 1".to_owned()
}

fn default_timezone() -> String {
    "Europe/Paris".to_owned()
}

fn default_body() -> String {
    r#"{"trigger":"scheduled","source":"cloud-scheduler"}"#.to_owned()
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            job_name: default_job_name(),
            cron: default_cron(),
            timezone: default_timezone(),
            http_method: HttpMethod::default(),
            body: default_body(),
            account: AccountConfig::default(),
        }
    }
}

/// Scheduler signing identity.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AccountConfig {
    /// Short account name.
    #[serde(default = "default_account_name")]
    pub short_name: String,

    /// Display name.
    #[serde(default = "default_account_display_name")]
    pub display_name: String,

    /// Description.
    #[serde(default = "default_account_description")]
    pub description: String,
}

fn default_account_name() -> String {
    "ga4-scheduler-invoker".to_owned()
}

fn default_account_display_name() -> String {
    "GA4 Analytics Scheduler".to_owned()
}

fn default_account_description() -> String {
    "Invokes the analytics agent on schedule".to_owned()
}

impl Default for AccountConfig {
    fn default() -> Self {
        Self {
            short_name: default_account_name(),
            display_name: default_account_display_name(),
            description: default_account_description(),
        }
    }
}

/// OAuth2 credentials the deployed service needs.
#[derive(Debug, Deserialize, Default)]
pub struct CredentialsConfig {
    /// OAuth2 client identifier.
    #[serde(default, deserialize_with = "optional_secret")]
    pub client_id: Option<SecretString>,
    /// OAuth2 client secret.
    #[serde(default, deserialize_with = "optional_secret")]
    pub client_secret: Option<SecretString>,
    /// OAuth2 refresh token.
    #[serde(default, deserialize_with = "optional_secret")]
    pub refresh_token: Option<SecretString>,
}

/// A scalar that should be read as text.
///
/// The `HERALD_` environment provider parses values before they reach
/// serde, so `HERALD_SERVICE__LIMITS__CPU=2` arrives as an integer.
#[derive(Deserialize)]
#[serde(untagged)]
enum Scalar {
    Text(String),
    Unsigned(u64),
    Signed(i64),
    Float(f64),
    Bool(bool),
}

impl Scalar {
    fn into_string(self) -> String {
        match self {
            Self::Text(text) => text,
            Self::Unsigned(n) => n.to_string(),
            Self::Signed(n) => n.to_string(),
            Self::Float(n) => n.to_string(),
            Self::Bool(b) => b.to_string(),
        }
    }
}

/// Deserialize a string field that may have been parsed as a number.
pub(crate) fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Scalar::deserialize(deserializer).map(Scalar::into_string)
}

fn optional_secret<'de, D>(deserializer: D) -> Result<Option<SecretString>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Scalar>::deserialize(deserializer)?;
    Ok(value.map(|scalar| SecretString::from(scalar.into_string())))
}

impl CredentialsConfig {
    /// Look up a credential by name.
    #[must_use]
    pub const fn get(&self, name: CredentialName) -> Option<&SecretString> {
        match name {
            CredentialName::ClientId => self.client_id.as_ref(),
            CredentialName::ClientSecret => self.client_secret.as_ref(),
            CredentialName::RefreshToken => self.refresh_token.as_ref(),
        }
    }
}

/// Which control-plane backend to drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendType {
    /// The `gcloud` command-line tool.
    #[default]
    Gcloud,

    /// In-process simulation, for dry runs and tests.
    Memory,
}

/// Control-plane backend settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ControlPlaneConfig {
    /// Backend to use.
    #[serde(default)]
    pub backend: BackendType,

    /// Path or name of the gcloud binary.
    #[serde(default = "default_gcloud_binary")]
    pub gcloud_binary: PathBuf,

    /// Per-call timeouts.
    #[serde(default)]
    pub timeouts: TimeoutConfig,
}

fn default_gcloud_binary() -> PathBuf {
    PathBuf::from("gcloud")
}

impl Default for ControlPlaneConfig {
    fn default() -> Self {
        Self {
            backend: BackendType::default(),
            gcloud_binary: default_gcloud_binary(),
            timeouts: TimeoutConfig::default(),
        }
    }
}

/// Per-call timeouts, in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct TimeoutConfig {
    /// Image build and push.
    #[serde(default = "default_build_secs")]
    pub build_secs: u64,

    /// Service deploy.
    #[serde(default = "default_deploy_secs")]
    pub deploy_secs: u64,

    /// Describe and lookup calls.
    #[serde(default = "default_describe_secs")]
    pub describe_secs: u64,

    /// Service account and policy changes.
    #[serde(default = "default_iam_secs")]
    pub iam_secs: u64,

    /// Scheduler job calls.
    #[serde(default = "default_scheduler_secs")]
    pub scheduler_secs: u64,
}

const fn default_build_secs() -> u64 {
    1200 // 20 minutes
}

const fn default_deploy_secs() -> u64 {
    600
}

const fn default_describe_secs() -> u64 {
    60
}

const fn default_iam_secs() -> u64 {
    120
}

const fn default_scheduler_secs() -> u64 {
    120
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            build_secs: default_build_secs(),
            deploy_secs: default_deploy_secs(),
            describe_secs: default_describe_secs(),
            iam_secs: default_iam_secs(),
            scheduler_secs: default_scheduler_secs(),
        }
    }
}

impl TimeoutConfig {
    /// Image build timeout.
    #[must_use]
    pub const fn build(&self) -> Duration {
        Duration::from_secs(self.build_secs)
    }

    /// Deploy timeout.
    #[must_use]
    pub const fn deploy(&self) -> Duration {
        Duration::from_secs(self.deploy_secs)
    }

    /// Describe timeout.
    #[must_use]
    pub const fn describe(&self) -> Duration {
        Duration::from_secs(self.describe_secs)
    }

    /// IAM timeout.
    #[must_use]
    pub const fn iam(&self) -> Duration {
        Duration::from_secs(self.iam_secs)
    }

    /// Scheduler timeout.
    #[must_use]
    pub const fn scheduler(&self) -> Duration {
        Duration::from_secs(self.scheduler_secs)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_agent_deployment() {
        let config = ControlConfig::default();
        assert_eq!(config.service.name, "ga4-analytics-agent");
        assert_eq!(config.project.region, "europe-west1");
        assert_eq!(config.schedule.cron, "0 7 * * 1");
        assert_eq!(config.schedule.timezone, "Europe/Paris");
        assert_eq!(config.schedule.http_method, HttpMethod::Post);
        assert_eq!(config.control_plane.backend, BackendType::Gcloud);
        assert_eq!(config.service.access, AccessPolicy::Authenticated);
        assert!(config.credentials.client_id.is_none());
    }

    #[test]
    fn config_from_toml() {
        let toml = r#"
            [project]
            id = "avisia-training"

            [service]
            analytics_endpoint = "https://ga4-mcp-server-abc.run.app"

            [service.limits]
            memory = "1Gi"
            max_instances = 3

            [credentials]
            client_id = "id"
            client_secret = "secret"
            refresh_token = "token"

            [control_plane]
            backend = "memory"

            [control_plane.timeouts]
            build_secs = 30
        "#;

        let config: ControlConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.project.id, "avisia-training");
        assert_eq!(config.service.limits.memory, "1Gi");
        assert_eq!(config.service.limits.max_instances, 3);
        assert_eq!(config.service.limits.cpu, "1");
        assert_eq!(config.control_plane.backend, BackendType::Memory);
        assert_eq!(config.control_plane.timeouts.build(), Duration::from_secs(30));
        assert_eq!(config.control_plane.timeouts.deploy_secs, 600);
        assert_eq!(
            config
                .credentials
                .get(CredentialName::ClientSecret)
                .map(|s| s.expose_secret().to_owned()),
            Some("secret".to_owned())
        );
    }

    #[test]
    fn numeric_cpu_and_credentials_read_as_text() {
        let config = ControlConfig::from_toml_str(
            r#"
            [project]
            id = "p1"

            [service.limits]
            cpu = 2

            [credentials]
            client_id = 123456789
            client_secret = "secret"
            "#,
        )
        .unwrap();
        assert_eq!(config.service.limits.cpu, "2");
        assert_eq!(
            config
                .credentials
                .get(CredentialName::ClientId)
                .map(|s| s.expose_secret().to_owned()),
            Some("123456789".to_owned())
        );
        assert!(config.credentials.refresh_token.is_none());
    }

    #[test]
    fn figment_layering_from_string() {
        let config = ControlConfig::from_toml_str(
            r#"
            [project]
            id = "p1"
            region = "us-central1"
            "#,
        )
        .unwrap();
        assert_eq!(config.project.region, "us-central1");
        assert_eq!(config.schedule.job_name, "ga4-analytics-agent-trigger");
    }

    #[test]
    fn image_defaults_to_registry_path() {
        let mut config = ControlConfig::default();
        config.project.id = "avisia-training".to_owned();
        assert_eq!(
            config.image().unwrap().as_str(),
            "gcr.io/avisia-training/ga4-analytics-agent:latest"
        );

        config.service.image = Some("europe-docker.pkg.dev/p/r/agent:v2".to_owned());
        assert_eq!(
            config.image().unwrap().as_str(),
            "europe-docker.pkg.dev/p/r/agent:v2"
        );
    }

    #[test]
    fn missing_project_is_a_config_error() {
        let config = ControlConfig::default();
        assert!(matches!(
            config.deployment_spec(),
            Err(ControlError::Config(_))
        ));
    }

    #[test]
    fn deployment_spec_sets_every_required_variable() {
        let mut config = ControlConfig::default();
        config.project.id = "avisia-training".to_owned();
        config.credentials.client_id = Some(SecretString::from("id".to_owned()));

        let spec = config.deployment_spec().unwrap();
        for name in env::REQUIRED {
            assert!(spec.env.contains_key(name), "missing {name}");
        }
        assert_eq!(spec.env[env::OAUTH_CLIENT_ID].expose(), "id");
        assert_eq!(spec.env[env::OAUTH_REFRESH_TOKEN].expose(), "");
        assert!(spec.env[env::OAUTH_CLIENT_SECRET].is_secret());
        assert_eq!(spec.env[env::GOOGLE_CLOUD_PROJECT].expose(), "avisia-training");
    }
}
