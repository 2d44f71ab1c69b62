//! Core types for herald-control.

use std::collections::BTreeMap;
use std::fmt;

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

/// Unique identifier for one pipeline run.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(String);

impl RunId {
    /// Create a run ID from an existing value.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a new unique run ID using ULID.
    #[must_use]
    pub fn generate() -> Self {
        Self(ulid::Ulid::new().to_string().to_lowercase())
    }

    /// Get the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Cloud project identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProjectId(String);

impl ProjectId {
    /// Create a new project ID.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Reference to a container image, e.g. `gcr.io/my-project/agent:latest`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ImageRef(String);

impl ImageRef {
    /// Create a new image reference.
    #[must_use]
    pub fn new(image: impl Into<String>) -> Self {
        Self(image.into())
    }

    /// Get the reference as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ImageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Base URL of a deployed service, without a trailing slash.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ServiceUrl(String);

impl ServiceUrl {
    /// Create a service URL, dropping any trailing slash.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self(url.into().trim_end_matches('/').to_owned())
    }

    /// Get the URL as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Join a path onto the service URL.
    #[must_use]
    pub fn join(&self, path: &str) -> String {
        format!("{}/{}", self.0, path.trim_start_matches('/'))
    }
}

impl fmt::Display for ServiceUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Environment variable names the deployed service requires.
pub mod env {
    /// Endpoint of the analytics data source.
    pub const ANALYTICS_ENDPOINT: &str = "ANALYTICS_ENDPOINT";
    /// Address reports are sent from.
    pub const SENDER_EMAIL: &str = "SENDER_EMAIL";
    /// OAuth2 client identifier for mail dispatch.
    pub const OAUTH_CLIENT_ID: &str = "OAUTH_CLIENT_ID";
    /// OAuth2 client secret for mail dispatch.
    pub const OAUTH_CLIENT_SECRET: &str = "OAUTH_CLIENT_SECRET";
    /// OAuth2 refresh token for mail dispatch.
    pub const OAUTH_REFRESH_TOKEN: &str = "OAUTH_REFRESH_TOKEN";
    /// Project the service runs in.
    pub const GOOGLE_CLOUD_PROJECT: &str = "GOOGLE_CLOUD_PROJECT";

    /// Every variable a deployment must set.
    pub const REQUIRED: [&str; 6] = [
        ANALYTICS_ENDPOINT,
        SENDER_EMAIL,
        OAUTH_CLIENT_ID,
        OAUTH_CLIENT_SECRET,
        OAUTH_REFRESH_TOKEN,
        GOOGLE_CLOUD_PROJECT,
    ];
}

/// Value of an environment variable passed to the deployed service.
#[derive(Debug)]
pub enum EnvValue {
    /// Plain configuration value.
    Plain(String),
    /// Credential; redacted from `Debug` output.
    Secret(SecretString),
}

impl EnvValue {
    /// Expose the raw value for transmission to the control plane.
    #[must_use]
    pub fn expose(&self) -> &str {
        match self {
            Self::Plain(value) => value,
            Self::Secret(value) => value.expose_secret(),
        }
    }

    /// Whether the value is a credential.
    #[must_use]
    pub const fn is_secret(&self) -> bool {
        matches!(self, Self::Secret(_))
    }
}

/// Resource limits applied to the deployed service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceLimits {
    /// Memory limit, e.g. `512Mi`.
    #[serde(default = "default_memory")]
    pub memory: String,
    /// CPU count, e.g. `1`.
    #[serde(default = "default_cpu", deserialize_with = "crate::config::string_or_number")]
    pub cpu: String,
    /// Request timeout in seconds.
    #[serde(default = "default_request_timeout_secs")]
    pub timeout_secs: u64,
    /// Minimum number of instances kept warm.
    #[serde(default)]
    pub min_instances: u32,
    /// Maximum number of instances.
    #[serde(default = "default_max_instances")]
    pub max_instances: u32,
}

fn default_memory() -> String {
    "512Mi".to_owned()
}

fn default_cpu() -> String {
    "1".to_owned()
}

const fn default_request_timeout_secs() -> u64 {
    540
}

const fn default_max_instances() -> u32 {
    1
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            memory: default_memory(),
            cpu: default_cpu(),
            timeout_secs: default_request_timeout_secs(),
            min_instances: 0,
            max_instances: default_max_instances(),
        }
    }
}

/// Who may invoke the deployed service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessPolicy {
    /// Anyone on the internet.
    Public,
    /// Only identities holding the invoker role.
    #[default]
    Authenticated,
}

/// Immutable description of what to deploy.
#[derive(Debug)]
pub struct DeploymentSpec {
    /// Service name.
    pub service: String,
    /// Target region.
    pub region: String,
    /// Project the service lives in.
    pub project: ProjectId,
    /// Container image to run.
    pub image: ImageRef,
    /// Environment variables, keyed by name.
    pub env: BTreeMap<&'static str, EnvValue>,
    /// Resource limits.
    pub limits: ResourceLimits,
    /// Network access policy.
    pub access: AccessPolicy,
}

/// HTTP method used by the scheduler trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    /// GET.
    Get,
    /// POST.
    #[default]
    Post,
    /// PUT.
    Put,
}

impl HttpMethod {
    /// Method name as the control plane expects it.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Logical identity used to sign scheduler triggers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceAccountRef {
    /// Short account name, e.g. `ga4-scheduler-invoker`.
    pub short_name: String,
    /// Human-readable display name.
    pub display_name: String,
    /// Description shown in the console.
    pub description: String,
    /// Project owning the account.
    pub project: ProjectId,
}

impl ServiceAccountRef {
    /// Fully-qualified account email.
    #[must_use]
    pub fn email(&self) -> String {
        format!(
            "{}@{}.iam.gserviceaccount.com",
            self.short_name, self.project
        )
    }
}

/// Immutable description of the recurring trigger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SchedulerSpec {
    /// Job name.
    pub name: String,
    /// Region the job lives in.
    pub region: String,
    /// Project the job lives in.
    pub project: ProjectId,
    /// Cron expression, e.g. `0 7 * * 1`.
    pub cron: String,
    /// IANA timezone, e.g. `Europe/Paris`.
    pub timezone: String,
    /// URI the trigger calls.
    pub target_uri: String,
    /// HTTP method of the trigger call.
    pub method: HttpMethod,
    /// Static request body.
    pub body: String,
    /// Email of the identity that signs the trigger token.
    pub signer_email: String,
    /// Audience the token is minted for.
    pub audience: String,
}

/// Path on the deployed service that runs the analysis.
pub const RUN_PATH: &str = "run";

/// The job-shaped part of a [`SchedulerSpec`], known before the service URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerTemplate {
    /// Job name.
    pub name: String,
    /// Region the job lives in.
    pub region: String,
    /// Project the job lives in.
    pub project: ProjectId,
    /// Cron expression.
    pub cron: String,
    /// IANA timezone.
    pub timezone: String,
    /// HTTP method of the trigger call.
    pub method: HttpMethod,
    /// Static request body.
    pub body: String,
}

impl SchedulerTemplate {
    /// Complete the template once the service URL is known.
    ///
    /// The trigger targets `{url}/run`; the token audience is the bare URL.
    #[must_use]
    pub fn for_service(&self, url: &ServiceUrl, signer: &ServiceAccountRef) -> SchedulerSpec {
        SchedulerSpec {
            name: self.name.clone(),
            region: self.region.clone(),
            project: self.project.clone(),
            cron: self.cron.clone(),
            timezone: self.timezone.clone(),
            target_uri: url.join(RUN_PATH),
            method: self.method,
            body: self.body.clone(),
            signer_email: signer.email(),
            audience: url.as_str().to_owned(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn template() -> SchedulerTemplate {
        SchedulerTemplate {
            name: "ga4-analytics-agent-trigger".to_owned(),
            region: "europe-west1".to_owned(),
            project: ProjectId::new("avisia-training"),
            cron: "0 7 * * 1".to_owned(),
            timezone: "Europe/Paris".to_owned(),
            method: HttpMethod::Post,
            body: r#"{"trigger":"scheduled","source":"cloud-scheduler"}"#.to_owned(),
        }
    }

    fn signer() -> ServiceAccountRef {
        ServiceAccountRef {
            short_name: "ga4-scheduler-invoker".to_owned(),
            display_name: "GA4 scheduler invoker".to_owned(),
            description: "Signs scheduled analytics runs".to_owned(),
            project: ProjectId::new("avisia-training"),
        }
    }

    #[test]
    fn service_account_email_derivation() {
        assert_eq!(
            signer().email(),
            "ga4-scheduler-invoker@avisia-training.iam.gserviceaccount.com"
        );
    }

    #[test]
    fn scheduler_target_and_audience() {
        let url = ServiceUrl::new("https://ga4-analytics-agent-abc123-ew.a.run.app/");
        let spec = template().for_service(&url, &signer());

        assert_eq!(
            spec.target_uri,
            "https://ga4-analytics-agent-abc123-ew.a.run.app/run"
        );
        assert_eq!(
            spec.audience,
            "https://ga4-analytics-agent-abc123-ew.a.run.app"
        );
        assert_eq!(spec.signer_email, signer().email());
    }

    #[test]
    fn secret_env_values_are_redacted_in_debug() {
        let value = EnvValue::Secret(SecretString::from("hunter2".to_owned()));
        assert!(!format!("{value:?}").contains("hunter2"));
        assert_eq!(value.expose(), "hunter2");
        assert!(value.is_secret());
    }

    #[test]
    fn http_method_serde() {
        let method: HttpMethod = serde_json::from_str(r#""POST""#).unwrap();
        assert_eq!(method, HttpMethod::Post);
        assert_eq!(method.to_string(), "POST");
    }
}
