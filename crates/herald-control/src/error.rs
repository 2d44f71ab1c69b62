//! Error types for herald-control.
//!
//! Each pipeline concern has its own error enum so the orchestrator can
//! report the originating step verbatim. [`ControlError`] covers the plumbing
//! around the pipeline: configuration, process spawning and report output.

use std::fmt;
use std::time::Duration;

use serde::Serialize;

/// Result type alias using [`ControlError`].
pub type ControlResult<T> = Result<T, ControlError>;

/// Errors outside the provisioning steps themselves.
#[derive(Debug, thiserror::Error)]
pub enum ControlError {
    /// Configuration could not be loaded or is incomplete.
    #[error("configuration error: {0}")]
    Config(String),

    /// The control-plane tooling is not available on this host.
    #[error("control plane unavailable: {0}")]
    Unavailable(String),

    /// Serialisation error.
    #[error("serialisation error: {0}")]
    Serialisation(#[from] serde_json::Error),

    /// I/O error.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl ControlError {
    /// Create a configuration error.
    #[must_use]
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }
}

/// Pre-flight validation failures. Nothing remote has been touched yet.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    /// The analytics endpoint still holds a template value.
    #[error("target URI `{uri}` is still a placeholder")]
    PlaceholderUnresolved {
        /// The offending URI.
        uri: String,
    },

    /// A credential required by the deployed service is missing or empty.
    #[error("required credential `{0}` is missing or empty")]
    MissingCredential(CredentialName),

    /// The schedule definition cannot be submitted as configured.
    #[error("invalid schedule: {0}")]
    InvalidSchedule(String),
}

/// The OAuth2 fields the deployed service needs at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialName {
    /// OAuth2 client identifier.
    ClientId,
    /// OAuth2 client secret.
    ClientSecret,
    /// OAuth2 refresh token.
    RefreshToken,
}

impl CredentialName {
    /// All credentials, in the order the gate checks them.
    pub const ALL: [Self; 3] = [Self::ClientId, Self::ClientSecret, Self::RefreshToken];

    /// Environment variable name the deployed service reads.
    #[must_use]
    pub const fn env_var(&self) -> &'static str {
        match self {
            Self::ClientId => "OAUTH_CLIENT_ID",
            Self::ClientSecret => "OAUTH_CLIENT_SECRET",
            Self::RefreshToken => "OAUTH_REFRESH_TOKEN",
        }
    }
}

impl fmt::Display for CredentialName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.env_var())
    }
}

/// Image build failures. Never retried.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BuildError {
    /// The build service rejected or failed the build.
    #[error("image build failed: {message}{}", log_suffix(.log_url.as_deref()))]
    Failed {
        /// Verbatim build output.
        message: String,
        /// Link to the build log, when the build service reports one.
        log_url: Option<String>,
    },

    /// `--skip-build` was requested but the tag does not exist.
    #[error("image `{0}` does not exist and the build was skipped")]
    MissingImage(String),

    /// The build did not finish within its allotted time.
    #[error("image build timed out after {0:?}")]
    TimedOut(Duration),
}

fn log_suffix(log_url: Option<&str>) -> String {
    log_url.map(|url| format!(" (logs: {url})")).unwrap_or_default()
}

/// Service deployment failures. All permanent.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeployError {
    /// Project quota exhausted.
    #[error("quota exceeded: {0}")]
    QuotaExceeded(String),

    /// The control plane rejected the service configuration.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// The caller lacks permission to deploy.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// The deploy did not finish within its allotted time.
    #[error("deploy timed out after {0:?}")]
    TimedOut(Duration),

    /// Any other control-plane failure.
    #[error("deploy failed: {0}")]
    Other(String),
}

/// Service account creation failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AccountError {
    /// The account already exists. The reconciler treats this as success.
    #[error("service account `{0}` already exists")]
    AlreadyExists(String),

    /// The caller lacks permission to manage service accounts.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// Creation did not finish within its allotted time.
    #[error("service account creation timed out after {0:?}")]
    TimedOut(Duration),

    /// Any other control-plane failure.
    #[error("service account creation failed: {0}")]
    Other(String),
}

/// Invoker role binding failures. These block scheduling.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BindError {
    /// The service or the member account does not exist.
    #[error("binding target not found: {0}")]
    NotFound(String),

    /// The caller lacks permission to change the service policy.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// The binding did not finish within its allotted time.
    #[error("invoker binding timed out after {0:?}")]
    TimedOut(Duration),

    /// Any other control-plane failure.
    #[error("invoker binding failed: {0}")]
    Other(String),
}

/// Scheduler job failures. All permanent.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SchedulerError {
    /// A job with this name already exists.
    #[error("scheduler job `{0}` already exists")]
    AlreadyExists(String),

    /// The job does not exist.
    #[error("scheduler job `{0}` not found")]
    NotFound(String),

    /// The control plane rejected the job definition.
    #[error("invalid job definition: {0}")]
    InvalidJob(String),

    /// The caller lacks permission to manage scheduler jobs.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// The call did not finish within its allotted time.
    #[error("scheduler call timed out after {0:?}")]
    TimedOut(Duration),

    /// Any other control-plane failure.
    #[error("scheduler call failed: {0}")]
    Other(String),
}

/// Service discovery failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DiscoveryError {
    /// No service with this name exists in the region.
    #[error("service `{service}` not found in {region}")]
    NotDeployed {
        /// Service name.
        service: String,
        /// Region searched.
        region: String,
    },

    /// The lookup did not finish within its allotted time.
    #[error("service lookup timed out after {0:?}")]
    TimedOut(Duration),

    /// Any other control-plane failure.
    #[error("service lookup failed: {0}")]
    Other(String),
}

/// Implemented by errors that can signal "the named resource already exists".
///
/// The reconciler uses this to normalise create calls into
/// [`ReconciliationResult::AlreadyExists`](crate::reconcile::ReconciliationResult).
pub trait AlreadyExists {
    /// Whether this error means the resource is already present.
    fn is_already_exists(&self) -> bool;
}

impl AlreadyExists for AccountError {
    fn is_already_exists(&self) -> bool {
        matches!(self, Self::AlreadyExists(_))
    }
}

impl AlreadyExists for SchedulerError {
    fn is_already_exists(&self) -> bool {
        matches!(self, Self::AlreadyExists(_))
    }
}

/// Coarse classification of a raw control-plane failure.
///
/// Backends classify once, then each call site builds its own typed error
/// from the kind and the verbatim message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// The named resource already exists.
    AlreadyExists,
    /// The named resource does not exist.
    NotFound,
    /// The caller lacks the required role.
    PermissionDenied,
    /// A project quota is exhausted.
    QuotaExceeded,
    /// The request was malformed or rejected by validation.
    InvalidArgument,
    /// Anything else.
    Other,
}

impl FailureKind {
    /// Classify a control-plane error message.
    #[must_use]
    pub fn classify(message: &str) -> Self {
        let lower = message.to_ascii_lowercase();
        if lower.contains("already_exists") || lower.contains("already exists") {
            Self::AlreadyExists
        } else if lower.contains("permission_denied")
            || lower.contains("permission denied")
            || lower.contains("does not have permission")
        {
            Self::PermissionDenied
        } else if lower.contains("resource_exhausted") || lower.contains("quota exceeded") {
            Self::QuotaExceeded
        } else if lower.contains("not_found")
            || lower.contains("not found")
            || lower.contains("could not be found")
            || lower.contains("cannot find")
        {
            Self::NotFound
        } else if lower.contains("invalid_argument") || lower.contains("invalid value") {
            Self::InvalidArgument
        } else {
            Self::Other
        }
    }
}

/// A raw failure reported by a control-plane backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteFailure {
    /// Classified kind.
    pub kind: FailureKind,
    /// Verbatim message from the control plane.
    pub message: String,
}

impl RemoteFailure {
    /// Build a failure, classifying the message.
    #[must_use]
    pub fn from_message(message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            kind: FailureKind::classify(&message),
            message,
        }
    }

    /// Build a failure of a known kind.
    #[must_use]
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for RemoteFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl From<RemoteFailure> for DeployError {
    fn from(failure: RemoteFailure) -> Self {
        match failure.kind {
            FailureKind::QuotaExceeded => Self::QuotaExceeded(failure.message),
            FailureKind::InvalidArgument => Self::InvalidConfiguration(failure.message),
            FailureKind::PermissionDenied => Self::PermissionDenied(failure.message),
            _ => Self::Other(failure.message),
        }
    }
}

impl From<RemoteFailure> for BindError {
    fn from(failure: RemoteFailure) -> Self {
        match failure.kind {
            FailureKind::NotFound => Self::NotFound(failure.message),
            FailureKind::PermissionDenied => Self::PermissionDenied(failure.message),
            _ => Self::Other(failure.message),
        }
    }
}

impl From<RemoteFailure> for DiscoveryError {
    fn from(failure: RemoteFailure) -> Self {
        Self::Other(failure.message)
    }
}

/// Extract the build log link from build service output.
fn build_log_url(output: &str) -> Option<String> {
    let (_, rest) = output.split_once("Logs are available at [")?;
    let (url, _) = rest.split_once(']')?;
    Some(url.to_owned())
}

impl From<RemoteFailure> for BuildError {
    fn from(failure: RemoteFailure) -> Self {
        Self::Failed {
            log_url: build_log_url(&failure.message),
            message: failure.message,
        }
    }
}

impl From<RemoteFailure> for AccountError {
    fn from(failure: RemoteFailure) -> Self {
        match failure.kind {
            FailureKind::AlreadyExists => Self::AlreadyExists(failure.message),
            FailureKind::PermissionDenied => Self::PermissionDenied(failure.message),
            _ => Self::Other(failure.message),
        }
    }
}

impl From<RemoteFailure> for SchedulerError {
    fn from(failure: RemoteFailure) -> Self {
        match failure.kind {
            FailureKind::AlreadyExists => Self::AlreadyExists(failure.message),
            FailureKind::NotFound => Self::NotFound(failure.message),
            FailureKind::InvalidArgument => Self::InvalidJob(failure.message),
            FailureKind::PermissionDenied => Self::PermissionDenied(failure.message),
            FailureKind::QuotaExceeded | FailureKind::Other => Self::Other(failure.message),
        }
    }
}
