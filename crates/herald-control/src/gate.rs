//! Pre-flight checks run before any remote mutation.
//!
//! The gate only reads the specs it is handed. A placeholder endpoint can be
//! overridden by the operator; a missing credential cannot, because the
//! deployed service would fail on its first run.

use tracing::{debug, warn};

use crate::error::{CredentialName, ValidationError};
use crate::types::{env, DeploymentSpec, SchedulerTemplate};

/// Substrings that mark a URI as an unedited template value.
pub const PLACEHOLDER_MARKERS: [&str; 5] = ["XXXX", "YOUR_", "CHANGE_ME", "<", "example.invalid"];

/// Returns true if `uri` is empty or still contains a template marker.
#[must_use]
pub fn is_placeholder(uri: &str) -> bool {
    let uri = uri.trim();
    uri.is_empty()
        || PLACEHOLDER_MARKERS
            .iter()
            .any(|marker| uri.to_ascii_uppercase().contains(&marker.to_ascii_uppercase()))
}

/// Operator decisions the gate honours, resolved before the run starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GateOverrides {
    /// Proceed even though the target URI looks like a placeholder.
    pub allow_placeholder: bool,
}

/// The target URI the deployed service will call, as configured.
#[must_use]
pub fn target_uri(spec: &DeploymentSpec) -> &str {
    spec.env
        .get(env::ANALYTICS_ENDPOINT)
        .map_or("", |value| value.expose())
}

/// Check a deployment before anything is built or deployed.
///
/// Checks, in order: the target URI is not a placeholder (unless
/// overridden), then every OAuth2 credential is present and non-empty.
pub fn validate(spec: &DeploymentSpec, overrides: GateOverrides) -> Result<(), ValidationError> {
    let uri = target_uri(spec);
    if is_placeholder(uri) {
        if overrides.allow_placeholder {
            warn!(uri = %uri, "target URI looks like a placeholder, proceeding on override");
        } else {
            return Err(ValidationError::PlaceholderUnresolved {
                uri: uri.to_owned(),
            });
        }
    }

    for name in CredentialName::ALL {
        let present = spec
            .env
            .get(name.env_var())
            .is_some_and(|value| !value.expose().trim().is_empty());
        if !present {
            return Err(ValidationError::MissingCredential(name));
        }
    }

    debug!(service = %spec.service, "deployment preconditions satisfied");
    Ok(())
}

/// Check that the schedule is well-formed enough to submit.
pub fn validate_schedule(template: &SchedulerTemplate) -> Result<(), ValidationError> {
    let fields = template.cron.split_whitespace().count();
    if fields != 5 {
        return Err(ValidationError::InvalidSchedule(format!(
            "cron expression `{}` has {fields} fields, expected 5",
            template.cron
        )));
    }
    if template.timezone.trim().is_empty() {
        return Err(ValidationError::InvalidSchedule(
            "timezone is empty".to_owned(),
        ));
    }
    if template.name.trim().is_empty() {
        return Err(ValidationError::InvalidSchedule(
            "job name is empty".to_owned(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use rstest::rstest;
    use secrecy::SecretString;

    use super::*;
    use crate::types::{AccessPolicy, EnvValue, HttpMethod, ImageRef, ProjectId, ResourceLimits};

    fn spec(endpoint: &str, creds: [&str; 3]) -> DeploymentSpec {
        let mut vars = BTreeMap::new();
        vars.insert(env::ANALYTICS_ENDPOINT, EnvValue::Plain(endpoint.to_owned()));
        vars.insert(env::SENDER_EMAIL, EnvValue::Plain("noreply@avisia.fr".to_owned()));
        for (name, value) in CredentialName::ALL.into_iter().zip(creds) {
            vars.insert(
                name.env_var(),
                EnvValue::Secret(SecretString::from(value.to_owned())),
            );
        }
        DeploymentSpec {
            service: "ga4-analytics-agent".to_owned(),
            region: "europe-west1".to_owned(),
            project: ProjectId::new("p"),
            image: ImageRef::new("gcr.io/p/ga4-analytics-agent:latest"),
            env: vars,
            limits: ResourceLimits::default(),
            access: AccessPolicy::Authenticated,
        }
    }

    #[rstest]
    #[case("https://ga4-mcp-server-XXXXXXXXXX.run.app", true)]
    #[case("https://ga4-mcp-server-xxxx.run.app", true)]
    #[case("https://YOUR_SERVER_URL", true)]
    #[case("<analytics-endpoint>", true)]
    #[case("", true)]
    #[case("https://ga4-mcp-server-7hq2kd9.europe-west1.run.app", false)]
    fn placeholder_detection(#[case] uri: &str, #[case] expected: bool) {
        assert_eq!(is_placeholder(uri), expected);
    }

    #[test]
    fn placeholder_blocks_without_override() {
        let spec = spec("https://ga4-mcp-server-XXXX.run.app", ["a", "b", "c"]);
        let result = validate(&spec, GateOverrides::default());
        assert!(matches!(
            result,
            Err(ValidationError::PlaceholderUnresolved { .. })
        ));
    }

    #[test]
    fn placeholder_override_still_checks_credentials() {
        let spec = spec("https://ga4-mcp-server-XXXX.run.app", ["a", "", "c"]);
        let overrides = GateOverrides {
            allow_placeholder: true,
        };
        assert_eq!(
            validate(&spec, overrides),
            Err(ValidationError::MissingCredential(
                CredentialName::ClientSecret
            ))
        );
    }

    #[rstest]
    #[case(["", "b", "c"], CredentialName::ClientId)]
    #[case(["a", "  ", "c"], CredentialName::ClientSecret)]
    #[case(["a", "b", ""], CredentialName::RefreshToken)]
    fn missing_credential_is_named(#[case] creds: [&str; 3], #[case] expected: CredentialName) {
        let spec = spec("https://ga4-mcp-server-7hq2kd9.run.app", creds);
        assert_eq!(
            validate(&spec, GateOverrides::default()),
            Err(ValidationError::MissingCredential(expected))
        );
    }

    #[test]
    fn complete_spec_passes() {
        let spec = spec("https://ga4-mcp-server-7hq2kd9.run.app", ["a", "b", "c"]);
        assert_eq!(validate(&spec, GateOverrides::default()), Ok(()));
    }

    #[test]
    fn schedule_requires_five_cron_fields() {
        let mut template = SchedulerTemplate {
            name: "job".to_owned(),
            region: "europe-west1".to_owned(),
            project: ProjectId::new("p"),
            cron: "0 7 * * 1".to_owned(),
            timezone: "Europe/Paris".to_owned(),
            method: HttpMethod::Post,
            body: "{}".to_owned(),
        };
        assert_eq!(validate_schedule(&template), Ok(()));

        template.cron = "0 7 * *".to_owned();
        assert!(matches!(
            validate_schedule(&template),
            Err(ValidationError::InvalidSchedule(_))
        ));
    }
}
