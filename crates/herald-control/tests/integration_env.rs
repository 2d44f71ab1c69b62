//! Integration tests for `HERALD_` environment overrides.
//!
//! Every test runs inside a `figment::Jail`, which serialises access to the
//! process environment and restores it afterwards.

mod common;

use common::fixtures::ConfigBuilder;
use figment::Jail;
use herald_control::error::CredentialName;
use herald_control::{ControlConfig, ControlResult};
use secrecy::ExposeSecret;

fn load(path: &str) -> figment::error::Result<ControlConfig> {
    to_jail(ControlConfig::from_file(path))
}

fn to_jail<T>(result: ControlResult<T>) -> figment::error::Result<T> {
    result.map_err(|e| figment::Error::from(e.to_string()))
}

fn credential(config: &ControlConfig, name: CredentialName) -> Option<String> {
    config
        .credentials
        .get(name)
        .map(|secret| secret.expose_secret().to_owned())
}

#[test]
fn environment_overrides_file_values() {
    Jail::expect_with(|jail| {
        jail.create_file("herald.toml", &ConfigBuilder::new().to_toml())?;
        jail.set_env("HERALD_PROJECT__ID", "avisia-production");
        jail.set_env("HERALD_CREDENTIALS__REFRESH_TOKEN", "1//rotated-token");
        jail.set_env("HERALD_SCHEDULE__TIMEZONE", "UTC");

        let config = load("herald.toml")?;

        assert_eq!(config.project.id, "avisia-production");
        assert_eq!(config.project.region, "europe-west1");
        assert_eq!(config.schedule.timezone, "UTC");
        assert_eq!(
            credential(&config, CredentialName::RefreshToken).as_deref(),
            Some("1//rotated-token")
        );
        assert_eq!(
            credential(&config, CredentialName::ClientSecret).as_deref(),
            Some("client-secret")
        );

        let spec = to_jail(config.deployment_spec())?;
        assert_eq!(spec.project.as_str(), "avisia-production");
        Ok(())
    });
}

#[test]
fn digit_only_values_are_accepted_for_text_fields() {
    Jail::expect_with(|jail| {
        jail.create_file("herald.toml", "[project]\nid = \"avisia-training\"\n")?;
        jail.set_env("HERALD_SERVICE__LIMITS__CPU", "2");
        jail.set_env("HERALD_CREDENTIALS__CLIENT_ID", "123456789");

        let config = load("herald.toml")?;

        assert_eq!(config.service.limits.cpu, "2");
        assert_eq!(
            credential(&config, CredentialName::ClientId).as_deref(),
            Some("123456789")
        );
        Ok(())
    });
}

#[test]
fn numeric_overrides_reach_numeric_fields() {
    Jail::expect_with(|jail| {
        jail.create_file("herald.toml", &ConfigBuilder::new().to_toml())?;
        jail.set_env("HERALD_CONTROL_PLANE__TIMEOUTS__BUILD_SECS", "45");
        jail.set_env("HERALD_SERVICE__LIMITS__MAX_INSTANCES", "3");

        let config = load("herald.toml")?;

        assert_eq!(config.control_plane.timeouts.build_secs, 45);
        assert_eq!(config.service.limits.max_instances, 3);
        Ok(())
    });
}

#[test]
fn default_file_is_read_from_working_directory() {
    Jail::expect_with(|jail| {
        jail.create_file("herald.toml", &ConfigBuilder::new().to_toml())?;
        jail.set_env("HERALD_SERVICE__NAME", "ga4-analytics-agent-staging");

        let config = to_jail(ControlConfig::load())?;

        assert_eq!(config.project.id, "avisia-training");
        assert_eq!(config.service.name, "ga4-analytics-agent-staging");
        Ok(())
    });
}
