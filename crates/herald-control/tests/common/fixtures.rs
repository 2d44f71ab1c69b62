//! Test fixtures for herald-control integration tests.

use herald_control::ControlConfig;
use toml::{Table, Value};

/// A real-looking analytics endpoint that passes the placeholder check.
pub const ENDPOINT: &str = "https://ga4-mcp-server-7hq2kd9.europe-west1.run.app";

/// Builder for test configurations, rendered through TOML like a real file.
pub struct ConfigBuilder {
    project: String,
    region: String,
    endpoint: String,
    credentials: [Option<String>; 3],
    cron: String,
    timezone: String,
    build_secs: Option<u64>,
}

impl ConfigBuilder {
    /// Creates a builder for a complete, deployable configuration.
    pub fn new() -> Self {
        Self {
            project: "avisia-training".to_string(),
            region: "europe-west1".to_string(),
            endpoint: ENDPOINT.to_string(),
            credentials: [
                Some("client-id.apps.googleusercontent.com".to_string()),
                Some("client-secret".to_string()),
                Some("1//refresh-token".to_string()),
            ],
            cron: "0 7 * * 1".to_string(),
            timezone: "Europe/Paris".to_string(),
            build_secs: None,
        }
    }

    /// Sets the analytics endpoint.
    pub fn with_endpoint(mut self, endpoint: &str) -> Self {
        self.endpoint = endpoint.to_string();
        self
    }

    /// Removes the OAuth2 client secret.
    pub fn without_client_secret(mut self) -> Self {
        self.credentials[1] = None;
        self
    }

    /// Removes the OAuth2 refresh token.
    pub fn without_refresh_token(mut self) -> Self {
        self.credentials[2] = None;
        self
    }

    /// Sets the build timeout in seconds.
    pub fn with_build_timeout(mut self, secs: u64) -> Self {
        self.build_secs = Some(secs);
        self
    }

    /// Renders the configuration as a TOML document.
    pub fn to_toml(&self) -> String {
        let mut project = Table::new();
        project.insert("id".into(), Value::String(self.project.clone()));
        project.insert("region".into(), Value::String(self.region.clone()));

        let mut service = Table::new();
        service.insert(
            "analytics_endpoint".into(),
            Value::String(self.endpoint.clone()),
        );

        let mut schedule = Table::new();
        schedule.insert("cron".into(), Value::String(self.cron.clone()));
        schedule.insert("timezone".into(), Value::String(self.timezone.clone()));

        let mut credentials = Table::new();
        let names = ["client_id", "client_secret", "refresh_token"];
        for (name, value) in names.iter().zip(&self.credentials) {
            if let Some(value) = value {
                credentials.insert((*name).into(), Value::String(value.clone()));
            }
        }

        let mut root = Table::new();
        root.insert("project".into(), Value::Table(project));
        root.insert("service".into(), Value::Table(service));
        root.insert("schedule".into(), Value::Table(schedule));
        root.insert("credentials".into(), Value::Table(credentials));

        if let Some(secs) = self.build_secs {
            let mut timeouts = Table::new();
            let secs = i64::try_from(secs).expect("build timeout fits in a TOML integer");
            timeouts.insert("build_secs".into(), Value::Integer(secs));
            let mut control_plane = Table::new();
            control_plane.insert("timeouts".into(), Value::Table(timeouts));
            root.insert("control_plane".into(), Value::Table(control_plane));
        }

        toml::to_string(&root).unwrap()
    }

    /// Builds the configuration.
    pub fn build(&self) -> ControlConfig {
        ControlConfig::from_toml_str(&self.to_toml()).unwrap()
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
