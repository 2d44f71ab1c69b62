//! Implementation of the `herald deploy` command.

use std::path::PathBuf;

use anyhow::Result;
use herald_control::{gate, DeploymentRequest, Pipeline, Prompt};
use tracing::warn;

use super::{execute, load_config, ConfigError, RunOptions};

/// Arguments for the deploy command.
#[derive(Debug, Default)]
pub struct DeployArgs {
    /// Deploy even if the analytics endpoint looks like a placeholder.
    pub allow_placeholder: bool,

    /// Deploy the existing image instead of building one.
    pub skip_build: bool,

    /// Stop after the service is deployed.
    pub no_schedule: bool,

    /// Source directory override.
    pub source: Option<PathBuf>,
}

pub async fn run(options: &RunOptions, args: DeployArgs) -> Result<i32> {
    let mut config = load_config(options)?;
    if let Some(source) = args.source {
        config.service.source_dir = source;
    }

    let pipeline = if args.no_schedule {
        Pipeline::DeployOnly
    } else {
        Pipeline::Full
    };
    let mut request = DeploymentRequest::from_config(&config, pipeline).map_err(ConfigError::from)?;
    request.skip_build = args.skip_build;

    let uri = gate::target_uri(&request.deployment);
    if gate::is_placeholder(uri) {
        let question = Prompt::PlaceholderOverride {
            uri: uri.to_owned(),
        };
        let decision = options.resolve(&question, args.allow_placeholder)?;
        if !decision.proceeds() {
            warn!(uri = %uri, "placeholder endpoint not confirmed; the run will stop at validation");
        }
        request.overrides.allow_placeholder = decision.proceeds();
    }

    execute(options, &config, &request).await
}
