//! Subcommand implementations.

pub mod deploy;
pub mod schedule;

use std::path::PathBuf;

use anyhow::{Context, Result};
use herald_control::{
    create_control_plane, Answer, ControlConfig, ControlError, Decision, DeploymentManager,
    DeploymentRequest, Prompt, RunOutcome,
};
use thiserror::Error;

use crate::prompt;

/// Configuration could not be loaded or turned into a run.
#[derive(Error, Debug)]
#[error("{0}")]
pub struct ConfigError(#[from] ControlError);

/// Options shared by every subcommand.
pub struct RunOptions {
    /// Explicit configuration file.
    pub config: Option<PathBuf>,
    /// Never prompt.
    pub non_interactive: bool,
    /// Where to write the JSON report.
    pub report: Option<PathBuf>,
    /// Run the job once after scheduling it.
    pub trigger: bool,
}

impl RunOptions {
    /// Resolve a question from a flag, the terminal, or the default.
    ///
    /// A set flag answers yes without asking. Otherwise the operator is asked
    /// when a terminal is attached; everything else declines.
    pub fn resolve(&self, question: &Prompt, flag: bool) -> Result<Decision> {
        let answer = if flag {
            Answer::Preset(true)
        } else if self.non_interactive || !prompt::is_interactive() {
            Answer::Preset(false)
        } else {
            prompt::ask(question).context("failed to read answer from terminal")?
        };
        Ok(herald_control::decide(question, &answer))
    }
}

/// Load configuration from the explicit path or the default sources.
pub fn load_config(options: &RunOptions) -> Result<ControlConfig, ConfigError> {
    let config = match &options.config {
        Some(path) => ControlConfig::from_file(path)?,
        None => ControlConfig::load()?,
    };
    Ok(config)
}

/// Run the request, offer the one-off trigger, and report.
///
/// Returns the process exit code of the run.
pub async fn execute(
    options: &RunOptions,
    config: &ControlConfig,
    request: &DeploymentRequest,
) -> Result<i32> {
    let plane = create_control_plane(&config.control_plane).map_err(ConfigError::from)?;
    let manager = DeploymentManager::new(plane, config.control_plane.timeouts);

    let report = match manager.run(request).await {
        RunOutcome::Done(mut run) => {
            if request.pipeline.schedules() {
                let question = Prompt::ManualTrigger {
                    job: request.schedule.name.clone(),
                };
                let decision = options.resolve(&question, options.trigger)?;
                manager.trigger(&mut run, request, decision).await;
            }
            run.into_report()
        }
        RunOutcome::Aborted(run) => run.into_report(),
    };

    print!("{}", report.render());

    if let Some(path) = &options.report {
        report
            .write_json(path)
            .with_context(|| format!("failed to write report to {}", path.display()))?;
    }

    Ok(report.exit_code())
}
