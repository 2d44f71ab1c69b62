//! Implementation of the `herald schedule` command.

use anyhow::Result;
use herald_control::{DeploymentRequest, Pipeline};

use super::{execute, load_config, ConfigError, RunOptions};

pub async fn run(options: &RunOptions) -> Result<i32> {
    let config = load_config(options)?;
    let request =
        DeploymentRequest::from_config(&config, Pipeline::ScheduleOnly).map_err(ConfigError::from)?;
    execute(options, &config, &request).await
}
