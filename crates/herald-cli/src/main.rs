//! Herald CLI - deploy and schedule the analytics agent.

mod commands;
mod prompt;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use commands::{ConfigError, RunOptions};

/// Exit code for configuration and environment errors.
const EXIT_CONFIG: i32 = 2;

#[derive(Parser)]
#[command(name = "herald")]
#[command(about = "Deploy the analytics agent and schedule its weekly run")]
#[command(version)]
struct Cli {
    /// Configuration file (defaults to herald.toml in the current directory)
    #[arg(short, long, global = true, env = "HERALD_CONFIG")]
    config: Option<PathBuf>,

    /// Never prompt; unanswered questions are declined
    #[arg(long, global = true)]
    non_interactive: bool,

    /// Write the run report as JSON to this path
    #[arg(long, global = true, value_name = "PATH")]
    report: Option<PathBuf>,

    /// Run the scheduler job once after scheduling it
    #[arg(long, global = true)]
    trigger: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build, deploy, bind and schedule the agent
    Deploy {
        /// Deploy even if the analytics endpoint looks like a placeholder
        #[arg(long)]
        allow_placeholder: bool,

        /// Deploy the existing image instead of building one
        #[arg(long)]
        skip_build: bool,

        /// Stop after the service is deployed
        #[arg(long)]
        no_schedule: bool,

        /// Source directory to build (overrides service.source_dir)
        #[arg(long)]
        source: Option<PathBuf>,
    },

    /// Bind and schedule against the already deployed agent
    Schedule,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("herald=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let options = RunOptions {
        config: cli.config,
        non_interactive: cli.non_interactive,
        report: cli.report,
        trigger: cli.trigger,
    };

    let result = match cli.command {
        Commands::Deploy {
            allow_placeholder,
            skip_build,
            no_schedule,
            source,
        } => {
            let args = commands::deploy::DeployArgs {
                allow_placeholder,
                skip_build,
                no_schedule,
                source,
            };
            commands::deploy::run(&options, args).await
        }
        Commands::Schedule => commands::schedule::run(&options).await,
    };

    match result {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("Error: {e:#}");
            let code = if e.downcast_ref::<ConfigError>().is_some() {
                EXIT_CONFIG
            } else {
                1
            };
            std::process::exit(code);
        }
    }
}
