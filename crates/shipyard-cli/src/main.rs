//! Shipyard CLI entrypoint.

use clap::Parser;
use shipyard_trace::{LogFormat, TracingConfig, init_tracing};
use std::process::ExitCode;

mod commands;
mod config;
mod handlers;

#[cfg(test)]
mod config_tests;

use commands::{ArtifactCommands, Commands, ConfigCommands};
use config::CliConfig;
use handlers::RunOptions;

#[derive(Parser)]
#[command(name = "shipyard")]
#[command(author, version, about = "Shipyard pipeline runner", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log format: pretty or json
    #[arg(long, global = true)]
    log_format: Option<LogFormat>,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn log_level(verbose: u8) -> &'static str {
    match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let config = CliConfig::load().unwrap_or_default();

    init_tracing(&TracingConfig {
        level: log_level(cli.verbose).to_string(),
        format: cli.log_format.unwrap_or(config.log_format),
        ..Default::default()
    })?;

    match cli.command {
        Commands::Validate { path } => handlers::validate(&path)?,
        Commands::Plan { path, event } => {
            handlers::plan(&path, &event, config.output_format).await?
        }
        Commands::Run {
            path,
            event,
            max_runners,
            source,
            work_dir,
            artifact_dir,
            format,
        } => {
            let options = RunOptions {
                max_runners,
                source,
                work_dir: work_dir.unwrap_or_else(|| config.work_dir()),
                artifact_dir: artifact_dir.unwrap_or_else(|| config.artifact_dir()),
                env: Default::default(),
            };
            let format = format.unwrap_or(config.output_format);
            if !handlers::run_pipeline(&config, &path, &event, options, format).await? {
                return Ok(ExitCode::FAILURE);
            }
        }
        Commands::Artifacts { command } => match command {
            ArtifactCommands::List { dir } => {
                handlers::list_artifacts(&dir, config.output_format).await?
            }
        },
        Commands::Config { command } => match command {
            ConfigCommands::Show => handlers::show_config(&config)?,
            ConfigCommands::Set { key, value } => handlers::set_config(&key, &value)?,
        },
        Commands::Schema => handlers::schema()?,
    }

    Ok(ExitCode::SUCCESS)
}
