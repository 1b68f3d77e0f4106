//! CLI command definitions.

use crate::config::OutputFormat;
use clap::{Args, Subcommand};
use std::path::PathBuf;

#[derive(Subcommand)]
pub enum Commands {
    /// Validate a pipeline file: parse it, expand every matrix and check the
    /// group graph for cycles
    Validate {
        /// Path to pipeline file
        #[arg(default_value = "shipyard.yaml")]
        path: PathBuf,
    },

    /// Show what a run would do for an event without executing anything
    Plan {
        /// Path to pipeline file
        #[arg(default_value = "shipyard.yaml")]
        path: PathBuf,

        #[command(flatten)]
        event: EventArgs,
    },

    /// Execute a pipeline locally
    Run {
        /// Path to pipeline file
        #[arg(default_value = "shipyard.yaml")]
        path: PathBuf,

        #[command(flatten)]
        event: EventArgs,

        /// Maximum number of job instances running at once
        #[arg(long)]
        max_runners: Option<usize>,

        /// Source checkout exposed to steps as SHIPYARD_SOURCE
        #[arg(long, default_value = ".")]
        source: PathBuf,

        /// Root for per-instance working directories
        #[arg(long)]
        work_dir: Option<PathBuf>,

        /// Root for run artifact storage
        #[arg(long)]
        artifact_dir: Option<PathBuf>,

        /// Report format
        #[arg(short, long, value_enum)]
        format: Option<OutputFormat>,
    },

    /// Inspect stored artifacts
    Artifacts {
        #[command(subcommand)]
        command: ArtifactCommands,
    },

    /// Manage CLI configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },

    /// Print the JSON schema of the pipeline file format
    Schema,
}

/// The event a run is evaluated against.
#[derive(Args, Debug, Clone)]
pub struct EventArgs {
    /// Event kind: push, pull_request, release or manual
    #[arg(short, long, default_value = "push")]
    pub event: String,

    /// Branch or tag the event refers to
    #[arg(short = 'r', long = "ref")]
    pub git_ref: Option<String>,

    /// Manual input as KEY=VALUE (repeatable)
    #[arg(short, long = "input", value_name = "KEY=VALUE")]
    pub inputs: Vec<String>,
}

#[derive(Subcommand)]
pub enum ArtifactCommands {
    /// List artifacts of a run
    List {
        /// Run artifact directory
        dir: PathBuf,
    },
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Show current configuration
    Show,
    /// Set a configuration value
    Set {
        /// Configuration key
        key: String,
        /// Configuration value
        value: String,
    },
}
