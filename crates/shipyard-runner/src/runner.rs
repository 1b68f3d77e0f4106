//! Core runner trait and types.

use async_trait::async_trait;
use shipyard_core::Result;
use std::collections::BTreeMap;
use std::path::PathBuf;
use tokio::sync::mpsc;

/// Output line from step execution.
#[derive(Debug, Clone)]
pub struct OutputLine {
    pub stream: OutputStream,
    pub content: String,
    pub line_number: u32,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

/// Output stream type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStream {
    Stdout,
    Stderr,
}

/// Result of one command execution.
#[derive(Debug, Clone)]
pub struct StepResult {
    pub exit_code: i32,
    pub success: bool,
    pub duration_ms: u64,
}

/// Everything a runner needs to execute one command. The command and env
/// values are already interpolated.
#[derive(Debug, Clone)]
pub struct StepContext {
    pub step_name: String,
    pub command: String,
    pub shell: String,
    pub working_dir: PathBuf,
    pub env: BTreeMap<String, String>,
}

/// Trait for command execution.
#[async_trait]
pub trait StepRunner: Send + Sync {
    /// Execute a command, streaming output to the provided channel.
    ///
    /// A non-zero exit is reported in [`StepResult`]; `Err` means the
    /// command could not be run at all. Dropping the returned future must
    /// stop the command.
    async fn execute(
        &self,
        ctx: &StepContext,
        output_tx: mpsc::Sender<OutputLine>,
    ) -> Result<StepResult>;
}
