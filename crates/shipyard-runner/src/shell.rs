//! Shell-based command execution on the host.

use crate::runner::{OutputLine, OutputStream, StepContext, StepResult, StepRunner};
use async_trait::async_trait;
use shipyard_core::{Error, Result};
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::{debug, info};

/// Shell runner for executing commands on the host.
#[derive(Debug, Default)]
pub struct ShellRunner;

impl ShellRunner {
    pub fn new() -> Self {
        Self
    }

    /// Program and leading arguments for a shell name.
    fn shell_invocation(shell: &str) -> (&str, Vec<&'static str>) {
        match shell {
            "" | "sh" => ("sh", vec!["-c"]),
            "bash" => ("bash", vec!["--noprofile", "--norc", "-eo", "pipefail", "-c"]),
            "cmd" => ("cmd", vec!["/D", "/C"]),
            "pwsh" => ("pwsh", vec!["-NoProfile", "-NonInteractive", "-Command"]),
            "powershell" => ("powershell", vec!["-NoProfile", "-NonInteractive", "-Command"]),
            other => (other, vec!["-c"]),
        }
    }

    fn stream_lines<R>(
        reader: R,
        stream: OutputStream,
        tx: mpsc::Sender<OutputLine>,
    ) -> tokio::task::JoinHandle<()>
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        tokio::spawn(async move {
            let mut lines = BufReader::new(reader).lines();
            let mut line_num = 0u32;

            while let Ok(Some(line)) = lines.next_line().await {
                line_num += 1;
                let output = OutputLine {
                    stream,
                    content: line,
                    line_number: line_num,
                    timestamp: chrono::Utc::now(),
                };
                if tx.send(output).await.is_err() {
                    break;
                }
            }
        })
    }
}

#[async_trait]
impl StepRunner for ShellRunner {
    async fn execute(
        &self,
        ctx: &StepContext,
        output_tx: mpsc::Sender<OutputLine>,
    ) -> Result<StepResult> {
        let start = std::time::Instant::now();
        let (program, args) = Self::shell_invocation(&ctx.shell);

        info!(
            step = %ctx.step_name,
            shell = program,
            working_dir = %ctx.working_dir.display(),
            "Executing shell command"
        );

        let mut child = Command::new(program)
            .args(&args)
            .arg(&ctx.command)
            .current_dir(&ctx.working_dir)
            .envs(&ctx.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::Internal(format!("Failed to spawn {}: {}", program, e)))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Internal("stdout was not captured".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| Error::Internal("stderr was not captured".to_string()))?;

        let stdout_handle = Self::stream_lines(stdout, OutputStream::Stdout, output_tx.clone());
        let stderr_handle = Self::stream_lines(stderr, OutputStream::Stderr, output_tx);

        let status = child.wait().await?;

        // Wait for output streaming to complete
        let _ = stdout_handle.await;
        let _ = stderr_handle.await;

        let exit_code = status.code().unwrap_or(-1);
        let duration_ms = start.elapsed().as_millis() as u64;

        debug!(exit_code, duration_ms, "Command completed");

        Ok(StepResult {
            exit_code,
            success: exit_code == 0,
            duration_ms,
        })
    }
}
