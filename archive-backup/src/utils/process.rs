//! External tool invocation with bounded run time.

use crate::config::ToolConfig;
use crate::utils::errors::{BackupError, Result};
use std::ffi::OsStr;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

/// Lines of tool output kept in failure messages.
const DIAGNOSTIC_LINES: usize = 20;

/// Captured result of one tool invocation
#[derive(Debug)]
pub struct ToolOutput {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
}

impl ToolOutput {
    pub fn success(&self) -> bool {
        self.status.success()
    }

    /// Exit status plus the tail of whatever the tool printed, stderr first.
    pub fn diagnostics(&self) -> String {
        let text = if self.stderr.trim().is_empty() {
            &self.stdout
        } else {
            &self.stderr
        };
        let lines: Vec<&str> = text.trim().lines().collect();
        let tail = lines[lines.len().saturating_sub(DIAGNOSTIC_LINES)..].join("\n");
        if tail.is_empty() {
            format!("{}", self.status)
        } else {
            format!("{}: {}", self.status, tail)
        }
    }
}

/// Run `tool` with `args` appended to its configured leading arguments.
///
/// The child is killed if the timeout elapses or the future is dropped.
/// A program that cannot be spawned at all is reported as `ToolUnavailable`.
pub async fn run_tool<I, S>(tool: &ToolConfig, args: I, limit: Duration) -> Result<ToolOutput>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let mut command = Command::new(&tool.program);
    command
        .args(&tool.args)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    debug!("Running {:?}", command.as_std());

    let output = match tokio::time::timeout(limit, command.output()).await {
        Ok(Ok(output)) => output,
        Ok(Err(e)) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(BackupError::ToolUnavailable(format!(
                "{} not found on PATH",
                tool.program
            )));
        }
        Ok(Err(e)) => {
            return Err(BackupError::ToolUnavailable(format!(
                "{} could not be started: {}",
                tool.program, e
            )));
        }
        Err(_) => {
            return Err(BackupError::Timeout {
                operation: tool.program.clone(),
                secs: limit.as_secs(),
            });
        }
    };

    Ok(ToolOutput {
        status: output.status,
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    })
}

/// Check that a tool runs and exits cleanly with the given harmless arguments.
pub async fn probe_tool(tool: &ToolConfig, args: &[&str], limit: Duration) -> Result<()> {
    let output = run_tool(tool, args, limit).await?;
    if output.success() {
        Ok(())
    } else {
        Err(BackupError::ToolUnavailable(format!(
            "{} probe exited with {}",
            tool.program,
            output.diagnostics()
        )))
    }
}
