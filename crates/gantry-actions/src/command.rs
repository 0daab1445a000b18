//! Local command execution for `run:` steps.
//!
//! Commands run under a shell with captured output. Two file channels are
//! handed to the child through `GANTRY_OUTPUT` and `GANTRY_ENV`: lines of
//! `key=value` written there become step outputs and environment exports
//! once the command finishes.

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use crate::context::StepContext;
use crate::error::ActionError;
use crate::registry::Action;
use crate::result::ActionResult;

/// Environment variable naming the step-output channel file.
pub const OUTPUT_CHANNEL_VAR: &str = "GANTRY_OUTPUT";

/// Environment variable naming the env-export channel file.
pub const ENV_CHANNEL_VAR: &str = "GANTRY_ENV";

/// Grace given to a cancelled child before it is killed, when the caller
/// does not specify one.
pub const DEFAULT_CANCEL_GRACE: Duration = Duration::from_secs(10);

/// Command step configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandSpec {
    /// Command to execute.
    pub command: String,

    /// Shell to use (default: "bash").
    #[serde(default = "default_shell")]
    pub shell: String,

    /// Working directory.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cwd: Option<String>,

    /// Timeout in seconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<u64>,
}

fn default_shell() -> String {
    "bash".to_string()
}

enum WaitOutcome {
    Finished(std::io::Result<std::process::ExitStatus>),
    TimedOut(Duration),
    Cancelled,
}

/// Executes `run:` step commands.
pub struct CommandAction;

impl CommandAction {
    /// Create a new command action.
    pub fn new() -> Self {
        Self
    }

    /// Execute a command directly.
    #[allow(clippy::too_many_arguments)]
    pub async fn execute_command(
        &self,
        command: &str,
        shell: &str,
        cwd: Option<&str>,
        env: &BTreeMap<String, String>,
        timeout_duration: Option<Duration>,
        cancellation: &CancellationToken,
        cancel_grace: Duration,
    ) -> Result<ActionResult, ActionError> {
        let start = std::time::Instant::now();

        // Channel files the child writes outputs and env exports to
        let output_channel = tempfile::NamedTempFile::new()
            .map_err(|e| ActionError::Io(format!("Failed to create output channel: {}", e)))?;
        let env_channel = tempfile::NamedTempFile::new()
            .map_err(|e| ActionError::Io(format!("Failed to create env channel: {}", e)))?;

        // Build the command
        let mut cmd = Command::new(shell);
        cmd.arg("-c").arg(command);

        if let Some(dir) = cwd {
            cmd.current_dir(dir);
        }

        for (k, v) in env {
            cmd.env(k, v);
        }
        cmd.env(OUTPUT_CHANNEL_VAR, output_channel.path());
        cmd.env(ENV_CHANNEL_VAR, env_channel.path());

        cmd.stdout(std::process::Stdio::piped());
        cmd.stderr(std::process::Stdio::piped());

        // Spawn the process
        let mut child = cmd
            .spawn()
            .map_err(|e| ActionError::Process(format!("Failed to spawn process: {}", e)))?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        // Read stdout and stderr concurrently
        let stdout_handle = tokio::spawn(async move {
            let mut output = String::new();
            if let Some(stdout) = stdout {
                let mut reader = BufReader::new(stdout).lines();
                while let Ok(Some(line)) = reader.next_line().await {
                    output.push_str(&line);
                    output.push('\n');
                }
            }
            output
        });

        let stderr_handle = tokio::spawn(async move {
            let mut output = String::new();
            if let Some(stderr) = stderr {
                let mut reader = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = reader.next_line().await {
                    output.push_str(&line);
                    output.push('\n');
                }
            }
            output
        });

        // Wait for completion, the timeout, or cancellation
        let outcome = if let Some(duration) = timeout_duration {
            tokio::select! {
                result = timeout(duration, child.wait()) => match result {
                    Ok(status) => WaitOutcome::Finished(status),
                    Err(_) => WaitOutcome::TimedOut(duration),
                },
                _ = cancellation.cancelled() => WaitOutcome::Cancelled,
            }
        } else {
            tokio::select! {
                status = child.wait() => WaitOutcome::Finished(status),
                _ = cancellation.cancelled() => WaitOutcome::Cancelled,
            }
        };

        let status = match outcome {
            WaitOutcome::Finished(status) => status
                .map_err(|e| ActionError::Process(format!("Failed to wait for process: {}", e)))?,
            WaitOutcome::TimedOut(duration) => {
                let _ = child.kill().await;
                let duration_ms = start.elapsed().as_millis() as u64;
                return Ok(ActionResult::timeout(duration.as_secs()).with_duration(duration_ms));
            }
            WaitOutcome::Cancelled => {
                // Bounded grace for the child to finish on its own
                if timeout(cancel_grace, child.wait()).await.is_err() {
                    let _ = child.kill().await;
                }
                let duration_ms = start.elapsed().as_millis() as u64;
                return Ok(ActionResult::cancelled().with_duration(duration_ms));
            }
        };

        let exit_code = status.code().unwrap_or(-1);
        let stdout = stdout_handle.await.unwrap_or_default();
        let stderr = stderr_handle.await.unwrap_or_default();

        let outputs = read_channel(output_channel.path(), "output").await?;
        let env_exports = read_channel(env_channel.path(), "env").await?;

        let duration_ms = start.elapsed().as_millis() as u64;

        let mut result = ActionResult::from_command(exit_code, stdout, stderr);
        result.outputs = outputs;
        result.env = env_exports;
        Ok(result.with_duration(duration_ms))
    }

    /// Parse a command spec from the step context inputs.
    fn parse_spec(&self, ctx: &StepContext) -> Result<CommandSpec, ActionError> {
        let inputs = serde_json::Value::Object(
            ctx.inputs
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        );
        serde_json::from_value(inputs)
            .map_err(|e| ActionError::Configuration(format!("Invalid command spec: {}", e)))
    }
}

impl Default for CommandAction {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Action for CommandAction {
    fn name(&self) -> &'static str {
        "run"
    }

    async fn execute(&self, ctx: &StepContext) -> Result<ActionResult, ActionError> {
        let spec = self.parse_spec(ctx)?;

        let timeout_duration = spec.timeout_seconds.map(Duration::from_secs);

        tracing::debug!(
            command = %spec.command,
            shell = %spec.shell,
            cwd = ?spec.cwd,
            timeout = ?timeout_duration,
            "Executing command step"
        );

        self.execute_command(
            &spec.command,
            &spec.shell,
            spec.cwd.as_deref(),
            &ctx.env,
            timeout_duration,
            &ctx.cancellation,
            DEFAULT_CANCEL_GRACE,
        )
        .await
    }
}

/// Read and parse a `key=value` channel file.
async fn read_channel(
    path: &std::path::Path,
    kind: &str,
) -> Result<BTreeMap<String, String>, ActionError> {
    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| ActionError::Io(format!("Failed to read {} channel: {}", kind, e)))?;
    parse_kv_lines(&content, kind)
}

/// Parse `key=value` lines. Blank lines are ignored; anything else without
/// an `=` or with an invalid key is an export error.
fn parse_kv_lines(content: &str, kind: &str) -> Result<BTreeMap<String, String>, ActionError> {
    let key_re = Regex::new(r"^[A-Za-z_][A-Za-z0-9_-]*$")
        .map_err(|e| ActionError::Export(e.to_string()))?;

    let mut entries = BTreeMap::new();
    for line in content.lines() {
        let line = line.trim_end_matches('\r');
        if line.trim().is_empty() {
            continue;
        }

        let (key, value) = line.split_once('=').ok_or_else(|| {
            ActionError::Export(format!("Malformed {} line (expected key=value): '{}'", kind, line))
        })?;

        if !key_re.is_match(key) {
            return Err(ActionError::Export(format!(
                "Invalid {} key '{}'",
                kind, key
            )));
        }

        entries.insert(key.to_string(), value.to_string());
    }

    Ok(entries)
}
