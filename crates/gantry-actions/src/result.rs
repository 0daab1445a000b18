//! Action execution result types.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Status of an action execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionStatus {
    /// Action executed successfully.
    Success,
    /// Action execution failed.
    Error,
    /// Action execution timed out.
    Timeout,
    /// Action execution was cancelled.
    Cancelled,
}

impl ActionStatus {
    /// Returns true if the status indicates success.
    pub fn is_success(&self) -> bool {
        matches!(self, ActionStatus::Success)
    }

    /// Returns true if the status indicates an error.
    pub fn is_error(&self) -> bool {
        matches!(self, ActionStatus::Error)
    }

    /// Returns true if the status indicates a timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, ActionStatus::Timeout)
    }

    /// Returns true if the status indicates cancellation.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, ActionStatus::Cancelled)
    }
}

impl std::fmt::Display for ActionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ActionStatus::Success => write!(f, "success"),
            ActionStatus::Error => write!(f, "error"),
            ActionStatus::Timeout => write!(f, "timeout"),
            ActionStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Result of an action execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionResult {
    /// Execution status.
    pub status: ActionStatus,

    /// Named outputs produced by the action, consumable by later steps.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub outputs: BTreeMap<String, String>,

    /// Environment exports requested by the action.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,

    /// Error message if status is not Success.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Standard output (for command steps).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stdout: Option<String>,

    /// Standard error (for command steps).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stderr: Option<String>,

    /// Exit code (for command steps).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,

    /// Execution duration in milliseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

impl ActionResult {
    /// Create a successful result.
    pub fn success() -> Self {
        Self {
            status: ActionStatus::Success,
            ..Default::default()
        }
    }

    /// Create an error result with message.
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: ActionStatus::Error,
            error: Some(message.into()),
            ..Default::default()
        }
    }

    /// Create a timeout result.
    pub fn timeout(duration_seconds: u64) -> Self {
        Self {
            status: ActionStatus::Timeout,
            error: Some(format!(
                "Execution timed out after {} seconds",
                duration_seconds
            )),
            duration_ms: Some(duration_seconds * 1000),
            ..Default::default()
        }
    }

    /// Create a cancelled result.
    pub fn cancelled() -> Self {
        Self {
            status: ActionStatus::Cancelled,
            error: Some("Execution cancelled".to_string()),
            ..Default::default()
        }
    }

    /// Create a result from a finished command step.
    pub fn from_command(exit_code: i32, stdout: String, stderr: String) -> Self {
        let status = if exit_code == 0 {
            ActionStatus::Success
        } else {
            ActionStatus::Error
        };

        Self {
            status,
            error: if exit_code != 0 {
                Some(format!("Command exited with code {}", exit_code))
            } else {
                None
            },
            stdout: Some(stdout),
            stderr: Some(stderr),
            exit_code: Some(exit_code),
            ..Default::default()
        }
    }

    /// Set the execution duration.
    pub fn with_duration(mut self, duration_ms: u64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }

    /// Set a named output.
    pub fn with_output(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.outputs.insert(key.into(), value.into());
        self
    }

    /// Set an environment export.
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Returns true if the result indicates success.
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }
}

impl Default for ActionResult {
    fn default() -> Self {
        Self {
            status: ActionStatus::Success,
            outputs: BTreeMap::new(),
            env: BTreeMap::new(),
            error: None,
            stdout: None,
            stderr: None,
            exit_code: None,
            duration_ms: None,
        }
    }
}
