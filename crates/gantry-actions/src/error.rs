//! Action execution error types.

use thiserror::Error;

/// Errors that can occur during action execution.
#[derive(Debug, Error)]
pub enum ActionError {
    /// Action reference not found in registry.
    #[error("Action not resolved: {0}")]
    NotFound(String),

    /// Action reference string is malformed or unpinned.
    #[error("Invalid action reference: {0}")]
    InvalidReference(String),

    /// Action execution failed.
    #[error("Execution failed: {0}")]
    ExecutionFailed(String),

    /// Action execution timed out.
    #[error("Execution timed out after {0} seconds")]
    Timeout(u64),

    /// Action execution was cancelled before completion.
    #[error("Execution cancelled")]
    Cancelled,

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Template rendering error.
    #[error("Template error: {0}")]
    Template(String),

    /// Process spawn error.
    #[error("Process error: {0}")]
    Process(String),

    /// Export channel error (malformed or conflicting key=value line).
    #[error("Export error: {0}")]
    Export(String),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(String),
}

impl From<std::io::Error> for ActionError {
    fn from(e: std::io::Error) -> Self {
        ActionError::Io(e.to_string())
    }
}

impl From<serde_json::Error> for ActionError {
    fn from(e: serde_json::Error) -> Self {
        ActionError::Json(e.to_string())
    }
}

impl From<minijinja::Error> for ActionError {
    fn from(e: minijinja::Error) -> Self {
        ActionError::Template(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ActionError::NotFound("octo/setup@deadbeef".to_string());
        assert_eq!(err.to_string(), "Action not resolved: octo/setup@deadbeef");

        let err = ActionError::Timeout(30);
        assert_eq!(err.to_string(), "Execution timed out after 30 seconds");
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let action_err: ActionError = io_err.into();
        assert!(matches!(action_err, ActionError::Io(_)));
    }
}
