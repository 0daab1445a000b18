//! Engine error types.

use thiserror::Error;

/// Engine error type.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Workflow file could not be parsed.
    #[error("Parse error: {0}")]
    Parse(String),

    /// Workflow definition failed validation.
    #[error("Validation error: {0}")]
    Validation(String),

    /// A referenced entity does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Template rendering failed.
    #[error("Template error: {0}")]
    Template(String),

    /// An action failed in a way the engine cannot recover from.
    #[error("Action error: {0}")]
    Action(#[from] gantry_actions::ActionError),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// An env export attempted to overwrite an existing key.
    #[error("Env export conflict: {0}")]
    EnvConflict(String),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(String),

    /// Internal engine error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<serde_yaml::Error> for EngineError {
    fn from(err: serde_yaml::Error) -> Self {
        EngineError::Parse(err.to_string())
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        EngineError::Serialization(err.to_string())
    }
}

impl From<std::io::Error> for EngineError {
    fn from(err: std::io::Error) -> Self {
        EngineError::Io(err.to_string())
    }
}

/// Result type alias using EngineError.
pub type EngineResult<T> = Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = EngineError::Validation("job 'build' has no steps".to_string());
        assert_eq!(err.to_string(), "Validation error: job 'build' has no steps");

        let err = EngineError::NotFound("job: deploy".to_string());
        assert_eq!(err.to_string(), "Not found: job: deploy");
    }

    #[test]
    fn test_from_yaml_error() {
        let yaml_err = serde_yaml::from_str::<serde_json::Value>("key: [unclosed").unwrap_err();
        let err: EngineError = yaml_err.into();
        assert!(matches!(err, EngineError::Parse(_)));
    }

    #[test]
    fn test_from_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "missing file");
        let err: EngineError = io_err.into();
        assert!(err.to_string().contains("missing file"));
    }

    #[test]
    fn test_from_action_error() {
        let action_err = gantry_actions::ActionError::Timeout(30);
        let err: EngineError = action_err.into();
        assert!(matches!(err, EngineError::Action(_)));
    }
}
