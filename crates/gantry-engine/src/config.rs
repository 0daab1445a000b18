//! Engine configuration.

use std::time::Duration;

use regex::Regex;

use crate::error::{EngineError, EngineResult};

/// Default per-step timeout budget.
pub const DEFAULT_STEP_TIMEOUT: Duration = Duration::from_secs(300);

/// Default per-job timeout budget.
pub const DEFAULT_JOB_TIMEOUT: Duration = Duration::from_secs(3600);

/// Default number of jobs that may run concurrently.
pub const DEFAULT_MAX_PARALLEL_JOBS: usize = 4;

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Per-step timeout used when a step declares none.
    pub step_timeout: Duration,

    /// Per-job timeout used when a job declares none.
    pub job_timeout: Duration,

    /// Grace period between a cancellation signal and force-kill.
    pub cancel_grace: Duration,

    /// Maximum concurrent jobs.
    pub max_parallel_jobs: usize,
}

impl EngineConfig {
    /// Load configuration from environment variables.
    ///
    /// Unset variables fall back to defaults; a set but unparseable value
    /// is a configuration error rather than a silent fallback.
    pub fn from_env() -> EngineResult<Self> {
        let mut config = Self::default();

        if let Some(value) = read_env("GANTRY_STEP_TIMEOUT") {
            config.step_timeout = parse_duration(&value)
                .map_err(|e| EngineError::Config(format!("GANTRY_STEP_TIMEOUT: {}", e)))?;
        }

        if let Some(value) = read_env("GANTRY_JOB_TIMEOUT") {
            config.job_timeout = parse_duration(&value)
                .map_err(|e| EngineError::Config(format!("GANTRY_JOB_TIMEOUT: {}", e)))?;
        }

        if let Some(value) = read_env("GANTRY_CANCEL_GRACE") {
            config.cancel_grace = parse_duration(&value)
                .map_err(|e| EngineError::Config(format!("GANTRY_CANCEL_GRACE: {}", e)))?;
        }

        if let Some(value) = read_env("GANTRY_MAX_PARALLEL_JOBS") {
            let parallel: usize = value.parse().map_err(|_| {
                EngineError::Config(format!("GANTRY_MAX_PARALLEL_JOBS: invalid value '{}'", value))
            })?;
            if parallel == 0 {
                return Err(EngineError::Config(
                    "GANTRY_MAX_PARALLEL_JOBS must be at least 1".to_string(),
                ));
            }
            config.max_parallel_jobs = parallel;
        }

        Ok(config)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            step_timeout: DEFAULT_STEP_TIMEOUT,
            job_timeout: DEFAULT_JOB_TIMEOUT,
            cancel_grace: gantry_actions::command::DEFAULT_CANCEL_GRACE,
            max_parallel_jobs: DEFAULT_MAX_PARALLEL_JOBS,
        }
    }
}

fn read_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|s| !s.trim().is_empty())
}

/// Parse a humane duration string: "90", "90s", "5m", "1h".
///
/// A bare number is seconds.
pub fn parse_duration(input: &str) -> EngineResult<Duration> {
    let trimmed = input.trim();
    let pattern = Regex::new(r"^(\d+)(s|m|h)?$")
        .map_err(|e| EngineError::Internal(format!("duration pattern: {}", e)))?;

    let caps = pattern.captures(trimmed).ok_or_else(|| {
        EngineError::Validation(format!(
            "Invalid duration '{}' (expected forms like '90s', '5m', '1h')",
            input
        ))
    })?;

    let value: u64 = caps[1].parse().map_err(|_| {
        EngineError::Validation(format!("Invalid duration '{}': number out of range", input))
    })?;

    let seconds = match caps.get(2).map(|m| m.as_str()) {
        Some("m") => value.saturating_mul(60),
        Some("h") => value.saturating_mul(3600),
        _ => value,
    };

    Ok(Duration::from_secs(seconds))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = EngineConfig::default();
        assert_eq!(config.step_timeout, Duration::from_secs(300));
        assert_eq!(config.job_timeout, Duration::from_secs(3600));
        assert_eq!(config.cancel_grace, Duration::from_secs(10));
        assert_eq!(config.max_parallel_jobs, 4);
    }

    #[test]
    fn test_parse_duration_forms() {
        assert_eq!(parse_duration("90").unwrap(), Duration::from_secs(90));
        assert_eq!(parse_duration("90s").unwrap(), Duration::from_secs(90));
        assert_eq!(parse_duration("5m").unwrap(), Duration::from_secs(300));
        assert_eq!(parse_duration("1h").unwrap(), Duration::from_secs(3600));
        assert_eq!(parse_duration(" 30s ").unwrap(), Duration::from_secs(30));
    }

    #[test]
    fn test_parse_duration_rejects_garbage() {
        assert!(parse_duration("").is_err());
        assert!(parse_duration("5 m").is_err());
        assert!(parse_duration("m5").is_err());
        assert!(parse_duration("ninety").is_err());
        assert!(parse_duration("-5s").is_err());
        assert!(parse_duration("1.5h").is_err());
    }

    #[test]
    fn test_parse_duration_error_message() {
        let err = parse_duration("soon").unwrap_err();
        assert!(err.to_string().contains("soon"));
        assert!(err.to_string().contains("5m"));
    }
}
