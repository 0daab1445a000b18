//! Run state and status types.
//!
//! `RunState` is the mutable, job-scoped context threaded through step
//! execution. It is owned exclusively by the job runner for the duration of
//! one run and dropped at job completion; jobs never share it.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};
use crate::event::Event;

/// Terminal status of a single step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Success,
    Failure,
    Skipped,
}

impl std::fmt::Display for StepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            StepStatus::Success => "success",
            StepStatus::Failure => "failure",
            StepStatus::Skipped => "skipped",
        };
        write!(f, "{}", s)
    }
}

/// Why a step failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureReason {
    /// Non-zero exit, action error, or crash.
    Exit,
    /// Step or job budget exceeded.
    Timeout,
    /// External cancellation interrupted the step.
    Cancelled,
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            FailureReason::Exit => "exit",
            FailureReason::Timeout => "timeout",
            FailureReason::Cancelled => "cancelled",
        };
        write!(f, "{}", s)
    }
}

/// Job lifecycle state.
///
/// The runner drives `Pending → Running → {Succeeded, Failed, Cancelled}`.
/// `Skipped` is assigned by the scheduler to jobs whose dependencies did
/// not succeed; such jobs are never dispatched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Pending,
    Running,
    Succeeded,
    Failed,
    Cancelled,
    Skipped,
}

impl JobState {
    /// Whether this state is terminal.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, JobState::Pending | JobState::Running)
    }

    /// Whether this state counts as green for dependents and reporting.
    pub fn is_green(&self) -> bool {
        matches!(self, JobState::Succeeded | JobState::Skipped)
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobState::Pending => "pending",
            JobState::Running => "running",
            JobState::Succeeded => "succeeded",
            JobState::Failed => "failed",
            JobState::Cancelled => "cancelled",
            JobState::Skipped => "skipped",
        };
        write!(f, "{}", s)
    }
}

/// Record of one executed (or skipped) step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepRecord {
    /// Terminal step status.
    pub status: StepStatus,

    /// Outputs the step produced (already redacted).
    #[serde(default)]
    pub outputs: BTreeMap<String, String>,
}

/// Mutable, job-scoped run context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunState {
    /// Run the job belongs to.
    pub run_id: String,

    /// Job id.
    pub job: String,

    /// Accumulated environment; written only through [`RunState::export_env`].
    #[serde(default)]
    pub env: BTreeMap<String, String>,

    /// Records of processed steps, keyed by step name.
    #[serde(default)]
    pub steps: HashMap<String, StepRecord>,

    /// Files changed between the event's base and head.
    #[serde(default)]
    pub changed_files: Vec<String>,

    /// Secrets injected at job start; read-only thereafter.
    #[serde(default, skip_serializing)]
    pub secrets: HashMap<String, String>,

    /// The event that admitted this run.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event: Option<Event>,
}

impl RunState {
    /// Create a fresh run state for one job.
    pub fn new(run_id: impl Into<String>, job: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            job: job.into(),
            env: BTreeMap::new(),
            steps: HashMap::new(),
            changed_files: Vec::new(),
            secrets: HashMap::new(),
            event: None,
        }
    }

    /// Seed the changed file list.
    pub fn with_changed_files(mut self, files: Vec<String>) -> Self {
        self.changed_files = files;
        self
    }

    /// Inject secrets at job start.
    pub fn with_secrets(mut self, secrets: HashMap<String, String>) -> Self {
        self.secrets = secrets;
        self
    }

    /// Attach the admitting event.
    pub fn with_event(mut self, event: Event) -> Self {
        self.event = Some(event);
        self
    }

    /// Export an environment variable through the append-only channel.
    ///
    /// Re-exporting an existing key with the same value is a no-op. A
    /// conflicting value is an error; silent overwrites are never allowed.
    pub fn export_env(&mut self, key: &str, value: &str) -> EngineResult<()> {
        match self.env.get(key) {
            Some(existing) if existing == value => Ok(()),
            Some(_) => Err(EngineError::EnvConflict(format!(
                "key '{}' is already exported with a different value",
                key
            ))),
            None => {
                self.env.insert(key.to_string(), value.to_string());
                Ok(())
            }
        }
    }

    /// Record a processed step. Each step is recorded at most once per run;
    /// the runner never re-executes a step.
    pub fn record_step(
        &mut self,
        name: &str,
        status: StepStatus,
        outputs: BTreeMap<String, String>,
    ) {
        if self.steps.contains_key(name) {
            tracing::warn!(step = name, "Step already recorded, overwriting");
        }
        self.steps.insert(name.to_string(), StepRecord { status, outputs });
    }

    /// Status of a processed step.
    pub fn step_status(&self, name: &str) -> Option<StepStatus> {
        self.steps.get(name).map(|record| record.status)
    }

    /// Outputs of a processed step.
    pub fn step_outputs(&self, name: &str) -> Option<&BTreeMap<String, String>> {
        self.steps.get(name).map(|record| &record.outputs)
    }

    /// Whether a step has been processed.
    pub fn has_step(&self, name: &str) -> bool {
        self.steps.contains_key(name)
    }

    /// Secret values for redaction.
    pub fn secret_values(&self) -> Vec<&str> {
        self.secrets.values().map(String::as_str).collect()
    }

    /// Build the template context for conditions and input binding.
    ///
    /// Exposes `env`, `steps.<name>` (status + outputs), `event`
    /// (kind/branch), and `changed_files`. Secrets are not included here;
    /// the executor adds them for input binding only.
    pub fn to_template_context(&self) -> HashMap<String, serde_json::Value> {
        let mut context = HashMap::new();

        context.insert("env".to_string(), serde_json::json!(self.env));

        let steps: serde_json::Map<String, serde_json::Value> = self
            .steps
            .iter()
            .map(|(name, record)| {
                (
                    name.clone(),
                    serde_json::json!({
                        "status": record.status.to_string(),
                        "outputs": record.outputs,
                    }),
                )
            })
            .collect();
        context.insert("steps".to_string(), serde_json::Value::Object(steps));

        if let Some(event) = &self.event {
            context.insert(
                "event".to_string(),
                serde_json::json!({
                    "kind": event.kind.to_string(),
                    "branch": event.branch,
                }),
            );
        }

        context.insert(
            "changed_files".to_string(),
            serde_json::json!(self.changed_files),
        );

        context
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_state_terminal() {
        assert!(!JobState::Pending.is_terminal());
        assert!(!JobState::Running.is_terminal());
        assert!(JobState::Succeeded.is_terminal());
        assert!(JobState::Failed.is_terminal());
        assert!(JobState::Cancelled.is_terminal());
        assert!(JobState::Skipped.is_terminal());
    }

    #[test]
    fn test_job_state_green() {
        assert!(JobState::Succeeded.is_green());
        assert!(JobState::Skipped.is_green());
        assert!(!JobState::Failed.is_green());
        assert!(!JobState::Cancelled.is_green());
    }

    #[test]
    fn test_status_serialization() {
        assert_eq!(
            serde_json::to_string(&StepStatus::Success).unwrap(),
            "\"success\""
        );
        assert_eq!(
            serde_json::to_string(&JobState::Cancelled).unwrap(),
            "\"cancelled\""
        );
        assert_eq!(
            serde_json::to_string(&FailureReason::Timeout).unwrap(),
            "\"timeout\""
        );
    }

    #[test]
    fn test_export_env_append_only() {
        let mut state = RunState::new("run-1", "build");

        state.export_env("CC", "clang").unwrap();
        assert_eq!(state.env.get("CC"), Some(&"clang".to_string()));

        // Same value again is an idempotent no-op.
        state.export_env("CC", "clang").unwrap();

        // A different value is a conflict.
        let err = state.export_env("CC", "gcc").unwrap_err();
        assert!(err.to_string().contains("'CC'"));
        assert_eq!(state.env.get("CC"), Some(&"clang".to_string()));
    }

    #[test]
    fn test_record_step_once() {
        let mut state = RunState::new("run-1", "build");
        let mut outputs = BTreeMap::new();
        outputs.insert("version".to_string(), "1.2.3".to_string());

        state.record_step("scan", StepStatus::Success, outputs);

        assert_eq!(state.step_status("scan"), Some(StepStatus::Success));
        assert_eq!(
            state.step_outputs("scan").unwrap().get("version"),
            Some(&"1.2.3".to_string())
        );
        assert!(state.has_step("scan"));
        assert!(!state.has_step("analyze"));
    }

    #[test]
    fn test_template_context_shape() {
        let mut state = RunState::new("run-1", "build")
            .with_event(Event::push("main"))
            .with_changed_files(vec!["src/main.rs".to_string()]);
        state.export_env("LANG", "en").unwrap();
        state.record_step("scan", StepStatus::Success, BTreeMap::new());

        let context = state.to_template_context();

        assert_eq!(context["env"]["LANG"], "en");
        assert_eq!(context["steps"]["scan"]["status"], "success");
        assert_eq!(context["event"]["kind"], "push");
        assert_eq!(context["event"]["branch"], "main");
        assert_eq!(context["changed_files"][0], "src/main.rs");
    }

    #[test]
    fn test_context_excludes_secrets() {
        let mut secrets = HashMap::new();
        secrets.insert("TOKEN".to_string(), "hunter2-long".to_string());
        let state = RunState::new("run-1", "build").with_secrets(secrets);

        let context = state.to_template_context();
        assert!(!context.contains_key("secrets"));
        assert_eq!(state.secret_values(), vec!["hunter2-long"]);
    }

    #[test]
    fn test_state_serialization_hides_secrets() {
        let mut secrets = HashMap::new();
        secrets.insert("TOKEN".to_string(), "super-secret".to_string());
        let state = RunState::new("run-1", "build").with_secrets(secrets);

        let json = serde_json::to_string(&state).unwrap();
        assert!(!json.contains("super-secret"));
    }
}
