//! Run reports and the external reporting contract.
//!
//! Every admitted-and-dispatched job yields exactly one terminal
//! [`JobReport`]; a workflow run yields exactly one [`WorkflowReport`].
//! External collaborators (commit-status APIs, dashboards) plug in through
//! the [`Reporter`] trait; [`LogReporter`] is the tracing-backed default.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::engine::state::{FailureReason, JobState, StepStatus};

/// Report for a single processed step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepReport {
    /// Step display name.
    pub name: String,

    /// Terminal step status.
    pub status: StepStatus,

    /// Failure reason, present only for failures.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<FailureReason>,

    /// Outputs the step produced (redacted).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub outputs: BTreeMap<String, String>,

    /// Diagnostic message (redacted).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Wall-clock duration of the step.
    pub duration_ms: u64,
}

impl StepReport {
    /// Successful step with its outputs.
    pub fn success(name: impl Into<String>, outputs: BTreeMap<String, String>) -> Self {
        Self {
            name: name.into(),
            status: StepStatus::Success,
            reason: None,
            outputs,
            error: None,
            duration_ms: 0,
        }
    }

    /// Failed step with reason and diagnostic.
    pub fn failure(
        name: impl Into<String>,
        reason: FailureReason,
        error: Option<String>,
    ) -> Self {
        Self {
            name: name.into(),
            status: StepStatus::Failure,
            reason: Some(reason),
            outputs: BTreeMap::new(),
            error,
            duration_ms: 0,
        }
    }

    /// Step skipped by its condition.
    pub fn skipped(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: StepStatus::Skipped,
            reason: None,
            outputs: BTreeMap::new(),
            error: None,
            duration_ms: 0,
        }
    }

    /// Attach captured outputs (used when a failure still produced some).
    pub fn with_outputs(mut self, outputs: BTreeMap<String, String>) -> Self {
        self.outputs = outputs;
        self
    }
}

/// Terminal report for one job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobReport {
    /// Job id.
    pub job: String,

    /// Human-readable job name, if declared.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Terminal job state.
    pub state: JobState,

    /// Step reports in processing order.
    #[serde(default)]
    pub steps: Vec<StepReport>,

    /// Failure or skip explanation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// When the job started (or was decided, for undispatched jobs).
    pub started_at: DateTime<Utc>,

    /// When the job finished.
    pub finished_at: DateTime<Utc>,

    /// Wall-clock duration of the job.
    pub duration_ms: u64,
}

impl JobReport {
    /// Report for a job skipped without dispatch (unmet dependencies).
    pub fn skipped(job: impl Into<String>, name: Option<String>, reason: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            job: job.into(),
            name,
            state: JobState::Skipped,
            steps: Vec::new(),
            error: Some(reason.into()),
            started_at: now,
            finished_at: now,
            duration_ms: 0,
        }
    }

    /// Report for a job failed without dispatch (no runner, task panic).
    pub fn failed(job: impl Into<String>, name: Option<String>, error: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            job: job.into(),
            name,
            state: JobState::Failed,
            steps: Vec::new(),
            error: Some(error.into()),
            started_at: now,
            finished_at: now,
            duration_ms: 0,
        }
    }

    /// Whether the job left the run green.
    pub fn is_green(&self) -> bool {
        self.state.is_green()
    }
}

/// Terminal status of a whole workflow run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkflowStatus {
    Succeeded,
    Failed,
    Cancelled,
}

impl WorkflowStatus {
    /// Derive the run status from its job reports. A failed job loses;
    /// cancellation is reported distinctly; skipped jobs stay green.
    pub fn from_jobs(jobs: &[JobReport]) -> Self {
        if jobs.iter().any(|j| j.state == JobState::Failed) {
            WorkflowStatus::Failed
        } else if jobs.iter().any(|j| j.state == JobState::Cancelled) {
            WorkflowStatus::Cancelled
        } else {
            WorkflowStatus::Succeeded
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, WorkflowStatus::Succeeded)
    }
}

impl std::fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            WorkflowStatus::Succeeded => "succeeded",
            WorkflowStatus::Failed => "failed",
            WorkflowStatus::Cancelled => "cancelled",
        };
        write!(f, "{}", s)
    }
}

/// Report for one workflow run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowReport {
    /// Unique run id.
    pub run_id: String,

    /// Workflow name.
    pub workflow: String,

    /// Whether the event matched the workflow's triggers.
    pub admitted: bool,

    /// Terminal run status.
    pub status: WorkflowStatus,

    /// Job reports in completion order.
    #[serde(default)]
    pub jobs: Vec<JobReport>,

    /// When the run started.
    pub started_at: DateTime<Utc>,

    /// When the run finished.
    pub finished_at: DateTime<Utc>,

    /// Wall-clock duration of the run.
    pub duration_ms: u64,
}

impl WorkflowReport {
    /// Find a job report by id.
    pub fn job(&self, id: &str) -> Option<&JobReport> {
        self.jobs.iter().find(|j| j.job == id)
    }
}

/// External reporting collaborator contract.
pub trait Reporter: Send + Sync {
    /// A run was admitted and is about to dispatch jobs.
    fn workflow_started(&self, workflow: &str, run_id: &str);

    /// A job reached a terminal state.
    fn job_finished(&self, report: &JobReport);

    /// The run reached a terminal state.
    fn workflow_finished(&self, report: &WorkflowReport);
}

/// Default reporter that logs through tracing.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogReporter;

impl Reporter for LogReporter {
    fn workflow_started(&self, workflow: &str, run_id: &str) {
        tracing::info!(workflow = workflow, run_id = run_id, "Workflow run started");
    }

    fn job_finished(&self, report: &JobReport) {
        match report.state {
            JobState::Failed => tracing::error!(
                job = %report.job,
                error = report.error.as_deref().unwrap_or("unknown"),
                duration_ms = report.duration_ms,
                "Job failed"
            ),
            JobState::Cancelled => tracing::warn!(
                job = %report.job,
                duration_ms = report.duration_ms,
                "Job cancelled"
            ),
            _ => tracing::info!(
                job = %report.job,
                state = %report.state,
                duration_ms = report.duration_ms,
                "Job finished"
            ),
        }
    }

    fn workflow_finished(&self, report: &WorkflowReport) {
        tracing::info!(
            workflow = %report.workflow,
            run_id = %report.run_id,
            status = %report.status,
            jobs = report.jobs.len(),
            duration_ms = report.duration_ms,
            "Workflow run finished"
        );
    }
}
