//! Job execution.
//!
//! A job runs its steps strictly in declaration order on one logical
//! runner. Conditions gate steps against the accumulated run state, a
//! failing step stops the job unless it opted into `continue-on-error`,
//! and the whole job races its timeout budget and the run's cancellation
//! token.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use gantry_actions::{ActionRegistry, PermissionSet};

use crate::config::{self, EngineConfig};
use crate::engine::condition::ConditionEvaluator;
use crate::engine::executor::StepExecutor;
use crate::engine::state::{FailureReason, JobState, RunState, StepStatus};
use crate::report::{JobReport, StepReport};
use crate::workflow::types::JobDefinition;

/// Runs the steps of a single job.
pub struct JobRunner {
    executor: StepExecutor,
    conditions: ConditionEvaluator,
    config: EngineConfig,
}

impl JobRunner {
    /// Create a runner backed by the given action registry.
    pub fn new(registry: Arc<ActionRegistry>, config: EngineConfig) -> Self {
        Self {
            executor: StepExecutor::new(registry, config.clone()),
            conditions: ConditionEvaluator::new(),
            config,
        }
    }

    /// Run a job to completion and report its outcome.
    ///
    /// Skipped steps are recorded in the run state so later conditions can
    /// observe them. A cancelled step cancels the job even when the step
    /// set `continue-on-error`.
    pub async fn run_job(
        &self,
        job_id: &str,
        job: &JobDefinition,
        mut state: RunState,
        permissions: &PermissionSet,
        cancellation: CancellationToken,
    ) -> JobReport {
        let started_at = chrono::Utc::now();
        let start = std::time::Instant::now();

        let budget = match &job.timeout {
            Some(timeout) => match config::parse_duration(timeout) {
                Ok(duration) => duration,
                Err(e) => {
                    // Parsed workflows are validated; this guards direct use.
                    return JobReport::failed(job_id, job.name.clone(), e.to_string());
                }
            },
            None => self.config.job_timeout,
        };
        let deadline = tokio::time::Instant::now() + budget;

        tracing::info!(job = %job_id, steps = job.steps.len(), "Job started");

        let mut job_state = JobState::Running;
        let mut job_error = None;
        let mut reports = Vec::with_capacity(job.steps.len());

        for (index, step) in job.steps.iter().enumerate() {
            let name = step.display_name(index);

            if cancellation.is_cancelled() {
                job_state = JobState::Cancelled;
                job_error = Some("Job cancelled".to_string());
                break;
            }

            if let Some(condition) = &step.r#if {
                if !self.conditions.evaluate(condition, &state) {
                    tracing::debug!(job = %job_id, step = %name, "Step skipped by condition");
                    state.record_step(&name, StepStatus::Skipped, Default::default());
                    reports.push(StepReport::skipped(&name));
                    continue;
                }
            }

            let report = self
                .executor
                .execute(
                    step,
                    index,
                    &mut state,
                    permissions,
                    Some(deadline),
                    &cancellation,
                )
                .await;

            if report.status == StepStatus::Failure {
                if report.reason == Some(FailureReason::Cancelled) {
                    job_state = JobState::Cancelled;
                    job_error = Some(format!("Step '{}' cancelled", name));
                    reports.push(report);
                    break;
                }
                if step.continue_on_error {
                    tracing::warn!(job = %job_id, step = %name, "Step failed, continuing");
                    reports.push(report);
                    continue;
                }
                job_state = JobState::Failed;
                job_error = Some(format!(
                    "Step '{}' failed: {}",
                    name,
                    report.error.as_deref().unwrap_or("unknown error")
                ));
                reports.push(report);
                break;
            }

            reports.push(report);
        }

        if job_state == JobState::Running {
            job_state = JobState::Succeeded;
        }

        match job_state {
            JobState::Succeeded => tracing::info!(job = %job_id, "Job succeeded"),
            JobState::Cancelled => tracing::warn!(job = %job_id, "Job cancelled"),
            _ => tracing::error!(job = %job_id, "Job failed"),
        }

        JobReport {
            job: job_id.to_string(),
            name: job.name.clone(),
            state: job_state,
            steps: reports,
            error: job_error,
            started_at,
            finished_at: chrono::Utc::now(),
            duration_ms: start.elapsed().as_millis() as u64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::types::StepDefinition;
    use std::time::Duration;

    fn runner() -> JobRunner {
        JobRunner::new(Arc::new(ActionRegistry::new()), EngineConfig::default())
    }

    fn run_step(name: &str, command: &str) -> StepDefinition {
        StepDefinition {
            name: Some(name.to_string()),
            run: Some(command.to_string()),
            ..Default::default()
        }
    }

    async fn run(runner: &JobRunner, job: &JobDefinition) -> JobReport {
        runner
            .run_job(
                "build",
                job,
                RunState::new("run-1", "build"),
                &PermissionSet::new(),
                CancellationToken::new(),
            )
            .await
    }

    #[tokio::test]
    async fn test_steps_run_in_declaration_order() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("order.log");
        let steps = ["one", "two", "three"]
            .iter()
            .map(|tag| run_step(tag, &format!("echo {} >> {}", tag, log.display())))
            .collect();
        let job = JobDefinition {
            steps,
            ..Default::default()
        };

        let report = run(&runner(), &job).await;

        assert_eq!(report.state, JobState::Succeeded);
        assert_eq!(report.steps.len(), 3);
        let contents = std::fs::read_to_string(&log).unwrap();
        assert_eq!(contents, "one\ntwo\nthree\n");
    }

    #[tokio::test]
    async fn test_false_condition_skips_step_but_not_job() {
        let job = JobDefinition {
            steps: vec![
                run_step("probe", r#"echo "hit=yes" >> "$GANTRY_OUTPUT""#),
                StepDefinition {
                    name: Some("deploy".to_string()),
                    run: Some("echo deploying".to_string()),
                    r#if: Some("{{ steps.probe.outputs.hit == 'no' }}".to_string()),
                    ..Default::default()
                },
                StepDefinition {
                    name: Some("notify".to_string()),
                    run: Some("echo notified".to_string()),
                    r#if: Some("{{ steps.deploy.status == 'skipped' }}".to_string()),
                    ..Default::default()
                },
            ],
            ..Default::default()
        };

        let report = run(&runner(), &job).await;

        assert_eq!(report.state, JobState::Succeeded);
        let statuses: Vec<StepStatus> = report.steps.iter().map(|s| s.status).collect();
        assert_eq!(
            statuses,
            vec![StepStatus::Success, StepStatus::Skipped, StepStatus::Success]
        );
    }

    #[tokio::test]
    async fn test_failure_stops_remaining_steps() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("ran");
        let job = JobDefinition {
            steps: vec![
                run_step("break", "exit 1"),
                run_step("after", &format!("touch {}", marker.display())),
            ],
            ..Default::default()
        };

        let report = run(&runner(), &job).await;

        assert_eq!(report.state, JobState::Failed);
        assert_eq!(report.steps.len(), 1);
        assert!(report.error.unwrap().contains("'break' failed"));
        assert!(!marker.exists());
    }

    #[tokio::test]
    async fn test_continue_on_error_keeps_job_green() {
        let job = JobDefinition {
            steps: vec![
                StepDefinition {
                    name: Some("flaky".to_string()),
                    run: Some("exit 1".to_string()),
                    continue_on_error: true,
                    ..Default::default()
                },
                run_step("after", "echo still here"),
            ],
            ..Default::default()
        };

        let report = run(&runner(), &job).await;

        assert_eq!(report.state, JobState::Succeeded);
        assert_eq!(report.steps.len(), 2);
        assert_eq!(report.steps[0].status, StepStatus::Failure);
        assert_eq!(report.steps[1].status, StepStatus::Success);
    }

    #[tokio::test]
    async fn test_cancellation_mid_step() {
        let token = CancellationToken::new();
        let cancel = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            cancel.cancel();
        });

        let job = JobDefinition {
            steps: vec![run_step("nap", "sleep 30"), run_step("after", "echo no")],
            ..Default::default()
        };
        let report = runner()
            .run_job(
                "build",
                &job,
                RunState::new("run-1", "build"),
                &PermissionSet::new(),
                token,
            )
            .await;

        assert_eq!(report.state, JobState::Cancelled);
        assert_eq!(report.steps[0].reason, Some(FailureReason::Cancelled));
        assert_eq!(report.steps.len(), 1);
    }

    #[tokio::test]
    async fn test_precancelled_job_runs_nothing() {
        let token = CancellationToken::new();
        token.cancel();

        let job = JobDefinition {
            steps: vec![run_step("only", "echo nope")],
            ..Default::default()
        };
        let report = runner()
            .run_job(
                "build",
                &job,
                RunState::new("run-1", "build"),
                &PermissionSet::new(),
                token,
            )
            .await;

        assert_eq!(report.state, JobState::Cancelled);
        assert!(report.steps.is_empty());
    }

    #[tokio::test]
    async fn test_job_timeout_fails_job() {
        let job = JobDefinition {
            timeout: Some("1s".to_string()),
            steps: vec![run_step("nap", "sleep 10")],
            ..Default::default()
        };

        let report = run(&runner(), &job).await;

        assert_eq!(report.state, JobState::Failed);
        assert_eq!(report.steps[0].reason, Some(FailureReason::Timeout));
    }

    #[tokio::test]
    async fn test_invalid_timeout_fails_without_running_steps() {
        let job = JobDefinition {
            timeout: Some("5 parsecs".to_string()),
            steps: vec![run_step("only", "echo nope")],
            ..Default::default()
        };

        let report = run(&runner(), &job).await;

        assert_eq!(report.state, JobState::Failed);
        assert!(report.steps.is_empty());
        assert!(report.error.unwrap().contains("Invalid duration"));
    }

    #[tokio::test]
    async fn test_exports_feed_later_conditions() {
        let job = JobDefinition {
            steps: vec![
                run_step("export", r#"echo "CHANNEL=beta" >> "$GANTRY_ENV""#),
                StepDefinition {
                    name: Some("gated".to_string()),
                    run: Some(r#"echo "ran=yes" >> "$GANTRY_OUTPUT""#.to_string()),
                    r#if: Some("{{ env.CHANNEL == 'beta' }}".to_string()),
                    ..Default::default()
                },
            ],
            ..Default::default()
        };

        let report = run(&runner(), &job).await;

        assert_eq!(report.state, JobState::Succeeded);
        assert_eq!(report.steps[1].status, StepStatus::Success);
        assert_eq!(report.steps[1].outputs.get("ran").unwrap(), "yes");
    }
}
