//! Workflow admission and job dispatch.
//!
//! The scheduler admits an event against a workflow's triggers, then
//! dispatches jobs in dependency waves: every job whose `needs` have all
//! settled runs concurrently, bounded by the configured parallelism. A job
//! whose dependencies did not all succeed is skipped without dispatching.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use gantry_actions::ActionRegistry;

use crate::config::EngineConfig;
use crate::engine::runner::JobRunner;
use crate::engine::state::{JobState, RunState};
use crate::error::{EngineError, EngineResult};
use crate::event::Event;
use crate::report::{JobReport, LogReporter, Reporter, WorkflowReport, WorkflowStatus};
use crate::trigger::TriggerEvaluator;
use crate::workflow::parser;
use crate::workflow::types::{JobDefinition, WorkflowDefinition};

/// A logical execution environment jobs can be assigned to.
#[derive(Debug, Clone)]
pub struct RunnerEnvironment {
    /// Environment name, for logs and reports.
    pub name: String,

    /// Labels this environment offers, e.g. `linux`, `x64`.
    pub labels: BTreeSet<String>,

    universal: bool,
}

impl RunnerEnvironment {
    /// Create an environment offering the given labels.
    pub fn new<I, S>(name: impl Into<String>, labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            labels: labels.into_iter().map(Into::into).collect(),
            universal: false,
        }
    }

    /// Create an environment that accepts any label set.
    pub fn universal(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            labels: BTreeSet::new(),
            universal: true,
        }
    }

    /// Returns true if every requested label is offered.
    pub fn covers(&self, runs_on: &[String]) -> bool {
        self.universal || runs_on.iter().all(|label| self.labels.contains(label))
    }
}

/// The set of execution environments available to a scheduler.
#[derive(Debug, Clone, Default)]
pub struct RunnerPool {
    environments: Vec<RunnerEnvironment>,
}

impl RunnerPool {
    /// Create an empty pool.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an environment, builder style.
    pub fn with_environment(mut self, environment: RunnerEnvironment) -> Self {
        self.environments.push(environment);
        self
    }

    /// Add an environment.
    pub fn add(&mut self, environment: RunnerEnvironment) {
        self.environments.push(environment);
    }

    /// First environment covering all requested labels.
    pub fn find(&self, runs_on: &[String]) -> Option<&RunnerEnvironment> {
        self.environments.iter().find(|env| env.covers(runs_on))
    }
}

/// Admits events and runs workflows.
pub struct WorkflowScheduler {
    trigger: TriggerEvaluator,
    pool: RunnerPool,
    registry: Arc<ActionRegistry>,
    config: EngineConfig,
    reporter: Arc<dyn Reporter>,
}

impl WorkflowScheduler {
    /// Create a scheduler over the given action registry and runner pool.
    pub fn new(registry: Arc<ActionRegistry>, pool: RunnerPool, config: EngineConfig) -> Self {
        Self {
            trigger: TriggerEvaluator::new(),
            pool,
            registry,
            config,
            reporter: Arc::new(LogReporter),
        }
    }

    /// Replace the reporter.
    pub fn with_reporter(mut self, reporter: Arc<dyn Reporter>) -> Self {
        self.reporter = reporter;
        self
    }

    /// Decide whether an event admits a workflow.
    ///
    /// Returns the jobs to run in execution order, or an empty list when
    /// the event does not match the triggers. Admission never mutates
    /// anything, so callers may probe it freely.
    pub fn admit(&self, event: &Event, workflow: &WorkflowDefinition) -> Vec<String> {
        if !self.trigger.matches(event, &workflow.on) {
            return Vec::new();
        }
        match parser::job_execution_order(workflow) {
            Ok(order) => order,
            Err(e) => {
                tracing::error!(workflow = %workflow.name, error = %e, "Workflow rejected at admission");
                Vec::new()
            }
        }
    }

    /// Run a workflow for an event.
    ///
    /// A non-matching event yields a report with `admitted: false` and no
    /// jobs. Otherwise jobs are dispatched in dependency waves; dependents
    /// of anything but a succeeded job are skipped.
    pub async fn run_workflow(
        &self,
        event: &Event,
        workflow: &WorkflowDefinition,
        secrets: HashMap<String, String>,
        cancellation: CancellationToken,
    ) -> EngineResult<WorkflowReport> {
        let run_id = uuid::Uuid::new_v4().to_string();
        let started_at = chrono::Utc::now();
        let start = std::time::Instant::now();

        let order = self.admit(event, workflow);
        if order.is_empty() {
            tracing::info!(
                workflow = %workflow.name,
                event = %event.kind,
                "Event did not admit the workflow"
            );
            return Ok(WorkflowReport {
                run_id,
                workflow: workflow.name.clone(),
                admitted: false,
                status: WorkflowStatus::Succeeded,
                jobs: Vec::new(),
                started_at,
                finished_at: chrono::Utc::now(),
                duration_ms: 0,
            });
        }

        tracing::info!(
            workflow = %workflow.name,
            run_id = %run_id,
            jobs = order.len(),
            "Workflow admitted"
        );
        self.reporter.workflow_started(&workflow.name, &run_id);

        let semaphore = Arc::new(Semaphore::new(self.config.max_parallel_jobs));
        let mut terminal: HashMap<String, JobState> = HashMap::new();
        let mut reports: Vec<JobReport> = Vec::new();
        let mut remaining: VecDeque<String> = order.into();

        while !remaining.is_empty() {
            // Jobs whose dependencies have all settled form the next wave.
            let mut wave: Vec<(String, JobDefinition)> = Vec::new();
            let mut deferred = VecDeque::new();
            while let Some(job_id) = remaining.pop_front() {
                let job = workflow.job(&job_id).ok_or_else(|| {
                    EngineError::Internal(format!("Job '{}' missing from workflow", job_id))
                })?;
                if job.needs.iter().all(|need| terminal.contains_key(need)) {
                    wave.push((job_id, job.clone()));
                } else {
                    deferred.push_back(job_id);
                }
            }
            remaining = deferred;

            if wave.is_empty() {
                // Execution order is cycle-free, so a stall is a bug.
                return Err(EngineError::Internal(
                    "Job scheduling stalled with jobs remaining".to_string(),
                ));
            }

            let mut tasks = JoinSet::new();
            let mut dispatched: Vec<String> = Vec::new();

            for (job_id, job) in wave {
                if let Some(blocker) = job
                    .needs
                    .iter()
                    .find(|need| terminal.get(*need) != Some(&JobState::Succeeded))
                {
                    let reason = format!("Dependency '{}' did not succeed", blocker);
                    tracing::warn!(job = %job_id, reason = %reason, "Job skipped");
                    let report = JobReport::skipped(&job_id, job.name.clone(), reason);
                    terminal.insert(job_id, JobState::Skipped);
                    self.reporter.job_finished(&report);
                    reports.push(report);
                    continue;
                }

                let environment = match self.pool.find(&job.runs_on) {
                    Some(environment) => environment,
                    None => {
                        let error =
                            format!("No runner environment satisfies labels {:?}", job.runs_on);
                        tracing::error!(job = %job_id, "{}", error);
                        let report = JobReport::failed(&job_id, job.name.clone(), error);
                        terminal.insert(job_id, JobState::Failed);
                        self.reporter.job_finished(&report);
                        reports.push(report);
                        continue;
                    }
                };
                tracing::debug!(job = %job_id, runner = %environment.name, "Job assigned");

                let state = RunState::new(run_id.as_str(), job_id.as_str())
                    .with_event(event.clone())
                    .with_changed_files(event.changed_files.clone())
                    .with_secrets(secrets.clone());
                let permissions = workflow.effective_permissions(&job);
                let runner = JobRunner::new(self.registry.clone(), self.config.clone());
                let token = cancellation.child_token();
                let semaphore = semaphore.clone();

                dispatched.push(job_id.clone());
                tasks.spawn(async move {
                    let _permit = semaphore.acquire_owned().await.ok();
                    runner.run_job(&job_id, &job, state, &permissions, token).await
                });
            }

            while let Some(joined) = tasks.join_next().await {
                match joined {
                    Ok(report) => {
                        terminal.insert(report.job.clone(), report.state);
                        self.reporter.job_finished(&report);
                        reports.push(report);
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "Job task panicked");
                    }
                }
            }

            // A panicked task left no report; fail its job so dependents skip.
            for job_id in dispatched {
                if !terminal.contains_key(&job_id) {
                    let report = JobReport::failed(&job_id, None, "Job task panicked");
                    terminal.insert(job_id, JobState::Failed);
                    self.reporter.job_finished(&report);
                    reports.push(report);
                }
            }
        }

        let status = WorkflowStatus::from_jobs(&reports);
        let report = WorkflowReport {
            run_id,
            workflow: workflow.name.clone(),
            admitted: true,
            status,
            jobs: reports,
            started_at,
            finished_at: chrono::Utc::now(),
            duration_ms: start.elapsed().as_millis() as u64,
        };

        match report.status {
            WorkflowStatus::Succeeded => {
                tracing::info!(workflow = %workflow.name, run_id = %report.run_id, "Workflow succeeded")
            }
            WorkflowStatus::Cancelled => {
                tracing::warn!(workflow = %workflow.name, run_id = %report.run_id, "Workflow cancelled")
            }
            WorkflowStatus::Failed => {
                tracing::error!(workflow = %workflow.name, run_id = %report.run_id, "Workflow failed")
            }
        }
        self.reporter.workflow_finished(&report);
        Ok(report)
    }
}
