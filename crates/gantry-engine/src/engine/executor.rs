//! Step execution.
//!
//! The executor binds a step's inputs against run state, dispatches inline
//! `run:` commands or registered `uses:` actions, enforces the per-step
//! timeout (clamped to the remaining job budget), redacts secrets from
//! everything it stores, and records outputs and env exports.
//!
//! Every action-level problem is absorbed into a failed [`StepReport`];
//! the executor never surfaces a Rust error to the runner.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use gantry_actions::{
    ActionError, ActionRef, ActionRegistry, ActionResult, ActionStatus, CommandAction,
    PermissionSet, Redactor, StepContext, TemplateEngine,
};

use crate::config::{self, EngineConfig};
use crate::engine::state::{FailureReason, RunState};
use crate::error::{EngineError, EngineResult};
use crate::report::StepReport;
use crate::workflow::types::StepDefinition;

/// Executes single steps against a run state.
pub struct StepExecutor {
    templates: TemplateEngine,
    registry: Arc<ActionRegistry>,
    command: CommandAction,
    config: EngineConfig,
}

impl StepExecutor {
    /// Create a new step executor.
    pub fn new(registry: Arc<ActionRegistry>, config: EngineConfig) -> Self {
        Self {
            templates: TemplateEngine::new(),
            registry,
            command: CommandAction::new(),
            config,
        }
    }

    /// Execute one step.
    ///
    /// Writes the step's record into the run state and returns its report.
    /// Non-zero exit, action errors, and crashes of the invoked action are
    /// indistinguishable here: all surface as `status=failure`.
    pub async fn execute(
        &self,
        step: &StepDefinition,
        index: usize,
        state: &mut RunState,
        permissions: &PermissionSet,
        deadline: Option<tokio::time::Instant>,
        cancellation: &CancellationToken,
    ) -> StepReport {
        let name = step.display_name(index);
        let start = std::time::Instant::now();
        let redactor = Redactor::new(state.secret_values());

        tracing::debug!(job = %state.job, step = %name, "Executing step");

        let mut report = match self
            .dispatch(step, &name, state, permissions, deadline, cancellation)
            .await
        {
            Ok(result) => self.absorb(&name, result, state, &redactor),
            Err(e) => {
                tracing::warn!(step = %name, error = %e, "Step failed before the action ran");
                StepReport::failure(
                    &name,
                    FailureReason::Exit,
                    Some(redactor.redact_str(&e.to_string())),
                )
            }
        };

        report.duration_ms = start.elapsed().as_millis() as u64;
        state.record_step(&name, report.status, report.outputs.clone());
        report
    }

    /// Resolve bindings and run the underlying command or action.
    async fn dispatch(
        &self,
        step: &StepDefinition,
        name: &str,
        state: &RunState,
        permissions: &PermissionSet,
        deadline: Option<tokio::time::Instant>,
        cancellation: &CancellationToken,
    ) -> EngineResult<ActionResult> {
        // Binding context is the run state plus secrets. Secrets are only
        // visible to input binding, never to conditions.
        let mut context = state.to_template_context();
        context.insert("secrets".to_string(), serde_json::json!(state.secrets));

        // Effective env: accumulated exports, shadowed by the step's own
        // `env:` block for this step only.
        let mut env = state.env.clone();
        for (key, value) in &step.env {
            env.insert(key.clone(), self.templates.render(value, &context)?);
        }

        let budget = self.step_budget(step, deadline)?;
        if budget.is_zero() {
            let mut result = ActionResult::timeout(0);
            result.error =
                Some("Job timeout budget exhausted before the step started".to_string());
            return Ok(result);
        }

        if let Some(command) = &step.run {
            let rendered = self.templates.render(command, &context)?;
            let result = self
                .command
                .execute_command(
                    &rendered,
                    "bash",
                    None,
                    &env,
                    Some(budget),
                    cancellation,
                    self.config.cancel_grace,
                )
                .await?;
            return Ok(result);
        }

        if let Some(uses) = &step.uses {
            let reference = ActionRef::parse(uses)?;

            let mut ctx = StepContext::new(state.run_id.as_str(), state.job.as_str(), name);
            for (key, value) in &step.with {
                ctx.inputs
                    .insert(key.clone(), self.templates.render_value(value, &context)?);
            }
            ctx.env = env;
            ctx.secrets = state.secrets.clone();
            ctx.permissions = permissions.clone();
            ctx.cancellation = cancellation.clone();

            // The action runs on its own task so a panicking action fails
            // the step instead of the job. Cancellation stays cooperative
            // through the context token; the timeout bounds actions that
            // ignore it.
            let registry = self.registry.clone();
            let mut handle = tokio::spawn(async move { registry.execute(&reference, &ctx).await });
            return match tokio::time::timeout(budget, &mut handle).await {
                Ok(Ok(Ok(result))) => Ok(result),
                Ok(Ok(Err(ActionError::Timeout(seconds)))) => Ok(ActionResult::timeout(seconds)),
                Ok(Ok(Err(ActionError::Cancelled))) => Ok(ActionResult::cancelled()),
                Ok(Ok(Err(e))) => Ok(ActionResult::error(e.to_string())),
                Ok(Err(e)) => Ok(ActionResult::error(format!("Action crashed: {}", e))),
                Err(_) => {
                    handle.abort();
                    Ok(ActionResult::timeout(budget.as_secs()))
                }
            };
        }

        // The parser rejects steps with neither; reaching this is a bug.
        Err(EngineError::Internal(format!(
            "Step '{}' has neither 'uses' nor 'run'",
            name
        )))
    }

    /// Turn an action result into a step report, applying outputs and env
    /// exports to the run state.
    fn absorb(
        &self,
        name: &str,
        result: ActionResult,
        state: &mut RunState,
        redactor: &Redactor,
    ) -> StepReport {
        match result.status {
            ActionStatus::Success => {
                let outputs: BTreeMap<String, String> = result
                    .outputs
                    .iter()
                    .map(|(k, v)| (k.clone(), redactor.redact_str(v)))
                    .collect();

                // Env exports are applied raw so later steps see the real
                // values; a conflicting re-export fails this step.
                for (key, value) in &result.env {
                    if let Err(e) = state.export_env(key, value) {
                        return StepReport::failure(name, FailureReason::Exit, Some(e.to_string()))
                            .with_outputs(outputs);
                    }
                }

                StepReport::success(name, outputs)
            }
            ActionStatus::Timeout => StepReport::failure(
                name,
                FailureReason::Timeout,
                redactor.redact_opt(result.error),
            ),
            ActionStatus::Cancelled => StepReport::failure(
                name,
                FailureReason::Cancelled,
                redactor.redact_opt(result.error),
            ),
            ActionStatus::Error => {
                let message = result
                    .error
                    .clone()
                    .unwrap_or_else(|| "Action reported failure".to_string());
                let message = match &result.stderr {
                    Some(stderr) if !stderr.trim().is_empty() => {
                        format!("{}: {}", message, last_line(stderr))
                    }
                    _ => message,
                };
                StepReport::failure(name, FailureReason::Exit, Some(redactor.redact_str(&message)))
            }
        }
    }

    /// Effective timeout for a step: its own override, else the engine
    /// default, clamped to the remaining job budget.
    fn step_budget(
        &self,
        step: &StepDefinition,
        deadline: Option<tokio::time::Instant>,
    ) -> EngineResult<Duration> {
        let base = match &step.timeout {
            Some(timeout) => config::parse_duration(timeout)?,
            None => self.config.step_timeout,
        };
        Ok(match deadline {
            Some(deadline) => {
                base.min(deadline.saturating_duration_since(tokio::time::Instant::now()))
            }
            None => base,
        })
    }
}

/// Last non-empty line of captured output, for compact diagnostics.
fn last_line(text: &str) -> &str {
    text.trim_end().rsplit('\n').next().unwrap_or("").trim()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::state::StepStatus;
    use gantry_actions::Action;
    use std::collections::HashMap;
    use std::sync::Mutex;

    const SHA_A: &str = "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";

    struct EchoAction {
        outputs: BTreeMap<String, String>,
    }

    #[async_trait::async_trait]
    impl Action for EchoAction {
        fn name(&self) -> &'static str {
            "echo"
        }

        async fn execute(&self, _ctx: &StepContext) -> Result<ActionResult, ActionError> {
            let mut result = ActionResult::success();
            result.outputs = self.outputs.clone();
            Ok(result)
        }
    }

    struct PanicAction;

    #[async_trait::async_trait]
    impl Action for PanicAction {
        fn name(&self) -> &'static str {
            "panic"
        }

        async fn execute(&self, _ctx: &StepContext) -> Result<ActionResult, ActionError> {
            panic!("action blew up")
        }
    }

    struct CaptureAction {
        seen: Arc<Mutex<Option<StepContext>>>,
    }

    #[async_trait::async_trait]
    impl Action for CaptureAction {
        fn name(&self) -> &'static str {
            "capture"
        }

        async fn execute(&self, ctx: &StepContext) -> Result<ActionResult, ActionError> {
            *self.seen.lock().unwrap() = Some(ctx.clone());
            Ok(ActionResult::success())
        }
    }

    fn executor() -> StepExecutor {
        StepExecutor::new(Arc::new(ActionRegistry::new()), EngineConfig::default())
    }

    fn executor_with(registry: ActionRegistry) -> StepExecutor {
        StepExecutor::new(Arc::new(registry), EngineConfig::default())
    }

    fn run_step(command: &str) -> StepDefinition {
        StepDefinition {
            name: Some("test".to_string()),
            run: Some(command.to_string()),
            ..Default::default()
        }
    }

    async fn exec(
        executor: &StepExecutor,
        step: &StepDefinition,
        state: &mut RunState,
    ) -> StepReport {
        let token = CancellationToken::new();
        executor
            .execute(step, 0, state, &PermissionSet::new(), None, &token)
            .await
    }

    #[tokio::test]
    async fn test_run_step_captures_outputs() {
        let executor = executor();
        let mut state = RunState::new("run-1", "build");
        let step = run_step(r#"echo "version=1.2.3" >> "$GANTRY_OUTPUT""#);

        let report = exec(&executor, &step, &mut state).await;

        assert_eq!(report.status, StepStatus::Success);
        assert_eq!(report.outputs.get("version").unwrap(), "1.2.3");
        assert_eq!(
            state.step_outputs("test").unwrap().get("version").unwrap(),
            "1.2.3"
        );
    }

    #[tokio::test]
    async fn test_env_export_visible_to_later_steps() {
        let executor = executor();
        let mut state = RunState::new("run-1", "build");

        let export = StepDefinition {
            name: Some("export".to_string()),
            run: Some(r#"echo "TOOL_HOME=/opt/tool" >> "$GANTRY_ENV""#.to_string()),
            ..Default::default()
        };
        let report = exec(&executor, &export, &mut state).await;
        assert_eq!(report.status, StepStatus::Success);
        assert_eq!(state.env.get("TOOL_HOME").unwrap(), "/opt/tool");

        let consume = StepDefinition {
            name: Some("consume".to_string()),
            run: Some(r#"echo "got=$TOOL_HOME" >> "$GANTRY_OUTPUT""#.to_string()),
            ..Default::default()
        };
        let report = exec(&executor, &consume, &mut state).await;
        assert_eq!(report.outputs.get("got").unwrap(), "/opt/tool");
    }

    #[tokio::test]
    async fn test_conflicting_export_fails_step() {
        let executor = executor();
        let mut state = RunState::new("run-1", "build");
        state.export_env("TOOL_HOME", "/opt/a").unwrap();

        let step = run_step(r#"echo "TOOL_HOME=/opt/b" >> "$GANTRY_ENV""#);
        let report = exec(&executor, &step, &mut state).await;

        assert_eq!(report.status, StepStatus::Failure);
        assert!(report.error.unwrap().contains("already exported"));
        // The earlier value stands.
        assert_eq!(state.env.get("TOOL_HOME").unwrap(), "/opt/a");
    }

    #[tokio::test]
    async fn test_reexport_same_value_is_noop() {
        let executor = executor();
        let mut state = RunState::new("run-1", "build");
        state.export_env("TOOL_HOME", "/opt/a").unwrap();

        let step = run_step(r#"echo "TOOL_HOME=/opt/a" >> "$GANTRY_ENV""#);
        let report = exec(&executor, &step, &mut state).await;

        assert_eq!(report.status, StepStatus::Success);
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_failure() {
        let executor = executor();
        let mut state = RunState::new("run-1", "build");
        let step = run_step("exit 3");

        let report = exec(&executor, &step, &mut state).await;

        assert_eq!(report.status, StepStatus::Failure);
        assert_eq!(report.reason, Some(FailureReason::Exit));
        assert!(report.error.unwrap().contains("code 3"));
        assert_eq!(state.step_status("test"), Some(StepStatus::Failure));
    }

    #[tokio::test]
    async fn test_step_timeout() {
        let executor = executor();
        let mut state = RunState::new("run-1", "build");
        let step = StepDefinition {
            name: Some("nap".to_string()),
            run: Some("sleep 5".to_string()),
            timeout: Some("1s".to_string()),
            ..Default::default()
        };

        let report = exec(&executor, &step, &mut state).await;

        assert_eq!(report.status, StepStatus::Failure);
        assert_eq!(report.reason, Some(FailureReason::Timeout));
    }

    #[tokio::test]
    async fn test_exhausted_job_budget_times_out_immediately() {
        let executor = executor();
        let mut state = RunState::new("run-1", "build");
        let step = run_step("echo never runs");

        let token = CancellationToken::new();
        let deadline = tokio::time::Instant::now();
        let report = executor
            .execute(&step, 0, &mut state, &PermissionSet::new(), Some(deadline), &token)
            .await;

        assert_eq!(report.status, StepStatus::Failure);
        assert_eq!(report.reason, Some(FailureReason::Timeout));
        assert!(report.error.unwrap().contains("budget exhausted"));
    }

    #[tokio::test]
    async fn test_uses_step_dispatches_registered_action() {
        let reference = ActionRef::parse(&format!("octo/setup@{}", SHA_A)).unwrap();
        let mut registry = ActionRegistry::new();
        let mut outputs = BTreeMap::new();
        outputs.insert("tool-path".to_string(), "/opt/tool/bin".to_string());
        registry.register(&reference, EchoAction { outputs });

        let executor = executor_with(registry);
        let mut state = RunState::new("run-1", "build");
        let step = StepDefinition {
            name: Some("setup".to_string()),
            uses: Some(format!("octo/setup@{}", SHA_A)),
            ..Default::default()
        };

        let report = exec(&executor, &step, &mut state).await;

        assert_eq!(report.status, StepStatus::Success);
        assert_eq!(report.outputs.get("tool-path").unwrap(), "/opt/tool/bin");
    }

    #[tokio::test]
    async fn test_panicking_action_fails_only_the_step() {
        let reference = ActionRef::parse(&format!("octo/boom@{}", SHA_A)).unwrap();
        let mut registry = ActionRegistry::new();
        registry.register(&reference, PanicAction);

        let executor = executor_with(registry);
        let mut state = RunState::new("run-1", "build");
        let step = StepDefinition {
            name: Some("boom".to_string()),
            uses: Some(format!("octo/boom@{}", SHA_A)),
            ..Default::default()
        };

        let report = exec(&executor, &step, &mut state).await;

        assert_eq!(report.status, StepStatus::Failure);
        assert_eq!(report.reason, Some(FailureReason::Exit));
        assert!(report.error.unwrap().contains("crashed"));
        assert_eq!(state.step_status("boom"), Some(StepStatus::Failure));
    }

    #[tokio::test]
    async fn test_unregistered_action_fails_step() {
        let executor = executor();
        let mut state = RunState::new("run-1", "build");
        let step = StepDefinition {
            name: Some("setup".to_string()),
            uses: Some(format!("octo/missing@{}", SHA_A)),
            ..Default::default()
        };

        let report = exec(&executor, &step, &mut state).await;

        assert_eq!(report.status, StepStatus::Failure);
        assert!(report.error.unwrap().contains("not resolved"));
    }

    #[tokio::test]
    async fn test_inputs_bound_from_prior_outputs() {
        let reference = ActionRef::parse(&format!("octo/analyze@{}", SHA_A)).unwrap();
        let seen = Arc::new(Mutex::new(None));
        let mut registry = ActionRegistry::new();
        registry.register(&reference, CaptureAction { seen: seen.clone() });

        let executor = executor_with(registry);
        let mut state = RunState::new("run-1", "build");
        let mut prior = BTreeMap::new();
        prior.insert("language".to_string(), "java".to_string());
        state.record_step("scan", StepStatus::Success, prior);

        let mut with = BTreeMap::new();
        with.insert(
            "language".to_string(),
            serde_json::json!("{{ steps.scan.outputs.language }}"),
        );
        let step = StepDefinition {
            name: Some("analyze".to_string()),
            uses: Some(format!("octo/analyze@{}", SHA_A)),
            with,
            ..Default::default()
        };

        let report = exec(&executor, &step, &mut state).await;
        assert_eq!(report.status, StepStatus::Success);

        let ctx = seen.lock().unwrap().clone().unwrap();
        assert_eq!(ctx.inputs.get("language"), Some(&serde_json::json!("java")));
    }

    #[tokio::test]
    async fn test_secrets_and_permissions_reach_the_action() {
        let reference = ActionRef::parse(&format!("octo/upload@{}", SHA_A)).unwrap();
        let seen = Arc::new(Mutex::new(None));
        let mut registry = ActionRegistry::new();
        registry.register(&reference, CaptureAction { seen: seen.clone() });

        let executor = executor_with(registry);
        let mut secrets = HashMap::new();
        secrets.insert("TOKEN".to_string(), "tok-123456".to_string());
        let mut state = RunState::new("run-1", "build").with_secrets(secrets);

        let mut with = BTreeMap::new();
        with.insert("token".to_string(), serde_json::json!("{{ secrets.TOKEN }}"));
        let step = StepDefinition {
            name: Some("upload".to_string()),
            uses: Some(format!("octo/upload@{}", SHA_A)),
            with,
            ..Default::default()
        };

        let permissions =
            PermissionSet::new().grant("security-events", gantry_actions::Access::Write);
        let token = CancellationToken::new();
        let report = executor
            .execute(&step, 0, &mut state, &permissions, None, &token)
            .await;
        assert_eq!(report.status, StepStatus::Success);

        let ctx = seen.lock().unwrap().clone().unwrap();
        // Inputs carry the real secret; only stored artifacts are redacted.
        assert_eq!(ctx.inputs.get("token"), Some(&serde_json::json!("tok-123456")));
        assert!(ctx.permissions.can_write("security-events"));
        assert!(!ctx.permissions.can_write("contents"));
    }

    #[tokio::test]
    async fn test_outputs_and_diagnostics_are_redacted() {
        let executor = executor();
        let mut secrets = HashMap::new();
        secrets.insert("TOKEN".to_string(), "hunter2-token".to_string());
        let mut state = RunState::new("run-1", "build").with_secrets(secrets);

        let leak = run_step(r#"echo "leak=hunter2-token" >> "$GANTRY_OUTPUT""#);
        let report = exec(&executor, &leak, &mut state).await;
        assert_eq!(report.outputs.get("leak").unwrap(), "***");
        assert_eq!(state.step_outputs("test").unwrap().get("leak").unwrap(), "***");

        let fail = StepDefinition {
            name: Some("fail".to_string()),
            run: Some("echo oops hunter2-token >&2; exit 1".to_string()),
            ..Default::default()
        };
        let report = exec(&executor, &fail, &mut state).await;
        let error = report.error.unwrap();
        assert!(error.contains("***"));
        assert!(!error.contains("hunter2-token"));
    }

    #[tokio::test]
    async fn test_step_env_shadows_without_mutating_state() {
        let executor = executor();
        let mut state = RunState::new("run-1", "build");

        let mut env = BTreeMap::new();
        env.insert("MODE".to_string(), "fast".to_string());
        let step = StepDefinition {
            name: Some("probe".to_string()),
            run: Some(r#"echo "mode=$MODE" >> "$GANTRY_OUTPUT""#.to_string()),
            env,
            ..Default::default()
        };

        let report = exec(&executor, &step, &mut state).await;
        assert_eq!(report.outputs.get("mode").unwrap(), "fast");
        assert!(!state.env.contains_key("MODE"));
    }

    #[tokio::test]
    async fn test_template_error_fails_step() {
        let executor = executor();
        let mut state = RunState::new("run-1", "build");
        let step = run_step("echo {{ steps.scan.outputs | badfilter }}");

        let report = exec(&executor, &step, &mut state).await;

        assert_eq!(report.status, StepStatus::Failure);
        assert_eq!(report.reason, Some(FailureReason::Exit));
    }

    #[test]
    fn test_last_line() {
        assert_eq!(last_line("one\ntwo\nthree\n"), "three");
        assert_eq!(last_line("single"), "single");
        assert_eq!(last_line(""), "");
    }
}
