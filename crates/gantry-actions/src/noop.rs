//! Built-in no-op action.

use async_trait::async_trait;

use crate::context::StepContext;
use crate::error::ActionError;
use crate::registry::Action;
use crate::result::ActionResult;

/// Action that succeeds without doing anything.
///
/// Used to stub out `uses:` references when running a workflow without
/// the external action hub, and as a placeholder in tests.
pub struct NoopAction;

impl NoopAction {
    /// Create a new no-op action.
    pub fn new() -> Self {
        Self
    }
}

impl Default for NoopAction {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Action for NoopAction {
    fn name(&self) -> &'static str {
        "noop"
    }

    async fn execute(&self, ctx: &StepContext) -> Result<ActionResult, ActionError> {
        tracing::debug!(
            step = %ctx.step,
            inputs = ctx.inputs.len(),
            "No-op action invoked"
        );
        Ok(ActionResult::success())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_noop_succeeds() {
        let action = NoopAction::new();
        assert_eq!(action.name(), "noop");

        let ctx = StepContext::new("run-1", "job", "step")
            .with_input("anything", serde_json::json!("ignored"));
        let result = action.execute(&ctx).await.unwrap();
        assert!(result.is_success());
        assert!(result.outputs.is_empty());
    }
}
