//! Step condition evaluation.
//!
//! Conditions are minijinja expressions over the run state context:
//! `env.*`, `steps.<name>.status` / `steps.<name>.outputs.*`, `event.kind`
//! and `event.branch`, `changed_files`, and the `changed("<glob>")`
//! function.

use gantry_actions::TemplateEngine;

use crate::engine::state::RunState;

/// Evaluates step conditions against run state.
///
/// Malformed or erroring predicates fail closed: the evaluator logs a
/// warning and returns `false`, so the step is skipped and the run
/// continues.
pub struct ConditionEvaluator {
    templates: TemplateEngine,
}

impl Default for ConditionEvaluator {
    fn default() -> Self {
        Self::new()
    }
}

impl ConditionEvaluator {
    /// Create a new condition evaluator.
    pub fn new() -> Self {
        Self {
            templates: TemplateEngine::new(),
        }
    }

    /// Evaluate a condition expression to a boolean. Pure with respect to
    /// the run state.
    pub fn evaluate(&self, condition: &str, state: &RunState) -> bool {
        let context = state.to_template_context();
        match self.templates.evaluate_condition(condition, &context) {
            Ok(result) => result,
            Err(e) => {
                tracing::warn!(
                    condition = condition,
                    error = %e,
                    "Condition evaluation failed, treating as false"
                );
                false
            }
        }
    }
}
