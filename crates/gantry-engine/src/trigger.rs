//! Trigger evaluation.
//!
//! Decides whether an incoming event matches a workflow's `on` block. Pure
//! predicate: no state, no side effects, same answer for the same inputs.

use globset::GlobBuilder;

use crate::event::{Event, EventKind};
use crate::workflow::types::{BranchFilter, Triggers};

/// Evaluates events against workflow trigger declarations.
#[derive(Debug, Clone, Copy, Default)]
pub struct TriggerEvaluator;

impl TriggerEvaluator {
    /// Create a new trigger evaluator.
    pub fn new() -> Self {
        Self
    }

    /// Whether the event matches the declared triggers.
    ///
    /// Push and pull_request events require the corresponding trigger block
    /// and a branch allowed by its filter. Schedule events match when the
    /// event's cron expression equals one of the declared expressions; the
    /// time arithmetic belongs to the external cron daemon. Manual dispatch
    /// matches iff `workflow_dispatch` is declared.
    pub fn matches(&self, event: &Event, triggers: &Triggers) -> bool {
        match event.kind {
            EventKind::Push => match &triggers.push {
                Some(filter) => branch_matches(filter, event.branch.as_deref()),
                None => false,
            },
            EventKind::PullRequest => match &triggers.pull_request {
                Some(filter) => branch_matches(filter, event.branch.as_deref()),
                None => false,
            },
            EventKind::Schedule => match &event.cron {
                Some(cron) => triggers
                    .schedule
                    .iter()
                    .any(|spec| spec.cron.trim() == cron.trim()),
                None => false,
            },
            EventKind::Manual => triggers.workflow_dispatch,
        }
    }
}

/// Match a branch against a filter. An empty pattern list matches every
/// branch; a non-empty list requires a branch and a matching glob.
fn branch_matches(filter: &BranchFilter, branch: Option<&str>) -> bool {
    if filter.branches.is_empty() {
        return true;
    }

    let branch = match branch {
        Some(b) => b,
        None => return false,
    };

    for pattern in &filter.branches {
        // `*` stays within one segment so "release/*" does not swallow
        // "release/a/b"; validated at load, so a build failure here only
        // skips the pattern.
        let glob = GlobBuilder::new(pattern).literal_separator(true).build();
        match glob {
            Ok(glob) => {
                if glob.compile_matcher().is_match(branch) {
                    return true;
                }
            }
            Err(e) => {
                tracing::warn!(pattern = pattern, error = %e, "Skipping invalid branch pattern");
            }
        }
    }

    false
}
