//! Action registry and dispatch.
//!
//! Actions are registered and resolved by their pinned reference, so the
//! commit hash is part of the lookup key. Two pins of the same repository
//! resolve to two distinct entries.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

use crate::context::StepContext;
use crate::error::ActionError;
use crate::reference::ActionRef;
use crate::result::ActionResult;

/// Action trait for implementing executable step actions.
#[async_trait]
pub trait Action: Send + Sync {
    /// Returns the action's human-readable name for diagnostics.
    fn name(&self) -> &'static str;

    /// Execute the action with the given step context.
    async fn execute(&self, ctx: &StepContext) -> Result<ActionResult, ActionError>;
}

/// Registry of available actions, keyed by pinned reference.
pub struct ActionRegistry {
    actions: HashMap<String, Arc<dyn Action>>,
}

impl ActionRegistry {
    /// Create a new empty action registry.
    pub fn new() -> Self {
        Self {
            actions: HashMap::new(),
        }
    }

    /// Register an action under a pinned reference.
    pub fn register<A: Action + 'static>(&mut self, reference: &ActionRef, action: A) {
        self.actions.insert(reference.canonical(), Arc::new(action));
    }

    /// Register a shared action under a pinned reference.
    pub fn register_arc(&mut self, reference: &ActionRef, action: Arc<dyn Action>) {
        self.actions.insert(reference.canonical(), action);
    }

    /// Resolve an action by reference.
    pub fn get(&self, reference: &ActionRef) -> Option<Arc<dyn Action>> {
        self.actions.get(&reference.canonical()).cloned()
    }

    /// Check if a reference resolves.
    pub fn has(&self, reference: &ActionRef) -> bool {
        self.actions.contains_key(&reference.canonical())
    }

    /// List all registered references.
    pub fn list(&self) -> Vec<&str> {
        self.actions.keys().map(|s| s.as_str()).collect()
    }

    /// Execute an action by reference.
    pub async fn execute(
        &self,
        reference: &ActionRef,
        ctx: &StepContext,
    ) -> Result<ActionResult, ActionError> {
        let action = self
            .get(reference)
            .ok_or_else(|| ActionError::NotFound(reference.canonical()))?;
        action.execute(ctx).await
    }
}

impl Default for ActionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ActionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionRegistry")
            .field("actions", &self.actions.keys().collect::<Vec<_>>())
            .finish()
    }
}
