//! Execution context for action invocations.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use tokio_util::sync::CancellationToken;

/// Access level for a single permission scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Access {
    /// Read-only access.
    Read,
    /// Read and write access.
    Write,
    /// No access.
    #[default]
    None,
}

impl Access {
    /// Returns true if reads are allowed.
    pub fn allows_read(&self) -> bool {
        matches!(self, Access::Read | Access::Write)
    }

    /// Returns true if writes are allowed.
    pub fn allows_write(&self) -> bool {
        matches!(self, Access::Write)
    }
}

/// A set of scoped permission grants, e.g. `contents: read`.
///
/// Scopes absent from the set grant no access.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct PermissionSet(pub BTreeMap<String, Access>);

impl PermissionSet {
    /// Create an empty set (no access to anything).
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    /// Access level for a scope.
    pub fn get(&self, scope: &str) -> Access {
        self.0.get(scope).copied().unwrap_or(Access::None)
    }

    /// Returns true if the scope allows reads.
    pub fn can_read(&self, scope: &str) -> bool {
        self.get(scope).allows_read()
    }

    /// Returns true if the scope allows writes.
    pub fn can_write(&self, scope: &str) -> bool {
        self.get(scope).allows_write()
    }

    /// Grant an access level for a scope.
    pub fn grant(mut self, scope: impl Into<String>, access: Access) -> Self {
        self.0.insert(scope.into(), access);
        self
    }
}

/// Context passed to an action during execution.
///
/// Contains everything an action is allowed to see:
/// - Run metadata (run id, job, step)
/// - Resolved inputs from the step's `with:` block
/// - The effective environment for the step
/// - Secrets (injected, never serialized)
/// - A read-only view of the job's permission grant
/// - The cancellation token for cooperative shutdown
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct StepContext {
    /// Unique run ID.
    pub run_id: String,

    /// Job the step belongs to.
    pub job: String,

    /// Current step name.
    pub step: String,

    /// Resolved step inputs.
    #[serde(default)]
    pub inputs: BTreeMap<String, serde_json::Value>,

    /// Effective environment variables for this step.
    #[serde(default)]
    pub env: BTreeMap<String, String>,

    /// Secrets available to the step.
    #[serde(default, skip_serializing)]
    pub secrets: HashMap<String, String>,

    /// Effective permission grant of the enclosing job.
    #[serde(default)]
    pub permissions: PermissionSet,

    /// Cancellation token for the enclosing job.
    #[serde(skip)]
    pub cancellation: CancellationToken,
}

impl StepContext {
    /// Create a new step context.
    pub fn new(run_id: impl Into<String>, job: impl Into<String>, step: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            job: job.into(),
            step: step.into(),
            ..Default::default()
        }
    }

    /// Get an input value.
    pub fn get_input(&self, name: &str) -> Option<&serde_json::Value> {
        self.inputs.get(name)
    }

    /// Get an input as a string.
    pub fn get_input_str(&self, name: &str) -> Option<String> {
        self.inputs.get(name).map(|v| match v {
            serde_json::Value::String(s) => s.clone(),
            serde_json::Value::Number(n) => n.to_string(),
            serde_json::Value::Bool(b) => b.to_string(),
            _ => v.to_string(),
        })
    }

    /// Get a secret value.
    pub fn get_secret(&self, name: &str) -> Option<&str> {
        self.secrets.get(name).map(|s| s.as_str())
    }

    /// Set an input value.
    pub fn with_input(mut self, name: impl Into<String>, value: serde_json::Value) -> Self {
        self.inputs.insert(name.into(), value);
        self
    }

    /// Set an environment variable.
    pub fn with_env(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(name.into(), value.into());
        self
    }

    /// Set a secret value.
    pub fn with_secret(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.secrets.insert(name.into(), value.into());
        self
    }

    /// Set the permission grant.
    pub fn with_permissions(mut self, permissions: PermissionSet) -> Self {
        self.permissions = permissions;
        self
    }

    /// Set the cancellation token.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    /// All secret values, for redaction of captured output.
    pub fn secret_values(&self) -> Vec<&str> {
        self.secrets.values().map(|s| s.as_str()).collect()
    }
}
