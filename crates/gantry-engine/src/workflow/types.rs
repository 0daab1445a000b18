//! Workflow definition types.
//!
//! Complete type definitions for gantry workflow files:
//! - `on` triggers (push / pull_request / schedule / workflow_dispatch)
//! - jobs as an ordered map of job id to definition
//! - steps as an ordered list, each either a pinned `uses:` action or an
//!   inline `run:` command
//! - `version:` as the structural annotation of a pinned action's human tag

use std::collections::BTreeMap;

use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use gantry_actions::PermissionSet;

/// Branch allow-list for push / pull_request triggers.
///
/// Entries are glob patterns (`*` stays within one path segment, `**`
/// crosses segments). An empty list matches every branch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BranchFilter {
    /// Branch glob patterns.
    #[serde(default)]
    pub branches: Vec<String>,
}

/// One schedule trigger entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleSpec {
    /// Five-field cron expression, stored verbatim.
    pub cron: String,
}

/// Trigger declarations of a workflow.
///
/// Presence of a field enables that trigger: `push:` with no body enables
/// push for all branches, and a bare `workflow_dispatch:` enables manual
/// dispatch.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Triggers {
    /// Push trigger with optional branch filter.
    #[serde(
        default,
        deserialize_with = "de_branch_filter",
        skip_serializing_if = "Option::is_none"
    )]
    pub push: Option<BranchFilter>,

    /// Pull request trigger with optional branch filter.
    #[serde(
        default,
        deserialize_with = "de_branch_filter",
        skip_serializing_if = "Option::is_none"
    )]
    pub pull_request: Option<BranchFilter>,

    /// Schedule triggers.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub schedule: Vec<ScheduleSpec>,

    /// Manual dispatch trigger.
    #[serde(
        default,
        deserialize_with = "de_enabled",
        skip_serializing_if = "is_false"
    )]
    pub workflow_dispatch: bool,
}

/// A single step within a job.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StepDefinition {
    /// Step name; used as the key for step outputs and conditions.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Pinned action reference (`owner/repo@<40-hex sha>`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uses: Option<String>,

    /// Human-readable tag of the pinned commit, e.g. "v3".
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    /// Inline command, executed through the local shell.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run: Option<String>,

    /// Action inputs; values may contain template expressions.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub with: BTreeMap<String, serde_json::Value>,

    /// Per-step environment shadow; never written back to run state.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,

    /// Boolean condition gating the step.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub r#if: Option<String>,

    /// Whether a failure of this step leaves the job running.
    #[serde(rename = "continue-on-error", default, skip_serializing_if = "is_false")]
    pub continue_on_error: bool,

    /// Step timeout as a humane duration string ("90s", "5m", "1h").
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout: Option<String>,
}

impl StepDefinition {
    /// Display name for reports and run-state keys.
    ///
    /// Unnamed steps get a positional key so their record is still
    /// addressable.
    pub fn display_name(&self, index: usize) -> String {
        match &self.name {
            Some(name) => name.clone(),
            None => format!("step-{}", index + 1),
        }
    }

    /// Whether this step runs an inline command.
    pub fn is_command(&self) -> bool {
        self.run.is_some()
    }

    /// Whether this step invokes a registered action.
    pub fn is_action(&self) -> bool {
        self.uses.is_some()
    }
}

/// A job: a unit of scheduling that runs on one execution environment.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobDefinition {
    /// Human-readable job name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Runner labels the execution environment must cover.
    #[serde(
        rename = "runs-on",
        default,
        deserialize_with = "de_string_or_list",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub runs_on: Vec<String>,

    /// Per-job permission override; falls back to the workflow default.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub permissions: Option<PermissionSet>,

    /// Jobs that must succeed before this one is dispatched.
    #[serde(
        default,
        deserialize_with = "de_string_or_list",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub needs: Vec<String>,

    /// Job timeout budget as a humane duration string.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout: Option<String>,

    /// Ordered steps; never reordered by the engine.
    #[serde(default)]
    pub steps: Vec<StepDefinition>,
}

/// Ordered map of job id to definition, preserving declaration order.
#[derive(Debug, Clone, Default)]
pub struct JobMap(Vec<(String, JobDefinition)>);

impl JobMap {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Append a job. Used by tests and programmatic construction; YAML
    /// parsing goes through Deserialize.
    pub fn insert(&mut self, id: impl Into<String>, job: JobDefinition) {
        self.0.push((id.into(), job));
    }

    pub fn get(&self, id: &str) -> Option<&JobDefinition> {
        self.0.iter().find(|(name, _)| name == id).map(|(_, j)| j)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.0.iter().any(|(name, _)| name == id)
    }

    /// Iterate jobs in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &JobDefinition)> {
        self.0.iter().map(|(id, job)| (id.as_str(), job))
    }

    /// Job ids in declaration order.
    pub fn ids(&self) -> Vec<&str> {
        self.0.iter().map(|(id, _)| id.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<'de> Deserialize<'de> for JobMap {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct JobMapVisitor;

        impl<'de> Visitor<'de> for JobMapVisitor {
            type Value = JobMap;

            fn expecting(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
                f.write_str("a map of job id to job definition")
            }

            fn visit_map<A>(self, mut map: A) -> Result<JobMap, A::Error>
            where
                A: MapAccess<'de>,
            {
                let mut jobs = Vec::new();
                while let Some((id, job)) = map.next_entry::<String, JobDefinition>()? {
                    jobs.push((id, job));
                }
                Ok(JobMap(jobs))
            }
        }

        deserializer.deserialize_map(JobMapVisitor)
    }
}

impl Serialize for JobMap {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (id, job) in &self.0 {
            map.serialize_entry(id, job)?;
        }
        map.end()
    }
}

/// A complete workflow definition. Loaded once, immutable thereafter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    /// Workflow name.
    pub name: String,

    /// Trigger declarations.
    #[serde(default)]
    pub on: Triggers,

    /// Workflow-level default permissions.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub permissions: Option<PermissionSet>,

    /// Jobs in declaration order.
    #[serde(default)]
    pub jobs: JobMap,
}

impl WorkflowDefinition {
    /// Get a job by id.
    pub fn job(&self, id: &str) -> Option<&JobDefinition> {
        self.jobs.get(id)
    }

    /// Job ids in declaration order.
    pub fn job_ids(&self) -> Vec<&str> {
        self.jobs.ids()
    }

    /// Effective permissions for a job: the job override if present, else
    /// the workflow default, else an empty grant.
    pub fn effective_permissions(&self, job: &JobDefinition) -> PermissionSet {
        job.permissions
            .clone()
            .or_else(|| self.permissions.clone())
            .unwrap_or_default()
    }
}

/// Deserialize a trigger body where a bare key means "enabled for all".
fn de_branch_filter<'de, D>(deserializer: D) -> Result<Option<BranchFilter>, D::Error>
where
    D: Deserializer<'de>,
{
    let filter = Option::<BranchFilter>::deserialize(deserializer)?;
    Ok(Some(filter.unwrap_or_default()))
}

/// Deserialize trigger presence: any value, including null, enables it.
fn de_enabled<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    serde::de::IgnoredAny::deserialize(deserializer)?;
    Ok(true)
}

/// Accept either a single string or a list of strings.
fn de_string_or_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(s) => Ok(vec![s]),
        OneOrMany::Many(v) => Ok(v),
    }
}

fn is_false(b: &bool) -> bool {
    !*b
}
