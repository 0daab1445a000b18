//! Trigger delivery model.
//!
//! An external event source (VCS webhook, cron daemon, a human) constructs
//! an [`Event`] and hands it to the engine. Events are immutable once built;
//! the builder methods consume `self` and exist for construction only.

use serde::{Deserialize, Serialize};

use crate::error::EngineError;

/// Kind of event that can trigger a workflow run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Push,
    PullRequest,
    Schedule,
    Manual,
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            EventKind::Push => "push",
            EventKind::PullRequest => "pull_request",
            EventKind::Schedule => "schedule",
            EventKind::Manual => "manual",
        };
        write!(f, "{}", s)
    }
}

impl std::str::FromStr for EventKind {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "push" => Ok(EventKind::Push),
            "pull_request" => Ok(EventKind::PullRequest),
            "schedule" => Ok(EventKind::Schedule),
            "manual" | "workflow_dispatch" => Ok(EventKind::Manual),
            other => Err(EngineError::Validation(format!(
                "Unknown event kind '{}' (expected push, pull_request, schedule, or manual)",
                other
            ))),
        }
    }
}

/// A trigger event delivered to the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Event kind.
    pub kind: EventKind,

    /// Branch the event refers to (push and pull_request).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,

    /// Cron expression that fired (schedule only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cron: Option<String>,

    /// Head commit of the event.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub head_sha: Option<String>,

    /// Base commit for diff-based predicates.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_sha: Option<String>,

    /// Files changed between base and head.
    #[serde(default)]
    pub changed_files: Vec<String>,
}

impl Event {
    /// Create a push event for a branch.
    pub fn push(branch: impl Into<String>) -> Self {
        Self {
            kind: EventKind::Push,
            branch: Some(branch.into()),
            cron: None,
            head_sha: None,
            base_sha: None,
            changed_files: Vec::new(),
        }
    }

    /// Create a pull request event targeting a branch.
    pub fn pull_request(branch: impl Into<String>) -> Self {
        Self {
            kind: EventKind::PullRequest,
            branch: Some(branch.into()),
            cron: None,
            head_sha: None,
            base_sha: None,
            changed_files: Vec::new(),
        }
    }

    /// Create a schedule tick for a cron expression.
    pub fn schedule(cron: impl Into<String>) -> Self {
        Self {
            kind: EventKind::Schedule,
            branch: None,
            cron: Some(cron.into()),
            head_sha: None,
            base_sha: None,
            changed_files: Vec::new(),
        }
    }

    /// Create a manual dispatch event.
    pub fn manual() -> Self {
        Self {
            kind: EventKind::Manual,
            branch: None,
            cron: None,
            head_sha: None,
            base_sha: None,
            changed_files: Vec::new(),
        }
    }

    /// Set the head commit.
    pub fn with_head_sha(mut self, sha: impl Into<String>) -> Self {
        self.head_sha = Some(sha.into());
        self
    }

    /// Set the base commit.
    pub fn with_base_sha(mut self, sha: impl Into<String>) -> Self {
        self.base_sha = Some(sha.into());
        self
    }

    /// Set the changed file list.
    pub fn with_changed_files(mut self, files: Vec<String>) -> Self {
        self.changed_files = files;
        self
    }

    /// Add a single changed file.
    pub fn with_changed_file(mut self, file: impl Into<String>) -> Self {
        self.changed_files.push(file.into());
        self
    }
}
