//! Pinned action references.
//!
//! A reference has the form `owner/repo[/path]@<commit sha>` where the
//! trailing identifier must be a full 40-character commit hash. Mutable
//! refs (branch names, tags) are rejected so that a step always resolves
//! to the same action content.

use crate::error::ActionError;

/// A fully pinned action reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ActionRef {
    /// Repository owner.
    pub owner: String,

    /// Repository name.
    pub repo: String,

    /// Optional path to the action within the repository.
    pub path: Option<String>,

    /// Pinned commit hash (40 lowercase hex characters).
    pub sha: String,
}

impl ActionRef {
    /// Parse and validate a reference string.
    pub fn parse(input: &str) -> Result<Self, ActionError> {
        let (location, sha) = input.split_once('@').ok_or_else(|| {
            ActionError::InvalidReference(format!("missing '@<commit sha>' in '{}'", input))
        })?;

        if !is_commit_sha(sha) {
            return Err(ActionError::InvalidReference(format!(
                "'{}' is not pinned to a commit hash: '{}' must be 40 lowercase hex characters",
                input, sha
            )));
        }

        let mut segments = location.split('/');
        let owner = segments.next().unwrap_or_default();
        let repo = segments.next().unwrap_or_default();
        let path: Vec<&str> = segments.collect();

        if owner.is_empty() || repo.is_empty() {
            return Err(ActionError::InvalidReference(format!(
                "expected 'owner/repo[/path]@sha', got '{}'",
                input
            )));
        }

        for segment in std::iter::once(owner)
            .chain(std::iter::once(repo))
            .chain(path.iter().copied())
        {
            if !is_valid_segment(segment) {
                return Err(ActionError::InvalidReference(format!(
                    "invalid path segment '{}' in '{}'",
                    segment, input
                )));
            }
        }

        Ok(Self {
            owner: owner.to_string(),
            repo: repo.to_string(),
            path: if path.is_empty() {
                None
            } else {
                Some(path.join("/"))
            },
            sha: sha.to_string(),
        })
    }

    /// The repository location without the pin, e.g. `octo/setup-tool/init`.
    pub fn slug(&self) -> String {
        match &self.path {
            Some(path) => format!("{}/{}/{}", self.owner, self.repo, path),
            None => format!("{}/{}", self.owner, self.repo),
        }
    }

    /// Canonical string form, usable as a content-addressed registry key.
    pub fn canonical(&self) -> String {
        format!("{}@{}", self.slug(), self.sha)
    }
}

impl std::fmt::Display for ActionRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.canonical())
    }
}

impl std::str::FromStr for ActionRef {
    type Err = ActionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

fn is_commit_sha(s: &str) -> bool {
    s.len() == 40 && s.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}

fn is_valid_segment(s: &str) -> bool {
    !s.is_empty()
        && s.bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_' || b == b'.')
}
