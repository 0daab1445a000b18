//! Workflow parsing and validation.
//!
//! A workflow file is rejected at load time (before any job is admitted)
//! when it is structurally malformed: missing triggers, a step with both
//! `uses:` and `run:`, an unpinned action reference, an unknown or cyclic
//! `needs:` edge, or an invalid cron / branch pattern / timeout.

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::Path;

use gantry_actions::ActionRef;
use regex::Regex;

use crate::config::parse_duration;
use crate::error::{EngineError, EngineResult};
use crate::workflow::types::{
    BranchFilter, JobDefinition, StepDefinition, Triggers, WorkflowDefinition,
};

/// Load and validate a workflow from a YAML file.
pub fn load_workflow(path: &Path) -> EngineResult<WorkflowDefinition> {
    let yaml = std::fs::read_to_string(path).map_err(|e| {
        EngineError::Io(format!(
            "Failed to read workflow file {}: {}",
            path.display(),
            e
        ))
    })?;
    parse_workflow(&yaml)
}

/// Parse and validate a workflow from YAML content.
pub fn parse_workflow(yaml: &str) -> EngineResult<WorkflowDefinition> {
    let workflow: WorkflowDefinition = serde_yaml::from_str(yaml)
        .map_err(|e| EngineError::Parse(format!("Failed to parse workflow YAML: {}", e)))?;
    validate_workflow(&workflow)?;
    Ok(workflow)
}

/// Validate a workflow definition.
pub fn validate_workflow(workflow: &WorkflowDefinition) -> EngineResult<()> {
    if workflow.name.trim().is_empty() {
        return Err(EngineError::Validation(
            "Workflow name must not be empty".to_string(),
        ));
    }

    validate_triggers(&workflow.on)?;

    if workflow.jobs.is_empty() {
        return Err(EngineError::Validation(
            "Workflow must declare at least one job".to_string(),
        ));
    }

    let mut seen_jobs = HashSet::new();
    for (id, _) in workflow.jobs.iter() {
        if !seen_jobs.insert(id) {
            return Err(EngineError::Validation(format!(
                "Duplicate job id '{}'",
                id
            )));
        }
    }

    for (id, job) in workflow.jobs.iter() {
        validate_job(workflow, id, job)?;
    }

    // Detect dependency cycles.
    job_execution_order(workflow)?;

    Ok(())
}

/// Resolve the job execution order: topological on `needs`, declaration
/// order among peers.
pub fn job_execution_order(workflow: &WorkflowDefinition) -> EngineResult<Vec<String>> {
    let ids = workflow.job_ids();
    let mut indegree: HashMap<&str, usize> = ids.iter().map(|id| (*id, 0)).collect();
    let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();

    for (id, job) in workflow.jobs.iter() {
        for need in &job.needs {
            if let Some(count) = indegree.get_mut(id) {
                *count += 1;
            }
            dependents.entry(need.as_str()).or_default().push(id);
        }
    }

    let mut ready: VecDeque<&str> = ids
        .iter()
        .copied()
        .filter(|id| indegree.get(id) == Some(&0))
        .collect();
    let mut order = Vec::with_capacity(ids.len());

    while let Some(id) = ready.pop_front() {
        order.push(id.to_string());
        for dependent in dependents.get(id).into_iter().flatten() {
            if let Some(count) = indegree.get_mut(dependent) {
                *count -= 1;
                if *count == 0 {
                    // Reinsert in declaration order among newly ready peers.
                    let position = ready
                        .iter()
                        .position(|r| declared_after(&ids, r, dependent))
                        .unwrap_or(ready.len());
                    ready.insert(position, dependent);
                }
            }
        }
    }

    if order.len() < ids.len() {
        let stuck: Vec<&str> = ids
            .iter()
            .copied()
            .filter(|id| !order.iter().any(|o| o == id))
            .collect();
        return Err(EngineError::Validation(format!(
            "Dependency cycle among jobs: {}",
            stuck.join(", ")
        )));
    }

    Ok(order)
}

fn declared_after(ids: &[&str], a: &str, b: &str) -> bool {
    let pos = |x: &str| ids.iter().position(|id| *id == x).unwrap_or(usize::MAX);
    pos(a) > pos(b)
}

fn validate_triggers(triggers: &Triggers) -> EngineResult<()> {
    let any_trigger = triggers.push.is_some()
        || triggers.pull_request.is_some()
        || !triggers.schedule.is_empty()
        || triggers.workflow_dispatch;
    if !any_trigger {
        return Err(EngineError::Validation(
            "Workflow must declare at least one trigger under 'on'".to_string(),
        ));
    }

    if let Some(filter) = &triggers.push {
        validate_branch_globs("push", filter)?;
    }
    if let Some(filter) = &triggers.pull_request {
        validate_branch_globs("pull_request", filter)?;
    }
    for spec in &triggers.schedule {
        validate_cron(&spec.cron)?;
    }

    // pull_request branches outside the push filter are unusual but benign;
    // surfaced as a warning, never a hard failure.
    if let (Some(pr), Some(push)) = (&triggers.pull_request, &triggers.push) {
        if !push.branches.is_empty() {
            let push_set: HashSet<&str> = push.branches.iter().map(String::as_str).collect();
            let stray: Vec<&str> = pr
                .branches
                .iter()
                .map(String::as_str)
                .filter(|b| !push_set.contains(*b))
                .collect();
            if !stray.is_empty() {
                tracing::warn!(
                    branches = ?stray,
                    "pull_request branch filter is not a subset of the push filter"
                );
            }
        }
    }

    Ok(())
}

fn validate_branch_globs(trigger: &str, filter: &BranchFilter) -> EngineResult<()> {
    for pattern in &filter.branches {
        globset::GlobBuilder::new(pattern)
            .literal_separator(true)
            .build()
            .map_err(|e| {
                EngineError::Validation(format!(
                    "Invalid branch pattern '{}' on {} trigger: {}",
                    pattern, trigger, e
                ))
            })?;
    }
    Ok(())
}

fn validate_cron(cron: &str) -> EngineResult<()> {
    let fields: Vec<&str> = cron.split_whitespace().collect();
    if fields.len() != 5 {
        return Err(EngineError::Validation(format!(
            "Cron expression '{}' must have 5 fields, found {}",
            cron,
            fields.len()
        )));
    }

    let field_pattern = Regex::new(r"^[0-9*,/\-]+$")
        .map_err(|e| EngineError::Internal(format!("cron field pattern: {}", e)))?;
    for field in &fields {
        if !field_pattern.is_match(field) {
            return Err(EngineError::Validation(format!(
                "Cron expression '{}' has an invalid field '{}'",
                cron, field
            )));
        }
    }

    Ok(())
}

fn validate_job(workflow: &WorkflowDefinition, id: &str, job: &JobDefinition) -> EngineResult<()> {
    if job.steps.is_empty() {
        return Err(EngineError::Validation(format!("Job '{}' has no steps", id)));
    }

    if let Some(timeout) = &job.timeout {
        parse_duration(timeout).map_err(|_| {
            EngineError::Validation(format!("Job '{}' has an invalid timeout '{}'", id, timeout))
        })?;
    }

    for need in &job.needs {
        if need == id {
            return Err(EngineError::Validation(format!(
                "Job '{}' cannot depend on itself",
                id
            )));
        }
        if !workflow.jobs.contains(need) {
            return Err(EngineError::Validation(format!(
                "Job '{}' needs unknown job '{}'",
                id, need
            )));
        }
    }

    let mut seen_steps = HashSet::new();
    for (index, step) in job.steps.iter().enumerate() {
        validate_step(id, index, step)?;
        if let Some(name) = &step.name {
            if !seen_steps.insert(name.as_str()) {
                return Err(EngineError::Validation(format!(
                    "Duplicate step name '{}' in job '{}'",
                    name, id
                )));
            }
        }
    }

    Ok(())
}

fn validate_step(job_id: &str, index: usize, step: &StepDefinition) -> EngineResult<()> {
    let label = step.display_name(index);

    match (&step.uses, &step.run) {
        (Some(_), Some(_)) => {
            return Err(EngineError::Validation(format!(
                "Step '{}' in job '{}' declares both 'uses' and 'run'",
                label, job_id
            )));
        }
        (None, None) => {
            return Err(EngineError::Validation(format!(
                "Step '{}' in job '{}' must declare either 'uses' or 'run'",
                label, job_id
            )));
        }
        (Some(uses), None) => {
            // Must pin an immutable commit, never a branch or tag.
            ActionRef::parse(uses).map_err(|e| {
                EngineError::Validation(format!(
                    "Step '{}' in job '{}' has an invalid action reference: {}",
                    label, job_id, e
                ))
            })?;
        }
        (None, Some(_)) => {
            if step.version.is_some() {
                return Err(EngineError::Validation(format!(
                    "Step '{}' in job '{}': 'version' requires 'uses'",
                    label, job_id
                )));
            }
            if !step.with.is_empty() {
                return Err(EngineError::Validation(format!(
                    "Step '{}' in job '{}': 'with' requires 'uses'",
                    label, job_id
                )));
            }
        }
    }

    if let Some(timeout) = &step.timeout {
        parse_duration(timeout).map_err(|_| {
            EngineError::Validation(format!(
                "Step '{}' in job '{}' has an invalid timeout '{}'",
                label, job_id, timeout
            ))
        })?;
    }

    Ok(())
}
