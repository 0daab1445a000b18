//! Workflow definition DSL.
//!
//! This module provides workflow parsing and validation:
//! - Type definitions for workflow structure
//! - YAML parsing
//! - Validation and execution ordering

pub mod parser;
pub mod types;

pub use parser::{job_execution_order, load_workflow, parse_workflow, validate_workflow};
pub use types::{
    BranchFilter, JobDefinition, JobMap, ScheduleSpec, StepDefinition, Triggers,
    WorkflowDefinition,
};
