//! Workflow execution engine.
//!
//! This module provides the core execution machinery for Gantry:
//!
//! - **Scheduler**: Admits events and dispatches jobs in dependency waves
//! - **Runner**: Runs a job's steps in order against a shared run state
//! - **Executor**: Binds and executes single steps with timeout enforcement
//! - **Condition**: Evaluates step `if:` expressions against run state
//! - **State**: Accumulated per-job run state (outputs, env, step records)

pub mod condition;
pub mod executor;
pub mod runner;
pub mod scheduler;
pub mod state;

pub use condition::ConditionEvaluator;
pub use executor::StepExecutor;
pub use runner::JobRunner;
pub use scheduler::{RunnerEnvironment, RunnerPool, WorkflowScheduler};
pub use state::{FailureReason, JobState, RunState, StepRecord, StepStatus};
