//! Gantry Engine Library
//!
//! This crate provides the orchestration core for Gantry: parsing CI
//! workflow definitions, matching repository events against triggers, and
//! running jobs and steps with timeouts, conditions, and cancellation.
//!
//! ## Architecture
//!
//! A run is driven entirely in memory. The scheduler admits an event
//! against a workflow's triggers, orders jobs along their `needs` edges,
//! and dispatches each dependency wave to job runners. Runners execute
//! steps strictly in declaration order, accumulating outputs and env
//! exports that later steps and conditions observe. Inline commands and
//! registered actions plug in through the `gantry-actions` crate.
//!
//! ## Modules
//!
//! - [`config`]: Engine tuning loaded from environment variables
//! - [`engine`]: Scheduler, job runner, step executor, and run state
//! - [`error`]: Engine error types
//! - [`event`]: Repository events that trigger workflows
//! - [`report`]: Run, job, and step reports plus the [`Reporter`] trait
//! - [`trigger`]: Event-against-trigger matching
//! - [`workflow`]: Workflow definition types, parsing, and validation
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//!
//! use gantry_engine::config::EngineConfig;
//! use gantry_engine::engine::{RunnerEnvironment, RunnerPool, WorkflowScheduler};
//! use gantry_engine::event::Event;
//! use gantry_engine::workflow::parser::load_workflow;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let workflow = load_workflow(std::path::Path::new("ci.yml"))?;
//!     let registry = Arc::new(gantry_actions::ActionRegistry::new());
//!     let pool = RunnerPool::new().with_environment(RunnerEnvironment::universal("local"));
//!     let scheduler = WorkflowScheduler::new(registry, pool, EngineConfig::from_env()?);
//!
//!     let report = scheduler
//!         .run_workflow(
//!             &Event::push("main"),
//!             &workflow,
//!             Default::default(),
//!             Default::default(),
//!         )
//!         .await?;
//!     println!("{}", report.status);
//!     Ok(())
//! }
//! ```
//!
//! [`Reporter`]: report::Reporter

pub mod config;
pub mod engine;
pub mod error;
pub mod event;
pub mod report;
pub mod trigger;
pub mod workflow;

pub use error::{EngineError, EngineResult};
