//! Gantry Action Library
//!
//! Step execution primitives for workflow runs.
//!
//! This crate provides:
//! - Action execution framework with a registry keyed by pinned references
//! - Local command execution with output capture and file export channels
//! - Template engine with Jinja2-compatible syntax
//! - Secret redaction for captured output

pub mod command;
pub mod context;
pub mod error;
pub mod noop;
pub mod redact;
pub mod reference;
pub mod registry;
pub mod result;
pub mod template;

pub use command::CommandAction;
pub use context::{Access, PermissionSet, StepContext};
pub use error::ActionError;
pub use noop::NoopAction;
pub use redact::Redactor;
pub use reference::ActionRef;
pub use registry::{Action, ActionRegistry};
pub use result::{ActionResult, ActionStatus};
pub use template::TemplateEngine;
