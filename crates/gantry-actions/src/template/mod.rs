//! Template engine module.
//!
//! Provides Jinja2-compatible rendering for step inputs, commands,
//! and `if:` condition expressions.

mod engine;

pub use engine::TemplateEngine;
