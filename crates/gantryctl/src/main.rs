//! Gantry command line tool.
//!
//! Validates workflow files and runs them locally against synthetic
//! repository events, without any server.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use gantry_actions::{ActionRef, ActionRegistry, NoopAction};
use gantry_engine::config::EngineConfig;
use gantry_engine::engine::{RunnerEnvironment, RunnerPool, WorkflowScheduler};
use gantry_engine::event::{Event, EventKind};
use gantry_engine::report::WorkflowReport;
use gantry_engine::workflow::parser::{job_execution_order, load_workflow};
use gantry_engine::workflow::types::WorkflowDefinition;

#[derive(Parser)]
#[command(name = "gantryctl")]
#[command(version, about = "Gantry CI orchestration tool", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Parse and validate a workflow file
    ///
    /// Checks YAML structure, trigger declarations, action references,
    /// timeouts, and the job dependency graph, then prints the order in
    /// which jobs would run.
    #[command(verbatim_doc_comment)]
    Validate {
        /// Path to the workflow YAML file
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },
    /// Run a workflow for a synthetic repository event
    ///
    /// Examples:
    ///     gantryctl run ci.yml --event push --branch main
    ///     gantryctl run ci.yml --event pull_request --changed src/lib.rs
    ///     gantryctl run nightly.yml --event schedule --cron "0 4 * * *"
    ///     gantryctl run release.yml --event manual --secret TOKEN=abc
    #[command(verbatim_doc_comment)]
    Run {
        /// Path to the workflow YAML file
        #[arg(value_name = "FILE")]
        file: PathBuf,

        /// Event kind: push, pull_request, schedule, manual
        #[arg(short, long, default_value = "push")]
        event: String,

        /// Branch the event refers to (push and pull_request events)
        #[arg(short, long, default_value = "main")]
        branch: String,

        /// Cron expression of the firing schedule (schedule events)
        #[arg(long)]
        cron: Option<String>,

        /// Changed file path, can be repeated
        #[arg(long = "changed", value_name = "PATH")]
        changed: Vec<String>,

        /// Secret (format: KEY=VALUE), can be repeated
        #[arg(long = "secret", value_name = "KEY=VALUE")]
        secrets: Vec<String>,

        /// Runner label offered by the local environment, can be repeated
        ///
        /// With no labels the local runner accepts any runs-on request.
        #[arg(long = "label", value_name = "LABEL")]
        labels: Vec<String>,

        /// Register a no-op stub for every uses: reference
        #[arg(long)]
        stub_actions: bool,

        /// Emit the full run report as JSON
        #[arg(short, long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load environment variables
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    match cli.command {
        Commands::Validate { file } => validate(&file),
        Commands::Run {
            file,
            event,
            branch,
            cron,
            changed,
            secrets,
            labels,
            stub_actions,
            json,
        } => {
            run(
                &file,
                &event,
                &branch,
                cron.as_deref(),
                changed,
                &secrets,
                labels,
                stub_actions,
                json,
            )
            .await
        }
    }
}

fn validate(file: &Path) -> Result<()> {
    let workflow = load_workflow(file)?;
    let order = job_execution_order(&workflow)?;
    println!("Workflow '{}' is valid", workflow.name);
    println!("  jobs: {}", order.join(", "));
    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn run(
    file: &Path,
    event: &str,
    branch: &str,
    cron: Option<&str>,
    changed: Vec<String>,
    secret_pairs: &[String],
    labels: Vec<String>,
    stub_actions: bool,
    json: bool,
) -> Result<()> {
    let workflow = load_workflow(file)?;
    let event = build_event(event, branch, cron, changed)?;
    let secrets = parse_secrets(secret_pairs)?;

    let mut registry = ActionRegistry::new();
    if stub_actions {
        register_stubs(&mut registry, &workflow)?;
    }

    let environment = if labels.is_empty() {
        RunnerEnvironment::universal("local")
    } else {
        RunnerEnvironment::new("local", labels)
    };
    let pool = RunnerPool::new().with_environment(environment);
    let config = EngineConfig::from_env()?;
    let scheduler = WorkflowScheduler::new(Arc::new(registry), pool, config);

    // Ctrl+C cancels the run; jobs wind down through the token.
    let cancellation = CancellationToken::new();
    let signal_token = cancellation.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, cancelling run");
            signal_token.cancel();
        }
    });

    let report = scheduler
        .run_workflow(&event, &workflow, secrets, cancellation)
        .await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }

    if !report.status.is_success() {
        std::process::exit(1);
    }
    Ok(())
}

fn build_event(kind: &str, branch: &str, cron: Option<&str>, changed: Vec<String>) -> Result<Event> {
    let kind: EventKind = kind.parse()?;
    let event = match kind {
        EventKind::Push => Event::push(branch),
        EventKind::PullRequest => Event::pull_request(branch),
        EventKind::Schedule => match cron {
            Some(cron) => Event::schedule(cron),
            None => bail!("--cron is required for schedule events"),
        },
        EventKind::Manual => Event::manual(),
    };
    Ok(event.with_changed_files(changed))
}

fn parse_secrets(pairs: &[String]) -> Result<HashMap<String, String>> {
    let mut secrets = HashMap::new();
    for pair in pairs {
        match pair.split_once('=') {
            Some((key, value)) if !key.is_empty() => {
                secrets.insert(key.to_string(), value.to_string());
            }
            _ => bail!("Invalid secret '{}', expected KEY=VALUE", pair),
        }
    }
    Ok(secrets)
}

/// Register a no-op action for every distinct `uses:` reference, so
/// workflows can be exercised without the real actions installed.
fn register_stubs(registry: &mut ActionRegistry, workflow: &WorkflowDefinition) -> Result<()> {
    for (_, job) in workflow.jobs.iter() {
        for step in &job.steps {
            if let Some(uses) = &step.uses {
                let reference = ActionRef::parse(uses)?;
                if !registry.has(&reference) {
                    tracing::debug!(action = %reference, "Registering stub action");
                    registry.register(&reference, NoopAction::new());
                }
            }
        }
    }
    Ok(())
}

fn print_report(report: &WorkflowReport) {
    if !report.admitted {
        println!("Workflow '{}' not triggered by this event", report.workflow);
        return;
    }

    println!(
        "Run {} for '{}': {} ({} ms)",
        report.run_id, report.workflow, report.status, report.duration_ms
    );
    for job in &report.jobs {
        match &job.error {
            Some(error) => println!("  {}: {} ({})", job.job, job.state, error),
            None => println!("  {}: {} ({} ms)", job.job, job.state, job.duration_ms),
        }
        for step in &job.steps {
            match step.reason {
                Some(reason) => println!("    {}: {} ({})", step.name, step.status, reason),
                None => println!("    {}: {}", step.name, step.status),
            }
        }
    }
}
