//! Command handlers.

use crate::commands::EventArgs;
use crate::config::{CliConfig, OutputFormat};
use anyhow::{Context, anyhow, bail};
use console::style;
use serde::Serialize;
use shipyard_artifacts::FilesystemArtifactStore;
use shipyard_core::gate;
use shipyard_core::ports::ArtifactStore;
use shipyard_core::run::{GroupStatus, JobStatus, RunReport};
use shipyard_core::{
    CancellationFlag, EventKind, PipelineDefinition, Run, RunContext, RunId, RunStatus,
    TriggerEvent,
};
use shipyard_runner::{ExecutionConfig, ExecutionContext, ShellRunner};
use shipyard_scheduler::{DEFAULT_MAX_RUNNERS, DagBuilder, JobGraphScheduler, TriggerEvaluator};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Read and parse a pipeline file.
pub fn load_pipeline(path: &Path) -> anyhow::Result<PipelineDefinition> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("reading pipeline file {}", path.display()))?;
    PipelineDefinition::from_yaml(&content)
        .with_context(|| format!("parsing pipeline file {}", path.display()))
}

/// Split a `KEY=VALUE` manual input.
pub fn parse_input(raw: &str) -> anyhow::Result<(String, String)> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| anyhow!("Invalid input {:?}: expected KEY=VALUE", raw))?;
    let key = key.trim();
    if key.is_empty() {
        bail!("Invalid input {:?}: empty key", raw);
    }
    Ok((key.to_string(), value.to_string()))
}

/// Build the trigger event described by the command line. A push or pull
/// request without `--ref` uses the current branch of `source`.
pub async fn build_event(args: &EventArgs, source: &Path) -> anyhow::Result<TriggerEvent> {
    let kind: EventKind = args.event.parse().map_err(|e: String| anyhow!(e))?;
    let mut event = TriggerEvent::new(kind);

    let git_ref = match (&args.git_ref, kind) {
        (Some(git_ref), _) => Some(git_ref.clone()),
        (None, EventKind::Push | EventKind::PullRequest) => current_branch(source).await,
        (None, _) => None,
    };
    if let Some(git_ref) = git_ref {
        event = event.with_ref(git_ref);
    }

    for raw in &args.inputs {
        let (key, value) = parse_input(raw)?;
        event = event.with_input(key, value);
    }
    if let Ok(actor) = std::env::var("USER") {
        event = event.with_actor(actor);
    }
    Ok(event)
}

async fn current_branch(source: &Path) -> Option<String> {
    let output = tokio::process::Command::new("git")
        .args(["rev-parse", "--abbrev-ref", "HEAD"])
        .current_dir(source)
        .output()
        .await
        .ok()?;
    if !output.status.success() {
        return None;
    }
    let branch = String::from_utf8_lossy(&output.stdout).trim().to_string();
    debug!(branch = %branch, "Detected current branch");
    (!branch.is_empty() && branch != "HEAD").then_some(branch)
}

/// Validate pipeline configuration.
pub fn validate(path: &Path) -> anyhow::Result<()> {
    let pipeline = load_pipeline(path)?;
    let graph = DagBuilder::new()
        .build(&pipeline)
        .map_err(shipyard_core::Error::from)?;

    println!(
        "{} Pipeline '{}' is valid",
        style("✓").green(),
        pipeline.name
    );
    println!(
        "  {} groups, {} job instances",
        graph.len(),
        graph.instance_count()
    );
    for node in graph.topological_order() {
        let deps = if node.definition.depends_on.is_empty() {
            String::new()
        } else {
            format!(" (after {})", node.definition.depends_on.join(", "))
        };
        println!(
            "  {} {} x{}{}",
            style("•").dim(),
            node.name,
            node.instances.len(),
            style(deps).dim()
        );
    }
    Ok(())
}

/// What a run would do for an event.
#[derive(Debug, Clone, Serialize)]
pub struct PlanReport {
    pub pipeline: String,
    pub event: String,
    pub git_ref: Option<String>,
    pub start: bool,
    pub reason: Option<String>,
    pub bindings: BTreeMap<String, String>,
    pub groups: Vec<PlannedGroup>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PlannedGroup {
    pub name: String,
    pub depends_on: Vec<String>,
    /// False when the group's `if` does not hold for this event.
    pub enabled: bool,
    pub instances: Vec<PlannedInstance>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PlannedInstance {
    pub name: String,
    pub binding: String,
    /// Derived per-combination variables from matrix includes.
    pub variables: BTreeMap<String, String>,
    pub steps: Vec<PlannedStep>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PlannedStep {
    pub name: String,
    pub enabled: bool,
}

/// Evaluate triggers, expand the graph and resolve every gate without
/// executing anything.
pub fn build_plan(
    pipeline: &PipelineDefinition,
    event: &TriggerEvent,
) -> anyhow::Result<PlanReport> {
    let decision = TriggerEvaluator::new().evaluate(pipeline, event);
    let mut report = PlanReport {
        pipeline: pipeline.name.clone(),
        event: event.kind().to_string(),
        git_ref: event.git_ref().map(str::to_string),
        start: decision.start,
        reason: decision.reason.clone(),
        bindings: decision.bindings.clone(),
        groups: vec![],
    };
    if !decision.start {
        return Ok(report);
    }

    let graph = DagBuilder::new()
        .build(pipeline)
        .map_err(shipyard_core::Error::from)?;
    let ctx = RunContext {
        run_id: RunId::new(),
        pipeline_name: pipeline.name.clone(),
        event: event.clone(),
        bindings: decision.bindings,
        variables: pipeline.variables.clone(),
    };
    let gate_ctx = ctx.gate_context();

    // A disabled group disables everything downstream of it.
    let mut disabled: Vec<&str> = vec![];
    for node in graph.topological_order() {
        let upstream_disabled = node
            .definition
            .depends_on
            .iter()
            .any(|d| disabled.contains(&d.as_str()));
        let own_gate = node
            .definition
            .condition
            .as_ref()
            .is_none_or(|c| gate::satisfied(c, &gate_ctx));
        let enabled = own_gate && !upstream_disabled;
        if !enabled {
            disabled.push(node.name.as_str());
        }

        let instances = node
            .instances
            .iter()
            .map(|instance| {
                let mut instance_ctx = gate_ctx.clone().with_binding(&instance.binding);
                for (key, value) in &instance.variables {
                    instance_ctx
                        .matrix
                        .entry(key.clone())
                        .or_insert_with(|| value.clone());
                }
                PlannedInstance {
                    name: instance.display_name.clone(),
                    binding: instance.binding.to_string(),
                    variables: instance.variables.clone(),
                    steps: node
                        .definition
                        .steps
                        .iter()
                        .map(|step| PlannedStep {
                            name: step.name.clone(),
                            enabled: enabled
                                && step
                                    .condition
                                    .as_ref()
                                    .is_none_or(|c| gate::satisfied(c, &instance_ctx)),
                        })
                        .collect(),
                }
            })
            .collect();

        report.groups.push(PlannedGroup {
            name: node.name.clone(),
            depends_on: node.definition.depends_on.clone(),
            enabled,
            instances,
        });
    }
    Ok(report)
}

/// Show the plan for an event.
pub async fn plan(path: &Path, args: &EventArgs, format: OutputFormat) -> anyhow::Result<()> {
    let pipeline = load_pipeline(path)?;
    let event = build_event(args, Path::new(".")).await?;
    let report = build_plan(&pipeline, &event)?;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
        OutputFormat::Yaml => print!("{}", serde_yaml::to_string(&report)?),
        OutputFormat::Table => print_plan(&report),
    }
    Ok(())
}

fn print_plan(report: &PlanReport) {
    println!(
        "Pipeline {} on {}{}",
        style(&report.pipeline).bold(),
        report.event,
        report
            .git_ref
            .as_deref()
            .map(|r| format!(" ({})", r))
            .unwrap_or_default()
    );
    if !report.start {
        println!(
            "{} No run: {}",
            style("○").yellow(),
            report.reason.as_deref().unwrap_or("trigger rejected")
        );
        return;
    }
    for (key, value) in &report.bindings {
        println!("  {} = {}", style(key).dim(), value);
    }
    println!();
    for group in &report.groups {
        let marker = if group.enabled {
            style("▶").cyan()
        } else {
            style("○").dim()
        };
        println!("{} {}", marker, style(&group.name).bold());
        for instance in &group.instances {
            println!("    {}", instance.name);
            for (key, value) in &instance.variables {
                println!("      {} {} = {}", style("$").dim(), key, value);
            }
            for step in &instance.steps {
                let mark = if step.enabled {
                    style("•").green()
                } else {
                    style("-").dim()
                };
                println!("      {} {}", mark, step.name);
            }
        }
    }
}

/// Settings for one local run.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub max_runners: Option<usize>,
    pub source: PathBuf,
    pub work_dir: PathBuf,
    pub artifact_dir: PathBuf,
    pub env: BTreeMap<String, String>,
}

/// Result of a local run request.
#[derive(Debug)]
pub enum Execution {
    /// The event did not start a run.
    NotTriggered(String),
    Finished(Run),
}

/// Evaluate the event and, when it starts a run, execute the whole graph.
pub async fn execute(
    pipeline: PipelineDefinition,
    event: TriggerEvent,
    options: &RunOptions,
    cancel: CancellationFlag,
) -> anyhow::Result<Execution> {
    let decision = TriggerEvaluator::new().evaluate(&pipeline, &event);
    if !decision.start {
        let reason = decision
            .reason
            .unwrap_or_else(|| "trigger rejected".to_string());
        info!(pipeline = %pipeline.name, reason = %reason, "Event did not start a run");
        return Ok(Execution::NotTriggered(reason));
    }

    let graph = DagBuilder::new()
        .build(&pipeline)
        .map_err(shipyard_core::Error::from)?;

    let ctx = RunContext {
        run_id: RunId::new(),
        pipeline_name: pipeline.name.clone(),
        event,
        bindings: decision.bindings,
        variables: pipeline.variables.clone(),
    };

    let source = std::fs::canonicalize(&options.source)
        .with_context(|| format!("resolving source directory {}", options.source.display()))?;
    let store = Arc::new(FilesystemArtifactStore::new(
        options.artifact_dir.join(ctx.run_id.to_string()),
    ));
    let max_runners = options
        .max_runners
        .or(pipeline.max_runners())
        .unwrap_or(DEFAULT_MAX_RUNNERS);

    let executor = ExecutionContext::new(
        Arc::new(pipeline),
        store.clone(),
        Arc::new(ShellRunner::new()),
        ExecutionConfig {
            work_root: options.work_dir.clone(),
            source_dir: Some(source),
            env: options.env.clone(),
            ..Default::default()
        },
    );

    info!(
        run_id = %ctx.run_id,
        artifacts = %store.root_dir().display(),
        max_runners,
        "Starting run"
    );

    let scheduler = JobGraphScheduler::new(Arc::new(executor)).with_max_runners(max_runners);
    Ok(Execution::Finished(scheduler.run(&graph, ctx, cancel).await))
}

/// Execute a pipeline locally. Returns whether the run succeeded; an event
/// that does not start a run counts as success.
pub async fn run_pipeline(
    config: &CliConfig,
    path: &Path,
    args: &EventArgs,
    options: RunOptions,
    format: OutputFormat,
) -> anyhow::Result<bool> {
    let pipeline = load_pipeline(path)?;
    let event = build_event(args, &options.source).await?;
    let options = RunOptions {
        max_runners: options.max_runners.or(config.max_runners),
        ..options
    };

    let cancel = CancellationFlag::new();
    let on_interrupt = cancel.clone();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, cancelling run");
            on_interrupt.cancel();
        }
    });

    let execution = execute(pipeline, event, &options, cancel).await;
    interrupt.abort();

    match execution? {
        Execution::NotTriggered(reason) => {
            println!("{} No run started: {}", style("○").yellow(), reason);
            Ok(true)
        }
        Execution::Finished(run) => {
            let report = run.report();
            match format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
                OutputFormat::Yaml => print!("{}", serde_yaml::to_string(&report)?),
                OutputFormat::Table => print_report(&report),
            }
            Ok(run.status == RunStatus::Succeeded)
        }
    }
}

/// Print the per-group, per-binding result matrix.
pub fn print_report(report: &RunReport) {
    println!();
    println!(
        "Run {} of {} ({})",
        style(report.run_id).dim(),
        style(&report.pipeline_name).bold(),
        report.event
    );
    for group in &report.groups {
        let reason = group
            .reason
            .as_deref()
            .map(|r| format!(" {}", style(format!("({})", r)).dim()))
            .unwrap_or_default();
        println!("{} {}{}", group_marker(group.status), style(&group.name).bold(), reason);
        for cell in &group.cells {
            let binding = if cell.binding.is_empty() {
                "default"
            } else {
                cell.binding.as_str()
            };
            let detail = match (&cell.failed_step, &cell.message) {
                (Some(step), Some(message)) => format!(" {}: {}", step, message),
                (None, Some(message)) => format!(" {}", message),
                _ => String::new(),
            };
            println!("    {} {}{}", job_marker(cell.status), binding, style(detail).red());
        }
    }

    let duration = report
        .duration_ms
        .map(|ms| format!(" in {:.1}s", ms as f64 / 1000.0))
        .unwrap_or_default();
    match report.status {
        RunStatus::Succeeded => println!("\n{} Run succeeded{}", style("✓").green(), duration),
        RunStatus::Cancelled => println!("\n{} Run cancelled{}", style("⊘").yellow(), duration),
        _ => println!("\n{} Run failed{}", style("✗").red(), duration),
    }
    if let Some(error) = &report.error {
        println!("  {}", style(error).red());
    }
}

fn group_marker(status: GroupStatus) -> console::StyledObject<&'static str> {
    match status {
        GroupStatus::Succeeded => style("✓").green(),
        GroupStatus::Failed => style("✗").red(),
        GroupStatus::Blocked => style("◌").red(),
        GroupStatus::Cancelled => style("⊘").yellow(),
        GroupStatus::Skipped => style("○").dim(),
        GroupStatus::Pending | GroupStatus::Running => style("…").dim(),
    }
}

fn job_marker(status: JobStatus) -> console::StyledObject<&'static str> {
    match status {
        JobStatus::Succeeded => style("✓").green(),
        JobStatus::Failed => style("✗").red(),
        JobStatus::Cancelled => style("⊘").yellow(),
        JobStatus::Pending | JobStatus::Running => style("…").dim(),
    }
}

/// List artifacts stored under a run directory.
pub async fn list_artifacts(dir: &Path, format: OutputFormat) -> anyhow::Result<()> {
    let store = FilesystemArtifactStore::new(dir);
    let artifacts = store.list().await?;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&artifacts)?),
        OutputFormat::Yaml => print!("{}", serde_yaml::to_string(&artifacts)?),
        OutputFormat::Table => {
            if artifacts.is_empty() {
                println!("No artifacts in {}", dir.display());
            }
            for meta in &artifacts {
                println!(
                    "{}  {:>10}  {}",
                    &meta.sha256[..12.min(meta.sha256.len())],
                    meta.size_bytes,
                    meta.key
                );
            }
        }
    }
    Ok(())
}

/// Show configuration.
pub fn show_config(config: &CliConfig) -> anyhow::Result<()> {
    println!("Current configuration:");
    println!("  work_dir: {}", config.work_dir().display());
    println!("  artifact_dir: {}", config.artifact_dir().display());
    println!(
        "  max_runners: {}",
        config
            .max_runners
            .map(|n| n.to_string())
            .unwrap_or_else(|| "(pipeline or default)".to_string())
    );
    println!("  output_format: {:?}", config.output_format);
    println!("  log_format: {:?}", config.log_format);

    if let Ok(path) = CliConfig::config_path() {
        println!("\nConfig file: {}", path.display());
    }

    Ok(())
}

/// Set configuration.
pub fn set_config(key: &str, value: &str) -> anyhow::Result<()> {
    let mut config = CliConfig::load().unwrap_or_default();
    config.set(key, value)?;
    config.save()?;

    println!("{} Set {} = {}", style("✓").green(), key, value);
    Ok(())
}

/// Print the JSON schema of the pipeline format.
pub fn schema() -> anyhow::Result<()> {
    let schema = schemars::schema_for!(PipelineDefinition);
    println!("{}", serde_json::to_string_pretty(&schema)?);
    Ok(())
}
