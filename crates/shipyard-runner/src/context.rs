//! Per-instance execution context.

use crate::runner::{OutputLine, OutputStream, StepContext, StepRunner};
use async_trait::async_trait;
use shipyard_artifacts::{binding_component, escape_component};
use shipyard_core::Error;
use shipyard_core::artifact::ArtifactKey;
use shipyard_core::cancel::CancellationFlag;
use shipyard_core::gate::{self, GateContext};
use shipyard_core::interpolation::InterpolationContext;
use shipyard_core::pipeline::{JobGroupDefinition, PipelineDefinition, StepDefinition};
use shipyard_core::ports::{ArtifactStore, JobExecutor};
use shipyard_core::run::{
    FailureKind, JobFailure, JobInstance, JobOutcome, JobStatus, RunContext, StepRecord,
    StepStatus,
};
use shipyard_trace::{CiAttributes, job_span, step_span};
use std::collections::{BTreeMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{Instrument, debug, info, warn};

const DEFAULT_OUTPUT_TAIL: usize = 50;

/// Settings shared by every instance of a run.
#[derive(Debug, Clone)]
pub struct ExecutionConfig {
    /// Root for per-instance working directories.
    pub work_root: PathBuf,
    /// Source checkout exposed to steps as `SHIPYARD_SOURCE`.
    pub source_dir: Option<PathBuf>,
    /// Extra variables passed to every step, also consulted for credentials.
    pub env: BTreeMap<String, String>,
    /// Number of trailing output lines kept per instance.
    pub output_tail: usize,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            work_root: std::env::temp_dir().join("shipyard"),
            source_dir: None,
            env: BTreeMap::new(),
            output_tail: DEFAULT_OUTPUT_TAIL,
        }
    }
}

/// Why a step stopped short of success.
struct StepError {
    kind: FailureKind,
    exit_code: Option<i32>,
    message: String,
}

impl StepError {
    fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            exit_code: None,
            message: message.into(),
        }
    }

    /// Failures a `continue_on_error` step may absorb.
    fn tolerable(&self) -> bool {
        matches!(
            self.kind,
            FailureKind::StepFailed | FailureKind::ArtifactMissing
        )
    }
}

impl From<Error> for StepError {
    fn from(err: Error) -> Self {
        let (kind, exit_code) = match &err {
            Error::ArtifactConflict(_) => (FailureKind::ArtifactConflict, None),
            Error::ArtifactMissing(_) => (FailureKind::ArtifactMissing, None),
            Error::StepFailed { exit_code, .. } => (FailureKind::StepFailed, Some(*exit_code)),
            Error::StepTimeout { .. } => (FailureKind::Timeout, None),
            Error::MissingCredential(_) => (FailureKind::MissingCredential, None),
            Error::RunCancelled => (FailureKind::Cancelled, None),
            _ => (FailureKind::Internal, None),
        };
        Self {
            kind,
            exit_code,
            message: err.to_string(),
        }
    }
}

/// Mutable state while one instance runs.
struct InstanceRun<'a> {
    instance: &'a JobInstance,
    group: &'a JobGroupDefinition,
    workdir: PathBuf,
    interpolation: InterpolationContext,
    gate_ctx: GateContext,
    base_env: BTreeMap<String, String>,
    deadline: Instant,
    tail: VecDeque<String>,
    records: Vec<StepRecord>,
    artifacts: Vec<ArtifactKey>,
}

/// Runs job instances on the host: fresh working directory, ordered steps,
/// artifact handoff through the run's store.
pub struct ExecutionContext {
    pipeline: Arc<PipelineDefinition>,
    store: Arc<dyn ArtifactStore>,
    runner: Arc<dyn StepRunner>,
    config: ExecutionConfig,
}

impl ExecutionContext {
    pub fn new(
        pipeline: Arc<PipelineDefinition>,
        store: Arc<dyn ArtifactStore>,
        runner: Arc<dyn StepRunner>,
        config: ExecutionConfig,
    ) -> Self {
        Self {
            pipeline,
            store,
            runner,
            config,
        }
    }

    /// Working directory of one instance: `<work_root>/<run>/<group>/<binding>`.
    pub fn instance_dir(&self, ctx: &RunContext, instance: &JobInstance) -> PathBuf {
        self.config
            .work_root
            .join(ctx.run_id.to_string())
            .join(escape_component(&instance.group))
            .join(binding_component(&instance.binding))
    }

    fn credential_present(&self, name: &str) -> bool {
        self.config
            .env
            .get(name)
            .map(|v| !v.is_empty())
            .unwrap_or_else(|| std::env::var(name).is_ok_and(|v| !v.is_empty()))
    }

    async fn prepare_workdir(&self, dir: &Path) -> std::io::Result<()> {
        if tokio::fs::try_exists(dir).await? {
            tokio::fs::remove_dir_all(dir).await?;
        }
        tokio::fs::create_dir_all(dir).await
    }

    fn base_env(
        &self,
        instance: &JobInstance,
        ctx: &RunContext,
        group: &JobGroupDefinition,
        workdir: &Path,
        interpolation: &InterpolationContext,
    ) -> BTreeMap<String, String> {
        let mut env = self.config.env.clone();
        for (k, v) in &self.pipeline.variables {
            env.insert(k.clone(), interpolation.interpolate(v));
        }
        for (k, v) in &group.env {
            env.insert(k.clone(), interpolation.interpolate(v));
        }

        env.insert("CI".to_string(), "true".to_string());
        env.insert("SHIPYARD_RUN_ID".to_string(), ctx.run_id.to_string());
        env.insert("SHIPYARD_PIPELINE".to_string(), ctx.pipeline_name.clone());
        env.insert("SHIPYARD_GROUP".to_string(), instance.group.clone());
        env.insert("SHIPYARD_JOB".to_string(), instance.display_name.clone());
        env.insert("SHIPYARD_EVENT".to_string(), ctx.event.kind().to_string());
        if let Some(git_ref) = ctx.event.git_ref() {
            env.insert("SHIPYARD_REF".to_string(), git_ref.to_string());
        }
        env.insert(
            "SHIPYARD_WORKSPACE".to_string(),
            workdir.display().to_string(),
        );
        if let Some(source) = &self.config.source_dir {
            env.insert("SHIPYARD_SOURCE".to_string(), source.display().to_string());
        }
        for (k, v) in instance.matrix_values() {
            let name = format!("MATRIX_{}", k.to_ascii_uppercase().replace(['-', '.', ' '], "_"));
            env.insert(name, v);
        }
        env
    }

    async fn run_steps(
        &self,
        run: &mut InstanceRun<'_>,
        cancel: &CancellationFlag,
    ) -> Option<JobFailure> {
        let group: &JobGroupDefinition = run.group;
        let steps = &group.steps;
        for (ordinal, step) in steps.iter().enumerate() {
            if cancel.is_cancelled() {
                info!(step = %step.name, "Cancellation observed, stopping before step");
                mark_not_run(&mut run.records, steps, ordinal);
                let err = StepError::from(Error::RunCancelled);
                return Some(JobFailure {
                    kind: err.kind,
                    step: Some(step.name.clone()),
                    message: err.message,
                });
            }

            if let Some(predicate) = &step.condition
                && !gate::satisfied(predicate, &run.gate_ctx)
            {
                debug!(step = %step.name, "Step condition not satisfied, skipping");
                run.records.push(StepRecord {
                    ordinal,
                    name: step.name.clone(),
                    status: StepStatus::Skipped,
                    exit_code: None,
                    duration_ms: 0,
                });
                continue;
            }

            let attrs = CiAttributes::new()
                .group(&run.instance.group)
                .job(run.instance.id.to_string(), run.instance.binding.to_string())
                .step(&step.name);
            let started = Instant::now();
            let result = self
                .run_step(run, step)
                .instrument(step_span(&attrs))
                .await;
            let duration_ms = started.elapsed().as_millis() as u64;

            match result {
                Ok(exit_code) => run.records.push(StepRecord {
                    ordinal,
                    name: step.name.clone(),
                    status: StepStatus::Succeeded,
                    exit_code: Some(exit_code),
                    duration_ms,
                }),
                Err(err) if step.continue_on_error && err.tolerable() => {
                    warn!(step = %step.name, error = %err.message, "Step failed, continuing");
                    run.records.push(StepRecord {
                        ordinal,
                        name: step.name.clone(),
                        status: StepStatus::Tolerated,
                        exit_code: err.exit_code,
                        duration_ms,
                    });
                }
                Err(err) => {
                    warn!(step = %step.name, kind = %err.kind, error = %err.message, "Step failed");
                    run.records.push(StepRecord {
                        ordinal,
                        name: step.name.clone(),
                        status: StepStatus::Failed,
                        exit_code: err.exit_code,
                        duration_ms,
                    });
                    mark_not_run(&mut run.records, steps, ordinal + 1);
                    return Some(JobFailure {
                        kind: err.kind,
                        step: Some(step.name.clone()),
                        message: err.message,
                    });
                }
            }
        }
        None
    }

    /// Run one step: credentials, inbound artifacts, command, outbound
    /// artifacts. Returns the command's exit code on success.
    async fn run_step(
        &self,
        run: &mut InstanceRun<'_>,
        step: &StepDefinition,
    ) -> Result<i32, StepError> {
        for name in &step.credentials {
            if !self.credential_present(name) {
                return Err(Error::MissingCredential(name.clone()).into());
            }
        }

        for request in &step.consumes {
            self.fetch_artifact(run, &request.group, &request.name, &request.path)
                .await?;
        }

        let mut env = run.base_env.clone();
        for (k, v) in &step.env {
            env.insert(k.clone(), run.interpolation.interpolate(v));
        }
        let working_dir = match &step.working_directory {
            Some(dir) => run.workdir.join(run.interpolation.interpolate(dir)),
            None => run.workdir.clone(),
        };
        let step_ctx = StepContext {
            step_name: step.name.clone(),
            command: run.interpolation.interpolate(&step.run),
            shell: step.shell.clone(),
            working_dir,
            env,
        };

        let remaining = run.deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(Error::StepTimeout {
                seconds: run.instance.timeout_seconds,
            }
            .into());
        }
        let budget = match step.timeout_minutes {
            Some(minutes) => remaining.min(Duration::from_secs(u64::from(minutes) * 60)),
            None => remaining,
        };

        let (tx, rx) = mpsc::channel(256);
        let collector = tokio::spawn(collect_output(rx, self.config.output_tail));
        let outcome = tokio::time::timeout(budget, self.runner.execute(&step_ctx, tx)).await;

        let result = match outcome {
            Err(_) => {
                // Grandchildren may still hold the pipes open.
                collector.abort();
                return Err(Error::StepTimeout {
                    seconds: budget.as_secs(),
                }
                .into());
            }
            Ok(result) => {
                if let Ok(lines) = collector.await {
                    for line in lines {
                        if run.tail.len() == self.config.output_tail {
                            run.tail.pop_front();
                        }
                        run.tail.push_back(line);
                    }
                }
                result?
            }
        };
        if !result.success {
            return Err(Error::StepFailed {
                exit_code: result.exit_code,
                message: step_ctx.command.clone(),
            }
            .into());
        }

        for declaration in &step.produces {
            let path = run
                .workdir
                .join(run.interpolation.interpolate(&declaration.path));
            let data = match tokio::fs::read(&path).await {
                Ok(data) => data,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    return Err(StepError {
                        kind: FailureKind::ArtifactMissing,
                        exit_code: Some(result.exit_code),
                        message: format!(
                            "declared artifact {} not found at {}",
                            declaration.name,
                            path.display()
                        ),
                    });
                }
                Err(e) => return Err(Error::from(e).into()),
            };
            let key = ArtifactKey::new(
                run.instance.group.clone(),
                run.instance.binding.clone(),
                declaration.name.clone(),
            );
            self.store.put(&key, data).await?;
            info!(artifact = %key, "Published artifact");
            run.artifacts.push(key);
        }

        Ok(result.exit_code)
    }

    /// Copy an upstream artifact into the working directory. The lookup key
    /// uses this instance's binding restricted to the producer's axes.
    async fn fetch_artifact(
        &self,
        run: &InstanceRun<'_>,
        group: &str,
        name: &str,
        path: &str,
    ) -> Result<(), StepError> {
        let producer = self.pipeline.group(group).ok_or_else(|| {
            StepError::new(
                FailureKind::ArtifactMissing,
                format!("artifact {} requested from unknown group {}", name, group),
            )
        })?;
        if !run.group.depends_on.iter().any(|d| d == group) {
            return Err(StepError::new(
                FailureKind::ArtifactMissing,
                format!(
                    "group {} does not depend on {}, cannot read its artifacts",
                    run.group.name, group
                ),
            ));
        }

        let axes: Vec<&str> = producer
            .matrix
            .as_ref()
            .map(|m| m.axes.iter().map(|a| a.name.as_str()).collect())
            .unwrap_or_default();
        let binding = run.instance.binding.project(axes.iter().copied()).ok_or_else(|| {
            StepError::new(
                FailureKind::ArtifactMissing,
                format!(
                    "binding {} does not cover the axes {} of group {}",
                    run.instance.binding,
                    axes.join(", "),
                    group
                ),
            )
        })?;

        let key = ArtifactKey::new(group, binding, name);
        let artifact = self.store.get(&key).await?;

        let target = run.workdir.join(run.interpolation.interpolate(path));
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(Error::from)?;
        }
        tokio::fs::write(&target, &artifact.data)
            .await
            .map_err(Error::from)?;
        debug!(artifact = %key, path = %target.display(), "Fetched artifact");
        Ok(())
    }
}

/// Drain a step's output into the log, keeping the last `keep` lines.
async fn collect_output(mut rx: mpsc::Receiver<OutputLine>, keep: usize) -> Vec<String> {
    let mut tail = VecDeque::with_capacity(keep);
    while let Some(line) = rx.recv().await {
        match line.stream {
            OutputStream::Stdout => debug!(target: "shipyard::output", "{}", line.content),
            OutputStream::Stderr => {
                debug!(target: "shipyard::output", stream = "stderr", "{}", line.content)
            }
        }
        if keep == 0 {
            continue;
        }
        if tail.len() == keep {
            tail.pop_front();
        }
        tail.push_back(line.content);
    }
    tail.into()
}

fn mark_not_run(records: &mut Vec<StepRecord>, steps: &[StepDefinition], from: usize) {
    for (ordinal, step) in steps.iter().enumerate().skip(from) {
        records.push(StepRecord {
            ordinal,
            name: step.name.clone(),
            status: StepStatus::NotRun,
            exit_code: None,
            duration_ms: 0,
        });
    }
}

#[async_trait]
impl JobExecutor for ExecutionContext {
    async fn execute(
        &self,
        instance: &JobInstance,
        ctx: &RunContext,
        cancel: &CancellationFlag,
    ) -> JobOutcome {
        let attrs = CiAttributes::new()
            .run(ctx.run_id.to_string())
            .group(&instance.group)
            .job(instance.id.to_string(), instance.binding.to_string());
        let span = job_span(&attrs);

        async move {
            let started_at = chrono::Utc::now();
            let Some(group) = self.pipeline.group(&instance.group) else {
                return JobOutcome::failed(
                    FailureKind::Internal,
                    None,
                    format!("unknown group {}", instance.group),
                );
            };

            let workdir = self.instance_dir(ctx, instance);
            if let Err(e) = self.prepare_workdir(&workdir).await {
                return JobOutcome::failed(
                    FailureKind::Internal,
                    None,
                    format!("failed to prepare {}: {}", workdir.display(), e),
                );
            }

            let mut interpolation = InterpolationContext::new();
            interpolation.variables = self.pipeline.variables.clone();
            interpolation.variables.extend(group.env.clone());
            interpolation.matrix = instance.matrix_values();
            interpolation.bindings = ctx.bindings.clone();
            interpolation.run_id = Some(ctx.run_id.to_string());

            let mut gate_ctx = ctx.gate_context().with_binding(&instance.binding);
            for (k, v) in &instance.variables {
                gate_ctx.matrix.entry(k.clone()).or_insert_with(|| v.clone());
            }

            let base_env = self.base_env(instance, ctx, group, &workdir, &interpolation);
            let mut run = InstanceRun {
                instance,
                group,
                workdir,
                interpolation,
                gate_ctx,
                base_env,
                deadline: Instant::now() + Duration::from_secs(instance.timeout_seconds),
                tail: VecDeque::new(),
                records: Vec::new(),
                artifacts: Vec::new(),
            };

            info!(job = %instance.display_name, steps = group.steps.len(), "Starting job");
            let failure = self.run_steps(&mut run, cancel).await;

            let exit_code = run
                .records
                .iter()
                .rev()
                .find(|r| r.status == StepStatus::Failed)
                .and_then(|r| r.exit_code)
                .or(if failure.is_none() { Some(0) } else { None });
            let status = match &failure {
                None => JobStatus::Succeeded,
                Some(f) if f.kind == FailureKind::Cancelled => JobStatus::Cancelled,
                Some(_) => JobStatus::Failed,
            };
            info!(job = %instance.display_name, status = ?status, "Job finished");

            JobOutcome {
                status,
                exit_code,
                failure,
                steps: run.records,
                artifacts: run.artifacts,
                output_tail: run.tail.into(),
                started_at: Some(started_at),
                completed_at: Some(chrono::Utc::now()),
            }
        }
        .instrument(span)
        .await
    }
}
