//! Test context for running pipelines end to end.

use anyhow::bail;
use shipyard_artifacts::MemoryArtifactStore;
use shipyard_core::{CancellationFlag, PipelineDefinition, Run, RunContext, RunId, TriggerEvent};
use shipyard_runner::{ExecutionConfig, ExecutionContext, ShellRunner};
use shipyard_scheduler::{DEFAULT_MAX_RUNNERS, DagBuilder, JobGraphScheduler, TriggerEvaluator};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;
use tracing::debug;

/// Scratch workspace plus artifact store for one test.
///
/// Drop this to remove the working directories.
pub struct TestContext {
    dir: TempDir,
    pub store: Arc<MemoryArtifactStore>,
    pub env: BTreeMap<String, String>,
    pub max_runners: usize,
}

impl TestContext {
    pub fn new() -> anyhow::Result<Self> {
        crate::init_test_logging();
        Ok(Self {
            dir: tempfile::tempdir()?,
            store: Arc::new(MemoryArtifactStore::new()),
            env: BTreeMap::new(),
            max_runners: DEFAULT_MAX_RUNNERS,
        })
    }

    /// Add a variable visible to every step.
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn with_max_runners(mut self, max_runners: usize) -> Self {
        self.max_runners = max_runners;
        self
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn work_root(&self) -> PathBuf {
        self.dir.path().join("work")
    }

    /// Evaluate the event, then execute the pipeline. Fails if the event
    /// does not start a run or the pipeline is invalid.
    pub async fn run(
        &self,
        pipeline: &PipelineDefinition,
        event: TriggerEvent,
    ) -> anyhow::Result<Run> {
        self.run_with_cancel(pipeline, event, CancellationFlag::new())
            .await
    }

    pub async fn run_with_cancel(
        &self,
        pipeline: &PipelineDefinition,
        event: TriggerEvent,
        cancel: CancellationFlag,
    ) -> anyhow::Result<Run> {
        let decision = TriggerEvaluator::new().evaluate(pipeline, &event);
        if !decision.start {
            debug!(pipeline = %pipeline.name, reason = ?decision.reason, "Event rejected");
            bail!(
                "event did not start a run: {}",
                decision.reason.unwrap_or_default()
            );
        }

        let graph = DagBuilder::new()
            .build(pipeline)
            .map_err(shipyard_core::Error::from)?;
        let ctx = RunContext {
            run_id: RunId::new(),
            pipeline_name: pipeline.name.clone(),
            event,
            bindings: decision.bindings,
            variables: pipeline.variables.clone(),
        };

        let executor = ExecutionContext::new(
            Arc::new(pipeline.clone()),
            self.store.clone(),
            Arc::new(ShellRunner::new()),
            ExecutionConfig {
                work_root: self.work_root(),
                source_dir: Some(self.dir.path().to_path_buf()),
                env: self.env.clone(),
                ..Default::default()
            },
        );

        debug!(
            run_id = %ctx.run_id,
            work_root = %self.work_root().display(),
            max_runners = self.max_runners,
            "Starting test run"
        );
        let scheduler =
            JobGraphScheduler::new(Arc::new(executor)).with_max_runners(self.max_runners);
        let run = scheduler.run(&graph, ctx, cancel).await;
        debug!(run_id = %run.id, status = ?run.status, "Test run finished");
        Ok(run)
    }
}
