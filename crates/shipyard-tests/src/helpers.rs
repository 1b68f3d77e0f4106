//! Test helper functions and utilities.

use async_trait::async_trait;
use shipyard_core::cancel::CancellationFlag;
use shipyard_core::ports::JobExecutor;
use shipyard_core::run::{
    FailureKind, GroupStatus, JobInstance, JobOutcome, JobRecord, RunContext, StepStatus,
};
use shipyard_core::{PipelineDefinition, Run, RunId, TriggerEvent};
use shipyard_scheduler::TriggerEvaluator;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Executor that runs no commands: instances listed in `fail` fail, the rest
/// succeed after `delay`. Records start order and peak concurrency.
#[derive(Default)]
pub struct ScriptedExecutor {
    pub fail: Vec<String>,
    pub delay: Duration,
    started: Mutex<Vec<String>>,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl ScriptedExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the instance with this display name, e.g. `verify (os=linux)`.
    pub fn failing(mut self, display_name: impl Into<String>) -> Self {
        self.fail.push(display_name.into());
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Display names in the order instances started.
    pub fn started(&self) -> Vec<String> {
        self.started.lock().map(|s| s.clone()).unwrap_or_default()
    }

    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl JobExecutor for ScriptedExecutor {
    async fn execute(
        &self,
        instance: &JobInstance,
        _ctx: &RunContext,
        cancel: &CancellationFlag,
    ) -> JobOutcome {
        if let Ok(mut started) = self.started.lock() {
            started.push(instance.display_name.clone());
        }
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.fail.contains(&instance.display_name) {
            return JobOutcome::failed(FailureKind::StepFailed, Some("scripted".into()), "exit 1");
        }
        if cancel.is_cancelled() {
            return JobOutcome::failed(FailureKind::Cancelled, None, "cancelled");
        }
        JobOutcome::succeeded()
    }
}

/// Run context for an event the pipeline accepts.
pub fn run_context(pipeline: &PipelineDefinition, event: TriggerEvent) -> RunContext {
    let decision = TriggerEvaluator::new().evaluate(pipeline, &event);
    assert!(decision.start, "event rejected: {:?}", decision.reason);
    RunContext {
        run_id: RunId::new(),
        pipeline_name: pipeline.name.clone(),
        event,
        bindings: decision.bindings,
        variables: pipeline.variables.clone(),
    }
}

/// Status of a group, panicking if the run has no such group.
pub fn group_status(run: &Run, group: &str) -> GroupStatus {
    match run.group(group) {
        Some(g) => g.status,
        None => panic!("run has no group {}", group),
    }
}

/// The job of `group` whose binding has `axis` set to `value`.
pub fn job<'a>(run: &'a Run, group: &str, axis: &str, value: &str) -> &'a JobRecord {
    run.group(group)
        .and_then(|g| g.jobs.iter().find(|j| j.instance.binding.get(axis) == Some(value)))
        .unwrap_or_else(|| panic!("no job {}[{}={}]", group, axis, value))
}

/// Status of a named step within a job.
pub fn step_status(job: &JobRecord, step: &str) -> Option<StepStatus> {
    job.outcome
        .steps
        .iter()
        .find(|s| s.name == step)
        .map(|s| s.status)
}

/// Wait for a condition with timeout.
pub async fn wait_for<F, Fut>(timeout: Duration, interval: Duration, mut condition: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let start = std::time::Instant::now();
    while start.elapsed() < timeout {
        if condition().await {
            return true;
        }
        tokio::time::sleep(interval).await;
    }
    false
}

/// Assert that a future completes within a timeout.
pub async fn assert_completes_within<F, T>(future: F, timeout: Duration) -> T
where
    F: std::future::Future<Output = T>,
{
    tokio::time::timeout(timeout, future)
        .await
        .expect("Operation timed out")
}
