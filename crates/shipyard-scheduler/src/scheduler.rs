//! Main scheduler orchestration.
//!
//! Groups are released by dependency count: a group becomes ready when every
//! group it depends on has finished with all instances succeeded. Ready
//! instances run concurrently on a [`JoinSet`], bounded by a runner semaphore.

use crate::dag::JobGraph;
use futures::FutureExt;
use shipyard_core::cancel::CancellationFlag;
use shipyard_core::gate;
use shipyard_core::ports::JobExecutor;
use shipyard_core::run::{
    FailureKind, GroupRun, GroupStatus, JobOutcome, JobRecord, JobStatus, Run, RunContext,
    RunStatus,
};
use shipyard_trace::{CiAttributes, group_span, run_span};
use std::collections::{HashMap, VecDeque};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{Instrument, error, info, warn};

pub const DEFAULT_MAX_RUNNERS: usize = 4;

/// Per-group bookkeeping while a run is in flight.
struct GroupState {
    status: GroupStatus,
    reason: Option<String>,
    unresolved_deps: usize,
    running: usize,
    outcomes: Vec<Option<JobOutcome>>,
    cancel: CancellationFlag,
}

/// Runs a validated [`JobGraph`] to completion.
pub struct JobGraphScheduler {
    executor: Arc<dyn JobExecutor>,
    max_runners: usize,
}

impl JobGraphScheduler {
    pub fn new(executor: Arc<dyn JobExecutor>) -> Self {
        Self {
            executor,
            max_runners: DEFAULT_MAX_RUNNERS,
        }
    }

    /// Maximum number of instances executing at once across all groups.
    pub fn with_max_runners(mut self, max_runners: usize) -> Self {
        self.max_runners = max_runners.max(1);
        self
    }

    /// Execute every group of the graph and return the terminal run record.
    ///
    /// Cancelling `cancel` stops new instances from starting; running
    /// instances observe it between steps.
    pub async fn run(&self, graph: &JobGraph, ctx: RunContext, cancel: CancellationFlag) -> Run {
        let attrs = CiAttributes::new()
            .pipeline(&ctx.pipeline_name)
            .run(ctx.run_id.to_string())
            .event(ctx.event.kind().as_str(), ctx.event.git_ref());
        let span = run_span(&attrs);
        self.run_inner(graph, ctx, cancel).instrument(span).await
    }

    async fn run_inner(&self, graph: &JobGraph, ctx: RunContext, cancel: CancellationFlag) -> Run {
        let started = Instant::now();
        let started_at = chrono::Utc::now();
        let ctx = Arc::new(ctx);
        let runners = Arc::new(Semaphore::new(self.max_runners));
        let gate_ctx = ctx.gate_context();

        info!(
            run_id = %ctx.run_id,
            groups = graph.len(),
            instances = graph.instance_count(),
            max_runners = self.max_runners,
            "Starting run"
        );

        let order: Vec<&str> = graph
            .topological_order()
            .into_iter()
            .map(|n| n.name.as_str())
            .collect();
        let mut states: HashMap<&str, GroupState> = graph
            .topological_order()
            .into_iter()
            .map(|node| {
                (
                    node.name.as_str(),
                    GroupState {
                        status: GroupStatus::Pending,
                        reason: None,
                        unresolved_deps: graph.predecessors(&node.name).len(),
                        running: 0,
                        outcomes: vec![None; node.instances.len()],
                        cancel: cancel.child(),
                    },
                )
            })
            .collect();

        let mut ready: VecDeque<&str> = graph
            .roots()
            .into_iter()
            .map(|n| n.name.as_str())
            .collect();
        let mut tasks: JoinSet<(String, usize, JobOutcome)> = JoinSet::new();
        let mut fatal: Option<String> = None;

        loop {
            while let Some(name) = ready.pop_front() {
                let Some(node) = graph.group(name) else {
                    continue;
                };
                let Some(state) = states.get_mut(name) else {
                    continue;
                };
                if state.status != GroupStatus::Pending {
                    continue;
                }

                if cancel.is_cancelled() {
                    state.status = GroupStatus::Cancelled;
                    state.reason = Some("run cancelled before group started".to_string());
                    for slot in state.outcomes.iter_mut() {
                        *slot = Some(JobOutcome::cancelled_before_start());
                    }
                    propagate(graph, &mut states, name, GroupStatus::Cancelled);
                    continue;
                }

                if let Some(predicate) = &node.definition.condition
                    && !gate::satisfied(predicate, &gate_ctx)
                {
                    info!(group = %name, "Group condition not satisfied, skipping");
                    state.status = GroupStatus::Skipped;
                    state.reason = Some("condition not satisfied".to_string());
                    propagate(graph, &mut states, name, GroupStatus::Skipped);
                    continue;
                }

                state.status = GroupStatus::Running;
                state.running = node.instances.len();
                let group_limit = node
                    .definition
                    .matrix
                    .as_ref()
                    .and_then(|m| m.max_parallel)
                    .map(|n| Arc::new(Semaphore::new(n.max(1) as usize)));

                let attrs = CiAttributes::new()
                    .run(ctx.run_id.to_string())
                    .group(name);
                info!(group = %name, instances = node.instances.len(), "Scheduling group");

                for instance in node.instances.iter().cloned() {
                    let executor = self.executor.clone();
                    let ctx = ctx.clone();
                    let runners = runners.clone();
                    let group_limit = group_limit.clone();
                    let group_cancel = state.cancel.clone();
                    let group_name = name.to_string();
                    let span = group_span(&attrs);

                    tasks.spawn(
                        async move {
                            let index = instance.index;
                            let _group_permit = match group_limit {
                                Some(limit) => limit.acquire_owned().await.ok(),
                                None => None,
                            };
                            let Ok(_permit) = runners.acquire_owned().await else {
                                return (group_name, index, JobOutcome::cancelled_before_start());
                            };
                            if group_cancel.is_cancelled() {
                                return (group_name, index, JobOutcome::cancelled_before_start());
                            }

                            let outcome = AssertUnwindSafe(executor.execute(
                                &instance,
                                &ctx,
                                &group_cancel,
                            ))
                            .catch_unwind()
                            .await
                            .unwrap_or_else(|_| {
                                JobOutcome::failed(
                                    FailureKind::Internal,
                                    None,
                                    "executor panicked",
                                )
                            });
                            (group_name, index, outcome)
                        }
                        .instrument(span),
                    );
                }
            }

            let Some(joined) = tasks.join_next().await else {
                break;
            };
            let (name, index, outcome) = match joined {
                Ok(result) => result,
                Err(e) => {
                    // Only reachable if the task itself was aborted.
                    error!(error = %e, "Job task ended abnormally");
                    fatal.get_or_insert_with(|| format!("job task ended abnormally: {}", e));
                    cancel.cancel();
                    continue;
                }
            };

            let Some(node) = graph.group(&name) else {
                continue;
            };
            let node_name = node.name.as_str();
            let Some(state) = states.get_mut(node_name) else {
                continue;
            };

            match &outcome.failure {
                Some(failure) if failure.kind == FailureKind::ArtifactConflict => {
                    error!(
                        group = %node_name,
                        error = %failure.message,
                        "Artifact conflict, aborting run"
                    );
                    fatal.get_or_insert_with(|| failure.message.clone());
                    cancel.cancel();
                }
                Some(failure) if outcome.status == JobStatus::Failed => {
                    warn!(
                        group = %node_name,
                        instance = index,
                        kind = %failure.kind,
                        step = failure.step.as_deref().unwrap_or(""),
                        "Job failed"
                    );
                    if node.definition.fail_fast() {
                        state.cancel.cancel();
                    }
                }
                _ => {}
            }

            if let Some(slot) = state.outcomes.get_mut(index) {
                *slot = Some(outcome);
            }
            state.running = state.running.saturating_sub(1);
            if state.running > 0 {
                continue;
            }

            let status = aggregate(&state.outcomes);
            state.status = status;
            info!(group = %node_name, status = ?status, "Group finished");

            if status == GroupStatus::Succeeded {
                for succ in graph.successors(node_name) {
                    if let Some(s) = states.get_mut(succ.name.as_str()) {
                        s.unresolved_deps = s.unresolved_deps.saturating_sub(1);
                        if s.unresolved_deps == 0 && s.status == GroupStatus::Pending {
                            ready.push_back(succ.name.as_str());
                        }
                    }
                }
            } else {
                propagate(graph, &mut states, node_name, status);
            }
        }

        let mut groups = Vec::with_capacity(order.len());
        for name in &order {
            let Some(node) = graph.group(name) else {
                continue;
            };
            let Some(state) = states.remove(name) else {
                continue;
            };
            let (status, reason) = match state.status {
                GroupStatus::Pending => (
                    GroupStatus::Blocked,
                    Some("dependencies never resolved".to_string()),
                ),
                GroupStatus::Running => (
                    GroupStatus::Failed,
                    Some("job task ended abnormally".to_string()),
                ),
                other => (other, state.reason),
            };
            let jobs = node
                .instances
                .iter()
                .zip(state.outcomes)
                .filter_map(|(instance, outcome)| {
                    outcome.map(|outcome| JobRecord {
                        instance: instance.clone(),
                        outcome,
                    })
                })
                .collect();
            groups.push(GroupRun {
                name: name.to_string(),
                status,
                reason,
                jobs,
            });
        }

        // A cancel that lands after the last instance finished changes nothing.
        let status = if fatal.is_some() {
            RunStatus::Failed
        } else if groups.iter().any(|g| g.status == GroupStatus::Cancelled) {
            RunStatus::Cancelled
        } else if groups
            .iter()
            .any(|g| matches!(g.status, GroupStatus::Failed | GroupStatus::Blocked))
        {
            RunStatus::Failed
        } else {
            RunStatus::Succeeded
        };

        let duration_ms = started.elapsed().as_millis() as u64;
        info!(status = ?status, duration_ms, "Run finished");

        Run {
            id: ctx.run_id,
            pipeline_name: ctx.pipeline_name.clone(),
            event: ctx.event.clone(),
            status,
            error: fatal,
            groups,
            started_at: Some(started_at),
            completed_at: Some(chrono::Utc::now()),
            duration_ms: Some(duration_ms),
        }
    }
}

/// Group status from its instances' outcomes.
fn aggregate(outcomes: &[Option<JobOutcome>]) -> GroupStatus {
    let statuses: Vec<JobStatus> = outcomes
        .iter()
        .map(|o| o.as_ref().map_or(JobStatus::Cancelled, |o| o.status))
        .collect();
    if statuses.iter().any(|s| *s == JobStatus::Failed) {
        GroupStatus::Failed
    } else if statuses.iter().any(|s| *s == JobStatus::Cancelled) {
        GroupStatus::Cancelled
    } else {
        GroupStatus::Succeeded
    }
}

/// Resolve every pending descendant of `origin` after it finished without
/// success. Skips flow down as skips, cancellation as cancellation, and
/// anything else blocks.
fn propagate(
    graph: &JobGraph,
    states: &mut HashMap<&str, GroupState>,
    origin: &str,
    origin_status: GroupStatus,
) {
    let (status, verb) = match origin_status {
        GroupStatus::Skipped => (GroupStatus::Skipped, "was skipped"),
        GroupStatus::Cancelled => (GroupStatus::Cancelled, "was cancelled"),
        _ => (GroupStatus::Blocked, "did not succeed"),
    };

    let mut stack = vec![origin.to_string()];
    while let Some(current) = stack.pop() {
        for succ in graph.successors(&current) {
            let Some(state) = states.get_mut(succ.name.as_str()) else {
                continue;
            };
            if state.status != GroupStatus::Pending {
                continue;
            }
            state.status = status;
            state.reason = Some(format!("dependency {} {}", current, verb));
            if status == GroupStatus::Cancelled {
                for slot in state.outcomes.iter_mut() {
                    *slot = Some(JobOutcome::cancelled_before_start());
                }
            }
            stack.push(succ.name.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dag::DagBuilder;
    use async_trait::async_trait;
    use shipyard_core::event::TriggerEvent;
    use shipyard_core::ids::RunId;
    use shipyard_core::pipeline::PipelineDefinition;
    use shipyard_core::run::JobInstance;
    use std::collections::BTreeMap;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Fails instances whose display name is listed; records start order.
    #[derive(Default)]
    struct MockExecutor {
        fail: Vec<String>,
        started: Mutex<Vec<String>>,
        in_flight: AtomicUsize,
        peak: AtomicUsize,
        delay_ms: u64,
    }

    #[async_trait]
    impl JobExecutor for MockExecutor {
        async fn execute(
            &self,
            instance: &JobInstance,
            _ctx: &RunContext,
            cancel: &CancellationFlag,
        ) -> JobOutcome {
            self.started.lock().unwrap().push(instance.display_name.clone());
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(self.delay_ms)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            if self.fail.contains(&instance.display_name) {
                return JobOutcome::failed(FailureKind::StepFailed, Some("test".into()), "exit 1");
            }
            if cancel.is_cancelled() {
                return JobOutcome::failed(FailureKind::Cancelled, None, "cancelled");
            }
            JobOutcome::succeeded()
        }
    }

    fn context(event: TriggerEvent) -> RunContext {
        let mut bindings = BTreeMap::new();
        bindings.insert("event.kind".to_string(), event.kind().to_string());
        RunContext {
            run_id: RunId::new(),
            pipeline_name: "test".to_string(),
            event,
            bindings,
            variables: BTreeMap::new(),
        }
    }

    fn graph(yaml: &str) -> JobGraph {
        let pipeline = PipelineDefinition::from_yaml(yaml).unwrap();
        DagBuilder::new().build(&pipeline).unwrap()
    }

    const CHAIN: &str = r#"
name: chain
groups:
  - name: verify
    matrix:
      axes:
        - name: os
          values: [macos, windows, linux]
    steps:
      - { name: test, run: "true" }
  - name: build
    depends_on: [verify]
    steps:
      - { name: compile, run: "true" }
  - name: package
    depends_on: [build]
    steps:
      - { name: pack, run: "true" }
"#;

    #[tokio::test]
    async fn test_all_groups_succeed_in_order() {
        let executor = Arc::new(MockExecutor::default());
        let run = JobGraphScheduler::new(executor.clone())
            .run(&graph(CHAIN), context(TriggerEvent::push("main")), CancellationFlag::new())
            .await;

        assert_eq!(run.status, RunStatus::Succeeded);
        let started = executor.started.lock().unwrap().clone();
        assert_eq!(started.len(), 5);
        assert_eq!(&started[3..], &["build".to_string(), "package".to_string()]);
        assert!(run.error.is_none());
    }

    #[tokio::test]
    async fn test_failed_instance_blocks_dependents() {
        let executor = Arc::new(MockExecutor {
            fail: vec!["verify (os=linux)".to_string()],
            ..Default::default()
        });
        let run = JobGraphScheduler::new(executor.clone())
            .run(&graph(CHAIN), context(TriggerEvent::push("main")), CancellationFlag::new())
            .await;

        assert_eq!(run.status, RunStatus::Failed);
        let verify = run.group("verify").unwrap();
        assert_eq!(verify.status, GroupStatus::Failed);
        assert_eq!(verify.jobs.len(), 3);
        assert_eq!(run.failed_jobs().len(), 1);
        assert_eq!(run.group("build").unwrap().status, GroupStatus::Blocked);
        assert_eq!(run.group("package").unwrap().status, GroupStatus::Blocked);
        assert!(run.group("build").unwrap().jobs.is_empty());

        // Siblings are not aborted without fail-fast.
        let succeeded = verify
            .jobs
            .iter()
            .filter(|j| j.outcome.status == JobStatus::Succeeded)
            .count();
        assert_eq!(succeeded, 2);
        assert_eq!(executor.started.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_max_runners_bounds_concurrency() {
        let yaml = r#"
name: wide
groups:
  - name: fan
    matrix:
      axes:
        - name: n
          values: [1, 2, 3, 4, 5, 6]
    steps:
      - { name: s, run: "true" }
"#;
        let executor = Arc::new(MockExecutor {
            delay_ms: 20,
            ..Default::default()
        });
        let run = JobGraphScheduler::new(executor.clone())
            .with_max_runners(2)
            .run(&graph(yaml), context(TriggerEvent::push("main")), CancellationFlag::new())
            .await;

        assert_eq!(run.status, RunStatus::Succeeded);
        assert!(executor.peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_group_condition_skips_without_failing() {
        let yaml = r#"
name: gated
groups:
  - name: verify
    steps:
      - { name: s, run: "true" }
  - name: publish
    depends_on: [verify]
    if:
      event: release_created
    steps:
      - { name: upload, run: "true" }
  - name: announce
    depends_on: [publish]
    steps:
      - { name: post, run: "true" }
"#;
        let executor = Arc::new(MockExecutor::default());
        let scheduler = JobGraphScheduler::new(executor.clone());

        let run = scheduler
            .run(&graph(yaml), context(TriggerEvent::push("main")), CancellationFlag::new())
            .await;
        assert_eq!(run.status, RunStatus::Succeeded);
        assert_eq!(run.group("publish").unwrap().status, GroupStatus::Skipped);
        assert_eq!(run.group("announce").unwrap().status, GroupStatus::Skipped);

        let run = scheduler
            .run(&graph(yaml), context(TriggerEvent::release("v1")), CancellationFlag::new())
            .await;
        assert_eq!(run.group("publish").unwrap().status, GroupStatus::Succeeded);
        assert_eq!(run.group("announce").unwrap().status, GroupStatus::Succeeded);
    }

    #[tokio::test]
    async fn test_cancelled_run_starts_nothing() {
        let executor = Arc::new(MockExecutor::default());
        let cancel = CancellationFlag::new();
        cancel.cancel();

        let run = JobGraphScheduler::new(executor.clone())
            .run(&graph(CHAIN), context(TriggerEvent::push("main")), cancel)
            .await;

        assert_eq!(run.status, RunStatus::Cancelled);
        assert!(executor.started.lock().unwrap().is_empty());
        assert_eq!(run.group("verify").unwrap().status, GroupStatus::Cancelled);
        assert_eq!(run.group("package").unwrap().status, GroupStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_artifact_conflict_is_fatal() {
        struct Conflicting;

        #[async_trait]
        impl JobExecutor for Conflicting {
            async fn execute(
                &self,
                _instance: &JobInstance,
                _ctx: &RunContext,
                _cancel: &CancellationFlag,
            ) -> JobOutcome {
                JobOutcome::failed(
                    FailureKind::ArtifactConflict,
                    Some("compile".into()),
                    "Artifact already exists: build/binary",
                )
            }
        }

        let run = JobGraphScheduler::new(Arc::new(Conflicting))
            .run(&graph(CHAIN), context(TriggerEvent::push("main")), CancellationFlag::new())
            .await;

        assert_eq!(run.status, RunStatus::Failed);
        assert_eq!(run.error.as_deref(), Some("Artifact already exists: build/binary"));
    }

    /// Cancels the run flag from inside every instance of `group`, then
    /// reports success for it.
    struct CancelDuring {
        group: &'static str,
        run_cancel: CancellationFlag,
    }

    #[async_trait]
    impl JobExecutor for CancelDuring {
        async fn execute(
            &self,
            instance: &JobInstance,
            _ctx: &RunContext,
            _cancel: &CancellationFlag,
        ) -> JobOutcome {
            if instance.group == self.group {
                self.run_cancel.cancel();
            }
            JobOutcome::succeeded()
        }
    }

    #[tokio::test]
    async fn test_cancel_after_last_instance_keeps_success() {
        let cancel = CancellationFlag::new();
        let executor = Arc::new(CancelDuring {
            group: "package",
            run_cancel: cancel.clone(),
        });

        let run = JobGraphScheduler::new(executor)
            .run(&graph(CHAIN), context(TriggerEvent::push("main")), cancel.clone())
            .await;

        assert!(cancel.is_cancelled());
        assert_eq!(run.status, RunStatus::Succeeded);
        for group in ["verify", "build", "package"] {
            assert_eq!(run.group(group).unwrap().status, GroupStatus::Succeeded);
        }
    }

    #[tokio::test]
    async fn test_cancel_mid_run_cancels_remaining_groups() {
        let cancel = CancellationFlag::new();
        let executor = Arc::new(CancelDuring {
            group: "build",
            run_cancel: cancel.clone(),
        });

        let run = JobGraphScheduler::new(executor)
            .run(&graph(CHAIN), context(TriggerEvent::push("main")), cancel)
            .await;

        assert_eq!(run.status, RunStatus::Cancelled);
        assert_eq!(run.group("build").unwrap().status, GroupStatus::Succeeded);
        assert_eq!(run.group("package").unwrap().status, GroupStatus::Cancelled);
    }
}
