//! Run and execution types.

use crate::artifact::ArtifactKey;
use crate::event::TriggerEvent;
use crate::gate::GateContext;
use crate::ids::{JobId, RunId};
use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Ordered `(axis, value)` tuple identifying one matrix combination.
///
/// Order follows the axis declaration order of the group, so two bindings
/// built from the same definition compare and display identically.
#[derive(
    Debug,
    Clone,
    Default,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    JsonSchema,
)]
#[serde(transparent)]
pub struct MatrixBinding(Vec<(String, String)>);

impl MatrixBinding {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_pairs<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self(pairs.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }

    pub fn push(&mut self, axis: impl Into<String>, value: impl Into<String>) {
        self.0.push((axis.into(), value.into()));
    }

    pub fn get(&self, axis: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k == axis)
            .map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn axes(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|(k, _)| k.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Restrict the binding to the given axes, keeping this binding's order.
    /// Returns `None` when one of the requested axes is not bound here.
    pub fn project<'a>(&self, axes: impl IntoIterator<Item = &'a str>) -> Option<Self> {
        let wanted: Vec<&str> = axes.into_iter().collect();
        if wanted.iter().any(|axis| self.get(axis).is_none()) {
            return None;
        }
        Some(Self(
            self.0
                .iter()
                .filter(|(k, _)| wanted.contains(&k.as_str()))
                .cloned()
                .collect(),
        ))
    }
}

impl fmt::Display for MatrixBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.0.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
        write!(f, "{}", parts.join(", "))
    }
}

/// One schedulable concretization of a job group.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct JobInstance {
    pub id: JobId,
    pub group: String,
    pub index: usize,
    pub binding: MatrixBinding,
    /// Derived per-combination variables (include entries), excluding the binding.
    pub variables: BTreeMap<String, String>,
    pub display_name: String,
    pub timeout_seconds: u64,
}

impl JobInstance {
    /// Binding values and derived variables, as seen by `${{ matrix.* }}`.
    pub fn matrix_values(&self) -> BTreeMap<String, String> {
        let mut values = self.variables.clone();
        for (axis, value) in self.binding.iter() {
            values.insert(axis.to_string(), value.to_string());
        }
        values
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    StepFailed,
    ArtifactMissing,
    ArtifactConflict,
    Timeout,
    MissingCredential,
    Cancelled,
    Internal,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FailureKind::StepFailed => "step failed",
            FailureKind::ArtifactMissing => "artifact missing",
            FailureKind::ArtifactConflict => "artifact conflict",
            FailureKind::Timeout => "timeout",
            FailureKind::MissingCredential => "missing credential",
            FailureKind::Cancelled => "cancelled",
            FailureKind::Internal => "internal error",
        };
        f.write_str(s)
    }
}

/// Why an instance did not succeed, and where.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct JobFailure {
    pub kind: FailureKind,
    pub step: Option<String>,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Succeeded,
    Failed,
    /// Failed, but the step tolerates failure.
    Tolerated,
    /// Gate unsatisfied; counts as neither success nor failure.
    Skipped,
    /// Not reached because an earlier step halted the instance.
    NotRun,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct StepRecord {
    pub ordinal: usize,
    pub name: String,
    pub status: StepStatus,
    pub exit_code: Option<i32>,
    pub duration_ms: u64,
}

/// Terminal result of executing one job instance.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct JobOutcome {
    pub status: JobStatus,
    pub exit_code: Option<i32>,
    pub failure: Option<JobFailure>,
    pub steps: Vec<StepRecord>,
    pub artifacts: Vec<ArtifactKey>,
    /// Tail of the captured stdout/stderr.
    pub output_tail: Vec<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl JobOutcome {
    pub fn succeeded() -> Self {
        Self {
            status: JobStatus::Succeeded,
            exit_code: Some(0),
            failure: None,
            steps: vec![],
            artifacts: vec![],
            output_tail: vec![],
            started_at: None,
            completed_at: None,
        }
    }

    pub fn failed(kind: FailureKind, step: Option<String>, message: impl Into<String>) -> Self {
        let status = if kind == FailureKind::Cancelled {
            JobStatus::Cancelled
        } else {
            JobStatus::Failed
        };
        Self {
            status,
            exit_code: None,
            failure: Some(JobFailure {
                kind,
                step,
                message: message.into(),
            }),
            ..Self::succeeded()
        }
    }

    /// Outcome for an instance that never started because the run was cancelled.
    pub fn cancelled_before_start() -> Self {
        Self::failed(FailureKind::Cancelled, None, "cancelled before start")
    }

    pub fn is_success(&self) -> bool {
        self.status == JobStatus::Succeeded
    }
}

/// Immutable per-run metadata every instance sees.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunContext {
    pub run_id: RunId,
    pub pipeline_name: String,
    pub event: TriggerEvent,
    /// Resolved trigger bindings (`event.kind`, `event.ref`, `inputs.*`).
    pub bindings: BTreeMap<String, String>,
    pub variables: BTreeMap<String, String>,
}

impl RunContext {
    /// Manual inputs with defaults applied, keyed without the `inputs.` prefix.
    pub fn inputs(&self) -> BTreeMap<String, String> {
        self.bindings
            .iter()
            .filter_map(|(k, v)| {
                k.strip_prefix("inputs.")
                    .map(|name| (name.to_string(), v.clone()))
            })
            .collect()
    }

    pub fn gate_context(&self) -> GateContext {
        GateContext::for_event(&self.event, self.inputs())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum GroupStatus {
    /// Waiting on dependencies.
    Pending,
    Running,
    Succeeded,
    Failed,
    Cancelled,
    /// Group gate unsatisfied, or an upstream group was skipped.
    Skipped,
    /// Never scheduled because an upstream group did not succeed.
    Blocked,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct JobRecord {
    pub instance: JobInstance,
    pub outcome: JobOutcome,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct GroupRun {
    pub name: String,
    pub status: GroupStatus,
    pub reason: Option<String>,
    pub jobs: Vec<JobRecord>,
}

/// One execution of the whole pipeline for one event.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Run {
    pub id: RunId,
    pub pipeline_name: String,
    pub event: TriggerEvent,
    pub status: RunStatus,
    /// Set when the run aborted for a reason outside any single instance.
    pub error: Option<String>,
    pub groups: Vec<GroupRun>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<u64>,
}

impl Run {
    pub fn group(&self, name: &str) -> Option<&GroupRun> {
        self.groups.iter().find(|g| g.name == name)
    }

    /// Instances that ran and did not succeed, in group order.
    pub fn failed_jobs(&self) -> Vec<&JobRecord> {
        self.groups
            .iter()
            .flat_map(|g| g.jobs.iter())
            .filter(|j| j.outcome.status == JobStatus::Failed)
            .collect()
    }

    pub fn report(&self) -> RunReport {
        RunReport {
            run_id: self.id,
            pipeline_name: self.pipeline_name.clone(),
            event: self.event.kind().to_string(),
            status: self.status,
            error: self.error.clone(),
            duration_ms: self.duration_ms,
            groups: self
                .groups
                .iter()
                .map(|g| GroupReport {
                    name: g.name.clone(),
                    status: g.status,
                    reason: g.reason.clone(),
                    cells: g
                        .jobs
                        .iter()
                        .map(|j| CellReport {
                            binding: j.instance.binding.to_string(),
                            status: j.outcome.status,
                            exit_code: j.outcome.exit_code,
                            failed_step: j.outcome.failure.as_ref().and_then(|f| f.step.clone()),
                            failure: j.outcome.failure.as_ref().map(|f| f.kind),
                            message: j.outcome.failure.as_ref().map(|f| f.message.clone()),
                        })
                        .collect(),
                })
                .collect(),
        }
    }
}

/// Per-group, per-binding pass/fail matrix.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct RunReport {
    pub run_id: RunId,
    pub pipeline_name: String,
    pub event: String,
    pub status: RunStatus,
    pub error: Option<String>,
    pub duration_ms: Option<u64>,
    pub groups: Vec<GroupReport>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct GroupReport {
    pub name: String,
    pub status: GroupStatus,
    pub reason: Option<String>,
    pub cells: Vec<CellReport>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CellReport {
    pub binding: String,
    pub status: JobStatus,
    pub exit_code: Option<i32>,
    pub failed_step: Option<String>,
    pub failure: Option<FailureKind>,
    pub message: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_binding_display() {
        let binding = MatrixBinding::from_pairs([("os", "linux"), ("toolchain", "stable")]);
        assert_eq!(binding.to_string(), "os=linux, toolchain=stable");
        assert_eq!(MatrixBinding::empty().to_string(), "");
    }

    #[test]
    fn test_binding_projection() {
        let binding = MatrixBinding::from_pairs([("os", "linux"), ("python", "3.12")]);
        assert_eq!(
            binding.project(["os"]),
            Some(MatrixBinding::from_pairs([("os", "linux")]))
        );
        assert_eq!(binding.project(["arch"]), None);
        assert_eq!(binding.project([]), Some(MatrixBinding::empty()));
    }

    #[test]
    fn test_failed_outcome_status() {
        let outcome = JobOutcome::failed(FailureKind::Timeout, Some("build".into()), "too slow");
        assert_eq!(outcome.status, JobStatus::Failed);
        assert!(!outcome.is_success());

        let cancelled = JobOutcome::cancelled_before_start();
        assert_eq!(cancelled.status, JobStatus::Cancelled);
    }

    #[test]
    fn test_run_context_inputs_strip_prefix() {
        let mut bindings = BTreeMap::new();
        bindings.insert("event.kind".to_string(), "manual_dispatch".to_string());
        bindings.insert("inputs.publish".to_string(), "true".to_string());
        let ctx = RunContext {
            run_id: RunId::new(),
            pipeline_name: "p".to_string(),
            event: TriggerEvent::manual_dispatch(),
            bindings,
            variables: BTreeMap::new(),
        };

        let inputs = ctx.inputs();
        assert_eq!(inputs.len(), 1);
        assert_eq!(inputs.get("publish").map(String::as_str), Some("true"));
    }
}
