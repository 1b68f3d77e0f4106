//! Pipeline definition types.
//!
//! These types represent the user-authored pipeline YAML configuration.

use crate::gate::Predicate;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct PipelineDefinition {
    pub name: String,
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub triggers: Vec<TriggerConfig>,
    #[serde(default)]
    pub variables: BTreeMap<String, String>,
    pub groups: Vec<JobGroupDefinition>,
    #[serde(default = "default_timeout")]
    pub timeout_minutes: u32,
    #[serde(default)]
    pub concurrency: Option<ConcurrencyConfig>,
}

fn default_version() -> String {
    "1".to_string()
}

fn default_timeout() -> u32 {
    60
}

impl PipelineDefinition {
    /// Parse a pipeline from YAML. Structural checks (cycles, matrix shape)
    /// happen when the job graph is built.
    pub fn from_yaml(yaml: &str) -> crate::Result<Self> {
        serde_yaml::from_str(yaml).map_err(|e| crate::Error::Serialization(e.to_string()))
    }

    pub fn group(&self, name: &str) -> Option<&JobGroupDefinition> {
        self.groups.iter().find(|g| g.name == name)
    }

    /// Runner limit requested by the pipeline, if any.
    pub fn max_runners(&self) -> Option<usize> {
        self.concurrency.as_ref().map(|c| c.max_runners)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct TriggerConfig {
    #[serde(rename = "type")]
    pub kind: EventKind,
    #[serde(default)]
    pub branches: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub inputs: BTreeMap<String, InputDefinition>,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Push,
    PullRequest,
    ReleaseCreated,
    ManualDispatch,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Push => "push",
            EventKind::PullRequest => "pull_request",
            EventKind::ReleaseCreated => "release_created",
            EventKind::ManualDispatch => "manual_dispatch",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EventKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.replace('-', "_").as_str() {
            "push" => Ok(EventKind::Push),
            "pull_request" | "pr" => Ok(EventKind::PullRequest),
            "release_created" | "release" => Ok(EventKind::ReleaseCreated),
            "manual_dispatch" | "manual" => Ok(EventKind::ManualDispatch),
            other => Err(format!("Unknown event kind: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct InputDefinition {
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub default: Option<String>,
    #[serde(default)]
    pub required: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ConcurrencyConfig {
    #[serde(default = "default_max_runners")]
    pub max_runners: usize,
}

fn default_max_runners() -> usize {
    4
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct JobGroupDefinition {
    pub name: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(
        default,
        rename = "if",
        with = "serde_yaml::with::singleton_map_recursive"
    )]
    #[schemars(with = "Option<Predicate>")]
    pub condition: Option<Predicate>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    pub steps: Vec<StepDefinition>,
    #[serde(default)]
    pub matrix: Option<MatrixConfig>,
    #[serde(default)]
    pub timeout_minutes: Option<u32>,
    #[serde(default)]
    pub fail_fast: bool,
}

impl JobGroupDefinition {
    /// Fail-fast may be requested on the group or on its matrix.
    pub fn fail_fast(&self) -> bool {
        self.fail_fast || self.matrix.as_ref().is_some_and(|m| m.fail_fast)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct StepDefinition {
    pub name: String,
    pub run: String,
    #[serde(default = "default_shell")]
    pub shell: String,
    #[serde(default)]
    pub working_directory: Option<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(
        default,
        rename = "if",
        with = "serde_yaml::with::singleton_map_recursive"
    )]
    #[schemars(with = "Option<Predicate>")]
    pub condition: Option<Predicate>,
    #[serde(default)]
    pub continue_on_error: bool,
    #[serde(default)]
    pub produces: Vec<ArtifactDeclaration>,
    #[serde(default)]
    pub consumes: Vec<ArtifactRequest>,
    #[serde(default)]
    pub credentials: Vec<String>,
    #[serde(default)]
    pub timeout_minutes: Option<u32>,
}

fn default_shell() -> String {
    "sh".to_string()
}

impl StepDefinition {
    pub fn new(name: impl Into<String>, run: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            run: run.into(),
            shell: default_shell(),
            working_directory: None,
            env: BTreeMap::new(),
            condition: None,
            continue_on_error: false,
            produces: vec![],
            consumes: vec![],
            credentials: vec![],
            timeout_minutes: None,
        }
    }
}

/// A file a step leaves behind, published under `(group, binding, name)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ArtifactDeclaration {
    pub name: String,
    pub path: String,
}

/// An artifact fetched from an upstream group before the step runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ArtifactRequest {
    pub group: String,
    pub name: String,
    pub path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct MatrixConfig {
    #[serde(default)]
    pub axes: Vec<MatrixAxis>,
    #[serde(default)]
    pub include: Vec<BTreeMap<String, serde_json::Value>>,
    #[serde(default)]
    pub fail_fast: bool,
    #[serde(default)]
    pub max_parallel: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct MatrixAxis {
    pub name: String,
    pub values: Vec<serde_json::Value>,
}

/// Render a matrix scalar the way it appears in bindings and commands.
pub fn matrix_value_string(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Null => String::new(),
        _ => value.to_string(),
    }
}
