//! Error types for Shipyard.

use thiserror::Error;

/// Problems with a pipeline definition. Always fatal and surfaced before
/// any job runs.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("Pipeline declares no job groups")]
    EmptyPipeline,

    #[error("Cycle detected in job group dependencies involving: {}", .0.join(", "))]
    CycleDetected(Vec<String>),

    #[error("Duplicate job group name: {0}")]
    DuplicateGroup(String),

    #[error("Job group {group} depends on unknown group {dependency}")]
    UnknownDependency { group: String, dependency: String },

    #[error("Matrix axis {axis} of group {group} has no values")]
    EmptyMatrixAxis { group: String, axis: String },

    #[error("Matrix of group {0} declares neither axes nor include entries")]
    EmptyMatrix(String),

    #[error("Invalid include entry in group {group}: {message}")]
    InvalidInclude { group: String, message: String },

    #[error("Group {group} expands to the combination {binding} more than once")]
    DuplicateCombination { group: String, binding: String },

    #[error("Invalid pipeline definition: {0}")]
    InvalidPipeline(String),
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigError),

    // Artifact errors
    #[error("Artifact already exists: {0}")]
    ArtifactConflict(String),

    #[error("Artifact not found: {0}")]
    ArtifactMissing(String),

    // Step errors
    #[error("Step failed with exit code {exit_code}: {message}")]
    StepFailed { exit_code: i32, message: String },

    #[error("Step timeout after {seconds} seconds")]
    StepTimeout { seconds: u64 },

    #[error("Required credential not set: {0}")]
    MissingCredential(String),

    // Run errors
    #[error("Run cancelled")]
    RunCancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    pub fn is_configuration(&self) -> bool {
        matches!(self, Error::Configuration(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}
