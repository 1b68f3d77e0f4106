//! Shipyard Core
//!
//! Core domain types, traits, and error handling for Shipyard.
//! This crate defines the shared vocabulary used by the scheduler, the
//! runner and the artifact store: pipeline definitions, trigger events,
//! gates, job instances and run records.

pub mod artifact;
pub mod cancel;
pub mod error;
pub mod event;
pub mod gate;
pub mod ids;
pub mod interpolation;
pub mod pipeline;
pub mod ports;
pub mod run;

pub use artifact::{Artifact, ArtifactKey, ArtifactMeta};
pub use cancel::CancellationFlag;
pub use error::{ConfigError, Error, Result};
pub use event::TriggerEvent;
pub use gate::{GateContext, Predicate};
pub use ids::*;
pub use pipeline::{EventKind, PipelineDefinition};
pub use run::{JobInstance, JobOutcome, MatrixBinding, Run, RunContext, RunStatus};
