//! Pipeline scheduling and orchestration for Shipyard.
//!
//! - [`triggers`] decides whether an event starts a run.
//! - [`matrix`] expands a job group into its instances.
//! - [`dag`] validates the group graph and orders it.
//! - [`scheduler`] runs the graph to a terminal [`shipyard_core::run::Run`].

pub mod dag;
pub mod matrix;
pub mod scheduler;
pub mod triggers;

pub use dag::{DagBuilder, GroupNode, JobGraph};
pub use matrix::MatrixExpander;
pub use scheduler::{DEFAULT_MAX_RUNNERS, JobGraphScheduler};
pub use triggers::{RunDecision, TriggerEvaluator};
