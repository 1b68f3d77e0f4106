//! Job instance execution for Shipyard.
//!
//! [`ExecutionContext`] is the [`shipyard_core::ports::JobExecutor`] used by
//! the scheduler: it prepares a fresh working directory per instance, runs
//! the group's steps in order through a [`StepRunner`], and moves artifacts
//! in and out of the run's artifact store.

pub mod context;
pub mod runner;
pub mod shell;

pub use context::{ExecutionConfig, ExecutionContext};
pub use runner::{OutputLine, OutputStream, StepContext, StepResult, StepRunner};
pub use shell::ShellRunner;
