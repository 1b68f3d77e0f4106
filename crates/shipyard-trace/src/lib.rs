//! Structured logging for Shipyard.
//!
//! Provides subscriber initialization (pretty or JSON output filtered by
//! `RUST_LOG`) and span constructors carrying pipeline attributes.

pub mod spans;
pub mod tracer;

pub use spans::{CiAttributes, artifact_span, group_span, job_span, run_span, step_span};
pub use tracer::{LogFormat, TracerError, TracingConfig, init_tracing};
