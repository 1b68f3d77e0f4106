//! Integration test infrastructure for Shipyard.
//!
//! [`TestContext`] runs pipelines end to end on the host shell with a
//! scratch working directory and an in-memory artifact store.
//! [`ScriptedExecutor`] stands in for the runner when a test only cares
//! about scheduling.
//!
//! # Usage
//!
//! ```ignore
//! use shipyard_tests::{PipelineFixture, TestContext};
//!
//! #[tokio::test]
//! async fn test_something() {
//!     let ctx = TestContext::new().unwrap();
//!     let run = ctx.run(&PipelineFixture::release(), TriggerEvent::push("main")).await.unwrap();
//! }
//! ```

pub mod context;
pub mod fixtures;
pub mod helpers;

pub use context::TestContext;
pub use fixtures::*;
pub use helpers::*;

/// Initialize test logging (call once per test binary).
pub fn init_test_logging() {
    use tracing_subscriber::{EnvFilter, fmt};

    let _ = fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("warn,shipyard_tests=debug")),
        )
        .with_test_writer()
        .try_init();
}
