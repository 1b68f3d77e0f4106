//! Port traits (hexagonal architecture).
//!
//! These traits define the interfaces between the scheduling core and the
//! adapters that store artifacts and execute jobs.

use crate::Result;
use crate::artifact::{Artifact, ArtifactKey, ArtifactMeta};
use crate::cancel::CancellationFlag;
use crate::run::{JobInstance, JobOutcome, RunContext};
use async_trait::async_trait;

/// Write-once artifact storage scoped to a single run.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Store bytes under `key`. Fails with `Error::ArtifactConflict` if the
    /// key is already present; the existing content is left untouched.
    async fn put(&self, key: &ArtifactKey, data: Vec<u8>) -> Result<ArtifactMeta>;

    /// Fetch bytes. Fails with `Error::ArtifactMissing` if nothing was stored.
    async fn get(&self, key: &ArtifactKey) -> Result<Artifact>;

    async fn exists(&self, key: &ArtifactKey) -> Result<bool>;

    /// List stored artifacts, ordered by key.
    async fn list(&self) -> Result<Vec<ArtifactMeta>>;
}

/// Executes one job instance to a terminal outcome.
///
/// Failures of the job itself are reported in the returned [`JobOutcome`],
/// never as a panic or an `Err`.
#[async_trait]
pub trait JobExecutor: Send + Sync {
    async fn execute(
        &self,
        instance: &JobInstance,
        ctx: &RunContext,
        cancel: &CancellationFlag,
    ) -> JobOutcome;
}
