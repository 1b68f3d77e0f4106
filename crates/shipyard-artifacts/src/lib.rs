//! Write-once artifact storage for Shipyard runs.
//!
//! Both stores implement [`shipyard_core::ports::ArtifactStore`]: a `put`
//! to a key that already holds content fails with `ArtifactConflict` and
//! leaves the stored bytes untouched.

pub mod filesystem;
pub mod keys;
pub mod memory;

pub use filesystem::FilesystemArtifactStore;
pub use keys::{binding_component, content_digest, escape_component, storage_path};
pub use memory::MemoryArtifactStore;
