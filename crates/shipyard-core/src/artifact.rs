//! Artifact identity and metadata.

use crate::run::MatrixBinding;
use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Address of an artifact: the producing group, the producing instance's
/// binding, and the declared name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
pub struct ArtifactKey {
    pub group: String,
    pub binding: MatrixBinding,
    pub name: String,
}

impl ArtifactKey {
    pub fn new(group: impl Into<String>, binding: MatrixBinding, name: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            binding,
            name: name.into(),
        }
    }
}

impl fmt::Display for ArtifactKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.binding.is_empty() {
            write!(f, "{}/{}", self.group, self.name)
        } else {
            write!(f, "{}[{}]/{}", self.group, self.binding, self.name)
        }
    }
}

/// Metadata recorded alongside stored bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ArtifactMeta {
    pub key: ArtifactKey,
    pub size_bytes: u64,
    /// Hex-encoded SHA-256 of the content.
    pub sha256: String,
    pub created_at: DateTime<Utc>,
}

/// Stored artifact bytes plus metadata.
#[derive(Debug, Clone)]
pub struct Artifact {
    pub meta: ArtifactMeta,
    pub data: Vec<u8>,
}
