//! In-memory artifact store.

use crate::keys::content_digest;
use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use shipyard_core::artifact::{Artifact, ArtifactKey, ArtifactMeta};
use shipyard_core::ports::ArtifactStore;
use shipyard_core::{Error, Result};
use shipyard_trace::artifact_span;
use tracing::debug;

/// Artifact store backed by a concurrent map. Insertion goes through the
/// map's entry API, so check-and-insert is atomic per key.
#[derive(Debug, Default)]
pub struct MemoryArtifactStore {
    entries: DashMap<ArtifactKey, Artifact>,
}

impl MemoryArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl ArtifactStore for MemoryArtifactStore {
    async fn put(&self, key: &ArtifactKey, data: Vec<u8>) -> Result<ArtifactMeta> {
        let _span = artifact_span("put", &key.to_string()).entered();

        match self.entries.entry(key.clone()) {
            Entry::Occupied(_) => Err(Error::ArtifactConflict(key.to_string())),
            Entry::Vacant(slot) => {
                let meta = ArtifactMeta {
                    key: key.clone(),
                    size_bytes: data.len() as u64,
                    sha256: content_digest(&data),
                    created_at: chrono::Utc::now(),
                };
                slot.insert(Artifact {
                    meta: meta.clone(),
                    data,
                });
                debug!(key = %key, size = meta.size_bytes, "Stored artifact");
                Ok(meta)
            }
        }
    }

    async fn get(&self, key: &ArtifactKey) -> Result<Artifact> {
        let _span = artifact_span("get", &key.to_string()).entered();

        self.entries
            .get(key)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| Error::ArtifactMissing(key.to_string()))
    }

    async fn exists(&self, key: &ArtifactKey) -> Result<bool> {
        Ok(self.entries.contains_key(key))
    }

    async fn list(&self) -> Result<Vec<ArtifactMeta>> {
        let mut metas: Vec<ArtifactMeta> = self
            .entries
            .iter()
            .map(|entry| entry.value().meta.clone())
            .collect();
        metas.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(metas)
    }
}
