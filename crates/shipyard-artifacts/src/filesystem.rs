//! Filesystem-backed artifact store.
//!
//! Layout under the root: `<group>/<binding>/<name>` holds the bytes and
//! `<group>/<binding>/<name>@meta.json` holds the [`ArtifactMeta`]. Path
//! components are escaped (see [`crate::keys`]), so `@` never occurs in an
//! artifact file name and sidecars cannot collide with artifacts.

use crate::keys::{content_digest, storage_path};
use async_trait::async_trait;
use shipyard_core::artifact::{Artifact, ArtifactKey, ArtifactMeta};
use shipyard_core::ports::ArtifactStore;
use shipyard_core::{Error, Result};
use shipyard_trace::artifact_span;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{Instrument, debug, warn};

const META_SUFFIX: &str = "@meta.json";
const TMP_MARKER: &str = "@tmp-";

/// Artifact store rooted at a per-run directory.
///
/// Content is written to a temporary file first and then hard-linked into
/// place; linking fails if the target exists, which makes the check-and-insert
/// atomic and never exposes partially written bytes.
#[derive(Debug, Clone)]
pub struct FilesystemArtifactStore {
    root_dir: PathBuf,
}

impl FilesystemArtifactStore {
    pub fn new(root_dir: impl Into<PathBuf>) -> Self {
        Self {
            root_dir: root_dir.into(),
        }
    }

    pub fn root_dir(&self) -> &Path {
        &self.root_dir
    }

    fn data_path(&self, key: &ArtifactKey) -> PathBuf {
        self.root_dir.join(storage_path(key))
    }

    fn meta_path(data_path: &Path) -> PathBuf {
        Self::sibling(data_path, META_SUFFIX)
    }

    fn sibling(data_path: &Path, suffix: &str) -> PathBuf {
        let mut name = data_path.as_os_str().to_owned();
        name.push(suffix);
        PathBuf::from(name)
    }

    async fn read_meta(path: &Path) -> Result<ArtifactMeta> {
        let raw = tokio::fs::read(path).await?;
        Ok(serde_json::from_slice(&raw)?)
    }
}

#[async_trait]
impl ArtifactStore for FilesystemArtifactStore {
    async fn put(&self, key: &ArtifactKey, data: Vec<u8>) -> Result<ArtifactMeta> {
        let span = artifact_span("put", &key.to_string());
        async move {
            let path = self.data_path(key);
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            if tokio::fs::try_exists(&path).await? {
                return Err(Error::ArtifactConflict(key.to_string()));
            }

            let tmp = Self::sibling(
                &path,
                &format!("{}{}", TMP_MARKER, uuid::Uuid::new_v4().simple()),
            );
            tokio::fs::write(&tmp, &data).await?;

            let linked = tokio::fs::hard_link(&tmp, &path).await;
            if let Err(e) = tokio::fs::remove_file(&tmp).await {
                warn!(
                    path = %tmp.display(),
                    error = %e,
                    "Failed to remove temporary artifact file"
                );
            }
            match linked {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    return Err(Error::ArtifactConflict(key.to_string()));
                }
                Err(e) => return Err(e.into()),
            }

            let meta = ArtifactMeta {
                key: key.clone(),
                size_bytes: data.len() as u64,
                sha256: content_digest(&data),
                created_at: chrono::Utc::now(),
            };
            tokio::fs::write(Self::meta_path(&path), serde_json::to_vec_pretty(&meta)?).await?;

            debug!(key = %key, path = %path.display(), size = meta.size_bytes, "Stored artifact");
            Ok(meta)
        }
        .instrument(span)
        .await
    }

    async fn get(&self, key: &ArtifactKey) -> Result<Artifact> {
        let path = self.data_path(key);
        let data = match tokio::fs::read(&path).await {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(Error::ArtifactMissing(key.to_string()));
            }
            Err(e) => return Err(e.into()),
        };

        let meta_path = Self::meta_path(&path);
        let meta = match Self::read_meta(&meta_path).await {
            Ok(meta) => meta,
            Err(e) => {
                warn!(
                    key = %key,
                    path = %meta_path.display(),
                    error = %e,
                    "Artifact metadata unreadable, rebuilding from content"
                );
                ArtifactMeta {
                    key: key.clone(),
                    size_bytes: data.len() as u64,
                    sha256: content_digest(&data),
                    created_at: chrono::Utc::now(),
                }
            }
        };

        Ok(Artifact { meta, data })
    }

    async fn exists(&self, key: &ArtifactKey) -> Result<bool> {
        Ok(tokio::fs::try_exists(self.data_path(key)).await?)
    }

    async fn list(&self) -> Result<Vec<ArtifactMeta>> {
        if !tokio::fs::try_exists(&self.root_dir).await? {
            return Ok(vec![]);
        }

        let mut metas = Vec::new();
        let mut dirs = vec![self.root_dir.clone()];
        while let Some(dir) = dirs.pop() {
            let mut read_dir = tokio::fs::read_dir(&dir).await?;
            while let Some(entry) = read_dir.next_entry().await? {
                let path = entry.path();
                if entry.file_type().await?.is_dir() {
                    dirs.push(path);
                    continue;
                }
                let is_meta = path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.ends_with(META_SUFFIX));
                if !is_meta {
                    continue;
                }
                match Self::read_meta(&path).await {
                    Ok(meta) => metas.push(meta),
                    Err(e) => warn!(
                        path = %path.display(),
                        error = %e,
                        "Skipping unreadable artifact metadata"
                    ),
                }
            }
        }

        metas.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(metas)
    }
}
