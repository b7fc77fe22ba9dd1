//! Directory-backed snapshots: `versions/<v>.json` plus `active.json`.

use super::{PersistedState, SnapshotBackend};
use crate::error::BackendError;
use crate::types::VersionId;
use crate::version::VersionDocument;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;

#[derive(Debug, Serialize, Deserialize)]
struct ActivePointer {
    active: VersionId,
}

/// Snapshots as `versions/<v>.json`, the pointer as `active.json`.
///
/// Every file is written to a temporary sibling and renamed into place.
#[derive(Debug, Clone)]
pub struct JsonFileBackend {
    root: PathBuf,
}

impl JsonFileBackend {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn versions_dir(&self) -> PathBuf {
        self.root.join("versions")
    }

    fn snapshot_path(&self, version: VersionId) -> PathBuf {
        self.versions_dir().join(format!("{version}.json"))
    }

    fn active_path(&self) -> PathBuf {
        self.root.join("active.json")
    }
}

async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), BackendError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    fs::write(&tmp, bytes).await?;
    fs::rename(&tmp, path).await?;
    Ok(())
}

#[async_trait]
impl SnapshotBackend for JsonFileBackend {
    async fn persist_snapshot(&self, snapshot: &VersionDocument) -> Result<(), BackendError> {
        let bytes = serde_json::to_vec_pretty(snapshot)?;
        write_atomic(&self.snapshot_path(snapshot.meta.version_id), &bytes).await
    }

    async fn persist_active(&self, version: VersionId) -> Result<(), BackendError> {
        let bytes = serde_json::to_vec_pretty(&ActivePointer { active: version })?;
        write_atomic(&self.active_path(), &bytes).await
    }

    async fn remove_snapshot(&self, version: VersionId) -> Result<(), BackendError> {
        match fs::remove_file(self.snapshot_path(version)).await {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }

    async fn load(&self) -> Result<Option<PersistedState>, BackendError> {
        let active = match fs::read(self.active_path()).await {
            Ok(bytes) => Some(serde_json::from_slice::<ActivePointer>(&bytes)?.active),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => return Err(e.into()),
        };

        let mut snapshots = Vec::new();
        match fs::read_dir(self.versions_dir()).await {
            Ok(mut entries) => {
                while let Some(entry) = entries.next_entry().await? {
                    let path = entry.path();
                    if path.extension().and_then(|e| e.to_str()) != Some("json") {
                        continue;
                    }
                    let bytes = fs::read(&path).await?;
                    let snapshot: VersionDocument = serde_json::from_slice(&bytes).map_err(|e| {
                        BackendError::Corrupt(format!("{}: {e}", path.display()))
                    })?;
                    snapshots.push(snapshot);
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        if snapshots.is_empty() && active.is_none() {
            return Ok(None);
        }
        snapshots.sort_by_key(|s| s.meta.version_id);
        Ok(Some(PersistedState { snapshots, active }))
    }
}
