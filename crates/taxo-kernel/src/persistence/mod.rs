//! Durable storage for committed versions and the active pointer.

mod json_file;

pub use json_file::JsonFileBackend;

use crate::config::RetryPolicy;
use crate::error::{BackendError, TaxonomyError};
use crate::types::VersionId;
use crate::version::VersionDocument;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::future::Future;
use tracing::warn;

/// Everything a backend holds, as read back at startup.
#[derive(Debug, Clone, Default)]
pub struct PersistedState {
    /// Ascending by version id.
    pub snapshots: Vec<VersionDocument>,
    pub active: Option<VersionId>,
}

/// Storage for version snapshots.
///
/// Writes must be atomic per call: a reader never observes half a snapshot.
#[async_trait]
pub trait SnapshotBackend: Send + Sync + std::fmt::Debug {
    async fn persist_snapshot(&self, snapshot: &VersionDocument) -> Result<(), BackendError>;

    async fn persist_active(&self, version: VersionId) -> Result<(), BackendError>;

    async fn remove_snapshot(&self, version: VersionId) -> Result<(), BackendError>;

    /// `None` when nothing was ever persisted.
    async fn load(&self) -> Result<Option<PersistedState>, BackendError>;
}

/// Process-local backend. Share it behind an `Arc` to simulate a restart.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    inner: Mutex<MemoryState>,
}

#[derive(Debug, Default)]
struct MemoryState {
    snapshots: BTreeMap<VersionId, VersionDocument>,
    active: Option<VersionId>,
}

impl MemoryBackend {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot_count(&self) -> usize {
        self.inner.lock().snapshots.len()
    }
}

#[async_trait]
impl SnapshotBackend for MemoryBackend {
    async fn persist_snapshot(&self, snapshot: &VersionDocument) -> Result<(), BackendError> {
        self.inner
            .lock()
            .snapshots
            .insert(snapshot.meta.version_id, snapshot.clone());
        Ok(())
    }

    async fn persist_active(&self, version: VersionId) -> Result<(), BackendError> {
        self.inner.lock().active = Some(version);
        Ok(())
    }

    async fn remove_snapshot(&self, version: VersionId) -> Result<(), BackendError> {
        self.inner.lock().snapshots.remove(&version);
        Ok(())
    }

    async fn load(&self) -> Result<Option<PersistedState>, BackendError> {
        let state = self.inner.lock();
        if state.snapshots.is_empty() && state.active.is_none() {
            return Ok(None);
        }
        Ok(Some(PersistedState {
            snapshots: state.snapshots.values().cloned().collect(),
            active: state.active,
        }))
    }
}

/// Run a storage call with bounded exponential backoff.
pub async fn retry_with_backoff<T, F, Fut>(
    policy: &RetryPolicy,
    operation: &'static str,
    mut call: F,
) -> Result<T, TaxonomyError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, BackendError>>,
{
    let mut attempt: u32 = 0;
    loop {
        attempt += 1;
        match call().await {
            Ok(value) => return Ok(value),
            Err(error) if attempt < policy.max_attempts => {
                let delay = policy.backoff(attempt);
                warn!(
                    operation,
                    attempt,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    %error,
                    "storage call failed, retrying"
                );
                metrics::counter!("taxonomy_storage_retries_total", "operation" => operation)
                    .increment(1);
                tokio::time::sleep(delay).await;
            }
            Err(source) => {
                return Err(TaxonomyError::Persistence {
                    operation,
                    attempts: attempt,
                    source,
                })
            }
        }
    }
}
