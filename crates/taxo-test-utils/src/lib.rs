//! Testing utilities for the taxonomy workspace
//!
//! Shared fixtures and fault-injecting snapshot backends.

#![allow(missing_docs)]

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use taxo_kernel::config::{EngineConfig, RetryPolicy};
use taxo_kernel::engine::TaxonomyEngine;
use taxo_kernel::logging::AuditLog;
use taxo_kernel::persistence::{MemoryBackend, PersistedState, SnapshotBackend};
use taxo_kernel::version::VersionDocument;
use taxo_kernel::{Actor, BackendError, NodeDraft, NodeId, VersionId};
use tokio::sync::{Notify, Semaphore};

pub const R: NodeId = NodeId::from_u128(0x100);
pub const A: NodeId = NodeId::from_u128(0x200);
pub const B: NodeId = NodeId::from_u128(0x300);

pub fn id(n: u128) -> NodeId {
    NodeId::from_u128(n)
}

pub fn curator() -> Actor {
    Actor::new("curator")
}

pub fn v(major: u32, minor: u32) -> VersionId {
    VersionId::new(major, minor)
}

/// `R -> A`, committed as a major bump so it lands on `1.0`.
pub fn root_and_child() -> taxo_kernel::change_set::ChangeSet {
    taxo_kernel::change_set::ChangeSet::new(curator())
        .major()
        .with_description("initial taxonomy")
        .add_node(NodeDraft::new(R, "R").root())
        .add_node(NodeDraft::new(A, "A"))
        .add_edge(R, A)
}

/// New leaf `child` labelled `label` under `parent`.
pub fn add_child(parent: NodeId, child: NodeId, label: &str) -> taxo_kernel::change_set::ChangeSet {
    taxo_kernel::change_set::ChangeSet::new(curator())
        .add_node(NodeDraft::new(child, label))
        .add_edge(parent, child)
}

/// Science > {Physics > Optics, Biology}, with Biophysics under both Physics and Biology.
pub fn science_tree() -> taxo_kernel::change_set::ChangeSet {
    taxo_kernel::change_set::ChangeSet::new(curator())
        .major()
        .add_node(NodeDraft::new(id(1), "Science").root())
        .add_node(NodeDraft::new(id(2), "Physics").with_document_count(120))
        .add_node(NodeDraft::new(id(3), "Optics").with_confidence(0.8))
        .add_node(NodeDraft::new(id(4), "Biology").with_document_count(75))
        .add_node(NodeDraft::new(id(5), "Biophysics"))
        .add_edge(id(1), id(2))
        .add_edge(id(2), id(3))
        .add_edge(id(1), id(4))
        .add_edge(id(2), id(5))
        .add_edge(id(4), id(5))
}

/// Config for tests: short retry backoff, 5s rollback budget.
pub fn test_config() -> EngineConfig {
    EngineConfig::default()
        .with_ttr_budget(Duration::from_secs(5))
        .with_retry(RetryPolicy {
            max_attempts: 3,
            initial_backoff_ms: 1,
            multiplier: 2.0,
            max_backoff_ms: 5,
        })
}

pub struct TestEngine {
    pub engine: Arc<TaxonomyEngine>,
    pub audit: Arc<AuditLog>,
}

pub async fn open_engine(
    config: EngineConfig,
    backend: Arc<dyn SnapshotBackend>,
) -> TestEngine {
    let audit = Arc::new(AuditLog::new());
    let engine = TaxonomyEngine::open(config, backend, audit.clone())
        .await
        .expect("engine opens");
    TestEngine {
        engine: Arc::new(engine),
        audit,
    }
}

/// Engine with `1.0 = R -> A` committed and active.
pub async fn engine_at_v1(backend: Arc<dyn SnapshotBackend>) -> TestEngine {
    let test = open_engine(test_config(), backend).await;
    let v1 = test
        .engine
        .apply(VersionId::BOOTSTRAP, &root_and_child())
        .await
        .expect("base commit");
    assert_eq!(v1, v(1, 0));
    test.engine.activate(v1, curator()).await.expect("activate 1.0");
    test
}

/// Fails the next `n` writes with [`BackendError::Unavailable`], then delegates.
#[derive(Debug, Default)]
pub struct FlakyBackend {
    inner: MemoryBackend,
    failures_left: AtomicU32,
    write_calls: AtomicU32,
}

impl FlakyBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_next(&self, n: u32) {
        self.failures_left.store(n, Ordering::SeqCst);
    }

    pub fn write_calls(&self) -> u32 {
        self.write_calls.load(Ordering::SeqCst)
    }

    pub fn inner(&self) -> &MemoryBackend {
        &self.inner
    }

    fn maybe_fail(&self) -> Result<(), BackendError> {
        self.write_calls.fetch_add(1, Ordering::SeqCst);
        let left = self.failures_left.load(Ordering::SeqCst);
        if left > 0 {
            self.failures_left.store(left - 1, Ordering::SeqCst);
            return Err(BackendError::Unavailable("injected failure".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl SnapshotBackend for FlakyBackend {
    async fn persist_snapshot(&self, snapshot: &VersionDocument) -> Result<(), BackendError> {
        self.maybe_fail()?;
        self.inner.persist_snapshot(snapshot).await
    }

    async fn persist_active(&self, version: VersionId) -> Result<(), BackendError> {
        self.maybe_fail()?;
        self.inner.persist_active(version).await
    }

    async fn remove_snapshot(&self, version: VersionId) -> Result<(), BackendError> {
        self.maybe_fail()?;
        self.inner.remove_snapshot(version).await
    }

    async fn load(&self) -> Result<Option<PersistedState>, BackendError> {
        self.inner.load().await
    }
}

/// Sleeps before every active-pointer write.
#[derive(Debug, Default)]
pub struct SlowBackend {
    inner: MemoryBackend,
    active_delay: Mutex<Duration>,
}

impl SlowBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_active_delay(&self, delay: Duration) {
        *self.active_delay.lock() = delay;
    }
}

#[async_trait]
impl SnapshotBackend for SlowBackend {
    async fn persist_snapshot(&self, snapshot: &VersionDocument) -> Result<(), BackendError> {
        self.inner.persist_snapshot(snapshot).await
    }

    async fn persist_active(&self, version: VersionId) -> Result<(), BackendError> {
        let delay = *self.active_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.inner.persist_active(version).await
    }

    async fn remove_snapshot(&self, version: VersionId) -> Result<(), BackendError> {
        self.inner.remove_snapshot(version).await
    }

    async fn load(&self) -> Result<Option<PersistedState>, BackendError> {
        self.inner.load().await
    }
}

/// Once armed, holds every snapshot write until [`release`](Self::release).
/// Lets a test park a commit in the middle of its write.
#[derive(Debug)]
pub struct GatedBackend {
    inner: MemoryBackend,
    armed: AtomicBool,
    gate: Semaphore,
    entered: Notify,
}

impl Default for GatedBackend {
    fn default() -> Self {
        Self {
            inner: MemoryBackend::new(),
            armed: AtomicBool::new(false),
            gate: Semaphore::new(0),
            entered: Notify::new(),
        }
    }
}

impl GatedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arm(&self) {
        self.armed.store(true, Ordering::SeqCst);
    }

    /// Let `n` held writes through.
    pub fn release(&self, n: usize) {
        self.gate.add_permits(n);
    }

    /// Wait until a write is parked at the gate.
    pub async fn wait_entered(&self) {
        self.entered.notified().await;
    }
}

#[async_trait]
impl SnapshotBackend for GatedBackend {
    async fn persist_snapshot(&self, snapshot: &VersionDocument) -> Result<(), BackendError> {
        if self.armed.load(Ordering::SeqCst) {
            self.entered.notify_one();
            let permit = self
                .gate
                .acquire()
                .await
                .map_err(|e| BackendError::Unavailable(e.to_string()))?;
            permit.forget();
        }
        self.inner.persist_snapshot(snapshot).await
    }

    async fn persist_active(&self, version: VersionId) -> Result<(), BackendError> {
        self.inner.persist_active(version).await
    }

    async fn remove_snapshot(&self, version: VersionId) -> Result<(), BackendError> {
        self.inner.remove_snapshot(version).await
    }

    async fn load(&self) -> Result<Option<PersistedState>, BackendError> {
        self.inner.load().await
    }
}

/// Yield until `check` holds. Panics after ~5s.
pub async fn wait_until(mut check: impl FnMut() -> bool) {
    for _ in 0..5_000 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    panic!("condition not reached in time");
}
