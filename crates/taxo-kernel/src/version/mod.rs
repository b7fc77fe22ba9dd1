//! Version lifecycle: commit, read, diff, activate, prune.
//!
//! A version is created only by [`VersionManager::commit`], switched to by
//! [`VersionManager::activate`] (or a rollback), and destroyed only by
//! [`VersionManager::prune`]. Once committed its contents never change.

mod diff;

pub use diff::{NodeChange, SubtreeMove, TaxonomyDiff};

use crate::change_set::{ChangeSet, Staged};
use crate::config::{EngineConfig, RetentionConfig, RetryPolicy};
use crate::dag::{DagValidator, ValidationResult};
use crate::error::{BackendError, MalformedInput, NotFound, TaxonomyError};
use crate::logging::{AuditEvent, AuditOperation, AuditOutcome, AuditSink};
use crate::persistence::{retry_with_backoff, PersistedState, SnapshotBackend};
use crate::store::{EdgeStore, NodeStore, WriteTxn};
use crate::types::{Actor, Bump, EdgeKey, NodeId, TaxonomyEdge, TaxonomyNode, VersionId};
use chrono::{DateTime, Utc};
use im::OrdMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, error, info, warn};

/// Catalog entry for one committed version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionMeta {
    /// This version.
    pub version_id: VersionId,
    /// Version the change-set was applied to. `None` for the bootstrap version.
    pub parent_version: Option<VersionId>,
    /// Commit time.
    pub created_at: DateTime<Utc>,
    /// Author of the change-set.
    pub author: Actor,
    /// Change-set description, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Nodes in this version.
    pub node_count: usize,
    /// Edges in this version.
    pub edge_count: usize,
}

/// Persisted form of a version: metadata plus every record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionDocument {
    /// Catalog entry.
    pub meta: VersionMeta,
    /// Every node, ascending by id.
    pub nodes: Vec<TaxonomyNode>,
    /// Every edge, ascending by `(parent, child)`.
    pub edges: Vec<TaxonomyEdge>,
}

/// Serializable read model of a tree. Nodes by id, edges by `(parent, child)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreeDocument {
    /// Version the tree belongs to.
    pub version: VersionId,
    /// Nodes ascending by id.
    pub nodes: Vec<TaxonomyNode>,
    /// Edges ascending by `(parent, child)`.
    pub edges: Vec<TaxonomyEdge>,
    /// Commit time of the version.
    pub last_updated: DateTime<Utc>,
}

/// Immutable snapshot of one version. Cloning is cheap.
#[derive(Debug, Clone)]
pub struct TaxonomyTree {
    /// Version this snapshot belongs to.
    pub version: VersionId,
    /// Node records by id.
    pub nodes: OrdMap<NodeId, TaxonomyNode>,
    /// Edge records by `(parent, child)`.
    pub edges: OrdMap<EdgeKey, TaxonomyEdge>,
    /// Commit time for stored versions, build time for staged trees.
    pub last_updated: DateTime<Utc>,
}

impl TaxonomyTree {
    /// Tree with no nodes.
    #[must_use]
    pub fn empty(version: VersionId) -> Self {
        Self::from_parts(version, OrdMap::new(), OrdMap::new())
    }

    /// Wrap already-keyed records. No validation.
    #[must_use]
    pub fn from_parts(
        version: VersionId,
        nodes: OrdMap<NodeId, TaxonomyNode>,
        edges: OrdMap<EdgeKey, TaxonomyEdge>,
    ) -> Self {
        Self {
            version,
            nodes,
            edges,
            last_updated: Utc::now(),
        }
    }

    /// Rebuild a tree from its document form, rejecting duplicate records.
    pub fn from_document(doc: TreeDocument) -> Result<Self, MalformedInput> {
        let mut nodes = OrdMap::new();
        for node in doc.nodes {
            let id = node.node_id;
            if nodes.insert(id, node).is_some() {
                return Err(MalformedInput::DuplicateNode(id));
            }
        }
        let edges = doc.edges.into_iter().map(|e| (e.key(), e)).collect();
        Ok(Self {
            version: doc.version,
            nodes,
            edges,
            last_updated: doc.last_updated,
        })
    }

    #[must_use]
    pub fn to_document(&self) -> TreeDocument {
        TreeDocument {
            version: self.version,
            nodes: self.nodes.values().cloned().collect(),
            edges: self.edges.values().copied().collect(),
            last_updated: self.last_updated,
        }
    }

    pub fn node(&self, id: NodeId) -> Option<&TaxonomyNode> {
        self.nodes.get(&id)
    }

    pub fn roots(&self) -> impl Iterator<Item = &TaxonomyNode> {
        self.nodes.values().filter(|n| n.is_root)
    }

    pub fn children(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        self.edges
            .keys()
            .filter(move |(p, _)| *p == id)
            .map(|(_, c)| *c)
    }

    pub fn parents(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        self.edges
            .keys()
            .filter(move |(_, c)| *c == id)
            .map(|(p, _)| *p)
    }

    pub fn find_by_path(&self, path: &[&str]) -> Option<&TaxonomyNode> {
        self.nodes
            .values()
            .find(|n| n.canonical_path.iter().map(String::as_str).eq(path.iter().copied()))
    }

    #[must_use]
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    /// Run the DAG validator over this tree.
    pub fn validate(&self) -> Result<ValidationResult, MalformedInput> {
        DagValidator::validate(self.nodes.values(), self.edges.values())
    }

    /// Same nodes (ignoring version tags) and the same edge set.
    #[must_use]
    pub fn same_content(&self, other: &Self) -> bool {
        self.nodes.len() == other.nodes.len()
            && self
                .nodes
                .iter()
                .all(|(id, n)| other.nodes.get(id).is_some_and(|o| n.same_content(o)))
            && self.edges.keys().eq(other.edges.keys())
    }
}

/// Owns the catalog of versions and the active pointer.
#[derive(Debug)]
pub struct VersionManager {
    nodes: NodeStore,
    edges: EdgeStore,
    catalog: RwLock<BTreeMap<VersionId, VersionMeta>>,
    active: RwLock<VersionId>,
    commit_lock: Mutex<()>,
    /// Always taken before `commit_lock` when both are needed. A rollback
    /// holds it while migrations drain through the commit lock.
    activation_lock: Mutex<()>,
    backend: Arc<dyn SnapshotBackend>,
    audit: Arc<dyn AuditSink>,
    retry: RetryPolicy,
    retention: RetentionConfig,
}

impl VersionManager {
    /// Recover from `backend`, or bootstrap an empty `0.0` when it holds nothing.
    pub async fn open(
        backend: Arc<dyn SnapshotBackend>,
        audit: Arc<dyn AuditSink>,
        config: &EngineConfig,
    ) -> Result<Self, TaxonomyError> {
        let manager = Self {
            nodes: NodeStore::default(),
            edges: EdgeStore::default(),
            catalog: RwLock::new(BTreeMap::new()),
            active: RwLock::new(VersionId::BOOTSTRAP),
            commit_lock: Mutex::new(()),
            activation_lock: Mutex::new(()),
            backend,
            audit,
            retry: config.retry,
            retention: config.retention,
        };

        let loaded = retry_with_backoff(&manager.retry, "load", || manager.backend.load()).await?;
        match loaded {
            Some(state) => manager.recover(state)?,
            None => manager.bootstrap().await?,
        }
        Ok(manager)
    }

    async fn bootstrap(&self) -> Result<(), TaxonomyError> {
        let meta = VersionMeta {
            version_id: VersionId::BOOTSTRAP,
            parent_version: None,
            created_at: Utc::now(),
            author: Actor::system(),
            description: Some("bootstrap".to_string()),
            node_count: 0,
            edge_count: 0,
        };
        let doc = VersionDocument {
            meta: meta.clone(),
            nodes: Vec::new(),
            edges: Vec::new(),
        };
        retry_with_backoff(&self.retry, "persist_snapshot", || {
            self.backend.persist_snapshot(&doc)
        })
        .await?;
        retry_with_backoff(&self.retry, "persist_active", || {
            self.backend.persist_active(VersionId::BOOTSTRAP)
        })
        .await?;

        self.nodes.table().install(VersionId::BOOTSTRAP, OrdMap::new());
        self.edges.table().install(VersionId::BOOTSTRAP, OrdMap::new());
        self.catalog.write().insert(VersionId::BOOTSTRAP, meta);
        *self.active.write() = VersionId::BOOTSTRAP;

        info!(version = %VersionId::BOOTSTRAP, "bootstrapped empty taxonomy");
        self.record(
            AuditEvent::new(Actor::system(), AuditOperation::Bootstrap, AuditOutcome::Succeeded)
                .versions(None, Some(VersionId::BOOTSTRAP)),
        );
        Ok(())
    }

    /// Install persisted versions. Each one must still pass validation.
    fn recover(&self, state: PersistedState) -> Result<(), TaxonomyError> {
        let corrupt = |message: String| TaxonomyError::Persistence {
            operation: "recover",
            attempts: 1,
            source: BackendError::Corrupt(message),
        };

        let active = state
            .active
            .ok_or_else(|| corrupt("no active version recorded".to_string()))?;

        for doc in state.snapshots {
            let version = doc.meta.version_id;
            let tree = TaxonomyTree::from_document(TreeDocument {
                version,
                nodes: doc.nodes,
                edges: doc.edges,
                last_updated: doc.meta.created_at,
            })
            .map_err(|e| corrupt(format!("version {version}: {e}")))?;
            let validation = tree
                .validate()
                .map_err(|e| corrupt(format!("version {version}: {e}")))?;
            if !validation.is_valid {
                return Err(corrupt(format!(
                    "version {version} fails validation: {}",
                    validation.summary()
                )));
            }

            self.nodes.table().install(version, tree.nodes);
            self.edges.table().install(version, tree.edges);
            self.catalog.write().insert(version, doc.meta);
        }

        if !self.catalog.read().contains_key(&active) {
            return Err(corrupt(format!("active version {active} has no snapshot")));
        }
        *self.active.write() = active;
        info!(
            versions = self.catalog.read().len(),
            active = %active,
            "recovered taxonomy versions"
        );
        Ok(())
    }

    /// Apply `change_set` to `base` and commit the result as a new version.
    ///
    /// Nothing is created when validation fails; the full result comes back in
    /// [`TaxonomyError::DagIntegrity`].
    pub async fn commit(
        &self,
        base: VersionId,
        change_set: &ChangeSet,
    ) -> Result<VersionId, TaxonomyError> {
        self.commit_checked(base, change_set, || Ok(())).await
    }

    /// Like [`commit`](Self::commit), running `precommit` under the commit lock
    /// right before anything is written.
    pub(crate) async fn commit_checked<F>(
        &self,
        base: VersionId,
        change_set: &ChangeSet,
        precommit: F,
    ) -> Result<VersionId, TaxonomyError>
    where
        F: FnOnce() -> Result<(), TaxonomyError> + Send,
    {
        let started = Instant::now();
        let _commit = self.commit_lock.lock().await;
        let actor = change_set.author.clone();

        let base_tree = self.get_tree(Some(base))?;
        let version = self.next_version(change_set.bump)?;
        let (staged, validation) = prepare(&base_tree, change_set, version)?;

        if !validation.is_valid {
            info!(
                base = %base,
                candidate = %version,
                errors = validation.errors.len(),
                cycles = validation.cycles.len(),
                orphans = validation.orphaned_nodes.len(),
                "commit rejected"
            );
            metrics::counter!("taxonomy_commits_total", "outcome" => "rejected").increment(1);
            self.record(
                AuditEvent::new(actor, AuditOperation::Commit, AuditOutcome::Rejected)
                    .versions(Some(base), None)
                    .with_detail(validation.summary()),
            );
            return Err(TaxonomyError::DagIntegrity(validation));
        }

        if let Err(e) = precommit() {
            info!(base = %base, error = %e, "commit aborted before write");
            metrics::counter!("taxonomy_commits_total", "outcome" => "aborted").increment(1);
            self.record(
                AuditEvent::new(actor, AuditOperation::Commit, AuditOutcome::Aborted)
                    .versions(Some(base), None)
                    .with_detail(e.to_string()),
            );
            return Err(e);
        }

        let meta = VersionMeta {
            version_id: version,
            parent_version: Some(base),
            created_at: Utc::now(),
            author: actor.clone(),
            description: change_set.description.clone(),
            node_count: staged.nodes.len(),
            edge_count: staged.edges.len(),
        };

        if let Err(e) = self.write_version(&meta, staged).await {
            error!(base = %base, candidate = %version, error = %e, "commit failed");
            metrics::counter!("taxonomy_commits_total", "outcome" => "failed").increment(1);
            self.record(
                AuditEvent::new(actor, AuditOperation::Commit, AuditOutcome::Failed)
                    .versions(Some(base), Some(version))
                    .with_detail(e.to_string()),
            );
            return Err(e);
        }

        self.catalog.write().insert(version, meta);
        info!(
            base = %base,
            version = %version,
            elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            "commit accepted"
        );
        metrics::counter!("taxonomy_commits_total", "outcome" => "succeeded").increment(1);
        self.record(
            AuditEvent::new(actor, AuditOperation::Commit, AuditOutcome::Succeeded)
                .versions(Some(base), Some(version)),
        );
        Ok(version)
    }

    /// Stage partitions, persist, then seal. Staged partitions are dropped on failure.
    async fn write_version(&self, meta: &VersionMeta, staged: Staged) -> Result<(), TaxonomyError> {
        let version = meta.version_id;
        let txn = WriteTxn::new(version);
        let doc = VersionDocument {
            meta: meta.clone(),
            nodes: staged.nodes.values().cloned().collect(),
            edges: staged.edges.values().copied().collect(),
        };

        let result = async {
            self.nodes.table().stage(&txn, staged.nodes)?;
            self.edges.stage_edges(&txn, &self.nodes, staged.edges)?;
            retry_with_backoff(&self.retry, "persist_snapshot", || {
                self.backend.persist_snapshot(&doc)
            })
            .await?;
            self.nodes.table().seal(version)?;
            self.edges.table().seal(version)?;
            Ok::<(), TaxonomyError>(())
        }
        .await;

        if result.is_err() {
            self.nodes.table().discard(version);
            self.edges.table().discard(version);
        }
        result
    }

    /// Id the next commit with `bump` would receive.
    pub fn peek_next_version(&self, bump: Bump) -> Result<VersionId, TaxonomyError> {
        self.next_version(bump)
    }

    fn next_version(&self, bump: Bump) -> Result<VersionId, TaxonomyError> {
        // The newest version is never pruned, so the catalog maximum is the high-water mark.
        let newest = self
            .catalog
            .read()
            .keys()
            .next_back()
            .copied()
            .unwrap_or(VersionId::BOOTSTRAP);
        newest
            .bumped(bump)
            .ok_or(TaxonomyError::VersionSpaceExhausted(newest))
    }

    /// Snapshot of `version`, or of the active version when `None`.
    pub fn get_tree(&self, version: Option<VersionId>) -> Result<TaxonomyTree, TaxonomyError> {
        let version = version.unwrap_or_else(|| self.active_version());
        let meta = self.version_meta(version)?;
        Ok(TaxonomyTree {
            version,
            nodes: self.nodes.get_nodes(version)?,
            edges: self.edges.get_edges(version)?,
            last_updated: meta.created_at,
        })
    }

    pub fn diff(&self, from: VersionId, to: VersionId) -> Result<TaxonomyDiff, TaxonomyError> {
        let a = self.get_tree(Some(from))?;
        let b = self.get_tree(Some(to))?;
        Ok(TaxonomyDiff::between(&a, &b))
    }

    /// Make `version` the one served by default.
    ///
    /// Fails fast with [`TaxonomyError::ConcurrentActivation`] when another
    /// activation or rollback holds the lock. Activating the active version is a no-op.
    pub async fn activate(&self, version: VersionId, actor: Actor) -> Result<(), TaxonomyError> {
        let Ok(guard) = self.activation_lock.try_lock() else {
            metrics::counter!("taxonomy_activations_total", "outcome" => "conflict").increment(1);
            return Err(TaxonomyError::ConcurrentActivation);
        };

        let previous = self.active_version();
        match self.activate_locked(&guard, version).await {
            Ok(()) => {
                metrics::counter!("taxonomy_activations_total", "outcome" => "succeeded")
                    .increment(1);
                self.record(
                    AuditEvent::new(actor, AuditOperation::Activate, AuditOutcome::Succeeded)
                        .versions(Some(previous), Some(version)),
                );
                Ok(())
            }
            Err(e) => {
                let outcome = if matches!(e, TaxonomyError::NotFound(_)) {
                    AuditOutcome::Rejected
                } else {
                    AuditOutcome::Failed
                };
                self.record(
                    AuditEvent::new(actor, AuditOperation::Activate, outcome)
                        .versions(Some(previous), Some(version))
                        .with_detail(e.to_string()),
                );
                Err(e)
            }
        }
    }

    pub(crate) async fn lock_activation(&self) -> MutexGuard<'_, ()> {
        self.activation_lock.lock().await
    }

    /// Persist the pointer, then flip it in memory. Caller holds the activation lock.
    pub(crate) async fn activate_locked(
        &self,
        _guard: &MutexGuard<'_, ()>,
        version: VersionId,
    ) -> Result<(), TaxonomyError> {
        if !self.contains(version) {
            return Err(TaxonomyError::NotFound(NotFound::Version(version)));
        }
        let previous = self.active_version();
        if previous == version {
            debug!(version = %version, "version already active");
            return Ok(());
        }

        retry_with_backoff(&self.retry, "persist_active", || {
            self.backend.persist_active(version)
        })
        .await?;
        *self.active.write() = version;
        info!(from = %previous, to = %version, "active version switched");
        Ok(())
    }

    /// Delete a version for good.
    ///
    /// Refuses the active version, the newest version and every version inside
    /// the retained rollback window.
    pub async fn prune(&self, version: VersionId, actor: Actor) -> Result<(), TaxonomyError> {
        let activation = self.activation_lock.lock().await;
        let _commit = self.commit_lock.lock().await;

        if let Err(e) = self.check_prunable(version) {
            self.record(
                AuditEvent::new(actor, AuditOperation::Prune, AuditOutcome::Rejected)
                    .versions(Some(version), None)
                    .with_detail(e.to_string()),
            );
            return Err(e);
        }

        if let Err(e) = retry_with_backoff(&self.retry, "remove_snapshot", || {
            self.backend.remove_snapshot(version)
        })
        .await
        {
            error!(version = %version, error = %e, "prune failed");
            self.record(
                AuditEvent::new(actor, AuditOperation::Prune, AuditOutcome::Failed)
                    .versions(Some(version), None)
                    .with_detail(e.to_string()),
            );
            return Err(e);
        }

        self.catalog.write().remove(&version);
        self.nodes.table().remove(version)?;
        self.edges.table().remove(version)?;
        drop(activation);

        info!(version = %version, "version pruned");
        self.record(
            AuditEvent::new(actor, AuditOperation::Prune, AuditOutcome::Succeeded)
                .versions(Some(version), None),
        );
        Ok(())
    }

    fn check_prunable(&self, version: VersionId) -> Result<(), TaxonomyError> {
        let catalog = self.catalog.read();
        if !catalog.contains_key(&version) {
            return Err(TaxonomyError::NotFound(NotFound::Version(version)));
        }
        let refuse = |reason: &str| TaxonomyError::PruneRefused {
            version,
            reason: reason.to_string(),
        };
        if version == self.active_version() {
            return Err(refuse("version is active"));
        }
        if catalog.keys().next_back() == Some(&version) {
            return Err(refuse("newest version is kept"));
        }
        let window = self.retention.rollback_targets.min(catalog.len());
        if let Some(oldest_retained) = catalog.keys().rev().take(window).last() {
            if version >= *oldest_retained {
                return Err(refuse("version is a retained rollback target"));
            }
        }
        Ok(())
    }

    #[must_use]
    pub fn active_version(&self) -> VersionId {
        *self.active.read()
    }

    #[must_use]
    pub fn contains(&self, version: VersionId) -> bool {
        self.catalog.read().contains_key(&version)
    }

    pub fn version_meta(&self, version: VersionId) -> Result<VersionMeta, TaxonomyError> {
        self.catalog
            .read()
            .get(&version)
            .cloned()
            .ok_or(TaxonomyError::NotFound(NotFound::Version(version)))
    }

    /// All committed versions, oldest first.
    #[must_use]
    pub fn list_versions(&self) -> Vec<VersionMeta> {
        self.catalog.read().values().cloned().collect()
    }

    /// Write to the audit sink. A failing sink is logged, never fatal.
    pub(crate) fn record(&self, event: AuditEvent) {
        let operation = event.operation;
        if let Err(e) = self.audit.record(event) {
            warn!(operation = operation.as_str(), error = %e, "audit sink rejected event");
            metrics::counter!("taxonomy_audit_failures_total").increment(1);
        }
    }
}

/// Stage `change_set` onto `base` and validate the result.
pub(crate) fn prepare(
    base: &TaxonomyTree,
    change_set: &ChangeSet,
    version: VersionId,
) -> Result<(Staged, ValidationResult), MalformedInput> {
    let staged = change_set.stage(base, version);
    let mut validation = DagValidator::validate(staged.nodes.values(), staged.edges.values())?;
    if !staged.errors.is_empty() {
        let mut errors = staged.errors.clone();
        errors.append(&mut validation.errors);
        validation.errors = errors;
        validation.is_valid = false;
    }
    Ok((staged, validation))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::AuditLog;
    use crate::persistence::MemoryBackend;
    use crate::types::NodeDraft;

    fn id(n: u128) -> NodeId {
        NodeId::from_u128(n)
    }

    async fn manager() -> (VersionManager, Arc<AuditLog>) {
        let audit = Arc::new(AuditLog::new());
        let manager = VersionManager::open(
            Arc::new(MemoryBackend::new()),
            audit.clone(),
            &EngineConfig::default(),
        )
        .await
        .unwrap();
        (manager, audit)
    }

    fn science() -> ChangeSet {
        ChangeSet::new(Actor::new("curator"))
            .major()
            .add_node(NodeDraft::new(id(1), "Science").root())
            .add_node(NodeDraft::new(id(2), "Physics"))
            .add_edge(id(1), id(2))
    }

    #[tokio::test]
    async fn bootstrap_is_active_and_empty() {
        let (manager, audit) = manager().await;
        assert_eq!(manager.active_version(), VersionId::BOOTSTRAP);
        let tree = manager.get_tree(None).unwrap();
        assert_eq!(tree.node_count(), 0);
        assert_eq!(audit.events()[0].operation, AuditOperation::Bootstrap);
    }

    #[tokio::test]
    async fn major_bump_from_bootstrap_gives_one_dot_zero() {
        let (manager, _) = manager().await;
        let v = manager.commit(VersionId::BOOTSTRAP, &science()).await.unwrap();
        assert_eq!(v, VersionId::new(1, 0));

        let next = manager
            .commit(
                v,
                &ChangeSet::default()
                    .add_node(NodeDraft::new(id(3), "Biology"))
                    .add_edge(id(1), id(3)),
            )
            .await
            .unwrap();
        assert_eq!(next, VersionId::new(1, 1));
        assert_eq!(manager.active_version(), VersionId::BOOTSTRAP);
    }

    #[tokio::test]
    async fn rejected_commit_creates_nothing() {
        let (manager, audit) = manager().await;
        let cs = ChangeSet::default()
            .add_node(NodeDraft::new(id(1), "Root").root())
            .add_node(NodeDraft::new(id(2), "Loose"));
        let err = manager.commit(VersionId::BOOTSTRAP, &cs).await.unwrap_err();
        let validation = err.validation().unwrap();
        assert_eq!(validation.orphaned_nodes, vec![id(2)]);
        assert_eq!(manager.list_versions().len(), 1);
        assert_eq!(
            audit.events().last().unwrap().outcome,
            AuditOutcome::Rejected
        );
    }

    #[tokio::test]
    async fn unknown_base_is_not_found() {
        let (manager, _) = manager().await;
        let err = manager
            .commit(VersionId::new(4, 2), &science())
            .await
            .unwrap_err();
        assert!(matches!(err, TaxonomyError::NotFound(NotFound::Version(_))));
    }

    #[tokio::test]
    async fn activate_is_idempotent() {
        let (manager, _) = manager().await;
        let v = manager.commit(VersionId::BOOTSTRAP, &science()).await.unwrap();
        manager.activate(v, Actor::system()).await.unwrap();
        manager.activate(v, Actor::system()).await.unwrap();
        assert_eq!(manager.active_version(), v);
    }

    #[tokio::test]
    async fn activation_fails_fast_when_locked() {
        let (manager, _) = manager().await;
        let v = manager.commit(VersionId::BOOTSTRAP, &science()).await.unwrap();
        let _held = manager.lock_activation().await;
        assert!(matches!(
            manager.activate(v, Actor::system()).await,
            Err(TaxonomyError::ConcurrentActivation)
        ));
    }

    #[tokio::test]
    async fn prune_refuses_active_and_retained() {
        let audit = Arc::new(AuditLog::new());
        let config = EngineConfig::default().with_rollback_targets(1);
        let manager = VersionManager::open(Arc::new(MemoryBackend::new()), audit, &config)
            .await
            .unwrap();
        let v1 = manager.commit(VersionId::BOOTSTRAP, &science()).await.unwrap();
        let v2 = manager
            .commit(
                v1,
                &ChangeSet::default()
                    .add_node(NodeDraft::new(id(3), "Biology"))
                    .add_edge(id(1), id(3)),
            )
            .await
            .unwrap();
        manager.activate(v1, Actor::system()).await.unwrap();

        assert!(matches!(
            manager.prune(v1, Actor::system()).await,
            Err(TaxonomyError::PruneRefused { .. })
        ));
        assert!(matches!(
            manager.prune(v2, Actor::system()).await,
            Err(TaxonomyError::PruneRefused { .. })
        ));
        manager.prune(VersionId::BOOTSTRAP, Actor::system()).await.unwrap();
        assert!(!manager.contains(VersionId::BOOTSTRAP));
        assert!(manager.get_tree(Some(VersionId::BOOTSTRAP)).is_err());
    }
}
