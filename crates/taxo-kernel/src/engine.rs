//! Wiring of the version manager, migration engine and rollback coordinator.

use crate::change_set::ChangeSet;
use crate::config::{EngineConfig, StorageConfig};
use crate::error::TaxonomyError;
use crate::logging::{AuditLog, AuditSink, FileAuditLog};
use crate::migration::{MigrationEngine, PreviewResult};
use crate::persistence::{JsonFileBackend, MemoryBackend, SnapshotBackend};
use crate::rollback::{RollbackCoordinator, RollbackOutcome};
use crate::state_machine::RollbackPhase;
use crate::types::{Actor, VersionId};
use crate::version::{TaxonomyDiff, TaxonomyTree, VersionManager, VersionMeta};
use std::sync::Arc;
use tracing::info;

/// One taxonomy: its versions, its migrations and its rollback coordinator.
///
/// Share it behind an `Arc`; every method takes `&self`.
#[derive(Debug)]
pub struct TaxonomyEngine {
    config: EngineConfig,
    versions: Arc<VersionManager>,
    migrations: Arc<MigrationEngine>,
    rollback: RollbackCoordinator,
}

impl TaxonomyEngine {
    /// Open against explicit storage and audit sinks.
    pub async fn open(
        config: EngineConfig,
        backend: Arc<dyn SnapshotBackend>,
        audit: Arc<dyn AuditSink>,
    ) -> Result<Self, TaxonomyError> {
        config.validate()?;
        let versions = Arc::new(VersionManager::open(backend, audit, &config).await?);
        let migrations = Arc::new(MigrationEngine::new(versions.clone()));
        let rollback =
            RollbackCoordinator::new(versions.clone(), migrations.clone(), config.ttr_budget());
        info!(
            active = %versions.active_version(),
            versions = versions.list_versions().len(),
            ttr_budget_ms = config.rollback.ttr_budget_ms,
            "taxonomy engine ready"
        );
        Ok(Self {
            config,
            versions,
            migrations,
            rollback,
        })
    }

    /// Open with the storage the config names. JSON storage keeps its audit
    /// log next to the snapshots as `audit.jsonl`.
    pub async fn from_config(config: EngineConfig) -> Result<Self, TaxonomyError> {
        let (backend, audit): (Arc<dyn SnapshotBackend>, Arc<dyn AuditSink>) =
            match &config.storage {
                StorageConfig::Memory => (Arc::new(MemoryBackend::new()), Arc::new(AuditLog::new())),
                StorageConfig::JsonFile { path } => (
                    Arc::new(JsonFileBackend::new(path.clone())),
                    Arc::new(FileAuditLog::open(path.join("audit.jsonl"))?),
                ),
            };
        Self::open(config, backend, audit).await
    }

    /// Default config, in-memory storage.
    pub async fn in_memory() -> Result<Self, TaxonomyError> {
        Self::from_config(EngineConfig::default()).await
    }

    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    #[must_use]
    pub fn versions(&self) -> &Arc<VersionManager> {
        &self.versions
    }

    #[must_use]
    pub fn migrations(&self) -> &Arc<MigrationEngine> {
        &self.migrations
    }

    #[must_use]
    pub fn rollback_coordinator(&self) -> &RollbackCoordinator {
        &self.rollback
    }

    pub fn get_tree(&self, version: Option<VersionId>) -> Result<TaxonomyTree, TaxonomyError> {
        self.versions.get_tree(version)
    }

    #[must_use]
    pub fn list_versions(&self) -> Vec<VersionMeta> {
        self.versions.list_versions()
    }

    #[must_use]
    pub fn active_version(&self) -> VersionId {
        self.versions.active_version()
    }

    pub fn diff(&self, from: VersionId, to: VersionId) -> Result<TaxonomyDiff, TaxonomyError> {
        self.versions.diff(from, to)
    }

    pub fn propose(
        &self,
        base: VersionId,
        change_set: &ChangeSet,
    ) -> Result<PreviewResult, TaxonomyError> {
        self.migrations.propose(base, change_set)
    }

    pub async fn apply(
        &self,
        base: VersionId,
        change_set: &ChangeSet,
    ) -> Result<VersionId, TaxonomyError> {
        self.migrations.apply(base, change_set).await
    }

    pub async fn activate(&self, version: VersionId, actor: Actor) -> Result<(), TaxonomyError> {
        self.versions.activate(version, actor).await
    }

    pub async fn rollback(
        &self,
        target: VersionId,
        actor: Actor,
    ) -> Result<RollbackOutcome, TaxonomyError> {
        self.rollback.rollback(target, actor).await
    }

    #[must_use]
    pub fn rollback_phase(&self) -> RollbackPhase {
        self.rollback.phase()
    }

    pub async fn prune(&self, version: VersionId, actor: Actor) -> Result<(), TaxonomyError> {
        self.versions.prune(version, actor).await
    }

    /// Actor to record when a caller does not name one.
    #[must_use]
    pub fn default_actor(&self) -> Actor {
        self.config.default_actor.clone()
    }
}
