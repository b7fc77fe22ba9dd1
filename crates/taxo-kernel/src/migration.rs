//! Dry-run and apply of change-sets, with epoch-based cancellation.
//!
//! Every `apply` registers a ticket carrying the epoch it started in. A
//! rollback advances the epoch; a ticket from an older epoch aborts with
//! [`TaxonomyError::StaleEpoch`] at its pre-write check under the commit lock.

use crate::change_set::ChangeSet;
use crate::dag::ValidationResult;
use crate::error::TaxonomyError;
use crate::types::VersionId;
use crate::version::{prepare, TaxonomyDiff, TaxonomyTree, VersionManager};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::{debug, info};

/// What a change-set would do, without committing anything.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreviewResult {
    /// Version the change-set was staged on.
    pub base_version: VersionId,
    /// Id the commit would receive if nothing else commits first.
    pub hypothetical_version: VersionId,
    /// Validator verdict on the staged tree.
    pub validation: ValidationResult,
    /// Base to staged tree.
    pub diff: TaxonomyDiff,
}

#[derive(Debug, Clone, Copy)]
struct InFlight {
    epoch: u64,
}

#[derive(Debug)]
pub struct MigrationEngine {
    versions: Arc<VersionManager>,
    epoch: AtomicU64,
    next_ticket: AtomicU64,
    in_flight: DashMap<u64, InFlight>,
    drained: Notify,
    cancelled_total: AtomicU64,
}

/// Registration of one running `apply`. Dropping it deregisters.
struct Ticket<'a> {
    engine: &'a MigrationEngine,
    id: u64,
    epoch: u64,
    cancelled: bool,
}

impl Drop for Ticket<'_> {
    fn drop(&mut self) {
        self.engine.in_flight.remove(&self.id);
        if self.cancelled {
            self.engine.cancelled_total.fetch_add(1, Ordering::SeqCst);
        }
        self.engine.drained.notify_waiters();
    }
}

impl MigrationEngine {
    pub fn new(versions: Arc<VersionManager>) -> Self {
        Self {
            versions,
            epoch: AtomicU64::new(0),
            next_ticket: AtomicU64::new(0),
            in_flight: DashMap::new(),
            drained: Notify::new(),
            cancelled_total: AtomicU64::new(0),
        }
    }

    /// Validate `change_set` against `base` and show the resulting diff.
    pub fn propose(
        &self,
        base: VersionId,
        change_set: &ChangeSet,
    ) -> Result<PreviewResult, TaxonomyError> {
        let base_tree = self.versions.get_tree(Some(base))?;
        let hypothetical = self.versions.peek_next_version(change_set.bump)?;
        let (staged, validation) = prepare(&base_tree, change_set, hypothetical)?;
        let candidate = TaxonomyTree::from_parts(hypothetical, staged.nodes, staged.edges);
        debug!(
            base = %base,
            hypothetical = %hypothetical,
            valid = validation.is_valid,
            "change set previewed"
        );
        Ok(PreviewResult {
            base_version: base,
            hypothetical_version: hypothetical,
            diff: TaxonomyDiff::between(&base_tree, &candidate),
            validation,
        })
    }

    /// Commit `change_set` as a new version. Never activates it.
    pub async fn apply(
        &self,
        base: VersionId,
        change_set: &ChangeSet,
    ) -> Result<VersionId, TaxonomyError> {
        let mut ticket = self.register();
        let started = ticket.epoch;

        let result = self
            .versions
            .commit_checked(base, change_set, || self.check_epoch(started))
            .await;

        if let Err(TaxonomyError::StaleEpoch { current, .. }) = &result {
            info!(base = %base, started, current, "migration cancelled by rollback");
            ticket.cancelled = true;
        }
        result
    }

    fn register(&self) -> Ticket<'_> {
        let id = self.next_ticket.fetch_add(1, Ordering::SeqCst);
        let epoch = self.epoch.load(Ordering::SeqCst);
        self.in_flight.insert(id, InFlight { epoch });
        Ticket {
            engine: self,
            id,
            epoch,
            cancelled: false,
        }
    }

    fn check_epoch(&self, started: u64) -> Result<(), TaxonomyError> {
        let current = self.epoch.load(Ordering::SeqCst);
        if current == started {
            Ok(())
        } else {
            Err(TaxonomyError::StaleEpoch { started, current })
        }
    }

    /// Start a new epoch. Returns it.
    pub(crate) fn advance_epoch(&self) -> u64 {
        let epoch = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        debug!(epoch, "migration epoch advanced");
        epoch
    }

    /// Wait until no migration from before `epoch` is still running.
    pub(crate) async fn drain_stale(&self, epoch: u64) {
        loop {
            let notified = self.drained.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if !self.in_flight.iter().any(|entry| entry.value().epoch < epoch) {
                return;
            }
            notified.await;
        }
    }

    #[must_use]
    pub fn current_epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    /// Migrations currently between registration and completion.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Migrations aborted by an epoch advance since startup.
    #[must_use]
    pub fn cancelled_total(&self) -> u64 {
        self.cancelled_total.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn versions(&self) -> &Arc<VersionManager> {
        &self.versions
    }
}
