//! Bounded-time rollback to a previously committed version.
//!
//! A rollback takes the activation lock, advances the migration epoch, waits
//! for migrations started in older epochs to finish or abort, then switches
//! the active pointer. Plain activations fail fast for the duration. The
//! whole sequence runs under the time-to-recovery deadline; when the deadline
//! passes the attempt is dropped, releasing every lock it held.

use crate::error::{RollbackFailure, TaxonomyError};
use crate::logging::{AuditEvent, AuditOperation, AuditOutcome};
use crate::migration::MigrationEngine;
use crate::state_machine::{validate_transition, RollbackPhase};
use crate::types::{Actor, VersionId};
use crate::version::VersionManager;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

/// Result of one rollback attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollbackOutcome {
    /// `target_version` is now active.
    pub succeeded: bool,
    /// Version the caller asked for.
    pub target_version: VersionId,
    /// Active version when the attempt started.
    pub previous_version: VersionId,
    /// Wall time from request to outcome.
    pub elapsed_ms: u64,
    /// Migrations aborted because this rollback advanced the epoch.
    pub cancelled_migrations: u64,
    /// Why it failed. `None` on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<RollbackFailure>,
}

impl RollbackOutcome {
    /// Turn a failed outcome into [`TaxonomyError::RollbackFailed`].
    pub fn into_result(self) -> Result<Self, TaxonomyError> {
        if self.succeeded {
            return Ok(self);
        }
        Err(TaxonomyError::RollbackFailed {
            target: self.target_version,
            elapsed_ms: self.elapsed_ms,
            reason: self.failure.unwrap_or(RollbackFailure::Activation {
                message: "unknown failure".to_string(),
            }),
        })
    }
}

#[derive(Debug)]
pub struct RollbackCoordinator {
    versions: Arc<VersionManager>,
    migrations: Arc<MigrationEngine>,
    phase: Mutex<RollbackPhase>,
    ttr_budget: Duration,
}

/// Holds the coordinator in `RollbackInProgress`. If the attempt is dropped
/// before [`finish`](PhaseGuard::finish), the phase moves to `RollbackFailed`.
struct PhaseGuard<'a> {
    phase: &'a Mutex<RollbackPhase>,
    finished: bool,
}

impl PhaseGuard<'_> {
    fn finish(mut self, to: RollbackPhase) -> Result<(), TaxonomyError> {
        self.finished = true;
        let mut phase = self.phase.lock();
        validate_transition(*phase, to)?;
        *phase = to;
        Ok(())
    }
}

impl Drop for PhaseGuard<'_> {
    fn drop(&mut self) {
        if !self.finished {
            warn!("rollback attempt dropped before completion");
            *self.phase.lock() = RollbackPhase::RollbackFailed;
        }
    }
}

impl RollbackCoordinator {
    pub fn new(
        versions: Arc<VersionManager>,
        migrations: Arc<MigrationEngine>,
        ttr_budget: Duration,
    ) -> Self {
        Self {
            versions,
            migrations,
            phase: Mutex::new(RollbackPhase::Idle),
            ttr_budget,
        }
    }

    #[must_use]
    pub fn phase(&self) -> RollbackPhase {
        *self.phase.lock()
    }

    #[must_use]
    pub fn ttr_budget(&self) -> Duration {
        self.ttr_budget
    }

    /// Move to `RollbackInProgress`, resetting a terminal phase first.
    fn begin(&self) -> Result<PhaseGuard<'_>, TaxonomyError> {
        let mut phase = self.phase.lock();
        if *phase == RollbackPhase::RollbackInProgress {
            return Err(TaxonomyError::RollbackAlreadyInProgress);
        }
        if phase.is_terminal() {
            validate_transition(*phase, RollbackPhase::Idle)?;
            *phase = RollbackPhase::Idle;
        }
        validate_transition(*phase, RollbackPhase::RollbackInProgress)?;
        *phase = RollbackPhase::RollbackInProgress;
        Ok(PhaseGuard {
            phase: &self.phase,
            finished: false,
        })
    }

    /// Make `target` active again within the TTR budget.
    ///
    /// A second call while one is running gets
    /// [`TaxonomyError::RollbackAlreadyInProgress`]. Every other failure is
    /// reported in the returned outcome with `succeeded == false`.
    pub async fn rollback(
        &self,
        target: VersionId,
        actor: Actor,
    ) -> Result<RollbackOutcome, TaxonomyError> {
        let started = Instant::now();
        let guard = self.begin()?;
        let previous = self.versions.active_version();
        info!(from = %previous, to = %target, "rollback started");

        if !self.versions.contains(target) {
            let outcome = RollbackOutcome {
                succeeded: false,
                target_version: target,
                previous_version: previous,
                elapsed_ms: elapsed_ms(started),
                cancelled_migrations: 0,
                failure: Some(RollbackFailure::TargetNotFound { target }),
            };
            guard.finish(RollbackPhase::RollbackFailed)?;
            warn!(to = %target, "rollback target not found");
            self.report(&outcome, actor, AuditOutcome::Rejected);
            return Ok(outcome);
        }

        let cancelled_before = self.migrations.cancelled_total();
        // The activation lock is held across the drain so no plain `activate`
        // can slip in while the rollback is in progress.
        let attempt = async {
            let lock = self.versions.lock_activation().await;
            let epoch = self.migrations.advance_epoch();
            self.migrations.drain_stale(epoch).await;
            info!(epoch, "stale migrations drained");
            self.versions.activate_locked(&lock, target).await
        };
        let result = tokio::time::timeout(self.ttr_budget, attempt).await;

        let failure = match result {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(RollbackFailure::Activation {
                message: e.to_string(),
            }),
            Err(_) => Some(RollbackFailure::DeadlineExceeded {
                budget_ms: u64::try_from(self.ttr_budget.as_millis()).unwrap_or(u64::MAX),
            }),
        };
        let outcome = RollbackOutcome {
            succeeded: failure.is_none(),
            target_version: target,
            previous_version: previous,
            elapsed_ms: elapsed_ms(started),
            cancelled_migrations: self.migrations.cancelled_total() - cancelled_before,
            failure,
        };

        if outcome.succeeded {
            guard.finish(RollbackPhase::RollbackSucceeded)?;
            info!(
                from = %previous,
                to = %target,
                elapsed_ms = outcome.elapsed_ms,
                cancelled = outcome.cancelled_migrations,
                "rollback succeeded"
            );
            self.report(&outcome, actor, AuditOutcome::Succeeded);
        } else {
            guard.finish(RollbackPhase::RollbackFailed)?;
            error!(
                to = %target,
                elapsed_ms = outcome.elapsed_ms,
                failure = ?outcome.failure,
                "rollback failed"
            );
            self.report(&outcome, actor, AuditOutcome::Failed);
        }
        Ok(outcome)
    }

    fn report(&self, outcome: &RollbackOutcome, actor: Actor, audit_outcome: AuditOutcome) {
        let label = if outcome.succeeded { "succeeded" } else { "failed" };
        metrics::counter!("taxonomy_rollbacks_total", "outcome" => label).increment(1);
        #[allow(clippy::cast_precision_loss)]
        metrics::histogram!("taxonomy_rollback_duration_ms").record(outcome.elapsed_ms as f64);

        let mut detail = format!(
            "elapsed_ms={} cancelled_migrations={}",
            outcome.elapsed_ms, outcome.cancelled_migrations
        );
        if let Some(failure) = &outcome.failure {
            detail.push_str(&format!(" failure={failure}"));
        }
        self.versions.record(
            AuditEvent::new(actor, AuditOperation::Rollback, audit_outcome)
                .versions(Some(outcome.previous_version), Some(outcome.target_version))
                .with_detail(detail),
        );
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}
