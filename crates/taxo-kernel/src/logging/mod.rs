//! Hash-chained audit trail of every state-changing operation.

mod file;

pub use file::FileAuditLog;

use crate::error::AuditError;
use crate::types::{Actor, VersionId};
use chrono::{DateTime, SecondsFormat, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// State-changing operation an event records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditOperation {
    Bootstrap,
    Commit,
    Activate,
    Rollback,
    Prune,
}

impl AuditOperation {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Bootstrap => "bootstrap",
            Self::Commit => "commit",
            Self::Activate => "activate",
            Self::Rollback => "rollback",
            Self::Prune => "prune",
        }
    }
}

/// How the operation ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditOutcome {
    Succeeded,
    /// Refused before any state changed (invalid change-set, unknown target, ...)
    Rejected,
    /// Cancelled by an epoch advance
    Aborted,
    /// Storage or deadline failure
    Failed,
}

impl AuditOutcome {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Succeeded => "succeeded",
            Self::Rejected => "rejected",
            Self::Aborted => "aborted",
            Self::Failed => "failed",
        }
    }
}

/// One entry of the audit trail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Unique per event.
    pub event_id: Uuid,
    /// When the operation finished.
    pub timestamp: DateTime<Utc>,
    /// Who asked for the operation.
    pub actor: Actor,
    /// What was attempted.
    pub operation: AuditOperation,
    /// Active version, or commit base, before the operation.
    pub from_version: Option<VersionId>,
    /// Version the operation produced or targeted.
    pub to_version: Option<VersionId>,
    /// How it ended.
    pub outcome: AuditOutcome,
    /// Human-readable reason or measurements.
    #[serde(default)]
    pub detail: String,
    /// Hash of the previous event, all zeros for the first.
    #[serde(with = "hex::serde")]
    pub prev_hash: [u8; 32],
    /// SHA-256 over this event's fields and `prev_hash`.
    #[serde(with = "hex::serde")]
    pub hash: [u8; 32],
}

impl AuditEvent {
    /// Unchained event; the sink fills in the hashes.
    pub fn new(actor: Actor, operation: AuditOperation, outcome: AuditOutcome) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            timestamp: Utc::now(),
            actor,
            operation,
            from_version: None,
            to_version: None,
            outcome,
            detail: String::new(),
            prev_hash: [0u8; 32],
            hash: [0u8; 32],
        }
    }

    /// Set the `from` and `to` versions.
    #[must_use]
    pub fn versions(mut self, from: Option<VersionId>, to: Option<VersionId>) -> Self {
        self.from_version = from;
        self.to_version = to;
        self
    }

    #[must_use]
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = detail.into();
        self
    }

    /// Link this event after `prev_hash` and compute its own hash.
    #[must_use]
    pub fn chained(mut self, prev_hash: [u8; 32]) -> Self {
        self.prev_hash = prev_hash;
        self.hash = compute_hash(&self);
        self
    }
}

/// Destination for audit events. Implementations chain the events they store.
pub trait AuditSink: Send + Sync + std::fmt::Debug {
    /// Append one event and return it as stored (hashes filled in).
    fn record(&self, event: AuditEvent) -> Result<AuditEvent, AuditError>;
}

/// In-memory audit log
#[derive(Debug, Default)]
pub struct AuditLog {
    inner: Mutex<Vec<AuditEvent>>,
}

impl AuditLog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of every stored event, oldest first.
    pub fn events(&self) -> Vec<AuditEvent> {
        self.inner.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    /// Recompute the chain over the stored events.
    pub fn verify_integrity(&self) -> Result<(), AuditError> {
        verify_chain(&self.inner.lock())
    }
}

impl AuditSink for AuditLog {
    fn record(&self, event: AuditEvent) -> Result<AuditEvent, AuditError> {
        let mut guard = self.inner.lock();
        let prev_hash = guard.last().map_or([0u8; 32], |e| e.hash);
        let event = event.chained(prev_hash);
        guard.push(event.clone());
        Ok(event)
    }
}

/// Recompute the chain, reporting the first broken link.
pub fn verify_chain(events: &[AuditEvent]) -> Result<(), AuditError> {
    let mut prev = [0u8; 32];
    for (index, e) in events.iter().enumerate() {
        if e.prev_hash != prev || e.hash != compute_hash(e) {
            return Err(AuditError::IntegrityViolation { index });
        }
        prev = e.hash;
    }
    Ok(())
}

fn compute_hash(event: &AuditEvent) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(event.event_id.as_bytes());
    hasher.update(
        event
            .timestamp
            .to_rfc3339_opts(SecondsFormat::Nanos, true)
            .as_bytes(),
    );
    hasher.update([0]);
    hasher.update(event.actor.as_str().as_bytes());
    hasher.update([0]);
    hasher.update(event.operation.as_str().as_bytes());
    hasher.update([0]);
    for version in [event.from_version, event.to_version] {
        match version {
            Some(v) => hasher.update(v.to_string().as_bytes()),
            None => hasher.update(b"-"),
        }
        hasher.update([0]);
    }
    hasher.update(event.outcome.as_str().as_bytes());
    hasher.update([0]);
    hasher.update(event.detail.as_bytes());
    hasher.update([0]);
    hasher.update(event.prev_hash);
    hasher.finalize().into()
}
