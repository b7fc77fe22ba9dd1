//! Error types for the taxonomy kernel
//!
//! Structural problems (cycles, orphans, path mismatches) are data, carried
//! by [`TaxonomyError::DagIntegrity`]. Conflicts are surfaced to the caller
//! without internal retries. Only storage I/O is retried, inside the kernel.

use crate::dag::ValidationResult;
use crate::state_machine::RollbackPhase;
use crate::types::{NodeId, VersionId};
use std::fmt;

/// Main kernel error type
#[derive(Debug, thiserror::Error)]
pub enum TaxonomyError {
    /// Change-set rejected by the DAG validator
    #[error("DAG integrity violation: {}", .0.summary())]
    DagIntegrity(ValidationResult),

    /// Unknown version or node
    #[error("not found: {0}")]
    NotFound(NotFound),

    /// Another activation holds the activation lock
    #[error("another activation is already in flight")]
    ConcurrentActivation,

    /// Rollbacks are serialized and never queued
    #[error("a rollback is already in progress")]
    RollbackAlreadyInProgress,

    /// A rollback advanced the epoch while this migration was in flight
    #[error("stale epoch: migration started at epoch {started}, epoch is now {current}")]
    StaleEpoch { started: u64, current: u64 },

    /// Storage I/O kept failing after bounded retries
    #[error("persistence failed during {operation} after {attempts} attempt(s): {source}")]
    Persistence {
        operation: &'static str,
        attempts: u32,
        #[source]
        source: BackendError,
    },

    /// Rollback did not complete
    #[error("rollback to {target} failed after {elapsed_ms}ms: {reason}")]
    RollbackFailed {
        target: VersionId,
        elapsed_ms: u64,
        reason: RollbackFailure,
    },

    /// Prune would remove a version that must be retained
    #[error("cannot prune {version}: {reason}")]
    PruneRefused { version: VersionId, reason: String },

    /// No version id left after the current maximum
    #[error("version space exhausted after {0}")]
    VersionSpaceExhausted(VersionId),

    /// Snapshot store invariant breached
    #[error("store error: {0}")]
    Store(StoreError),

    /// Validator input that is not a graph at all
    #[error("malformed input: {0}")]
    Malformed(#[from] MalformedInput),

    /// Invalid configuration
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Illegal rollback phase transition
    #[error("state machine error: {0}")]
    StateMachine(#[from] StateMachineError),

    /// Audit sink could not be opened
    #[error("audit error: {0}")]
    Audit(#[from] AuditError),
}

impl TaxonomyError {
    /// Errors the caller can act on without operator involvement.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::DagIntegrity(_)
            | Self::NotFound(_)
            | Self::ConcurrentActivation
            | Self::RollbackAlreadyInProgress
            | Self::StaleEpoch { .. }
            | Self::PruneRefused { .. }
            | Self::Malformed(_) => true,
            Self::Persistence { .. }
            | Self::RollbackFailed { .. }
            | Self::VersionSpaceExhausted(_)
            | Self::Store(_)
            | Self::Config(_)
            | Self::StateMachine(_)
            | Self::Audit(_) => false,
        }
    }

    /// A competing operation won; the caller may retry after backoff.
    #[inline]
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            Self::ConcurrentActivation | Self::RollbackAlreadyInProgress | Self::StaleEpoch { .. }
        )
    }

    /// Retrying the same request later can succeed.
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        self.is_conflict()
    }

    /// Validation detail, when the error is a rejected change-set.
    #[must_use]
    pub fn validation(&self) -> Option<&ValidationResult> {
        match self {
            Self::DagIntegrity(result) => Some(result),
            _ => None,
        }
    }
}

impl From<StoreError> for TaxonomyError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::VersionNotFound(version) => Self::NotFound(NotFound::Version(version)),
            other => Self::Store(other),
        }
    }
}

/// What was not found
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotFound {
    Version(VersionId),
    Node(NodeId),
}

impl fmt::Display for NotFound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NotFound::Version(v) => write!(f, "version {v}"),
            NotFound::Node(n) => write!(f, "node {n}"),
        }
    }
}

/// Why a rollback attempt ended in `RollbackFailed`
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RollbackFailure {
    /// Target version does not exist (or was pruned)
    TargetNotFound { target: VersionId },
    /// TTR budget elapsed before activation completed
    DeadlineExceeded { budget_ms: u64 },
    /// Activation itself failed
    Activation { message: String },
}

impl fmt::Display for RollbackFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TargetNotFound { target } => write!(f, "target version {target} not found"),
            Self::DeadlineExceeded { budget_ms } => {
                write!(f, "deadline of {budget_ms}ms exceeded")
            }
            Self::Activation { message } => write!(f, "activation failed: {message}"),
        }
    }
}

/// Snapshot store errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("version {0} not found")]
    VersionNotFound(VersionId),

    /// Committed partitions never change
    #[error("version {0} is sealed")]
    VersionSealed(VersionId),

    #[error("edge {parent} -> {child} references a node missing from version {version}")]
    DanglingEdge {
        parent: NodeId,
        child: NodeId,
        version: VersionId,
    },
}

/// Input the validator cannot interpret as a node/edge set
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MalformedInput {
    #[error("edge {parent} -> {child} references unknown node {missing}")]
    DanglingEdge {
        parent: NodeId,
        child: NodeId,
        missing: NodeId,
    },

    #[error("node {0} appears more than once")]
    DuplicateNode(NodeId),
}

/// Storage backend errors
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Transient unavailability (injected in tests, remote stores)
    #[error("backend unavailable: {0}")]
    Unavailable(String),

    /// Persisted data failed to parse or re-validate
    #[error("corrupt persisted state: {0}")]
    Corrupt(String),
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Audit sink errors
#[derive(Debug, thiserror::Error)]
pub enum AuditError {
    #[error("audit I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("audit serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Hash chain broken at the given event index
    #[error("audit chain integrity violation at event {index}")]
    IntegrityViolation { index: usize },
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StateMachineError {
    #[error("illegal rollback transition {from:?} -> {to:?}")]
    IllegalTransition { from: RollbackPhase, to: RollbackPhase },
}
