//! Taxonomy kernel (taxo-kernel)
//!
//! Versioned, DAG-validated category store:
//! 1. **Commit**: change-sets are staged on a copy-on-write snapshot, validated
//!    for acyclicity, reachability and canonical paths, then sealed as an
//!    immutable version
//! 2. **Serve**: readers get the active version (or any named one) without
//!    blocking writers
//! 3. **Recover**: a rollback cancels in-flight migrations and flips the active
//!    pointer back within a bounded time budget
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use taxo_kernel::prelude::*;
//!
//! let engine = TaxonomyEngine::in_memory().await?;
//! let root = NodeId::new();
//! let cs = ChangeSet::new(Actor::new("curator"))
//!     .major()
//!     .add_node(NodeDraft::new(root, "Science").root());
//!
//! let v1 = engine.apply(VersionId::BOOTSTRAP, &cs).await?;
//! engine.activate(v1, Actor::new("curator")).await?;
//!
//! // later, after a bad release
//! let outcome = engine.rollback(v1, Actor::new("oncall")).await?;
//! assert!(outcome.succeeded);
//! ```

pub mod change_set;
pub mod config;
pub mod dag;
pub mod engine;
pub mod error;
pub mod logging;
pub mod migration;
pub mod persistence;
pub mod rollback;
pub mod state_machine;
pub mod store;
pub mod telemetry;
pub mod types;
pub mod version;

// Test harness
pub mod test_harness;

pub use error::*;
pub use types::*;

/// Common imports
pub mod prelude {
    pub use crate::change_set::{ChangeOp, ChangeSet};
    pub use crate::config::{EngineConfig, RetryPolicy, StorageConfig};
    pub use crate::dag::{DagValidator, ValidationResult};
    pub use crate::engine::TaxonomyEngine;
    pub use crate::error::{RollbackFailure, TaxonomyError};
    pub use crate::logging::{AuditEvent, AuditLog, AuditOperation, AuditOutcome, AuditSink};
    pub use crate::migration::{MigrationEngine, PreviewResult};
    pub use crate::persistence::{JsonFileBackend, MemoryBackend, SnapshotBackend};
    pub use crate::rollback::{RollbackCoordinator, RollbackOutcome};
    pub use crate::state_machine::RollbackPhase;
    pub use crate::types::{Actor, Bump, NodeDraft, NodeId, TaxonomyEdge, TaxonomyNode, VersionId};
    pub use crate::version::{TaxonomyDiff, TaxonomyTree, TreeDocument, VersionManager, VersionMeta};
}

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Check if running with strict debugging enabled
#[must_use]
pub const fn strict_debug() -> bool {
    cfg!(feature = "strict-debug")
}
