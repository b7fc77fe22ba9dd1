//! Core identifiers and records of the taxonomy.
//!
//! Node and edge records are immutable values. A record carries the version
//! that wrote it; versions that did not touch a record share it unchanged.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Identifier of a taxonomy node, stable across versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub Uuid);

impl NodeId {
    /// Fresh random node id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Deterministic node id, mostly useful for fixtures and simulations.
    #[must_use]
    pub const fn from_u128(value: u128) -> Self {
        Self(Uuid::from_u128(value))
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identity of an edge within a version: `(parent, child)`.
pub type EdgeKey = (NodeId, NodeId);

/// Version identifier, rendered as `major.minor`.
///
/// Exactly two numeric parts. A bare integer such as `"3"` parses as `3.0`.
/// Three-part strings like `"1.8.1"` are rejected, in HTTP paths too, where
/// they come back as 400.
///
/// Ordering is lexicographic over `(major, minor)`, which gives the total
/// order the engine allocates ids in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct VersionId {
    major: u32,
    minor: u32,
}

impl VersionId {
    /// The empty taxonomy every engine starts from.
    pub const BOOTSTRAP: Self = Self::new(0, 0);

    /// Build a version id from its parts.
    #[inline]
    #[must_use]
    pub const fn new(major: u32, minor: u32) -> Self {
        Self { major, minor }
    }

    /// Major component.
    #[inline]
    #[must_use]
    pub const fn major(self) -> u32 {
        self.major
    }

    /// Minor component.
    #[inline]
    #[must_use]
    pub const fn minor(self) -> u32 {
        self.minor
    }

    /// Next id after `self` for the given bump, or `None` on overflow.
    #[must_use]
    pub fn bumped(self, bump: Bump) -> Option<Self> {
        match bump {
            Bump::Minor => self.minor.checked_add(1).map(|minor| Self::new(self.major, minor)),
            Bump::Major => self.major.checked_add(1).map(|major| Self::new(major, 0)),
        }
    }
}

impl fmt::Display for VersionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// Error returned when a version string is not `major.minor`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid version id '{0}': expected <major>.<minor>")]
pub struct VersionParseError(pub String);

impl FromStr for VersionId {
    type Err = VersionParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let (major, minor) = match trimmed.split_once('.') {
            Some((major, minor)) => (major, minor),
            None => (trimmed, "0"),
        };
        let major = major
            .parse::<u32>()
            .map_err(|_| VersionParseError(s.to_string()))?;
        let minor = minor
            .parse::<u32>()
            .map_err(|_| VersionParseError(s.to_string()))?;
        Ok(Self::new(major, minor))
    }
}

impl TryFrom<String> for VersionId {
    type Error = VersionParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<VersionId> for String {
    fn from(value: VersionId) -> Self {
        value.to_string()
    }
}

/// Which component a commit increments when allocating its version id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Bump {
    /// `1.3 -> 1.4`
    #[default]
    Minor,
    /// `1.3 -> 2.0`
    Major,
}

/// Who asked for an operation. Recorded on every audit event.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Actor(String);

impl Actor {
    /// Wrap an actor name.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// The engine itself (bootstrap, recovery, simulations).
    #[must_use]
    pub fn system() -> Self {
        Self("system".to_string())
    }

    /// Actor name.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for Actor {
    fn default() -> Self {
        Self::system()
    }
}

impl fmt::Display for Actor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A taxonomy category as stored in one or more versions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaxonomyNode {
    /// Stable identity across versions.
    pub node_id: NodeId,
    /// Version that wrote this record.
    pub version: VersionId,
    /// Display name, used as this node's segment in canonical paths.
    pub label: String,
    /// Labels from a root down to this node. Derived from the edge set.
    pub canonical_path: Vec<String>,
    /// Classification confidence in `[0.0, 1.0]`.
    pub confidence: f64,
    /// Number of documents filed under this category.
    pub document_count: u64,
    /// Free-form curator note.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Designated roots are exempt from the "has a parent" rule.
    #[serde(default)]
    pub is_root: bool,
}

impl TaxonomyNode {
    /// Same user-visible attributes, ignoring the version tag and the derived path.
    #[must_use]
    pub fn same_attributes(&self, other: &Self) -> bool {
        self.node_id == other.node_id
            && self.label == other.label
            && self.confidence.to_bits() == other.confidence.to_bits()
            && self.document_count == other.document_count
            && self.description == other.description
            && self.is_root == other.is_root
    }

    /// Same content, ignoring only the version tag.
    #[must_use]
    pub fn same_content(&self, other: &Self) -> bool {
        self.same_attributes(other) && self.canonical_path == other.canonical_path
    }

    /// Draft carrying this record's attributes, for re-adding or updating it.
    #[must_use]
    pub fn to_draft(&self) -> NodeDraft {
        NodeDraft {
            node_id: self.node_id,
            label: self.label.clone(),
            confidence: self.confidence,
            document_count: self.document_count,
            description: self.description.clone(),
            is_root: self.is_root,
        }
    }
}

/// Parent to child relation inside one version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaxonomyEdge {
    /// Broader category.
    pub parent: NodeId,
    /// Narrower category.
    pub child: NodeId,
    /// Version that wrote this record.
    pub version: VersionId,
}

impl TaxonomyEdge {
    /// `(parent, child)`, without the version tag.
    #[inline]
    #[must_use]
    pub fn key(&self) -> EdgeKey {
        (self.parent, self.child)
    }
}

/// User-supplied node attributes. The path and version tag are assigned by the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeDraft {
    /// Identity of the node to add or update.
    pub node_id: NodeId,
    /// Display name.
    pub label: String,
    /// Defaults to `1.0`.
    #[serde(default = "default_confidence")]
    pub confidence: f64,
    /// Defaults to `0`.
    #[serde(default)]
    pub document_count: u64,
    /// Optional curator note.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Designated root.
    #[serde(default)]
    pub is_root: bool,
}

fn default_confidence() -> f64 {
    1.0
}

impl NodeDraft {
    /// Non-root draft with full confidence and no documents.
    pub fn new(node_id: NodeId, label: impl Into<String>) -> Self {
        Self {
            node_id,
            label: label.into(),
            confidence: default_confidence(),
            document_count: 0,
            description: None,
            is_root: false,
        }
    }

    /// Mark as a designated root.
    #[must_use]
    pub fn root(mut self) -> Self {
        self.is_root = true;
        self
    }

    #[must_use]
    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence;
        self
    }

    #[must_use]
    pub fn with_document_count(mut self, count: u64) -> Self {
        self.document_count = count;
        self
    }

    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub(crate) fn into_node(self, version: VersionId, canonical_path: Vec<String>) -> TaxonomyNode {
        TaxonomyNode {
            node_id: self.node_id,
            version,
            label: self.label,
            canonical_path,
            confidence: self.confidence,
            document_count: self.document_count,
            description: self.description,
            is_root: self.is_root,
        }
    }
}
