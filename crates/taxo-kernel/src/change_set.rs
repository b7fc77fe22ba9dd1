//! Change-sets: the only way to produce a new version.

use crate::dag::derive_canonical_paths;
use crate::types::{Actor, Bump, EdgeKey, NodeDraft, NodeId, TaxonomyEdge, TaxonomyNode, VersionId};
use crate::version::TaxonomyTree;
use im::OrdMap;
use serde::{Deserialize, Serialize};

/// One structural edit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ChangeOp {
    AddNode(NodeDraft),
    /// Replace the attributes of an existing node. The canonical path is re-derived.
    UpdateNode(NodeDraft),
    /// Also removes every edge touching the node.
    RemoveNode { node_id: NodeId },
    AddEdge { parent: NodeId, child: NodeId },
    RemoveEdge { parent: NodeId, child: NodeId },
    /// Detach `node_id` from all of its parents and attach it under `new_parent`.
    MoveSubtree { node_id: NodeId, new_parent: NodeId },
}

/// An ordered batch of edits against a base version.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ChangeSet {
    #[serde(default)]
    pub author: Actor,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub bump: Bump,
    #[serde(default)]
    pub ops: Vec<ChangeOp>,
}

impl ChangeSet {
    pub fn new(author: Actor) -> Self {
        Self {
            author,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Allocate `(major + 1).0` instead of the next minor.
    #[must_use]
    pub fn major(mut self) -> Self {
        self.bump = Bump::Major;
        self
    }

    #[must_use]
    pub fn push(mut self, op: ChangeOp) -> Self {
        self.ops.push(op);
        self
    }

    #[must_use]
    pub fn add_node(self, draft: NodeDraft) -> Self {
        self.push(ChangeOp::AddNode(draft))
    }

    #[must_use]
    pub fn update_node(self, draft: NodeDraft) -> Self {
        self.push(ChangeOp::UpdateNode(draft))
    }

    #[must_use]
    pub fn remove_node(self, node_id: NodeId) -> Self {
        self.push(ChangeOp::RemoveNode { node_id })
    }

    #[must_use]
    pub fn add_edge(self, parent: NodeId, child: NodeId) -> Self {
        self.push(ChangeOp::AddEdge { parent, child })
    }

    #[must_use]
    pub fn remove_edge(self, parent: NodeId, child: NodeId) -> Self {
        self.push(ChangeOp::RemoveEdge { parent, child })
    }

    #[must_use]
    pub fn move_subtree(self, node_id: NodeId, new_parent: NodeId) -> Self {
        self.push(ChangeOp::MoveSubtree {
            node_id,
            new_parent,
        })
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Apply the ops to a copy of `base`, tagging every new or changed record
    /// with `version`. Ops that cannot apply are skipped and reported.
    pub(crate) fn stage(&self, base: &TaxonomyTree, version: VersionId) -> Staged {
        let mut staged = Staged {
            nodes: base.nodes.clone(),
            edges: base.edges.clone(),
            errors: Vec::new(),
        };
        if self.ops.is_empty() {
            staged.errors.push("change set is empty".to_string());
            return staged;
        }

        for (index, op) in self.ops.iter().enumerate() {
            if let Err(message) = staged.apply(op, version) {
                staged.errors.push(format!("op {index}: {message}"));
            }
        }
        staged.rederive_paths(version);
        staged
    }
}

/// Result of staging a change-set. Not yet validated.
#[derive(Debug, Clone)]
pub(crate) struct Staged {
    pub(crate) nodes: OrdMap<NodeId, TaxonomyNode>,
    pub(crate) edges: OrdMap<EdgeKey, TaxonomyEdge>,
    /// Ops that could not be applied.
    pub(crate) errors: Vec<String>,
}

impl Staged {
    fn apply(&mut self, op: &ChangeOp, version: VersionId) -> Result<(), String> {
        match op {
            ChangeOp::AddNode(draft) => {
                if self.nodes.contains_key(&draft.node_id) {
                    return Err(format!("node {} already exists", draft.node_id));
                }
                self.nodes
                    .insert(draft.node_id, draft.clone().into_node(version, Vec::new()));
            }
            ChangeOp::UpdateNode(draft) => {
                let existing = self
                    .nodes
                    .get(&draft.node_id)
                    .ok_or_else(|| format!("cannot update unknown node {}", draft.node_id))?;
                let updated = draft
                    .clone()
                    .into_node(version, existing.canonical_path.clone());
                if !existing.same_attributes(&updated) {
                    self.nodes.insert(draft.node_id, updated);
                }
            }
            ChangeOp::RemoveNode { node_id } => {
                if self.nodes.remove(node_id).is_none() {
                    return Err(format!("cannot remove unknown node {node_id}"));
                }
                let incident: Vec<EdgeKey> = self
                    .edges
                    .keys()
                    .filter(|(p, c)| p == node_id || c == node_id)
                    .copied()
                    .collect();
                for key in incident {
                    self.edges.remove(&key);
                }
            }
            ChangeOp::AddEdge { parent, child } => {
                self.require_node(*parent)?;
                self.require_node(*child)?;
                if self.edges.contains_key(&(*parent, *child)) {
                    return Err(format!("edge {parent} -> {child} already exists"));
                }
                self.insert_edge(*parent, *child, version);
            }
            ChangeOp::RemoveEdge { parent, child } => {
                if self.edges.remove(&(*parent, *child)).is_none() {
                    return Err(format!("cannot remove unknown edge {parent} -> {child}"));
                }
            }
            ChangeOp::MoveSubtree {
                node_id,
                new_parent,
            } => {
                let node = self
                    .nodes
                    .get(node_id)
                    .ok_or_else(|| format!("cannot move unknown node {node_id}"))?;
                if node.is_root {
                    return Err(format!("cannot move root {node_id}"));
                }
                self.require_node(*new_parent)?;
                let incoming: Vec<EdgeKey> = self
                    .edges
                    .keys()
                    .filter(|(_, c)| c == node_id)
                    .copied()
                    .collect();
                for key in incoming {
                    self.edges.remove(&key);
                }
                self.insert_edge(*new_parent, *node_id, version);
            }
        }
        Ok(())
    }

    fn require_node(&self, node_id: NodeId) -> Result<(), String> {
        if self.nodes.contains_key(&node_id) {
            Ok(())
        } else {
            Err(format!("edge references unknown node {node_id}"))
        }
    }

    fn insert_edge(&mut self, parent: NodeId, child: NodeId, version: VersionId) {
        self.edges.insert(
            (parent, child),
            TaxonomyEdge {
                parent,
                child,
                version,
            },
        );
    }

    /// Re-tag nodes whose derived path changed. Left alone when the edges are cyclic.
    fn rederive_paths(&mut self, version: VersionId) {
        let Some(paths) = derive_canonical_paths(self.nodes.values(), self.edges.values()) else {
            return;
        };
        let changed: Vec<TaxonomyNode> = self
            .nodes
            .values()
            .filter_map(|node| {
                let path = paths.get(&node.node_id).cloned().unwrap_or_default();
                (path != node.canonical_path).then(|| TaxonomyNode {
                    version,
                    canonical_path: path,
                    ..node.clone()
                })
            })
            .collect();
        for node in changed {
            self.nodes.insert(node.node_id, node);
        }
    }
}
