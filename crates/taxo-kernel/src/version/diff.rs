//! Structural diff between two versions, and its replay as a change-set.
//!
//! A diff replayed onto its `from` tree reproduces the `to` tree, up to the
//! version tags on the records.

use super::TaxonomyTree;
use crate::change_set::ChangeSet;
use crate::types::{Actor, NodeId, TaxonomyEdge, TaxonomyNode, VersionId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A node present in both versions whose attributes differ.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeChange {
    /// The changed node.
    pub node_id: NodeId,
    /// Record in the `from` version.
    pub before: TaxonomyNode,
    /// Record in the `to` version.
    pub after: TaxonomyNode,
}

/// A node whose set of parents changed between versions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubtreeMove {
    /// Root of the moved subtree.
    pub node_id: NodeId,
    /// Parents in the `from` version, ascending.
    pub from_parents: Vec<NodeId>,
    /// Parents in the `to` version, ascending.
    pub to_parents: Vec<NodeId>,
}

/// Structural difference from one version to another.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaxonomyDiff {
    /// Older side of the comparison.
    pub from: VersionId,
    /// Newer side of the comparison.
    pub to: VersionId,
    /// Nodes only in `to`, as recorded there.
    pub added_nodes: Vec<TaxonomyNode>,
    /// Nodes only in `from`.
    pub removed_nodes: Vec<NodeId>,
    /// Attribute changes only. Path changes follow from edge changes.
    pub modified_nodes: Vec<NodeChange>,
    /// Edges only in `to`.
    pub added_edges: Vec<TaxonomyEdge>,
    /// Edges only in `from`.
    pub removed_edges: Vec<TaxonomyEdge>,
    /// Nodes present on both sides whose parent set changed.
    pub moved_subtrees: Vec<SubtreeMove>,
}

impl TaxonomyDiff {
    /// Compare two trees. Every list is ordered by node id / edge key.
    #[must_use]
    pub fn between(from: &TaxonomyTree, to: &TaxonomyTree) -> Self {
        let mut added_nodes = Vec::new();
        let mut modified_nodes = Vec::new();
        for (id, after) in &to.nodes {
            match from.nodes.get(id) {
                None => added_nodes.push(after.clone()),
                Some(before) if !before.same_attributes(after) => modified_nodes.push(NodeChange {
                    node_id: *id,
                    before: before.clone(),
                    after: after.clone(),
                }),
                Some(_) => {}
            }
        }
        let removed_nodes: Vec<NodeId> = from
            .nodes
            .keys()
            .filter(|id| !to.nodes.contains_key(*id))
            .copied()
            .collect();

        let added_edges: Vec<TaxonomyEdge> = to
            .edges
            .iter()
            .filter(|(key, _)| !from.edges.contains_key(*key))
            .map(|(_, edge)| *edge)
            .collect();
        let removed_edges: Vec<TaxonomyEdge> = from
            .edges
            .iter()
            .filter(|(key, _)| !to.edges.contains_key(*key))
            .map(|(_, edge)| *edge)
            .collect();

        let before_parents = parent_sets(from);
        let after_parents = parent_sets(to);
        let moved_subtrees = to
            .nodes
            .keys()
            .filter(|id| from.nodes.contains_key(*id))
            .filter_map(|id| {
                let was = before_parents.get(id)?;
                let now = after_parents.get(id)?;
                (was != now).then(|| SubtreeMove {
                    node_id: *id,
                    from_parents: was.clone(),
                    to_parents: now.clone(),
                })
            })
            .collect();

        Self {
            from: from.version,
            to: to.version,
            added_nodes,
            removed_nodes,
            modified_nodes,
            added_edges,
            removed_edges,
            moved_subtrees,
        }
    }

    /// No structural or attribute change. Moves imply edge changes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.added_nodes.is_empty()
            && self.removed_nodes.is_empty()
            && self.modified_nodes.is_empty()
            && self.added_edges.is_empty()
            && self.removed_edges.is_empty()
    }

    /// Change-set that turns `from` into `to`.
    ///
    /// Edge removals go first and edge additions last, so every op sees the
    /// endpoints it needs.
    #[must_use]
    pub fn to_change_set(&self, author: Actor) -> ChangeSet {
        let mut cs = ChangeSet::new(author)
            .with_description(format!("diff {} -> {}", self.from, self.to));
        for edge in &self.removed_edges {
            cs = cs.remove_edge(edge.parent, edge.child);
        }
        for node_id in &self.removed_nodes {
            cs = cs.remove_node(*node_id);
        }
        for node in &self.added_nodes {
            cs = cs.add_node(node.to_draft());
        }
        for change in &self.modified_nodes {
            cs = cs.update_node(change.after.to_draft());
        }
        for edge in &self.added_edges {
            cs = cs.add_edge(edge.parent, edge.child);
        }
        cs
    }
}

/// Sorted parent list of every node with at least one parent.
fn parent_sets(tree: &TaxonomyTree) -> BTreeMap<NodeId, Vec<NodeId>> {
    let mut parents: BTreeMap<NodeId, Vec<NodeId>> = BTreeMap::new();
    // Edge keys iterate in (parent, child) order, so each list comes out sorted.
    for (parent, child) in tree.edges.keys() {
        parents.entry(*child).or_default().push(*parent);
    }
    parents
}
