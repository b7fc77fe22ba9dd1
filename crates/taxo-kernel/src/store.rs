//! Per-version node and edge partitions.
//!
//! A partition is written only while its version is being committed, under a
//! [`WriteTxn`]. Sealing makes it visible to readers and immutable. Partitions
//! are `im::OrdMap`s, so a version staged from its base shares every record
//! it did not touch.

use crate::error::StoreError;
use crate::types::{EdgeKey, NodeId, TaxonomyEdge, TaxonomyNode, VersionId};
use im::OrdMap;
use parking_lot::RwLock;
use std::collections::BTreeMap;

/// Records stored in a [`VersionedTable`] know their own key.
pub trait Keyed: Clone {
    type Key: Ord + Clone + std::fmt::Debug;

    fn key(&self) -> Self::Key;
}

impl Keyed for TaxonomyNode {
    type Key = NodeId;

    fn key(&self) -> NodeId {
        self.node_id
    }
}

impl Keyed for TaxonomyEdge {
    type Key = EdgeKey;

    fn key(&self) -> EdgeKey {
        TaxonomyEdge::key(self)
    }
}

/// Write capability for one uncommitted version.
///
/// Only the version manager can open one, and only while it holds the commit lock.
#[derive(Debug)]
pub struct WriteTxn {
    version: VersionId,
}

impl WriteTxn {
    pub(crate) fn new(version: VersionId) -> Self {
        Self { version }
    }

    #[must_use]
    pub fn version(&self) -> VersionId {
        self.version
    }
}

#[derive(Debug, Clone)]
struct Partition<T: Keyed> {
    items: OrdMap<T::Key, T>,
    sealed: bool,
}

/// Version-partitioned table of immutable records.
#[derive(Debug)]
pub struct VersionedTable<T: Keyed> {
    partitions: RwLock<BTreeMap<VersionId, Partition<T>>>,
}

impl<T: Keyed> Default for VersionedTable<T> {
    fn default() -> Self {
        Self {
            partitions: RwLock::new(BTreeMap::new()),
        }
    }
}

impl<T: Keyed> VersionedTable<T> {
    /// Sealed contents of `version`. Staging partitions are invisible.
    pub fn get(&self, version: VersionId) -> Result<OrdMap<T::Key, T>, StoreError> {
        match self.partitions.read().get(&version) {
            Some(p) if p.sealed => Ok(p.items.clone()),
            _ => Err(StoreError::VersionNotFound(version)),
        }
    }

    pub fn contains(&self, version: VersionId) -> bool {
        self.partitions
            .read()
            .get(&version)
            .is_some_and(|p| p.sealed)
    }

    /// Sealed versions in ascending order.
    pub fn versions(&self) -> Vec<VersionId> {
        self.partitions
            .read()
            .iter()
            .filter(|(_, p)| p.sealed)
            .map(|(v, _)| *v)
            .collect()
    }

    /// Insert records into the staging partition of `txn`.
    pub fn put<I>(&self, txn: &WriteTxn, items: I) -> Result<(), StoreError>
    where
        I: IntoIterator<Item = T>,
    {
        let mut guard = self.partitions.write();
        let partition = staging(&mut guard, txn.version())?;
        for item in items {
            partition.items.insert(item.key(), item);
        }
        Ok(())
    }

    /// Replace the staging partition wholesale, keeping structural sharing with `items`.
    pub(crate) fn stage(&self, txn: &WriteTxn, items: OrdMap<T::Key, T>) -> Result<(), StoreError> {
        let mut guard = self.partitions.write();
        staging(&mut guard, txn.version())?.items = items;
        Ok(())
    }

    fn staged_contains(&self, txn: &WriteTxn, key: &T::Key) -> bool {
        self.partitions
            .read()
            .get(&txn.version())
            .is_some_and(|p| !p.sealed && p.items.contains_key(key))
    }

    pub(crate) fn seal(&self, version: VersionId) -> Result<(), StoreError> {
        let mut guard = self.partitions.write();
        let partition = guard
            .get_mut(&version)
            .ok_or(StoreError::VersionNotFound(version))?;
        partition.sealed = true;
        Ok(())
    }

    /// Drop an unsealed partition after a failed commit. Sealed partitions are left alone.
    pub(crate) fn discard(&self, version: VersionId) {
        let mut guard = self.partitions.write();
        if guard.get(&version).is_some_and(|p| !p.sealed) {
            guard.remove(&version);
        }
    }

    /// Remove a sealed partition. Only prune calls this.
    pub(crate) fn remove(&self, version: VersionId) -> Result<(), StoreError> {
        self.partitions
            .write()
            .remove(&version)
            .map(|_| ())
            .ok_or(StoreError::VersionNotFound(version))
    }

    /// Install an already-validated partition as sealed (recovery and bootstrap).
    pub(crate) fn install(&self, version: VersionId, items: OrdMap<T::Key, T>) {
        self.partitions.write().insert(
            version,
            Partition {
                items,
                sealed: true,
            },
        );
    }
}

fn staging<T: Keyed>(
    partitions: &mut BTreeMap<VersionId, Partition<T>>,
    version: VersionId,
) -> Result<&mut Partition<T>, StoreError> {
    let partition = partitions.entry(version).or_insert_with(|| Partition {
        items: OrdMap::new(),
        sealed: false,
    });
    if partition.sealed {
        return Err(StoreError::VersionSealed(version));
    }
    Ok(partition)
}

/// Node records per version.
#[derive(Debug, Default)]
pub struct NodeStore {
    table: VersionedTable<TaxonomyNode>,
}

impl NodeStore {
    pub fn get_nodes(&self, version: VersionId) -> Result<OrdMap<NodeId, TaxonomyNode>, StoreError> {
        self.table.get(version)
    }

    pub fn put_nodes<I>(&self, txn: &WriteTxn, nodes: I) -> Result<(), StoreError>
    where
        I: IntoIterator<Item = TaxonomyNode>,
    {
        self.table.put(txn, nodes)
    }

    pub(crate) fn table(&self) -> &VersionedTable<TaxonomyNode> {
        &self.table
    }
}

/// Edge records per version. Endpoints must exist in the same version's node partition.
#[derive(Debug, Default)]
pub struct EdgeStore {
    table: VersionedTable<TaxonomyEdge>,
}

impl EdgeStore {
    pub fn get_edges(&self, version: VersionId) -> Result<OrdMap<EdgeKey, TaxonomyEdge>, StoreError> {
        self.table.get(version)
    }

    pub fn put_edges<I>(&self, txn: &WriteTxn, nodes: &NodeStore, edges: I) -> Result<(), StoreError>
    where
        I: IntoIterator<Item = TaxonomyEdge>,
    {
        let edges: Vec<TaxonomyEdge> = edges.into_iter().collect();
        check_endpoints(txn, nodes, edges.iter())?;
        self.table.put(txn, edges)
    }

    pub(crate) fn stage_edges(
        &self,
        txn: &WriteTxn,
        nodes: &NodeStore,
        edges: OrdMap<EdgeKey, TaxonomyEdge>,
    ) -> Result<(), StoreError> {
        check_endpoints(txn, nodes, edges.values())?;
        self.table.stage(txn, edges)
    }

    pub(crate) fn table(&self) -> &VersionedTable<TaxonomyEdge> {
        &self.table
    }
}

fn check_endpoints<'a>(
    txn: &WriteTxn,
    nodes: &NodeStore,
    edges: impl Iterator<Item = &'a TaxonomyEdge>,
) -> Result<(), StoreError> {
    for edge in edges {
        if !nodes.table.staged_contains(txn, &edge.parent)
            || !nodes.table.staged_contains(txn, &edge.child)
        {
            return Err(StoreError::DanglingEdge {
                parent: edge.parent,
                child: edge.child,
                version: txn.version(),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::NodeDraft;

    fn root(id: u128, version: VersionId) -> TaxonomyNode {
        NodeDraft::new(NodeId::from_u128(id), "Root")
            .root()
            .into_node(version, vec!["Root".to_string()])
    }

    #[test]
    fn staging_partition_is_invisible_until_sealed() {
        let nodes = NodeStore::default();
        let v = VersionId::new(1, 0);
        let txn = WriteTxn::new(v);
        nodes.put_nodes(&txn, [root(1, v)]).unwrap();

        assert_eq!(nodes.get_nodes(v), Err(StoreError::VersionNotFound(v)));
        nodes.table().seal(v).unwrap();
        assert_eq!(nodes.get_nodes(v).unwrap().len(), 1);
    }

    #[test]
    fn sealed_partition_rejects_writes() {
        let nodes = NodeStore::default();
        let v = VersionId::new(1, 0);
        let txn = WriteTxn::new(v);
        nodes.put_nodes(&txn, [root(1, v)]).unwrap();
        nodes.table().seal(v).unwrap();

        let again = WriteTxn::new(v);
        assert_eq!(
            nodes.put_nodes(&again, [root(2, v)]),
            Err(StoreError::VersionSealed(v))
        );
        assert_eq!(nodes.get_nodes(v).unwrap().len(), 1);
    }

    #[test]
    fn edges_need_staged_endpoints() {
        let nodes = NodeStore::default();
        let edges = EdgeStore::default();
        let v = VersionId::new(1, 0);
        let txn = WriteTxn::new(v);
        nodes.put_nodes(&txn, [root(1, v)]).unwrap();

        let edge = TaxonomyEdge {
            parent: NodeId::from_u128(1),
            child: NodeId::from_u128(2),
            version: v,
        };
        assert!(matches!(
            edges.put_edges(&txn, &nodes, [edge]),
            Err(StoreError::DanglingEdge { .. })
        ));
    }

    #[test]
    fn discard_only_drops_unsealed() {
        let nodes = NodeStore::default();
        let v1 = VersionId::new(1, 0);
        let v2 = VersionId::new(1, 1);
        nodes.table().install(v1, OrdMap::unit(NodeId::from_u128(1), root(1, v1)));
        nodes.put_nodes(&WriteTxn::new(v2), [root(1, v2)]).unwrap();

        nodes.table().discard(v1);
        nodes.table().discard(v2);
        assert_eq!(nodes.table().versions(), vec![v1]);
    }
}
