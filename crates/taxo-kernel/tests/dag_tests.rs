//! Validator behaviour on generated graphs, checked against a brute-force closure.

use proptest::prelude::*;
use std::collections::BTreeSet;
use taxo_kernel::dag::{derive_canonical_paths, DagValidator};
use taxo_kernel::{NodeId, TaxonomyEdge, TaxonomyNode, VersionId};

fn node(i: usize, is_root: bool) -> TaxonomyNode {
    TaxonomyNode {
        node_id: NodeId::from_u128(i as u128 + 1),
        version: VersionId::new(1, 0),
        label: format!("n{i}"),
        canonical_path: Vec::new(),
        confidence: 1.0,
        document_count: 0,
        description: None,
        is_root,
    }
}

fn edge(parent: usize, child: usize) -> TaxonomyEdge {
    TaxonomyEdge {
        parent: NodeId::from_u128(parent as u128 + 1),
        child: NodeId::from_u128(child as u128 + 1),
        version: VersionId::new(1, 0),
    }
}

/// `reach[i][j]`: a path of length >= 1 leads from `i` to `j`.
fn closure(n: usize, edges: &BTreeSet<(usize, usize)>) -> Vec<Vec<bool>> {
    let mut reach = vec![vec![false; n]; n];
    for &(p, c) in edges {
        reach[p][c] = true;
    }
    for k in 0..n {
        for i in 0..n {
            if reach[i][k] {
                for j in 0..n {
                    if reach[k][j] {
                        reach[i][j] = true;
                    }
                }
            }
        }
    }
    reach
}

fn arbitrary_graph() -> impl Strategy<Value = (usize, BTreeSet<(usize, usize)>)> {
    (1usize..10).prop_flat_map(|n| {
        (
            Just(n),
            prop::collection::btree_set((0..n, 0..n), 0..(n * 2)),
        )
    })
}

/// Every node `i > 0` gets at least one parent below it, so the graph is a rooted DAG.
fn rooted_dag() -> impl Strategy<Value = (usize, BTreeSet<(usize, usize)>)> {
    (2usize..12).prop_flat_map(|n| {
        let parents = (1..n)
            .map(|i| prop::collection::btree_set(0..i, 1..=i.min(3)))
            .collect::<Vec<_>>();
        (Just(n), parents).prop_map(|(n, parents)| {
            let edges: BTreeSet<(usize, usize)> = parents
                .into_iter()
                .enumerate()
                .flat_map(|(i, ps)| ps.into_iter().map(move |p| (p, i + 1)))
                .collect();
            (n, edges)
        })
    })
}

proptest! {
    #[test]
    fn cycles_and_orphans_match_the_closure((n, edges) in arbitrary_graph()) {
        let nodes: Vec<_> = (0..n).map(|i| node(i, i == 0)).collect();
        let edge_list: Vec<_> = edges.iter().map(|&(p, c)| edge(p, c)).collect();
        let result = DagValidator::validate(&nodes, &edge_list).unwrap();

        let reach = closure(n, &edges);
        let cyclic = (0..n).any(|i| reach[i][i]);
        prop_assert_eq!(!result.cycles.is_empty(), cyclic);

        let expected_orphans: Vec<NodeId> = (1..n)
            .filter(|&i| !reach[0][i])
            .map(|i| NodeId::from_u128(i as u128 + 1))
            .collect();
        prop_assert_eq!(&result.orphaned_nodes, &expected_orphans);

        // Every reported cycle is a real closed walk.
        for cycle in &result.cycles {
            for (k, from) in cycle.iter().enumerate() {
                let to = cycle[(k + 1) % cycle.len()];
                prop_assert!(edge_list.iter().any(|e| e.parent == *from && e.child == to));
            }
        }
        if !result.is_valid {
            prop_assert!(!result.errors.is_empty());
        }
    }

    #[test]
    fn rooted_dags_with_derived_paths_are_valid((n, edges) in rooted_dag()) {
        let mut nodes: Vec<_> = (0..n).map(|i| node(i, i == 0)).collect();
        let edge_list: Vec<_> = edges.iter().map(|&(p, c)| edge(p, c)).collect();

        let paths = derive_canonical_paths(&nodes, &edge_list).unwrap();
        prop_assert_eq!(paths.len(), n);
        for node in &mut nodes {
            node.canonical_path = paths[&node.node_id].clone();
        }

        let result = DagValidator::validate(&nodes, &edge_list).unwrap();
        prop_assert!(result.is_valid, "{}", result.summary());
        prop_assert!(result.cycles.is_empty());
        prop_assert!(result.orphaned_nodes.is_empty());
    }
}

#[test]
fn self_loop_is_a_cycle_of_one() {
    let nodes = vec![node(0, true), node(1, false)];
    let edges = vec![edge(0, 1), edge(1, 1)];
    let result = DagValidator::validate(&nodes, &edges).unwrap();
    assert!(!result.is_valid);
    assert_eq!(result.cycles, vec![vec![NodeId::from_u128(2)]]);
    assert!(result.orphaned_nodes.is_empty());
}

#[test]
fn stale_path_is_reported() {
    let mut nodes = vec![node(0, true), node(1, false)];
    nodes[0].canonical_path = vec!["n0".to_string()];
    nodes[1].canonical_path = vec!["elsewhere".to_string(), "n1".to_string()];
    let result = DagValidator::validate(&nodes, &[edge(0, 1)]).unwrap();
    assert!(!result.is_valid);
    assert_eq!(result.path_mismatches, vec![NodeId::from_u128(2)]);
}
