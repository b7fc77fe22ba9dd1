//! Structural validation of a taxonomy version.
//!
//! The validator is pure: it reads a node set and an edge set and reports
//! every cycle, orphan and path mismatch it finds. It only fails outright
//! when the input is not a graph (dangling endpoints, duplicate ids).

use crate::error::MalformedInput;
use crate::types::{NodeId, TaxonomyEdge, TaxonomyNode};
use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;
use petgraph::Direction;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Outcome of one validation pass. Built fresh per call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub is_valid: bool,
    /// Human-readable description of every problem found.
    pub errors: Vec<String>,
    /// Each cycle as the node sequence along the back edge, starting at the repeated node.
    pub cycles: Vec<Vec<NodeId>>,
    pub orphaned_nodes: Vec<NodeId>,
    /// Nodes whose stored canonical path differs from the derived one.
    #[serde(default)]
    pub path_mismatches: Vec<NodeId>,
}

impl ValidationResult {
    /// A result with no findings.
    #[must_use]
    pub fn valid() -> Self {
        Self {
            is_valid: true,
            ..Self::default()
        }
    }

    /// A result carrying only free-form errors (e.g. a change-set that could not be applied).
    #[must_use]
    pub fn rejected(errors: Vec<String>) -> Self {
        Self {
            is_valid: errors.is_empty(),
            errors,
            ..Self::default()
        }
    }

    pub fn push_error(&mut self, message: impl Into<String>) {
        self.errors.push(message.into());
        self.is_valid = false;
    }

    /// One-line summary used in error messages and logs.
    #[must_use]
    pub fn summary(&self) -> String {
        if self.is_valid {
            return "valid".to_string();
        }
        let mut out = format!(
            "{} error(s), {} cycle(s), {} orphan(s)",
            self.errors.len(),
            self.cycles.len(),
            self.orphaned_nodes.len()
        );
        if let Some(first) = self.errors.first() {
            out.push_str(": ");
            out.push_str(first);
        }
        out
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Colour {
    Unvisited,
    InProgress,
    Done,
}

/// Arena view of a node set: index `i` is the `i`-th smallest `NodeId`.
struct Arena<'a> {
    nodes: Vec<&'a TaxonomyNode>,
    children: Vec<Vec<usize>>,
    parents: Vec<Vec<usize>>,
}

impl<'a> Arena<'a> {
    fn build<N, E>(nodes: N, edges: E) -> Result<Self, MalformedInput>
    where
        N: IntoIterator<Item = &'a TaxonomyNode>,
        E: IntoIterator<Item = &'a TaxonomyEdge>,
    {
        let mut nodes: Vec<&TaxonomyNode> = nodes.into_iter().collect();
        nodes.sort_by_key(|n| n.node_id);
        if let Some(pair) = nodes.windows(2).find(|w| w[0].node_id == w[1].node_id) {
            return Err(MalformedInput::DuplicateNode(pair[0].node_id));
        }

        let index: HashMap<NodeId, usize> = nodes
            .iter()
            .enumerate()
            .map(|(i, n)| (n.node_id, i))
            .collect();

        let mut children = vec![Vec::new(); nodes.len()];
        let mut parents = vec![Vec::new(); nodes.len()];
        for edge in edges {
            let lookup = |id: NodeId| {
                index.get(&id).copied().ok_or(MalformedInput::DanglingEdge {
                    parent: edge.parent,
                    child: edge.child,
                    missing: id,
                })
            };
            let p = lookup(edge.parent)?;
            let c = lookup(edge.child)?;
            children[p].push(c);
            parents[c].push(p);
        }
        for list in children.iter_mut().chain(parents.iter_mut()) {
            list.sort_unstable();
            list.dedup();
        }

        Ok(Self {
            nodes,
            children,
            parents,
        })
    }

    fn id(&self, i: usize) -> NodeId {
        self.nodes[i].node_id
    }
}

/// Checks acyclicity, reachability and canonical paths.
#[derive(Debug, Clone, Copy, Default)]
pub struct DagValidator;

impl DagValidator {
    /// Validate a node/edge set.
    ///
    /// Returns `Err` only for malformed input: an edge endpoint that is not in
    /// `nodes`, or the same node id twice.
    pub fn validate<'a, N, E>(nodes: N, edges: E) -> Result<ValidationResult, MalformedInput>
    where
        N: IntoIterator<Item = &'a TaxonomyNode>,
        E: IntoIterator<Item = &'a TaxonomyEdge>,
    {
        let edges: Vec<&TaxonomyEdge> = edges.into_iter().collect();
        let arena = Arena::build(nodes, edges.iter().copied())?;
        let mut result = ValidationResult::valid();
        let n = arena.nodes.len();

        let roots: Vec<usize> = (0..n).filter(|&i| arena.nodes[i].is_root).collect();
        if n > 0 && roots.is_empty() {
            result.push_error(format!("taxonomy has {n} node(s) but no root"));
        }

        for &r in &roots {
            if let Some(&p) = arena.parents[r].first() {
                result.push_error(format!(
                    "root {} ('{}') has parent {}",
                    arena.id(r),
                    arena.nodes[r].label,
                    arena.id(p)
                ));
            }
        }

        for node in &arena.nodes {
            if !(0.0..=1.0).contains(&node.confidence) {
                result.push_error(format!(
                    "node {} confidence {} outside [0, 1]",
                    node.node_id, node.confidence
                ));
            }
        }

        let mut colour = vec![Colour::Unvisited; n];
        for &r in &roots {
            if colour[r] == Colour::Unvisited {
                walk(&arena, r, &mut colour, &mut result.cycles);
            }
        }
        let reached: Vec<bool> = colour.iter().map(|c| *c == Colour::Done).collect();

        // Remaining nodes are orphans, but a cycle among them is still a cycle.
        for i in 0..n {
            if colour[i] == Colour::Unvisited {
                walk(&arena, i, &mut colour, &mut result.cycles);
            }
        }

        for cycle in &result.cycles {
            let rendered: Vec<String> = cycle
                .iter()
                .chain(cycle.first())
                .map(ToString::to_string)
                .collect();
            result.errors.push(format!("cycle detected: {}", rendered.join(" -> ")));
        }

        for (i, was_reached) in reached.iter().enumerate() {
            if !was_reached {
                result.orphaned_nodes.push(arena.id(i));
                result.errors.push(format!(
                    "node {} ('{}') is not reachable from any root",
                    arena.id(i),
                    arena.nodes[i].label
                ));
            }
        }

        if result.cycles.is_empty() {
            let derived =
                derive_canonical_paths(arena.nodes.iter().copied(), edges.iter().copied());
            if let Some(derived) = derived {
                for node in &arena.nodes {
                    let Some(expected) = derived.get(&node.node_id) else {
                        continue;
                    };
                    if *expected != node.canonical_path {
                        result.path_mismatches.push(node.node_id);
                        result.errors.push(format!(
                            "node {} canonical path {:?} does not match derived {:?}",
                            node.node_id, node.canonical_path, expected
                        ));
                    }
                }
            }
        }

        result.is_valid = result.errors.is_empty();
        Ok(result)
    }
}

/// Iterative three-colour DFS from `start`. Back edges are recorded as cycles.
fn walk(arena: &Arena<'_>, start: usize, colour: &mut [Colour], cycles: &mut Vec<Vec<NodeId>>) {
    // (node, index of the next child to visit)
    let mut stack: Vec<(usize, usize)> = vec![(start, 0)];
    colour[start] = Colour::InProgress;

    while let Some(frame) = stack.last_mut() {
        let (node, next) = *frame;
        let Some(&child) = arena.children[node].get(next) else {
            colour[node] = Colour::Done;
            stack.pop();
            continue;
        };
        frame.1 += 1;

        match colour[child] {
            Colour::Unvisited => {
                colour[child] = Colour::InProgress;
                stack.push((child, 0));
            }
            Colour::InProgress => {
                let from = stack
                    .iter()
                    .position(|(n, _)| *n == child)
                    .unwrap_or(stack.len() - 1);
                cycles.push(stack[from..].iter().map(|(n, _)| arena.id(*n)).collect());
            }
            Colour::Done => {}
        }
    }
}

/// Canonical path of every node that has one.
///
/// A root's path is `[label]`. Any other node extends the path of its primary
/// parent: the smallest-id parent that itself has a path. Nodes with no such
/// parent are left out. Returns `None` when the edges contain a cycle.
pub fn derive_canonical_paths<'a, N, E>(nodes: N, edges: E) -> Option<BTreeMap<NodeId, Vec<String>>>
where
    N: IntoIterator<Item = &'a TaxonomyNode>,
    E: IntoIterator<Item = &'a TaxonomyEdge>,
{
    let mut graph: DiGraphMap<NodeId, ()> = DiGraphMap::new();
    let mut by_id: HashMap<NodeId, &TaxonomyNode> = HashMap::new();
    for node in nodes {
        graph.add_node(node.node_id);
        by_id.insert(node.node_id, node);
    }
    for edge in edges {
        graph.add_edge(edge.parent, edge.child, ());
    }

    let order = toposort(&graph, None).ok()?;
    let mut paths: BTreeMap<NodeId, Vec<String>> = BTreeMap::new();
    for id in order {
        let Some(node) = by_id.get(&id) else {
            continue;
        };
        if node.is_root {
            paths.insert(id, vec![node.label.clone()]);
            continue;
        }
        let primary = graph
            .neighbors_directed(id, Direction::Incoming)
            .filter(|p| paths.contains_key(p))
            .min();
        if let Some(parent_path) = primary.and_then(|p| paths.get(&p)) {
            let mut path = parent_path.clone();
            path.push(node.label.clone());
            paths.insert(id, path);
        }
    }
    Some(paths)
}
