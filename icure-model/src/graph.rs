//! Directed graph with memoized reachability.
//!
//! The parent-delegation relation of an entity is stored as an adjacency map
//! from a delegation hash to the hashes of its declared parents. Reachability
//! therefore walks from a node towards its ancestors.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

/// Adjacency-map directed graph. Edges point from a node to its successors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectedGraph<N: Ord + Clone> {
    edges: BTreeMap<N, BTreeSet<N>>,
}

impl<N: Ord + Clone> Default for DirectedGraph<N> {
    fn default() -> Self {
        Self {
            edges: BTreeMap::new(),
        }
    }
}

impl<N: Ord + Clone> DirectedGraph<N> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a graph from `(node, successors)` pairs.
    pub fn from_adjacency<I, S>(adjacency: I) -> Self
    where
        I: IntoIterator<Item = (N, S)>,
        S: IntoIterator<Item = N>,
    {
        let mut graph = Self::new();
        for (node, successors) in adjacency {
            let entry = graph.edges.entry(node).or_default();
            entry.extend(successors);
        }
        graph
    }

    /// Direct successors of a node. Empty for unknown nodes.
    pub fn successors(&self, node: &N) -> impl Iterator<Item = &N> {
        self.edges.get(node).into_iter().flat_map(|s| s.iter())
    }

    /// Nodes reachable from `node` through at least one edge.
    ///
    /// `node` itself is only part of the result when it lies on a cycle.
    pub fn reach_set_excluding_zero_length(&self, node: &N) -> BTreeSet<N> {
        let mut reached = BTreeSet::new();
        let mut queue: VecDeque<&N> = self.successors(node).collect();
        while let Some(next) = queue.pop_front() {
            if reached.insert(next.clone()) {
                queue.extend(self.successors(next));
            }
        }
        reached
    }

    /// Reach sets of every node that has outgoing edges, sharing work between
    /// nodes with common ancestors.
    pub fn transitive_closure(&self) -> BTreeMap<N, BTreeSet<N>> {
        let mut index = ReachabilityIndex::new(self);
        self.edges
            .keys()
            .map(|node| (node.clone(), index.reach(node).clone()))
            .collect()
    }

    /// Keeps only the candidates that are not reachable from another candidate.
    ///
    /// With edges pointing from a delegation to its parents this leaves the most
    /// specific delegations: any candidate that is already an ancestor of
    /// another candidate is dropped.
    pub fn most_specific(&self, candidates: &BTreeSet<N>) -> BTreeSet<N> {
        let mut index = ReachabilityIndex::new(self);
        let reach_sets: Vec<(&N, BTreeSet<N>)> = candidates
            .iter()
            .map(|c| (c, index.reach(c).clone()))
            .collect();
        candidates
            .iter()
            .filter(|candidate| {
                !reach_sets
                    .iter()
                    .any(|(other, reached)| *other != *candidate && reached.contains(*candidate))
            })
            .cloned()
            .collect()
    }
}

/// Memoized reach sets over a borrowed graph.
///
/// Acyclic parts are computed bottom-up from cached successor results. A node
/// whose traversal runs into a node still on the stack falls back to a plain
/// breadth-first walk, so cycles still produce exact reach sets.
pub struct ReachabilityIndex<'g, N: Ord + Clone> {
    graph: &'g DirectedGraph<N>,
    memo: BTreeMap<N, BTreeSet<N>>,
    in_progress: BTreeSet<N>,
}

impl<'g, N: Ord + Clone> ReachabilityIndex<'g, N> {
    pub fn new(graph: &'g DirectedGraph<N>) -> Self {
        Self {
            graph,
            memo: BTreeMap::new(),
            in_progress: BTreeSet::new(),
        }
    }

    /// Reach set of `node`, excluding zero-length paths.
    pub fn reach(&mut self, node: &N) -> &BTreeSet<N> {
        if !self.memo.contains_key(node) {
            let computed = self.compute(node);
            self.memo.insert(node.clone(), computed);
        }
        &self.memo[node]
    }

    fn compute(&mut self, node: &N) -> BTreeSet<N> {
        let graph = self.graph;
        if graph.successors(node).any(|s| self.in_progress.contains(s)) {
            return graph.reach_set_excluding_zero_length(node);
        }
        self.in_progress.insert(node.clone());
        let mut reached = BTreeSet::new();
        for successor in graph.successors(node) {
            reached.insert(successor.clone());
            let from_successor = self.reach(successor).clone();
            reached.extend(from_successor);
        }
        self.in_progress.remove(node);
        reached
    }
}
