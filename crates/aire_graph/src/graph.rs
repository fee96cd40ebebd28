//! Dependency graph over build units.
//!
//! Edges point from a unit to each unit it depends on. Edges may be inserted
//! in any order, so cycles are only detected when a build order is requested.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};

use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction::{Incoming, Outgoing};

use crate::error::GraphError;
use crate::unit::BuildUnit;

/// Directed graph of build units keyed by unit name.
#[derive(Debug, Default)]
pub struct DependencyGraph {
    graph: DiGraph<BuildUnit, ()>,
    index: HashMap<String, NodeIndex>,
}

/// DFS visitation state used by cycle detection.
#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unvisited,
    OnStack,
    Done,
}

impl DependencyGraph {
    /// Creates an empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a graph from a set of units, adding one edge per declared
    /// dependency.
    ///
    /// Fails on duplicate names or dependencies on unknown units. Cycles are
    /// not checked here; see [`DependencyGraph::topological_order`].
    pub fn from_units(units: impl IntoIterator<Item = BuildUnit>) -> Result<Self, GraphError> {
        let mut graph = Self::new();
        for unit in units {
            graph.add_unit(unit)?;
        }

        let edges: Vec<(String, String)> = graph
            .graph
            .node_weights()
            .flat_map(|unit| {
                unit.dependencies()
                    .iter()
                    .map(move |dep| (unit.name().to_string(), dep.clone()))
            })
            .collect();
        for (from, to) in edges {
            graph.add_edge(&from, &to)?;
        }
        Ok(graph)
    }

    /// Adds a unit to the graph.
    pub fn add_unit(&mut self, unit: BuildUnit) -> Result<(), GraphError> {
        if self.index.contains_key(unit.name()) {
            return Err(GraphError::DuplicateUnit(unit.name().to_string()));
        }
        let name = unit.name().to_string();
        let idx = self.graph.add_node(unit);
        self.index.insert(name, idx);
        Ok(())
    }

    /// Records that `from` depends on `to`.
    ///
    /// Both units must already be present. Repeated edges are collapsed.
    /// An edge closing a cycle is accepted here and reported later by
    /// [`DependencyGraph::detect_cycle`].
    pub fn add_edge(&mut self, from: &str, to: &str) -> Result<(), GraphError> {
        let unresolved = |name: &str| GraphError::UnresolvedDependency {
            unit: from.to_string(),
            dependency: name.to_string(),
        };
        let &to_idx = self.index.get(to).ok_or_else(|| unresolved(to))?;
        let &from_idx = self.index.get(from).ok_or_else(|| unresolved(from))?;
        self.graph.update_edge(from_idx, to_idx, ());
        Ok(())
    }

    /// Number of units in the graph.
    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    /// Returns `true` if the graph has no units.
    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    /// Looks up a unit by name.
    pub fn unit(&self, name: &str) -> Option<&BuildUnit> {
        self.index.get(name).map(|&idx| &self.graph[idx])
    }

    /// Direct dependencies of `name`, in declaration order.
    pub fn dependencies(&self, name: &str) -> Option<&[String]> {
        self.unit(name).map(BuildUnit::dependencies)
    }

    /// Units that directly depend on `name`, sorted by name.
    pub fn dependents(&self, name: &str) -> Vec<&str> {
        let Some(&idx) = self.index.get(name) else {
            return Vec::new();
        };
        let mut out: Vec<&str> = self
            .graph
            .neighbors_directed(idx, Incoming)
            .map(|n| self.graph[n].name())
            .collect();
        out.sort_unstable();
        out
    }

    /// Every unit that depends on `name` directly or indirectly, sorted by name.
    pub fn transitive_dependents(&self, name: &str) -> Vec<&str> {
        let Some(&start) = self.index.get(name) else {
            return Vec::new();
        };
        let mut seen = vec![false; self.graph.node_count()];
        let mut stack = vec![start];
        let mut out = Vec::new();
        while let Some(idx) = stack.pop() {
            for n in self.graph.neighbors_directed(idx, Incoming) {
                if !seen[n.index()] {
                    seen[n.index()] = true;
                    out.push(self.graph[n].name());
                    stack.push(n);
                }
            }
        }
        out.sort_unstable();
        out
    }

    /// Node indices sorted by unit name.
    fn sorted_nodes(&self) -> Vec<NodeIndex> {
        let mut nodes: Vec<NodeIndex> = self.graph.node_indices().collect();
        nodes.sort_by(|&a, &b| self.graph[a].name().cmp(self.graph[b].name()));
        nodes
    }

    /// Dependencies of `idx` sorted by unit name.
    fn sorted_deps(&self, idx: NodeIndex) -> Vec<NodeIndex> {
        let mut deps: Vec<NodeIndex> = self.graph.neighbors_directed(idx, Outgoing).collect();
        deps.sort_by(|&a, &b| self.graph[a].name().cmp(self.graph[b].name()));
        deps
    }

    /// Searches for a dependency cycle.
    ///
    /// Returns the full cycle path with the first unit repeated at the end
    /// (e.g. `["a", "b", "a"]`), or `None` when the graph is acyclic. The
    /// search visits units in name order, so the reported cycle is stable
    /// across runs.
    pub fn detect_cycle(&self) -> Option<Vec<String>> {
        let mut marks = vec![Mark::Unvisited; self.graph.node_count()];

        for root in self.sorted_nodes() {
            if marks[root.index()] != Mark::Unvisited {
                continue;
            }
            // Each frame holds a node and its remaining dependencies.
            let mut stack: Vec<(NodeIndex, Vec<NodeIndex>)> = Vec::new();
            marks[root.index()] = Mark::OnStack;
            let mut deps = self.sorted_deps(root);
            deps.reverse();
            stack.push((root, deps));

            while let Some((node, pending)) = stack.last_mut() {
                let node = *node;
                match pending.pop() {
                    Some(next) => match marks[next.index()] {
                        Mark::Unvisited => {
                            marks[next.index()] = Mark::OnStack;
                            let mut deps = self.sorted_deps(next);
                            deps.reverse();
                            stack.push((next, deps));
                        }
                        Mark::OnStack => {
                            let start = stack
                                .iter()
                                .position(|(n, _)| *n == next)
                                .unwrap_or(0);
                            let mut path: Vec<String> = stack[start..]
                                .iter()
                                .map(|(n, _)| self.graph[*n].name().to_string())
                                .collect();
                            path.push(self.graph[next].name().to_string());
                            return Some(path);
                        }
                        Mark::Done => {}
                    },
                    None => {
                        marks[node.index()] = Mark::Done;
                        stack.pop();
                    }
                }
            }
        }
        None
    }

    /// Returns a build order in which every unit follows all of its
    /// dependencies.
    ///
    /// Among units whose dependencies are all placed, the lexically smallest
    /// name goes first, so the order is reproducible. Fails with
    /// [`GraphError::CyclicDependency`] if the graph contains a cycle.
    pub fn topological_order(&self) -> Result<Vec<String>, GraphError> {
        if let Some(path) = self.detect_cycle() {
            return Err(GraphError::CyclicDependency { path });
        }

        let mut remaining: Vec<usize> = self
            .graph
            .node_indices()
            .map(|idx| self.graph.neighbors_directed(idx, Outgoing).count())
            .collect();

        let mut ready: BinaryHeap<Reverse<(&str, NodeIndex)>> = self
            .graph
            .node_indices()
            .filter(|idx| remaining[idx.index()] == 0)
            .map(|idx| Reverse((self.graph[idx].name(), idx)))
            .collect();

        let mut order = Vec::with_capacity(self.graph.node_count());
        while let Some(Reverse((name, idx))) = ready.pop() {
            order.push(name.to_string());
            for dependent in self.graph.neighbors_directed(idx, Incoming) {
                let slot = &mut remaining[dependent.index()];
                *slot -= 1;
                if *slot == 0 {
                    ready.push(Reverse((self.graph[dependent].name(), dependent)));
                }
            }
        }
        Ok(order)
    }
}
