//! Package dependency graph.
//!
//! Packages are nodes and "depends on" relations are directed edges from the
//! dependent to its dependency. The graph is built fresh for every release
//! and provides cycle detection and a deterministic, layered topological
//! order for compilation.

use petgraph::Direction;
use petgraph::graph::{DiGraph, NodeIndex};
use std::collections::{BTreeSet, HashMap, VecDeque};

use crate::core::ReleaseError;

/// Color states for cycle detection using DFS.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Color {
    /// Node has not been visited.
    White,
    /// Node is on the current DFS path.
    Gray,
    /// Node and everything it reaches has been visited.
    Black,
}

/// Dependency graph over package names.
#[derive(Debug, Default)]
pub struct DependencyGraph {
    graph: DiGraph<String, ()>,
    node_map: HashMap<String, NodeIndex>,
}

impl DependencyGraph {
    /// Create a new empty dependency graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a package node if it doesn't already exist.
    pub fn add_package(&mut self, name: &str) -> NodeIndex {
        if let Some(&index) = self.node_map.get(name) {
            index
        } else {
            let index = self.graph.add_node(name.to_string());
            self.node_map.insert(name.to_string(), index);
            index
        }
    }

    /// Record that `from` depends on `to`, meaning `to` must be compiled first.
    pub fn add_dependency(&mut self, from: &str, to: &str) {
        let from_idx = self.add_package(from);
        let to_idx = self.add_package(to);

        if !self.graph.contains_edge(from_idx, to_idx) {
            self.graph.add_edge(from_idx, to_idx, ());
        }
    }

    fn sorted_indices(&self) -> Vec<NodeIndex> {
        let mut indices: Vec<NodeIndex> = self.graph.node_indices().collect();
        indices.sort_by(|a, b| self.graph[*a].cmp(&self.graph[*b]));
        indices
    }

    fn sorted_neighbors(&self, node: NodeIndex, direction: Direction) -> Vec<NodeIndex> {
        let mut neighbors: Vec<NodeIndex> =
            self.graph.neighbors_directed(node, direction).collect();
        neighbors.sort_by(|a, b| self.graph[*a].cmp(&self.graph[*b]));
        neighbors.dedup();
        neighbors
    }

    /// Detect cycles with an iterative, color-marking DFS.
    ///
    /// Nodes and edges are visited in name order, so the same graph always
    /// reports the same cycle. The error names every package on the cycle,
    /// e.g. `a → b → a`.
    pub fn detect_cycles(&self) -> Result<(), ReleaseError> {
        let mut colors: HashMap<NodeIndex, Color> =
            self.graph.node_indices().map(|n| (n, Color::White)).collect();

        for start in self.sorted_indices() {
            if colors.get(&start) != Some(&Color::White) {
                continue;
            }

            // Each frame is (node, its dependencies, next dependency to visit)
            let mut stack =
                vec![(start, self.sorted_neighbors(start, Direction::Outgoing), 0usize)];
            colors.insert(start, Color::Gray);

            loop {
                let (node, next) = match stack.last_mut() {
                    Some(frame) => {
                        let next = frame.1.get(frame.2).copied();
                        frame.2 += 1;
                        (frame.0, next)
                    }
                    None => break,
                };

                let Some(neighbor) = next else {
                    colors.insert(node, Color::Black);
                    stack.pop();
                    continue;
                };

                match colors.get(&neighbor).copied().unwrap_or(Color::White) {
                    Color::Gray => {
                        let cycle_start =
                            stack.iter().position(|(n, _, _)| *n == neighbor).unwrap_or(0);
                        let mut chain: Vec<&str> = stack[cycle_start..]
                            .iter()
                            .map(|(n, _, _)| self.graph[*n].as_str())
                            .collect();
                        chain.push(self.graph[neighbor].as_str());
                        return Err(ReleaseError::CircularDependency {
                            chain: chain.join(" → "),
                        });
                    }
                    Color::White => {
                        colors.insert(neighbor, Color::Gray);
                        stack.push((
                            neighbor,
                            self.sorted_neighbors(neighbor, Direction::Outgoing),
                            0,
                        ));
                    }
                    Color::Black => {}
                }
            }
        }

        Ok(())
    }

    /// Group packages into compilation layers.
    ///
    /// Layer 0 holds packages without dependencies; every later layer holds
    /// packages whose dependencies all sit in earlier layers. Each layer is
    /// sorted by name.
    pub fn layers(&self) -> Result<Vec<Vec<String>>, ReleaseError> {
        self.detect_cycles()?;

        let mut remaining: HashMap<NodeIndex, usize> = self
            .graph
            .node_indices()
            .map(|n| (n, self.graph.neighbors_directed(n, Direction::Outgoing).count()))
            .collect();

        let mut frontier: Vec<NodeIndex> = self
            .sorted_indices()
            .into_iter()
            .filter(|n| remaining.get(n) == Some(&0))
            .collect();
        let mut layers = Vec::new();
        let mut placed = 0usize;

        while !frontier.is_empty() {
            let mut next = Vec::new();
            for &node in &frontier {
                for dependent in self.graph.neighbors_directed(node, Direction::Incoming) {
                    if let Some(count) = remaining.get_mut(&dependent) {
                        *count -= 1;
                        if *count == 0 {
                            next.push(dependent);
                        }
                    }
                }
            }
            placed += frontier.len();
            layers.push(frontier.iter().map(|n| self.graph[*n].clone()).collect());

            next.sort_by(|a, b| self.graph[*a].cmp(&self.graph[*b]));
            frontier = next;
        }

        if placed != self.graph.node_count() {
            // Unreachable after detect_cycles, kept so a bug cannot drop packages silently
            return Err(ReleaseError::CircularDependency {
                chain: "unable to order all packages".to_string(),
            });
        }

        Ok(layers)
    }

    /// Packages in compilation order: dependencies before dependents, ties by name.
    pub fn topological_order(&self) -> Result<Vec<String>, ReleaseError> {
        Ok(self.layers()?.into_iter().flatten().collect())
    }

    /// Every package `name` depends on, directly or indirectly.
    pub fn get_transitive_deps(&self, name: &str) -> BTreeSet<String> {
        let mut deps = BTreeSet::new();
        let mut queue = VecDeque::new();

        if let Some(&node_idx) = self.node_map.get(name) {
            queue.push_back(node_idx);

            while let Some(current) = queue.pop_front() {
                for neighbor in self.graph.neighbors(current) {
                    if deps.insert(self.graph[neighbor].clone()) {
                        queue.push_back(neighbor);
                    }
                }
            }
        }

        deps
    }

    /// Direct dependencies of `name`, sorted.
    pub fn get_direct_deps(&self, name: &str) -> Vec<String> {
        match self.node_map.get(name) {
            Some(&node_idx) => self
                .sorted_neighbors(node_idx, Direction::Outgoing)
                .into_iter()
                .map(|idx| self.graph[idx].clone())
                .collect(),
            None => Vec::new(),
        }
    }

    /// Check if the graph is empty.
    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    /// Get the total number of packages in the graph.
    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    /// Get the total number of dependency edges in the graph.
    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }
}
