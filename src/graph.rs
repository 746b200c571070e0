//! Weighted package dependency graph
//!
//! Directed graph of package name -> dependency set with integer edge
//! weights. Supports cycle detection, dependency-first topological
//! ordering, reverse lookups, subgraph extraction and JSON round-trips.

use crate::error::{Error, Result};
use std::collections::{BTreeMap, BTreeSet, VecDeque};

/// Default weight assigned to edges added without an explicit one.
pub const DEFAULT_WEIGHT: i64 = 1;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DependencyGraph {
    /// package -> {dependency -> weight}
    edges: BTreeMap<String, BTreeMap<String, i64>>,
    nodes: BTreeSet<String>,
}

/// Basic shape metrics for a graph
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphMetrics {
    pub total_nodes: usize,
    pub total_edges: usize,
    /// Nodes with no outgoing edges (depend on nothing)
    pub leaves: Vec<String>,
    /// Nodes with no incoming edges (nothing depends on them)
    pub roots: Vec<String>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a package together with its dependency map.
    ///
    /// Every dependency becomes a node as well, so no edge ever dangles.
    pub fn add_package(&mut self, package: &str, dependencies: &BTreeMap<String, i64>) {
        self.nodes.insert(package.to_string());
        for (dep, weight) in dependencies {
            self.nodes.insert(dep.clone());
            self.edges
                .entry(package.to_string())
                .or_default()
                .insert(dep.clone(), *weight);
        }
    }

    /// Add a single dependency edge with the default weight.
    pub fn add_dependency(&mut self, package: &str, dependency: &str) {
        let mut deps = BTreeMap::new();
        deps.insert(dependency.to_string(), DEFAULT_WEIGHT);
        self.add_package(package, &deps);
    }

    /// Remove a package and every reference to it from other adjacency sets.
    pub fn remove_package(&mut self, package: &str) {
        self.edges.remove(package);
        for deps in self.edges.values_mut() {
            deps.remove(package);
        }
        self.nodes.remove(package);
    }

    pub fn contains(&self, package: &str) -> bool {
        self.nodes.contains(package)
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn nodes(&self) -> impl Iterator<Item = &str> {
        self.nodes.iter().map(String::as_str)
    }

    /// Direct dependencies of a package.
    pub fn direct_dependencies(&self, package: &str) -> Vec<String> {
        self.edges
            .get(package)
            .map(|deps| deps.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Transitive closure of a package's dependencies.
    pub fn all_dependencies(&self, package: &str) -> Vec<String> {
        let mut seen = BTreeSet::new();
        let mut stack = vec![package.to_string()];
        while let Some(pkg) = stack.pop() {
            if let Some(deps) = self.edges.get(&pkg) {
                for dep in deps.keys() {
                    if seen.insert(dep.clone()) {
                        stack.push(dep.clone());
                    }
                }
            }
        }
        seen.into_iter().collect()
    }

    /// Packages that depend directly on `package`.
    pub fn dependents(&self, package: &str) -> Vec<String> {
        self.edges
            .iter()
            .filter(|(_, deps)| deps.contains_key(package))
            .map(|(pkg, _)| pkg.clone())
            .collect()
    }

    /// Detect whether the graph contains a cycle.
    ///
    /// Three-color depth-first search; returns on the first back edge.
    pub fn detect_cycles(&self) -> bool {
        let mut visited = BTreeSet::new();
        let mut in_stack = BTreeSet::new();

        for node in &self.nodes {
            if !visited.contains(node) && self.dfs_cycle(node, &mut visited, &mut in_stack) {
                return true;
            }
        }
        false
    }

    fn dfs_cycle(
        &self,
        node: &str,
        visited: &mut BTreeSet<String>,
        in_stack: &mut BTreeSet<String>,
    ) -> bool {
        visited.insert(node.to_string());
        in_stack.insert(node.to_string());

        if let Some(deps) = self.edges.get(node) {
            for dep in deps.keys() {
                if !visited.contains(dep) {
                    if self.dfs_cycle(dep, visited, in_stack) {
                        return true;
                    }
                } else if in_stack.contains(dep) {
                    return true;
                }
            }
        }

        in_stack.remove(node);
        false
    }

    /// Topological order with dependencies before their dependents.
    ///
    /// Kahn's algorithm seeded from the leaves: a package is emitted once
    /// all of its dependencies have been. Fails when a cycle keeps some
    /// nodes from ever becoming ready.
    pub fn topo_sort(&self) -> Result<Vec<String>> {
        // remaining unemitted dependencies per node
        let mut pending: BTreeMap<&str, usize> = self
            .nodes
            .iter()
            .map(|n| {
                (
                    n.as_str(),
                    self.edges.get(n).map(|d| d.len()).unwrap_or(0),
                )
            })
            .collect();

        let mut queue: VecDeque<&str> = pending
            .iter()
            .filter(|(_, deg)| **deg == 0)
            .map(|(n, _)| *n)
            .collect();

        let mut order = Vec::with_capacity(self.nodes.len());
        while let Some(node) = queue.pop_front() {
            order.push(node.to_string());
            for (pkg, deps) in &self.edges {
                if deps.contains_key(node) {
                    let deg = pending.get_mut(pkg.as_str()).unwrap();
                    *deg -= 1;
                    if *deg == 0 {
                        queue.push_back(pkg.as_str());
                    }
                }
            }
        }

        if order.len() != self.nodes.len() {
            return Err(Error::Conflict("dependency cycle detected".to_string()));
        }

        Ok(order)
    }

    /// Subgraph restricted to the given packages; edges to outside packages
    /// are dropped.
    pub fn subgraph(&self, packages: &[String]) -> DependencyGraph {
        let keep: BTreeSet<&str> = packages.iter().map(String::as_str).collect();
        let mut sg = DependencyGraph::new();
        for pkg in packages {
            if !self.nodes.contains(pkg) {
                continue;
            }
            let deps: BTreeMap<String, i64> = self
                .edges
                .get(pkg)
                .map(|d| {
                    d.iter()
                        .filter(|(dep, _)| keep.contains(dep.as_str()))
                        .map(|(dep, w)| (dep.clone(), *w))
                        .collect()
                })
                .unwrap_or_default();
            sg.add_package(pkg, &deps);
        }
        sg
    }

    pub fn metrics(&self) -> GraphMetrics {
        let leaves = self
            .nodes
            .iter()
            .filter(|n| self.edges.get(*n).map(|d| d.is_empty()).unwrap_or(true))
            .cloned()
            .collect();
        let roots = self
            .nodes
            .iter()
            .filter(|n| self.dependents(n).is_empty())
            .cloned()
            .collect();
        GraphMetrics {
            total_nodes: self.nodes.len(),
            total_edges: self.edges.values().map(BTreeMap::len).sum(),
            leaves,
            roots,
        }
    }

    /// Export as a JSON object `{package: {dep: weight}}`.
    ///
    /// Every node appears as a key (isolated nodes map to `{}`) so the
    /// round-trip reproduces the graph exactly.
    pub fn to_json(&self) -> Result<String> {
        let mut full: BTreeMap<&str, &BTreeMap<String, i64>> = BTreeMap::new();
        let empty = BTreeMap::new();
        for node in &self.nodes {
            full.insert(node, self.edges.get(node).unwrap_or(&empty));
        }
        Ok(serde_json::to_string_pretty(&full)?)
    }

    pub fn from_json(json: &str) -> Result<DependencyGraph> {
        let parsed: BTreeMap<String, BTreeMap<String, i64>> = serde_json::from_str(json)?;
        let mut graph = DependencyGraph::new();
        for (pkg, deps) in &parsed {
            graph.add_package(pkg, deps);
        }
        Ok(graph)
    }
}
