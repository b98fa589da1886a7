//! File dependency graph.
//!
//! Nodes are file keys (paths relative to the repository root, `/`
//! separated). An edge `parent -> child` means the parent references a type
//! defined in the child. A graph is built once per publish and never
//! mutated afterwards; republishing builds a new one and swaps it into the
//! shared [`GraphHandle`].

use parking_lot::RwLock;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

/// Directed file dependency graph.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DependencyGraph {
    edges: HashMap<String, BTreeSet<String>>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `file` with no dependencies. Existing edges are kept.
    pub fn add_node(&mut self, file: impl Into<String>) {
        self.edges.entry(file.into()).or_default();
    }

    /// Record that `parent` depends on `child`. Self-loops are ignored and
    /// repeated edges collapse. Both ends become nodes.
    pub fn add_edge(&mut self, parent: &str, child: &str) {
        if parent == child {
            self.add_node(parent);
            return;
        }
        self.add_node(child);
        self.edges
            .entry(parent.to_string())
            .or_default()
            .insert(child.to_string());
    }

    /// Direct dependencies of `file`; empty for unknown files.
    pub fn dependencies_of(&self, file: &str) -> BTreeSet<String> {
        self.edges.get(file).cloned().unwrap_or_default()
    }

    /// Borrowing variant of [`dependencies_of`](Self::dependencies_of).
    pub fn dependencies(&self, file: &str) -> impl Iterator<Item = &str> {
        self.edges
            .get(file)
            .into_iter()
            .flat_map(|deps| deps.iter().map(String::as_str))
    }

    pub fn has_dependencies(&self, file: &str) -> bool {
        self.edges.get(file).is_some_and(|d| !d.is_empty())
    }

    /// Everything reachable from `root`, `root` included.
    ///
    /// Iterative depth-first walk; each node is marked before its children
    /// are pushed, so cycles terminate and nothing appears twice.
    pub fn connected_set_from(&self, root: &str) -> BTreeSet<String> {
        let mut visited: HashSet<&str> = HashSet::new();
        let mut stack: Vec<&str> = vec![root];
        visited.insert(root);

        while let Some(file) = stack.pop() {
            for dep in self.dependencies(file) {
                if visited.insert(dep) {
                    stack.push(dep);
                }
            }
        }

        visited.into_iter().map(str::to_string).collect()
    }

    pub fn contains(&self, file: &str) -> bool {
        self.edges.contains_key(file)
    }

    /// All nodes, sorted.
    pub fn files(&self) -> Vec<&str> {
        let mut files: Vec<&str> = self.edges.keys().map(String::as_str).collect();
        files.sort_unstable();
        files
    }

    pub fn len(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.values().map(BTreeSet::len).sum()
    }
}

/// Shared, swappable reference to the current graph.
///
/// Readers take an `Arc` snapshot and release the lock immediately, so a
/// republish never blocks on, or tears, an in-flight read.
#[derive(Debug, Clone, Default)]
pub struct GraphHandle {
    current: Arc<RwLock<Arc<DependencyGraph>>>,
}

impl GraphHandle {
    pub fn new(graph: DependencyGraph) -> Self {
        Self {
            current: Arc::new(RwLock::new(Arc::new(graph))),
        }
    }

    pub fn snapshot(&self) -> Arc<DependencyGraph> {
        Arc::clone(&self.current.read())
    }

    /// Install `graph`, returning the one it replaced.
    pub fn replace(&self, graph: DependencyGraph) -> Arc<DependencyGraph> {
        std::mem::replace(&mut *self.current.write(), Arc::new(graph))
    }
}
