//! Generic named-node DAG container.
//!
//! [`Dag`] stores a value per named node, rejects edges that would create a
//! cycle, and produces the deterministic spanning traversal the staging
//! algorithms depend on. Both forward and reverse adjacency are kept so
//! children and parents of a node are equally cheap to look up.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use crate::error::{CairnError, Result};

/// A directed acyclic graph with named nodes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Dag<V> {
    /// Node values keyed by name.
    values: BTreeMap<String, V>,
    /// Out-edges per node, in insertion order.
    children: BTreeMap<String, Vec<String>>,
    /// In-edges per node, in insertion order.
    parents: BTreeMap<String, Vec<String>>,
}

impl<V> Dag<V> {
    /// Create an empty graph.
    pub fn new() -> Self {
        Self {
            values: BTreeMap::new(),
            children: BTreeMap::new(),
            parents: BTreeMap::new(),
        }
    }

    /// Add a named node. Fails if the name is already taken.
    pub fn add_node(&mut self, name: impl Into<String>, value: V) -> Result<()> {
        let name = name.into();
        if self.values.contains_key(&name) {
            return Err(CairnError::DuplicateStep { name });
        }
        self.children.insert(name.clone(), Vec::new());
        self.parents.insert(name.clone(), Vec::new());
        self.values.insert(name, value);
        Ok(())
    }

    /// Add a directed edge from `src` to `dst`.
    ///
    /// Fails if either endpoint is unknown or the edge would create a cycle
    /// (a self-edge counts). Re-adding an existing edge is a no-op.
    pub fn add_edge(&mut self, src: &str, dst: &str) -> Result<()> {
        if !self.values.contains_key(src) {
            return Err(CairnError::UnknownNode {
                name: src.to_string(),
            });
        }
        if !self.values.contains_key(dst) {
            return Err(CairnError::UnknownNode {
                name: dst.to_string(),
            });
        }
        if self.children[src].iter().any(|c| c == dst) {
            return Ok(());
        }
        if src == dst || self.is_reachable(dst, src) {
            return Err(CairnError::CircularDependency {
                src: src.to_string(),
                dst: dst.to_string(),
            });
        }

        self.children.entry(src.to_string()).or_default().push(dst.to_string());
        self.parents.entry(dst.to_string()).or_default().push(src.to_string());
        Ok(())
    }

    /// Check if a node exists.
    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    /// Get a node's value.
    pub fn get(&self, name: &str) -> Option<&V> {
        self.values.get(name)
    }

    /// Get a mutable reference to a node's value.
    pub fn get_mut(&mut self, name: &str) -> Option<&mut V> {
        self.values.get_mut(name)
    }

    /// Node values keyed by name.
    pub fn values(&self) -> &BTreeMap<String, V> {
        &self.values
    }

    /// Direct children of a node, in edge-insertion order.
    pub fn children_of(&self, name: &str) -> &[String] {
        self.children.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Direct parents of a node, in edge-insertion order.
    pub fn parents_of(&self, name: &str) -> &[String] {
        self.parents.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    /// All edges as (src, dst) pairs.
    pub fn edges(&self) -> Vec<(String, String)> {
        self.children
            .iter()
            .flat_map(|(src, dsts)| dsts.iter().map(move |dst| (src.clone(), dst.clone())))
            .collect()
    }

    /// Number of nodes.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Check if the graph has no nodes.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Check whether `to` can be reached from `from` along edges.
    fn is_reachable(&self, from: &str, to: &str) -> bool {
        let mut stack = vec![from];
        let mut seen: BTreeSet<&str> = BTreeSet::new();

        while let Some(node) = stack.pop() {
            if node == to {
                return true;
            }
            if let Some(children) = self.children.get(node) {
                for child in children {
                    if seen.insert(child.as_str()) {
                        stack.push(child.as_str());
                    }
                }
            }
        }

        false
    }

    /// Produce a deterministic spanning traversal of the subgraph reachable
    /// from `root`.
    ///
    /// Every reachable node is visited exactly once and all of a node's
    /// parents appear in the sequence before the node itself. The reported
    /// parent is the one through which the node was first discovered; the
    /// root is reported with no parent.
    pub fn spanning_traversal(&self, root: &str) -> Result<Vec<(Option<String>, String, &V)>> {
        if !self.values.contains_key(root) {
            return Err(CairnError::UnknownNode {
                name: root.to_string(),
            });
        }

        // Restrict to the subgraph reachable from the root so in-degrees of
        // nodes with parents elsewhere in the graph still drain to zero.
        let mut reachable: BTreeSet<&str> = BTreeSet::new();
        let mut stack = vec![root];
        reachable.insert(root);
        while let Some(node) = stack.pop() {
            for child in self.children_of(node) {
                if reachable.insert(child.as_str()) {
                    stack.push(child.as_str());
                }
            }
        }

        let mut in_degree: BTreeMap<&str, usize> = reachable
            .iter()
            .map(|&name| {
                let degree = self
                    .parents_of(name)
                    .iter()
                    .filter(|p| reachable.contains(p.as_str()))
                    .count();
                (name, degree)
            })
            .collect();

        let mut discovered_via: BTreeMap<&str, &str> = BTreeMap::new();
        let mut queue: VecDeque<&str> = VecDeque::new();
        queue.push_back(root);

        let mut sequence = Vec::with_capacity(reachable.len());
        while let Some(node) = queue.pop_front() {
            let parent = discovered_via.get(node).map(|p| p.to_string());
            sequence.push((parent, node.to_string(), &self.values[node]));

            for child in self.children_of(node) {
                discovered_via.entry(child.as_str()).or_insert(node);
                if let Some(degree) = in_degree.get_mut(child.as_str()) {
                    *degree -= 1;
                    if *degree == 0 {
                        queue.push_back(child.as_str());
                    }
                }
            }
        }

        Ok(sequence)
    }
}
