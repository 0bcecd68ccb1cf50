//! Task graph for dependency management.
//!
//! This module provides the TaskGraph structure that represents sub-question
//! dependencies as a directed acyclic graph, enabling parallel execution of
//! independent branches. Edges point from a dependency to its dependent.

use crate::core::task::{NodeId, NodeStatus, TaskNode, TaskResult};
use crate::error::{Error, Result};
use petgraph::algo::{is_cyclic_directed, toposort};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::{Bfs, Reversed};
use petgraph::Direction;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Where a dependency edge came from.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum DependencyType {
    /// Declared by the planner capability.
    #[default]
    Declared,
    /// Added by the planner's dependency inference rules.
    Inferred,
}

impl std::fmt::Display for DependencyType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DependencyType::Declared => write!(f, "declared"),
            DependencyType::Inferred => write!(f, "inferred"),
        }
    }
}

/// The task dependency graph for one query.
///
/// Nodes keep their planner-declared insertion order, which is also the
/// tie-break order among ready nodes of equal priority.
pub struct TaskGraph {
    graph: DiGraph<TaskNode, DependencyType>,
    index: HashMap<NodeId, NodeIndex>,
}

impl TaskGraph {
    pub fn new() -> Self {
        Self {
            graph: DiGraph::new(),
            index: HashMap::new(),
        }
    }

    /// Build a graph from nodes and a `node -> dependencies` mapping.
    ///
    /// Every referenced id must exist, and the resulting edge set must be
    /// acyclic; both are checked before the graph is returned.
    pub fn from_parts<I>(nodes: Vec<TaskNode>, dependencies: I) -> Result<Self>
    where
        I: IntoIterator<Item = (NodeId, Vec<NodeId>)>,
    {
        let mut dag = Self::new();
        for node in nodes {
            dag.add_node(node)?;
        }
        for (dependent, deps) in dependencies {
            let to = dag.node_index(&dependent)?;
            for dep in deps {
                let from = dag.node_index(&dep)?;
                if dag.graph.find_edge(from, to).is_none() {
                    dag.graph.add_edge(from, to, DependencyType::Declared);
                }
            }
        }
        dag.validate()?;
        Ok(dag)
    }

    /// Add a node. Ids must be unique within the graph.
    pub fn add_node(&mut self, node: TaskNode) -> Result<NodeIndex> {
        if self.index.contains_key(&node.id) {
            return Err(Error::DuplicateNode(node.id));
        }
        let id = node.id.clone();
        let index = self.graph.add_node(node);
        self.index.insert(id, index);
        Ok(index)
    }

    /// Record that `dependent` needs the output of `dependency`.
    ///
    /// Rejects the edge if it would create a cycle, leaving the graph
    /// unchanged.
    pub fn add_dependency(
        &mut self,
        dependency: &NodeId,
        dependent: &NodeId,
        dep_type: DependencyType,
    ) -> Result<()> {
        let from = self.node_index(dependency)?;
        let to = self.node_index(dependent)?;

        if self.graph.find_edge(from, to).is_some() {
            return Ok(());
        }

        let edge = self.graph.add_edge(from, to, dep_type);
        if is_cyclic_directed(&self.graph) {
            self.graph.remove_edge(edge);
            return Err(Error::CyclicGraph(format!(
                "{} -> {} closes a cycle",
                dependency, dependent
            )));
        }
        Ok(())
    }

    /// Fail if the graph contains a cycle.
    pub fn validate(&self) -> Result<()> {
        toposort(&self.graph, None).map(|_| ()).map_err(|cycle| {
            let at = self
                .graph
                .node_weight(cycle.node_id())
                .map(|n| n.id.to_string())
                .unwrap_or_else(|| "unknown".to_string());
            Error::CyclicGraph(format!("cycle through node {}", at))
        })
    }

    pub fn get(&self, id: &NodeId) -> Option<&TaskNode> {
        self.index.get(id).and_then(|&i| self.graph.node_weight(i))
    }

    pub fn get_mut(&mut self, id: &NodeId) -> Option<&mut TaskNode> {
        match self.index.get(id) {
            Some(&i) => self.graph.node_weight_mut(i),
            None => None,
        }
    }

    /// Like [`get_mut`](Self::get_mut) but reports a missing node as an error.
    pub fn node_mut(&mut self, id: &NodeId) -> Result<&mut TaskNode> {
        self.get_mut(id).ok_or_else(|| Error::NodeNotFound(id.clone()))
    }

    pub fn contains(&self, id: &NodeId) -> bool {
        self.index.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    pub fn dependency_count(&self) -> usize {
        self.graph.edge_count()
    }

    pub fn has_dependency(&self, dependency: &NodeId, dependent: &NodeId) -> bool {
        match (self.index.get(dependency), self.index.get(dependent)) {
            (Some(&from), Some(&to)) => self.graph.find_edge(from, to).is_some(),
            _ => false,
        }
    }

    pub fn dependency_type(&self, dependency: &NodeId, dependent: &NodeId) -> Option<DependencyType> {
        let from = self.index.get(dependency)?;
        let to = self.index.get(dependent)?;
        let edge = self.graph.find_edge(*from, *to)?;
        self.graph.edge_weight(edge).copied()
    }

    /// Nodes in planner-declared order.
    pub fn nodes(&self) -> impl Iterator<Item = &TaskNode> {
        self.graph.node_indices().filter_map(|i| self.graph.node_weight(i))
    }

    pub fn node_ids(&self) -> Vec<NodeId> {
        self.nodes().map(|n| n.id.clone()).collect()
    }

    /// Direct dependencies of a node, in declaration order.
    pub fn dependencies(&self, id: &NodeId) -> Vec<&TaskNode> {
        self.neighbors(id, Direction::Incoming)
    }

    /// Direct dependents of a node, in declaration order.
    pub fn dependents(&self, id: &NodeId) -> Vec<&TaskNode> {
        self.neighbors(id, Direction::Outgoing)
    }

    /// Nodes with no dependencies.
    pub fn roots(&self) -> Vec<&TaskNode> {
        self.nodes()
            .filter(|n| self.dependencies(&n.id).is_empty())
            .collect()
    }

    /// Nodes nothing depends on.
    pub fn leaves(&self) -> Vec<&TaskNode> {
        self.nodes()
            .filter(|n| self.dependents(&n.id).is_empty())
            .collect()
    }

    /// Every node that transitively depends on `id` (excluding `id`).
    pub fn transitive_dependents(&self, id: &NodeId) -> Vec<NodeId> {
        let Some(&start) = self.index.get(id) else {
            return Vec::new();
        };
        let mut bfs = Bfs::new(&self.graph, start);
        let mut found = Vec::new();
        while let Some(i) = bfs.next(&self.graph) {
            if i != start {
                if let Some(node) = self.graph.node_weight(i) {
                    found.push(node.id.clone());
                }
            }
        }
        found
    }

    /// Every node `id` transitively depends on (excluding `id`).
    pub fn transitive_dependencies(&self, id: &NodeId) -> Vec<NodeId> {
        let Some(&start) = self.index.get(id) else {
            return Vec::new();
        };
        let reversed = Reversed(&self.graph);
        let mut bfs = Bfs::new(reversed, start);
        let mut found = Vec::new();
        while let Some(i) = bfs.next(reversed) {
            if i != start {
                if let Some(node) = self.graph.node_weight(i) {
                    found.push(node.id.clone());
                }
            }
        }
        found
    }

    // ========== Scheduling Operations ==========

    /// Nodes whose dependencies have all succeeded and that have not been
    /// admitted yet, highest priority first, ties in declaration order.
    pub fn ready_nodes(&self) -> Vec<NodeId> {
        let mut ready: Vec<(NodeIndex, &TaskNode)> = self
            .graph
            .node_indices()
            .filter_map(|i| self.graph.node_weight(i).map(|n| (i, n)))
            .filter(|(_, n)| matches!(n.status, NodeStatus::Pending | NodeStatus::Ready))
            .filter(|(i, _)| {
                self.graph
                    .neighbors_directed(*i, Direction::Incoming)
                    .all(|dep| {
                        self.graph
                            .node_weight(dep)
                            .map(|d| d.is_succeeded())
                            .unwrap_or(false)
                    })
            })
            .collect();

        ready.sort_by(|(ia, a), (ib, b)| b.priority.cmp(&a.priority).then(ia.index().cmp(&ib.index())));
        ready.into_iter().map(|(_, n)| n.id.clone()).collect()
    }

    /// Mark every transitive dependent of a failed node as skipped.
    ///
    /// Returns the nodes that changed status; calling it again returns an
    /// empty list and leaves statuses as they were.
    pub fn propagate_failure(&mut self, failed: &NodeId) -> Vec<NodeId> {
        let reason = format!("dependency {} failed", failed);
        let mut skipped = Vec::new();
        for id in self.transitive_dependents(failed) {
            if let Some(node) = self.get_mut(&id) {
                if node.skip(&reason) {
                    skipped.push(id);
                }
            }
        }
        skipped
    }

    /// Skip every node that has not been admitted yet.
    pub fn skip_unstarted(&mut self, reason: &str) -> Vec<NodeId> {
        let mut skipped = Vec::new();
        for i in self.graph.node_indices().collect::<Vec<_>>() {
            if let Some(node) = self.graph.node_weight_mut(i) {
                if node.skip(reason) {
                    skipped.push(node.id.clone());
                }
            }
        }
        skipped
    }

    /// True when every node is succeeded, failed or skipped.
    pub fn is_done(&self) -> bool {
        self.nodes().all(|n| n.is_finished())
    }

    pub fn count_with(&self, predicate: impl Fn(&NodeStatus) -> bool) -> usize {
        self.nodes().filter(|n| predicate(&n.status)).count()
    }

    /// Results of succeeded nodes, in declaration order.
    pub fn succeeded_results(&self) -> Vec<TaskResult> {
        self.nodes()
            .filter(|n| n.is_succeeded())
            .filter_map(|n| n.result.clone())
            .collect()
    }

    /// Results of direct dependencies of `id` that succeeded.
    pub fn dependency_results(&self, id: &NodeId) -> Vec<TaskResult> {
        self.dependencies(id)
            .into_iter()
            .filter(|n| n.is_succeeded())
            .filter_map(|n| n.result.clone())
            .collect()
    }

    /// Nodes in an order where each appears after all its dependencies.
    pub fn topological_order(&self) -> Result<Vec<&TaskNode>> {
        let sorted = toposort(&self.graph, None).map_err(|cycle| {
            let at = self
                .graph
                .node_weight(cycle.node_id())
                .map(|n| n.id.to_string())
                .unwrap_or_else(|| "unknown".to_string());
            Error::CyclicGraph(format!("cycle through node {}", at))
        })?;
        Ok(sorted
            .into_iter()
            .filter_map(|i| self.graph.node_weight(i))
            .collect())
    }

    fn node_index(&self, id: &NodeId) -> Result<NodeIndex> {
        self.index
            .get(id)
            .copied()
            .ok_or_else(|| Error::NodeNotFound(id.clone()))
    }

    fn neighbors(&self, id: &NodeId, direction: Direction) -> Vec<&TaskNode> {
        let Some(&index) = self.index.get(id) else {
            return Vec::new();
        };
        let mut found: Vec<NodeIndex> = self.graph.neighbors_directed(index, direction).collect();
        found.sort_by_key(|i| i.index());
        found.dedup();
        found
            .into_iter()
            .filter_map(|i| self.graph.node_weight(i))
            .collect()
    }
}

impl Default for TaskGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for TaskGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskGraph")
            .field("nodes", &self.len())
            .field("dependencies", &self.dependency_count())
            .finish()
    }
}
