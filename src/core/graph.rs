//! Workflow graph: the DAG of nodes for one workflow run.
//!
//! This module provides the WorkflowGraph structure that represents task
//! dependencies as a directed acyclic graph. Edges point from a predecessor
//! to the node that must wait for it. Node insertion order is preserved and
//! used for every tie-break, so scheduling is deterministic.

use crate::core::node::{NodeError, NodeId, TaskSpec, WorkflowNode};
use crate::error::{Error, Result};
use petgraph::algo::{has_path_connecting, toposort};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::Dfs;
use petgraph::Direction;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::fmt::Write as _;

/// The workflow dependency graph.
///
/// WorkflowGraph uses petgraph's DiGraph to store nodes. Nodes are never
/// removed during a run, so petgraph's node indices follow insertion order.
pub struct WorkflowGraph {
    /// The underlying directed graph.
    graph: DiGraph<WorkflowNode, ()>,
    /// Index mapping from NodeId to NodeIndex for fast lookups.
    node_index: HashMap<NodeId, NodeIndex>,
    /// Most recently added node.
    latest: Option<NodeId>,
}

impl WorkflowGraph {
    /// Create a new empty graph.
    pub fn new() -> Self {
        Self {
            graph: DiGraph::new(),
            node_index: HashMap::new(),
            latest: None,
        }
    }

    /// Add a node, registering an edge from each predecessor to it.
    ///
    /// # Errors
    /// Returns an error if:
    /// - A node with the same id is already present
    /// - Any predecessor is not in the graph
    /// - An edge would create a cycle
    /// - The node is running or failed, or completed behind a predecessor
    ///   that has not completed
    ///
    /// On error the graph is left unchanged.
    pub fn add_node(&mut self, node: WorkflowNode, predecessors: &[NodeId]) -> Result<NodeId> {
        if self.node_index.contains_key(&node.id) {
            return Err(Error::DuplicateNode(node.id));
        }
        if let Some(missing) = predecessors
            .iter()
            .find(|pred| !self.node_index.contains_key(pred))
        {
            return Err(Error::UnknownPredecessor(missing.to_string()));
        }
        if !node.is_pending() {
            let settled_preds = predecessors
                .iter()
                .all(|pred| self.node(pred).is_some_and(WorkflowNode::is_completed));
            if !node.is_completed() || !settled_preds {
                return Err(Error::Validation(format!(
                    "Cannot add node {} in state {} here",
                    node.id,
                    node.state().name()
                )));
            }
        }

        let id = node.id;
        let index = self.graph.add_node(node);
        self.node_index.insert(id, index);

        for pred in predecessors {
            if let Err(err) = self.connect(*pred, id) {
                // The new node holds the last index, so removal does not
                // renumber any other node.
                self.graph.remove_node(index);
                self.node_index.remove(&id);
                return Err(err);
            }
        }

        self.latest = Some(id);
        Ok(id)
    }

    /// Create a node for `task` and add it with the given predecessors.
    pub fn add_task(&mut self, task: TaskSpec, predecessors: &[NodeId]) -> Result<NodeId> {
        self.add_node(WorkflowNode::new(task), predecessors)
    }

    /// Add a task that depends on the latest node, extending a linear chain.
    ///
    /// The first task of an empty graph becomes a root.
    pub fn append(&mut self, task: TaskSpec) -> Result<NodeId> {
        let predecessors: Vec<NodeId> = self.latest.into_iter().collect();
        self.add_task(task, &predecessors)
    }

    /// Add a dependency edge between two existing nodes.
    ///
    /// The edge means `from` must complete before `to` can start. Adding an
    /// edge that already exists is a no-op.
    ///
    /// # Errors
    /// - `UnknownPredecessor` if `from` is not in the graph
    /// - `UnknownNode` if `to` is not in the graph
    /// - `Validation` if `to` is no longer pending
    /// - `CycleDetected` if the edge would close a cycle
    pub fn add_edge(&mut self, from: NodeId, to: NodeId) -> Result<()> {
        if !self.node_index.contains_key(&from) {
            return Err(Error::UnknownPredecessor(from.to_string()));
        }
        let target = self.node(&to).ok_or(Error::UnknownNode(to))?;
        if !target.is_pending() {
            return Err(Error::Validation(format!(
                "Cannot add a dependency to node {} in state {}",
                to,
                target.state().name()
            )));
        }
        self.connect(from, to)
    }

    fn connect(&mut self, from: NodeId, to: NodeId) -> Result<()> {
        let from_index = self.index_of(&from)?;
        let to_index = self.index_of(&to)?;

        if self.graph.find_edge(from_index, to_index).is_some() {
            return Ok(());
        }
        // A path to -> from (or from == to) would close a cycle.
        if has_path_connecting(&self.graph, to_index, from_index, None) {
            return Err(Error::CycleDetected { from, to });
        }

        self.graph.add_edge(from_index, to_index, ());
        Ok(())
    }

    fn index_of(&self, id: &NodeId) -> Result<NodeIndex> {
        self.node_index
            .get(id)
            .copied()
            .ok_or(Error::UnknownNode(*id))
    }

    /// Get a reference to a node by its ID.
    pub fn node(&self, id: &NodeId) -> Option<&WorkflowNode> {
        self.node_index
            .get(id)
            .and_then(|&index| self.graph.node_weight(index))
    }

    pub(crate) fn node_mut(&mut self, id: &NodeId) -> Option<&mut WorkflowNode> {
        match self.node_index.get(id) {
            Some(&index) => self.graph.node_weight_mut(index),
            None => None,
        }
    }

    /// All nodes in insertion order.
    pub fn nodes(&self) -> impl Iterator<Item = &WorkflowNode> + '_ {
        self.graph.node_weights()
    }

    /// Find the active node for a task key.
    ///
    /// When a task was retried the newest attempt wins.
    pub fn find_by_key(&self, key: &str) -> Option<NodeId> {
        self.nodes()
            .filter(|node| node.task.key == key)
            .last()
            .map(|node| node.id)
    }

    pub fn contains(&self, id: &NodeId) -> bool {
        self.node_index.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Check if an edge `from -> to` exists.
    pub fn has_edge(&self, from: &NodeId, to: &NodeId) -> bool {
        if let (Some(&from_idx), Some(&to_idx)) =
            (self.node_index.get(from), self.node_index.get(to))
        {
            self.graph.find_edge(from_idx, to_idx).is_some()
        } else {
            false
        }
    }

    /// The most recently added node.
    pub fn latest_node_id(&self) -> Option<NodeId> {
        self.latest
    }

    fn neighbors_sorted(&self, id: &NodeId, direction: Direction) -> Vec<NodeId> {
        let Some(&index) = self.node_index.get(id) else {
            return Vec::new();
        };
        let mut neighbors: Vec<NodeIndex> =
            self.graph.neighbors_directed(index, direction).collect();
        neighbors.sort();
        neighbors.into_iter().map(|i| self.graph[i].id).collect()
    }

    /// Direct predecessors of a node, in insertion order.
    pub fn dependencies(&self, id: &NodeId) -> Vec<NodeId> {
        self.neighbors_sorted(id, Direction::Incoming)
    }

    /// Direct successors of a node, in insertion order.
    pub fn dependents(&self, id: &NodeId) -> Vec<NodeId> {
        self.neighbors_sorted(id, Direction::Outgoing)
    }

    // ========== Scheduling Queries ==========

    fn is_ready(&self, index: NodeIndex) -> bool {
        self.graph[index].is_pending()
            && self
                .graph
                .neighbors_directed(index, Direction::Incoming)
                .all(|pred| self.graph[pred].is_completed())
    }

    /// Pending nodes whose every predecessor completed, in insertion order.
    pub fn ready_nodes(&self) -> Vec<NodeId> {
        self.graph
            .node_indices()
            .filter(|&index| self.is_ready(index))
            .map(|index| self.graph[index].id)
            .collect()
    }

    /// True when every node completed.
    ///
    /// Failed attempts that were replaced by a retry do not count.
    pub fn is_complete(&self) -> bool {
        self.graph
            .node_weights()
            .all(|node| node.is_completed() || node.superseded_by.is_some())
    }

    /// True when some node failed and was not replaced by a retry.
    pub fn has_failed(&self) -> bool {
        self.graph
            .node_weights()
            .any(WorkflowNode::is_unrecovered_failure)
    }

    /// Nodes that failed and were not replaced by a retry, in insertion order.
    pub fn failed_nodes(&self) -> Vec<NodeId> {
        self.nodes()
            .filter(|node| node.is_unrecovered_failure())
            .map(|node| node.id)
            .collect()
    }

    /// Nodes currently running, in insertion order.
    pub fn running_nodes(&self) -> Vec<NodeId> {
        self.nodes()
            .filter(|node| node.is_running())
            .map(|node| node.id)
            .collect()
    }

    /// Pending nodes in insertion order.
    pub fn pending_nodes(&self) -> Vec<NodeId> {
        self.nodes()
            .filter(|node| node.is_pending())
            .map(|node| node.id)
            .collect()
    }

    fn pruned_indices(&self) -> HashSet<NodeIndex> {
        let mut reached = HashSet::new();
        let mut dfs = Dfs::empty(&self.graph);
        for index in self.graph.node_indices() {
            if self.graph[index].is_unrecovered_failure() {
                dfs.move_to(index);
                while let Some(next) = dfs.next(&self.graph) {
                    reached.insert(next);
                }
            }
        }
        reached.retain(|&index| self.graph[index].is_pending());
        reached
    }

    /// Pending nodes cut off by a failed ancestor; they can never run.
    pub fn pruned_nodes(&self) -> Vec<NodeId> {
        let pruned = self.pruned_indices();
        self.graph
            .node_indices()
            .filter(|index| pruned.contains(index))
            .map(|index| self.graph[index].id)
            .collect()
    }

    /// Pending nodes that are neither ready nor pruned.
    ///
    /// With nothing running, a non-empty result means the workflow cannot
    /// make progress for a structural reason.
    pub fn stalled_nodes(&self) -> Vec<NodeId> {
        let pruned = self.pruned_indices();
        self.graph
            .node_indices()
            .filter(|&index| {
                self.graph[index].is_pending()
                    && !pruned.contains(&index)
                    && !self.is_ready(index)
            })
            .map(|index| self.graph[index].id)
            .collect()
    }

    // ========== Node Transitions ==========

    pub(crate) fn start_node(&mut self, id: &NodeId) -> Result<()> {
        self.node_mut(id).ok_or(Error::UnknownNode(*id))?.start()
    }

    pub(crate) fn complete_node(&mut self, id: &NodeId, result: Value) -> Result<()> {
        self.node_mut(id)
            .ok_or(Error::UnknownNode(*id))?
            .complete(result)
    }

    pub(crate) fn fail_node(&mut self, id: &NodeId, error: NodeError) -> Result<()> {
        self.node_mut(id).ok_or(Error::UnknownNode(*id))?.fail(error)
    }

    /// Replace a failed node with a fresh pending attempt.
    ///
    /// The new node gets the same task and predecessors; edges to the failed
    /// node's dependents move to it. The failed node stays in the graph,
    /// marked as superseded.
    pub(crate) fn retry_node(&mut self, failed: &NodeId) -> Result<NodeId> {
        let old_index = self.index_of(failed)?;
        let old = &self.graph[old_index];
        if !old.is_unrecovered_failure() {
            return Err(Error::Validation(format!(
                "Node {} cannot be retried in state {}",
                failed,
                old.state().name()
            )));
        }

        let fresh = WorkflowNode::retrying(old);
        let fresh_id = fresh.id;
        let preds: Vec<NodeIndex> = self
            .graph
            .neighbors_directed(old_index, Direction::Incoming)
            .collect();
        let succs: Vec<NodeIndex> = self
            .graph
            .neighbors_directed(old_index, Direction::Outgoing)
            .collect();

        let new_index = self.graph.add_node(fresh);
        self.node_index.insert(fresh_id, new_index);
        for pred in preds {
            self.graph.add_edge(pred, new_index, ());
        }
        for succ in succs {
            if let Some(edge) = self.graph.find_edge(old_index, succ) {
                self.graph.remove_edge(edge);
            }
            self.graph.add_edge(new_index, succ, ());
        }
        self.graph[old_index].superseded_by = Some(fresh_id);

        Ok(fresh_id)
    }

    // ========== Traversal ==========

    /// Node ids in topological order (every node after its predecessors).
    ///
    /// # Errors
    /// Returns an error if the graph contains a cycle (should never happen
    /// since edge insertion rejects cycles).
    pub fn topological_order(&self) -> Result<Vec<NodeId>> {
        let sorted = toposort(&self.graph, None).map_err(|cycle| {
            let name = self
                .graph
                .node_weight(cycle.node_id())
                .map(|n| n.task.display_name())
                .unwrap_or("unknown");
            Error::Validation(format!("Cycle detected at node: {}", name))
        })?;

        Ok(sorted.into_iter().map(|index| self.graph[index].id).collect())
    }

    /// Group nodes by their longest distance from a root.
    ///
    /// Level 0 holds the roots; every node sits one level below its deepest
    /// predecessor. Within a level nodes keep insertion order.
    pub fn execution_levels(&self) -> Result<Vec<Vec<NodeId>>> {
        let sorted = toposort(&self.graph, None)
            .map_err(|_| Error::Validation("Cycle detected in workflow graph".to_string()))?;

        let mut level: HashMap<NodeIndex, usize> = HashMap::with_capacity(sorted.len());
        for index in sorted {
            let depth = self
                .graph
                .neighbors_directed(index, Direction::Incoming)
                .filter_map(|pred| level.get(&pred))
                .map(|l| l + 1)
                .max()
                .unwrap_or(0);
            level.insert(index, depth);
        }

        let depth = level.values().max().map_or(0, |max| max + 1);
        let mut levels = vec![Vec::new(); depth];
        for index in self.graph.node_indices() {
            levels[level[&index]].push(self.graph[index].id);
        }
        Ok(levels)
    }

    /// Levels holding at least `threshold` nodes.
    pub fn parallel_levels(&self, threshold: usize) -> Result<Vec<Vec<NodeId>>> {
        Ok(self
            .execution_levels()?
            .into_iter()
            .filter(|level| level.len() >= threshold)
            .collect())
    }

    /// Render the execution levels as a human-readable plan.
    pub fn execution_plan(&self, threshold: usize) -> Result<String> {
        let mut plan = String::from("Execution Plan:\n");
        for (depth, level) in self.execution_levels()?.iter().enumerate() {
            let mode = if level.len() >= threshold {
                "PARALLEL"
            } else {
                "SEQUENTIAL"
            };
            let _ = writeln!(plan, "Level {} ({}):", depth, mode);
            for id in level {
                if let Some(node) = self.node(id) {
                    let _ = writeln!(plan, "  - {}", node.task.display_name());
                }
            }
        }
        Ok(plan)
    }
}

impl Default for WorkflowGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for WorkflowGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowGraph")
            .field("nodes", &self.len())
            .field("edges", &self.edge_count())
            .field("latest", &self.latest)
            .finish()
    }
}
