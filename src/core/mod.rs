//! Core domain models for workflow orchestration.
//!
//! This module contains the fundamental data structures used throughout
//! the orchestration system: workflow nodes and the dependency graph.

pub mod graph;
pub mod node;

pub use graph::WorkflowGraph;
pub use node::{NodeError, NodeId, NodeState, TaskSpec, WorkflowNode};
