//! agentflow: a multi-agent task orchestration engine.
//!
//! A task list (produced by an external planner) becomes a [`WorkflowGraph`]
//! of nodes joined by "must complete before" edges. The [`Orchestrator`]
//! runs that graph in batches: every ready node of a batch is dispatched to
//! a remote agent concurrently, results are merged back into the graph, and
//! the next batch is computed until the run reaches a terminal state.
//!
//! [`WorkflowGraph`]: core::WorkflowGraph
//! [`Orchestrator`]: orchestration::Orchestrator

pub mod config;
pub mod core;
pub mod error;
pub mod log;
pub mod orchestration;
pub mod workflow;

pub use error::{Error, Result};
