//! Orchestration layer for agentflow.
//!
//! This module connects the workflow graph to remote agents: the agent
//! interfaces and routing directory, the batch executor that dispatches
//! ready nodes concurrently, the orchestrator that drives a run to a
//! terminal state and reports its outcome, and the progress events a run
//! emits along the way.

mod agent;
mod events;
mod executor;
mod orchestrator;
mod report;

pub use agent::{
    invoker_fn, AgentDirectory, AgentError, AgentInvoker, AgentRegistry, AgentResult, FnInvoker,
};
pub use events::WorkflowEvent;
pub use executor::{BatchReport, ParallelExecutor};
pub use orchestrator::Orchestrator;
pub use report::{AbortReason, FailedNode, NodeOutput, RunOutcome, WorkflowReport};
