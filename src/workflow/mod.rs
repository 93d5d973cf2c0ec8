//! Workflow run types for the orchestrator.
//!
//! This module provides the type definitions for tracking a run's
//! lifecycle and phases, and the task list format accepted as input.

mod state;
mod task_list;
mod types;

pub use state::{PhaseHistoryEntry, RunState};
pub use task_list::{TaskInput, TaskList};
pub use types::{EdgeInference, FailurePolicy, RunPhase, WorkflowId};
