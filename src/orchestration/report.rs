//! Aggregated outcome of a workflow run.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::{NodeError, NodeId};
use crate::error::{Error, Result};
use crate::workflow::WorkflowId;

/// Why a run stopped before every node completed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AbortReason {
    /// A node failed under the fail-fast policy.
    FailFast { node: NodeId },
    /// Pending nodes could not be scheduled while nothing was running.
    Stalled { pending: Vec<NodeId> },
    /// The run's cancellation token fired; `nodes` were interrupted.
    Cancelled { nodes: Vec<NodeId> },
}

impl std::fmt::Display for AbortReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AbortReason::FailFast { node } => write!(f, "fail-fast on node {}", node.short()),
            AbortReason::Stalled { pending } => {
                write!(f, "stalled with {} pending node(s)", pending.len())
            }
            AbortReason::Cancelled { nodes } => {
                write!(f, "cancelled with {} node(s) interrupted", nodes.len())
            }
        }
    }
}

/// Terminal outcome of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    /// Every node completed.
    Completed,
    /// Every branch that could run finished, but some nodes failed and
    /// their dependents were never scheduled.
    Partial,
    Aborted(AbortReason),
}

impl std::fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunOutcome::Completed => write!(f, "completed"),
            RunOutcome::Partial => write!(f, "partial"),
            RunOutcome::Aborted(reason) => write!(f, "aborted ({})", reason),
        }
    }
}

/// Result produced by a completed node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeOutput {
    pub node: NodeId,
    pub key: String,
    pub attempt: u32,
    pub result: Value,
}

/// A node that failed and was not retried.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedNode {
    pub node: NodeId,
    pub key: String,
    pub attempt: u32,
    pub error: NodeError,
}

/// Everything a caller needs to know about a finished run.
///
/// Node lists follow graph insertion order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowReport {
    pub workflow_id: WorkflowId,
    pub outcome: RunOutcome,
    /// Results of completed nodes.
    pub results: Vec<NodeOutput>,
    /// Unrecovered failures, cancelled nodes included.
    pub failed: Vec<FailedNode>,
    /// Nodes that never ran: pruned, stalled or left behind by an abort.
    pub unresolved: Vec<NodeId>,
    /// Failed attempts that were replaced by a retry.
    pub retried: Vec<NodeId>,
    /// Node ids dispatched by each batch, in batch order.
    pub batches: Vec<Vec<NodeId>>,
}

impl WorkflowReport {
    pub fn is_success(&self) -> bool {
        self.outcome == RunOutcome::Completed
    }

    /// Nodes responsible for an unsuccessful outcome.
    ///
    /// For an abort these are the nodes named by the reason; for a partial
    /// run, the failed nodes followed by the unresolved ones.
    pub fn affected_nodes(&self) -> Vec<NodeId> {
        match &self.outcome {
            RunOutcome::Completed => Vec::new(),
            RunOutcome::Partial => self
                .failed
                .iter()
                .map(|f| f.node)
                .chain(self.unresolved.iter().copied())
                .collect(),
            RunOutcome::Aborted(AbortReason::FailFast { node }) => vec![*node],
            RunOutcome::Aborted(AbortReason::Stalled { pending }) => pending.clone(),
            RunOutcome::Aborted(AbortReason::Cancelled { nodes }) => nodes.clone(),
        }
    }

    /// Result of the completed node for `key`.
    pub fn result_for(&self, key: &str) -> Option<&Value> {
        self.results
            .iter()
            .rev()
            .find(|output| output.key == key)
            .map(|output| &output.result)
    }

    pub fn failure_for(&self, node: &NodeId) -> Option<&FailedNode> {
        self.failed.iter().find(|f| f.node == *node)
    }

    /// Convert an unsuccessful outcome into the matching error.
    pub fn into_result(self) -> Result<Self> {
        match &self.outcome {
            RunOutcome::Completed => Ok(self),
            RunOutcome::Partial => {
                let first = self
                    .failed
                    .iter()
                    .find(|f| !f.error.is_cancelled())
                    .or_else(|| self.failed.first());
                match first {
                    Some(failed) => Err(Error::AgentInvocationFailed {
                        node: failed.node,
                        message: failed.error.to_string(),
                    }),
                    None => Err(Error::Validation(format!(
                        "Workflow {} finished partially without a recorded failure",
                        self.workflow_id
                    ))),
                }
            }
            RunOutcome::Aborted(AbortReason::FailFast { node }) => {
                let message = self
                    .failure_for(node)
                    .map(|f| f.error.to_string())
                    .unwrap_or_else(|| "aborted by fail-fast policy".to_string());
                Err(Error::AgentInvocationFailed {
                    node: *node,
                    message,
                })
            }
            RunOutcome::Aborted(AbortReason::Stalled { pending }) => Err(Error::WorkflowStalled {
                pending: pending.clone(),
            }),
            RunOutcome::Aborted(AbortReason::Cancelled { nodes }) => Err(Error::Cancelled {
                nodes: nodes.clone(),
            }),
        }
    }
}
