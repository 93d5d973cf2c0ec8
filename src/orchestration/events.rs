//! Progress events emitted while a workflow runs.
//!
//! Events are sent over a bounded `tokio::sync::mpsc` channel handed to the
//! orchestrator (or a bare executor) at construction. The receiver must be
//! drained while the run is in progress; a full channel holds the run back
//! until there is room. A dropped receiver is ignored.

use serde_json::Value;
use tokio::sync::mpsc;
use tracing::trace;

use crate::core::{NodeError, NodeId};
use crate::orchestration::report::RunOutcome;
use crate::workflow::WorkflowId;

/// Lifecycle events of a workflow run, in the order they happen.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkflowEvent {
    /// The graph was built and execution begins.
    RunStarted {
        workflow_id: WorkflowId,
        nodes: usize,
    },
    /// A batch of ready nodes was taken for dispatch.
    BatchDispatched { nodes: Vec<NodeId> },
    /// A node moved to Running and its agent was invoked.
    NodeStarted {
        node: NodeId,
        key: String,
        attempt: u32,
    },
    /// A node's agent returned a result.
    NodeCompleted {
        node: NodeId,
        key: String,
        result: Value,
    },
    /// A node's agent returned an error.
    NodeFailed {
        node: NodeId,
        key: String,
        error: NodeError,
    },
    /// A node was interrupted before its agent answered.
    NodeCancelled { node: NodeId, key: String },
    /// A failed node was replaced by a fresh attempt.
    NodeRetrying {
        failed: NodeId,
        retry: NodeId,
        attempt: u32,
    },
    /// The run reached a terminal state.
    RunFinished {
        workflow_id: WorkflowId,
        outcome: RunOutcome,
    },
}

impl WorkflowEvent {
    /// The node this event is about, if any.
    pub fn node(&self) -> Option<NodeId> {
        match self {
            Self::NodeStarted { node, .. }
            | Self::NodeCompleted { node, .. }
            | Self::NodeFailed { node, .. }
            | Self::NodeCancelled { node, .. } => Some(*node),
            Self::NodeRetrying { retry, .. } => Some(*retry),
            Self::RunStarted { .. } | Self::BatchDispatched { .. } | Self::RunFinished { .. } => {
                None
            }
        }
    }
}

/// Optional sending half for [`WorkflowEvent`]s.
#[derive(Debug, Clone, Default)]
pub(crate) struct EventSink {
    tx: Option<mpsc::Sender<WorkflowEvent>>,
}

impl EventSink {
    pub(crate) fn new(tx: mpsc::Sender<WorkflowEvent>) -> Self {
        Self { tx: Some(tx) }
    }

    pub(crate) async fn emit(&self, event: WorkflowEvent) {
        if let Some(tx) = &self.tx {
            if tx.send(event).await.is_err() {
                trace!("Event receiver dropped");
            }
        }
    }
}
