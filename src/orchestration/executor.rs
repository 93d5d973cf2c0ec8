//! Batch executor for ready workflow nodes.
//!
//! The ParallelExecutor takes the currently ready nodes of a graph (up to its
//! concurrency cap), dispatches them to agents concurrently and records each
//! outcome on its node. A batch is a barrier: `run_batch` returns only once
//! every dispatched invocation has settled.

use futures::stream::{FuturesUnordered, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::DEFAULT_MAX_CONCURRENCY;
use crate::core::{NodeError, NodeId, TaskSpec, WorkflowGraph};
use crate::error::{Error, Result};
use crate::orchestration::agent::AgentInvoker;
use crate::orchestration::events::{EventSink, WorkflowEvent};

/// What happened to the nodes of one batch.
///
/// `dispatched` is in insertion order; the other lists are in settlement
/// order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchReport {
    /// Nodes moved to Running by this batch.
    pub dispatched: Vec<NodeId>,
    /// Nodes whose agent returned a result.
    pub completed: Vec<NodeId>,
    /// Nodes whose agent returned an error.
    pub failed: Vec<NodeId>,
    /// Nodes interrupted by cancellation.
    pub cancelled: Vec<NodeId>,
}

impl BatchReport {
    /// True when nothing was ready to dispatch.
    pub fn is_empty(&self) -> bool {
        self.dispatched.is_empty()
    }

    pub fn has_failures(&self) -> bool {
        !self.failed.is_empty() || !self.cancelled.is_empty()
    }
}

/// Dispatches ready nodes to agents under a concurrency cap.
///
/// The executor keeps no state between batches and never retries.
#[derive(Debug, Clone)]
pub struct ParallelExecutor {
    max_concurrency: usize,
    cancel_on_failure: bool,
    events: EventSink,
}

impl ParallelExecutor {
    /// Create an executor running at most `max_concurrency` invocations per
    /// batch. A cap of zero is treated as one.
    pub fn new(max_concurrency: usize) -> Self {
        Self {
            max_concurrency: max_concurrency.max(1),
            cancel_on_failure: false,
            events: EventSink::default(),
        }
    }

    /// Report batch and node progress on `event_tx`.
    pub fn with_events(mut self, event_tx: mpsc::Sender<WorkflowEvent>) -> Self {
        self.events = EventSink::new(event_tx);
        self
    }

    pub(crate) fn with_event_sink(mut self, events: EventSink) -> Self {
        self.events = events;
        self
    }

    /// Cancel the rest of a batch as soon as one node fails.
    pub fn with_cancel_on_failure(mut self, cancel_on_failure: bool) -> Self {
        self.cancel_on_failure = cancel_on_failure;
        self
    }

    pub fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }

    pub fn cancels_on_failure(&self) -> bool {
        self.cancel_on_failure
    }

    /// Run one batch of ready nodes.
    ///
    /// Takes the first `max_concurrency` ready nodes in insertion order,
    /// starts them, invokes their agents concurrently and applies
    /// `complete` or `fail` to each node as its invocation settles. When
    /// `cancel` fires, invocations still in flight are dropped and their
    /// nodes fail with [`NodeError::Cancelled`]. Returns an empty report if
    /// no node is ready.
    ///
    /// Agent errors are stored on the nodes, never returned. An `Err` means
    /// the graph rejected a transition; nodes of the batch still running at
    /// that point are failed as cancelled before it is returned.
    ///
    /// With an event channel attached, emits `BatchDispatched`, then
    /// `NodeStarted` for each node, then one settlement event per node.
    pub async fn run_batch(
        &self,
        graph: &mut WorkflowGraph,
        invoker: &dyn AgentInvoker,
        cancel: &CancellationToken,
    ) -> Result<BatchReport> {
        let ready: Vec<NodeId> = graph
            .ready_nodes()
            .into_iter()
            .take(self.max_concurrency)
            .collect();
        if ready.is_empty() {
            return Ok(BatchReport::default());
        }

        let mut dispatch: Vec<(NodeId, TaskSpec)> = Vec::with_capacity(ready.len());
        let mut started: Vec<WorkflowEvent> = Vec::with_capacity(ready.len());
        for id in &ready {
            if let Err(e) = graph.start_node(id) {
                abandon_running(graph, &ready);
                return Err(e);
            }
            let node = graph.node(id).ok_or(Error::UnknownNode(*id))?;
            debug!(node = %id.short(), task = %node.task.key, attempt = node.attempt, "Node started");
            started.push(WorkflowEvent::NodeStarted {
                node: *id,
                key: node.task.key.clone(),
                attempt: node.attempt,
            });
            dispatch.push((*id, node.task.clone()));
        }
        info!(size = ready.len(), cap = self.max_concurrency, "Dispatching batch");
        self.events
            .emit(WorkflowEvent::BatchDispatched {
                nodes: ready.clone(),
            })
            .await;
        for event in started {
            self.events.emit(event).await;
        }

        let batch_token = cancel.child_token();
        let mut in_flight: FuturesUnordered<_> = dispatch
            .iter()
            .map(|(id, task)| {
                let token = batch_token.clone();
                async move {
                    let outcome = tokio::select! {
                        biased;
                        _ = token.cancelled() => Err(NodeError::Cancelled),
                        result = invoker.invoke(task) => {
                            result.map_err(|e| NodeError::agent(e.to_string()))
                        }
                    };
                    (*id, task.key.as_str(), outcome)
                }
            })
            .collect();

        let mut report = BatchReport {
            dispatched: ready,
            ..Default::default()
        };

        let mut aborted = None;
        while let Some((id, key, outcome)) = in_flight.next().await {
            let settled = self
                .settle(graph, &mut report, &batch_token, id, key, outcome)
                .await;
            if let Err(e) = settled {
                aborted = Some((id, e));
                break;
            }
        }
        drop(in_flight);

        if let Some((id, e)) = aborted {
            error!(node = %id.short(), error = %e, "Batch aborted");
            let abandoned = abandon_running(graph, &report.dispatched);
            report.cancelled.extend(abandoned);
            return Err(e);
        }

        debug!(
            completed = report.completed.len(),
            failed = report.failed.len(),
            cancelled = report.cancelled.len(),
            "Batch settled"
        );
        Ok(report)
    }

    /// Record one settled invocation on its node.
    async fn settle(
        &self,
        graph: &mut WorkflowGraph,
        report: &mut BatchReport,
        batch_token: &CancellationToken,
        id: NodeId,
        key: &str,
        outcome: std::result::Result<Value, NodeError>,
    ) -> Result<()> {
        let key = key.to_string();
        match outcome {
            Ok(result) => {
                graph.complete_node(&id, result.clone())?;
                debug!(node = %id.short(), "Node completed");
                report.completed.push(id);
                self.events
                    .emit(WorkflowEvent::NodeCompleted {
                        node: id,
                        key,
                        result,
                    })
                    .await;
            }
            Err(NodeError::Cancelled) => {
                graph.fail_node(&id, NodeError::Cancelled)?;
                debug!(node = %id.short(), "Node cancelled");
                report.cancelled.push(id);
                self.events
                    .emit(WorkflowEvent::NodeCancelled { node: id, key })
                    .await;
            }
            Err(error) => {
                warn!(node = %id.short(), error = %error, "Node failed");
                graph.fail_node(&id, error.clone())?;
                report.failed.push(id);
                if self.cancel_on_failure && !batch_token.is_cancelled() {
                    debug!("Cancelling remaining nodes in batch");
                    batch_token.cancel();
                }
                self.events
                    .emit(WorkflowEvent::NodeFailed {
                        node: id,
                        key,
                        error,
                    })
                    .await;
            }
        }
        Ok(())
    }
}

/// Fail every node of `nodes` that is still running as cancelled, so a
/// batch that stops early leaves nothing running. Returns the failed ids.
fn abandon_running(graph: &mut WorkflowGraph, nodes: &[NodeId]) -> Vec<NodeId> {
    let mut abandoned = Vec::new();
    for id in nodes {
        let running = graph.node(id).is_some_and(|node| node.is_running());
        if running && graph.fail_node(id, NodeError::Cancelled).is_ok() {
            abandoned.push(*id);
        }
    }
    abandoned
}

impl Default for ParallelExecutor {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_CONCURRENCY)
    }
}
