//! Workflow orchestrator.
//!
//! The Orchestrator turns a task list into a workflow graph and drives it to
//! a terminal state: it repeatedly hands the ready nodes to the
//! [`ParallelExecutor`], merges the outcomes back into the graph, retries
//! failures when configured to, and stops on completion, partial
//! completion, stall, fail-fast abort or cancellation.
//!
//! # Run phases
//!
//! ```text
//! Initializing -> Executing -> Completed
//!       |              \-----> Failed
//!       \--------------------> Failed   (graph could not be built)
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::OrchestratorConfig;
use crate::core::{NodeId, WorkflowGraph};
use crate::error::{Error, Result};
use crate::orchestration::agent::{AgentRegistry, RegistryInvoker};
use crate::orchestration::events::{EventSink, WorkflowEvent};
use crate::orchestration::executor::ParallelExecutor;
use crate::orchestration::report::{AbortReason, FailedNode, NodeOutput, RunOutcome, WorkflowReport};
use crate::workflow::{
    EdgeInference, FailurePolicy, PhaseHistoryEntry, RunPhase, RunState, TaskList, WorkflowId,
};

/// Drives workflow runs against an injected agent registry.
///
/// # Example
///
/// ```ignore
/// use std::sync::Arc;
/// use agentflow::orchestration::{invoker_fn, AgentDirectory, Orchestrator};
///
/// let agents = AgentDirectory::single(invoker_fn(|task| async move {
///     Ok(serde_json::json!(task.description))
/// }));
/// let mut orchestrator = Orchestrator::new(Arc::new(agents), OrchestratorConfig::default());
/// let report = orchestrator.run(&tasks).await?;
/// ```
pub struct Orchestrator {
    registry: Arc<dyn AgentRegistry>,
    config: OrchestratorConfig,
    /// Cancels the current run and every later one.
    shutdown: CancellationToken,
    /// Cancels the current (or next) run only; re-armed after each run.
    cancel: CancellationToken,
    events: EventSink,
    state: RunState,
    graph: WorkflowGraph,
}

/// Bookkeeping accumulated while executing a graph.
#[derive(Default)]
struct Execution {
    batches: Vec<Vec<NodeId>>,
    retried: Vec<NodeId>,
}

impl Orchestrator {
    pub fn new(registry: Arc<dyn AgentRegistry>, config: OrchestratorConfig) -> Self {
        let shutdown = CancellationToken::new();
        Self {
            registry,
            config,
            cancel: shutdown.child_token(),
            shutdown,
            events: EventSink::default(),
            state: RunState::new(),
            graph: WorkflowGraph::new(),
        }
    }

    /// Report run progress on `event_tx`.
    ///
    /// The receiver must be drained while a run is in progress.
    pub fn with_events(mut self, event_tx: mpsc::Sender<WorkflowEvent>) -> Self {
        self.events = EventSink::new(event_tx);
        self
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Token that cancels the next run, or the one in progress.
    ///
    /// Each run consumes its token: when the run ends a fresh one is armed,
    /// so cancelling one run never affects the runs after it.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Token that cancels the current run and every later run.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn workflow_id(&self) -> WorkflowId {
        self.state.workflow_id()
    }

    pub fn phase(&self) -> RunPhase {
        self.state.current_phase()
    }

    pub fn phase_history(&self) -> &[PhaseHistoryEntry] {
        self.state.phase_history()
    }

    /// Graph of the most recent run.
    pub fn graph(&self) -> &WorkflowGraph {
        &self.graph
    }

    /// Build the workflow graph for a task list.
    ///
    /// Tasks with `depends_on` are wired to the named tasks, which must
    /// appear earlier in the list. Tasks without it are wired according to
    /// `inference`: to the previously added task, or not at all.
    ///
    /// # Errors
    /// - `EmptyWorkflow` if the list has no tasks
    /// - `DuplicateTaskKey` if two tasks share a key
    /// - `UnknownPredecessor` if `depends_on` names a key not seen yet
    pub fn build_graph(tasks: &TaskList, inference: EdgeInference) -> Result<WorkflowGraph> {
        if tasks.is_empty() {
            return Err(Error::EmptyWorkflow);
        }

        let mut graph = WorkflowGraph::new();
        let mut by_key: HashMap<&str, NodeId> = HashMap::with_capacity(tasks.len());

        for input in &tasks.tasks {
            let key = input.task.key.as_str();
            if by_key.contains_key(key) {
                return Err(Error::DuplicateTaskKey(key.to_string()));
            }

            let predecessors: Vec<NodeId> = match (&input.depends_on, inference) {
                (Some(keys), _) => keys
                    .iter()
                    .map(|k| {
                        by_key
                            .get(k.as_str())
                            .copied()
                            .ok_or_else(|| Error::UnknownPredecessor(k.clone()))
                    })
                    .collect::<Result<_>>()?,
                (None, EdgeInference::Sequential) => graph.latest_node_id().into_iter().collect(),
                (None, EdgeInference::Independent) => Vec::new(),
            };

            let id = graph.add_task(input.task.clone(), &predecessors)?;
            debug!(node = %id.short(), task = %key, predecessors = predecessors.len(), "Node added");
            by_key.insert(key, id);
        }

        Ok(graph)
    }

    /// Run a workflow described by a task list.
    ///
    /// Construction errors (invalid config, empty list, unknown or
    /// duplicate keys) are returned as `Err` before any agent is invoked.
    /// Once execution starts, every terminal state is reported through the
    /// returned [`WorkflowReport`]; use [`WorkflowReport::into_result`] to
    /// treat unsuccessful outcomes as errors.
    pub async fn run(&mut self, tasks: &TaskList) -> Result<WorkflowReport> {
        let result = self.run_tasks(tasks).await;
        self.rearm_cancel();
        result
    }

    async fn run_tasks(&mut self, tasks: &TaskList) -> Result<WorkflowReport> {
        self.state = RunState::new();
        self.graph = WorkflowGraph::new();
        info!(
            workflow = %self.state.workflow_id().short(),
            tasks = tasks.len(),
            "Starting workflow"
        );

        let built = self
            .config
            .validate()
            .and_then(|()| Self::build_graph(tasks, self.config.edge_inference));
        match built {
            Ok(graph) => self.execute(graph).await,
            Err(e) => {
                error!(error = %e, "Failed to build workflow graph");
                self.state.transition(RunPhase::Failed)?;
                Err(e)
            }
        }
    }

    /// Run a workflow from a graph built by the caller.
    ///
    /// Nodes that already completed are kept and not dispatched again, so a
    /// partially executed graph can be resumed.
    ///
    /// # Errors
    /// Returns `Validation` if a node is running or the config is invalid.
    pub async fn run_graph(&mut self, graph: WorkflowGraph) -> Result<WorkflowReport> {
        let result = self.run_prepared(graph).await;
        self.rearm_cancel();
        result
    }

    async fn run_prepared(&mut self, graph: WorkflowGraph) -> Result<WorkflowReport> {
        self.state = RunState::new();
        self.graph = WorkflowGraph::new();
        info!(
            workflow = %self.state.workflow_id().short(),
            nodes = graph.len(),
            "Starting workflow from graph"
        );

        let checked = self.config.validate().and_then(|()| {
            if graph.is_empty() {
                return Err(Error::EmptyWorkflow);
            }
            match graph.running_nodes().first() {
                Some(running) => Err(Error::Validation(format!(
                    "Node {} is already running",
                    running
                ))),
                None => Ok(()),
            }
        });
        if let Err(e) = checked {
            error!(error = %e, "Refusing to run workflow graph");
            self.state.transition(RunPhase::Failed)?;
            return Err(e);
        }

        self.execute(graph).await
    }

    fn rearm_cancel(&mut self) {
        self.cancel = self.shutdown.child_token();
    }

    async fn execute(&mut self, graph: WorkflowGraph) -> Result<WorkflowReport> {
        self.graph = graph;
        self.state.transition(RunPhase::Executing)?;
        info!(
            nodes = self.graph.len(),
            edges = self.graph.edge_count(),
            policy = %self.config.failure_policy,
            "Workflow graph ready"
        );
        self.events
            .emit(WorkflowEvent::RunStarted {
                workflow_id: self.state.workflow_id(),
                nodes: self.graph.len(),
            })
            .await;

        let mut execution = Execution::default();
        let outcome = match self.drive(&mut execution).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(error = %e, "Workflow execution failed");
                self.state.transition(RunPhase::Failed)?;
                return Err(e);
            }
        };
        let report = self.report(outcome, execution);

        let phase = if report.is_success() {
            RunPhase::Completed
        } else {
            RunPhase::Failed
        };
        self.state.transition(phase)?;

        match &report.outcome {
            RunOutcome::Completed => info!(
                workflow = %report.workflow_id.short(),
                batches = report.batches.len(),
                "Workflow completed"
            ),
            RunOutcome::Partial => warn!(
                workflow = %report.workflow_id.short(),
                failed = report.failed.len(),
                unresolved = report.unresolved.len(),
                "Workflow finished partially"
            ),
            RunOutcome::Aborted(reason) => error!(
                workflow = %report.workflow_id.short(),
                reason = %reason,
                "Workflow aborted"
            ),
        }

        self.events
            .emit(WorkflowEvent::RunFinished {
                workflow_id: report.workflow_id,
                outcome: report.outcome.clone(),
            })
            .await;

        Ok(report)
    }

    /// Batch loop. Returns once the graph reached a terminal state.
    async fn drive(&mut self, execution: &mut Execution) -> Result<RunOutcome> {
        let fail_fast = self.config.failure_policy == FailurePolicy::FailFast;
        // Siblings are only cut short when the failure cannot be retried.
        let executor = ParallelExecutor::new(self.config.max_concurrency)
            .with_cancel_on_failure(fail_fast && self.config.max_attempts <= 1)
            .with_event_sink(self.events.clone());
        let registry = Arc::clone(&self.registry);
        let invoker = RegistryInvoker::new(registry.as_ref());

        loop {
            if self.graph.is_complete() {
                return Ok(RunOutcome::Completed);
            }

            if self.cancel.is_cancelled() {
                let nodes = self.cancelled_nodes();
                return Ok(RunOutcome::Aborted(AbortReason::Cancelled { nodes }));
            }

            self.retry_failures(execution).await?;

            if fail_fast && self.graph.has_failed() {
                if let Some(node) = self.first_failure() {
                    return Ok(RunOutcome::Aborted(AbortReason::FailFast { node }));
                }
            }

            let batch = executor
                .run_batch(&mut self.graph, &invoker, &self.cancel)
                .await?;

            if batch.is_empty() {
                // A stall needs a pending node behind a predecessor that is
                // neither completed nor an unrecovered failure. Graphs handed
                // in through `run`/`run_graph` never leave one: nothing runs
                // between batches and retries move edges off superseded nodes.
                let pending = self.graph.stalled_nodes();
                if !pending.is_empty() {
                    return Ok(RunOutcome::Aborted(AbortReason::Stalled { pending }));
                }
                // Everything left is failed or cut off by a failure.
                return Ok(RunOutcome::Partial);
            }

            execution.batches.push(batch.dispatched);
        }
    }

    /// Replace failed nodes that still have attempts left.
    async fn retry_failures(&mut self, execution: &mut Execution) -> Result<()> {
        let max_attempts = self.config.max_attempts;
        let eligible: Vec<NodeId> = self
            .graph
            .nodes()
            .filter(|node| {
                node.is_unrecovered_failure()
                    && node.attempt < max_attempts
                    && node.error().is_some_and(|e| !e.is_cancelled())
            })
            .map(|node| node.id)
            .collect();

        for failed in eligible {
            let fresh = self.graph.retry_node(&failed)?;
            let attempt = self.graph.node(&fresh).map_or(0, |node| node.attempt);
            info!(
                node = %failed.short(),
                retry = %fresh.short(),
                attempt,
                "Retrying failed node"
            );
            execution.retried.push(failed);
            self.events
                .emit(WorkflowEvent::NodeRetrying {
                    failed,
                    retry: fresh,
                    attempt,
                })
                .await;
        }
        Ok(())
    }

    /// First unrecovered failure that was not a cancellation, falling back
    /// to any unrecovered failure.
    fn first_failure(&self) -> Option<NodeId> {
        let failed = self.graph.failed_nodes();
        failed
            .iter()
            .copied()
            .find(|id| {
                self.graph
                    .node(id)
                    .and_then(|node| node.error())
                    .is_some_and(|e| !e.is_cancelled())
            })
            .or_else(|| failed.first().copied())
    }

    fn cancelled_nodes(&self) -> Vec<NodeId> {
        self.graph
            .nodes()
            .filter(|node| node.error().is_some_and(|e| e.is_cancelled()))
            .map(|node| node.id)
            .collect()
    }

    fn report(&self, outcome: RunOutcome, execution: Execution) -> WorkflowReport {
        let results = self
            .graph
            .nodes()
            .filter_map(|node| {
                node.result().map(|result| NodeOutput {
                    node: node.id,
                    key: node.task.key.clone(),
                    attempt: node.attempt,
                    result: result.clone(),
                })
            })
            .collect();

        let failed = self
            .graph
            .nodes()
            .filter(|node| node.is_unrecovered_failure())
            .filter_map(|node| {
                node.error().map(|error| FailedNode {
                    node: node.id,
                    key: node.task.key.clone(),
                    attempt: node.attempt,
                    error: error.clone(),
                })
            })
            .collect();

        WorkflowReport {
            workflow_id: self.state.workflow_id(),
            outcome,
            results,
            failed,
            unresolved: self.graph.pending_nodes(),
            retried: execution.retried,
            batches: execution.batches,
        }
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("config", &self.config)
            .field("phase", &self.state.current_phase())
            .field("graph", &self.graph)
            .finish()
    }
}
