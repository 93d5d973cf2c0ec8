//! Workflow node data model.
//!
//! A node is the unit of work handed to an agent. Each node carries the
//! task it describes and its position in the execution state machine:
//!
//! ```text
//! Pending -> Running -> Completed { result }
//!                    \-> Failed { error }
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::{Error, Result};

/// Unique identifier for a node within a workflow graph.
///
/// Uses UUID v4 for generation and provides a short form display
/// for human-readable output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub Uuid);

impl NodeId {
    /// Create a new unique node identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Return first 8 characters of the UUID for display.
    pub fn short(&self) -> String {
        self.0.to_string()[..8].to_string()
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for NodeId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Structured description of the work an agent should perform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSpec {
    /// Handle used by other tasks to reference this one.
    pub key: String,
    /// Human-readable name shown in execution plans.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    /// What the agent is asked to do.
    pub description: String,
    /// Routing hint for the agent registry.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent: Option<String>,
    /// Free-form parameters forwarded to the agent.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub params: Map<String, Value>,
}

impl TaskSpec {
    pub fn new(key: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            label: None,
            description: description.into(),
            agent: None,
            params: Map::new(),
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn with_agent(mut self, agent: impl Into<String>) -> Self {
        self.agent = Some(agent.into());
        self
    }

    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }

    /// Label for display, falling back to the key.
    pub fn display_name(&self) -> &str {
        self.label.as_deref().unwrap_or(&self.key)
    }
}

/// Why a node ended in the failed state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum NodeError {
    /// The agent returned an error for this node's task.
    #[error("agent invocation failed: {message}")]
    AgentInvocationFailed {
        /// Error reported by the agent collaborator.
        message: String,
    },
    /// The invocation was interrupted before it settled.
    #[error("cancelled")]
    Cancelled,
}

impl NodeError {
    pub fn agent(message: impl Into<String>) -> Self {
        Self::AgentInvocationFailed {
            message: message.into(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, NodeError::Cancelled)
    }
}

/// Execution state of a node.
///
/// The result only exists once a node completed and the error only once
/// it failed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case", tag = "state")]
pub enum NodeState {
    /// Waiting for its predecessors or for a free concurrency slot.
    #[default]
    Pending,
    /// Dispatched to an agent, invocation in flight.
    Running,
    /// Agent returned a result.
    Completed {
        /// Payload produced by the agent.
        result: Value,
    },
    /// Agent invocation failed or was cancelled.
    Failed {
        /// Failure detail.
        error: NodeError,
    },
}

impl NodeState {
    /// Short lowercase name of the state, without payload.
    pub fn name(&self) -> &'static str {
        match self {
            NodeState::Pending => "pending",
            NodeState::Running => "running",
            NodeState::Completed { .. } => "completed",
            NodeState::Failed { .. } => "failed",
        }
    }
}

impl std::fmt::Display for NodeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeState::Failed { error } => write!(f, "failed: {}", error),
            other => write!(f, "{}", other.name()),
        }
    }
}

/// A single schedulable task instance within a workflow run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowNode {
    /// Unique identifier for this node.
    pub id: NodeId,
    /// The task this node executes.
    pub task: TaskSpec,
    state: NodeState,
    /// 1-based attempt number; retries create fresh nodes with a higher attempt.
    pub attempt: u32,
    /// The failed node this one replaces, if it is a retry.
    pub retry_of: Option<NodeId>,
    /// The retry node that replaced this one after it failed.
    pub superseded_by: Option<NodeId>,
    /// When the node was created.
    pub created_at: DateTime<Utc>,
    /// When the node was dispatched.
    pub started_at: Option<DateTime<Utc>>,
    /// When the node settled (success or failure).
    pub finished_at: Option<DateTime<Utc>>,
}

impl WorkflowNode {
    /// Create a new pending node for the given task.
    pub fn new(task: TaskSpec) -> Self {
        Self {
            id: NodeId::new(),
            task,
            state: NodeState::Pending,
            attempt: 1,
            retry_of: None,
            superseded_by: None,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
        }
    }

    /// Create the node that retries `failed`.
    pub(crate) fn retrying(failed: &WorkflowNode) -> Self {
        Self {
            attempt: failed.attempt + 1,
            retry_of: Some(failed.id),
            ..Self::new(failed.task.clone())
        }
    }

    pub fn state(&self) -> &NodeState {
        &self.state
    }

    /// Pending -> Running.
    pub fn start(&mut self) -> Result<()> {
        if !self.is_pending() {
            return Err(self.invalid_transition("running"));
        }
        self.state = NodeState::Running;
        self.started_at = Some(Utc::now());
        Ok(())
    }

    /// Running -> Completed, storing the agent's result.
    pub fn complete(&mut self, result: Value) -> Result<()> {
        if !self.is_running() {
            return Err(self.invalid_transition("completed"));
        }
        self.state = NodeState::Completed { result };
        self.finished_at = Some(Utc::now());
        Ok(())
    }

    /// Running -> Failed, storing the error.
    pub fn fail(&mut self, error: NodeError) -> Result<()> {
        if !self.is_running() {
            return Err(self.invalid_transition("failed"));
        }
        self.state = NodeState::Failed { error };
        self.finished_at = Some(Utc::now());
        Ok(())
    }

    fn invalid_transition(&self, to: &str) -> Error {
        Error::InvalidStateTransition {
            node: self.id,
            from: self.state.name().to_string(),
            to: to.to_string(),
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self.state, NodeState::Pending)
    }

    pub fn is_running(&self) -> bool {
        matches!(self.state, NodeState::Running)
    }

    pub fn is_completed(&self) -> bool {
        matches!(self.state, NodeState::Completed { .. })
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.state, NodeState::Failed { .. })
    }

    /// Failed and not replaced by a retry.
    pub fn is_unrecovered_failure(&self) -> bool {
        self.is_failed() && self.superseded_by.is_none()
    }

    /// Result payload, present only when completed.
    pub fn result(&self) -> Option<&Value> {
        match &self.state {
            NodeState::Completed { result } => Some(result),
            _ => None,
        }
    }

    /// Error detail, present only when failed.
    pub fn error(&self) -> Option<&NodeError> {
        match &self.state {
            NodeState::Failed { error } => Some(error),
            _ => None,
        }
    }
}
