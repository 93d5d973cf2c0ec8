use thiserror::Error;

use crate::core::NodeId;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("No home directory")]
    NoHomeDir,

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Unknown predecessor: {0}")]
    UnknownPredecessor(String),

    #[error("Node not found: {0}")]
    UnknownNode(NodeId),

    #[error("Node already exists: {0}")]
    DuplicateNode(NodeId),

    #[error("Task key used more than once: {0}")]
    DuplicateTaskKey(String),

    #[error("Edge from {from} to {to} would create a cycle")]
    CycleDetected { from: NodeId, to: NodeId },

    #[error("Invalid state transition for node {node}: {from} -> {to}")]
    InvalidStateTransition {
        node: NodeId,
        from: String,
        to: String,
    },

    #[error("Workflow has no tasks")]
    EmptyWorkflow,

    #[error("Workflow stalled with {} unschedulable node(s)", pending.len())]
    WorkflowStalled { pending: Vec<NodeId> },

    #[error("Agent invocation failed for node {node}: {message}")]
    AgentInvocationFailed { node: NodeId, message: String },

    #[error("Workflow cancelled ({} node(s) interrupted)", nodes.len())]
    Cancelled { nodes: Vec<NodeId> },

    #[error("Invalid phase transition from {from} to {to}")]
    InvalidPhaseTransition { from: String, to: String },
}

pub type Result<T> = std::result::Result<T, Error>;
