//! Agent invocation interface and the registry that routes tasks to agents.
//!
//! The orchestration core never talks to a transport directly. It calls an
//! [`AgentInvoker`] for each dispatched node; timeouts and transport-level
//! retries belong to the invoker. Which invoker handles a task is decided by
//! an [`AgentRegistry`], injected into the orchestrator at construction.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use serde_json::Value;
use tracing::trace;

use crate::core::TaskSpec;

/// Error returned by an agent collaborator.
pub type AgentError = Box<dyn std::error::Error + Send + Sync>;

/// Outcome of one agent invocation.
pub type AgentResult = std::result::Result<Value, AgentError>;

/// A remote agent that performs one task.
pub trait AgentInvoker: Send + Sync {
    fn invoke<'a>(&'a self, task: &'a TaskSpec) -> BoxFuture<'a, AgentResult>;
}

impl<T: AgentInvoker + ?Sized> AgentInvoker for Arc<T> {
    fn invoke<'a>(&'a self, task: &'a TaskSpec) -> BoxFuture<'a, AgentResult> {
        (**self).invoke(task)
    }
}

/// Adapter turning an async closure into an [`AgentInvoker`].
///
/// The closure receives an owned copy of the task.
pub struct FnInvoker<F> {
    f: F,
}

/// Build an [`AgentInvoker`] from an async closure.
///
/// ```ignore
/// let echo = invoker_fn(|task| async move { Ok(serde_json::json!(task.description)) });
/// ```
pub fn invoker_fn<F, Fut>(f: F) -> FnInvoker<F>
where
    F: Fn(TaskSpec) -> Fut + Send + Sync,
    Fut: Future<Output = AgentResult> + Send + 'static,
{
    FnInvoker { f }
}

impl<F, Fut> AgentInvoker for FnInvoker<F>
where
    F: Fn(TaskSpec) -> Fut + Send + Sync,
    Fut: Future<Output = AgentResult> + Send + 'static,
{
    fn invoke<'a>(&'a self, task: &'a TaskSpec) -> BoxFuture<'a, AgentResult> {
        Box::pin((self.f)(task.clone()))
    }
}

/// Read-only lookup of the agent responsible for a task.
pub trait AgentRegistry: Send + Sync {
    fn find_agent(&self, task: &TaskSpec) -> Option<Arc<dyn AgentInvoker>>;
}

/// Registry of named agents with an optional fallback.
///
/// A task's `agent` hint selects a named agent. Tasks without a hint, or
/// with a hint that names no registered agent, go to the default agent.
#[derive(Default, Clone)]
pub struct AgentDirectory {
    agents: HashMap<String, Arc<dyn AgentInvoker>>,
    default: Option<Arc<dyn AgentInvoker>>,
}

impl AgentDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// A directory that sends every task to one agent.
    pub fn single(agent: impl AgentInvoker + 'static) -> Self {
        Self::new().with_default(agent)
    }

    pub fn with_agent(mut self, name: impl Into<String>, agent: impl AgentInvoker + 'static) -> Self {
        self.agents.insert(name.into(), Arc::new(agent));
        self
    }

    pub fn with_default(mut self, agent: impl AgentInvoker + 'static) -> Self {
        self.default = Some(Arc::new(agent));
        self
    }

    /// Names of the registered agents, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.agents.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn has_default(&self) -> bool {
        self.default.is_some()
    }
}

impl AgentRegistry for AgentDirectory {
    fn find_agent(&self, task: &TaskSpec) -> Option<Arc<dyn AgentInvoker>> {
        if let Some(agent) = task.agent.as_deref().and_then(|name| self.agents.get(name)) {
            trace!(task = %task.key, agent = ?task.agent, "Routing task to named agent");
            return Some(Arc::clone(agent));
        }
        trace!(task = %task.key, "Routing task to default agent");
        self.default.clone()
    }
}

impl std::fmt::Debug for AgentDirectory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentDirectory")
            .field("agents", &self.names())
            .field("has_default", &self.has_default())
            .finish()
    }
}

/// Invoker that resolves the agent for each task through a registry.
pub(crate) struct RegistryInvoker<'r> {
    registry: &'r dyn AgentRegistry,
}

impl<'r> RegistryInvoker<'r> {
    pub(crate) fn new(registry: &'r dyn AgentRegistry) -> Self {
        Self { registry }
    }
}

impl AgentInvoker for RegistryInvoker<'_> {
    fn invoke<'a>(&'a self, task: &'a TaskSpec) -> BoxFuture<'a, AgentResult> {
        match self.registry.find_agent(task) {
            Some(agent) => Box::pin(async move { agent.invoke(task).await }),
            None => {
                let message = format!("no agent available for task '{}'", task.key);
                Box::pin(async move { Err::<Value, AgentError>(message.into()) })
            }
        }
    }
}
