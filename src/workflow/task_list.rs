//! Task list input produced by an external planner.
//!
//! A task list is an ordered sequence of tasks, each optionally naming the
//! keys of the tasks it depends on. It can be read from TOML:
//!
//! ```toml
//! [[task]]
//! key = "plan"
//! description = "Plan the trip"
//!
//! [[task]]
//! key = "flights"
//! description = "Find flights"
//! depends_on = ["plan"]
//! ```
//!
//! or from the equivalent JSON (`{"task": [...]}` or a bare array).

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::core::TaskSpec;
use crate::error::Result;

/// One entry of a task list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskInput {
    #[serde(flatten)]
    pub task: TaskSpec,
    /// Keys of tasks that must complete first.
    ///
    /// `None` lets the orchestrator infer edges; an empty list makes the
    /// task a root.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub depends_on: Option<Vec<String>>,
}

impl TaskInput {
    /// A task whose edges are inferred.
    pub fn new(task: TaskSpec) -> Self {
        Self {
            task,
            depends_on: None,
        }
    }

    /// A task with explicit predecessors.
    pub fn after<I, S>(task: TaskSpec, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            task,
            depends_on: Some(keys.into_iter().map(Into::into).collect()),
        }
    }

    /// A task with no predecessors.
    pub fn root(task: TaskSpec) -> Self {
        Self {
            task,
            depends_on: Some(Vec::new()),
        }
    }
}

impl From<TaskSpec> for TaskInput {
    fn from(task: TaskSpec) -> Self {
        Self::new(task)
    }
}

/// An ordered list of tasks.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskList {
    #[serde(rename = "task", default)]
    pub tasks: Vec<TaskInput>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum JsonTaskList {
    Wrapped(TaskList),
    Bare(Vec<TaskInput>),
}

impl TaskList {
    pub fn new(tasks: Vec<TaskInput>) -> Self {
        Self { tasks }
    }

    pub fn from_toml_str(s: &str) -> Result<Self> {
        Ok(toml::from_str(s)?)
    }

    pub fn from_json_str(s: &str) -> Result<Self> {
        Ok(match serde_json::from_str(s)? {
            JsonTaskList::Wrapped(list) => list,
            JsonTaskList::Bare(tasks) => Self { tasks },
        })
    }

    /// Load a task list, picking the format from the file extension.
    ///
    /// `.json` files are read as JSON, everything else as TOML.
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let is_json = path
            .extension()
            .map(|ext| ext.eq_ignore_ascii_case("json"))
            .unwrap_or(false);
        if is_json {
            Self::from_json_str(&content)
        } else {
            Self::from_toml_str(&content)
        }
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

impl From<Vec<TaskInput>> for TaskList {
    fn from(tasks: Vec<TaskInput>) -> Self {
        Self { tasks }
    }
}

impl FromIterator<TaskInput> for TaskList {
    fn from_iter<T: IntoIterator<Item = TaskInput>>(iter: T) -> Self {
        Self {
            tasks: iter.into_iter().collect(),
        }
    }
}
