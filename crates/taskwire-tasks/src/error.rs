//! Errors raised while registering, planning and resolving tasks

use std::collections::BTreeMap;

use crate::task::{TaskError, TaskValue};

/// Result type alias using ResolveError
pub type Result<T> = std::result::Result<T, ResolveError>;

/// Errors during registration, plan construction and execution
#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    /// A required input is neither a registered task nor a supplied input
    #[error("Task '{required_by}' requires '{input}', which is neither a registered task nor a supplied input")]
    UnresolvedDependency { input: String, required_by: String },

    /// The dependency graph contains a cycle
    #[error("Cyclic dependency detected: {}", cycle.join(" -> "))]
    CyclicDependency { cycle: Vec<String> },

    /// A task with this name is already registered and the store rejects duplicates
    #[error("Task '{0}' is already registered")]
    DuplicateName(String),

    /// The requested target is not a registered task
    #[error("Task '{0}' is not registered")]
    TaskNotFound(String),

    /// A task callable failed.
    ///
    /// `inputs` holds the arguments the task received; it is kept for
    /// diagnostics only.
    #[error("Task '{task}' failed: {source}")]
    TaskExecution {
        task: String,
        inputs: BTreeMap<String, TaskValue>,
        #[source]
        source: TaskError,
    },
}

impl ResolveError {
    /// Name of the task that failed, for execution errors
    pub fn failed_task(&self) -> Option<&str> {
        match self {
            Self::TaskExecution { task, .. } => Some(task),
            _ => None,
        }
    }

    /// Whether the error was raised before any task ran
    pub fn is_plan_error(&self) -> bool {
        !matches!(self, Self::TaskExecution { .. })
    }
}
