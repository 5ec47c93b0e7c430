//! Task descriptor store

use indexmap::IndexMap;
use tracing::debug;

use taskwire_core::DuplicatePolicy;

use crate::error::{ResolveError, Result};
use crate::task::TaskDescriptor;

/// Registered tasks keyed by name, in registration order
#[derive(Debug, Clone, Default)]
pub struct TaskStore {
    tasks: IndexMap<String, TaskDescriptor>,
    policy: DuplicatePolicy,
}

impl TaskStore {
    /// Create an empty store with the given duplicate policy
    pub fn new(policy: DuplicatePolicy) -> Self {
        Self {
            tasks: IndexMap::new(),
            policy,
        }
    }

    /// Register a task.
    ///
    /// With [`DuplicatePolicy::Replace`] a later registration under the same
    /// name replaces the earlier one and keeps its position. With
    /// [`DuplicatePolicy::Reject`] it fails and the store is left unchanged.
    pub fn register(&mut self, task: TaskDescriptor) -> Result<()> {
        if self.tasks.contains_key(task.name()) {
            match self.policy {
                DuplicatePolicy::Reject => {
                    return Err(ResolveError::DuplicateName(task.name().to_string()));
                }
                DuplicatePolicy::Replace => {
                    debug!(task = task.name(), "replacing registered task");
                }
            }
        }
        self.tasks.insert(task.name().to_string(), task);
        Ok(())
    }

    /// Register tasks in order, stopping at the first error
    pub fn register_many<I>(&mut self, tasks: I) -> Result<()>
    where
        I: IntoIterator<Item = TaskDescriptor>,
    {
        tasks.into_iter().try_for_each(|task| self.register(task))
    }

    /// Look up a task by name
    pub fn lookup(&self, name: &str) -> Option<&TaskDescriptor> {
        self.tasks.get(name)
    }

    /// Look up a task by name, failing if it is not registered
    pub fn get(&self, name: &str) -> Result<&TaskDescriptor> {
        self.lookup(name)
            .ok_or_else(|| ResolveError::TaskNotFound(name.to_string()))
    }

    /// Whether a task is registered under `name`
    pub fn contains(&self, name: &str) -> bool {
        self.tasks.contains_key(name)
    }

    /// Registered names, in registration order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.tasks.keys().map(String::as_str)
    }

    /// Registered tasks, in registration order
    pub fn iter(&self) -> impl Iterator<Item = &TaskDescriptor> {
        self.tasks.values()
    }

    /// Number of registered tasks
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Whether the store is empty
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// The duplicate policy in effect
    pub fn policy(&self) -> DuplicatePolicy {
        self.policy
    }

    pub(crate) fn set_policy(&mut self, policy: DuplicatePolicy) {
        self.policy = policy;
    }
}
