//! Task registry, the public entry point for registering and resolving tasks

use std::collections::HashSet;
use std::sync::Arc;

use indexmap::IndexMap;
use tracing::{info, instrument};

use taskwire_core::{DuplicatePolicy, TasksConfig};

use crate::error::{ResolveError, Result};
use crate::executor::{Executor, ExecutorOptions};
use crate::graph::{DependencyGraph, Target};
use crate::hooks::{Hooks, PlanLogger, TaskTimer, TracingLogger};
use crate::plan::ExecutionPlan;
use crate::store::TaskStore;
use crate::task::{Inputs, TaskDescriptor, TaskValue};

/// Options recognized by a registry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistryOptions {
    /// Run the tasks of a layer concurrently
    pub parallel: bool,
    /// What to do when a name is registered twice
    pub duplicates: DuplicatePolicy,
    /// Abort running siblings when a task of the same layer fails
    pub cancel_on_failure: bool,
}

impl Default for RegistryOptions {
    fn default() -> Self {
        Self {
            parallel: true,
            duplicates: DuplicatePolicy::Replace,
            cancel_on_failure: false,
        }
    }
}

impl From<&TasksConfig> for RegistryOptions {
    fn from(config: &TasksConfig) -> Self {
        Self {
            parallel: config.parallel,
            duplicates: config.duplicates,
            cancel_on_failure: config.cancel_on_failure,
        }
    }
}

/// Registered tasks plus the configuration used to resolve them.
///
/// Resolving only needs `&self`, so a registry can be shared (for example in
/// an `Arc`) by concurrent resolve calls. Each call gets its own plan and
/// context. Registering needs `&mut self`.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    store: TaskStore,
    options: RegistryOptions,
    hooks: Hooks,
}

impl Registry {
    /// Create an empty registry with default options
    pub fn new() -> Self {
        Self::default()
    }

    /// Start building a registry
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    /// Create an empty registry with the given options
    pub fn with_options(options: RegistryOptions) -> Self {
        Self {
            store: TaskStore::new(options.duplicates),
            options,
            hooks: Hooks::default(),
        }
    }

    /// Create an empty registry from loaded configuration.
    ///
    /// `log_plan` installs [`TracingLogger`] as the log hook.
    pub fn from_config(config: &TasksConfig) -> Self {
        let mut registry = Self::with_options(config.into());
        if config.log_plan {
            registry.set_log(TracingLogger);
        }
        registry
    }

    /// Register a task
    pub fn register(&mut self, task: TaskDescriptor) -> Result<()> {
        self.store.register(task)
    }

    /// Register several tasks, stopping at the first error
    pub fn register_many<I>(&mut self, tasks: I) -> Result<()>
    where
        I: IntoIterator<Item = TaskDescriptor>,
    {
        self.store.register_many(tasks)
    }

    /// Look up a registered task
    pub fn lookup(&self, name: &str) -> Option<&TaskDescriptor> {
        self.store.lookup(name)
    }

    /// The task store
    pub fn store(&self) -> &TaskStore {
        &self.store
    }

    /// Current options
    pub fn options(&self) -> RegistryOptions {
        self.options
    }

    /// Required inputs of every registered task, in registration order
    pub fn graph(&self) -> IndexMap<String, Vec<String>> {
        self.store
            .iter()
            .map(|task| (task.name().to_string(), task.required_inputs().to_vec()))
            .collect()
    }

    /// Toggle concurrent execution within a layer
    pub fn set_parallel(&mut self, parallel: bool) {
        self.options.parallel = parallel;
    }

    /// Change the duplicate policy for later registrations
    pub fn set_duplicate_policy(&mut self, policy: DuplicatePolicy) {
        self.options.duplicates = policy;
        self.store.set_policy(policy);
    }

    /// Toggle aborting of siblings after a failure
    pub fn set_cancel_on_failure(&mut self, cancel: bool) {
        self.options.cancel_on_failure = cancel;
    }

    /// Install a timer hook
    pub fn set_timer(&mut self, timer: impl TaskTimer + 'static) {
        self.hooks.set_timer(Some(Arc::new(timer)));
    }

    /// Install a log hook
    pub fn set_log(&mut self, log: impl PlanLogger + 'static) {
        self.hooks.set_log(Some(Arc::new(log)));
    }

    /// Remove both hooks
    pub fn clear_hooks(&mut self) {
        self.hooks = Hooks::default();
    }

    /// Build the execution plan for `targets` without running anything.
    ///
    /// `input_names` are the names that will be supplied at resolve time.
    pub fn plan<T, N>(
        &self,
        targets: impl IntoIterator<Item = T>,
        input_names: impl IntoIterator<Item = N>,
    ) -> Result<ExecutionPlan>
    where
        T: Into<Target>,
        N: Into<String>,
    {
        let targets: Vec<Target> = targets.into_iter().map(Into::into).collect();
        let external: HashSet<String> = input_names.into_iter().map(Into::into).collect();
        self.build_plan(&targets, &external)
    }

    /// Resolve one target and return its value.
    ///
    /// The target is a registered name, a supplied input name, or an
    /// unregistered [`TaskDescriptor`] resolved ad hoc.
    pub async fn resolve<K>(
        &self,
        target: impl Into<Target>,
        inputs: impl IntoIterator<Item = (K, TaskValue)>,
    ) -> Result<TaskValue>
    where
        K: Into<String>,
    {
        let target = target.into();
        let name = target.name().to_string();
        let mut results = self.resolve_targets(vec![target], collect_inputs(inputs)).await?;
        results
            .swap_remove(&name)
            .ok_or(ResolveError::TaskNotFound(name))
    }

    /// Resolve several targets sharing one plan and one context.
    ///
    /// Returns the value of each requested target, in request order.
    pub async fn resolve_all<T, K>(
        &self,
        targets: impl IntoIterator<Item = T>,
        inputs: impl IntoIterator<Item = (K, TaskValue)>,
    ) -> Result<IndexMap<String, TaskValue>>
    where
        T: Into<Target>,
        K: Into<String>,
    {
        let targets: Vec<Target> = targets.into_iter().map(Into::into).collect();
        self.resolve_targets(targets, collect_inputs(inputs)).await
    }

    #[instrument(skip_all, fields(targets = targets.len(), inputs = inputs.len()))]
    async fn resolve_targets(
        &self,
        targets: Vec<Target>,
        inputs: Inputs,
    ) -> Result<IndexMap<String, TaskValue>> {
        let external: HashSet<String> = inputs.keys().cloned().collect();
        let plan = self.build_plan(&targets, &external)?;

        let executor = Executor::new(
            ExecutorOptions {
                parallel: self.options.parallel,
                cancel_on_failure: self.options.cancel_on_failure,
            },
            self.hooks.clone(),
        );
        let mut context = executor.run(&plan, inputs).await?;

        let mut results = IndexMap::with_capacity(targets.len());
        for name in plan.targets() {
            let value = context
                .remove(name)
                .or_else(|| results.get(name).cloned())
                .ok_or_else(|| ResolveError::TaskNotFound(name.clone()))?;
            results.insert(name.clone(), value);
        }

        info!(targets = ?plan.targets(), layers = plan.len(), "resolve complete");
        Ok(results)
    }

    fn build_plan(&self, targets: &[Target], external: &HashSet<String>) -> Result<ExecutionPlan> {
        let graph = DependencyGraph::build(&self.store, targets, external)?;
        ExecutionPlan::from_graph(graph)
    }
}

fn collect_inputs<K: Into<String>>(inputs: impl IntoIterator<Item = (K, TaskValue)>) -> Inputs {
    inputs.into_iter().map(|(k, v)| (k.into(), v)).collect()
}

/// Builder for [`Registry`]
#[derive(Default)]
pub struct RegistryBuilder {
    options: RegistryOptions,
    hooks: Hooks,
    tasks: Vec<TaskDescriptor>,
}

impl RegistryBuilder {
    /// Replace all options at once
    pub fn options(mut self, options: RegistryOptions) -> Self {
        self.options = options;
        self
    }

    /// Toggle concurrent execution within a layer
    pub fn parallel(mut self, parallel: bool) -> Self {
        self.options.parallel = parallel;
        self
    }

    /// Set the duplicate policy
    pub fn duplicate_policy(mut self, policy: DuplicatePolicy) -> Self {
        self.options.duplicates = policy;
        self
    }

    /// Abort siblings as soon as a task of the same layer fails
    pub fn cancel_on_failure(mut self, cancel: bool) -> Self {
        self.options.cancel_on_failure = cancel;
        self
    }

    /// Install a timer hook
    pub fn timer(mut self, timer: impl TaskTimer + 'static) -> Self {
        self.hooks.set_timer(Some(Arc::new(timer)));
        self
    }

    /// Install a log hook
    pub fn log(mut self, log: impl PlanLogger + 'static) -> Self {
        self.hooks.set_log(Some(Arc::new(log)));
        self
    }

    /// Register a task when the registry is built
    pub fn task(mut self, task: TaskDescriptor) -> Self {
        self.tasks.push(task);
        self
    }

    /// Build the registry, registering queued tasks in order
    pub fn build(self) -> Result<Registry> {
        let mut registry = Registry::with_options(self.options);
        registry.hooks = self.hooks;
        registry.register_many(self.tasks)?;
        Ok(registry)
    }
}
