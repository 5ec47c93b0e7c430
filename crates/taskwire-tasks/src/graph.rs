//! Dependency graph construction

use std::collections::HashSet;

use indexmap::{IndexMap, IndexSet};
use tracing::{debug, info, instrument};

use crate::error::{ResolveError, Result};
use crate::store::TaskStore;
use crate::task::TaskDescriptor;

/// What a resolve call asks for
#[derive(Debug, Clone)]
pub enum Target {
    /// A registered task, or a supplied input, by name
    Name(String),
    /// A task that is not registered; it lives only for one resolve call
    AdHoc(TaskDescriptor),
}

impl Target {
    /// Name the result is reported under
    pub fn name(&self) -> &str {
        match self {
            Self::Name(name) => name,
            Self::AdHoc(task) => task.name(),
        }
    }
}

impl From<&str> for Target {
    fn from(name: &str) -> Self {
        Self::Name(name.to_string())
    }
}

impl From<String> for Target {
    fn from(name: String) -> Self {
        Self::Name(name)
    }
}

impl From<&String> for Target {
    fn from(name: &String) -> Self {
        Self::Name(name.clone())
    }
}

impl From<TaskDescriptor> for Target {
    fn from(task: TaskDescriptor) -> Self {
        Self::AdHoc(task)
    }
}

impl From<&TaskDescriptor> for Target {
    fn from(task: &TaskDescriptor) -> Self {
        Self::AdHoc(task.clone())
    }
}

/// A node in the dependency graph
#[derive(Debug, Clone)]
pub struct GraphNode {
    /// The task to run
    pub task: TaskDescriptor,
    /// Tasks that must complete before this one, in declaration order
    pub dependencies: Vec<String>,
}

/// Task -> required-task edges for one resolve call.
///
/// Nodes are kept in first-discovery order. Inputs supplied by the caller are
/// recorded separately and never become nodes.
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    nodes: IndexMap<String, GraphNode>,
    external: IndexSet<String>,
    targets: Vec<String>,
}

impl DependencyGraph {
    /// Build the graph needed to compute `targets`.
    ///
    /// `external` holds the names of the inputs supplied for this call. An
    /// external input shadows a registered task of the same name.
    #[instrument(skip_all, fields(targets = targets.len(), external = external.len()))]
    pub fn build(
        store: &TaskStore,
        targets: &[Target],
        external: &HashSet<String>,
    ) -> Result<Self> {
        let mut builder = GraphBuilder {
            store,
            external,
            nodes: IndexMap::new(),
            used_external: IndexSet::new(),
            path: Vec::new(),
        };
        let mut target_names = Vec::with_capacity(targets.len());

        for target in targets {
            match target {
                Target::Name(name) if external.contains(name) => {
                    builder.used_external.insert(name.clone());
                }
                Target::Name(name) => {
                    let task = store.get(name)?;
                    builder.visit(task)?;
                }
                Target::AdHoc(task) => {
                    debug!(task = task.name(), "resolving ad hoc target");
                    builder.visit(task)?;
                }
            }
            target_names.push(target.name().to_string());
        }

        info!(
            task_count = builder.nodes.len(),
            external_count = builder.used_external.len(),
            "dependency graph built"
        );

        Ok(Self {
            nodes: builder.nodes,
            external: builder.used_external,
            targets: target_names,
        })
    }

    /// Get a node by task name
    pub fn get(&self, name: &str) -> Option<&GraphNode> {
        self.nodes.get(name)
    }

    /// All nodes, in first-discovery order
    pub fn nodes(&self) -> impl Iterator<Item = (&str, &GraphNode)> {
        self.nodes.iter().map(|(name, node)| (name.as_str(), node))
    }

    /// Direct task dependencies of `name`
    pub fn dependencies(&self, name: &str) -> Option<&[String]> {
        self.nodes.get(name).map(|node| node.dependencies.as_slice())
    }

    /// Supplied inputs the graph consumes
    pub fn external(&self) -> impl Iterator<Item = &str> {
        self.external.iter().map(String::as_str)
    }

    /// Whether `name` is satisfied by a supplied input
    pub fn is_external(&self, name: &str) -> bool {
        self.external.contains(name)
    }

    /// Requested target names, in request order
    pub fn targets(&self) -> &[String] {
        &self.targets
    }

    /// Number of tasks that need to run
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether nothing needs to run
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

struct GraphBuilder<'a> {
    store: &'a TaskStore,
    external: &'a HashSet<String>,
    nodes: IndexMap<String, GraphNode>,
    used_external: IndexSet<String>,
    /// Tasks entered but not yet finished
    path: Vec<String>,
}

impl GraphBuilder<'_> {
    fn visit(&mut self, task: &TaskDescriptor) -> Result<()> {
        let name = task.name();

        if let Some(pos) = self.path.iter().position(|n| n == name) {
            let mut cycle = self.path[pos..].to_vec();
            cycle.push(name.to_string());
            return Err(ResolveError::CyclicDependency { cycle });
        }
        if self.nodes.contains_key(name) {
            return Ok(());
        }

        // Reserve the slot now so nodes keep first-discovery order.
        self.nodes.insert(
            name.to_string(),
            GraphNode {
                task: task.clone(),
                dependencies: Vec::new(),
            },
        );
        self.path.push(name.to_string());

        let mut dependencies: Vec<String> = Vec::new();
        for input in task.required_inputs() {
            if self.external.contains(input) {
                self.used_external.insert(input.clone());
                continue;
            }
            let store = self.store;
            let dependency = store.lookup(input).ok_or_else(|| {
                ResolveError::UnresolvedDependency {
                    input: input.clone(),
                    required_by: name.to_string(),
                }
            })?;
            self.visit(dependency)?;
            if !dependencies.contains(input) {
                dependencies.push(input.clone());
            }
        }

        self.path.pop();
        if let Some(node) = self.nodes.get_mut(name) {
            node.dependencies = dependencies;
        }
        Ok(())
    }
}
