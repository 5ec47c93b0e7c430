//! Taskwire Tasks - Dependency-injected task resolution
//!
//! Tasks declare the names of the values they need. Resolving a target builds
//! the dependency graph reachable from it, groups the graph into layers, and
//! runs every task exactly once per call, each layer concurrently.

pub mod error;
pub mod executor;
pub mod graph;
pub mod hooks;
pub mod plan;
pub mod registry;
pub mod store;
pub mod task;

pub use error::{ResolveError, Result};
pub use executor::{Executor, ExecutorOptions, ResolveContext};
pub use graph::{DependencyGraph, GraphNode, Target};
pub use hooks::{Hooks, PlanLogger, TaskTimer, TracingLogger};
pub use plan::ExecutionPlan;
pub use registry::{Registry, RegistryBuilder, RegistryOptions};
pub use store::TaskStore;
pub use task::{
    ArgumentError, Inputs, Param, TaskArgs, TaskBuilder, TaskDescriptor, TaskError, TaskFn,
    TaskFuture, TaskOutcome, TaskValue,
};
