//! Layered execution plans

use std::collections::HashMap;

use tracing::{info, instrument};

use crate::error::{ResolveError, Result};
use crate::graph::DependencyGraph;

/// Ordered layers of tasks derived from a [`DependencyGraph`].
///
/// Every task in layer `k` depends only on tasks in layers `< k` or on
/// supplied inputs, so the tasks of one layer can run concurrently.
#[derive(Debug, Clone)]
pub struct ExecutionPlan {
    graph: DependencyGraph,
    layers: Vec<Vec<String>>,
}

impl ExecutionPlan {
    /// Split the graph into layers by repeatedly taking every task whose
    /// dependencies are already placed.
    ///
    /// Within a layer, tasks keep the graph's first-discovery order.
    #[instrument(skip_all, fields(node_count = graph.len()))]
    pub fn from_graph(graph: DependencyGraph) -> Result<Self> {
        let mut placed: HashMap<&str, usize> = HashMap::new();
        let mut remaining: Vec<&str> = graph.nodes().map(|(name, _)| name).collect();
        let mut layers: Vec<Vec<String>> = Vec::new();

        while !remaining.is_empty() {
            let (ready, blocked): (Vec<&str>, Vec<&str>) =
                remaining.into_iter().partition(|name| {
                    graph
                        .dependencies(name)
                        .unwrap_or_default()
                        .iter()
                        .all(|dep| placed.contains_key(dep.as_str()))
                });

            if ready.is_empty() {
                return Err(ResolveError::CyclicDependency {
                    cycle: blocked.iter().map(|name| name.to_string()).collect(),
                });
            }

            let layer_idx = layers.len();
            for name in &ready {
                placed.insert(*name, layer_idx);
            }
            layers.push(ready.iter().map(|name| name.to_string()).collect());
            remaining = blocked;
        }

        info!(
            task_count = graph.len(),
            layer_count = layers.len(),
            "execution plan built"
        );

        Ok(Self { graph, layers })
    }

    /// The graph this plan was built from
    pub fn graph(&self) -> &DependencyGraph {
        &self.graph
    }

    /// Layers in execution order
    pub fn layers(&self) -> &[Vec<String>] {
        &self.layers
    }

    /// Requested target names
    pub fn targets(&self) -> &[String] {
        self.graph.targets()
    }

    /// Number of layers
    pub fn len(&self) -> usize {
        self.layers.len()
    }

    /// Whether the plan runs nothing
    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    /// Total number of tasks across all layers
    pub fn task_count(&self) -> usize {
        self.layers.iter().map(Vec::len).sum()
    }

    /// Index of the layer `name` runs in
    pub fn layer_of(&self, name: &str) -> Option<usize> {
        self.layers
            .iter()
            .position(|layer| layer.iter().any(|n| n == name))
    }

    /// Human-readable summary of the plan
    pub fn describe(&self) -> String {
        let mut plan = String::new();
        let external: Vec<&str> = self.graph.external().collect();
        if !external.is_empty() {
            plan.push_str(&format!("Inputs: {}\n", external.join(", ")));
        }
        for (i, layer) in self.layers.iter().enumerate() {
            plan.push_str(&format!("Layer {} ({} tasks):\n", i, layer.len()));
            for name in layer {
                let deps = self.graph.dependencies(name).unwrap_or_default();
                if deps.is_empty() {
                    plan.push_str(&format!("  {}\n", name));
                } else {
                    plan.push_str(&format!("  {} (after: {})\n", name, deps.join(", ")));
                }
            }
        }
        plan
    }
}
