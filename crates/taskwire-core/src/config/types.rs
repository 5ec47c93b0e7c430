//! Configuration types

use serde::{Deserialize, Serialize};

/// Main configuration for taskwire
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Task scheduling configuration
    pub tasks: TasksConfig,
}

/// Task scheduling configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TasksConfig {
    /// Run the tasks of a layer concurrently (false: one at a time)
    pub parallel: bool,

    /// Policy applied when a task name is registered twice
    pub duplicates: DuplicatePolicy,

    /// Abort still-running siblings when a task in the same layer fails
    pub cancel_on_failure: bool,

    /// Forward plan and progress messages to the tracing log
    pub log_plan: bool,
}

impl Default for TasksConfig {
    fn default() -> Self {
        Self {
            parallel: true,
            duplicates: DuplicatePolicy::default(),
            cancel_on_failure: false,
            log_plan: false,
        }
    }
}

/// How the task store treats a registration under an already used name
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicatePolicy {
    /// Last registration wins
    #[default]
    Replace,
    /// Registration fails and the store keeps the first task
    Reject,
}
