//! Taskwire Core - shared configuration and error types
//!
//! This crate holds what the task engine and its embedders have in common:
//! the configuration schema, config file discovery and loading, and the
//! error types those operations report.

pub mod config;
pub mod error;

pub use config::{Config, DuplicatePolicy, TasksConfig};
pub use error::{ConfigError, CoreError, Result};
