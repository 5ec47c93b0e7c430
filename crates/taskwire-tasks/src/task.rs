//! Task types and definitions

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Value produced by a task or supplied by the caller
pub type TaskValue = serde_json::Value;

/// Error raised by a task callable
pub type TaskError = Box<dyn std::error::Error + Send + Sync>;

/// Outcome of one task invocation
pub type TaskOutcome = Result<TaskValue, TaskError>;

/// Boxed future returned by a task callable
pub type TaskFuture = Pin<Box<dyn Future<Output = TaskOutcome> + Send>>;

/// Type-erased task callable
pub type TaskFn = Arc<dyn Fn(TaskArgs) -> TaskFuture + Send + Sync>;

/// Values supplied by the caller for one resolve call
pub type Inputs = HashMap<String, TaskValue>;

/// A declared parameter of a task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Param {
    /// Parameter name; also the name of the task or input that feeds it
    pub name: String,
    /// Value used when the caller does not supply one.
    ///
    /// Parameters with a default are never injected from other tasks.
    #[serde(default)]
    pub default: Option<TaskValue>,
}

impl Param {
    /// A parameter that must be satisfied by a task or an external input
    pub fn required(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            default: None,
        }
    }

    /// A parameter that falls back to `default`
    pub fn with_default(name: impl Into<String>, default: TaskValue) -> Self {
        Self {
            name: name.into(),
            default: Some(default),
        }
    }

    /// Whether this parameter takes part in dependency injection
    pub fn is_required(&self) -> bool {
        self.default.is_none()
    }
}

/// A registered computation: its name, declared parameters and callable.
///
/// Descriptors are immutable once built. Cloning is cheap; the callable is
/// shared.
#[derive(Clone)]
pub struct TaskDescriptor {
    name: String,
    params: Vec<Param>,
    required_inputs: Vec<String>,
    callable: TaskFn,
}

impl TaskDescriptor {
    /// Start declaring a task
    pub fn builder(name: impl Into<String>) -> TaskBuilder {
        TaskBuilder {
            name: name.into(),
            params: Vec::new(),
        }
    }

    /// Build a descriptor from parts
    pub fn new(name: impl Into<String>, params: Vec<Param>, callable: TaskFn) -> Self {
        let mut unique: Vec<Param> = Vec::with_capacity(params.len());
        for param in params {
            match unique.iter_mut().find(|p| p.name == param.name) {
                Some(existing) => *existing = param,
                None => unique.push(param),
            }
        }
        let required_inputs = unique
            .iter()
            .filter(|p| p.is_required())
            .map(|p| p.name.clone())
            .collect();

        Self {
            name: name.into(),
            params: unique,
            required_inputs,
            callable,
        }
    }

    /// Task name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// All declared parameters, in declaration order
    pub fn params(&self) -> &[Param] {
        &self.params
    }

    /// Names of the parameters without a default, in declaration order
    pub fn required_inputs(&self) -> &[String] {
        &self.required_inputs
    }

    /// Invoke the callable
    pub fn call(&self, args: TaskArgs) -> TaskFuture {
        (self.callable)(args)
    }
}

impl fmt::Debug for TaskDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskDescriptor")
            .field("name", &self.name)
            .field("params", &self.params)
            .field("required_inputs", &self.required_inputs)
            .finish_non_exhaustive()
    }
}

/// Builder for [`TaskDescriptor`]
#[derive(Debug, Clone)]
pub struct TaskBuilder {
    name: String,
    params: Vec<Param>,
}

impl TaskBuilder {
    /// Declare a required parameter
    pub fn param(mut self, name: impl Into<String>) -> Self {
        self.params.push(Param::required(name));
        self
    }

    /// Declare several required parameters
    pub fn params<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.params.extend(names.into_iter().map(Param::required));
        self
    }

    /// Declare a parameter with a default value
    pub fn param_with_default(mut self, name: impl Into<String>, default: TaskValue) -> Self {
        self.params.push(Param::with_default(name, default));
        self
    }

    /// Finish with an async callable
    pub fn run<F, Fut>(self, f: F) -> TaskDescriptor
    where
        F: Fn(TaskArgs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = TaskOutcome> + Send + 'static,
    {
        let callable: TaskFn = Arc::new(move |args| Box::pin(f(args)));
        TaskDescriptor::new(self.name, self.params, callable)
    }

    /// Finish with a synchronous callable
    pub fn run_sync<F>(self, f: F) -> TaskDescriptor
    where
        F: Fn(TaskArgs) -> TaskOutcome + Send + Sync + 'static,
    {
        let callable: TaskFn = Arc::new(move |args| Box::pin(std::future::ready(f(args))));
        TaskDescriptor::new(self.name, self.params, callable)
    }
}

/// Errors raised when reading arguments inside a task
#[derive(Debug, thiserror::Error)]
pub enum ArgumentError {
    /// The argument was not passed to the task
    #[error("missing argument '{0}'")]
    Missing(String),

    /// The argument could not be converted to the requested type
    #[error("argument '{name}' has an unexpected shape: {source}")]
    Invalid {
        name: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Arguments handed to a task callable
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskArgs {
    values: HashMap<String, TaskValue>,
}

impl TaskArgs {
    /// Get an argument by name
    pub fn get(&self, name: &str) -> Option<&TaskValue> {
        self.values.get(name)
    }

    /// Get an argument by name, failing if it is absent
    pub fn require(&self, name: &str) -> Result<&TaskValue, ArgumentError> {
        self.values
            .get(name)
            .ok_or_else(|| ArgumentError::Missing(name.to_string()))
    }

    /// Deserialize an argument into `T`
    pub fn get_as<T: DeserializeOwned>(&self, name: &str) -> Result<T, ArgumentError> {
        let value = self.require(name)?;
        serde_json::from_value(value.clone()).map_err(|source| ArgumentError::Invalid {
            name: name.to_string(),
            source,
        })
    }

    /// Whether an argument was passed
    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    /// Number of arguments
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether no arguments were passed
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Sorted copy of the arguments, for diagnostics
    pub fn to_sorted(&self) -> BTreeMap<String, TaskValue> {
        self.values
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    pub(crate) fn insert(&mut self, name: impl Into<String>, value: TaskValue) {
        self.values.insert(name.into(), value);
    }
}

impl FromIterator<(String, TaskValue)> for TaskArgs {
    fn from_iter<T: IntoIterator<Item = (String, TaskValue)>>(iter: T) -> Self {
        Self {
            values: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_required_inputs_skip_defaults() {
        let task = TaskDescriptor::builder("go")
            .param("calc1")
            .param_with_default("x", json!(5))
            .param("calc2")
            .run_sync(|_| Ok(json!(null)));

        assert_eq!(task.name(), "go");
        assert_eq!(task.params().len(), 3);
        assert_eq!(task.required_inputs(), ["calc1", "calc2"]);
    }

    #[test]
    fn test_redeclared_param_replaces_earlier() {
        let task = TaskDescriptor::builder("go")
            .param("x")
            .param_with_default("x", json!(1))
            .run_sync(|_| Ok(json!(null)));

        assert_eq!(task.params().len(), 1);
        assert!(task.required_inputs().is_empty());
    }

    #[test]
    fn test_params_builder() {
        let task = TaskDescriptor::builder("both")
            .params(["get_param_1", "get_param_2"])
            .run_sync(|_| Ok(json!(null)));

        assert_eq!(task.required_inputs(), ["get_param_1", "get_param_2"]);
    }

    #[tokio::test]
    async fn test_call_sync_and_async() {
        let sync_task = TaskDescriptor::builder("sync")
            .param("n")
            .run_sync(|args| Ok(json!(args.get_as::<i64>("n")? + 1)));
        let async_task = TaskDescriptor::builder("async")
            .param("n")
            .run(|args| async move {
                let n: i64 = args.get_as("n")?;
                Ok(json!(n * 2))
            });

        let args: TaskArgs = [("n".to_string(), json!(4))].into_iter().collect();
        assert_eq!(sync_task.call(args.clone()).await.unwrap(), json!(5));
        assert_eq!(async_task.call(args).await.unwrap(), json!(8));
    }

    #[test]
    fn test_args_accessors() {
        let args: TaskArgs = [
            ("a".to_string(), json!("text")),
            ("b".to_string(), json!([1, 2])),
        ]
        .into_iter()
        .collect();

        assert_eq!(args.len(), 2);
        assert!(args.contains("a"));
        assert_eq!(args.get("a"), Some(&json!("text")));
        assert_eq!(args.get_as::<Vec<u8>>("b").unwrap(), vec![1, 2]);
        assert!(matches!(args.require("c"), Err(ArgumentError::Missing(_))));
        assert!(matches!(
            args.get_as::<i64>("a"),
            Err(ArgumentError::Invalid { .. })
        ));
        assert_eq!(args.to_sorted().keys().collect::<Vec<_>>(), ["a", "b"]);
    }

    #[test]
    fn test_debug_omits_callable() {
        let task = TaskDescriptor::builder("a").run_sync(|_| Ok(json!(1)));
        let debug = format!("{:?}", task);
        assert!(debug.contains("TaskDescriptor"));
        assert!(debug.contains("\"a\""));
    }
}
