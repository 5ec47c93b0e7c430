//! Layer-by-layer task executor on tokio

use std::collections::{HashMap, HashSet};
use std::time::Instant;

use tokio::task::{Id, JoinHandle, JoinSet};
use tracing::{debug, error, info, instrument, warn};

use crate::error::{ResolveError, Result};
use crate::hooks::Hooks;
use crate::plan::ExecutionPlan;
use crate::task::{Inputs, TaskArgs, TaskDescriptor, TaskError, TaskOutcome, TaskValue};

/// Values known during one resolve call: supplied inputs plus task results
pub type ResolveContext = HashMap<String, TaskValue>;

/// Options for the executor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutorOptions {
    /// Run the tasks of a layer concurrently
    pub parallel: bool,
    /// Abort running siblings as soon as a task of the same layer fails
    pub cancel_on_failure: bool,
}

impl Default for ExecutorOptions {
    fn default() -> Self {
        Self {
            parallel: true,
            cancel_on_failure: false,
        }
    }
}

/// Lifecycle of a task within one resolve call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TaskState {
    /// Waiting for dependencies
    Pending,
    /// All dependencies are available
    Ready,
    /// Dispatched
    Running,
    /// Finished successfully
    Done,
    /// Finished with an error
    Failed,
}

/// Runs an [`ExecutionPlan`] layer by layer
#[derive(Debug, Clone, Default)]
pub struct Executor {
    options: ExecutorOptions,
    hooks: Hooks,
}

/// A task ready to be dispatched, with its arguments bound
struct Job {
    name: String,
    task: TaskDescriptor,
    args: TaskArgs,
}

impl Executor {
    /// Create a new executor
    pub fn new(options: ExecutorOptions, hooks: Hooks) -> Self {
        Self { options, hooks }
    }

    /// Executor options
    pub fn options(&self) -> ExecutorOptions {
        self.options
    }

    /// Execute every layer of `plan`.
    ///
    /// Returns the full context (supplied inputs plus every task result). On
    /// failure no later layer is started and only the error is returned.
    #[instrument(skip_all, fields(layers = plan.len(), tasks = plan.task_count(), parallel = self.options.parallel))]
    pub async fn run(&self, plan: &ExecutionPlan, inputs: Inputs) -> Result<ResolveContext> {
        let start = Instant::now();
        let external: HashSet<String> = inputs.keys().cloned().collect();
        let mut context: ResolveContext = inputs;
        let mut states: HashMap<&str, TaskState> = plan
            .layers()
            .iter()
            .flatten()
            .map(|name| (name.as_str(), TaskState::Pending))
            .collect();

        self.hooks
            .log(|| format!("Resolving [{}]", plan.targets().join(", ")));

        for (layer_idx, layer) in plan.layers().iter().enumerate() {
            self.hooks.log(|| {
                let mut names: Vec<&str> = layer.iter().map(String::as_str).collect();
                names.sort_unstable();
                format!("  Run [{}]", names.join(", "))
            });
            debug!(layer = layer_idx, task_count = layer.len(), "dispatching layer");

            let mut jobs = Vec::with_capacity(layer.len());
            for name in layer {
                let node = plan
                    .graph()
                    .get(name)
                    .ok_or_else(|| ResolveError::TaskNotFound(name.clone()))?;
                let args = bind_arguments(&node.task, &context, &external)?;
                states.insert(name, TaskState::Ready);
                jobs.push(Job {
                    name: name.clone(),
                    task: node.task.clone(),
                    args,
                });
            }
            for name in layer {
                states.insert(name, TaskState::Running);
            }

            let outcomes = if self.options.parallel {
                self.run_parallel(jobs).await
            } else {
                self.run_sequential(jobs).await
            };

            let mut failure: Option<(String, TaskError)> = None;
            let mut finished: Vec<(String, TaskValue)> = Vec::with_capacity(layer.len());
            for (name, outcome) in layer.iter().zip(outcomes) {
                match outcome {
                    Some(Ok(value)) => {
                        states.insert(name, TaskState::Done);
                        finished.push((name.clone(), value));
                    }
                    Some(Err(source)) => {
                        states.insert(name, TaskState::Failed);
                        if failure.is_none() {
                            failure = Some((name.clone(), source));
                        }
                    }
                    None => {}
                }
            }

            if let Some((task, source)) = failure {
                let inputs = plan
                    .graph()
                    .get(&task)
                    .and_then(|node| bind_arguments(&node.task, &context, &external).ok())
                    .map(|args| args.to_sorted())
                    .unwrap_or_default();
                let pending = states
                    .values()
                    .filter(|s| **s == TaskState::Pending)
                    .count();
                warn!(
                    task = %task,
                    layer = layer_idx,
                    skipped = pending,
                    error = %source,
                    "task failed, not starting later layers"
                );
                return Err(ResolveError::TaskExecution {
                    task,
                    inputs,
                    source,
                });
            }

            context.extend(finished);
        }

        info!(
            tasks = plan.task_count(),
            duration_ms = start.elapsed().as_millis() as u64,
            "plan executed"
        );
        Ok(context)
    }

    /// Dispatch every job at once and wait for all of them.
    ///
    /// Outcomes are returned in job order; `None` marks a job aborted after a
    /// sibling failed.
    async fn run_parallel(&self, jobs: Vec<Job>) -> Vec<Option<TaskOutcome>> {
        let mut outcomes: Vec<Option<TaskOutcome>> = (0..jobs.len()).map(|_| None).collect();
        let mut slots: HashMap<Id, (usize, String)> = HashMap::with_capacity(jobs.len());
        let mut set = JoinSet::new();

        for (idx, job) in jobs.into_iter().enumerate() {
            let hooks = self.hooks.clone();
            let name = job.name.clone();
            let handle = set.spawn(async move { invoke(job, &hooks).await });
            slots.insert(handle.id(), (idx, name));
        }

        while let Some(joined) = set.join_next_with_id().await {
            let (id, outcome) = match joined {
                Ok((id, outcome)) => (id, outcome),
                Err(e) if e.is_cancelled() => continue,
                Err(e) => {
                    let name = slots.get(&e.id()).map(|(_, name)| name.as_str());
                    error!(task = ?name, error = %e, "task join failed");
                    (e.id(), Err(format!("task could not be joined: {}", e).into()))
                }
            };
            let Some((idx, _)) = slots.get(&id) else {
                continue;
            };
            if outcome.is_err() && self.options.cancel_on_failure && !set.is_empty() {
                debug!(remaining = set.len(), "aborting sibling tasks");
                set.abort_all();
            }
            outcomes[*idx] = Some(outcome);
        }

        outcomes
    }

    /// Run jobs one at a time, stopping at the first failure
    async fn run_sequential(&self, jobs: Vec<Job>) -> Vec<Option<TaskOutcome>> {
        let mut outcomes: Vec<Option<TaskOutcome>> = Vec::with_capacity(jobs.len());
        let mut failed = false;

        for job in jobs {
            if failed {
                outcomes.push(None);
                continue;
            }
            let outcome = invoke(job, &self.hooks).await;
            failed = outcome.is_err();
            outcomes.push(Some(outcome));
        }

        outcomes
    }
}

/// Build a task's arguments from the context.
///
/// Required inputs come from the context (task results or supplied inputs).
/// Defaulted parameters take a supplied input when there is one, otherwise
/// their default; they never receive another task's result.
fn bind_arguments(
    task: &TaskDescriptor,
    context: &ResolveContext,
    external: &HashSet<String>,
) -> Result<TaskArgs> {
    let mut args = TaskArgs::default();
    for param in task.params() {
        let value = match &param.default {
            None => context.get(&param.name).cloned().ok_or_else(|| {
                ResolveError::UnresolvedDependency {
                    input: param.name.clone(),
                    required_by: task.name().to_string(),
                }
            })?,
            Some(default) => external
                .contains(&param.name)
                .then(|| context.get(&param.name).cloned())
                .flatten()
                .unwrap_or_else(|| default.clone()),
        };
        args.insert(param.name.clone(), value);
    }
    Ok(args)
}

/// Aborts the wrapped task when dropped
struct AbortOnDrop(JoinHandle<TaskOutcome>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Run one task on its own tokio task, so a panic is reported as a failure
/// of that task, and report its duration to the timer hook.
async fn invoke(job: Job, hooks: &Hooks) -> TaskOutcome {
    let Job { name, task, args } = job;
    debug!(task = %name, "task started");

    let start = Instant::now();
    let mut handle = AbortOnDrop(tokio::spawn(async move { task.call(args).await }));
    let joined = (&mut handle.0).await;
    let end = Instant::now();
    hooks.record(&name, start, end);

    let outcome = match joined {
        Ok(outcome) => outcome,
        Err(e) if e.is_panic() => {
            error!(task = %name, "task panicked");
            Err(format!("task panicked: {}", e).into())
        }
        Err(e) => Err(format!("task was cancelled: {}", e).into()),
    };

    debug!(
        task = %name,
        ok = outcome.is_ok(),
        duration_ms = end.duration_since(start).as_millis() as u64,
        "task finished"
    );
    outcome
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use super::*;
    use crate::graph::{DependencyGraph, Target};
    use crate::store::TaskStore;
    use serde_json::json;

    fn plan(tasks: Vec<TaskDescriptor>, target: &str, inputs: &Inputs) -> ExecutionPlan {
        let mut store = TaskStore::default();
        store.register_many(tasks).unwrap();
        let external: HashSet<String> = inputs.keys().cloned().collect();
        let graph = DependencyGraph::build(&store, &[Target::from(target)], &external).unwrap();
        ExecutionPlan::from_graph(graph).unwrap()
    }

    fn sleeper(name: &str, ms: u64) -> TaskDescriptor {
        let value = name.to_string();
        TaskDescriptor::builder(name).run(move |_| {
            let value = value.clone();
            async move {
                tokio::time::sleep(Duration::from_millis(ms)).await;
                Ok(json!(value))
            }
        })
    }

    fn failing(name: &str, ms: u64) -> TaskDescriptor {
        TaskDescriptor::builder(name).run(move |_| async move {
            tokio::time::sleep(Duration::from_millis(ms)).await;
            Err("boom".into())
        })
    }

    fn recording_hooks() -> (Hooks, Arc<Mutex<Vec<(String, Instant, Instant)>>>) {
        let spans = Arc::new(Mutex::new(Vec::new()));
        let sink = spans.clone();
        let mut hooks = Hooks::default();
        hooks.set_timer(Some(Arc::new(move |name: &str, start: Instant, end: Instant| {
            sink.lock().unwrap().push((name.to_string(), start, end))
        })));
        (hooks, spans)
    }

    #[tokio::test]
    async fn test_context_contains_inputs_and_results() {
        let inputs: Inputs = [("param1".to_string(), json!(4))].into();
        let tasks = vec![
            TaskDescriptor::builder("calc1").run_sync(|_| Ok(json!(5))),
            TaskDescriptor::builder("go")
                .params(["calc1", "param1"])
                .run_sync(|args| {
                    let total = args.get_as::<i64>("calc1")? + args.get_as::<i64>("param1")?;
                    Ok(json!(total))
                }),
        ];
        let plan = plan(tasks, "go", &inputs);

        let context = Executor::default().run(&plan, inputs).await.unwrap();

        assert_eq!(context["param1"], json!(4));
        assert_eq!(context["calc1"], json!(5));
        assert_eq!(context["go"], json!(9));
    }

    #[tokio::test]
    async fn test_shared_dependency_runs_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let tasks = vec![
            TaskDescriptor::builder("base").run_sync(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(json!(1))
            }),
            TaskDescriptor::builder("left").param("base").run_sync(|_| Ok(json!(2))),
            TaskDescriptor::builder("right").param("base").run_sync(|_| Ok(json!(3))),
            TaskDescriptor::builder("top")
                .params(["left", "right", "base"])
                .run_sync(|_| Ok(json!(4))),
        ];
        let plan = plan(tasks, "top", &Inputs::new());

        Executor::default().run(&plan, Inputs::new()).await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_default_used_unless_supplied() {
        let tasks = vec![TaskDescriptor::builder("go")
            .param_with_default("x", json!(5))
            .run_sync(|args| Ok(args.require("x")?.clone()))];

        let plan_default = plan(tasks.clone(), "go", &Inputs::new());
        let context = Executor::default()
            .run(&plan_default, Inputs::new())
            .await
            .unwrap();
        assert_eq!(context["go"], json!(5));

        let inputs: Inputs = [("x".to_string(), json!(7))].into();
        let plan_override = plan(tasks, "go", &inputs);
        let context = Executor::default().run(&plan_override, inputs).await.unwrap();
        assert_eq!(context["go"], json!(7));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_parallel_layer_overlaps() {
        let (hooks, spans) = recording_hooks();
        let tasks = vec![
            sleeper("one", 100),
            sleeper("two", 100),
            TaskDescriptor::builder("both")
                .params(["one", "two"])
                .run_sync(|_| Ok(json!(null))),
        ];
        let plan = plan(tasks, "both", &Inputs::new());

        Executor::new(ExecutorOptions::default(), hooks)
            .run(&plan, Inputs::new())
            .await
            .unwrap();

        let spans = spans.lock().unwrap();
        let find = |n: &str| spans.iter().find(|(name, _, _)| name == n).cloned().unwrap();
        let (_, one_start, one_end) = find("one");
        let (_, two_start, two_end) = find("two");
        let (_, both_start, _) = find("both");
        assert!(one_start < two_end && two_start < one_end, "independent tasks overlap");
        assert!(one_end <= both_start && two_end <= both_start);
    }

    #[tokio::test]
    async fn test_sequential_layer_never_overlaps() {
        let (hooks, spans) = recording_hooks();
        let tasks = vec![
            sleeper("one", 30),
            sleeper("two", 30),
            TaskDescriptor::builder("both")
                .params(["one", "two"])
                .run_sync(|_| Ok(json!(null))),
        ];
        let plan = plan(tasks, "both", &Inputs::new());
        let options = ExecutorOptions {
            parallel: false,
            ..Default::default()
        };

        Executor::new(options, hooks)
            .run(&plan, Inputs::new())
            .await
            .unwrap();

        let spans = spans.lock().unwrap();
        let names: Vec<&str> = spans.iter().map(|(n, _, _)| n.as_str()).collect();
        assert_eq!(names, ["one", "two", "both"]);
        for pair in spans.windows(2) {
            assert!(pair[0].2 <= pair[1].1, "{} overlaps {}", pair[0].0, pair[1].0);
        }
    }

    #[tokio::test]
    async fn test_failure_stops_later_layers_and_lets_siblings_finish() {
        let finished = Arc::new(AtomicUsize::new(0));
        let later_ran = Arc::new(AtomicUsize::new(0));
        let sibling_counter = finished.clone();
        let later_counter = later_ran.clone();
        let tasks = vec![
            failing("bad", 5),
            TaskDescriptor::builder("slow").run(move |_| {
                let counter = sibling_counter.clone();
                async move {
                    tokio::time::sleep(Duration::from_millis(40)).await;
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(json!(1))
                }
            }),
            TaskDescriptor::builder("after")
                .params(["bad", "slow"])
                .run_sync(move |_| {
                    later_counter.fetch_add(1, Ordering::SeqCst);
                    Ok(json!(null))
                }),
        ];
        let plan = plan(tasks, "after", &Inputs::new());

        let err = Executor::default()
            .run(&plan, Inputs::new())
            .await
            .unwrap_err();

        assert_eq!(err.failed_task(), Some("bad"));
        assert_eq!(finished.load(Ordering::SeqCst), 1, "sibling ran to completion");
        assert_eq!(later_ran.load(Ordering::SeqCst), 0, "later layer never started");
    }

    #[tokio::test]
    async fn test_cancel_on_failure_aborts_siblings() {
        let finished = Arc::new(AtomicUsize::new(0));
        let counter = finished.clone();
        let tasks = vec![
            failing("bad", 5),
            TaskDescriptor::builder("slow").run(move |_| {
                let counter = counter.clone();
                async move {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(json!(1))
                }
            }),
            TaskDescriptor::builder("after")
                .params(["bad", "slow"])
                .run_sync(|_| Ok(json!(null))),
        ];
        let plan = plan(tasks, "after", &Inputs::new());
        let options = ExecutorOptions {
            cancel_on_failure: true,
            ..Default::default()
        };

        let started = Instant::now();
        let err = Executor::new(options, Hooks::default())
            .run(&plan, Inputs::new())
            .await
            .unwrap_err();

        assert_eq!(err.failed_task(), Some("bad"));
        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(finished.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_timer_fires_for_failed_task() {
        let (hooks, spans) = recording_hooks();
        let plan = plan(vec![failing("bad", 1)], "bad", &Inputs::new());

        let result = Executor::new(ExecutorOptions::default(), hooks)
            .run(&plan, Inputs::new())
            .await;

        assert!(result.is_err());
        assert_eq!(spans.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_execution_error_carries_inputs() {
        let inputs: Inputs = [("param1".to_string(), json!("A"))].into();
        let tasks = vec![TaskDescriptor::builder("fetch")
            .param("param1")
            .run_sync(|_| Err("unreachable host".into()))];
        let plan = plan(tasks, "fetch", &inputs);

        let err = Executor::default().run(&plan, inputs).await.unwrap_err();

        match err {
            ResolveError::TaskExecution {
                task,
                inputs,
                source,
            } => {
                assert_eq!(task, "fetch");
                assert_eq!(inputs.get("param1"), Some(&json!("A")));
                assert_eq!(source.to_string(), "unreachable host");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_panicking_task_is_reported() {
        let tasks = vec![TaskDescriptor::builder("explode").run_sync(|_| panic!("kaboom"))];
        let plan = plan(tasks, "explode", &Inputs::new());

        let err = Executor::default()
            .run(&plan, Inputs::new())
            .await
            .unwrap_err();

        assert_eq!(err.failed_task(), Some("explode"));
        assert!(err.to_string().contains("panicked"));
    }

    #[tokio::test]
    async fn test_panicking_timer_does_not_change_outcome() {
        let tasks = vec![
            TaskDescriptor::builder("a").run_sync(|_| Ok(json!(1))),
            TaskDescriptor::builder("go")
                .param("a")
                .run_sync(|args| Ok(json!(args.get_as::<i64>("a")? + 1))),
        ];
        let plan = plan(tasks, "go", &Inputs::new());
        let mut hooks = Hooks::default();
        hooks.set_timer(Some(Arc::new(|name: &str, _: Instant, _: Instant| {
            if name == "a" {
                panic!("timer hook failure");
            }
        })));

        for parallel in [true, false] {
            let executor = Executor::new(
                ExecutorOptions {
                    parallel,
                    cancel_on_failure: false,
                },
                hooks.clone(),
            );

            let context = executor.run(&plan, Inputs::new()).await.unwrap();

            assert_eq!(context["a"], json!(1), "parallel = {parallel}");
            assert_eq!(context["go"], json!(2), "parallel = {parallel}");
        }
    }

    #[tokio::test]
    async fn test_sequential_stops_at_first_failure() {
        let ran = Arc::new(AtomicUsize::new(0));
        let counter = ran.clone();
        let tasks = vec![
            failing("first", 1),
            TaskDescriptor::builder("second").run_sync(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(json!(null))
            }),
            TaskDescriptor::builder("top")
                .params(["first", "second"])
                .run_sync(|_| Ok(json!(null))),
        ];
        let plan = plan(tasks, "top", &Inputs::new());
        let options = ExecutorOptions {
            parallel: false,
            ..Default::default()
        };

        let err = Executor::new(options, Hooks::default())
            .run(&plan, Inputs::new())
            .await
            .unwrap_err();

        assert_eq!(err.failed_task(), Some("first"));
        assert_eq!(ran.load(Ordering::SeqCst), 0);
    }
}
