//! Instrumentation hooks
//!
//! Hooks only observe a resolve call. They receive data from the executor and
//! never influence which tasks run or in what order.

use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;

use tracing::error;

/// Receives the observed duration of every executed task
pub trait TaskTimer: Send + Sync {
    /// Called once per task, right after it finished (successfully or not)
    fn record(&self, name: &str, start: Instant, end: Instant);
}

impl<F> TaskTimer for F
where
    F: Fn(&str, Instant, Instant) + Send + Sync,
{
    fn record(&self, name: &str, start: Instant, end: Instant) {
        self(name, start, end)
    }
}

/// Receives human-readable plan and progress messages
pub trait PlanLogger: Send + Sync {
    /// Handle one message
    fn log(&self, message: &str);
}

impl<F> PlanLogger for F
where
    F: Fn(&str) + Send + Sync,
{
    fn log(&self, message: &str) {
        self(message)
    }
}

/// Logger that forwards plan messages to tracing
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingLogger;

impl PlanLogger for TracingLogger {
    fn log(&self, message: &str) {
        tracing::info!(target: "taskwire::plan", "{}", message.trim_start());
    }
}

/// The hooks configured on a registry
#[derive(Clone, Default)]
pub struct Hooks {
    timer: Option<Arc<dyn TaskTimer>>,
    log: Option<Arc<dyn PlanLogger>>,
}

impl Hooks {
    /// Set the timer hook
    pub fn set_timer(&mut self, timer: Option<Arc<dyn TaskTimer>>) {
        self.timer = timer;
    }

    /// Set the log hook
    pub fn set_log(&mut self, log: Option<Arc<dyn PlanLogger>>) {
        self.log = log;
    }

    /// Send a message to the log hook; the message is only built when one is set.
    ///
    /// A panicking hook is logged and otherwise ignored.
    pub fn log(&self, message: impl FnOnce() -> String) {
        if let Some(log) = &self.log {
            let message = message();
            if catch_unwind(AssertUnwindSafe(|| log.log(&message))).is_err() {
                error!(message = %message, "log hook panicked");
            }
        }
    }

    /// Report a task's duration to the timer hook.
    ///
    /// A panicking hook is logged and otherwise ignored.
    pub fn record(&self, name: &str, start: Instant, end: Instant) {
        if let Some(timer) = &self.timer {
            if catch_unwind(AssertUnwindSafe(|| timer.record(name, start, end))).is_err() {
                error!(task = name, "timer hook panicked");
            }
        }
    }
}

impl fmt::Debug for Hooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hooks")
            .field("timer", &self.timer.is_some())
            .field("log", &self.log.is_some())
            .finish()
    }
}
