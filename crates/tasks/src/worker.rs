//! Execution unit that runs exactly one [`WrappedTask`].
//!
//! A [`Worker`] is consumed by [`Worker::run`], so it cannot be reused for a
//! second task. The controller keeps only the lightweight [`WorkerHandle`]
//! to count running workers by priority.

use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::thread;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, error, warn};

use crate::completed::CompletedTask;
use crate::error::TaskControlError;
use crate::metrics::ControllerMetrics;
use crate::report::ErrorReporter;
use crate::task::{Task, TaskPriority, TaskStatus};
use crate::wrapped::WrappedTask;

/// Message reported when a task ends in Error without saying why.
pub const UNSPECIFIED_ERROR: &str = "Unspecified error";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct WorkerId(u64);

impl WorkerId {
    pub(crate) fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "worker-{}", self.0)
    }
}

/// Bookkeeping side of a worker, shared with the controller.
#[derive(Debug)]
pub struct WorkerHandle {
    id: WorkerId,
    wrapped: Arc<WrappedTask>,
    finished: AtomicBool,
    started_at: Instant,
}

impl WorkerHandle {
    pub fn id(&self) -> WorkerId {
        self.id
    }

    pub fn wrapped(&self) -> &Arc<WrappedTask> {
        &self.wrapped
    }

    /// Scheduling priority of the worker thread. Always the current
    /// priority of its task, so a re-prioritization applies to the cap
    /// accounting on the next dispatch cycle.
    pub fn priority(&self) -> TaskPriority {
        self.wrapped.priority()
    }

    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }

    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }
}

pub struct Worker {
    handle: Arc<WorkerHandle>,
    task: Arc<dyn Task>,
    reporter: Arc<dyn ErrorReporter>,
    metrics: Arc<RwLock<ControllerMetrics>>,
}

impl fmt::Debug for Worker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Worker").field("handle", &self.handle).finish()
    }
}

impl Worker {
    /// Build a worker for `wrapped`. Returns `None` if the task was already
    /// replaced by its completion summary.
    pub fn new(
        id: WorkerId,
        wrapped: Arc<WrappedTask>,
        reporter: Arc<dyn ErrorReporter>,
        metrics: Arc<RwLock<ControllerMetrics>>,
    ) -> Option<Self> {
        let task = wrapped.actual_task()?;
        Some(Self {
            handle: Arc::new(WorkerHandle {
                id,
                wrapped,
                finished: AtomicBool::new(false),
                started_at: Instant::now(),
            }),
            task,
            reporter,
            metrics,
        })
    }

    pub fn handle(&self) -> Arc<WorkerHandle> {
        Arc::clone(&self.handle)
    }

    /// Run the worker on its own named thread. The thread is detached: the
    /// controller tracks completion through the handle.
    pub fn spawn(self) -> Result<Arc<WorkerHandle>, TaskControlError> {
        let handle = self.handle();
        thread::Builder::new()
            .name(format!("specflow-{}", handle.id))
            .spawn(move || self.run())
            .map_err(|e| TaskControlError::Spawn(handle.id.to_string(), e))?;
        Ok(handle)
    }

    /// Run the task once, report its failure if any, and swap it for a
    /// [`CompletedTask`] in its wrapper.
    pub fn run(self) {
        let Worker {
            handle,
            task,
            reporter,
            metrics,
        } = self;

        let description = task.description();
        debug!(worker = %handle.id, task = %description, "worker started");

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| task.run()));

        let summary = match outcome {
            Ok(()) => {
                settle_status(task.as_ref(), &description);
                let summary = CompletedTask::capture(task.as_ref());
                if summary.status() == TaskStatus::Error {
                    let message = summary.error_message().unwrap_or(UNSPECIFIED_ERROR);
                    warn!(worker = %handle.id, task = %description, error = %message, "task failed");
                    reporter.report(&description, message);
                }
                summary
            }
            Err(payload) => {
                let message = format!(
                    "Unhandled exception in task {}: {}",
                    description,
                    panic_message(payload.as_ref())
                );
                error!(worker = %handle.id, task = %description, "{}", message);
                task.state().error(message.clone());
                reporter.report(&description, &message);

                // A task already canceled (or finished) before panicking
                // keeps that status; `error` refuses to overwrite it.
                let status = task.status();
                let error_message = match status {
                    TaskStatus::Error => task.error_message().or(Some(message)),
                    _ => task.error_message(),
                };
                CompletedTask::new(
                    description.clone(),
                    status,
                    task.finished_percentage(),
                    error_message,
                )
            }
        };

        let status = summary.status();
        handle.wrapped.complete(summary);
        drop(task);

        if let Ok(mut m) = metrics.write() {
            m.record_completion(status, handle.elapsed());
        }
        debug!(worker = %handle.id, task = %description, %status, "worker finished");
        handle.finished.store(true, Ordering::Release);
    }
}

/// A task that returns while still Waiting/Processing is closed out here so
/// its queue generation can drain.
fn settle_status(task: &dyn Task, description: &str) {
    if task.status().is_terminal() {
        return;
    }
    let settled = if task.is_canceled() {
        TaskStatus::Canceled
    } else {
        TaskStatus::Finished
    };
    debug!(task = %description, status = %settled, "task returned without a terminal status");
    task.state().set_status(settled);
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
