use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use serde::{Deserialize, Serialize};

/// Lifecycle of a task. `Waiting -> Processing -> {Finished | Error | Canceled}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskStatus {
    Waiting,
    Processing,
    Finished,
    Error,
    Canceled,
}

impl TaskStatus {
    /// Waiting or Processing: the task still counts against queue drain.
    pub fn is_active(self) -> bool {
        matches!(self, TaskStatus::Waiting | TaskStatus::Processing)
    }

    /// Finished, Error or Canceled. Terminal states are irreversible.
    pub fn is_terminal(self) -> bool {
        !self.is_active()
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskStatus::Waiting => "waiting",
            TaskStatus::Processing => "processing",
            TaskStatus::Finished => "finished",
            TaskStatus::Error => "error",
            TaskStatus::Canceled => "canceled",
        };
        f.write_str(s)
    }
}

/// Scheduling priority. High bypasses the concurrency cap.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TaskPriority {
    #[default]
    Normal,
    High,
}

/// Callback invoked with `(new, old)` after every accepted status change.
pub type StatusListener = Arc<dyn Fn(TaskStatus, TaskStatus) + Send + Sync>;

#[derive(Debug)]
struct StateInner {
    status: TaskStatus,
    error_message: Option<String>,
}

/// Status, error slot and cancellation flag shared by every [`Task`].
///
/// Task implementations embed one of these and return it from
/// [`Task::state`]. All transitions out of a terminal status are refused,
/// so a late `set_status(Finished)` from a canceled task is a no-op.
pub struct TaskState {
    inner: Mutex<StateInner>,
    canceled: AtomicBool,
    listeners: RwLock<Vec<StatusListener>>,
}

impl Default for TaskState {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        f.debug_struct("TaskState")
            .field("status", &inner.status)
            .field("error_message", &inner.error_message)
            .field("canceled", &self.canceled.load(Ordering::Relaxed))
            .finish()
    }
}

impl TaskState {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(StateInner {
                status: TaskStatus::Waiting,
                error_message: None,
            }),
            canceled: AtomicBool::new(false),
            listeners: RwLock::new(Vec::new()),
        }
    }

    pub fn status(&self) -> TaskStatus {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner).status
    }

    pub fn error_message(&self) -> Option<String> {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .error_message
            .clone()
    }

    /// Move to `status`. Returns `false` if the current status is terminal,
    /// already equal to `status`, or `status` is [`TaskStatus::Waiting`].
    pub fn set_status(&self, status: TaskStatus) -> bool {
        self.transition(status, None)
    }

    /// Record `message` and move to [`TaskStatus::Error`].
    pub fn error(&self, message: impl Into<String>) -> bool {
        self.transition(TaskStatus::Error, Some(message.into()))
    }

    /// Raise the cancellation flag and move to [`TaskStatus::Canceled`]
    /// unless the task already reached a terminal status.
    pub fn cancel(&self) {
        self.canceled.store(true, Ordering::Release);
        self.transition(TaskStatus::Canceled, None);
    }

    /// Cooperative cancellation flag, polled by task bodies at safe points.
    pub fn is_canceled(&self) -> bool {
        self.canceled.load(Ordering::Acquire)
    }

    pub fn add_status_listener<F>(&self, listener: F)
    where
        F: Fn(TaskStatus, TaskStatus) + Send + Sync + 'static,
    {
        self.listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::new(listener));
    }

    fn transition(&self, status: TaskStatus, message: Option<String>) -> bool {
        let old = {
            let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
            // Nothing moves back to Waiting once it has left it.
            if inner.status.is_terminal()
                || inner.status == status
                || status == TaskStatus::Waiting
            {
                return false;
            }
            if message.is_some() {
                inner.error_message = message;
            }
            std::mem::replace(&mut inner.status, status)
        };

        // Listeners run outside the state lock so they may read the task.
        let listeners: Vec<StatusListener> = self
            .listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for listener in listeners {
            listener(status, old);
        }
        true
    }
}

/// A cancellable, progress-reporting unit of work.
///
/// The controller treats implementations as opaque: it only calls
/// [`Task::run`] once on a worker thread and reads the status, progress
/// and description for bookkeeping and display. Implementations are
/// expected to poll [`Task::is_canceled`], set `Processing` when they
/// start, and finish in a terminal status, catching their own failures
/// via [`TaskState::error`].
pub trait Task: Send + Sync {
    /// Human-readable description for display and error reports.
    fn description(&self) -> String;

    /// Execute the task body. Called at most once by the controller.
    fn run(&self);

    fn state(&self) -> &TaskState;

    /// Fraction of work done, in `0.0..=1.0`.
    fn finished_percentage(&self) -> f64 {
        0.0
    }

    /// Priority used by [`crate::TaskController::add_task`].
    fn default_priority(&self) -> TaskPriority {
        TaskPriority::Normal
    }

    fn status(&self) -> TaskStatus {
        self.state().status()
    }

    fn error_message(&self) -> Option<String> {
        self.state().error_message()
    }

    fn cancel(&self) {
        self.state().cancel();
    }

    fn is_canceled(&self) -> bool {
        self.state().is_canceled()
    }
}
