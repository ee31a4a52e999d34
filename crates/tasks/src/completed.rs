use serde::Serialize;

use crate::task::{Task, TaskStatus};

/// Terminal-state summary that replaces a finished task inside its
/// [`crate::WrappedTask`].
///
/// Holding only these four fields lets the task itself, and whatever
/// spectra or feature lists it owns, be dropped as soon as it stops running
/// while the queue keeps showing what happened.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompletedTask {
    description: String,
    status: TaskStatus,
    progress: f64,
    error_message: Option<String>,
}

impl CompletedTask {
    /// Snapshot `task` as it is now.
    pub fn capture(task: &dyn Task) -> Self {
        Self {
            description: task.description(),
            status: task.status(),
            progress: task.finished_percentage(),
            error_message: task.error_message(),
        }
    }

    /// Build a summary with explicit values. Used when the task's own
    /// state cannot be trusted, e.g. after it panicked.
    pub fn new(
        description: String,
        status: TaskStatus,
        progress: f64,
        error_message: Option<String>,
    ) -> Self {
        Self {
            description,
            status,
            progress,
            error_message,
        }
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn status(&self) -> TaskStatus {
        self.status
    }

    pub fn progress(&self) -> f64 {
        self.progress
    }

    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }
}
