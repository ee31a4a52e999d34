use std::fmt;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::completed::CompletedTask;
use crate::task::{Task, TaskPriority, TaskStatus};
use crate::worker::WorkerId;

/// What a [`WrappedTask`] currently points at.
enum TaskSlot {
    Live(Arc<dyn Task>),
    Completed(CompletedTask),
}

/// A submitted task plus its scheduling metadata.
///
/// Created by the controller on submission and kept in the queue until
/// the whole generation drains. Once its worker is done, the live task
/// reference is swapped for a [`CompletedTask`].
pub struct WrappedTask {
    id: Uuid,
    submitted_at: DateTime<Utc>,
    priority: RwLock<TaskPriority>,
    worker: Mutex<Option<WorkerId>>,
    slot: RwLock<TaskSlot>,
}

impl fmt::Debug for WrappedTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WrappedTask")
            .field("id", &self.id)
            .field("description", &self.description())
            .field("status", &self.status())
            .field("priority", &self.priority())
            .field("worker", &self.assigned_worker())
            .finish()
    }
}

/// One display row of the queue.
#[derive(Debug, Clone, Serialize)]
pub struct TaskRow {
    pub id: Uuid,
    pub description: String,
    pub status: TaskStatus,
    pub priority: TaskPriority,
    pub progress: f64,
    pub error_message: Option<String>,
    pub submitted_at: DateTime<Utc>,
}

impl WrappedTask {
    pub fn new(task: Arc<dyn Task>, priority: TaskPriority) -> Self {
        Self {
            id: Uuid::new_v4(),
            submitted_at: Utc::now(),
            priority: RwLock::new(priority),
            worker: Mutex::new(None),
            slot: RwLock::new(TaskSlot::Live(task)),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn submitted_at(&self) -> DateTime<Utc> {
        self.submitted_at
    }

    pub fn priority(&self) -> TaskPriority {
        *self.priority.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns the previous priority.
    pub(crate) fn set_priority(&self, priority: TaskPriority) -> TaskPriority {
        let mut guard = self.priority.write().unwrap_or_else(PoisonError::into_inner);
        std::mem::replace(&mut *guard, priority)
    }

    pub fn assigned_worker(&self) -> Option<WorkerId> {
        *self.worker.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_assigned(&self) -> bool {
        self.assigned_worker().is_some()
    }

    /// Bind to `worker` if no worker has been bound yet.
    pub(crate) fn try_assign(&self, worker: WorkerId) -> bool {
        let mut guard = self.worker.lock().unwrap_or_else(PoisonError::into_inner);
        if guard.is_some() {
            return false;
        }
        *guard = Some(worker);
        true
    }

    /// Undo an assignment whose worker never started.
    pub(crate) fn release(&self, worker: WorkerId) {
        let mut guard = self.worker.lock().unwrap_or_else(PoisonError::into_inner);
        if *guard == Some(worker) {
            *guard = None;
        }
    }

    /// The live task, or `None` once it has been replaced by its summary.
    pub fn actual_task(&self) -> Option<Arc<dyn Task>> {
        match &*self.slot.read().unwrap_or_else(PoisonError::into_inner) {
            TaskSlot::Live(task) => Some(Arc::clone(task)),
            TaskSlot::Completed(_) => None,
        }
    }

    pub fn completed(&self) -> Option<CompletedTask> {
        match &*self.slot.read().unwrap_or_else(PoisonError::into_inner) {
            TaskSlot::Live(_) => None,
            TaskSlot::Completed(summary) => Some(summary.clone()),
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(
            &*self.slot.read().unwrap_or_else(PoisonError::into_inner),
            TaskSlot::Completed(_)
        )
    }

    /// Replace the live task with `summary`, dropping this wrapper's
    /// reference to it.
    pub(crate) fn complete(&self, summary: CompletedTask) {
        let previous = {
            let mut slot = self.slot.write().unwrap_or_else(PoisonError::into_inner);
            std::mem::replace(&mut *slot, TaskSlot::Completed(summary))
        };
        drop(previous);
    }

    /// Whether this wrapper still holds the task at `ptr`.
    pub(crate) fn holds(&self, ptr: *const ()) -> bool {
        match &*self.slot.read().unwrap_or_else(PoisonError::into_inner) {
            TaskSlot::Live(task) => Arc::as_ptr(task) as *const () == ptr,
            TaskSlot::Completed(_) => false,
        }
    }

    pub fn description(&self) -> String {
        match &*self.slot.read().unwrap_or_else(PoisonError::into_inner) {
            TaskSlot::Live(task) => task.description(),
            TaskSlot::Completed(summary) => summary.description().to_string(),
        }
    }

    pub fn status(&self) -> TaskStatus {
        match &*self.slot.read().unwrap_or_else(PoisonError::into_inner) {
            TaskSlot::Live(task) => task.status(),
            TaskSlot::Completed(summary) => summary.status(),
        }
    }

    pub fn finished_percentage(&self) -> f64 {
        match &*self.slot.read().unwrap_or_else(PoisonError::into_inner) {
            TaskSlot::Live(task) => task.finished_percentage(),
            TaskSlot::Completed(summary) => summary.progress(),
        }
    }

    pub fn error_message(&self) -> Option<String> {
        match &*self.slot.read().unwrap_or_else(PoisonError::into_inner) {
            TaskSlot::Live(task) => task.error_message(),
            TaskSlot::Completed(summary) => summary.error_message().map(str::to_string),
        }
    }

    pub fn row(&self) -> TaskRow {
        TaskRow {
            id: self.id,
            description: self.description(),
            status: self.status(),
            priority: self.priority(),
            progress: self.finished_percentage(),
            error_message: self.error_message(),
            submitted_at: self.submitted_at,
        }
    }
}

/// Pointer identity of a task, ignoring the vtable half of a fat pointer.
pub(crate) fn task_ptr<T: Task + ?Sized>(task: &Arc<T>) -> *const () {
    Arc::as_ptr(task) as *const ()
}
