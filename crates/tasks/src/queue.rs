//! Ordered collection of [`WrappedTask`]s for one queue generation.
//!
//! Every operation takes the single queue-wide lock, so submissions from
//! any thread can interleave with the dispatch loop. The loop itself never
//! iterates the live vector: it works on [`TaskQueue::snapshot`] copies.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::wrapped::{TaskRow, WrappedTask};

const INITIAL_CAPACITY: usize = 64;

#[derive(Debug)]
pub struct TaskQueue {
    tasks: Mutex<Vec<Arc<WrappedTask>>>,
}

impl Default for TaskQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskQueue {
    pub fn new() -> Self {
        Self {
            tasks: Mutex::new(Vec::with_capacity(INITIAL_CAPACITY)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Arc<WrappedTask>>> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append one task. Storage grows by doubling; there is no upper bound.
    pub fn enqueue(&self, task: Arc<WrappedTask>) {
        self.lock().push(task);
    }

    /// Append several tasks under one lock acquisition, preserving order.
    pub fn enqueue_all(&self, tasks: impl IntoIterator<Item = Arc<WrappedTask>>) {
        self.lock().extend(tasks);
    }

    /// Shallow copy of the queue at call time, in insertion order.
    pub fn snapshot(&self) -> Vec<Arc<WrappedTask>> {
        self.lock().clone()
    }

    pub fn rows(&self) -> Vec<TaskRow> {
        self.snapshot().iter().map(|t| t.row()).collect()
    }

    /// Number of tasks whose status is Waiting or Processing.
    pub fn count_active(&self) -> usize {
        self.lock().iter().filter(|t| t.status().is_active()).count()
    }

    /// True when no task is active. An empty queue trivially qualifies.
    pub fn all_finished(&self) -> bool {
        self.lock().iter().all(|t| t.status().is_terminal())
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Drop every entry, but only if all of them are terminal. Returns the
    /// number of entries removed, or `None` if some task is still active.
    ///
    /// The check and the clear happen under one lock so a task submitted
    /// concurrently can never be discarded.
    pub fn clear_if_finished(&self) -> Option<usize> {
        let mut tasks = self.lock();
        if !tasks.iter().all(|t| t.status().is_terminal()) {
            return None;
        }
        let removed = tasks.len();
        *tasks = Vec::with_capacity(INITIAL_CAPACITY);
        Some(removed)
    }

    /// Find the wrapper still holding the task at `ptr`.
    pub(crate) fn find(&self, ptr: *const ()) -> Option<Arc<WrappedTask>> {
        self.lock().iter().find(|t| t.holds(ptr)).cloned()
    }
}
