use std::sync::{Arc, PoisonError};

use tracing::{debug, error, info};

use crate::task::{TaskPriority, TaskStatus};
use crate::worker::{Worker, WorkerHandle};
use crate::wrapped::WrappedTask;

use super::core::Shared;
use super::TaskController;

/// What a single dispatch cycle did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// The queue is empty; nothing to dispatch.
    Idle,
    /// Every task was terminal; this many entries were cleared.
    Drained(usize),
    /// The queue has live tasks; this many workers were started.
    Dispatched(usize),
}

impl Shared {
    /// One pass of the dispatch loop.
    ///
    /// Cycles are serialized by `dispatch_lock`, so a caller driving
    /// [`TaskController::dispatch_cycle`] next to the dispatch thread cannot
    /// run a second admission pass with its own Normal count. The queue
    /// lock and the worker-set lock are never held together: admission
    /// works on a queue snapshot and touches the worker set only before and
    /// after walking it.
    pub(super) fn dispatch_cycle(&self) -> CycleOutcome {
        let _cycle = self.dispatch_lock.lock().unwrap_or_else(PoisonError::into_inner);

        self.notify_if_active_changed();
        self.reap_finished_workers();

        if self.queue.is_empty() {
            return CycleOutcome::Idle;
        }

        if let Some(removed) = self.queue.clear_if_finished() {
            info!(tasks = removed, "queue generation drained and cleared");
            if let Ok(mut m) = self.metrics.write() {
                m.generations_cleared += 1;
            }
            self.refresh_listeners(&[]);
            return CycleOutcome::Drained(removed);
        }

        let max_normal = self
            .config
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .resolved_max_concurrent_tasks();

        let snapshot = self.queue.snapshot();
        let started = self.start_workers(&snapshot, max_normal);

        let rows: Vec<_> = snapshot.iter().map(|t| t.row()).collect();
        self.refresh_listeners(&rows);

        CycleOutcome::Dispatched(started)
    }

    /// Push the active count to listeners if it moved since the last push.
    fn notify_if_active_changed(&self) {
        let active = self.queue.count_active();
        {
            let mut last = self.last_active.lock().unwrap_or_else(PoisonError::into_inner);
            if *last == active {
                return;
            }
            *last = active;
        }
        debug!(active, "active task count changed");
        for listener in self.listeners() {
            listener.on_active_count_changed(active);
        }
    }

    fn reap_finished_workers(&self) {
        let mut workers = self.workers.lock().unwrap_or_else(PoisonError::into_inner);
        workers.retain(|w| !w.is_finished());
        let running = workers.len();
        drop(workers);

        if let Ok(mut m) = self.metrics.write() {
            m.running_workers = running;
        }
    }

    /// Start a worker for every idle Waiting task that may run now: High
    /// priority always, Normal only while the running Normal workers are
    /// below `max_normal`.
    fn start_workers(&self, snapshot: &[Arc<WrappedTask>], max_normal: usize) -> usize {
        let mut running_normal = self
            .workers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|w| !w.is_finished() && w.priority() == TaskPriority::Normal)
            .count();

        let mut started: Vec<Arc<WorkerHandle>> = Vec::new();

        for wrapped in snapshot {
            if wrapped.is_assigned() || wrapped.status() != TaskStatus::Waiting {
                continue;
            }

            let priority = wrapped.priority();
            if priority == TaskPriority::Normal && running_normal >= max_normal {
                continue;
            }

            let id = self.next_worker_id();
            if !wrapped.try_assign(id) {
                continue;
            }
            let Some(worker) = Worker::new(
                id,
                Arc::clone(wrapped),
                Arc::clone(&self.reporter),
                Arc::clone(&self.metrics),
            ) else {
                wrapped.release(id);
                continue;
            };

            match worker.spawn() {
                Ok(handle) => {
                    debug!(worker = %id, task = %wrapped.description(), ?priority, "worker started");
                    if priority == TaskPriority::Normal {
                        running_normal += 1;
                    }
                    started.push(handle);
                }
                Err(e) => {
                    error!(error = %e, task = %wrapped.description(), "failed to start worker");
                    wrapped.release(id);
                }
            }
        }

        let count = started.len();
        if count > 0 {
            let mut workers = self.workers.lock().unwrap_or_else(PoisonError::into_inner);
            workers.extend(started);
            let running = workers.len();
            drop(workers);

            if let Ok(mut m) = self.metrics.write() {
                m.workers_started += count as u64;
                m.running_workers = running;
            }
        }
        count
    }
}

impl TaskController {
    /// Run one dispatch cycle on the calling thread.
    ///
    /// The dispatch thread calls this every tick; it is public so embedders
    /// without a dispatch thread (and tests) can drive the controller
    /// deterministically. Concurrent calls, including the dispatch thread's,
    /// run one at a time. Must not be called from a [`QueueListener`]
    /// callback.
    ///
    /// [`QueueListener`]: crate::QueueListener
    pub fn dispatch_cycle(&self) -> CycleOutcome {
        self.shared.dispatch_cycle()
    }
}
