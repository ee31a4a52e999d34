use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError, RwLock};
use std::thread::JoinHandle;

use specflow_core::TaskSettings;
use tracing::{debug, info};

use crate::config::TaskControllerConfig;
use crate::error::TaskControlError;
use crate::listener::QueueListener;
use crate::metrics::ControllerMetrics;
use crate::queue::TaskQueue;
use crate::report::{ErrorReporter, LogErrorReporter};
use crate::task::{Task, TaskPriority};
use crate::worker::{Worker, WorkerHandle, WorkerId};
use crate::wrapped::{task_ptr, TaskRow, WrappedTask};

/// State shared between the controller handle and its dispatch thread.
pub(super) struct Shared {
    pub(super) config: RwLock<TaskControllerConfig>,
    pub(super) queue: TaskQueue,
    /// Workers started by the dispatch loop and not yet reaped.
    pub(super) workers: Mutex<Vec<Arc<WorkerHandle>>>,
    pub(super) listeners: RwLock<Vec<Arc<dyn QueueListener>>>,
    pub(super) reporter: Arc<dyn ErrorReporter>,
    pub(super) metrics: Arc<RwLock<ControllerMetrics>>,
    /// Set by submissions, consumed by the idle wait.
    pub(super) wake_pending: Mutex<bool>,
    pub(super) wake: Condvar,
    pub(super) shutdown: AtomicBool,
    /// Active count last pushed to listeners.
    pub(super) last_active: Mutex<usize>,
    /// Held for the whole of one dispatch cycle.
    pub(super) dispatch_lock: Mutex<()>,
    pub(super) next_worker_id: AtomicU64,
}

impl Shared {
    pub(super) fn next_worker_id(&self) -> WorkerId {
        WorkerId::new(self.next_worker_id.fetch_add(1, Ordering::Relaxed))
    }

    pub(super) fn wake(&self) {
        let mut pending = self.wake_pending.lock().unwrap_or_else(PoisonError::into_inner);
        *pending = true;
        self.wake.notify_all();
    }

    pub(super) fn listeners(&self) -> Vec<Arc<dyn QueueListener>> {
        self.listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(super) fn refresh_listeners(&self, rows: &[TaskRow]) {
        for listener in self.listeners() {
            listener.on_refresh(rows);
        }
    }
}

/// The scheduler: accepts tasks, bounds how many normal-priority tasks run
/// at once, and keeps a display model of the current queue generation.
///
/// One instance is meant to be constructed per process and shared by
/// reference with every module that submits work. The dispatch loop runs
/// on its own thread between [`TaskController::start`] and
/// [`TaskController::shutdown`]; tasks submitted before `start` wait in the
/// queue.
pub struct TaskController {
    pub(super) shared: Arc<Shared>,
    pub(super) dispatcher: Mutex<Option<JoinHandle<()>>>,
}

impl TaskController {
    /// Create an idle controller with the given config and error sink.
    pub fn new(config: TaskControllerConfig, reporter: Arc<dyn ErrorReporter>) -> Self {
        Self {
            shared: Arc::new(Shared {
                config: RwLock::new(config),
                queue: TaskQueue::new(),
                workers: Mutex::new(Vec::new()),
                listeners: RwLock::new(Vec::new()),
                reporter,
                metrics: Arc::new(RwLock::new(ControllerMetrics::default())),
                wake_pending: Mutex::new(false),
                wake: Condvar::new(),
                shutdown: AtomicBool::new(false),
                last_active: Mutex::new(0),
                dispatch_lock: Mutex::new(()),
                next_worker_id: AtomicU64::new(1),
            }),
            dispatcher: Mutex::new(None),
        }
    }

    /// Validate `settings` (as loaded by `specflow_core::Config`) and build an
    /// idle controller from them.
    pub fn from_settings(
        settings: &TaskSettings,
        reporter: Arc<dyn ErrorReporter>,
    ) -> Result<Self, TaskControlError> {
        settings.validate()?;
        Ok(Self::new(TaskControllerConfig::from(settings), reporter))
    }

    /// Create a controller that reports task failures to the log.
    pub fn with_config(config: TaskControllerConfig) -> Self {
        Self::new(config, Arc::new(LogErrorReporter))
    }

    /// Wrap `tasks` at `priority`, append them to the queue and wake the
    /// dispatch loop. An empty submission is a no-op.
    pub fn submit<I>(&self, tasks: I, priority: TaskPriority)
    where
        I: IntoIterator<Item = Arc<dyn Task>>,
    {
        let wrapped: Vec<Arc<WrappedTask>> = tasks
            .into_iter()
            .map(|task| Arc::new(WrappedTask::new(task, priority)))
            .collect();
        if wrapped.is_empty() {
            debug!("empty task submission ignored");
            return;
        }

        let count = wrapped.len();
        for task in &wrapped {
            debug!(task = %task.description(), ?priority, "task submitted");
        }
        self.shared.queue.enqueue_all(wrapped);
        if let Ok(mut m) = self.shared.metrics.write() {
            m.tasks_submitted += count as u64;
        }
        self.shared.wake();
    }

    /// Submit one task at its own default priority.
    pub fn add_task(&self, task: Arc<dyn Task>) {
        let priority = task.default_priority();
        self.submit([task], priority);
    }

    /// Change the priority of a queued task. A task that is no longer
    /// tracked (never submitted, or already completed) is ignored. If the
    /// task is running, its worker's scheduling priority follows, even when
    /// the worker was started by a dispatch cycle still in progress.
    pub fn set_priority<T: Task + ?Sized>(&self, task: &Arc<T>, priority: TaskPriority) {
        let Some(wrapped) = self.shared.queue.find(task_ptr(task)) else {
            debug!(?priority, "set_priority on untracked task ignored");
            return;
        };

        let previous = wrapped.set_priority(priority);
        if previous != priority {
            debug!(task = %wrapped.description(), from = ?previous, to = ?priority, "task priority changed");
        }

        if let Some(worker_id) = wrapped.assigned_worker() {
            // The worker handle reads its priority through the wrapper.
            debug!(worker = %worker_id, ?priority, "running worker priority follows task");
        }

        self.shared.refresh_listeners(&self.shared.queue.rows());
    }

    /// Run `task` synchronously on the calling thread through the normal
    /// worker path, recording it in the queue at High priority so it is
    /// displayed and never picked up by the dispatch loop.
    pub fn run_on_current_thread(&self, task: Arc<dyn Task>) -> Arc<WrappedTask> {
        let wrapped = Arc::new(WrappedTask::new(task, TaskPriority::High));
        let id = self.shared.next_worker_id();
        wrapped.try_assign(id);
        self.shared.queue.enqueue(Arc::clone(&wrapped));
        if let Ok(mut m) = self.shared.metrics.write() {
            m.tasks_submitted += 1;
        }
        self.shared.wake();

        if let Some(worker) = Worker::new(
            id,
            Arc::clone(&wrapped),
            Arc::clone(&self.shared.reporter),
            Arc::clone(&self.shared.metrics),
        ) {
            worker.run();
        }
        wrapped
    }

    /// Cancel every live task in the current queue generation.
    pub fn cancel_all(&self) {
        let snapshot = self.shared.queue.snapshot();
        let mut canceled = 0;
        for task in snapshot.iter().filter_map(|w| w.actual_task()) {
            if task.status().is_active() {
                task.cancel();
                canceled += 1;
            }
        }
        info!(canceled, "cancel requested for all tasks");
    }

    pub fn add_queue_listener(&self, listener: Arc<dyn QueueListener>) {
        self.shared
            .listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(listener);
    }

    /// Replace the concurrency cap (0 = automatic). Read again on every
    /// dispatch cycle.
    pub fn set_max_concurrent_tasks(&self, max: usize) {
        let mut config = self.shared.config.write().unwrap_or_else(PoisonError::into_inner);
        if config.max_concurrent_tasks != max {
            info!(from = config.max_concurrent_tasks, to = max, "max concurrent tasks changed");
            config.max_concurrent_tasks = max;
        }
    }

    pub fn config(&self) -> TaskControllerConfig {
        self.shared
            .config
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Shallow copy of the queue in submission order.
    pub fn queue_snapshot(&self) -> Vec<Arc<WrappedTask>> {
        self.shared.queue.snapshot()
    }

    pub fn task_rows(&self) -> Vec<TaskRow> {
        self.shared.queue.rows()
    }

    /// Number of queued tasks that are Waiting or Processing.
    pub fn active_count(&self) -> usize {
        self.shared.queue.count_active()
    }

    /// Workers started by the dispatch loop whose task is still running.
    pub fn running_workers(&self) -> usize {
        self.shared
            .workers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|w| !w.is_finished())
            .count()
    }

    pub fn metrics(&self) -> ControllerMetrics {
        self.shared
            .metrics
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}
