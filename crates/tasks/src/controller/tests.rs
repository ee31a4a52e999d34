use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Barrier, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use specflow_core::TaskSettings;

use crate::config::TaskControllerConfig;
use crate::error::TaskControlError;
use crate::controller::{CycleOutcome, TaskController};
use crate::listener::QueueListener;
use crate::report::ErrorReporter;
use crate::task::{Task, TaskPriority, TaskState, TaskStatus};
use crate::wrapped::TaskRow;

/// Task that reports Processing and then blocks until its gate opens or it
/// is canceled.
struct GatedTask {
    name: String,
    state: TaskState,
    gate: Arc<AtomicBool>,
    priority: TaskPriority,
}

impl GatedTask {
    fn new(name: &str, gate: &Arc<AtomicBool>) -> Arc<Self> {
        Self::with_priority(name, gate, TaskPriority::Normal)
    }

    fn with_priority(name: &str, gate: &Arc<AtomicBool>, priority: TaskPriority) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            state: TaskState::new(),
            gate: Arc::clone(gate),
            priority,
        })
    }
}

impl Task for GatedTask {
    fn description(&self) -> String {
        self.name.clone()
    }

    fn run(&self) {
        self.state.set_status(TaskStatus::Processing);
        loop {
            if self.state.is_canceled() {
                return;
            }
            if self.gate.load(Ordering::Acquire) {
                self.state.set_status(TaskStatus::Finished);
                return;
            }
            thread::sleep(Duration::from_millis(2));
        }
    }

    fn state(&self) -> &TaskState {
        &self.state
    }

    fn default_priority(&self) -> TaskPriority {
        self.priority
    }
}

#[derive(Default)]
struct RecordingListener {
    counts: Mutex<Vec<usize>>,
    refreshes: AtomicUsize,
    last_rows: Mutex<Vec<TaskRow>>,
}

impl QueueListener for RecordingListener {
    fn on_active_count_changed(&self, active: usize) {
        self.counts.lock().unwrap().push(active);
    }

    fn on_refresh(&self, rows: &[TaskRow]) {
        self.refreshes.fetch_add(1, Ordering::Relaxed);
        *self.last_rows.lock().unwrap() = rows.to_vec();
    }
}

type Reports = Arc<Mutex<Vec<(String, String)>>>;

fn controller(max: usize) -> (TaskController, Reports) {
    let reports: Reports = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&reports);
    let reporter: Arc<dyn ErrorReporter> = Arc::new(move |d: &str, m: &str| {
        sink.lock().unwrap().push((d.to_string(), m.to_string()));
    });
    let config = TaskControllerConfig::default()
        .with_max_concurrent_tasks(max)
        .with_tick_interval(Duration::from_millis(10));
    (TaskController::new(config, reporter), reports)
}

fn as_tasks(tasks: &[Arc<GatedTask>]) -> Vec<Arc<dyn Task>> {
    tasks.iter().map(|t| Arc::clone(t) as Arc<dyn Task>).collect()
}

fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(2));
    }
    cond()
}

fn count_status(tasks: &[Arc<GatedTask>], status: TaskStatus) -> usize {
    tasks.iter().filter(|t| t.status() == status).count()
}

#[test]
fn first_cycle_respects_cap() {
    let (ctl, _) = controller(3);
    let gate = Arc::new(AtomicBool::new(false));
    let tasks: Vec<_> = (0..10).map(|i| GatedTask::new(&format!("task-{i}"), &gate)).collect();
    ctl.submit(as_tasks(&tasks), TaskPriority::Normal);

    assert_eq!(ctl.dispatch_cycle(), CycleOutcome::Dispatched(3));
    assert!(wait_until(|| count_status(&tasks, TaskStatus::Processing) == 3));
    assert_eq!(count_status(&tasks, TaskStatus::Waiting), 7);
    assert_eq!(ctl.queue_snapshot().iter().filter(|w| w.is_assigned()).count(), 3);
    assert_eq!(ctl.active_count(), 10);

    // No capacity freed: a second cycle starts nothing.
    assert_eq!(ctl.dispatch_cycle(), CycleOutcome::Dispatched(0));

    gate.store(true, Ordering::Release);
}

#[test]
fn finished_workers_free_capacity() {
    let (ctl, _) = controller(2);
    let gate = Arc::new(AtomicBool::new(false));
    let tasks: Vec<_> = (0..4).map(|i| GatedTask::new(&format!("task-{i}"), &gate)).collect();
    ctl.submit(as_tasks(&tasks), TaskPriority::Normal);

    assert_eq!(ctl.dispatch_cycle(), CycleOutcome::Dispatched(2));
    gate.store(true, Ordering::Release);
    assert!(wait_until(|| ctl.running_workers() == 0));

    assert_eq!(ctl.dispatch_cycle(), CycleOutcome::Dispatched(2));
    assert!(wait_until(|| count_status(&tasks, TaskStatus::Finished) == 4));
    assert!(wait_until(|| ctl.running_workers() == 0));
    assert_eq!(ctl.metrics().workers_started, 4);
}

#[test]
fn high_priority_bypasses_cap() {
    let (ctl, _) = controller(1);
    let gate = Arc::new(AtomicBool::new(false));
    let normal: Vec<_> = (0..5).map(|i| GatedTask::new(&format!("normal-{i}"), &gate)).collect();
    ctl.submit(as_tasks(&normal), TaskPriority::Normal);
    assert_eq!(ctl.dispatch_cycle(), CycleOutcome::Dispatched(1));

    let urgent = GatedTask::new("flush writes", &gate);
    ctl.submit([urgent.clone() as Arc<dyn Task>], TaskPriority::High);
    assert_eq!(ctl.dispatch_cycle(), CycleOutcome::Dispatched(1));
    assert!(wait_until(|| urgent.status() == TaskStatus::Processing));
    assert_eq!(count_status(&normal, TaskStatus::Processing), 1);

    gate.store(true, Ordering::Release);
}

#[test]
fn high_priority_tasks_later_in_queue_still_start() {
    let (ctl, _) = controller(1);
    let gate = Arc::new(AtomicBool::new(false));
    let first = GatedTask::new("normal-a", &gate);
    let second = GatedTask::new("normal-b", &gate);
    let urgent = GatedTask::new("urgent", &gate);
    ctl.submit(as_tasks(&[first.clone(), second.clone()]), TaskPriority::Normal);
    ctl.submit([urgent.clone() as Arc<dyn Task>], TaskPriority::High);

    assert_eq!(ctl.dispatch_cycle(), CycleOutcome::Dispatched(2));
    assert!(wait_until(|| urgent.status() == TaskStatus::Processing));
    assert_eq!(second.status(), TaskStatus::Waiting);

    gate.store(true, Ordering::Release);
}

#[test]
fn canceled_before_pickup_never_runs() {
    let (ctl, _) = controller(2);
    let gate = Arc::new(AtomicBool::new(true));
    let task = GatedTask::new("cancel me", &gate);
    let seen = Arc::new(Mutex::new(Vec::new()));
    let seen_c = Arc::clone(&seen);
    task.state.add_status_listener(move |new, _old| seen_c.lock().unwrap().push(new));

    ctl.submit([task.clone() as Arc<dyn Task>], TaskPriority::Normal);
    task.cancel();
    assert_eq!(ctl.active_count(), 0);

    assert_eq!(ctl.dispatch_cycle(), CycleOutcome::Drained(1));
    assert_eq!(ctl.metrics().workers_started, 0);
    assert_eq!(task.status(), TaskStatus::Canceled);
    assert_eq!(*seen.lock().unwrap(), vec![TaskStatus::Canceled]);
}

#[test]
fn drained_generation_is_cleared_and_next_starts_fresh() {
    let (ctl, _) = controller(4);
    let gate = Arc::new(AtomicBool::new(true));
    let tasks: Vec<_> = (0..3).map(|i| GatedTask::new(&format!("task-{i}"), &gate)).collect();
    ctl.submit(as_tasks(&tasks), TaskPriority::Normal);

    assert_eq!(ctl.dispatch_cycle(), CycleOutcome::Dispatched(3));
    assert!(wait_until(|| count_status(&tasks, TaskStatus::Finished) == 3));
    assert_eq!(ctl.dispatch_cycle(), CycleOutcome::Drained(3));
    assert!(ctl.queue_snapshot().is_empty());
    assert_eq!(ctl.dispatch_cycle(), CycleOutcome::Idle);
    assert_eq!(ctl.metrics().generations_cleared, 1);

    let next = GatedTask::new("next generation", &gate);
    ctl.submit([next as Arc<dyn Task>], TaskPriority::Normal);
    assert_eq!(ctl.queue_snapshot().len(), 1);
}

#[test]
fn completed_tasks_are_released_by_the_queue() {
    let (ctl, _) = controller(2);
    let gate = Arc::new(AtomicBool::new(true));
    let task = GatedTask::new("heavy", &gate);
    ctl.submit([task.clone() as Arc<dyn Task>], TaskPriority::Normal);

    assert_eq!(ctl.dispatch_cycle(), CycleOutcome::Dispatched(1));
    assert!(wait_until(|| ctl.running_workers() == 0));

    let snapshot = ctl.queue_snapshot();
    assert!(snapshot[0].is_completed());
    assert!(snapshot[0].actual_task().is_none());
    assert_eq!(snapshot[0].status(), TaskStatus::Finished);
    assert_eq!(snapshot[0].description(), "heavy");
    assert_eq!(Arc::strong_count(&task), 1);
}

#[test]
fn active_count_listener_fires_only_on_change() {
    let (ctl, _) = controller(1);
    let listener = Arc::new(RecordingListener::default());
    ctl.add_queue_listener(listener.clone());
    let gate = Arc::new(AtomicBool::new(false));
    let tasks: Vec<_> = (0..2).map(|i| GatedTask::new(&format!("task-{i}"), &gate)).collect();
    ctl.submit(as_tasks(&tasks), TaskPriority::Normal);

    ctl.dispatch_cycle();
    ctl.dispatch_cycle();
    ctl.dispatch_cycle();
    assert_eq!(*listener.counts.lock().unwrap(), vec![2]);
    assert_eq!(listener.refreshes.load(Ordering::Relaxed), 3);
    assert_eq!(listener.last_rows.lock().unwrap().len(), 2);

    tasks[1].cancel();
    ctl.dispatch_cycle();
    assert_eq!(*listener.counts.lock().unwrap(), vec![2, 1]);

    gate.store(true, Ordering::Release);
}

#[test]
fn set_priority_promotes_waiting_task() {
    let (ctl, _) = controller(1);
    let gate = Arc::new(AtomicBool::new(false));
    let first = GatedTask::new("first", &gate);
    let second = GatedTask::new("second", &gate);
    ctl.submit(as_tasks(&[first.clone(), second.clone()]), TaskPriority::Normal);

    assert_eq!(ctl.dispatch_cycle(), CycleOutcome::Dispatched(1));
    assert_eq!(ctl.dispatch_cycle(), CycleOutcome::Dispatched(0));

    ctl.set_priority(&second, TaskPriority::High);
    assert_eq!(ctl.dispatch_cycle(), CycleOutcome::Dispatched(1));
    assert!(wait_until(|| second.status() == TaskStatus::Processing));

    gate.store(true, Ordering::Release);
}

#[test]
fn set_priority_adjusts_running_worker() {
    let (ctl, _) = controller(1);
    let gate = Arc::new(AtomicBool::new(false));
    let running = GatedTask::new("running", &gate);
    let waiting = GatedTask::new("waiting", &gate);
    ctl.submit(as_tasks(&[running.clone(), waiting.clone()]), TaskPriority::Normal);
    assert_eq!(ctl.dispatch_cycle(), CycleOutcome::Dispatched(1));

    ctl.set_priority(&running, TaskPriority::High);
    {
        let workers = ctl.shared.workers.lock().unwrap();
        assert_eq!(workers.len(), 1);
        assert_eq!(workers[0].priority(), TaskPriority::High);
    }

    // The running task no longer occupies a normal slot.
    assert_eq!(ctl.dispatch_cycle(), CycleOutcome::Dispatched(1));
    assert!(wait_until(|| waiting.status() == TaskStatus::Processing));

    gate.store(true, Ordering::Release);
}

#[test]
fn set_priority_with_same_value_only_refreshes() {
    let (ctl, _) = controller(1);
    let listener = Arc::new(RecordingListener::default());
    ctl.add_queue_listener(listener.clone());
    let gate = Arc::new(AtomicBool::new(true));
    let task = GatedTask::new("steady", &gate);
    ctl.submit([task.clone() as Arc<dyn Task>], TaskPriority::Normal);

    ctl.set_priority(&task, TaskPriority::Normal);
    assert_eq!(listener.refreshes.load(Ordering::Relaxed), 1);
    assert!(listener.counts.lock().unwrap().is_empty());
    assert_eq!(ctl.queue_snapshot()[0].priority(), TaskPriority::Normal);
}

#[test]
fn set_priority_on_untracked_task_is_ignored() {
    let (ctl, _) = controller(1);
    let listener = Arc::new(RecordingListener::default());
    ctl.add_queue_listener(listener.clone());
    let gate = Arc::new(AtomicBool::new(true));
    let stranger = GatedTask::new("never submitted", &gate);

    ctl.set_priority(&stranger, TaskPriority::High);
    assert_eq!(listener.refreshes.load(Ordering::Relaxed), 0);
    assert!(ctl.queue_snapshot().is_empty());
}

#[test]
fn empty_submission_is_a_no_op() {
    let (ctl, _) = controller(1);
    ctl.submit(Vec::<Arc<dyn Task>>::new(), TaskPriority::High);
    assert!(ctl.queue_snapshot().is_empty());
    assert_eq!(ctl.metrics().tasks_submitted, 0);
    assert_eq!(ctl.dispatch_cycle(), CycleOutcome::Idle);
}

#[test]
fn add_task_uses_default_priority() {
    let (ctl, _) = controller(1);
    let gate = Arc::new(AtomicBool::new(false));
    let blocker = GatedTask::new("blocker", &gate);
    let urgent = GatedTask::with_priority("urgent", &gate, TaskPriority::High);
    ctl.add_task(blocker.clone());
    ctl.add_task(urgent.clone());

    let priorities: Vec<_> = ctl.queue_snapshot().iter().map(|w| w.priority()).collect();
    assert_eq!(priorities, vec![TaskPriority::Normal, TaskPriority::High]);
    assert_eq!(ctl.dispatch_cycle(), CycleOutcome::Dispatched(2));

    gate.store(true, Ordering::Release);
}

#[test]
fn live_concurrency_change_applies_next_cycle() {
    let (ctl, _) = controller(1);
    let gate = Arc::new(AtomicBool::new(false));
    let tasks: Vec<_> = (0..4).map(|i| GatedTask::new(&format!("task-{i}"), &gate)).collect();
    ctl.submit(as_tasks(&tasks), TaskPriority::Normal);

    assert_eq!(ctl.dispatch_cycle(), CycleOutcome::Dispatched(1));
    ctl.set_max_concurrent_tasks(3);
    assert_eq!(ctl.config().max_concurrent_tasks, 3);
    assert_eq!(ctl.dispatch_cycle(), CycleOutcome::Dispatched(2));

    gate.store(true, Ordering::Release);
}

#[test]
fn cancel_all_stops_running_and_waiting_tasks() {
    let (ctl, reports) = controller(1);
    let gate = Arc::new(AtomicBool::new(false));
    let tasks: Vec<_> = (0..3).map(|i| GatedTask::new(&format!("task-{i}"), &gate)).collect();
    ctl.submit(as_tasks(&tasks), TaskPriority::Normal);
    assert_eq!(ctl.dispatch_cycle(), CycleOutcome::Dispatched(1));

    ctl.cancel_all();
    assert_eq!(count_status(&tasks, TaskStatus::Canceled), 3);
    assert_eq!(ctl.active_count(), 0);
    assert!(wait_until(|| ctl.running_workers() == 0));
    assert_eq!(ctl.dispatch_cycle(), CycleOutcome::Drained(3));
    // Cancellation is not an error.
    assert!(reports.lock().unwrap().is_empty());
}

#[test]
fn run_on_current_thread_blocks_and_records() {
    let (ctl, _) = controller(1);
    let gate = Arc::new(AtomicBool::new(true));
    let task = GatedTask::new("batch step", &gate);

    let wrapped = ctl.run_on_current_thread(task.clone());
    assert_eq!(task.status(), TaskStatus::Finished);
    assert_eq!(wrapped.status(), TaskStatus::Finished);
    assert_eq!(wrapped.priority(), TaskPriority::High);
    assert!(wrapped.is_completed());
    assert_eq!(ctl.queue_snapshot().len(), 1);
    assert_eq!(ctl.metrics().workers_started, 0);
    assert_eq!(ctl.dispatch_cycle(), CycleOutcome::Drained(1));
}

#[test]
fn submitted_before_start_waits_in_queue() {
    let (ctl, _) = controller(1);
    let gate = Arc::new(AtomicBool::new(true));
    let task = GatedTask::new("early", &gate);
    ctl.submit([task.clone() as Arc<dyn Task>], TaskPriority::Normal);
    thread::sleep(Duration::from_millis(20));
    assert_eq!(task.status(), TaskStatus::Waiting);
    assert!(!ctl.is_running());
}

#[test]
fn from_settings_rejects_zero_tick() {
    let settings = TaskSettings {
        max_concurrent_tasks: 2,
        tick_interval_ms: 0,
    };
    let result = TaskController::from_settings(&settings, Arc::new(|_: &str, _: &str| {}));
    assert!(matches!(result, Err(TaskControlError::Config(_))));

    let settings = TaskSettings {
        tick_interval_ms: 50,
        ..settings
    };
    let ctl = TaskController::from_settings(&settings, Arc::new(|_: &str, _: &str| {})).unwrap();
    assert_eq!(ctl.config().max_concurrent_tasks, 2);
    assert_eq!(ctl.config().tick_interval, Duration::from_millis(50));
}

#[test]
fn demotion_during_admission_reaches_its_worker() {
    let (ctl, _) = controller(1);
    let gate = Arc::new(AtomicBool::new(false));
    let tasks: Vec<_> = (0..300).map(|i| GatedTask::new(&format!("urgent-{i}"), &gate)).collect();
    ctl.submit(as_tasks(&tasks), TaskPriority::High);
    let first = Arc::clone(&ctl.queue_snapshot()[0]);

    // Demote the first task while the same cycle is still starting the rest.
    thread::scope(|s| {
        let cycle = s.spawn(|| ctl.dispatch_cycle());
        assert!(wait_until(|| first.is_assigned()));
        ctl.set_priority(&tasks[0], TaskPriority::Normal);
        assert_eq!(cycle.join().unwrap(), CycleOutcome::Dispatched(300));
    });

    {
        let workers = ctl.shared.workers.lock().unwrap();
        let handle = workers
            .iter()
            .find(|w| Some(w.id()) == first.assigned_worker())
            .unwrap();
        assert_eq!(handle.priority(), TaskPriority::Normal);
    }

    // The demoted task holds the only normal slot.
    let extra = GatedTask::new("extra", &gate);
    ctl.submit([extra.clone() as Arc<dyn Task>], TaskPriority::Normal);
    assert_eq!(ctl.dispatch_cycle(), CycleOutcome::Dispatched(0));
    assert_eq!(extra.status(), TaskStatus::Waiting);

    gate.store(true, Ordering::Release);
}

#[test]
fn drained_cycle_reaps_finished_workers() {
    let (ctl, _) = controller(3);
    let gate = Arc::new(AtomicBool::new(false));
    let tasks: Vec<_> = (0..3).map(|i| GatedTask::new(&format!("task-{i}"), &gate)).collect();
    ctl.submit(as_tasks(&tasks), TaskPriority::Normal);

    assert_eq!(ctl.dispatch_cycle(), CycleOutcome::Dispatched(3));
    assert_eq!(ctl.metrics().running_workers, 3);

    gate.store(true, Ordering::Release);
    assert!(wait_until(|| ctl.running_workers() == 0));
    assert_eq!(ctl.dispatch_cycle(), CycleOutcome::Drained(3));
    assert!(ctl.shared.workers.lock().unwrap().is_empty());
    assert_eq!(ctl.metrics().running_workers, 0);
}

#[test]
fn concurrent_cycles_share_one_normal_cap() {
    for round in 0..25 {
        let (ctl, _) = controller(2);
        let gate = Arc::new(AtomicBool::new(false));
        let tasks: Vec<_> = (0..40)
            .map(|i| GatedTask::new(&format!("round-{round}-task-{i}"), &gate))
            .collect();
        ctl.submit(as_tasks(&tasks), TaskPriority::Normal);

        let barrier = Barrier::new(2);
        thread::scope(|s| {
            for _ in 0..2 {
                s.spawn(|| {
                    barrier.wait();
                    ctl.dispatch_cycle();
                });
            }
        });

        let assigned = ctl.queue_snapshot().iter().filter(|w| w.is_assigned()).count();
        assert_eq!(assigned, 2, "round {round}");
        gate.store(true, Ordering::Release);
    }
}
