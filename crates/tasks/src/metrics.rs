use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::task::TaskStatus;

/// Controller counters exposed to the task panel and the bench binary.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ControllerMetrics {
    /// Tasks accepted by `submit`/`add_task`/`run_on_current_thread`.
    pub tasks_submitted: u64,
    /// Workers started by the dispatch loop (calling-thread runs excluded).
    pub workers_started: u64,
    /// Workers still registered as running after the last dispatch cycle.
    pub running_workers: usize,
    /// Completed tasks by terminal status.
    pub completed: HashMap<TaskStatus, u64>,
    /// Queue generations cleared after draining.
    pub generations_cleared: u64,
    /// Average wall time of a worker run.
    pub avg_task_duration: Duration,
    /// Time of the most recent completion.
    pub last_completion: Option<DateTime<Utc>>,
}

impl ControllerMetrics {
    /// Record a finished worker run.
    pub fn record_completion(&mut self, status: TaskStatus, duration: Duration) {
        *self.completed.entry(status).or_default() += 1;
        self.last_completion = Some(Utc::now());

        let count = self.total_completed();
        // Incremental mean: new_avg = prev_avg + (duration - prev_avg) / count
        self.avg_task_duration = if count == 1 {
            duration
        } else {
            let prev_nanos = self.avg_task_duration.as_nanos() as f64;
            let cur_nanos = duration.as_nanos() as f64;
            let avg_nanos = prev_nanos + (cur_nanos - prev_nanos) / count as f64;
            Duration::from_nanos(avg_nanos as u64)
        };
    }

    pub fn total_completed(&self) -> u64 {
        self.completed.values().sum()
    }

    pub fn completed_with(&self, status: TaskStatus) -> u64 {
        self.completed.get(&status).copied().unwrap_or(0)
    }
}
