use std::time::Duration;

use serde::{Deserialize, Serialize};
use specflow_core::TaskSettings;

/// Runtime settings of the [`crate::TaskController`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskControllerConfig {
    /// Maximum concurrently running normal-priority tasks. 0 = number of
    /// available processing units.
    #[serde(default)]
    pub max_concurrent_tasks: usize,
    /// Pause between dispatch cycles.
    #[serde(default = "default_tick_interval")]
    pub tick_interval: Duration,
}

fn default_tick_interval() -> Duration {
    Duration::from_millis(300)
}

impl Default for TaskControllerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_tasks: 0,
            tick_interval: default_tick_interval(),
        }
    }
}

impl From<&TaskSettings> for TaskControllerConfig {
    fn from(settings: &TaskSettings) -> Self {
        Self {
            max_concurrent_tasks: settings.max_concurrent_tasks,
            tick_interval: Duration::from_millis(settings.tick_interval_ms.max(1)),
        }
    }
}

impl TaskControllerConfig {
    pub fn with_max_concurrent_tasks(mut self, max: usize) -> Self {
        self.max_concurrent_tasks = max;
        self
    }

    pub fn with_tick_interval(mut self, tick: Duration) -> Self {
        self.tick_interval = tick;
        self
    }

    /// Resolve the concurrency cap (0 means use available parallelism).
    pub fn resolved_max_concurrent_tasks(&self) -> usize {
        if self.max_concurrent_tasks == 0 {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4)
        } else {
            self.max_concurrent_tasks
        }
    }
}
