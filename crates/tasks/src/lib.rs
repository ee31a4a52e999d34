//! Task scheduling core for the specflow workbench.
//!
//! Processing modules hand long-running, cancellable units of work
//! ([`Task`]) to a single [`TaskController`]. The controller queues them,
//! starts at most `max_concurrent_tasks` normal-priority tasks at a time
//! (high-priority tasks bypass the cap), reports failures to an
//! [`ErrorReporter`] and keeps a display model of the queue for
//! [`QueueListener`]s. Finished tasks are swapped for a small
//! [`CompletedTask`] summary so their data can be freed while the row stays
//! visible until the whole queue generation drains.

pub mod completed;
pub mod config;
pub mod controller;
pub mod error;
pub mod listener;
pub mod metrics;
pub mod queue;
pub mod report;
pub mod task;
pub mod worker;
pub mod wrapped;

pub use completed::CompletedTask;
pub use config::TaskControllerConfig;
pub use controller::{CycleOutcome, TaskController};
pub use error::TaskControlError;
pub use listener::QueueListener;
pub use metrics::ControllerMetrics;
pub use queue::TaskQueue;
pub use report::{ErrorReporter, LogErrorReporter};
pub use task::{StatusListener, Task, TaskPriority, TaskState, TaskStatus};
pub use worker::{Worker, WorkerHandle, WorkerId, UNSPECIFIED_ERROR};
pub use wrapped::{TaskRow, WrappedTask};
