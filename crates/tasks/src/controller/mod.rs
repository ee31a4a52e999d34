//! Task controller -- owns the queue and decides when queued tasks run.
//!
//! Split into focused submodules:
//! - `core`: TaskController struct, constructor, submission and priority API
//! - `dispatch`: one dispatch cycle (drain, reap, admit, refresh)
//! - `lifecycle`: dispatch thread start/shutdown and the tick loop

mod core;
mod dispatch;
mod lifecycle;
#[cfg(test)]
mod tests;

pub use self::core::TaskController;
pub use self::dispatch::CycleOutcome;
