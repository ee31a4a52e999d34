use crate::wrapped::TaskRow;

/// Observer of the task queue, typically a task table in the UI.
///
/// Notifications are coalesced: `on_active_count_changed` fires only when
/// the number of Waiting/Processing tasks differs from the last value seen
/// by the dispatch loop, and `on_refresh` at most once per tick (plus once
/// per priority change). Both run on the dispatch thread, or on the thread
/// calling `set_priority`, and should return quickly.
pub trait QueueListener: Send + Sync {
    fn on_active_count_changed(&self, active: usize);

    /// Periodic refresh with the current rows, for progress display.
    fn on_refresh(&self, _rows: &[TaskRow]) {}
}
