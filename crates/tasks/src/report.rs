use tracing::warn;

/// Sink for task failures, typically an error dialog in the UI.
///
/// Called exactly once per failed task, from the worker thread that ran it,
/// with the task description and the message to show.
pub trait ErrorReporter: Send + Sync {
    fn report(&self, description: &str, message: &str);
}

impl<F> ErrorReporter for F
where
    F: Fn(&str, &str) + Send + Sync,
{
    fn report(&self, description: &str, message: &str) {
        self(description, message)
    }
}

/// Default sink for headless use: writes the report to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogErrorReporter;

impl ErrorReporter for LogErrorReporter {
    fn report(&self, description: &str, message: &str) {
        warn!(target: "specflow::report", task = %description, "{}", message);
    }
}
