use thiserror::Error;

/// Errors raised by the task controller itself. Task failures are never
/// reported through this type; they go to the [`crate::ErrorReporter`].
#[derive(Debug, Error)]
pub enum TaskControlError {
    #[error("task controller already started")]
    AlreadyStarted,

    #[error("failed to spawn {0} thread: {1}")]
    Spawn(String, #[source] std::io::Error),

    #[error("config error: {0}")]
    Config(#[from] specflow_core::ConfigError),
}
