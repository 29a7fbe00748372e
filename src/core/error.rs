//! Error types for scheduler and orchestrator operations.

use thiserror::Error;

/// Errors produced by scheduler components.
///
/// These are usage and lifecycle faults of the scheduling layer itself. Failures
/// raised by task bodies travel as [`AppResult`] errors and are never wrapped in
/// this type, except for panics which surface as [`SchedulerError::TaskPanicked`].
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// A drain (`process_all` or a continuous worker) is already active.
    #[error("scheduler is already processing: {0} is in flight")]
    AlreadyProcessing(&'static str),
    /// A batch with this id is still open.
    #[error("batch `{0}` is already open; await it before reusing the id")]
    BatchAlreadyOpen(String),
    /// No open batch with this id.
    #[error("batch `{0}` not found")]
    BatchNotFound(String),
    /// The batch is already being awaited by another caller.
    #[error("batch `{0}` is already being awaited")]
    BatchAlreadyAwaited(String),
    /// The batch was opened with a different result type.
    #[error("batch `{0}` was opened with a different result type")]
    BatchTypeMismatch(String),
    /// A task panicked while running.
    #[error("task panicked: {0}")]
    TaskPanicked(String),
    /// A task was discarded before it settled.
    #[error("task was dropped before it settled")]
    TaskDropped,
    /// Configuration validation failed.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// No async runtime is available to drive the scheduler.
    #[error("runtime unavailable: {0}")]
    Runtime(String),
}

/// Application-facing result using anyhow for task bodies and the strict tier.
pub type AppResult<T> = Result<T, anyhow::Error>;

/// Render a caught panic payload as text.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
