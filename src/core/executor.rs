//! Task execution traits and the runtime spawn seam.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;

use super::error::{panic_message, AppResult, SchedulerError};

/// A zero-argument asynchronous operation that eventually yields a value or fails.
///
/// The scheduling layer never inspects a task; it only decides when to start it.
/// Any `FnOnce() -> impl Future<Output = AppResult<T>>` closure is a task:
///
/// ```rust,ignore
/// use outbound_throttle::core::{task, BoxedTask};
///
/// let lookup: BoxedTask<String> = task(|| async move {
///     let body = http.get(url).send().await?.text().await?;
///     anyhow::Ok(body)
/// });
/// ```
#[async_trait]
pub trait Task<T>: Send + 'static {
    /// Consume the task and run it to completion.
    async fn run(self: Box<Self>) -> AppResult<T>;
}

#[async_trait]
impl<T, F, Fut> Task<T> for F
where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = AppResult<T>> + Send + 'static,
    T: Send + 'static,
{
    async fn run(self: Box<Self>) -> AppResult<T> {
        (*self)().await
    }
}

/// Type-erased task, the unit stored in scheduler queues.
pub type BoxedTask<T> = Box<dyn Task<T>>;

/// Box a task closure so tasks of different closure types can share a `Vec`.
pub fn task<T, K>(task: K) -> BoxedTask<T>
where
    K: Task<T>,
{
    Box::new(task)
}

/// Progress callback invoked once per settled task with
/// `(value or None on failure, submission index, total)`.
///
/// Errors returned from the callback, and panics raised inside it, are logged
/// and swallowed; they never stop the drain.
pub type ResultCallback<T> = Arc<dyn Fn(Option<&T>, usize, usize) -> AppResult<()> + Send + Sync>;

/// Abstraction for spawning task execution on a runtime.
pub trait Spawn: Send + Sync + 'static {
    /// Spawn a detached future.
    fn spawn<F>(&self, fut: F)
    where
        F: Future<Output = ()> + Send + 'static;
}

/// Run a task, converting a panic into a [`SchedulerError::TaskPanicked`] failure.
pub(crate) async fn run_guarded<T: Send + 'static>(task: BoxedTask<T>) -> AppResult<T> {
    match AssertUnwindSafe(task.run()).catch_unwind().await {
        Ok(outcome) => outcome,
        Err(payload) => Err(SchedulerError::TaskPanicked(panic_message(payload.as_ref())).into()),
    }
}

/// Invoke a progress callback, swallowing its errors and panics.
pub(crate) fn invoke_guarded<T>(callback: &ResultCallback<T>, value: Option<&T>, index: usize, total: usize) {
    match std::panic::catch_unwind(AssertUnwindSafe(|| callback(value, index, total))) {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::warn!(index, total, error = %e, "result callback failed; continuing"),
        Err(payload) => tracing::warn!(
            index,
            total,
            panic = %panic_message(payload.as_ref()),
            "result callback panicked; continuing"
        ),
    }
}
