//! Registry of open batches for decoupled submit/await.
//!
//! A batch id maps to the result receivers of its tasks. The receivers are
//! stored type-erased so one registry serves batches of any result type; the
//! type is recovered when the batch is awaited.

use std::any::Any;
use std::collections::HashMap;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::warn;

use super::error::{AppResult, SchedulerError};

/// Receiving half of one task's outcome.
pub(crate) type Outcome<T> = oneshot::Receiver<AppResult<T>>;

enum BatchEntry {
    Open(Box<dyn Any + Send>),
    Awaiting,
}

#[derive(Default)]
pub(crate) struct BatchRegistry {
    batches: Mutex<HashMap<String, BatchEntry>>,
}

impl BatchRegistry {
    /// Register `receivers` under `id`.
    pub(crate) fn open<T>(&self, id: &str, receivers: Vec<Outcome<T>>) -> Result<(), SchedulerError>
    where
        T: Send + 'static,
    {
        let mut batches = self.batches.lock();
        if batches.contains_key(id) {
            return Err(SchedulerError::BatchAlreadyOpen(id.to_string()));
        }
        batches.insert(id.to_string(), BatchEntry::Open(Box::new(receivers)));
        Ok(())
    }

    /// Take the receivers of an open batch. The entry stays registered as
    /// awaiting until the returned guard is dropped.
    pub(crate) fn claim<T>(&self, id: &str) -> Result<(Vec<Outcome<T>>, ClaimGuard<'_>), SchedulerError>
    where
        T: Send + 'static,
    {
        let mut batches = self.batches.lock();
        let entry = batches
            .get_mut(id)
            .ok_or_else(|| SchedulerError::BatchNotFound(id.to_string()))?;
        let erased = match std::mem::replace(entry, BatchEntry::Awaiting) {
            BatchEntry::Open(erased) => erased,
            BatchEntry::Awaiting => return Err(SchedulerError::BatchAlreadyAwaited(id.to_string())),
        };
        match erased.downcast::<Vec<Outcome<T>>>() {
            Ok(receivers) => Ok((
                *receivers,
                ClaimGuard {
                    registry: self,
                    id: id.to_string(),
                },
            )),
            Err(erased) => {
                *entry = BatchEntry::Open(erased);
                Err(SchedulerError::BatchTypeMismatch(id.to_string()))
            }
        }
    }

    pub(crate) fn contains(&self, id: &str) -> bool {
        self.batches.lock().contains_key(id)
    }

    pub(crate) fn len(&self) -> usize {
        self.batches.lock().len()
    }

    fn remove(&self, id: &str) {
        let removed = self.batches.lock().remove(id);
        drop(removed);
    }
}

/// Removes a claimed batch from the registry when dropped, whether the await
/// finished or was abandoned.
pub(crate) struct ClaimGuard<'a> {
    registry: &'a BatchRegistry,
    id: String,
}

impl Drop for ClaimGuard<'_> {
    fn drop(&mut self) {
        self.registry.remove(&self.id);
    }
}

/// Await every outcome, mapping failures to `None`.
pub(crate) async fn collect<T>(batch_id: &str, receivers: Vec<Outcome<T>>) -> Vec<Option<T>> {
    let outcomes = futures::future::join_all(receivers).await;
    outcomes
        .into_iter()
        .enumerate()
        .map(|(index, outcome)| match outcome {
            Ok(Ok(value)) => Some(value),
            Ok(Err(e)) => {
                warn!(batch_id, index, error = %e, "batch task failed; recording empty result");
                None
            }
            Err(_) => {
                warn!(batch_id, index, "batch task dropped before it settled");
                None
            }
        })
        .collect()
}
