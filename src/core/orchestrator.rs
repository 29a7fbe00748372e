//! Lane orchestrator: named concurrency pools over one shared token bucket.
//!
//! Every lane owns a waiting queue and a slot ceiling. A submitted task stays
//! in its lane until a slot is reserved for it, and only then is it handed to
//! the shared [`TokenBucketScheduler`], whose continuous worker applies the
//! global rate. The slot travels with the task as a `LaneSlot` guard and is
//! returned when the task settles, fails, panics, or is discarded.
//!
//! Submissions made in the same scheduling instant are coalesced: the first one
//! schedules a deferred flush and later ones only append to their lane.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::{validate_lanes, OrchestratorConfig, DEFAULT_LANE};
use crate::core::batch::{self, BatchRegistry, Outcome};
use crate::core::error::{AppResult, SchedulerError};
use crate::core::executor::{run_guarded, BoxedTask, Spawn, Task};
use crate::core::lane::{LaneState, LaneStats};
use crate::core::scheduler::{ContinuousWorker, TokenBucketScheduler};
use crate::runtime::TokioSpawner;

/// Deferred work for one lane: given its slot, produce the scheduler task.
type LaneJob<S> = Box<dyn FnOnce(LaneSlot<S>) -> BoxedTask<()> + Send>;

/// A reserved lane slot. Dropping it returns the slot and hands the lane's
/// next waiting task to the scheduler.
struct LaneSlot<S>
where
    S: Spawn,
{
    lanes: Weak<Lanes<S>>,
    lane: String,
    failed: bool,
}

impl<S> Drop for LaneSlot<S>
where
    S: Spawn,
{
    fn drop(&mut self) {
        if let Some(lanes) = self.lanes.upgrade() {
            lanes.release(&self.lane, self.failed);
        }
    }
}

/// Counts a submitted task until it settles or is discarded.
struct PendingGuard(Arc<AtomicUsize>);

impl PendingGuard {
    fn new(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::AcqRel);
        Self(Arc::clone(counter))
    }
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

struct Lanes<S>
where
    S: Spawn,
{
    scheduler: TokenBucketScheduler<(), S>,
    table: Mutex<HashMap<String, LaneState<LaneJob<S>>>>,
    flush_scheduled: AtomicBool,
}

impl<S> Lanes<S>
where
    S: Spawn,
{
    /// Append jobs to a lane, falling back to [`DEFAULT_LANE`] for unknown names.
    fn submit(self: &Arc<Self>, lane: &str, jobs: Vec<LaneJob<S>>) {
        if jobs.is_empty() {
            return;
        }
        {
            let mut table = self.table.lock();
            let name = if table.contains_key(lane) {
                lane
            } else {
                debug!(lane, fallback = DEFAULT_LANE, "unknown lane; routing to fallback lane");
                DEFAULT_LANE
            };
            if let Some(state) = table.get_mut(name) {
                state.push(jobs);
            }
        }
        self.schedule_flush();
    }

    fn schedule_flush(self: &Arc<Self>) {
        if self.flush_scheduled.swap(true, Ordering::AcqRel) {
            return;
        }
        let lanes = Arc::clone(self);
        self.scheduler.spawner().spawn(async move {
            tokio::task::yield_now().await;
            lanes.flush_scheduled.store(false, Ordering::Release);
            lanes.flush();
        });
    }

    /// Move every job that can get a slot into the scheduler in one pass.
    fn flush(self: &Arc<Self>) {
        let ready: Vec<(String, LaneJob<S>)> = {
            let mut table = self.table.lock();
            table
                .iter_mut()
                .flat_map(|(name, state)| state.take_ready().into_iter().map(move |job| (name.clone(), job)))
                .collect()
        };
        self.hand_off(ready);
    }

    fn release(self: &Arc<Self>, lane: &str, failed: bool) {
        let ready: Vec<(String, LaneJob<S>)> = {
            let mut table = self.table.lock();
            match table.get_mut(lane) {
                Some(state) => {
                    state.release(failed);
                    state.take_ready().into_iter().map(|job| (lane.to_string(), job)).collect()
                }
                None => Vec::new(),
            }
        };
        self.hand_off(ready);
    }

    fn hand_off(self: &Arc<Self>, ready: Vec<(String, LaneJob<S>)>) {
        if ready.is_empty() {
            return;
        }
        debug!(count = ready.len(), "lane handoff to scheduler");
        let weak = Arc::downgrade(self);
        let tasks: Vec<BoxedTask<()>> = ready
            .into_iter()
            .map(|(lane, job)| {
                job(LaneSlot {
                    lanes: weak.clone(),
                    lane,
                    failed: false,
                })
            })
            .collect();
        self.scheduler.enqueue_many(tasks);
    }
}

/// Wrap a task so it reports its outcome through `tx` and returns its slot
/// before the caller observes the result.
fn lane_job<T, S>(task: BoxedTask<T>, tx: oneshot::Sender<AppResult<T>>, pending: PendingGuard) -> LaneJob<S>
where
    T: Send + 'static,
    S: Spawn,
{
    Box::new(move |slot: LaneSlot<S>| -> BoxedTask<()> {
        Box::new(move || async move {
            let mut slot = slot;
            let outcome = run_guarded(task).await;
            slot.failed = outcome.is_err();
            drop(slot);
            drop(pending);
            let _ = tx.send(outcome);
            anyhow::Ok(())
        })
    })
}

async fn receive<T>(rx: Outcome<T>) -> AppResult<T> {
    match rx.await {
        Ok(outcome) => outcome,
        Err(_) => Err(SchedulerError::TaskDropped.into()),
    }
}

/// Routes tasks through per-provider lanes that share one global rate limit.
///
/// ```rust,ignore
/// let orchestrator = LaneOrchestrator::new(OrchestratorConfig::default())?;
/// let artist = orchestrator
///     .execute(move || async move { spotify.artist(id).await }, "spotify")
///     .await?;
/// ```
pub struct LaneOrchestrator<S = TokioSpawner>
where
    S: Spawn,
{
    lanes: Arc<Lanes<S>>,
    pending: Arc<AtomicUsize>,
    batches: BatchRegistry,
    _worker: ContinuousWorker<(), S>,
}

impl LaneOrchestrator<TokioSpawner> {
    /// Build an orchestrator on the current tokio runtime.
    ///
    /// # Errors
    ///
    /// - `SchedulerError::InvalidConfig` if the configuration is invalid
    /// - `SchedulerError::Runtime` if called outside a tokio runtime
    pub fn new(config: OrchestratorConfig) -> Result<Self, SchedulerError> {
        config.validate().map_err(SchedulerError::InvalidConfig)?;
        let scheduler = TokenBucketScheduler::new(config.scheduler_config())?;
        Self::with_scheduler(&config.lanes, scheduler)
    }
}

impl<S> LaneOrchestrator<S>
where
    S: Spawn,
{
    /// Build an orchestrator over an injected scheduler, which must be idle.
    ///
    /// # Errors
    ///
    /// - `SchedulerError::InvalidConfig` if `lanes` lacks the fallback lane or has a zero ceiling
    /// - `SchedulerError::AlreadyProcessing` if the scheduler already has a drain
    pub fn with_scheduler(
        lanes: &BTreeMap<String, usize>,
        scheduler: TokenBucketScheduler<(), S>,
    ) -> Result<Self, SchedulerError> {
        validate_lanes(lanes).map_err(SchedulerError::InvalidConfig)?;
        let total: usize = lanes.values().sum();
        if scheduler.concurrency() < total {
            warn!(
                scheduler_concurrency = scheduler.concurrency(),
                lane_total = total,
                "scheduler ceiling below the sum of lane ceilings; lanes may wait on each other"
            );
        }
        let worker = scheduler.process_continuously()?;
        info!(lanes = lanes.len(), concurrency = scheduler.concurrency(), "LaneOrchestrator::new");

        let table = lanes
            .iter()
            .map(|(name, ceiling)| (name.clone(), LaneState::new(*ceiling)))
            .collect();
        Ok(Self {
            lanes: Arc::new(Lanes {
                scheduler,
                table: Mutex::new(table),
                flush_scheduled: AtomicBool::new(false),
            }),
            pending: Arc::new(AtomicUsize::new(0)),
            batches: BatchRegistry::default(),
            _worker: worker,
        })
    }

    /// Run one task in `lane` and return its value or its error.
    ///
    /// # Errors
    ///
    /// The task's own error, `SchedulerError::TaskPanicked` if it panicked, or
    /// `SchedulerError::TaskDropped` if it was discarded before running.
    pub async fn execute<T, K>(&self, task: K, lane: &str) -> AppResult<T>
    where
        T: Send + 'static,
        K: Task<T>,
    {
        let (tx, rx) = oneshot::channel();
        let job = lane_job(Box::new(task), tx, PendingGuard::new(&self.pending));
        self.lanes.submit(lane, vec![job]);
        receive(rx).await
    }

    /// Run tasks in `lane` and return their values in submission order.
    ///
    /// # Errors
    ///
    /// The first failure to settle. Remaining tasks keep running but their
    /// values are discarded.
    pub async fn execute_batch<T>(&self, tasks: Vec<BoxedTask<T>>, lane: &str) -> AppResult<Vec<T>>
    where
        T: Send + 'static,
    {
        let receivers = self.submit_all(lane, tasks);
        futures::future::try_join_all(receivers.into_iter().map(receive)).await
    }

    /// Submit tasks to the fallback lane under `batch_id` without waiting.
    ///
    /// # Errors
    ///
    /// `SchedulerError::BatchAlreadyOpen` if `batch_id` has not been awaited yet.
    pub fn enqueue_batch<T>(&self, batch_id: &str, tasks: Vec<BoxedTask<T>>) -> Result<(), SchedulerError>
    where
        T: Send + 'static,
    {
        self.enqueue_batch_in_lane(batch_id, DEFAULT_LANE, tasks)
    }

    /// Submit tasks to `lane` under `batch_id` without waiting.
    ///
    /// # Errors
    ///
    /// `SchedulerError::BatchAlreadyOpen` if `batch_id` has not been awaited yet.
    pub fn enqueue_batch_in_lane<T>(
        &self,
        batch_id: &str,
        lane: &str,
        tasks: Vec<BoxedTask<T>>,
    ) -> Result<(), SchedulerError>
    where
        T: Send + 'static,
    {
        let (receivers, jobs) = self.jobs_for(tasks);
        self.batches.open(batch_id, receivers)?;
        debug!(batch_id, lane, count = jobs.len(), "batch enqueued");
        self.lanes.submit(lane, jobs);
        Ok(())
    }

    /// Wait for every task of a batch. Failed tasks yield `None`. The batch id
    /// becomes reusable once this returns or the returned future is dropped.
    ///
    /// # Errors
    ///
    /// - `SchedulerError::BatchNotFound` if no batch is open under `batch_id`
    /// - `SchedulerError::BatchAlreadyAwaited` if another caller is awaiting it
    /// - `SchedulerError::BatchTypeMismatch` if `T` differs from the enqueued type
    pub async fn await_batch<T>(&self, batch_id: &str) -> Result<Vec<Option<T>>, SchedulerError>
    where
        T: Send + 'static,
    {
        let (receivers, claim) = self.batches.claim::<T>(batch_id)?;
        let results = batch::collect(batch_id, receivers).await;
        drop(claim);
        Ok(results)
    }

    /// Whether `batch_id` is open (enqueued and not yet awaited to completion).
    pub fn is_batch_open(&self, batch_id: &str) -> bool {
        self.batches.contains(batch_id)
    }

    /// Number of open batches.
    pub fn open_batches(&self) -> usize {
        self.batches.len()
    }

    /// Tasks submitted but not yet settled, across all lanes and batches.
    pub fn pending_count(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    /// Snapshot of one lane, `None` for an unconfigured name.
    pub fn lane_stats(&self, lane: &str) -> Option<LaneStats> {
        self.lanes.table.lock().get(lane).map(|state| state.stats(lane))
    }

    /// Snapshots of all lanes, sorted by name.
    pub fn all_lane_stats(&self) -> Vec<LaneStats> {
        let mut stats: Vec<LaneStats> = self
            .lanes
            .table
            .lock()
            .iter()
            .map(|(name, state)| state.stats(name))
            .collect();
        stats.sort_by(|a, b| a.name.cmp(&b.name));
        stats
    }

    /// Shared scheduler, for global statistics.
    pub fn scheduler(&self) -> &TokenBucketScheduler<(), S> {
        &self.lanes.scheduler
    }

    /// Mint a fresh batch id.
    pub fn generate_batch_id(&self) -> String {
        format!("batch-{}", Uuid::new_v4())
    }

    fn jobs_for<T>(&self, tasks: Vec<BoxedTask<T>>) -> (Vec<Outcome<T>>, Vec<LaneJob<S>>)
    where
        T: Send + 'static,
    {
        tasks
            .into_iter()
            .map(|task| {
                let (tx, rx) = oneshot::channel();
                (rx, lane_job(task, tx, PendingGuard::new(&self.pending)))
            })
            .unzip()
    }

    fn submit_all<T>(&self, lane: &str, tasks: Vec<BoxedTask<T>>) -> Vec<Outcome<T>>
    where
        T: Send + 'static,
    {
        let (receivers, jobs) = self.jobs_for(tasks);
        self.lanes.submit(lane, jobs);
        receivers
    }
}
