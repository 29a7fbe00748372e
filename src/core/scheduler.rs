//! Token-bucket scheduler: one FIFO queue gated by a global token bucket and a
//! flat concurrency ceiling.
//!
//! All counters live in one `SchedulerState` record behind a single `parking_lot` mutex
//! and change only through its named transitions (`refill`, `take_next`,
//! `settle_*`, `schedule_wake`). The lock is never held while a task, a callback, or
//! a discarded task's destructor runs.
//!
//! Two drains exist and are mutually exclusive per instance:
//!
//! - [`TokenBucketScheduler::process_all`] moves the current queue into a
//!   fixed result arena and resolves once `finished == total`.
//! - [`TokenBucketScheduler::process_continuously`] returns a
//!   [`ContinuousWorker`] that keeps dispatching newly enqueued tasks until it
//!   is stopped or dropped.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rand::Rng;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

use crate::config::SchedulerConfig;
use crate::core::audit::{AuditSink, DispatchEvent};
use crate::core::error::{AppResult, SchedulerError};
use crate::core::executor::{invoke_guarded, run_guarded, BoxedTask, ResultCallback, Spawn, Task};
use crate::core::token_bucket::TokenBucket;
use crate::runtime::TokioSpawner;

/// Wake delay used when the bucket can never refill (zero rate).
const STALLED_WAKE: Duration = Duration::from_secs(1);

/// Point-in-time scheduler statistics.
#[derive(Debug, Clone, Default)]
pub struct SchedulerStats {
    /// Tasks not yet dispatched.
    pub queued: usize,
    /// Tasks currently running.
    pub running: usize,
    /// Tokens available right now.
    pub tokens: f64,
    /// Total dispatches since construction.
    pub dispatched: u64,
    /// Tasks that settled with a value.
    pub succeeded: u64,
    /// Tasks that failed or panicked.
    pub failed: u64,
    /// Highest number of simultaneously running tasks observed.
    pub peak_running: usize,
}

/// Result arena for one `process_all` call.
struct BatchRun<T> {
    run_id: u64,
    tasks: Vec<Option<BoxedTask<T>>>,
    results: Vec<Option<T>>,
    issued: usize,
    finished: usize,
    on_result: Option<ResultCallback<T>>,
    done: Option<oneshot::Sender<Vec<Option<T>>>>,
}

impl<T> BatchRun<T> {
    fn total(&self) -> usize {
        self.tasks.len()
    }
}

struct ContinuousRun<T> {
    worker_id: u64,
    on_result: Option<ResultCallback<T>>,
}

enum Drain<T> {
    Idle,
    Batch(BatchRun<T>),
    Continuous(ContinuousRun<T>),
}

/// Where a dispatched task reports its outcome.
enum Origin<T> {
    Batch { run_id: u64 },
    Continuous { on_result: Option<ResultCallback<T>> },
}

struct Launch<T> {
    task: BoxedTask<T>,
    index: usize,
    origin: Origin<T>,
}

#[derive(Default)]
struct WakeTimer {
    generation: u64,
    armed: bool,
}

#[derive(Default)]
struct Counters {
    dispatched: u64,
    succeeded: u64,
    failed: u64,
    peak_running: usize,
}

/// Mutable scheduler state. Only the transitions below touch it.
struct SchedulerState<T> {
    bucket: TokenBucket,
    queue: VecDeque<BoxedTask<T>>,
    running: usize,
    drain: Drain<T>,
    continuous_issued: usize,
    next_run_id: u64,
    wake: WakeTimer,
    counters: Counters,
    audit: Option<Arc<dyn AuditSink>>,
}

impl<T> SchedulerState<T> {
    fn has_work(&self) -> bool {
        match &self.drain {
            Drain::Idle => false,
            Drain::Batch(run) => run.issued < run.total(),
            Drain::Continuous(_) => !self.queue.is_empty(),
        }
    }

    fn undispatched(&self) -> usize {
        let in_run = match &self.drain {
            Drain::Batch(run) => run.total() - run.issued,
            _ => 0,
        };
        self.queue.len() + in_run
    }

    /// Take the next task in submission order. Callers consume a token first.
    fn take_next(&mut self) -> Option<Launch<T>> {
        match &mut self.drain {
            Drain::Idle => None,
            Drain::Batch(run) => {
                if run.issued >= run.total() {
                    return None;
                }
                let index = run.issued;
                run.issued += 1;
                debug_assert!(run.issued <= run.total());
                run.tasks[index].take().map(|task| Launch {
                    task,
                    index,
                    origin: Origin::Batch { run_id: run.run_id },
                })
            }
            Drain::Continuous(run) => {
                let task = self.queue.pop_front()?;
                let index = self.continuous_issued;
                self.continuous_issued += 1;
                Some(Launch {
                    task,
                    index,
                    origin: Origin::Continuous {
                        on_result: run.on_result.clone(),
                    },
                })
            }
        }
    }

    /// Count a launch. Returns the audit event to report once the lock is released.
    fn record_dispatch(&mut self, index: usize, now: Instant) -> Option<DispatchEvent> {
        self.running += 1;
        self.counters.dispatched += 1;
        self.counters.peak_running = self.counters.peak_running.max(self.running);
        self.audit.as_ref().map(|_| DispatchEvent {
            sequence: self.counters.dispatched,
            index,
            dispatched_at: now,
            tokens_left: self.bucket.tokens(),
        })
    }

    fn record_settlement(&mut self, succeeded: bool) {
        self.running = self.running.saturating_sub(1);
        if succeeded {
            self.counters.succeeded += 1;
        } else {
            self.counters.failed += 1;
        }
    }

    /// Arm the wake timer if work is waiting on tokens. Returns the delay and
    /// the generation the timer must match when it fires.
    fn schedule_wake(&mut self, concurrency: usize, min_tick: Duration, jitter_ms: u64) -> Option<(u64, Duration)> {
        if self.wake.armed || !self.has_work() || self.running >= concurrency {
            return None;
        }
        let jitter = if jitter_ms == 0 {
            Duration::ZERO
        } else {
            Duration::from_millis(rand::rng().random_range(0..=jitter_ms))
        };
        let delay = self
            .bucket
            .time_to_next_token()
            .map_or(STALLED_WAKE, |wait| wait.saturating_add(jitter))
            .max(min_tick);
        self.wake.armed = true;
        Some((self.wake.generation, delay))
    }

    fn cancel_wake(&mut self) {
        self.wake.generation += 1;
        self.wake.armed = false;
    }
}

struct Inner<T, S> {
    concurrency: usize,
    min_tick: Duration,
    jitter_ms: u64,
    state: Mutex<SchedulerState<T>>,
    spawner: S,
}

impl<T, S> Inner<T, S>
where
    T: Send + 'static,
    S: Spawn,
{
    /// One dispatch pass: refill, launch everything tokens and slots allow,
    /// then arm a wake if work is still waiting on tokens.
    fn pump(self: &Arc<Self>) {
        let (launches, events, audit, wake) = {
            let mut st = self.state.lock();
            let now = Instant::now();
            st.bucket.refill(now);

            let mut launches = Vec::new();
            let mut events = Vec::new();
            while st.running < self.concurrency && st.has_work() {
                if !st.bucket.try_consume() {
                    break;
                }
                if let Some(launch) = st.take_next() {
                    events.extend(st.record_dispatch(launch.index, now));
                    launches.push(launch);
                }
            }
            let wake = st.schedule_wake(self.concurrency, self.min_tick, self.jitter_ms);
            (launches, events, st.audit.clone(), wake)
        };

        if !launches.is_empty() {
            trace!(count = launches.len(), "dispatch pass launched tasks");
        }
        if let Some(audit) = audit {
            for event in events {
                audit.record(event);
            }
        }
        if let Some((generation, delay)) = wake {
            trace!(?delay, "arming wake timer");
            let inner = Arc::clone(self);
            self.spawner.spawn(async move {
                tokio::time::sleep(delay).await;
                inner.on_wake(generation);
            });
        }
        for launch in launches {
            self.launch(launch);
        }
    }

    fn on_wake(self: &Arc<Self>, generation: u64) {
        {
            let mut st = self.state.lock();
            if st.wake.generation != generation || !st.wake.armed {
                return;
            }
            st.wake.armed = false;
        }
        self.pump();
    }

    fn launch(self: &Arc<Self>, launch: Launch<T>) {
        let Launch { task, index, origin } = launch;
        let inner = Arc::clone(self);
        self.spawner.spawn(async move {
            debug!(index, "task dispatched");
            let outcome = run_guarded(task).await;
            inner.settle(index, origin, outcome);
        });
    }

    fn settle(self: &Arc<Self>, index: usize, origin: Origin<T>, outcome: AppResult<T>) {
        let succeeded = outcome.is_ok();
        let value = match outcome {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(index, error = %e, "task failed; recording empty result");
                None
            }
        };

        match origin {
            Origin::Batch { run_id } => self.settle_batch(run_id, index, value, succeeded),
            Origin::Continuous { on_result } => {
                let total = {
                    let mut st = self.state.lock();
                    st.record_settlement(succeeded);
                    st.continuous_issued + st.queue.len()
                };
                if let Some(callback) = on_result {
                    invoke_guarded(&callback, value.as_ref(), index, total);
                }
            }
        }

        self.pump();
    }

    fn settle_batch(&self, run_id: u64, index: usize, value: Option<T>, succeeded: bool) {
        let callback = {
            let mut st = self.state.lock();
            st.record_settlement(succeeded);
            match &st.drain {
                Drain::Batch(run) if run.run_id == run_id => run.on_result.clone().map(|cb| (cb, run.total())),
                _ => None,
            }
        };
        if let Some((callback, total)) = callback {
            invoke_guarded(&callback, value.as_ref(), index, total);
        }

        let mut stale = None;
        let completed = {
            let mut guard = self.state.lock();
            let st = &mut *guard;
            match &mut st.drain {
                Drain::Batch(run) if run.run_id == run_id => {
                    run.results[index] = value;
                    run.finished += 1;
                    if run.finished == run.total() {
                        match std::mem::replace(&mut st.drain, Drain::Idle) {
                            Drain::Batch(run) => Some(run),
                            _ => None,
                        }
                    } else {
                        None
                    }
                }
                _ => {
                    stale = value;
                    None
                }
            }
        };
        drop(stale);

        if let Some(run) = completed {
            complete_run(run);
        }
    }
}

/// Deliver a finished arena to the awaiting `process_all` caller, exactly once.
fn complete_run<T>(mut run: BatchRun<T>) {
    info!(total = run.total(), "process_all: drain complete");
    if let Some(done) = run.done.take() {
        let _ = done.send(std::mem::take(&mut run.results));
    }
}

/// FIFO task queue admitted by a token bucket and a flat concurrency ceiling.
///
/// Cloning yields another handle to the same scheduler.
///
/// ```rust,ignore
/// let scheduler = TokenBucketScheduler::new(SchedulerConfig::new().with_rate(10.0))?;
/// for track in tracks {
///     scheduler.enqueue(move || async move { spotify.lookup(track).await });
/// }
/// let results: Vec<Option<Lookup>> = scheduler.process_all().await?;
/// ```
pub struct TokenBucketScheduler<T, S = TokioSpawner> {
    inner: Arc<Inner<T, S>>,
}

impl<T, S> Clone for TokenBucketScheduler<T, S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> TokenBucketScheduler<T, TokioSpawner>
where
    T: Send + 'static,
{
    /// Create a scheduler that launches tasks on the current tokio runtime.
    ///
    /// # Errors
    ///
    /// - `SchedulerError::InvalidConfig` if the configuration is invalid
    /// - `SchedulerError::Runtime` if called outside a tokio runtime
    pub fn new(config: SchedulerConfig) -> Result<Self, SchedulerError> {
        Self::with_spawner(config, TokioSpawner::current()?)
    }
}

impl<T, S> TokenBucketScheduler<T, S>
where
    T: Send + 'static,
    S: Spawn,
{
    /// Create a scheduler that launches tasks through `spawner`.
    pub fn with_spawner(config: SchedulerConfig, spawner: S) -> Result<Self, SchedulerError> {
        config.validate().map_err(SchedulerError::InvalidConfig)?;
        let bucket = TokenBucket::new(config.effective_burst(), config.rate, Instant::now());
        debug!(
            rate = config.rate,
            burst = bucket.capacity(),
            concurrency = config.effective_concurrency(),
            "TokenBucketScheduler::new"
        );
        Ok(Self {
            inner: Arc::new(Inner {
                concurrency: config.effective_concurrency(),
                min_tick: config.min_tick(),
                jitter_ms: config.jitter_ms,
                state: Mutex::new(SchedulerState {
                    bucket,
                    queue: VecDeque::new(),
                    running: 0,
                    drain: Drain::Idle,
                    continuous_issued: 0,
                    next_run_id: 0,
                    wake: WakeTimer::default(),
                    counters: Counters::default(),
                    audit: None,
                }),
                spawner,
            }),
        })
    }

    /// Attach a dispatch audit sink.
    pub fn with_audit(self, audit: Arc<dyn AuditSink>) -> Self {
        self.inner.state.lock().audit = Some(audit);
        self
    }

    /// Append a task to the queue. Never rejects; wakes an active continuous worker.
    pub fn enqueue<K>(&self, task: K)
    where
        K: Task<T>,
    {
        self.enqueue_boxed(Box::new(task));
    }

    /// Append an already boxed task.
    pub fn enqueue_boxed(&self, task: BoxedTask<T>) {
        self.enqueue_many(std::iter::once(task));
    }

    /// Append several tasks with a single wake.
    pub fn enqueue_many<I>(&self, tasks: I)
    where
        I: IntoIterator<Item = BoxedTask<T>>,
    {
        let continuous = {
            let mut st = self.inner.state.lock();
            st.queue.extend(tasks);
            matches!(st.drain, Drain::Continuous(_))
        };
        if continuous {
            self.inner.pump();
        }
    }

    /// Drain the current queue and return results in submission order.
    ///
    /// Failed or panicked tasks are logged and yield `None`; this call itself
    /// fails only on misuse.
    ///
    /// # Errors
    ///
    /// - `SchedulerError::AlreadyProcessing` if another drain is active
    pub async fn process_all(&self) -> Result<Vec<Option<T>>, SchedulerError> {
        self.drain_queue(None).await
    }

    /// [`process_all`](Self::process_all) with a progress callback invoked as
    /// `on_result(value, index, total)` once per settled task.
    ///
    /// # Errors
    ///
    /// - `SchedulerError::AlreadyProcessing` if another drain is active
    pub async fn process_all_with_callback<F>(&self, on_result: F) -> Result<Vec<Option<T>>, SchedulerError>
    where
        F: Fn(Option<&T>, usize, usize) -> AppResult<()> + Send + Sync + 'static,
    {
        self.drain_queue(Some(Arc::new(on_result))).await
    }

    async fn drain_queue(&self, on_result: Option<ResultCallback<T>>) -> Result<Vec<Option<T>>, SchedulerError> {
        let done = {
            let mut st = self.inner.state.lock();
            ensure_idle(&st.drain)?;
            if st.queue.is_empty() {
                return Ok(Vec::new());
            }
            let tasks: Vec<Option<BoxedTask<T>>> = st.queue.drain(..).map(Some).collect();
            let total = tasks.len();
            let (tx, rx) = oneshot::channel();
            st.next_run_id += 1;
            st.drain = Drain::Batch(BatchRun {
                run_id: st.next_run_id,
                tasks,
                results: std::iter::repeat_with(|| None).take(total).collect(),
                issued: 0,
                finished: 0,
                on_result,
                done: Some(tx),
            });
            info!(total, "process_all: draining queue");
            rx
        };
        self.inner.pump();
        done.await.map_err(|_| SchedulerError::TaskDropped)
    }

    /// Start a drain that never completes on its own and dispatches tasks as
    /// they are enqueued, including from inside running tasks.
    ///
    /// # Errors
    ///
    /// - `SchedulerError::AlreadyProcessing` if another drain is active
    pub fn process_continuously(&self) -> Result<ContinuousWorker<T, S>, SchedulerError> {
        self.start_continuous(None)
    }

    /// [`process_continuously`](Self::process_continuously) with a progress callback.
    ///
    /// `total` passed to the callback is the number of tasks seen by the worker so far.
    ///
    /// # Errors
    ///
    /// - `SchedulerError::AlreadyProcessing` if another drain is active
    pub fn process_continuously_with_callback<F>(&self, on_result: F) -> Result<ContinuousWorker<T, S>, SchedulerError>
    where
        F: Fn(Option<&T>, usize, usize) -> AppResult<()> + Send + Sync + 'static,
    {
        self.start_continuous(Some(Arc::new(on_result)))
    }

    fn start_continuous(&self, on_result: Option<ResultCallback<T>>) -> Result<ContinuousWorker<T, S>, SchedulerError> {
        let worker_id = {
            let mut st = self.inner.state.lock();
            ensure_idle(&st.drain)?;
            st.next_run_id += 1;
            st.continuous_issued = 0;
            let worker_id = st.next_run_id;
            st.drain = Drain::Continuous(ContinuousRun { worker_id, on_result });
            worker_id
        };
        info!(worker_id, "continuous worker started");
        self.inner.pump();
        Ok(ContinuousWorker {
            scheduler: self.clone(),
            worker_id,
        })
    }

    /// Discard undispatched tasks, refill the bucket, and cancel the pending wake.
    ///
    /// Running tasks are unaffected. Tasks of an active `process_all` that were
    /// never dispatched yield `None`, so that drain still resolves.
    pub fn clear(&self) {
        let mut discarded: Vec<BoxedTask<T>> = Vec::new();
        let completed = {
            let mut guard = self.inner.state.lock();
            let st = &mut *guard;
            discarded.extend(st.queue.drain(..));
            st.bucket.reset(Instant::now());
            st.cancel_wake();

            let mut completed = None;
            if let Drain::Batch(run) = &mut st.drain {
                let total = run.total();
                let issued = run.issued;
                discarded.extend(run.tasks[issued..].iter_mut().filter_map(Option::take));
                run.finished += total - issued;
                run.issued = total;
                if run.finished == total {
                    if let Drain::Batch(run) = std::mem::replace(&mut st.drain, Drain::Idle) {
                        completed = Some(run);
                    }
                }
            }
            completed
        };
        info!(discarded = discarded.len(), "scheduler cleared");
        drop(discarded);
        if let Some(run) = completed {
            complete_run(run);
        }
    }

    /// Number of tasks not yet dispatched.
    pub fn size(&self) -> usize {
        self.inner.state.lock().undispatched()
    }

    /// Whether a drain (batch or continuous) is active.
    pub fn is_processing(&self) -> bool {
        !matches!(self.inner.state.lock().drain, Drain::Idle)
    }

    /// Snapshot of queue, bucket and lifetime counters.
    pub fn stats(&self) -> SchedulerStats {
        let st = self.inner.state.lock();
        let mut bucket = st.bucket.clone();
        bucket.refill(Instant::now());
        SchedulerStats {
            queued: st.undispatched(),
            running: st.running,
            tokens: bucket.tokens(),
            dispatched: st.counters.dispatched,
            succeeded: st.counters.succeeded,
            failed: st.counters.failed,
            peak_running: st.counters.peak_running,
        }
    }

    /// Effective flat concurrency ceiling.
    pub fn concurrency(&self) -> usize {
        self.inner.concurrency
    }

    pub(crate) fn spawner(&self) -> &S {
        &self.inner.spawner
    }
}

fn ensure_idle<T>(drain: &Drain<T>) -> Result<(), SchedulerError> {
    match drain {
        Drain::Idle => Ok(()),
        Drain::Batch(_) => Err(SchedulerError::AlreadyProcessing("process_all")),
        Drain::Continuous(_) => Err(SchedulerError::AlreadyProcessing("a continuous worker")),
    }
}

/// Handle to a running continuous drain. Stopping (or dropping) it returns the
/// scheduler to idle; queued tasks stay queued and running tasks finish.
pub struct ContinuousWorker<T, S = TokioSpawner>
where
    T: Send + 'static,
    S: Spawn,
{
    scheduler: TokenBucketScheduler<T, S>,
    worker_id: u64,
}

impl<T, S> ContinuousWorker<T, S>
where
    T: Send + 'static,
    S: Spawn,
{
    /// Stop dispatching. Idempotent.
    pub fn stop(&self) {
        let stopped = {
            let mut st = self.scheduler.inner.state.lock();
            match &st.drain {
                Drain::Continuous(run) if run.worker_id == self.worker_id => {
                    st.drain = Drain::Idle;
                    st.cancel_wake();
                    true
                }
                _ => false,
            }
        };
        if stopped {
            info!(worker_id = self.worker_id, "continuous worker stopped");
        }
    }

    /// Whether this worker is still the scheduler's active drain.
    pub fn is_running(&self) -> bool {
        matches!(
            &self.scheduler.inner.state.lock().drain,
            Drain::Continuous(run) if run.worker_id == self.worker_id
        )
    }

    /// Scheduler this worker drains.
    pub fn scheduler(&self) -> &TokenBucketScheduler<T, S> {
        &self.scheduler
    }
}

impl<T, S> Drop for ContinuousWorker<T, S>
where
    T: Send + 'static,
    S: Spawn,
{
    fn drop(&mut self) {
        self.stop();
    }
}
