//! Dispatch audit sinks.
//!
//! The scheduler reports every admitted dispatch to an optional sink. The
//! in-memory sink keeps a bounded ring, enough to check the global rate over a
//! sliding window in tests or when debugging throttling.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

/// One admitted dispatch.
#[derive(Debug, Clone)]
pub struct DispatchEvent {
    /// Monotonic dispatch counter for the scheduler instance.
    pub sequence: u64,
    /// Submission index within the current drain.
    pub index: usize,
    /// When the task was launched.
    pub dispatched_at: Instant,
    /// Tokens left in the bucket after this dispatch.
    pub tokens_left: f64,
}

/// Audit sink abstraction.
pub trait AuditSink: Send + Sync {
    /// Record a dispatch.
    fn record(&self, event: DispatchEvent);
}

/// In-memory audit sink for testing and dev. Clones share the same buffer.
#[derive(Clone)]
pub struct InMemoryAuditSink {
    events: Arc<Mutex<VecDeque<DispatchEvent>>>,
    max_events: usize,
}

impl InMemoryAuditSink {
    /// Create a new in-memory sink with a bounded buffer.
    pub fn new(max_events: usize) -> Self {
        let max_events = max_events.max(1);
        Self {
            events: Arc::new(Mutex::new(VecDeque::with_capacity(max_events.min(1024)))),
            max_events,
        }
    }

    /// Retrieve a snapshot of stored events, oldest first.
    pub fn events(&self) -> Vec<DispatchEvent> {
        self.events.lock().iter().cloned().collect()
    }

    /// Number of stored events.
    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    /// Whether no events are stored.
    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }

    /// Largest number of dispatches observed inside any window of length `window`.
    pub fn max_in_window(&self, window: Duration) -> usize {
        if window.is_zero() {
            return 0;
        }
        let times: Vec<Instant> = self.events.lock().iter().map(|e| e.dispatched_at).collect();
        let mut best = 0;
        let mut start = 0;
        for end in 0..times.len() {
            while times[end].saturating_duration_since(times[start]) >= window {
                start += 1;
            }
            best = best.max(end - start + 1);
        }
        best
    }
}

impl AuditSink for InMemoryAuditSink {
    fn record(&self, event: DispatchEvent) {
        let mut events = self.events.lock();
        if events.len() >= self.max_events {
            events.pop_front();
        }
        events.push_back(event);
    }
}
