//! Per-lane slot accounting.
//!
//! A lane is an independent concurrency pool. Work submitted to a lane waits in
//! the lane's own queue and only leaves it together with a reserved slot, so a
//! backlog in one lane never occupies capacity another lane could use.

use std::collections::VecDeque;

use serde::Serialize;

/// Snapshot of one lane.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LaneStats {
    /// Lane name.
    pub name: String,
    /// Concurrency ceiling.
    pub max_concurrent: usize,
    /// Slots currently held.
    pub in_flight: usize,
    /// Tasks waiting for a slot.
    pub waiting: usize,
    /// Highest `in_flight` observed.
    pub peak_in_flight: usize,
    /// Tasks that settled with a value.
    pub completed: u64,
    /// Tasks that failed or panicked.
    pub failed: u64,
}

/// Slot counters and waiting work for one lane.
///
/// Invariant: `in_flight <= max_concurrent`.
#[derive(Debug)]
pub(crate) struct LaneState<J> {
    max_concurrent: usize,
    in_flight: usize,
    waiting: VecDeque<J>,
    peak_in_flight: usize,
    completed: u64,
    failed: u64,
}

impl<J> LaneState<J> {
    pub(crate) fn new(max_concurrent: usize) -> Self {
        Self {
            max_concurrent: max_concurrent.max(1),
            in_flight: 0,
            waiting: VecDeque::new(),
            peak_in_flight: 0,
            completed: 0,
            failed: 0,
        }
    }

    pub(crate) fn push<I>(&mut self, jobs: I)
    where
        I: IntoIterator<Item = J>,
    {
        self.waiting.extend(jobs);
    }

    /// Pop waiting jobs in FIFO order, reserving one slot for each.
    pub(crate) fn take_ready(&mut self) -> Vec<J> {
        let mut ready = Vec::new();
        while self.in_flight < self.max_concurrent {
            let Some(job) = self.waiting.pop_front() else {
                break;
            };
            self.in_flight += 1;
            ready.push(job);
        }
        self.peak_in_flight = self.peak_in_flight.max(self.in_flight);
        ready
    }

    /// Return one slot.
    pub(crate) fn release(&mut self, failed: bool) {
        debug_assert!(self.in_flight > 0, "lane slot released twice");
        self.in_flight = self.in_flight.saturating_sub(1);
        if failed {
            self.failed += 1;
        } else {
            self.completed += 1;
        }
    }

    pub(crate) fn stats(&self, name: &str) -> LaneStats {
        LaneStats {
            name: name.to_string(),
            max_concurrent: self.max_concurrent,
            in_flight: self.in_flight,
            waiting: self.waiting.len(),
            peak_in_flight: self.peak_in_flight,
            completed: self.completed,
            failed: self.failed,
        }
    }
}
