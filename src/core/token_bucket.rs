//! Token bucket used for global admission rate control.

use std::time::Duration;

use tokio::time::Instant;

/// Continuously refilled token bucket.
///
/// Holds up to `capacity` tokens, refilled at `refill_rate` tokens per second of
/// monotonic time. One whole token is consumed per admitted dispatch.
/// Invariant: `0 <= tokens <= capacity`.
#[derive(Debug, Clone)]
pub struct TokenBucket {
    capacity: f64,
    refill_rate: f64,
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    /// Create a full bucket. `capacity` is clamped to at least one token and a
    /// negative or NaN `refill_rate` is treated as zero.
    pub fn new(capacity: f64, refill_rate: f64, now: Instant) -> Self {
        let capacity = if capacity.is_finite() { capacity.max(1.0) } else { 1.0 };
        let refill_rate = if refill_rate.is_finite() && refill_rate > 0.0 {
            refill_rate
        } else {
            0.0
        };
        Self {
            capacity,
            refill_rate,
            tokens: capacity,
            last_refill: now,
        }
    }

    /// Add tokens proportional to the time elapsed since the previous refill.
    pub fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.tokens = elapsed
            .mul_add(self.refill_rate, self.tokens)
            .min(self.capacity);
        self.last_refill = now;
    }

    /// Take one whole token if available.
    pub fn try_consume(&mut self) -> bool {
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Time until the bucket next holds a whole token, or `None` when it never
    /// will (zero refill rate) or the wait does not fit in a [`Duration`].
    pub fn time_to_next_token(&self) -> Option<Duration> {
        if self.tokens >= 1.0 {
            return Some(Duration::ZERO);
        }
        if self.refill_rate <= 0.0 {
            return None;
        }
        Duration::try_from_secs_f64((1.0 - self.tokens) / self.refill_rate).ok()
    }

    /// Refill to capacity and restart the refill clock.
    pub fn reset(&mut self, now: Instant) {
        self.tokens = self.capacity;
        self.last_refill = now;
    }

    /// Tokens currently available, including fractional refill.
    pub const fn tokens(&self) -> f64 {
        self.tokens
    }

    /// Bucket capacity (burst size).
    pub const fn capacity(&self) -> f64 {
        self.capacity
    }

    /// Refill rate in tokens per second.
    pub const fn refill_rate(&self) -> f64 {
        self.refill_rate
    }
}
