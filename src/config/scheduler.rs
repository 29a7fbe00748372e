//! Token-bucket scheduler configuration.

use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Prefix shared by all environment variables read by [`SchedulerConfig::from_env`].
pub const ENV_PREFIX: &str = "OUTBOUND_THROTTLE";

fn default_rate() -> f64 {
    40.0
}

fn default_concurrency() -> usize {
    10
}

fn default_jitter_ms() -> u64 {
    5
}

fn default_min_tick_ms() -> u64 {
    1
}

/// Configuration for a [`TokenBucketScheduler`](crate::core::TokenBucketScheduler).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Refill rate in tokens (dispatches) per second.
    #[serde(default = "default_rate")]
    pub rate: f64,
    /// Bucket capacity. Defaults to `rate` when unset.
    #[serde(default)]
    pub burst: Option<f64>,
    /// Flat ceiling on simultaneously running tasks. Clamped to at least 1.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// Upper bound of the uniform random delay added to each wake.
    #[serde(default = "default_jitter_ms")]
    pub jitter_ms: u64,
    /// Shortest wake delay the tick loop will schedule.
    #[serde(default = "default_min_tick_ms")]
    pub min_tick_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            rate: default_rate(),
            burst: None,
            concurrency: default_concurrency(),
            jitter_ms: default_jitter_ms(),
            min_tick_ms: default_min_tick_ms(),
        }
    }
}

impl SchedulerConfig {
    /// Create a configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the refill rate (tokens per second).
    pub const fn with_rate(mut self, rate: f64) -> Self {
        self.rate = rate;
        self
    }

    /// Set the bucket capacity.
    pub const fn with_burst(mut self, burst: f64) -> Self {
        self.burst = Some(burst);
        self
    }

    /// Set the flat concurrency ceiling.
    pub const fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    /// Set the wake jitter upper bound in milliseconds.
    pub const fn with_jitter_ms(mut self, jitter_ms: u64) -> Self {
        self.jitter_ms = jitter_ms;
        self
    }

    /// Set the minimum wake delay in milliseconds.
    pub const fn with_min_tick_ms(mut self, min_tick_ms: u64) -> Self {
        self.min_tick_ms = min_tick_ms;
        self
    }

    /// Bucket capacity actually used: `burst`, else `rate`, never below one token.
    pub fn effective_burst(&self) -> f64 {
        self.burst.unwrap_or(self.rate).max(1.0)
    }

    /// Concurrency ceiling actually used, never below one.
    pub fn effective_concurrency(&self) -> usize {
        self.concurrency.max(1)
    }

    /// Minimum wake delay as a `Duration`.
    pub const fn min_tick(&self) -> Duration {
        Duration::from_millis(self.min_tick_ms)
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), String> {
        if !self.rate.is_finite() || self.rate < 0.0 {
            return Err(format!("rate must be a finite, non-negative number (got {})", self.rate));
        }
        if let Some(burst) = self.burst {
            if !burst.is_finite() || burst < 0.0 {
                return Err(format!("burst must be a finite, non-negative number (got {burst})"));
            }
        }
        Ok(())
    }

    /// Parse scheduler configuration from a JSON string and validate.
    pub fn from_json_str(input: &str) -> Result<Self, String> {
        let cfg: Self = serde_json::from_str(input).map_err(|e| format!("parse error: {e}"))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Build configuration from the environment, loading a `.env` file first if present.
    ///
    /// Reads `OUTBOUND_THROTTLE_RATE`, `_BURST`, `_CONCURRENCY`, `_JITTER_MS` and
    /// `_MIN_TICK_MS`; unset variables keep their defaults.
    pub fn from_env() -> Result<Self, String> {
        let _ = dotenvy::dotenv();
        let mut cfg = Self::default();
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub(crate) fn apply_env(&mut self) -> Result<(), String> {
        if let Some(rate) = env_var("RATE")? {
            self.rate = rate;
        }
        if let Some(burst) = env_var("BURST")? {
            self.burst = Some(burst);
        }
        if let Some(concurrency) = env_var("CONCURRENCY")? {
            self.concurrency = concurrency;
        }
        if let Some(jitter_ms) = env_var("JITTER_MS")? {
            self.jitter_ms = jitter_ms;
        }
        if let Some(min_tick_ms) = env_var("MIN_TICK_MS")? {
            self.min_tick_ms = min_tick_ms;
        }
        Ok(())
    }
}

/// Read and parse `OUTBOUND_THROTTLE_<suffix>`.
pub(crate) fn env_var<T>(suffix: &str) -> Result<Option<T>, String>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let name = format!("{ENV_PREFIX}_{suffix}");
    match std::env::var(&name) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| format!("{name}: {e}")),
        Err(std::env::VarError::NotPresent) => Ok(None),
        Err(e) => Err(format!("{name}: {e}")),
    }
}
