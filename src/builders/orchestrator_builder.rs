//! Builders to construct lane orchestrators from configuration.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::config::{OrchestratorConfig, DEFAULT_LANE};
use crate::core::{AuditSink, LaneOrchestrator, SchedulerError, TokenBucketScheduler};

/// Build an orchestrator from a validated configuration on the current runtime.
///
/// # Errors
///
/// - `SchedulerError::InvalidConfig` if the configuration is invalid
/// - `SchedulerError::Runtime` if called outside a tokio runtime
pub fn build_orchestrator(cfg: &OrchestratorConfig) -> Result<LaneOrchestrator, SchedulerError> {
    OrchestratorBuilder::from_config(cfg.clone()).build()
}

/// Fluent construction of a [`LaneOrchestrator`].
///
/// Starts from the default provider lanes; [`lanes`](Self::lanes) replaces
/// them wholesale and [`lane`](Self::lane) adds or overrides one.
#[derive(Clone, Default)]
pub struct OrchestratorBuilder {
    config: OrchestratorConfig,
    audit: Option<Arc<dyn AuditSink>>,
}

impl OrchestratorBuilder {
    /// Create a builder with default throttle settings and lanes.
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an existing configuration.
    pub fn from_config(config: OrchestratorConfig) -> Self {
        Self { config, audit: None }
    }

    /// Global dispatch rate in tasks per second.
    pub fn rate(mut self, rate: f64) -> Self {
        self.config.throttle.rate = rate;
        self
    }

    /// Bucket capacity. Defaults to the rate.
    pub fn burst(mut self, burst: f64) -> Self {
        self.config.throttle.burst = Some(burst);
        self
    }

    /// Upper bound of the random delay added to each wake.
    pub fn jitter_ms(mut self, jitter_ms: u64) -> Self {
        self.config.throttle.jitter_ms = jitter_ms;
        self
    }

    /// Lower bound of each wake delay.
    pub fn min_tick_ms(mut self, min_tick_ms: u64) -> Self {
        self.config.throttle.min_tick_ms = min_tick_ms;
        self
    }

    /// Add or override one lane.
    pub fn lane(mut self, name: impl Into<String>, max_concurrent: usize) -> Self {
        self.config.lanes.insert(name.into(), max_concurrent);
        self
    }

    /// Replace all lanes. A missing fallback lane is added with ceiling 1.
    pub fn lanes<I, N>(mut self, lanes: I) -> Self
    where
        I: IntoIterator<Item = (N, usize)>,
        N: Into<String>,
    {
        let mut table: BTreeMap<String, usize> = lanes.into_iter().map(|(n, c)| (n.into(), c)).collect();
        table.entry(DEFAULT_LANE.to_string()).or_insert(1);
        self.config.lanes = table;
        self
    }

    /// Record every dispatch of the shared scheduler.
    pub fn audit(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.audit = Some(sink);
        self
    }

    /// Configuration the builder will use.
    pub const fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Validate and construct on the current tokio runtime.
    ///
    /// # Errors
    ///
    /// - `SchedulerError::InvalidConfig` if the configuration is invalid
    /// - `SchedulerError::Runtime` if called outside a tokio runtime
    pub fn build(self) -> Result<LaneOrchestrator, SchedulerError> {
        self.config.validate().map_err(SchedulerError::InvalidConfig)?;
        let mut scheduler = TokenBucketScheduler::new(self.config.scheduler_config())?;
        if let Some(sink) = self.audit {
            scheduler = scheduler.with_audit(sink);
        }
        LaneOrchestrator::with_scheduler(&self.config.lanes, scheduler)
    }
}
