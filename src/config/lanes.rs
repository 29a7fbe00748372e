//! Lane orchestrator configuration.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::scheduler::{env_var, SchedulerConfig};

/// Name of the fallback lane. Unknown lane names are routed here.
pub const DEFAULT_LANE: &str = "default";

fn default_lanes() -> BTreeMap<String, usize> {
    [
        ("anthropic", 2),
        ("spotify", 5),
        ("lastfm", 10),
        ("deezer", 10),
        (DEFAULT_LANE, 3),
    ]
    .into_iter()
    .map(|(name, ceiling)| (name.to_string(), ceiling))
    .collect()
}

/// Configuration for a [`LaneOrchestrator`](crate::core::LaneOrchestrator).
///
/// All lanes share one token bucket built from `throttle`; `throttle.concurrency`
/// is ignored because the shared scheduler's flat ceiling is derived from the
/// sum of lane ceilings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Global rate, burst, jitter and tick settings.
    #[serde(default)]
    pub throttle: SchedulerConfig,
    /// Lane name to concurrency ceiling. Must contain [`DEFAULT_LANE`].
    #[serde(default = "default_lanes")]
    pub lanes: BTreeMap<String, usize>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            throttle: SchedulerConfig::default(),
            lanes: default_lanes(),
        }
    }
}

impl OrchestratorConfig {
    /// Create a configuration with the default provider lanes.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set or replace one lane's ceiling.
    pub fn with_lane(mut self, name: impl Into<String>, max_concurrent: usize) -> Self {
        self.lanes.insert(name.into(), max_concurrent);
        self
    }

    /// Replace the global throttle settings.
    pub fn with_throttle(mut self, throttle: SchedulerConfig) -> Self {
        self.throttle = throttle;
        self
    }

    /// Scheduler configuration for the shared token bucket.
    pub fn scheduler_config(&self) -> SchedulerConfig {
        let total: usize = self.lanes.values().sum();
        self.throttle.clone().with_concurrency(total.max(1))
    }

    /// Validate lane ceilings and the shared throttle.
    pub fn validate(&self) -> Result<(), String> {
        self.throttle.validate()?;
        validate_lanes(&self.lanes)
    }

    /// Parse orchestrator configuration from a JSON string and validate.
    pub fn from_json_str(input: &str) -> Result<Self, String> {
        let cfg: Self = serde_json::from_str(input).map_err(|e| format!("parse error: {e}"))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Build configuration from the environment, loading a `.env` file first if present.
    ///
    /// Reads the throttle variables documented on [`SchedulerConfig::from_env`] plus
    /// `OUTBOUND_THROTTLE_LANES` as `name=ceiling` pairs separated by commas, which
    /// are merged over the default lanes.
    pub fn from_env() -> Result<Self, String> {
        let _ = dotenvy::dotenv();
        let mut cfg = Self::default();
        cfg.throttle.apply_env()?;
        if let Some(raw) = env_var::<String>("LANES")? {
            for (name, ceiling) in parse_lanes(&raw)? {
                cfg.lanes.insert(name, ceiling);
            }
        }
        cfg.validate()?;
        Ok(cfg)
    }
}

/// Check that the fallback lane exists and every ceiling is positive.
pub fn validate_lanes(lanes: &BTreeMap<String, usize>) -> Result<(), String> {
    if !lanes.contains_key(DEFAULT_LANE) {
        return Err(format!("lane `{DEFAULT_LANE}` must be configured"));
    }
    for (name, ceiling) in lanes {
        if name.trim().is_empty() {
            return Err("lane names must not be empty".into());
        }
        if *ceiling == 0 {
            return Err(format!("lane `{name}` invalid: max_concurrent must be greater than 0"));
        }
    }
    Ok(())
}

/// Parse `anthropic=2,spotify=5` into lane ceilings.
pub fn parse_lanes(raw: &str) -> Result<Vec<(String, usize)>, String> {
    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            let (name, ceiling) = entry
                .split_once('=')
                .ok_or_else(|| format!("lane entry `{entry}` is not `name=ceiling`"))?;
            let ceiling = ceiling
                .trim()
                .parse::<usize>()
                .map_err(|e| format!("lane `{}`: {e}", name.trim()))?;
            Ok((name.trim().to_string(), ceiling))
        })
        .collect()
}
