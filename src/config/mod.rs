//! Configuration models for the scheduler and lane orchestrator.

pub mod lanes;
pub mod scheduler;

pub use lanes::{parse_lanes, validate_lanes, OrchestratorConfig, DEFAULT_LANE};
pub use scheduler::{SchedulerConfig, ENV_PREFIX};
