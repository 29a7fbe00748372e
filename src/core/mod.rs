//! Core scheduling: the token bucket, the rate-limited queue, and the lane orchestrator.

pub mod audit;
pub mod error;
pub mod executor;
pub mod lane;
pub mod orchestrator;
pub mod scheduler;
pub mod token_bucket;

mod batch;

pub use audit::{AuditSink, DispatchEvent, InMemoryAuditSink};
pub use error::{AppResult, SchedulerError};
pub use executor::{task, BoxedTask, ResultCallback, Spawn, Task};
pub use lane::LaneStats;
pub use orchestrator::LaneOrchestrator;
pub use scheduler::{ContinuousWorker, SchedulerStats, TokenBucketScheduler};
pub use token_bucket::TokenBucket;
