//! # Outbound Throttle
//!
//! Rate-limited, concurrency-bounded execution of outbound API calls.
//!
//! Callers that hit several third-party providers (an LLM API, music catalogs,
//! metadata services) need two limits at once: a global request rate so the
//! process never bursts past what providers tolerate, and per-provider
//! concurrency so a slow provider cannot starve the others. This crate layers
//! the two:
//!
//! - **[`TokenBucketScheduler`](core::TokenBucketScheduler)**: a FIFO queue of
//!   async tasks admitted by a token bucket (`rate`, `burst`) and a flat
//!   concurrency ceiling. Drain it once with `process_all` (results in
//!   submission order, failures become `None`) or keep a
//!   [`ContinuousWorker`](core::ContinuousWorker) running.
//! - **[`LaneOrchestrator`](core::LaneOrchestrator)**: named lanes with their
//!   own concurrency ceilings sharing one scheduler, so the bucket bounds the
//!   aggregate rate while each lane is an independent pool. Failures propagate
//!   to the caller.
//!
//! ## Queue tier
//!
//! ```rust,ignore
//! use outbound_throttle::config::SchedulerConfig;
//! use outbound_throttle::core::TokenBucketScheduler;
//!
//! let scheduler = TokenBucketScheduler::new(SchedulerConfig::new().with_rate(10.0))?;
//! for id in track_ids {
//!     let client = client.clone();
//!     scheduler.enqueue(move || async move { client.track(id).await });
//! }
//! let tracks = scheduler.process_all().await?;
//! ```
//!
//! ## Lane tier
//!
//! ```rust,ignore
//! use outbound_throttle::builders::OrchestratorBuilder;
//!
//! let orchestrator = OrchestratorBuilder::new()
//!     .rate(40.0)
//!     .lane("spotify", 5)
//!     .build()?;
//! let artist = orchestrator
//!     .execute(move || async move { spotify.artist(id).await }, "spotify")
//!     .await?;
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// Core scheduling: token bucket, queue scheduler, lanes, and errors.
pub mod core;
/// Configuration models for the scheduler and the lane orchestrator.
pub mod config;
/// Builders to construct orchestrators from configuration.
pub mod builders;
/// Runtime adapters.
pub mod runtime;
/// Shared utilities.
pub mod util;

pub use builders::{build_orchestrator, OrchestratorBuilder};
pub use config::{OrchestratorConfig, SchedulerConfig};
pub use core::{AppResult, LaneOrchestrator, SchedulerError, TokenBucketScheduler};
