//! Tests for builder modules

use outbound_throttle::builders::{build_orchestrator, OrchestratorBuilder};
use outbound_throttle::config::{OrchestratorConfig, DEFAULT_LANE};
use outbound_throttle::core::SchedulerError;

#[test]
fn test_builder_defaults() {
    let builder = OrchestratorBuilder::new();
    let config = builder.config();
    assert!((config.throttle.rate - 40.0).abs() < f64::EPSILON);
    assert_eq!(config.lanes.get("anthropic"), Some(&2));
    assert_eq!(config.lanes.get(DEFAULT_LANE), Some(&3));
}

#[test]
fn test_builder_lane_override() {
    let builder = OrchestratorBuilder::new().lane("spotify", 8).lane("musicbrainz", 1);
    assert_eq!(builder.config().lanes.get("spotify"), Some(&8));
    assert_eq!(builder.config().lanes.get("musicbrainz"), Some(&1));
}

#[tokio::test]
async fn test_builder_builds_lanes() {
    let orchestrator = OrchestratorBuilder::new()
        .rate(20.0)
        .lanes([("anthropic", 2), (DEFAULT_LANE, 4)])
        .build()
        .unwrap();

    let stats = orchestrator.all_lane_stats();
    assert_eq!(stats.len(), 2);
    assert_eq!(orchestrator.lane_stats(DEFAULT_LANE).unwrap().max_concurrent, 4);
    assert_eq!(orchestrator.scheduler().concurrency(), 6);
}

#[tokio::test]
async fn test_builder_rejects_invalid_rate() {
    let result = OrchestratorBuilder::new().rate(-1.0).build();
    assert!(matches!(result, Err(SchedulerError::InvalidConfig(_))));
}

#[test]
fn test_build_outside_runtime_fails() {
    let result = build_orchestrator(&OrchestratorConfig::default());
    assert!(matches!(result, Err(SchedulerError::Runtime(_))));
}
