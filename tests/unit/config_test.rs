//! Tests for configuration validation

use outbound_throttle::config::{parse_lanes, OrchestratorConfig, SchedulerConfig, DEFAULT_LANE};

#[test]
fn test_scheduler_config_defaults() {
    let cfg = SchedulerConfig::default();
    assert!((cfg.rate - 40.0).abs() < f64::EPSILON);
    assert!(cfg.burst.is_none());
    assert!((cfg.effective_burst() - 40.0).abs() < f64::EPSILON);
    assert_eq!(cfg.concurrency, 10);
    assert_eq!(cfg.jitter_ms, 5);
    assert_eq!(cfg.min_tick_ms, 1);
    assert!(cfg.validate().is_ok());
}

#[test]
fn test_scheduler_config_invalid_rate() {
    assert!(SchedulerConfig::new().with_rate(f64::INFINITY).validate().is_err());
    assert!(SchedulerConfig::new().with_rate(-0.5).validate().is_err());
}

#[test]
fn test_scheduler_config_invalid_burst() {
    assert!(SchedulerConfig::new().with_burst(f64::NAN).validate().is_err());
}

#[test]
fn test_scheduler_config_from_json() {
    let cfg = SchedulerConfig::from_json_str(r#"{"rate": 2.5, "burst": 5}"#).unwrap();
    assert!((cfg.rate - 2.5).abs() < f64::EPSILON);
    assert_eq!(cfg.burst, Some(5.0));
    assert_eq!(cfg.concurrency, 10);

    assert!(SchedulerConfig::from_json_str(r#"{"rate": -1}"#).is_err());
    assert!(SchedulerConfig::from_json_str("not json").is_err());
}

#[test]
fn test_orchestrator_config_from_json() {
    let json = r#"{
        "throttle": { "rate": 10 },
        "lanes": { "default": 2, "anthropic": 1 }
    }"#;
    let cfg = OrchestratorConfig::from_json_str(json).unwrap();
    assert_eq!(cfg.lanes.len(), 2);
    assert_eq!(cfg.scheduler_config().concurrency, 3);
    assert!((cfg.scheduler_config().rate - 10.0).abs() < f64::EPSILON);
}

#[test]
fn test_orchestrator_config_requires_default_lane() {
    let json = r#"{ "lanes": { "anthropic": 1 } }"#;
    let err = OrchestratorConfig::from_json_str(json).unwrap_err();
    assert!(err.contains(DEFAULT_LANE));
}

#[test]
fn test_parse_lanes_round_trip_into_config() {
    let mut cfg = OrchestratorConfig::default();
    for (name, ceiling) in parse_lanes("spotify=7,discogs=2").unwrap() {
        cfg = cfg.with_lane(name, ceiling);
    }
    assert_eq!(cfg.lanes.get("spotify"), Some(&7));
    assert_eq!(cfg.lanes.get("discogs"), Some(&2));
    assert!(cfg.validate().is_ok());
}
