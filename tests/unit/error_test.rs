//! Tests for error types

use outbound_throttle::core::{AppResult, SchedulerError};

#[test]
fn test_already_processing_error() {
    let err = SchedulerError::AlreadyProcessing("process_all");
    assert_eq!(
        format!("{err}"),
        "scheduler is already processing: process_all is in flight"
    );
}

#[test]
fn test_batch_errors_name_the_batch() {
    let open = SchedulerError::BatchAlreadyOpen("nightly-sync".to_string());
    assert_eq!(
        format!("{open}"),
        "batch `nightly-sync` is already open; await it before reusing the id"
    );
    let missing = SchedulerError::BatchNotFound("nightly-sync".to_string());
    assert_eq!(format!("{missing}"), "batch `nightly-sync` not found");
}

#[test]
fn test_task_errors() {
    assert_eq!(
        format!("{}", SchedulerError::TaskPanicked("index out of bounds".into())),
        "task panicked: index out of bounds"
    );
    assert_eq!(
        format!("{}", SchedulerError::TaskDropped),
        "task was dropped before it settled"
    );
}

#[test]
fn test_invalid_config_error() {
    let err = SchedulerError::InvalidConfig("rate must be finite".to_string());
    assert_eq!(format!("{err}"), "invalid configuration: rate must be finite");
}

#[test]
fn test_scheduler_error_survives_anyhow() {
    fn fails() -> AppResult<()> {
        Err(SchedulerError::BatchTypeMismatch("b1".into()).into())
    }
    let err = fails().unwrap_err();
    assert!(matches!(
        err.downcast_ref::<SchedulerError>(),
        Some(SchedulerError::BatchTypeMismatch(id)) if id == "b1"
    ));
}
