//! Tests for audit sink

use std::time::Duration;

use outbound_throttle::core::{AuditSink, DispatchEvent, InMemoryAuditSink};
use tokio::time::Instant;

fn event(sequence: u64, at: Instant) -> DispatchEvent {
    DispatchEvent {
        sequence,
        index: 0,
        dispatched_at: at,
        tokens_left: 1.5,
    }
}

#[test]
fn test_in_memory_audit_sink() {
    let sink = InMemoryAuditSink::new(10);
    assert!(sink.is_empty());

    sink.record(event(1, Instant::now()));
    assert_eq!(sink.len(), 1);

    let stored = &sink.events()[0];
    assert_eq!(stored.sequence, 1);
    assert!((stored.tokens_left - 1.5).abs() < f64::EPSILON);
}

#[test]
fn test_clones_share_buffer() {
    let sink = InMemoryAuditSink::new(4);
    let shared: Box<dyn AuditSink> = Box::new(sink.clone());
    shared.record(event(7, Instant::now()));
    assert_eq!(sink.len(), 1);
}

#[test]
fn test_max_in_window_empty_and_single() {
    let sink = InMemoryAuditSink::new(4);
    assert_eq!(sink.max_in_window(Duration::from_secs(1)), 0);
    sink.record(event(1, Instant::now()));
    assert_eq!(sink.max_in_window(Duration::from_secs(1)), 1);
}
