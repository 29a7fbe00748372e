//! Tests for telemetry helpers

use outbound_throttle::util::{init_tracing, init_tracing_with_default};

#[test]
fn test_init_tracing_is_idempotent() {
    init_tracing_with_default("outbound_throttle=debug");
    init_tracing();
    init_tracing();
    tracing::info!("tracing initialized twice without panicking");
}
