//! Tests for utility functions

use std::time::{SystemTime, UNIX_EPOCH};

use prometheus_task_coordinator::util::{init_tracing, now_ms};

#[test]
fn test_now_ms_tracks_system_clock() {
    let before = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_millis();
    let now = now_ms();
    assert!(now >= before);
    assert!(now - before < 5_000);
}

#[test]
fn test_init_tracing_is_idempotent() {
    init_tracing();
    init_tracing();
}
