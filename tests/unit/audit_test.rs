//! Tests for audit sinks

use std::sync::Arc;

use parking_lot::Mutex;
use prometheus_task_coordinator::core::{
    build_audit_event, AuditComponent, AuditSink, InMemoryAuditSink, SharedAuditSink,
    TracingAuditSink,
};

#[test]
fn test_in_memory_audit_sink() {
    let mut sink = InMemoryAuditSink::new(10);

    sink.record(build_audit_event(
        "task1",
        AuditComponent::Scheduler,
        "queued",
        Some("priority 75".to_string()),
    ));

    let events = sink.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].subject_id, "task1");
    assert_eq!(events[0].component, AuditComponent::Scheduler);
    assert_eq!(events[0].status, "queued");
    assert_eq!(events[0].detail.as_deref(), Some("priority 75"));
}

#[test]
fn test_audit_sink_overflow() {
    let mut sink = InMemoryAuditSink::new(2);

    sink.record(build_audit_event("task1", AuditComponent::Scheduler, "queued", None));
    sink.record(build_audit_event("task2", AuditComponent::Scheduler, "queued", None));
    sink.record(build_audit_event("task3", AuditComponent::Scheduler, "queued", None));

    let events = sink.events();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].subject_id, "task2"); // First one popped
    assert_eq!(events[1].subject_id, "task3");
}

#[test]
fn test_zero_capacity_sink_keeps_nothing() {
    let mut sink = InMemoryAuditSink::new(0);
    sink.record(build_audit_event("task1", AuditComponent::Scheduler, "queued", None));
    assert!(sink.events().is_empty());
}

#[test]
fn test_history_filters_by_subject() {
    let mut sink = InMemoryAuditSink::new(10);
    for status in ["pending", "running", "success"] {
        sink.record(build_audit_event("session-a", AuditComponent::Recovery, status, None));
        sink.record(build_audit_event("session-b", AuditComponent::Recovery, "pending", None));
    }

    let history: Vec<String> = sink
        .history("session-a")
        .into_iter()
        .map(|e| e.status)
        .collect();
    assert_eq!(history, vec!["pending", "running", "success"]);
}

#[test]
fn test_build_audit_event() {
    let event = build_audit_event(
        "session-1",
        AuditComponent::Recovery,
        "escalated",
        Some("attempts exhausted".to_string()),
    );

    assert!(event.record_id.starts_with("session-1-escalated-"));
    assert!(event.created_at_ms > 0);
    assert_eq!(event.detail, Some("attempts exhausted".to_string()));
}

#[test]
fn test_shared_sink_coerces_and_stays_inspectable() {
    let concrete = Arc::new(Mutex::new(InMemoryAuditSink::new(8)));
    let shared: SharedAuditSink = concrete.clone();

    shared
        .lock()
        .record(build_audit_event("task1", AuditComponent::Scheduler, "running", None));
    assert_eq!(concrete.lock().events().len(), 1);
}

#[test]
fn test_tracing_sink_accepts_events() {
    let mut sink = TracingAuditSink;
    sink.record(build_audit_event("task1", AuditComponent::Scheduler, "failed", None));
}
