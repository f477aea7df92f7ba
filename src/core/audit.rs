//! Status sinks for task and session transitions.
//!
//! The scheduler and recovery coordinator report every status transition to an optional
//! [`AuditSink`]. Sinks are called synchronously and must not block; durable stores should
//! buffer and write from their own task.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::util::clock::now_ms;

/// Audit sink shared between components.
///
/// An `Arc<Mutex<InMemoryAuditSink>>` coerces into this type, so callers can keep their
/// own handle for inspection.
pub type SharedAuditSink = Arc<Mutex<dyn AuditSink>>;

/// Component that produced an audit record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditComponent {
    /// The priority scheduler.
    Scheduler,
    /// The recovery coordinator.
    Recovery,
}

/// A single status transition.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct AuditEvent {
    /// Record identifier.
    pub record_id: String,
    /// Task or session the transition belongs to.
    pub subject_id: String,
    /// Reporting component.
    pub component: AuditComponent,
    /// New status (queued, running, completed, escalated, ...).
    pub status: String,
    /// Timestamp milliseconds.
    pub created_at_ms: u128,
    /// Additional context.
    pub detail: Option<String>,
}

/// Audit sink abstraction.
pub trait AuditSink: Send {
    /// Record a status transition.
    fn record(&mut self, event: AuditEvent);
}

/// In-memory audit sink for testing and dev.
pub struct InMemoryAuditSink {
    events: VecDeque<AuditEvent>,
    max_events: usize,
}

impl InMemoryAuditSink {
    /// Create a new in-memory sink with a bounded buffer.
    #[must_use]
    pub fn new(max_events: usize) -> Self {
        Self {
            events: VecDeque::with_capacity(max_events.min(1024)),
            max_events,
        }
    }

    /// Retrieve a snapshot of stored events.
    #[must_use]
    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.iter().cloned().collect()
    }

    /// Stored events for one subject, oldest first.
    #[must_use]
    pub fn history(&self, subject_id: &str) -> Vec<AuditEvent> {
        self.events
            .iter()
            .filter(|e| e.subject_id == subject_id)
            .cloned()
            .collect()
    }
}

impl AuditSink for InMemoryAuditSink {
    fn record(&mut self, event: AuditEvent) {
        if self.max_events == 0 {
            return;
        }
        if self.events.len() >= self.max_events {
            self.events.pop_front();
        }
        self.events.push_back(event);
    }
}

/// Sink that writes transitions to the `tracing` pipeline at info level.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&mut self, event: AuditEvent) {
        tracing::info!(
            target: "task_coordinator::audit",
            subject_id = %event.subject_id,
            component = ?event.component,
            status = %event.status,
            detail = event.detail.as_deref().unwrap_or(""),
            "status transition"
        );
    }
}

/// Helper to build an audit event from context.
pub fn build_audit_event(
    subject_id: impl Into<String>,
    component: AuditComponent,
    status: impl Into<String>,
    detail: Option<String>,
) -> AuditEvent {
    let subject_id = subject_id.into();
    let status = status.into();
    let created_at_ms = now_ms();
    AuditEvent {
        record_id: format!("{subject_id}-{status}-{created_at_ms}"),
        subject_id,
        component,
        status,
        created_at_ms,
        detail,
    }
}

/// Record `event` if a sink is attached.
pub(crate) fn record_to(sink: Option<&SharedAuditSink>, event: AuditEvent) {
    if let Some(sink) = sink {
        sink.lock().record(event);
    }
}
