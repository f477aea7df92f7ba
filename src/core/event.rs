//! Event model shared by every component that publishes to the bus.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::util::clock::now_ms;

/// Delivery priority of an event, also used to order subscriptions.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum EventPriority {
    /// Background notifications.
    Low,
    /// Default priority.
    #[default]
    Normal,
    /// Failures and state changes that need attention.
    High,
    /// Alerts and escalations.
    Critical,
}

/// Event type tag. Known lifecycle events are enumerated; anything else uses `Custom`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    /// A task was admitted to the scheduler queue.
    TaskQueued,
    /// A task execution was launched.
    TaskStarted,
    /// A task finished successfully.
    TaskCompleted,
    /// A task failed permanently.
    TaskFailed,
    /// A task asked to be retried and was re-queued.
    TaskRetrying,
    /// A task was cancelled.
    TaskCancelled,
    /// A task execution exceeded its timeout.
    TaskTimeout,
    /// The scheduling loop started.
    SchedulerStarted,
    /// The scheduling loop was paused.
    SchedulerPaused,
    /// The scheduling loop resumed.
    SchedulerResumed,
    /// The scheduling loop stopped.
    SchedulerStopped,
    /// The admissible task kinds reported by the context probe changed.
    ContextChanged,
    /// A component reported an error that may need coordinated recovery.
    ErrorOccurred,
    /// A recovery session was opened.
    RecoveryStarted,
    /// A recovery session failed an attempt and will retry.
    RecoveryRetrying,
    /// A recovery session completed successfully.
    RecoveryCompleted,
    /// A recovery session failed permanently.
    RecoveryFailed,
    /// A recovery session was handed off to operators.
    RecoveryEscalated,
    /// A recovery session was cancelled.
    RecoveryCancelled,
    /// Application-defined event type.
    Custom(String),
}

impl EventType {
    /// Stable string form of the tag.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::TaskQueued => "task_queued",
            Self::TaskStarted => "task_started",
            Self::TaskCompleted => "task_completed",
            Self::TaskFailed => "task_failed",
            Self::TaskRetrying => "task_retrying",
            Self::TaskCancelled => "task_cancelled",
            Self::TaskTimeout => "task_timeout",
            Self::SchedulerStarted => "scheduler_started",
            Self::SchedulerPaused => "scheduler_paused",
            Self::SchedulerResumed => "scheduler_resumed",
            Self::SchedulerStopped => "scheduler_stopped",
            Self::ContextChanged => "context_changed",
            Self::ErrorOccurred => "error_occurred",
            Self::RecoveryStarted => "recovery_started",
            Self::RecoveryRetrying => "recovery_retrying",
            Self::RecoveryCompleted => "recovery_completed",
            Self::RecoveryFailed => "recovery_failed",
            Self::RecoveryEscalated => "recovery_escalated",
            Self::RecoveryCancelled => "recovery_cancelled",
            Self::Custom(name) => name,
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for EventType {
    fn from(value: &str) -> Self {
        Self::Custom(value.to_string())
    }
}

impl From<String> for EventType {
    fn from(value: String) -> Self {
        Self::Custom(value)
    }
}

/// Immutable notification dispatched through the [`EventBus`](crate::core::EventBus).
///
/// Build with [`Event::new`] and the `with_*` helpers; once published the event is
/// shared read-only between dispatch workers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Unique identifier.
    pub id: String,
    /// Type tag used to route the event to subscriptions.
    pub event_type: EventType,
    /// Creation time in milliseconds since epoch.
    pub timestamp_ms: u128,
    /// Component that produced the event.
    pub source: String,
    /// Delivery priority.
    pub priority: EventPriority,
    /// Event data.
    pub payload: HashMap<String, Value>,
    /// Free-form annotations (correlation ids, tracing context).
    pub metadata: HashMap<String, String>,
}

impl Event {
    /// Create an event with `Normal` priority and empty payload.
    pub fn new(event_type: EventType, source: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            event_type,
            timestamp_ms: now_ms(),
            source: source.into(),
            priority: EventPriority::Normal,
            payload: HashMap::new(),
            metadata: HashMap::new(),
        }
    }

    /// Set the delivery priority.
    #[must_use]
    pub const fn with_priority(mut self, priority: EventPriority) -> Self {
        self.priority = priority;
        self
    }

    /// Add a payload entry.
    #[must_use]
    pub fn with_payload(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.payload.insert(key.into(), value.into());
        self
    }

    /// Add a metadata entry.
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Payload entry as a string slice, if present and a string.
    #[must_use]
    pub fn payload_str(&self, key: &str) -> Option<&str> {
        self.payload.get(key).and_then(Value::as_str)
    }
}
