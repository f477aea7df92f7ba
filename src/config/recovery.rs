//! Recovery coordinator configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::bus::duration_ms;
use crate::core::event::EventType;
use crate::core::recovery::RetryPolicy;

/// Recovery worker pool, session lifetime and default retry policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecoveryConfig {
    /// Number of session worker loops.
    pub worker_count: usize,
    /// Active sessions without progress for this long are failed.
    pub session_timeout_ms: u64,
    /// Interval of the timeout monitor.
    pub timeout_check_interval_ms: u64,
    /// Interval of the history cleanup loop.
    pub cleanup_interval_ms: u64,
    /// Completed sessions retained in history.
    pub max_session_history: usize,
    /// Bound on a single recovery action execution.
    pub action_timeout_ms: u64,
    /// How long an idle worker waits before re-checking the stop flag.
    pub poll_interval_ms: u64,
    /// Retry policy used when the classifier's strategy does not override it.
    pub retry: RetryPolicy,
    /// Escalate sessions that exhaust their attempts instead of failing them.
    pub auto_escalate: bool,
    /// Event types that open a session when the coordinator is attached to the bus.
    pub trigger_events: Vec<EventType>,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            worker_count: 3,
            session_timeout_ms: 300_000,
            timeout_check_interval_ms: 30_000,
            cleanup_interval_ms: 300_000,
            max_session_history: 1000,
            action_timeout_ms: 60_000,
            poll_interval_ms: 100,
            retry: RetryPolicy::default(),
            auto_escalate: true,
            trigger_events: vec![EventType::ErrorOccurred, EventType::TaskFailed],
        }
    }
}

impl RecoveryConfig {
    /// Default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the number of workers.
    #[must_use]
    pub const fn with_worker_count(mut self, workers: usize) -> Self {
        self.worker_count = workers;
        self
    }

    /// Set the session timeout.
    #[must_use]
    pub const fn with_session_timeout(mut self, timeout: Duration) -> Self {
        self.session_timeout_ms = duration_ms(timeout);
        self
    }

    /// Set the timeout monitor interval.
    #[must_use]
    pub const fn with_timeout_check_interval(mut self, interval: Duration) -> Self {
        self.timeout_check_interval_ms = duration_ms(interval);
        self
    }

    /// Set the history cleanup interval.
    #[must_use]
    pub const fn with_cleanup_interval(mut self, interval: Duration) -> Self {
        self.cleanup_interval_ms = duration_ms(interval);
        self
    }

    /// Set the history size.
    #[must_use]
    pub const fn with_max_session_history(mut self, max: usize) -> Self {
        self.max_session_history = max;
        self
    }

    /// Set the recovery action timeout.
    #[must_use]
    pub const fn with_action_timeout(mut self, timeout: Duration) -> Self {
        self.action_timeout_ms = duration_ms(timeout);
        self
    }

    /// Set the default retry policy.
    #[must_use]
    pub const fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Enable or disable auto-escalation.
    #[must_use]
    pub const fn with_auto_escalate(mut self, enabled: bool) -> Self {
        self.auto_escalate = enabled;
        self
    }

    /// Replace the bus trigger event types.
    #[must_use]
    pub fn with_trigger_events(mut self, events: Vec<EventType>) -> Self {
        self.trigger_events = events;
        self
    }

    /// Session timeout.
    #[must_use]
    pub const fn session_timeout(&self) -> Duration {
        Duration::from_millis(self.session_timeout_ms)
    }

    /// Timeout monitor interval.
    #[must_use]
    pub const fn timeout_check_interval(&self) -> Duration {
        Duration::from_millis(self.timeout_check_interval_ms)
    }

    /// History cleanup interval.
    #[must_use]
    pub const fn cleanup_interval(&self) -> Duration {
        Duration::from_millis(self.cleanup_interval_ms)
    }

    /// Recovery action timeout.
    #[must_use]
    pub const fn action_timeout(&self) -> Duration {
        Duration::from_millis(self.action_timeout_ms)
    }

    /// Idle worker poll interval.
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), String> {
        if self.worker_count == 0 {
            return Err("worker_count must be greater than 0".into());
        }
        if self.session_timeout_ms == 0 {
            return Err("session_timeout_ms must be greater than 0".into());
        }
        if self.timeout_check_interval_ms == 0 || self.cleanup_interval_ms == 0 {
            return Err("monitor intervals must be greater than 0".into());
        }
        if self.action_timeout_ms == 0 {
            return Err("action_timeout_ms must be greater than 0".into());
        }
        if self.poll_interval_ms == 0 {
            return Err("poll_interval_ms must be greater than 0".into());
        }
        self.retry
            .validate()
            .map_err(|e| format!("retry policy invalid: {e}"))
    }
}
