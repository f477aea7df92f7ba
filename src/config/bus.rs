//! Event bus configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Event bus sizing and dispatch policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EventBusConfig {
    /// Bounded queue capacity; `try_publish` fails once this many events are pending.
    pub queue_capacity: usize,
    /// Number of dispatch workers.
    pub worker_count: usize,
    /// Number of dispatched events retained for inspection.
    pub history_size: usize,
    /// How long a worker waits on an empty queue before re-checking the stop flag.
    pub poll_interval_ms: u64,
    /// Upper bound on how long `stop` waits for the queue to drain.
    pub drain_timeout_ms: u64,
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 1000,
            worker_count: num_cpus::get().clamp(2, 8),
            history_size: 100,
            poll_interval_ms: 100,
            drain_timeout_ms: 30_000,
        }
    }
}

impl EventBusConfig {
    /// Default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the queue capacity.
    #[must_use]
    pub const fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// Set the number of dispatch workers.
    #[must_use]
    pub const fn with_worker_count(mut self, workers: usize) -> Self {
        self.worker_count = workers;
        self
    }

    /// Set the history ring size.
    #[must_use]
    pub const fn with_history_size(mut self, size: usize) -> Self {
        self.history_size = size;
        self
    }

    /// Set the worker poll interval.
    #[must_use]
    pub const fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval_ms = duration_ms(interval);
        self
    }

    /// Set the drain timeout used by `stop`.
    #[must_use]
    pub const fn with_drain_timeout(mut self, timeout: Duration) -> Self {
        self.drain_timeout_ms = duration_ms(timeout);
        self
    }

    /// Worker poll interval.
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Drain timeout.
    #[must_use]
    pub const fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), String> {
        if self.queue_capacity == 0 {
            return Err("queue_capacity must be greater than 0".into());
        }
        if self.worker_count == 0 {
            return Err("worker_count must be greater than 0".into());
        }
        if self.poll_interval_ms == 0 {
            return Err("poll_interval_ms must be greater than 0".into());
        }
        Ok(())
    }
}

/// Milliseconds in `d`, saturating at `u64::MAX`.
pub(crate) const fn duration_ms(d: Duration) -> u64 {
    let ms = d.as_millis();
    if ms > u64::MAX as u128 {
        u64::MAX
    } else {
        ms as u64
    }
}
