//! Priority scheduler configuration.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::bus::duration_ms;
use crate::core::task::{PriorityLevel, TaskKind};

/// Scheduler concurrency, timing and priority policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Maximum concurrently running task executions.
    pub max_concurrent_tasks: usize,
    /// Maximum queued (including parked) tasks before rejection.
    pub max_queue_depth: usize,
    /// Sleep between scheduling iterations.
    pub tick_interval_ms: u64,
    /// Default execution timeout.
    pub task_timeout_ms: u64,
    /// Default number of retries a task may consume.
    pub max_retry_count: u32,
    /// Delay before a retried task becomes eligible again.
    pub retry_delay_ms: u64,
    /// Pause the whole scheduler when a task fails permanently.
    pub pause_on_error: bool,
    /// How long `stop` lets running executions finish before aborting them.
    pub stop_grace_ms: u64,
    /// Fraction of the base priority added when a task's kind is currently admissible.
    pub context_boost_factor: f64,
    /// How long a parked task waits before being re-checked without a context change.
    pub context_recheck_interval_ms: u64,
    /// Base priority per priority level.
    pub base_priority: HashMap<PriorityLevel, i64>,
    /// Additional priority per task kind.
    pub kind_bonus: HashMap<TaskKind, i64>,
    /// Finished tasks whose status is retained; the oldest are forgotten first.
    pub max_task_history: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        let base_priority = HashMap::from([
            (PriorityLevel::Low, 10),
            (PriorityLevel::Normal, 50),
            (PriorityLevel::High, 100),
            (PriorityLevel::Urgent, 200),
        ]);
        Self {
            max_concurrent_tasks: 3,
            max_queue_depth: 1000,
            tick_interval_ms: 100,
            task_timeout_ms: 300_000,
            max_retry_count: 3,
            retry_delay_ms: 5_000,
            pause_on_error: false,
            stop_grace_ms: 5_000,
            context_boost_factor: 0.5,
            context_recheck_interval_ms: 5_000,
            base_priority,
            kind_bonus: HashMap::new(),
            max_task_history: 1000,
        }
    }
}

impl SchedulerConfig {
    /// Default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the concurrency limit.
    #[must_use]
    pub const fn with_max_concurrent_tasks(mut self, max: usize) -> Self {
        self.max_concurrent_tasks = max;
        self
    }

    /// Set the queue depth limit.
    #[must_use]
    pub const fn with_max_queue_depth(mut self, depth: usize) -> Self {
        self.max_queue_depth = depth;
        self
    }

    /// Set the scheduling tick.
    #[must_use]
    pub const fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval_ms = duration_ms(interval);
        self
    }

    /// Set the default execution timeout.
    #[must_use]
    pub const fn with_task_timeout(mut self, timeout: Duration) -> Self {
        self.task_timeout_ms = duration_ms(timeout);
        self
    }

    /// Set the default retry limit.
    #[must_use]
    pub const fn with_max_retry_count(mut self, max: u32) -> Self {
        self.max_retry_count = max;
        self
    }

    /// Set the retry delay.
    #[must_use]
    pub const fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay_ms = duration_ms(delay);
        self
    }

    /// Pause on permanent task failure.
    #[must_use]
    pub const fn with_pause_on_error(mut self, pause: bool) -> Self {
        self.pause_on_error = pause;
        self
    }

    /// Set the stop grace period.
    #[must_use]
    pub const fn with_stop_grace(mut self, grace: Duration) -> Self {
        self.stop_grace_ms = duration_ms(grace);
        self
    }

    /// Set the context boost factor.
    #[must_use]
    pub const fn with_context_boost_factor(mut self, factor: f64) -> Self {
        self.context_boost_factor = factor;
        self
    }

    /// Set the parked-task recheck interval.
    #[must_use]
    pub const fn with_context_recheck_interval(mut self, interval: Duration) -> Self {
        self.context_recheck_interval_ms = duration_ms(interval);
        self
    }

    /// Set the base priority for a level.
    #[must_use]
    pub fn with_base_priority(mut self, level: PriorityLevel, priority: i64) -> Self {
        self.base_priority.insert(level, priority);
        self
    }

    /// Set the bonus for a task kind.
    #[must_use]
    pub fn with_kind_bonus(mut self, kind: impl Into<TaskKind>, bonus: i64) -> Self {
        self.kind_bonus.insert(kind.into(), bonus);
        self
    }

    /// Set how many finished tasks keep their status.
    #[must_use]
    pub const fn with_max_task_history(mut self, max: usize) -> Self {
        self.max_task_history = max;
        self
    }

    /// Scheduling tick.
    #[must_use]
    pub const fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    /// Default execution timeout.
    #[must_use]
    pub const fn task_timeout(&self) -> Duration {
        Duration::from_millis(self.task_timeout_ms)
    }

    /// Retry delay.
    #[must_use]
    pub const fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    /// Stop grace period.
    #[must_use]
    pub const fn stop_grace(&self) -> Duration {
        Duration::from_millis(self.stop_grace_ms)
    }

    /// Parked-task recheck interval.
    #[must_use]
    pub const fn context_recheck_interval(&self) -> Duration {
        Duration::from_millis(self.context_recheck_interval_ms)
    }

    /// Base priority for `level`; 0 when unconfigured.
    #[must_use]
    pub fn base_for(&self, level: PriorityLevel) -> i64 {
        self.base_priority.get(&level).copied().unwrap_or_default()
    }

    /// Bonus for `kind`; 0 when unconfigured.
    #[must_use]
    pub fn bonus_for(&self, kind: &TaskKind) -> i64 {
        self.kind_bonus.get(kind).copied().unwrap_or_default()
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_concurrent_tasks == 0 {
            return Err("max_concurrent_tasks must be greater than 0".into());
        }
        if self.max_queue_depth == 0 {
            return Err("max_queue_depth must be greater than 0".into());
        }
        if self.tick_interval_ms == 0 {
            return Err("tick_interval_ms must be greater than 0".into());
        }
        if self.task_timeout_ms == 0 {
            return Err("task_timeout_ms must be greater than 0".into());
        }
        if self.max_task_history == 0 {
            return Err("max_task_history must be greater than 0".into());
        }
        if !self.context_boost_factor.is_finite() || self.context_boost_factor < 0.0 {
            return Err("context_boost_factor must be a non-negative number".into());
        }
        Ok(())
    }
}
