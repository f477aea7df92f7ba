//! Task model: what the scheduler queues and what the executor runs.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::time::Instant;

/// Task identifier supplied by the caller.
pub type TaskId = String;

/// Category of work, matched against the context probe's admissible set.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskKind(String);

impl TaskKind {
    /// Create a kind from its name.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Kind name.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TaskKind {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Caller-facing priority level, mapped to a numeric base priority by configuration.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum PriorityLevel {
    /// Run when nothing else is pending.
    Low,
    /// Default level.
    #[default]
    Normal,
    /// Ahead of normal work.
    High,
    /// Ahead of everything else.
    Urgent,
}

/// Concrete action a task asks the executor to perform.
///
/// Known actions carry typed parameters; `Custom` keeps an open map for actions the
/// executor registers at runtime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum TaskAction {
    /// Click at screen coordinates.
    Click {
        /// Horizontal position in pixels.
        x: i32,
        /// Vertical position in pixels.
        y: i32,
    },
    /// Send a key or key chord.
    KeyPress {
        /// Key name, e.g. `"ctrl+s"`.
        key: String,
    },
    /// Pause for a fixed duration.
    Wait {
        /// Duration in milliseconds.
        duration_ms: u64,
    },
    /// Locate a template image on screen.
    MatchTemplate {
        /// Template identifier or path.
        template: String,
        /// Minimum similarity in `0.0..=1.0`.
        threshold: f32,
    },
    /// Launch an application.
    LaunchApp {
        /// Executable path.
        path: String,
        /// Command-line arguments.
        #[serde(default)]
        args: Vec<String>,
    },
    /// Executor-defined action with free-form parameters.
    Custom {
        /// Action name understood by the executor.
        name: String,
        /// Parameters.
        #[serde(default)]
        params: Map<String, Value>,
    },
}

/// A unit of work submitted to the scheduler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Unique identifier.
    pub id: TaskId,
    /// Human-readable name.
    pub name: String,
    /// Kind used for context admission and priority bonus.
    pub kind: TaskKind,
    /// Priority level used for the base priority.
    pub level: PriorityLevel,
    /// Action the executor performs.
    pub action: TaskAction,
    /// Execution timeout overriding the scheduler default.
    #[serde(default)]
    pub timeout: Option<Duration>,
    /// Retry limit overriding the scheduler default.
    #[serde(default)]
    pub max_retries: Option<u32>,
}

impl Task {
    /// Create a task at `Normal` level.
    pub fn new(
        id: impl Into<TaskId>,
        name: impl Into<String>,
        kind: impl Into<TaskKind>,
        action: TaskAction,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            kind: kind.into(),
            level: PriorityLevel::Normal,
            action,
            timeout: None,
            max_retries: None,
        }
    }

    /// Set the priority level.
    #[must_use]
    pub const fn with_level(mut self, level: PriorityLevel) -> Self {
        self.level = level;
        self
    }

    /// Set an execution timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set a retry limit.
    #[must_use]
    pub const fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }
}

/// Status of a task in the scheduler lifecycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum TaskStatus {
    /// Task is queued waiting for its turn.
    Queued,
    /// Task is parked because its kind is not admissible in the current context.
    Waiting,
    /// Task is running.
    Running,
    /// Task finished successfully.
    Completed,
    /// Task failed with a reason.
    Failed(String),
    /// Task was cancelled with a reason.
    Cancelled(String),
}

impl TaskStatus {
    /// Whether no further transitions will happen.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed(_) | Self::Cancelled(_))
    }
}

/// Outcome reported by a [`TaskExecutor`](crate::core::TaskExecutor).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    /// Task succeeded.
    Success,
    /// Task should run again after the retry delay.
    Retry,
    /// Task failed permanently.
    Failed(String),
    /// Task was cancelled by the executor.
    Cancelled,
}

/// Caller-supplied scheduling options for [`PriorityScheduler::add_task`](crate::core::PriorityScheduler::add_task).
#[derive(Debug, Clone, Default)]
pub struct TaskOptions {
    /// Explicit priority; computed from configuration when `None`.
    pub priority: Option<i64>,
    /// Earliest start time; now when `None`.
    pub scheduled_at: Option<Instant>,
    /// Tasks that must complete first.
    pub dependencies: HashSet<TaskId>,
}

impl TaskOptions {
    /// Empty options.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Use an explicit priority.
    #[must_use]
    pub const fn with_priority(mut self, priority: i64) -> Self {
        self.priority = Some(priority);
        self
    }

    /// Start no earlier than `at`.
    #[must_use]
    pub const fn at(mut self, at: Instant) -> Self {
        self.scheduled_at = Some(at);
        self
    }

    /// Start no earlier than `delay` from now.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.scheduled_at = Some(Instant::now() + delay);
        self
    }

    /// Require `task_id` to complete first.
    #[must_use]
    pub fn with_dependency(mut self, task_id: impl Into<TaskId>) -> Self {
        self.dependencies.insert(task_id.into());
        self
    }
}

/// A task plus the queueing metadata the scheduler maintains for it.
#[derive(Debug, Clone)]
pub struct ScheduledTask {
    /// The task definition.
    pub task: Arc<Task>,
    /// Effective priority, higher runs first.
    pub priority: i64,
    /// Earliest start time.
    pub scheduled_at: Instant,
    /// Number of retries consumed so far.
    pub retry_count: u32,
    /// When the task was last launched.
    pub last_attempt: Option<Instant>,
    /// Tasks that must complete first.
    pub dependencies: HashSet<TaskId>,
    /// Admission sequence number, breaks remaining ties in FIFO order.
    pub seq: u64,
}

impl ScheduledTask {
    /// Task identifier.
    #[must_use]
    pub fn id(&self) -> &TaskId {
        &self.task.id
    }

    /// Whether the retry backoff has elapsed since the last launch.
    #[must_use]
    pub fn backoff_elapsed(&self, now: Instant, retry_delay: Duration) -> bool {
        self.last_attempt
            .is_none_or(|last| now.saturating_duration_since(last) >= retry_delay)
    }
}
