//! Collaborator traits the scheduler runs against: task execution and context probing.

use std::collections::HashSet;

use async_trait::async_trait;
use parking_lot::RwLock;

use super::task::{Task, TaskKind, TaskOutcome};

/// Runs a task's action and reports how it went.
///
/// The scheduler treats the action as opaque. Panics inside `execute` are caught by the
/// scheduler and reported as a failed outcome.
///
/// # Example
///
/// ```rust,ignore
/// use async_trait::async_trait;
/// use prometheus_task_coordinator::core::{Task, TaskAction, TaskExecutor, TaskOutcome};
///
/// struct InputExecutor;
///
/// #[async_trait]
/// impl TaskExecutor for InputExecutor {
///     async fn execute(&self, task: &Task) -> TaskOutcome {
///         match &task.action {
///             TaskAction::Wait { duration_ms } => {
///                 tokio::time::sleep(std::time::Duration::from_millis(*duration_ms)).await;
///                 TaskOutcome::Success
///             }
///             _ => TaskOutcome::Failed("unsupported action".into()),
///         }
///     }
/// }
/// ```
#[async_trait]
pub trait TaskExecutor: Send + Sync + 'static {
    /// Execute `task` and return its outcome.
    async fn execute(&self, task: &Task) -> TaskOutcome;
}

/// Task kinds admissible in the current context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdmissibleKinds {
    /// Every kind is admissible.
    Any,
    /// Only the listed kinds are admissible.
    Only(HashSet<TaskKind>),
}

impl AdmissibleKinds {
    /// Whether `kind` may run now.
    #[must_use]
    pub fn admits(&self, kind: &TaskKind) -> bool {
        match self {
            Self::Any => true,
            Self::Only(kinds) => kinds.contains(kind),
        }
    }

    /// Restrict admission to `kinds`.
    pub fn only<I, K>(kinds: I) -> Self
    where
        I: IntoIterator<Item = K>,
        K: Into<TaskKind>,
    {
        Self::Only(kinds.into_iter().map(Into::into).collect())
    }
}

/// Reports which task kinds suit the current context (scene, screen, mode).
#[async_trait]
pub trait ContextProbe: Send + Sync + 'static {
    /// Kinds admissible right now.
    async fn admissible_kinds(&self) -> AdmissibleKinds;
}

/// Probe that admits every kind.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAllProbe;

#[async_trait]
impl ContextProbe for AllowAllProbe {
    async fn admissible_kinds(&self) -> AdmissibleKinds {
        AdmissibleKinds::Any
    }
}

/// Probe whose answer is set by the embedding application.
#[derive(Debug)]
pub struct StaticContextProbe {
    kinds: RwLock<AdmissibleKinds>,
}

impl StaticContextProbe {
    /// Create a probe with an initial answer.
    #[must_use]
    pub fn new(kinds: AdmissibleKinds) -> Self {
        Self {
            kinds: RwLock::new(kinds),
        }
    }

    /// Replace the admissible set.
    pub fn set(&self, kinds: AdmissibleKinds) {
        *self.kinds.write() = kinds;
    }
}

impl Default for StaticContextProbe {
    fn default() -> Self {
        Self::new(AdmissibleKinds::Any)
    }
}

#[async_trait]
impl ContextProbe for StaticContextProbe {
    async fn admissible_kinds(&self) -> AdmissibleKinds {
        self.kinds.read().clone()
    }
}
