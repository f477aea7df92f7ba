//! Pending-task queue backends for the scheduler.

pub mod memory;

pub use memory::InMemoryQueue;

use crate::core::error::SchedulerError;
use crate::core::task::ScheduledTask;

/// Abstraction for the scheduler's pending-task storage.
///
/// `dequeue` must yield entries by descending priority, then earlier `scheduled_at`, then
/// lower admission sequence. Readiness checks belong to the scheduler, not the queue.
pub trait TaskQueue {
    /// Enqueue a task if space permits.
    fn enqueue(&mut self, task: ScheduledTask) -> Result<(), SchedulerError>;
    /// Dequeue the highest-ranked task.
    fn dequeue(&mut self) -> Result<Option<ScheduledTask>, SchedulerError>;
    /// Remove a task by id, returning it if present.
    fn remove(&mut self, task_id: &str) -> Result<Option<ScheduledTask>, SchedulerError>;
    /// Maximum depth allowed for this queue.
    fn max_depth(&self) -> usize;
    /// Current depth.
    fn len(&self) -> usize;
    /// Whether the queue holds no tasks.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
