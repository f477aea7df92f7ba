//! In-memory priority queue for scheduled tasks.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use super::TaskQueue;
use crate::core::error::SchedulerError;
use crate::core::task::ScheduledTask;

/// Wrapper ordering a `ScheduledTask` for the max-heap: highest priority first, then
/// earliest `scheduled_at`, then FIFO by admission sequence.
struct RankedTask {
    task: ScheduledTask,
}

impl PartialEq for RankedTask {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for RankedTask {}

impl PartialOrd for RankedTask {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for RankedTask {
    fn cmp(&self, other: &Self) -> Ordering {
        self.task
            .priority
            .cmp(&other.task.priority)
            // Earlier start and lower sequence rank higher (reversed for max-heap).
            .then_with(|| other.task.scheduled_at.cmp(&self.task.scheduled_at))
            .then_with(|| other.task.seq.cmp(&self.task.seq))
    }
}

/// In-memory queue storing scheduled tasks in a binary heap.
/// O(log n) enqueue and dequeue; removal by id is O(n).
pub struct InMemoryQueue {
    max_depth: usize,
    tasks: BinaryHeap<RankedTask>,
}

impl InMemoryQueue {
    /// Create a new in-memory queue with a maximum depth.
    #[must_use]
    pub fn new(max_depth: usize) -> Self {
        Self {
            max_depth,
            tasks: BinaryHeap::with_capacity(max_depth.min(1024)),
        }
    }
}

impl TaskQueue for InMemoryQueue {
    fn enqueue(&mut self, task: ScheduledTask) -> Result<(), SchedulerError> {
        if self.len() >= self.max_depth() {
            return Err(SchedulerError::QueueFull("max queue depth reached".into()));
        }
        self.tasks.push(RankedTask { task });
        Ok(())
    }

    fn dequeue(&mut self) -> Result<Option<ScheduledTask>, SchedulerError> {
        Ok(self.tasks.pop().map(|ranked| ranked.task))
    }

    fn remove(&mut self, task_id: &str) -> Result<Option<ScheduledTask>, SchedulerError> {
        if !self.tasks.iter().any(|ranked| ranked.task.id() == task_id) {
            return Ok(None);
        }
        let mut found = None;
        let tasks: Vec<_> = self.tasks.drain().collect();
        self.tasks = tasks
            .into_iter()
            .filter_map(|ranked| {
                if found.is_none() && ranked.task.id() == task_id {
                    found = Some(ranked.task);
                    None
                } else {
                    Some(ranked)
                }
            })
            .collect();
        Ok(found)
    }

    fn max_depth(&self) -> usize {
        self.max_depth
    }

    fn len(&self) -> usize {
        self.tasks.len()
    }
}
