//! Builder for [`PriorityScheduler`].

use std::sync::Arc;

use crate::config::SchedulerConfig;
use crate::core::{
    AllowAllProbe, ContextProbe, EventBus, PriorityScheduler, SchedulerError, SharedAuditSink,
    TaskExecutor,
};
use crate::infra::queue::{InMemoryQueue, TaskQueue};

/// Assembles a [`PriorityScheduler`].
///
/// The event bus and task executor are required. The context probe defaults to
/// [`AllowAllProbe`] and the queue to an [`InMemoryQueue`] sized by `max_queue_depth`.
pub struct SchedulerBuilder {
    config: SchedulerConfig,
    bus: Option<Arc<EventBus>>,
    executor: Option<Arc<dyn TaskExecutor>>,
    probe: Option<Arc<dyn ContextProbe>>,
    queue: Option<Box<dyn TaskQueue + Send>>,
    audit: Option<SharedAuditSink>,
}

impl SchedulerBuilder {
    /// Start from a configuration.
    #[must_use]
    pub fn new(config: SchedulerConfig) -> Self {
        Self {
            config,
            bus: None,
            executor: None,
            probe: None,
            queue: None,
            audit: None,
        }
    }

    /// Event bus for lifecycle events.
    #[must_use]
    pub fn with_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.bus = Some(bus);
        self
    }

    /// Executor running task actions.
    #[must_use]
    pub fn with_executor(mut self, executor: Arc<dyn TaskExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    /// Context probe deciding admissible task kinds.
    #[must_use]
    pub fn with_probe(mut self, probe: Arc<dyn ContextProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    /// Custom queue backend.
    #[must_use]
    pub fn with_queue(mut self, queue: Box<dyn TaskQueue + Send>) -> Self {
        self.queue = Some(queue);
        self
    }

    /// Sink receiving status transitions.
    #[must_use]
    pub fn with_audit(mut self, audit: SharedAuditSink) -> Self {
        self.audit = Some(audit);
        self
    }

    /// Build the scheduler.
    ///
    /// # Errors
    ///
    /// Returns `MissingComponent` when the bus or executor is absent, or `InvalidConfig`
    /// when the configuration does not validate.
    pub fn build(self) -> Result<PriorityScheduler, SchedulerError> {
        let bus = self.bus.ok_or(SchedulerError::MissingComponent("event bus"))?;
        let executor = self
            .executor
            .ok_or(SchedulerError::MissingComponent("task executor"))?;
        let probe = self.probe.unwrap_or_else(|| Arc::new(AllowAllProbe));
        let max_depth = self.config.max_queue_depth;
        let queue = self
            .queue
            .unwrap_or_else(|| Box::new(InMemoryQueue::new(max_depth)));
        PriorityScheduler::new(self.config, bus, executor, probe, queue, self.audit)
    }
}
