//! [`CoreRuntime`]: builds the three components from one [`CoreConfig`] and runs them
//! in dependency order.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::info;

use super::api::{aggregate_health, CoreSnapshot};
use crate::builders::{RecoveryCoordinatorBuilder, SchedulerBuilder};
use crate::config::CoreConfig;
use crate::core::{
    ContextProbe, CoreError, ErrorClassifier, EventBus, PriorityScheduler,
    RecoveryActionExecutor, RecoveryCoordinator, SharedAuditSink, TaskExecutor,
};
use crate::util::clock::now_ms;

/// Collaborators injected into a [`CoreRuntime`].
pub struct RuntimeComponents {
    /// Runs task actions.
    pub task_executor: Arc<dyn TaskExecutor>,
    /// Runs recovery actions.
    pub recovery_executor: Arc<dyn RecoveryActionExecutor>,
    /// Context probe; all kinds admissible when `None`.
    pub probe: Option<Arc<dyn ContextProbe>>,
    /// Error classifier; the standard classifier when `None`.
    pub classifier: Option<Arc<dyn ErrorClassifier>>,
    /// Status sink shared by scheduler and coordinator.
    pub audit: Option<SharedAuditSink>,
}

impl RuntimeComponents {
    /// Components with only the two required executors.
    pub fn new(
        task_executor: Arc<dyn TaskExecutor>,
        recovery_executor: Arc<dyn RecoveryActionExecutor>,
    ) -> Self {
        Self {
            task_executor,
            recovery_executor,
            probe: None,
            classifier: None,
            audit: None,
        }
    }

    /// Set the context probe.
    #[must_use]
    pub fn with_probe(mut self, probe: Arc<dyn ContextProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    /// Set the error classifier.
    #[must_use]
    pub fn with_classifier(mut self, classifier: Arc<dyn ErrorClassifier>) -> Self {
        self.classifier = Some(classifier);
        self
    }

    /// Set the audit sink.
    #[must_use]
    pub fn with_audit(mut self, audit: SharedAuditSink) -> Self {
        self.audit = Some(audit);
        self
    }
}

/// The assembled coordination core.
///
/// Starts bus, then coordinator (attached to the bus), then scheduler; stops in reverse.
pub struct CoreRuntime {
    bus: Arc<EventBus>,
    scheduler: PriorityScheduler,
    recovery: RecoveryCoordinator,
    running: AtomicBool,
}

impl CoreRuntime {
    /// Build every component from `config`.
    ///
    /// # Errors
    ///
    /// Returns the first construction error of any component.
    pub fn new(config: CoreConfig, components: RuntimeComponents) -> Result<Self, CoreError> {
        let bus = Arc::new(EventBus::new(config.event_bus)?);

        let mut scheduler = SchedulerBuilder::new(config.scheduler)
            .with_bus(Arc::clone(&bus))
            .with_executor(components.task_executor);
        if let Some(probe) = components.probe {
            scheduler = scheduler.with_probe(probe);
        }
        if let Some(audit) = components.audit.clone() {
            scheduler = scheduler.with_audit(audit);
        }

        let mut recovery = RecoveryCoordinatorBuilder::new(config.recovery)
            .with_bus(Arc::clone(&bus))
            .with_executor(components.recovery_executor);
        if let Some(classifier) = components.classifier {
            recovery = recovery.with_classifier(classifier);
        }
        if let Some(audit) = components.audit {
            recovery = recovery.with_audit(audit);
        }

        Ok(Self {
            bus,
            scheduler: scheduler.build()?,
            recovery: recovery.build()?,
            running: AtomicBool::new(false),
        })
    }

    /// Start bus, coordinator and scheduler, in that order.
    ///
    /// # Errors
    ///
    /// Returns the first start error; components started before it keep running.
    pub fn start(&self) -> Result<(), CoreError> {
        self.bus.start()?;
        self.recovery.start()?;
        let triggers = self.recovery.attach_to_bus().len();
        self.scheduler.start()?;
        self.running.store(true, Ordering::Release);
        info!(triggers, "coordination core started");
        Ok(())
    }

    /// Stop scheduler, coordinator and bus, in that order.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::AcqRel) {
            return;
        }
        self.scheduler.stop().await;
        self.recovery.detach_from_bus();
        self.recovery.stop().await;
        self.bus.stop().await;
        info!("coordination core stopped");
    }

    /// The event bus.
    #[must_use]
    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    /// The scheduler.
    #[must_use]
    pub const fn scheduler(&self) -> &PriorityScheduler {
        &self.scheduler
    }

    /// The recovery coordinator.
    #[must_use]
    pub const fn recovery(&self) -> &RecoveryCoordinator {
        &self.recovery
    }

    /// Statistics of all components with an aggregated health level.
    #[must_use]
    pub fn snapshot(&self) -> CoreSnapshot {
        let bus = self.bus.stats();
        let scheduler = self.scheduler.status();
        let recovery = self.recovery.statistics();
        let health = aggregate_health(&bus, &scheduler, &recovery);
        CoreSnapshot {
            taken_at_ms: now_ms(),
            bus,
            scheduler,
            recovery,
            health,
        }
    }
}
