//! Builder for [`RecoveryCoordinator`].

use std::sync::Arc;

use crate::config::RecoveryConfig;
use crate::core::{
    ErrorClassifier, EventBus, RecoveryActionExecutor, RecoveryCoordinator, RecoveryError,
    SharedAuditSink, StandardErrorClassifier,
};

/// Assembles a [`RecoveryCoordinator`].
///
/// The event bus and action executor are required. Without an explicit classifier a
/// [`StandardErrorClassifier`] is used, seeded with the configured retry policy and
/// escalation flag.
pub struct RecoveryCoordinatorBuilder {
    config: RecoveryConfig,
    bus: Option<Arc<EventBus>>,
    classifier: Option<Arc<dyn ErrorClassifier>>,
    executor: Option<Arc<dyn RecoveryActionExecutor>>,
    audit: Option<SharedAuditSink>,
}

impl RecoveryCoordinatorBuilder {
    /// Start from a configuration.
    #[must_use]
    pub fn new(config: RecoveryConfig) -> Self {
        Self {
            config,
            bus: None,
            classifier: None,
            executor: None,
            audit: None,
        }
    }

    /// Event bus for session events and trigger subscriptions.
    #[must_use]
    pub fn with_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.bus = Some(bus);
        self
    }

    /// Error classifier.
    #[must_use]
    pub fn with_classifier(mut self, classifier: Arc<dyn ErrorClassifier>) -> Self {
        self.classifier = Some(classifier);
        self
    }

    /// Recovery action executor.
    #[must_use]
    pub fn with_executor(mut self, executor: Arc<dyn RecoveryActionExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    /// Sink receiving session transitions.
    #[must_use]
    pub fn with_audit(mut self, audit: SharedAuditSink) -> Self {
        self.audit = Some(audit);
        self
    }

    /// Build the coordinator.
    ///
    /// # Errors
    ///
    /// Returns `MissingComponent` when the bus or executor is absent, or `InvalidConfig`
    /// when the configuration does not validate.
    pub fn build(self) -> Result<RecoveryCoordinator, RecoveryError> {
        let bus = self.bus.ok_or(RecoveryError::MissingComponent("event bus"))?;
        let executor = self
            .executor
            .ok_or(RecoveryError::MissingComponent("recovery action executor"))?;
        let classifier = self.classifier.unwrap_or_else(|| {
            Arc::new(
                StandardErrorClassifier::new()
                    .with_retry_policy(self.config.retry)
                    .with_auto_escalate(self.config.auto_escalate),
            )
        });
        RecoveryCoordinator::new(self.config, bus, classifier, executor, self.audit)
    }
}
