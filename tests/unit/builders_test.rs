//! Tests for component builders

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use prometheus_task_coordinator::builders::{RecoveryCoordinatorBuilder, SchedulerBuilder};
use prometheus_task_coordinator::config::{EventBusConfig, RecoveryConfig, SchedulerConfig};
use prometheus_task_coordinator::core::{
    AppResult, ErrorContext, EventBus, RecoveryActionExecutor, RecoveryError, RecoveryResult,
    RecoveryStrategy, SchedulerError, Task, TaskExecutor, TaskOutcome,
};

struct NoopExecutor;

#[async_trait]
impl TaskExecutor for NoopExecutor {
    async fn execute(&self, _task: &Task) -> TaskOutcome {
        TaskOutcome::Success
    }
}

struct NoopRecovery;

#[async_trait]
impl RecoveryActionExecutor for NoopRecovery {
    async fn apply(
        &self,
        _strategy: &RecoveryStrategy,
        _context: &ErrorContext,
    ) -> AppResult<RecoveryResult> {
        Ok(RecoveryResult::succeeded(vec![], Duration::ZERO))
    }
}

fn bus() -> Arc<EventBus> {
    Arc::new(EventBus::new(EventBusConfig::new().with_worker_count(1)).unwrap())
}

#[test]
fn test_scheduler_builder_requires_components() {
    let err = SchedulerBuilder::new(SchedulerConfig::new())
        .with_executor(Arc::new(NoopExecutor))
        .build()
        .err()
        .unwrap();
    assert!(matches!(err, SchedulerError::MissingComponent("event bus")));

    let err = SchedulerBuilder::new(SchedulerConfig::new())
        .with_bus(bus())
        .build()
        .err()
        .unwrap();
    assert!(matches!(err, SchedulerError::MissingComponent("task executor")));
}

#[test]
fn test_scheduler_builder_validates_config() {
    let err = SchedulerBuilder::new(SchedulerConfig::new().with_max_concurrent_tasks(0))
        .with_bus(bus())
        .with_executor(Arc::new(NoopExecutor))
        .build()
        .err()
        .unwrap();
    assert!(matches!(err, SchedulerError::InvalidConfig(_)));
}

#[test]
fn test_scheduler_builder_builds() {
    let scheduler = SchedulerBuilder::new(SchedulerConfig::new())
        .with_bus(bus())
        .with_executor(Arc::new(NoopExecutor))
        .build()
        .unwrap();
    assert_eq!(scheduler.status().queue_size, 0);
}

#[test]
fn test_recovery_builder_requires_components() {
    let err = RecoveryCoordinatorBuilder::new(RecoveryConfig::new())
        .with_bus(bus())
        .build()
        .err()
        .unwrap();
    assert!(matches!(
        err,
        RecoveryError::MissingComponent("recovery action executor")
    ));

    let coordinator = RecoveryCoordinatorBuilder::new(RecoveryConfig::new())
        .with_bus(bus())
        .with_executor(Arc::new(NoopRecovery))
        .build()
        .unwrap();
    assert!(!coordinator.is_running());
    assert_eq!(coordinator.statistics().success_rate, 100.0);
}
