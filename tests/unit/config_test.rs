//! Tests for configuration validation and loading

use std::collections::HashMap;
use std::time::Duration;

use prometheus_task_coordinator::config::{
    CoreConfig, EventBusConfig, RecoveryConfig, SchedulerConfig,
};
use prometheus_task_coordinator::core::{ConfigError, EventType, PriorityLevel, RetryPolicy, TaskKind};

#[test]
fn test_defaults_are_valid() {
    assert!(CoreConfig::default().validate().is_ok());

    let bus = EventBusConfig::default();
    assert_eq!(bus.queue_capacity, 1000);
    assert!((2..=8).contains(&bus.worker_count));

    let scheduler = SchedulerConfig::default();
    assert_eq!(scheduler.max_concurrent_tasks, 3);
    assert_eq!(scheduler.base_for(PriorityLevel::Urgent), 200);
    assert_eq!(scheduler.bonus_for(&TaskKind::new("daily")), 0);

    let recovery = RecoveryConfig::default();
    assert_eq!(recovery.worker_count, 3);
    assert_eq!(
        recovery.trigger_events,
        vec![EventType::ErrorOccurred, EventType::TaskFailed]
    );
}

#[test]
fn test_event_bus_config_invalid() {
    assert!(EventBusConfig::new().with_queue_capacity(0).validate().is_err());
    assert!(EventBusConfig::new().with_worker_count(0).validate().is_err());
    assert!(EventBusConfig::new()
        .with_poll_interval(Duration::ZERO)
        .validate()
        .is_err());
}

#[test]
fn test_scheduler_config_invalid() {
    assert!(SchedulerConfig::new().with_max_concurrent_tasks(0).validate().is_err());
    assert!(SchedulerConfig::new().with_max_queue_depth(0).validate().is_err());
    assert!(SchedulerConfig::new().with_max_task_history(0).validate().is_err());
    assert!(SchedulerConfig::new()
        .with_tick_interval(Duration::ZERO)
        .validate()
        .is_err());
    assert!(SchedulerConfig::new()
        .with_context_boost_factor(-1.0)
        .validate()
        .is_err());
}

#[test]
fn test_recovery_config_invalid() {
    assert!(RecoveryConfig::new().with_worker_count(0).validate().is_err());
    assert!(RecoveryConfig::new()
        .with_retry(RetryPolicy::default().with_max_attempts(0))
        .validate()
        .is_err());
}

#[test]
fn test_scheduler_builder_methods() {
    let cfg = SchedulerConfig::new()
        .with_base_priority(PriorityLevel::Low, 1)
        .with_kind_bonus("combat", 25)
        .with_retry_delay(Duration::from_millis(250))
        .with_task_timeout(Duration::from_secs(2));
    assert_eq!(cfg.base_for(PriorityLevel::Low), 1);
    assert_eq!(cfg.bonus_for(&TaskKind::new("combat")), 25);
    assert_eq!(cfg.retry_delay(), Duration::from_millis(250));
    assert_eq!(cfg.task_timeout(), Duration::from_secs(2));
}

#[test]
fn test_from_json_partial_uses_defaults() {
    let cfg = CoreConfig::from_json_str(
        r#"{
            "scheduler": { "max_concurrent_tasks": 5, "kind_bonus": { "daily": 30 } },
            "recovery": { "retry": { "max_attempts": 4 }, "trigger_events": ["task_failed"] }
        }"#,
    )
    .unwrap();

    assert_eq!(cfg.scheduler.max_concurrent_tasks, 5);
    assert_eq!(cfg.scheduler.max_queue_depth, 1000);
    assert_eq!(cfg.scheduler.bonus_for(&TaskKind::new("daily")), 30);
    assert_eq!(cfg.recovery.retry.max_attempts, 4);
    assert_eq!(cfg.recovery.retry.initial_delay_ms, 1000);
    assert_eq!(cfg.recovery.trigger_events, vec![EventType::TaskFailed]);
    assert_eq!(cfg.event_bus.queue_capacity, 1000);
}

#[test]
fn test_from_json_rejects_invalid() {
    let err = CoreConfig::from_json_str(r#"{ "event_bus": { "queue_capacity": 0 } }"#).unwrap_err();
    assert!(matches!(err, ConfigError::Invalid(_)));

    let err = CoreConfig::from_json_str("{ not json").unwrap_err();
    assert!(matches!(err, ConfigError::Parse(_)));
}

#[test]
fn test_json_roundtrip_preserves_priority_maps() {
    let cfg = CoreConfig::default();
    let json = serde_json::to_string(&cfg).unwrap();
    let back = CoreConfig::from_json_str(&json).unwrap();
    assert_eq!(back.scheduler.base_for(PriorityLevel::High), 100);
}

#[test]
fn test_env_overrides() {
    let vars = HashMap::from([
        ("TASK_COORDINATOR_BUS_WORKERS", "6"),
        ("TASK_COORDINATOR_MAX_CONCURRENT_TASKS", " 7 "),
        ("TASK_COORDINATOR_PAUSE_ON_ERROR", "true"),
        ("TASK_COORDINATOR_AUTO_ESCALATE", "false"),
    ]);
    let mut cfg = CoreConfig::default();
    cfg.apply_overrides(|key| vars.get(key).map(ToString::to_string))
        .unwrap();

    assert_eq!(cfg.event_bus.worker_count, 6);
    assert_eq!(cfg.scheduler.max_concurrent_tasks, 7);
    assert!(cfg.scheduler.pause_on_error);
    assert!(!cfg.recovery.auto_escalate);
}

#[test]
fn test_env_override_parse_error() {
    let mut cfg = CoreConfig::default();
    let err = cfg
        .apply_overrides(|key| (key == "TASK_COORDINATOR_RECOVERY_WORKERS").then(|| "many".into()))
        .unwrap_err();
    assert!(matches!(err, ConfigError::Parse(msg) if msg.contains("TASK_COORDINATOR_RECOVERY_WORKERS")));
}
