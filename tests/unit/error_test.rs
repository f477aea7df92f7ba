//! Tests for error types

use prometheus_task_coordinator::core::{
    BusError, ConfigError, CoreError, RecoveryError, SchedulerError,
};

#[test]
fn test_queue_full_error() {
    let err = SchedulerError::QueueFull("1000 tasks pending".to_string());
    assert_eq!(format!("{err}"), "queue full: 1000 tasks pending");
}

#[test]
fn test_duplicate_task_error() {
    let err = SchedulerError::DuplicateTask("daily-login".to_string());
    assert_eq!(format!("{err}"), "duplicate task: daily-login");
}

#[test]
fn test_missing_component_error() {
    let err = SchedulerError::MissingComponent("task executor");
    assert_eq!(format!("{err}"), "missing component: task executor");
}

#[test]
fn test_backend_error() {
    let err = SchedulerError::Backend("connection failed".to_string());
    assert_eq!(format!("{err}"), "backend error: connection failed");
}

#[test]
fn test_bus_and_recovery_errors() {
    assert_eq!(BusError::AlreadyRunning.to_string(), "event bus already running");
    assert_eq!(
        RecoveryError::ShutDown.to_string(),
        "recovery coordinator is shut down"
    );
}

#[test]
fn test_core_error_is_transparent() {
    let err: CoreError = SchedulerError::InvalidState("scheduler is stopped".into()).into();
    assert_eq!(err.to_string(), "invalid scheduler state: scheduler is stopped");
    assert!(matches!(err, CoreError::Scheduler(_)));

    let err: CoreError = ConfigError::Invalid("bad".into()).into();
    assert!(matches!(err, CoreError::Config(_)));
}

#[test]
fn test_io_error_converts_into_config_error() {
    let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
    let err: ConfigError = io.into();
    assert!(err.to_string().starts_with("io error:"));
}

#[test]
fn test_errors_convert_into_anyhow() {
    fn fails() -> prometheus_task_coordinator::core::AppResult<()> {
        let start: Result<(), RecoveryError> = Err(RecoveryError::AlreadyRunning);
        start?;
        Ok(())
    }
    let err = fails().unwrap_err();
    assert!(err.downcast_ref::<RecoveryError>().is_some());
}
