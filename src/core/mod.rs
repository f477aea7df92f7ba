//! Event bus, priority scheduler and recovery coordinator, plus the models and
//! collaborator traits they share.

pub mod audit;
pub mod error;
pub mod event;
pub mod event_bus;
pub mod executor;
pub mod recovery;
pub mod scheduler;
pub mod task;

pub use audit::{
    build_audit_event, AuditComponent, AuditEvent, AuditSink, InMemoryAuditSink,
    SharedAuditSink, TracingAuditSink,
};
pub use error::{AppResult, BusError, ConfigError, CoreError, RecoveryError, SchedulerError};
pub use event::{Event, EventPriority, EventType};
pub use event_bus::{
    handler_fn, BusStats, EventBus, EventFilter, EventHandler, FnHandler, SubscribeOptions,
    SubscriptionId,
};
pub use executor::{AdmissibleKinds, AllowAllProbe, ContextProbe, StaticContextProbe, TaskExecutor};
pub use recovery::{
    DetectedError, ErrorCategory, ErrorClassification, ErrorClassifier, ErrorContext,
    ErrorSeverity, HealthStatus, RecoveryAction, RecoveryActionExecutor, RecoveryCoordinator,
    RecoveryPhase, RecoveryResult, RecoverySession, RecoveryStatistics, RecoveryStatus,
    RecoveryStrategy, RetryPolicy, SessionId, StandardErrorClassifier,
    DEFAULT_RECOVERY_PRIORITY, MAX_RECOVERY_PRIORITY,
};
pub use scheduler::{PriorityScheduler, SchedulerState, SchedulerStatus};
pub use task::{
    PriorityLevel, ScheduledTask, Task, TaskAction, TaskId, TaskKind, TaskOptions, TaskOutcome,
    TaskStatus,
};
