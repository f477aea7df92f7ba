//! Error types for the event bus, scheduler and recovery coordinator.

use thiserror::Error;

use crate::core::task::TaskId;

/// Errors produced by the event bus lifecycle.
#[derive(Debug, Error)]
pub enum BusError {
    /// `start` was called on a bus whose workers are already running.
    #[error("event bus already running")]
    AlreadyRunning,
    /// Configuration rejected during construction.
    #[error("invalid event bus configuration: {0}")]
    InvalidConfig(String),
}

/// Errors produced by the priority scheduler.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Queue is full; the task was not admitted.
    #[error("queue full: {0}")]
    QueueFull(String),
    /// A live (queued, waiting or running) task with the same id exists.
    #[error("duplicate task: {0}")]
    DuplicateTask(TaskId),
    /// Operation not allowed in the scheduler's current state.
    #[error("invalid scheduler state: {0}")]
    InvalidState(String),
    /// Configuration rejected during construction.
    #[error("invalid scheduler configuration: {0}")]
    InvalidConfig(String),
    /// Builder is missing a required collaborator.
    #[error("missing component: {0}")]
    MissingComponent(&'static str),
    /// Queue backend failure with context.
    #[error("backend error: {0}")]
    Backend(String),
}

/// Errors produced by the recovery coordinator.
#[derive(Debug, Error)]
pub enum RecoveryError {
    /// `start` was called on a coordinator whose workers are already running.
    #[error("recovery coordinator already running")]
    AlreadyRunning,
    /// The coordinator has been stopped and no longer accepts sessions.
    #[error("recovery coordinator is shut down")]
    ShutDown,
    /// Configuration rejected during construction.
    #[error("invalid recovery configuration: {0}")]
    InvalidConfig(String),
    /// Builder is missing a required collaborator.
    #[error("missing component: {0}")]
    MissingComponent(&'static str),
}

/// Errors produced while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Input could not be parsed.
    #[error("parse error: {0}")]
    Parse(String),
    /// Parsed configuration failed validation.
    #[error("invalid configuration: {0}")]
    Invalid(String),
    /// Configuration file could not be read.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Umbrella error for assembling and running the whole core.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Event bus failure.
    #[error(transparent)]
    Bus(#[from] BusError),
    /// Scheduler failure.
    #[error(transparent)]
    Scheduler(#[from] SchedulerError),
    /// Recovery coordinator failure.
    #[error(transparent)]
    Recovery(#[from] RecoveryError),
    /// Configuration failure.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Application-facing result using anyhow for handler and collaborator callbacks.
pub type AppResult<T> = Result<T, anyhow::Error>;
