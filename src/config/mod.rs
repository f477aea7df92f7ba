//! Configuration models for the event bus, scheduler and recovery coordinator.

pub mod bus;
pub mod recovery;
pub mod scheduler;

use std::path::Path;

use serde::{Deserialize, Serialize};

pub use bus::EventBusConfig;
pub use recovery::RecoveryConfig;
pub use scheduler::SchedulerConfig;

use crate::core::error::ConfigError;

/// Environment variable naming a JSON configuration file.
pub const CONFIG_PATH_ENV: &str = "TASK_COORDINATOR_CONFIG";

/// Root configuration for the whole coordination core.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    /// Event bus settings.
    pub event_bus: EventBusConfig,
    /// Scheduler settings.
    pub scheduler: SchedulerConfig,
    /// Recovery coordinator settings.
    pub recovery: RecoveryConfig,
}

impl CoreConfig {
    /// Validate every section.
    pub fn validate(&self) -> Result<(), String> {
        self.event_bus
            .validate()
            .map_err(|e| format!("event_bus invalid: {e}"))?;
        self.scheduler
            .validate()
            .map_err(|e| format!("scheduler invalid: {e}"))?;
        self.recovery
            .validate()
            .map_err(|e| format!("recovery invalid: {e}"))?;
        Ok(())
    }

    /// Parse configuration from a JSON string and validate.
    pub fn from_json_str(input: &str) -> Result<Self, ConfigError> {
        let cfg: Self =
            serde_json::from_str(input).map_err(|e| ConfigError::Parse(e.to_string()))?;
        cfg.validate().map_err(ConfigError::Invalid)?;
        Ok(cfg)
    }

    /// Read and parse a JSON configuration file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let input = std::fs::read_to_string(path)?;
        Self::from_json_str(&input)
    }

    /// Load configuration from the process environment.
    ///
    /// Loads `.env` if present, starts from the file named by
    /// `TASK_COORDINATOR_CONFIG` (or defaults), then applies `TASK_COORDINATOR_*`
    /// overrides.
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        let mut cfg = match std::env::var(CONFIG_PATH_ENV) {
            Ok(path) => Self::from_json_file(path)?,
            Err(_) => Self::default(),
        };
        cfg.apply_overrides(|key| std::env::var(key).ok())?;
        cfg.validate().map_err(ConfigError::Invalid)?;
        Ok(cfg)
    }

    /// Apply `TASK_COORDINATOR_*` overrides read through `lookup`.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        override_value(&lookup, "TASK_COORDINATOR_BUS_WORKERS", &mut self.event_bus.worker_count)?;
        override_value(
            &lookup,
            "TASK_COORDINATOR_BUS_QUEUE_CAPACITY",
            &mut self.event_bus.queue_capacity,
        )?;
        override_value(
            &lookup,
            "TASK_COORDINATOR_MAX_CONCURRENT_TASKS",
            &mut self.scheduler.max_concurrent_tasks,
        )?;
        override_value(
            &lookup,
            "TASK_COORDINATOR_TICK_INTERVAL_MS",
            &mut self.scheduler.tick_interval_ms,
        )?;
        override_value(
            &lookup,
            "TASK_COORDINATOR_MAX_RETRY_COUNT",
            &mut self.scheduler.max_retry_count,
        )?;
        override_value(
            &lookup,
            "TASK_COORDINATOR_PAUSE_ON_ERROR",
            &mut self.scheduler.pause_on_error,
        )?;
        override_value(
            &lookup,
            "TASK_COORDINATOR_RECOVERY_WORKERS",
            &mut self.recovery.worker_count,
        )?;
        override_value(
            &lookup,
            "TASK_COORDINATOR_AUTO_ESCALATE",
            &mut self.recovery.auto_escalate,
        )?;
        Ok(())
    }
}

fn override_value<F, T>(lookup: &F, key: &str, target: &mut T) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    if let Some(raw) = lookup(key) {
        *target = raw
            .trim()
            .parse()
            .map_err(|e| ConfigError::Parse(format!("{key}: {e}")))?;
        tracing::debug!(key, value = %raw, "configuration override applied");
    }
    Ok(())
}
