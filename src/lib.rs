//! # Prometheus Task Coordinator
//!
//! Task scheduling and failure-recovery coordination core for desktop automation agents.
//!
//! The crate decides *when* a unit of work runs, *how* failures are retried or escalated,
//! and *how* components observe each other's state changes without direct coupling. It is
//! single-process and in-memory; persistence is delegated through the narrow
//! [`AuditSink`](core::AuditSink) interface.
//!
//! ## Components
//!
//! - **[`EventBus`](core::EventBus)**: bounded-queue, multi-worker publish/subscribe
//!   dispatcher. Handlers run in descending subscription priority and are retried with a
//!   linear delay when they fail.
//! - **[`PriorityScheduler`](core::PriorityScheduler)**: priority queue of pending tasks with
//!   context, dependency and backoff admission checks and a bounded number of concurrent
//!   executions. Tasks whose kind does not suit the current context are parked until it
//!   changes.
//! - **[`RecoveryCoordinator`](core::RecoveryCoordinator)**: one session per detected error,
//!   walked through analysis, planning, execution and validation with exponential backoff
//!   and escalation.
//!
//! [`CoreRuntime`](runtime::CoreRuntime) assembles all three from one
//! [`CoreConfig`](config::CoreConfig) and wires the coordinator to the bus so that
//! `task_failed` and `error_occurred` events open recovery sessions.
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use prometheus_task_coordinator::config::CoreConfig;
//! use prometheus_task_coordinator::core::{Task, TaskAction, TaskOptions};
//! use prometheus_task_coordinator::runtime::{CoreRuntime, RuntimeComponents};
//!
//! prometheus_task_coordinator::util::init_tracing();
//! let runtime = CoreRuntime::new(
//!     CoreConfig::from_env()?,
//!     RuntimeComponents::new(Arc::new(my_executor), Arc::new(my_recovery_executor)),
//! )?;
//! runtime.start()?;
//!
//! runtime
//!     .scheduler()
//!     .add_task(
//!         Task::new("collect-mail", "Collect mail", "daily", TaskAction::Click { x: 40, y: 80 }),
//!         TaskOptions::new(),
//!     )
//!     .await?;
//!
//! println!("{:?}", runtime.snapshot().health);
//! runtime.stop().await;
//! ```

#![deny(warnings)]
#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// Builders to construct scheduler components from configuration.
pub mod builders;
/// Configuration models for the bus, scheduler and recovery coordinator.
pub mod config;
/// Event bus, scheduler, recovery coordinator and their shared models.
pub mod core;
/// Infrastructure adapters for scheduler storage.
pub mod infra;
/// Runtime assembly and API surface.
pub mod runtime;
/// Shared utilities.
pub mod util;
