//! Process-level assembly of the bus, scheduler and recovery coordinator.

pub mod api;
pub mod core_runtime;

pub use api::CoreSnapshot;
pub use core_runtime::{CoreRuntime, RuntimeComponents};
