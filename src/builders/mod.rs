//! Builders to assemble the scheduler and recovery coordinator from configuration plus
//! injected collaborators.

pub mod recovery_builder;
pub mod scheduler_builder;

pub use recovery_builder::RecoveryCoordinatorBuilder;
pub use scheduler_builder::SchedulerBuilder;
