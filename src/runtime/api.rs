//! API-facing snapshot models.

use serde::{Deserialize, Serialize};

use crate::core::{BusStats, HealthStatus, RecoveryStatistics, SchedulerState, SchedulerStatus};

/// Combined statistics of all three components.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreSnapshot {
    /// When the snapshot was taken (ms since epoch).
    pub taken_at_ms: u128,
    /// Event bus statistics.
    pub bus: BusStats,
    /// Scheduler status.
    pub scheduler: SchedulerStatus,
    /// Recovery statistics.
    pub recovery: RecoveryStatistics,
    /// Aggregated health.
    pub health: HealthStatus,
}

impl CoreSnapshot {
    /// Whether the aggregated health is `Healthy`.
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        self.health == HealthStatus::Healthy
    }
}

/// Aggregate health: the recovery health, lowered to `Degraded` when the scheduler is
/// paused or the bus has rejected events.
#[must_use]
pub fn aggregate_health(
    bus: &BusStats,
    scheduler: &SchedulerStatus,
    recovery: &RecoveryStatistics,
) -> HealthStatus {
    let impaired = scheduler.state == SchedulerState::Paused || bus.dropped > 0;
    match recovery.health {
        HealthStatus::Healthy if impaired => HealthStatus::Degraded,
        other => other,
    }
}
