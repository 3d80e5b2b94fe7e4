//! Health state transitions

use chrono::{DateTime, Utc};

use crate::models::health::{HealthState, HealthStatus, ProbeResult};

/// Failure thresholds for health transitions
#[derive(Debug, Clone, Copy)]
pub struct Thresholds {
    /// Consecutive failures that take a component from up to degraded
    pub degraded_after: u32,

    /// Further consecutive failures, once degraded, before down
    pub down_after: u32,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            degraded_after: 3,
            down_after: 3,
        }
    }
}

/// Apply one probe result to a status.
///
/// Any success restores `up` immediately. An explicit unreachable result
/// goes straight to `down`.
pub fn observe(
    status: &HealthStatus,
    result: &ProbeResult,
    thresholds: Thresholds,
    now: DateTime<Utc>,
) -> HealthStatus {
    let mut next = status.clone();
    next.last_checked_at = Some(now);

    match result {
        ProbeResult::Alive => {
            next.state = HealthState::Up;
            next.consecutive_failures = 0;
            next.last_error = None;
        }
        ProbeResult::Failed(err) => {
            next.consecutive_failures = status.consecutive_failures.saturating_add(1);
            next.last_error = Some(err.clone());

            let down_at = thresholds.degraded_after.saturating_add(thresholds.down_after);
            next.state = if next.consecutive_failures >= down_at {
                HealthState::Down
            } else if next.consecutive_failures >= thresholds.degraded_after {
                // Never walk back from down without a success
                match status.state {
                    HealthState::Down => HealthState::Down,
                    _ => HealthState::Degraded,
                }
            } else {
                status.state
            };
        }
        ProbeResult::Unreachable(err) => {
            next.consecutive_failures = status.consecutive_failures.saturating_add(1);
            next.last_error = Some(err.clone());
            next.state = HealthState::Down;
        }
    }

    next
}
