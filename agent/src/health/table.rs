//! Shared health table

use chrono::Utc;
use dashmap::DashMap;
use tracing::{info, warn};

use crate::health::tracker::{observe, Thresholds};
use crate::models::health::{Component, HealthState, HealthStatus, ProbeResult};

/// Per-component health, written by the health monitor and read by the
/// orchestrator's admission check
pub struct HealthTable {
    entries: DashMap<Component, HealthStatus>,
    thresholds: Thresholds,
}

impl HealthTable {
    /// Create a table with every component starting `up`
    pub fn new(thresholds: Thresholds) -> Self {
        let entries = DashMap::new();
        for component in Component::ALL {
            entries.insert(component, HealthStatus::up(component));
        }
        Self {
            entries,
            thresholds,
        }
    }

    pub fn get(&self, component: Component) -> HealthStatus {
        self.entries
            .get(&component)
            .map(|entry| entry.value().clone())
            .unwrap_or_else(|| HealthStatus::up(component))
    }

    pub fn state(&self, component: Component) -> HealthState {
        self.entries
            .get(&component)
            .map(|entry| entry.state)
            .unwrap_or(HealthState::Up)
    }

    /// Whether new work may be admitted against a component
    pub fn is_admissible(&self, component: Component) -> bool {
        self.state(component) != HealthState::Down
    }

    /// Record a probe result and return the new status
    pub fn record(&self, component: Component, result: &ProbeResult) -> HealthStatus {
        let mut entry = self
            .entries
            .entry(component)
            .or_insert_with(|| HealthStatus::up(component));

        let previous = entry.state;
        let next = observe(&entry, result, self.thresholds, Utc::now());
        *entry = next.clone();
        drop(entry);

        if previous != next.state {
            match next.state {
                HealthState::Up => info!("{} recovered: {:?} -> up", component, previous),
                HealthState::Degraded => warn!(
                    "{} degraded after {} failed probes: {}",
                    component,
                    next.consecutive_failures,
                    next.last_error.as_deref().unwrap_or("")
                ),
                HealthState::Down => warn!(
                    "{} is down: {}",
                    component,
                    next.last_error.as_deref().unwrap_or("")
                ),
            }
        }

        next
    }

    /// Force a component's state, bypassing probe history
    pub fn set_state(&self, component: Component, state: HealthState) {
        let mut entry = self
            .entries
            .entry(component)
            .or_insert_with(|| HealthStatus::up(component));
        entry.state = state;
        entry.last_checked_at = Some(Utc::now());
    }

    /// All components, ordered
    pub fn snapshot(&self) -> Vec<HealthStatus> {
        let mut statuses: Vec<HealthStatus> =
            self.entries.iter().map(|entry| entry.value().clone()).collect();
        statuses.sort_by_key(|status| status.component);
        statuses
    }
}

impl Default for HealthTable {
    fn default() -> Self {
        Self::new(Thresholds::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_starts_up() {
        let table = HealthTable::default();
        assert_eq!(table.snapshot().len(), 3);
        assert!(table.is_admissible(Component::ClusterBackend));
    }

    #[test]
    fn test_down_is_not_admissible() {
        let table = HealthTable::default();
        table.record(
            Component::ClusterBackend,
            &ProbeResult::Unreachable("connection refused".to_string()),
        );
        assert!(!table.is_admissible(Component::ClusterBackend));
        assert!(table.is_admissible(Component::ContainerBackend));

        table.record(Component::ClusterBackend, &ProbeResult::Alive);
        assert!(table.is_admissible(Component::ClusterBackend));
    }
}
