//! Health table transitions and admission

use std::sync::Arc;
use std::time::Duration;

use edgemgr::deploy::adapter::AdapterSet;
use edgemgr::health::table::HealthTable;
use edgemgr::health::tracker::Thresholds;
use edgemgr::models::health::{Component, HealthState, ProbeResult};
use edgemgr::mqtt::TransportLink;
use edgemgr::workers::health::{probe_all, Options};

use crate::stubs::{Behavior, StubAdapter};

fn failed() -> ProbeResult {
    ProbeResult::Failed("timed out".to_string())
}

#[test]
fn test_up_degraded_down_up() {
    let table = HealthTable::default();
    let component = Component::ContainerBackend;

    for _ in 0..2 {
        table.record(component, &failed());
    }
    assert_eq!(table.state(component), HealthState::Up);

    table.record(component, &failed());
    assert_eq!(table.state(component), HealthState::Degraded);
    assert!(table.is_admissible(component));

    for _ in 0..3 {
        table.record(component, &failed());
    }
    assert_eq!(table.state(component), HealthState::Down);
    assert!(!table.is_admissible(component));

    let status = table.record(component, &ProbeResult::Alive);
    assert_eq!(status.state, HealthState::Up);
    assert_eq!(status.consecutive_failures, 0);
    assert!(status.last_error.is_none());
}

#[test]
fn test_components_are_independent() {
    let table = HealthTable::default();
    table.record(
        Component::ClusterBackend,
        &ProbeResult::Unreachable("api server refused".to_string()),
    );

    assert_eq!(table.state(Component::ClusterBackend), HealthState::Down);
    assert_eq!(table.state(Component::ContainerBackend), HealthState::Up);
    assert_eq!(table.state(Component::Transport), HealthState::Up);
}

#[test]
fn test_custom_thresholds() {
    let table = HealthTable::new(Thresholds {
        degraded_after: 1,
        down_after: 1,
    });
    let component = Component::Transport;

    table.record(component, &failed());
    assert_eq!(table.state(component), HealthState::Degraded);
    table.record(component, &failed());
    assert_eq!(table.state(component), HealthState::Down);
}

#[test]
fn test_forced_state() {
    let table = HealthTable::default();
    table.set_state(Component::ContainerBackend, HealthState::Down);
    assert!(!table.is_admissible(Component::ContainerBackend));

    let snapshot = table.snapshot();
    assert_eq!(snapshot.len(), 3);
    assert_eq!(snapshot[0].component, Component::Transport);
}

#[tokio::test]
async fn test_probe_round_records_every_component() {
    let adapters = AdapterSet::new().with(StubAdapter::always(Behavior::Succeed));
    let table = HealthTable::default();
    let link = Arc::new(TransportLink::new());
    link.set_connected(true);

    let options = Options {
        interval: Duration::from_secs(15),
        probe_timeout: Duration::from_secs(1),
    };
    probe_all(&options, &table, &adapters, &link).await;

    for status in table.snapshot() {
        assert_eq!(status.state, HealthState::Up);
    }
    assert!(table.get(Component::ContainerBackend).last_checked_at.is_some());
    assert!(table.get(Component::Transport).last_checked_at.is_some());
}
