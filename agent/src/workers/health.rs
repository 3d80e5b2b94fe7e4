//! Health monitor worker
//!
//! Probes every monitored component on a fixed interval and records the
//! results in the shared health table. Probes run concurrently and each one
//! is bounded by its own timeout, so a hung backend cannot stall the others.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use futures::future::join_all;
use tracing::{debug, info};

use crate::deploy::adapter::AdapterSet;
use crate::health::table::HealthTable;
use crate::models::health::{Component, ProbeResult};
use crate::mqtt::TransportLink;

/// Health worker options
#[derive(Debug, Clone)]
pub struct Options {
    /// Time between probe rounds
    pub interval: Duration,

    /// Bound on a single probe
    pub probe_timeout: Duration,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(15),
            probe_timeout: Duration::from_secs(5),
        }
    }
}

/// Run the health worker
pub async fn run<S, F>(
    options: &Options,
    table: &HealthTable,
    adapters: &AdapterSet,
    link: &TransportLink,
    sleep_fn: S,
    mut shutdown_signal: Pin<Box<dyn Future<Output = ()> + Send>>,
) where
    S: Fn(Duration) -> F,
    F: Future<Output = ()>,
{
    info!("Health worker starting...");

    loop {
        probe_all(options, table, adapters, link).await;

        tokio::select! {
            _ = &mut shutdown_signal => {
                info!("Health worker shutting down...");
                return;
            }
            _ = sleep_fn(options.interval) => {}
        }
    }
}

/// Run one probe round and record every result
pub async fn probe_all(
    options: &Options,
    table: &HealthTable,
    adapters: &AdapterSet,
    link: &TransportLink,
) {
    let backend_probes = adapters.iter().map(|adapter| async move {
        let component = Component::for_target(adapter.kind());
        let result = match tokio::time::timeout(options.probe_timeout, adapter.probe()).await {
            Ok(result) => result,
            Err(_) => ProbeResult::Failed(format!(
                "probe timed out after {}s",
                options.probe_timeout.as_secs_f64()
            )),
        };
        (component, result)
    });
    let mut results = join_all(backend_probes).await;

    let transport = if link.is_connected() {
        ProbeResult::Alive
    } else {
        ProbeResult::Failed("broker not connected".to_string())
    };
    results.push((Component::Transport, transport));

    for (component, result) in results {
        let status = table.record(component, &result);
        debug!(
            "Probed {}: {:?} ({} consecutive failures)",
            component, status.state, status.consecutive_failures
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use async_trait::async_trait;

    use crate::deploy::adapter::{AdapterOutcome, BackendAdapter};
    use crate::errors::AdapterError;
    use crate::models::command::{Action, TargetKind};
    use crate::models::health::HealthState;

    struct HungAdapter;

    #[async_trait]
    impl BackendAdapter for HungAdapter {
        fn kind(&self) -> TargetKind {
            TargetKind::ClusterResource
        }

        async fn execute(
            &self,
            _action: Action,
            _target_name: &str,
            _payload: &serde_json::Value,
            _timeout: Duration,
        ) -> Result<AdapterOutcome, AdapterError> {
            Err(AdapterError::permanent("unused"))
        }

        async fn probe(&self) -> ProbeResult {
            std::future::pending().await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_probe_counts_as_failure() {
        let options = Options::default();
        let table = HealthTable::default();
        let adapters = AdapterSet::new().with(Arc::new(HungAdapter));
        let link = TransportLink::new();
        link.set_connected(true);

        for _ in 0..3 {
            probe_all(&options, &table, &adapters, &link).await;
        }

        assert_eq!(table.state(Component::ClusterBackend), HealthState::Degraded);
        assert_eq!(table.state(Component::Transport), HealthState::Up);
    }

    #[tokio::test]
    async fn test_disconnected_transport_fails_probe() {
        let options = Options::default();
        let table = HealthTable::default();
        let link = TransportLink::new();

        probe_all(&options, &table, &AdapterSet::new(), &link).await;

        assert_eq!(table.get(Component::Transport).consecutive_failures, 1);
    }
}
