//! Heartbeat worker: periodic health report for the broker

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::health::table::HealthTable;
use crate::models::status::HealthReport;

/// Heartbeat worker options
#[derive(Debug, Clone)]
pub struct Options {
    pub node_id: String,
    pub agent_version: String,
    pub interval: Duration,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            node_id: "edge-node".to_string(),
            agent_version: env!("CARGO_PKG_VERSION").to_string(),
            interval: Duration::from_secs(60),
        }
    }
}

/// Build a report from the current health table
pub fn report(options: &Options, table: &HealthTable) -> HealthReport {
    HealthReport {
        node_id: options.node_id.clone(),
        version: options.agent_version.clone(),
        components: table.snapshot(),
        timestamp: Utc::now(),
    }
}

/// Run the heartbeat worker
pub async fn run<S, F>(
    options: &Options,
    table: &HealthTable,
    reports_tx: mpsc::Sender<HealthReport>,
    sleep_fn: S,
    mut shutdown_signal: Pin<Box<dyn Future<Output = ()> + Send>>,
) where
    S: Fn(Duration) -> F,
    F: Future<Output = ()>,
{
    info!("Heartbeat worker starting...");

    loop {
        tokio::select! {
            _ = &mut shutdown_signal => {
                info!("Heartbeat worker shutting down...");
                return;
            }
            _ = sleep_fn(options.interval) => {}
        }

        // Heartbeats are best effort; skip one if the last is still pending
        if reports_tx.try_send(report(options, table)).is_err() {
            debug!("Heartbeat skipped, previous report not yet sent");
        }
    }
}
