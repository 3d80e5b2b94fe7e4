//! Application state management

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::app::options::AppOptions;
use crate::deploy::adapter::AdapterSet;
use crate::deploy::cluster::ClusterAdapter;
use crate::deploy::docker::DockerAdapter;
use crate::errors::AgentError;
use crate::health::table::HealthTable;
use crate::mqtt::outbox::Outbox;
use crate::mqtt::TransportLink;
use crate::orchestrator::Orchestrator;

/// Main application state
pub struct AppState {
    /// Agent version string
    pub agent_version: String,

    /// Configured backends
    pub adapters: AdapterSet,

    /// Component health, written by the health worker
    pub health: Arc<HealthTable>,

    /// Outbound status buffer
    pub outbox: Arc<Outbox>,

    /// Broker connection state
    pub link: Arc<TransportLink>,

    /// Command orchestrator
    pub orchestrator: Arc<Orchestrator>,
}

impl AppState {
    /// Initialize application state
    pub fn init(agent_version: String, options: &AppOptions) -> Result<Self, AgentError> {
        info!("Initializing application state...");

        let adapters = build_adapters(options)?;
        if adapters.is_empty() {
            return Err(AgentError::ConfigError(
                "No backend enabled: enable docker or cluster in settings".to_string(),
            ));
        }

        let health = Arc::new(HealthTable::new(options.health_thresholds));
        let outbox = Arc::new(Outbox::new(options.status_buffer));
        let link = Arc::new(TransportLink::new());

        let orchestrator = Arc::new(Orchestrator::new(
            options.orchestrator.clone(),
            adapters.clone(),
            health.clone(),
            outbox.clone(),
        ));

        Ok(Self {
            agent_version,
            adapters,
            health,
            outbox,
            link,
            orchestrator,
        })
    }

    /// Drain the orchestrator, aborting executions still running after `grace`
    pub async fn shutdown(&self, grace: Duration) -> Result<(), AgentError> {
        info!("Shutting down application state...");
        self.orchestrator.shutdown(grace).await;
        Ok(())
    }
}

/// Build the adapter set from the enabled backends
pub fn build_adapters(options: &AppOptions) -> Result<AdapterSet, AgentError> {
    let mut adapters = AdapterSet::new();

    if let Some(ref docker) = options.docker {
        info!("Container backend enabled ({})", docker.binary);
        adapters = adapters.with(Arc::new(DockerAdapter::new(docker.clone())));
    }

    if let Some(ref cluster) = options.cluster {
        info!(
            "Cluster backend enabled ({}, namespace {})",
            cluster.api_server, cluster.namespace
        );
        adapters = adapters.with(Arc::new(ClusterAdapter::new(cluster.clone())?));
    }

    Ok(adapters)
}
