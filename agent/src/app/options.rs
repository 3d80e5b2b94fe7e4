//! Application configuration options

use std::time::Duration;

use crate::deploy::{cluster, docker};
use crate::health::tracker::Thresholds;
use crate::mqtt::client::MqttAddress;
use crate::orchestrator;
use crate::storage::settings::Settings;
use crate::utils::CooldownOptions;
use crate::workers::{health, heartbeat, mqtt};

/// Main application options
#[derive(Debug, Clone)]
pub struct AppOptions {
    /// Lifecycle configuration
    pub lifecycle: LifecycleOptions,

    /// Enable local HTTP server
    pub enable_socket_server: bool,

    /// Server configuration
    pub server: ServerOptions,

    /// MQTT worker options
    pub mqtt_worker: mqtt::Options,

    /// Status events kept while the broker is unreachable
    pub status_buffer: usize,

    /// Capacity of the transport to dispatcher channel
    pub command_channel: usize,

    /// Orchestration policy
    pub orchestrator: orchestrator::Options,

    /// Health worker options
    pub health_worker: health::Options,

    /// Failure thresholds for health transitions
    pub health_thresholds: Thresholds,

    /// Heartbeat worker options
    pub heartbeat_worker: heartbeat::Options,

    /// Container backend, `None` when disabled
    pub docker: Option<docker::Options>,

    /// Cluster backend, `None` when disabled
    pub cluster: Option<cluster::Options>,
}

impl Default for AppOptions {
    fn default() -> Self {
        Self {
            lifecycle: LifecycleOptions::default(),
            enable_socket_server: true,
            server: ServerOptions::default(),
            mqtt_worker: mqtt::Options::default(),
            status_buffer: 256,
            command_channel: 64,
            orchestrator: orchestrator::Options::default(),
            health_worker: health::Options::default(),
            health_thresholds: Thresholds::default(),
            heartbeat_worker: heartbeat::Options::default(),
            docker: Some(docker::Options::default()),
            cluster: None,
        }
    }
}

impl AppOptions {
    /// Map settings onto worker options
    pub fn from_settings(settings: &Settings, agent_version: &str) -> Self {
        let broker = &settings.mqtt_broker;
        let policy = &settings.orchestrator;

        let docker = settings.docker.enabled.then(|| docker::Options {
            binary: settings.docker.binary.clone(),
            ..Default::default()
        });

        let cluster = settings.cluster.enabled.then(|| cluster::Options {
            api_server: settings.cluster.api_server.clone(),
            namespace: settings.cluster.namespace.clone(),
            token: settings.cluster.token.clone(),
            token_file: settings.cluster.token_file.clone(),
            ca_cert_path: settings.cluster.ca_cert_path.clone(),
            insecure_skip_tls_verify: settings.cluster.insecure_skip_tls_verify,
            field_manager: settings.cluster.field_manager.clone(),
            probe_timeout: Duration::from_secs(settings.health.probe_timeout_secs),
        });

        Self {
            lifecycle: LifecycleOptions {
                max_shutdown_delay: Duration::from_secs(settings.max_shutdown_delay_secs),
            },
            enable_socket_server: settings.server.enabled,
            server: ServerOptions {
                host: settings.server.host.clone(),
                port: settings.server.port,
            },
            mqtt_worker: mqtt::Options {
                broker_address: MqttAddress {
                    host: broker.host.clone(),
                    port: broker.port,
                    use_tls: broker.tls,
                    ca_cert_path: broker.ca_cert_path.clone(),
                    username: broker.username.clone(),
                    password: broker.password.clone(),
                    keep_alive: Duration::from_secs(broker.keep_alive_secs),
                },
                node_id: settings.node_id.clone(),
                reconnect_backoff: CooldownOptions {
                    base_delay: Duration::from_secs(broker.reconnect_base_secs),
                    max_delay: Duration::from_secs(broker.reconnect_max_secs),
                    multiplier: 2.0,
                },
            },
            status_buffer: broker.status_buffer,
            command_channel: policy.command_channel.max(1),
            orchestrator: orchestrator::Options {
                adapter_timeout: Duration::from_secs(policy.adapter_timeout_secs),
                command_ttl: Duration::from_secs(policy.command_ttl_secs),
                max_queue_depth: policy.max_queue_depth,
                max_attempts: policy.max_attempts.max(1),
                retry_backoff: CooldownOptions {
                    base_delay: Duration::from_secs(policy.retry_base_secs),
                    max_delay: Duration::from_secs(policy.retry_max_secs),
                    multiplier: 2.0,
                },
                history_capacity: policy.history_capacity,
            },
            health_worker: health::Options {
                interval: Duration::from_secs(settings.health.probe_interval_secs),
                probe_timeout: Duration::from_secs(settings.health.probe_timeout_secs),
            },
            health_thresholds: Thresholds {
                degraded_after: settings.health.degraded_after,
                down_after: settings.health.down_after,
            },
            heartbeat_worker: heartbeat::Options {
                node_id: settings.node_id.clone(),
                agent_version: agent_version.to_string(),
                interval: Duration::from_secs(settings.heartbeat_interval_secs),
            },
            docker,
            cluster,
        }
    }
}

/// Lifecycle options for the agent
#[derive(Debug, Clone)]
pub struct LifecycleOptions {
    /// Grace period for in-flight commands on shutdown
    pub max_shutdown_delay: Duration,
}

impl Default for LifecycleOptions {
    fn default() -> Self {
        Self {
            max_shutdown_delay: Duration::from_secs(30),
        }
    }
}

/// Local HTTP server options
#[derive(Debug, Clone)]
pub struct ServerOptions {
    /// Host to bind to
    pub host: String,

    /// Port to listen on
    pub port: u16,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
        }
    }
}
