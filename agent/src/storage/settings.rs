//! Settings file management

use std::path::PathBuf;

use secrecy::SecretString;
use serde::Deserialize;

use crate::logs::LogLevel;

/// Agent settings
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    /// Log level
    #[serde(default)]
    pub log_level: LogLevel,

    /// Log output configuration
    #[serde(default)]
    pub log: LogSettings,

    /// Node identifier used in MQTT topics
    #[serde(default = "default_node_id")]
    pub node_id: String,

    /// MQTT broker configuration
    #[serde(default)]
    pub mqtt_broker: MqttBrokerSettings,

    /// Container backend
    #[serde(default)]
    pub docker: DockerSettings,

    /// Cluster backend
    #[serde(default)]
    pub cluster: ClusterSettings,

    /// Command orchestration policy
    #[serde(default)]
    pub orchestrator: OrchestratorSettings,

    /// Health monitoring
    #[serde(default)]
    pub health: HealthSettings,

    /// Local HTTP server
    #[serde(default)]
    pub server: ServerSettings,

    /// Heartbeat interval in seconds
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_secs: u64,

    /// Grace period for in-flight commands on shutdown
    #[serde(default = "default_max_shutdown_delay")]
    pub max_shutdown_delay_secs: u64,
}

fn default_true() -> bool {
    true
}

fn default_node_id() -> String {
    "edge-node".to_string()
}

fn default_heartbeat_interval() -> u64 {
    60
}

fn default_max_shutdown_delay() -> u64 {
    30
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Info,
            log: LogSettings::default(),
            node_id: default_node_id(),
            mqtt_broker: MqttBrokerSettings::default(),
            docker: DockerSettings::default(),
            cluster: ClusterSettings::default(),
            orchestrator: OrchestratorSettings::default(),
            health: HealthSettings::default(),
            server: ServerSettings::default(),
            heartbeat_interval_secs: default_heartbeat_interval(),
            max_shutdown_delay_secs: default_max_shutdown_delay(),
        }
    }
}

/// Log output settings
#[derive(Debug, Clone, Deserialize)]
pub struct LogSettings {
    /// Write logs to stdout
    #[serde(default = "default_true")]
    pub stdout: bool,

    /// Emit JSON lines instead of text
    #[serde(default)]
    pub json: bool,

    /// Also write a daily rolling log file
    #[serde(default)]
    pub file: bool,

    /// Directory for rolling log files
    #[serde(default)]
    pub dir: Option<PathBuf>,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            stdout: true,
            json: false,
            file: false,
            dir: None,
        }
    }
}

/// MQTT broker settings
#[derive(Debug, Clone, Deserialize)]
pub struct MqttBrokerSettings {
    /// Broker host
    #[serde(default = "default_mqtt_host")]
    pub host: String,

    /// Broker port
    #[serde(default = "default_mqtt_port")]
    pub port: u16,

    /// Use TLS
    #[serde(default)]
    pub tls: bool,

    /// Optional path to a PEM-encoded CA certificate for broker TLS verification.
    /// When absent, the system certificate store is used.
    #[serde(default)]
    pub ca_cert_path: Option<String>,

    #[serde(default)]
    pub username: Option<String>,

    #[serde(default)]
    pub password: Option<SecretString>,

    #[serde(default = "default_keep_alive")]
    pub keep_alive_secs: u64,

    /// First reconnect delay
    #[serde(default = "default_reconnect_base")]
    pub reconnect_base_secs: u64,

    /// Reconnect delay ceiling
    #[serde(default = "default_reconnect_max")]
    pub reconnect_max_secs: u64,

    /// Status events kept while disconnected
    #[serde(default = "default_status_buffer")]
    pub status_buffer: usize,
}

fn default_mqtt_host() -> String {
    "localhost".to_string()
}

fn default_mqtt_port() -> u16 {
    1883
}

fn default_keep_alive() -> u64 {
    30
}

fn default_reconnect_base() -> u64 {
    1
}

fn default_reconnect_max() -> u64 {
    60
}

fn default_status_buffer() -> usize {
    256
}

impl Default for MqttBrokerSettings {
    fn default() -> Self {
        Self {
            host: default_mqtt_host(),
            port: default_mqtt_port(),
            tls: false,
            ca_cert_path: None,
            username: None,
            password: None,
            keep_alive_secs: default_keep_alive(),
            reconnect_base_secs: default_reconnect_base(),
            reconnect_max_secs: default_reconnect_max(),
            status_buffer: default_status_buffer(),
        }
    }
}

/// Container backend settings
#[derive(Debug, Clone, Deserialize)]
pub struct DockerSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Docker CLI binary
    #[serde(default = "default_docker_binary")]
    pub binary: String,
}

fn default_docker_binary() -> String {
    "docker".to_string()
}

impl Default for DockerSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            binary: default_docker_binary(),
        }
    }
}

/// Cluster backend settings
#[derive(Debug, Clone, Deserialize)]
pub struct ClusterSettings {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_api_server")]
    pub api_server: String,

    #[serde(default = "default_namespace")]
    pub namespace: String,

    #[serde(default)]
    pub token: Option<SecretString>,

    /// Service account token file, e.g.
    /// `/var/run/secrets/kubernetes.io/serviceaccount/token`
    #[serde(default)]
    pub token_file: Option<PathBuf>,

    #[serde(default)]
    pub ca_cert_path: Option<PathBuf>,

    #[serde(default)]
    pub insecure_skip_tls_verify: bool,

    #[serde(default = "default_field_manager")]
    pub field_manager: String,
}

fn default_api_server() -> String {
    "https://127.0.0.1:6443".to_string()
}

fn default_namespace() -> String {
    "default".to_string()
}

fn default_field_manager() -> String {
    "edgemgr".to_string()
}

impl Default for ClusterSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            api_server: default_api_server(),
            namespace: default_namespace(),
            token: None,
            token_file: None,
            ca_cert_path: None,
            insecure_skip_tls_verify: false,
            field_manager: default_field_manager(),
        }
    }
}

/// Command orchestration settings
#[derive(Debug, Clone, Deserialize)]
pub struct OrchestratorSettings {
    #[serde(default = "default_adapter_timeout")]
    pub adapter_timeout_secs: u64,

    #[serde(default = "default_command_ttl")]
    pub command_ttl_secs: u64,

    #[serde(default = "default_max_queue_depth")]
    pub max_queue_depth: usize,

    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_retry_base")]
    pub retry_base_secs: u64,

    #[serde(default = "default_retry_max")]
    pub retry_max_secs: u64,

    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,

    /// Inbound command channel between the transport and the dispatcher
    #[serde(default = "default_command_channel")]
    pub command_channel: usize,
}

fn default_adapter_timeout() -> u64 {
    120
}

fn default_command_ttl() -> u64 {
    600
}

fn default_max_queue_depth() -> usize {
    16
}

fn default_max_attempts() -> u32 {
    2
}

fn default_retry_base() -> u64 {
    1
}

fn default_retry_max() -> u64 {
    30
}

fn default_history_capacity() -> usize {
    1024
}

fn default_command_channel() -> usize {
    64
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            adapter_timeout_secs: default_adapter_timeout(),
            command_ttl_secs: default_command_ttl(),
            max_queue_depth: default_max_queue_depth(),
            max_attempts: default_max_attempts(),
            retry_base_secs: default_retry_base(),
            retry_max_secs: default_retry_max(),
            history_capacity: default_history_capacity(),
            command_channel: default_command_channel(),
        }
    }
}

/// Health monitor settings
#[derive(Debug, Clone, Deserialize)]
pub struct HealthSettings {
    #[serde(default = "default_probe_interval")]
    pub probe_interval_secs: u64,

    #[serde(default = "default_probe_timeout")]
    pub probe_timeout_secs: u64,

    /// Consecutive failures before `degraded`
    #[serde(default = "default_failure_threshold")]
    pub degraded_after: u32,

    /// Further failures before `down`
    #[serde(default = "default_failure_threshold")]
    pub down_after: u32,
}

fn default_probe_interval() -> u64 {
    15
}

fn default_probe_timeout() -> u64 {
    5
}

fn default_failure_threshold() -> u32 {
    3
}

impl Default for HealthSettings {
    fn default() -> Self {
        Self {
            probe_interval_secs: default_probe_interval(),
            probe_timeout_secs: default_probe_timeout(),
            degraded_after: default_failure_threshold(),
            down_after: default_failure_threshold(),
        }
    }
}

/// Local HTTP server settings
#[derive(Debug, Clone, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_server_host")]
    pub host: String,

    #[serde(default = "default_server_port")]
    pub port: u16,
}

fn default_server_host() -> String {
    "127.0.0.1".to_string()
}

fn default_server_port() -> u16 {
    8080
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            host: default_server_host(),
            port: default_server_port(),
        }
    }
}
