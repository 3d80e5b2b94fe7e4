//! MQTT client implementation

use std::time::Duration;

use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::errors::AgentError;
use crate::models::status::{HealthReport, StatusEvent};
use crate::mqtt::topics::Topics;

/// MQTT broker address
#[derive(Debug, Clone)]
pub struct MqttAddress {
    pub host: String,
    pub port: u16,
    pub use_tls: bool,
    /// Optional path to a PEM-encoded CA certificate for broker verification.
    /// When `None` and `use_tls` is `true`, the system certificate store is used.
    pub ca_cert_path: Option<String>,
    pub username: Option<String>,
    pub password: Option<SecretString>,
    pub keep_alive: Duration,
}

impl Default for MqttAddress {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 1883,
            use_tls: false,
            ca_cert_path: None,
            username: None,
            password: None,
            keep_alive: Duration::from_secs(30),
        }
    }
}

/// What a poll of the event loop produced
#[derive(Debug)]
pub enum MqttEvent {
    /// Broker acknowledged the connection
    Connected,
    Message(MqttMessage),
    Other,
}

/// MQTT client wrapper
pub struct MqttClient {
    client: AsyncClient,
    eventloop: EventLoop,
    node_id: String,
}

impl MqttClient {
    /// Create a new MQTT client. Nothing is sent until the first `poll`.
    pub fn new(address: &MqttAddress, node_id: &str) -> Result<Self, AgentError> {
        if address.host.is_empty() {
            return Err(AgentError::MqttError("MQTT host is not configured".to_string()));
        }

        let client_id = format!("edgemgr-{}", node_id);

        let mut options = MqttOptions::new(&client_id, &address.host, address.port);
        options.set_keep_alive(address.keep_alive);
        // Persistent session so QoS 1 commands sent while offline are delivered
        options.set_clean_session(false);
        if let Some(ref username) = address.username {
            let password = address
                .password
                .as_ref()
                .map(|p| p.expose_secret().to_string())
                .unwrap_or_default();
            options.set_credentials(username, password);
        }

        if address.use_tls {
            use rumqttc::{TlsConfiguration, Transport};
            use rustls::ClientConfig;
            use std::sync::Arc;

            let mut root_cert_store = rustls::RootCertStore::empty();

            if let Some(ref ca_path) = address.ca_cert_path {
                let ca_pem = std::fs::read(ca_path)
                    .map_err(|e| AgentError::MqttError(format!("Failed to read CA cert {ca_path}: {e}")))?;
                let mut cursor = std::io::Cursor::new(ca_pem);
                for cert in rustls_pemfile::certs(&mut cursor).flatten() {
                    let _ = root_cert_store.add(cert);
                }
            } else {
                for cert in rustls_native_certs::load_native_certs().unwrap_or_default() {
                    let _ = root_cert_store.add(cert);
                }
            }

            let client_config = ClientConfig::builder()
                .with_root_certificates(root_cert_store)
                .with_no_client_auth();

            options.set_transport(Transport::tls_with_config(TlsConfiguration::Rustls(
                Arc::new(client_config),
            )));
        }

        let (client, eventloop) = AsyncClient::new(options, 64);

        Ok(Self {
            client,
            eventloop,
            node_id: node_id.to_string(),
        })
    }

    /// Subscribe to every command topic of this node
    pub fn subscribe_commands(&self) -> Result<(), AgentError> {
        let topic = Topics::commands_filter(&self.node_id);
        self.client
            .try_subscribe(&topic, QoS::AtLeastOnce)
            .map_err(|e| AgentError::MqttError(e.to_string()))?;
        info!("Subscribed to: {}", topic);
        Ok(())
    }

    /// Queue a status event for publishing.
    ///
    /// Non-blocking: the request channel is drained by `poll`, which runs on
    /// the same task as the caller.
    pub fn publish_status(&self, event: &StatusEvent) -> Result<(), AgentError> {
        let topic = Topics::status(&self.node_id);
        let payload = serde_json::to_vec(event)?;

        self.client
            .try_publish(&topic, QoS::AtLeastOnce, false, payload)
            .map_err(|e| AgentError::MqttError(e.to_string()))?;

        debug!("Published status of {} to: {}", event.command_id, topic);
        Ok(())
    }

    /// Queue a heartbeat for publishing
    pub fn publish_health(&self, report: &HealthReport) -> Result<(), AgentError> {
        let topic = Topics::health(&self.node_id);
        let payload = serde_json::to_vec(report)?;

        self.client
            .try_publish(&topic, QoS::AtMostOnce, false, payload)
            .map_err(|e| AgentError::MqttError(e.to_string()))?;

        debug!("Published heartbeat to: {}", topic);
        Ok(())
    }

    /// Poll for events
    pub async fn poll(&mut self) -> Result<MqttEvent, AgentError> {
        match self.eventloop.poll().await {
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                let topic = publish.topic.clone();
                let payload = publish.payload.to_vec();

                debug!("Received message on topic: {}", topic);

                Ok(MqttEvent::Message(MqttMessage { topic, payload }))
            }
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                info!("MQTT connected");
                Ok(MqttEvent::Connected)
            }
            Ok(Event::Incoming(Packet::SubAck(_))) => {
                debug!("Subscription acknowledged");
                Ok(MqttEvent::Other)
            }
            Ok(_) => Ok(MqttEvent::Other),
            Err(e) => {
                warn!("MQTT poll error: {}", e);
                Err(AgentError::MqttError(e.to_string()))
            }
        }
    }

    /// Disconnect from broker.
    ///
    /// Keeps driving the event loop until the disconnect is sent, so that
    /// publishes queued before it reach the broker. Bounded by `timeout`.
    pub async fn disconnect(&mut self, timeout: Duration) -> Result<(), AgentError> {
        self.client
            .try_disconnect()
            .map_err(|e| AgentError::MqttError(e.to_string()))?;

        let drained = tokio::time::timeout(timeout, async {
            loop {
                match self.eventloop.poll().await {
                    Ok(Event::Outgoing(Outgoing::Disconnect)) | Err(_) => break,
                    Ok(_) => {}
                }
            }
        })
        .await;
        if drained.is_err() {
            warn!("MQTT disconnect did not complete within {:?}", timeout);
        }

        info!("MQTT disconnected");
        Ok(())
    }
}

/// MQTT message
#[derive(Debug, Clone)]
pub struct MqttMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

impl MqttMessage {
    /// Parse payload as JSON
    pub fn parse_json<T: for<'de> Deserialize<'de>>(&self) -> Result<T, AgentError> {
        serde_json::from_slice(&self.payload)
            .map_err(|e| AgentError::ValidationError(format!("Malformed message body: {e}")))
    }
}
