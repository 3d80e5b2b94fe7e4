//! MQTT worker: broker session, inbound commands and outbound status

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::errors::{AgentError, ErrorKind};
use crate::models::command::{Command, CommandMessage, TargetKey, TargetKind};
use crate::models::status::{HealthReport, StatusEvent};
use crate::mqtt::client::{MqttAddress, MqttClient, MqttEvent, MqttMessage};
use crate::mqtt::outbox::Outbox;
use crate::mqtt::topics::Topics;
use crate::mqtt::TransportLink;
use crate::utils::{calc_exp_backoff, CooldownOptions};

/// Bound on flushing queued publishes when shutting down
const DISCONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// MQTT worker options
#[derive(Debug, Clone)]
pub struct Options {
    /// MQTT broker address
    pub broker_address: MqttAddress,

    /// Node identifier used in topics and the client id
    pub node_id: String,

    /// Delay between reconnect attempts
    pub reconnect_backoff: CooldownOptions,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            broker_address: MqttAddress::default(),
            node_id: "edge-node".to_string(),
            reconnect_backoff: CooldownOptions {
                base_delay: Duration::from_secs(1),
                max_delay: Duration::from_secs(60),
                multiplier: 2.0,
            },
        }
    }
}

/// Channels between the MQTT worker and the rest of the agent
pub struct Channels<'a> {
    pub link: &'a TransportLink,
    pub outbox: &'a Outbox,
    pub commands_tx: mpsc::Sender<Command>,
    pub heartbeat_rx: mpsc::Receiver<HealthReport>,
}

/// Run the MQTT worker
pub async fn run<S, F>(
    options: &Options,
    channels: Channels<'_>,
    sleep_fn: S,
    mut shutdown_signal: Pin<Box<dyn Future<Output = ()> + Send>>,
) where
    S: Fn(Duration) -> F,
    F: Future<Output = ()>,
{
    let Channels {
        link,
        outbox,
        commands_tx,
        mut heartbeat_rx,
    } = channels;

    info!("MQTT worker starting...");
    info!(
        "Connecting to MQTT broker: {}:{}",
        options.broker_address.host, options.broker_address.port
    );

    let mut client = match MqttClient::new(&options.broker_address, &options.node_id) {
        Ok(c) => c,
        Err(e) => {
            error!("Failed to create MQTT client: {}", e);
            return;
        }
    };

    let mut reconnect_attempts: u32 = 0;

    // Set when the client's request channel filled up before the outbox
    // was empty; retried as the event loop makes progress
    let mut backlog = false;

    loop {
        // Session loop, exits on connection error
        loop {
            tokio::select! {
                _ = &mut shutdown_signal => {
                    info!("MQTT worker shutting down...");
                    if link.is_connected() {
                        drain_outbox(&mut client, outbox, DISCONNECT_TIMEOUT).await;
                        if let Err(e) = client.disconnect(DISCONNECT_TIMEOUT).await {
                            warn!("Failed to disconnect cleanly: {}", e);
                        }
                    }
                    link.set_connected(false);
                    return;
                }
                event = client.poll() => {
                    match event {
                        Ok(MqttEvent::Connected) => {
                            reconnect_attempts = 0;
                            link.set_connected(true);
                            if let Err(e) = client.subscribe_commands() {
                                error!("Failed to subscribe to commands: {}", e);
                            }
                            backlog = true;
                        }
                        Ok(MqttEvent::Message(msg)) => {
                            handle_message(&options.node_id, &msg, outbox, &commands_tx).await;
                        }
                        Ok(MqttEvent::Other) => {}
                        Err(e) => {
                            warn!("MQTT connection lost: {}, reconnecting...", e);
                            break;
                        }
                    }
                    if backlog && link.is_connected() {
                        backlog = !flush(&client, outbox);
                    }
                }
                _ = outbox.notified(), if link.is_connected() => {
                    backlog = !flush(&client, outbox);
                }
                Some(report) = heartbeat_rx.recv() => {
                    if link.is_connected() {
                        if let Err(e) = client.publish_health(&report) {
                            warn!("Failed to publish heartbeat: {}", e);
                        }
                    }
                }
            }
        }

        link.set_connected(false);
        let delay = calc_exp_backoff(&options.reconnect_backoff, reconnect_attempts);
        reconnect_attempts = reconnect_attempts.saturating_add(1);
        debug!(
            "Reconnect attempt {} in {:?} ({} status events buffered)",
            reconnect_attempts,
            delay,
            outbox.len()
        );

        tokio::select! {
            _ = &mut shutdown_signal => {
                info!("MQTT worker shutting down...");
                return;
            }
            _ = sleep_fn(delay) => {}
        }
    }
}

/// Hand buffered status events to the client, oldest first. Returns
/// `false` when the client stopped accepting and events are left over.
fn flush(client: &MqttClient, outbox: &Outbox) -> bool {
    while let Some(event) = outbox.pop() {
        if let Err(e) = client.publish_status(&event) {
            debug!(
                "Status publish deferred with {} events buffered: {}",
                outbox.len() + 1,
                e
            );
            outbox.requeue(event);
            return false;
        }
    }
    true
}

/// Publish everything buffered before disconnecting, polling the event loop
/// so the client's request channel keeps emptying
async fn drain_outbox(client: &mut MqttClient, outbox: &Outbox, timeout: Duration) {
    let drained = tokio::time::timeout(timeout, async {
        while !flush(client, outbox) {
            client.poll().await?;
        }
        Ok::<(), AgentError>(())
    })
    .await;

    match drained {
        Ok(Ok(())) => debug!("Status buffer flushed"),
        Ok(Err(e)) => warn!("Connection lost with {} status events buffered: {}", outbox.len(), e),
        Err(_) => warn!("Timed out flushing status, {} events left", outbox.len()),
    }
}

async fn handle_message(
    node_id: &str,
    msg: &MqttMessage,
    outbox: &Outbox,
    commands_tx: &mpsc::Sender<Command>,
) {
    match decode_command(node_id, msg) {
        Ok(Some(command)) => {
            debug!("Received command {} for {}", command.id, command.target_key());
            if commands_tx.send(command).await.is_err() {
                error!("Command dispatcher is gone, dropping message on {}", msg.topic);
            }
        }
        Ok(None) => {
            debug!("Ignoring message on topic: {}", msg.topic);
        }
        Err(malformed) => {
            warn!("Rejecting malformed command on {}: {}", msg.topic, malformed.reason);
            // Without an id the sender cannot correlate a status event
            if let Some(command_id) = malformed.command_id {
                outbox.push(StatusEvent::rejected(
                    command_id,
                    malformed.target_key,
                    ErrorKind::Validation,
                    malformed.reason,
                ));
            }
        }
    }
}

/// A message that could not be turned into a command
#[derive(Debug, PartialEq)]
pub struct Malformed {
    pub command_id: Option<String>,
    pub target_key: Option<TargetKey>,
    pub reason: String,
}

impl Malformed {
    fn new(command_id: Option<String>, reason: impl Into<String>) -> Self {
        Self {
            command_id,
            target_key: None,
            reason: reason.into(),
        }
    }
}

/// Decode an inbound message. `Ok(None)` for topics that are not commands
/// for this node.
pub fn decode_command(node_id: &str, msg: &MqttMessage) -> Result<Option<Command>, Malformed> {
    let Some((topic_kind, topic_name)) = Topics::parse_command_target(node_id, &msg.topic) else {
        return Ok(None);
    };

    let body: serde_json::Value = msg
        .parse_json()
        .map_err(|e| Malformed::new(None, e.to_string()))?;
    let command_id = body
        .get("id")
        .and_then(|v| v.as_str())
        .filter(|id| !id.trim().is_empty())
        .map(str::to_string);

    let mut message: CommandMessage = serde_json::from_value(body)
        .map_err(|e| Malformed::new(command_id.clone(), format!("Malformed message body: {e}")))?;

    if let Some(topic_kind) = topic_kind {
        match message.target_kind.as_deref() {
            None => message.target_kind = Some(topic_kind.as_str().to_string()),
            Some(body_kind) => {
                let body_kind: TargetKind = body_kind
                    .parse()
                    .map_err(|e: AgentError| Malformed::new(command_id.clone(), e.to_string()))?;
                if body_kind != topic_kind {
                    return Err(Malformed::new(
                        command_id,
                        format!("target_kind {body_kind} does not match topic {}", msg.topic),
                    ));
                }
            }
        }
    }

    if let Some(topic_name) = topic_name {
        match message.target_name.as_deref() {
            None => message.target_name = Some(topic_name),
            Some(body_name) if body_name != topic_name => {
                return Err(Malformed::new(
                    command_id,
                    format!("target_name {body_name} does not match topic {}", msg.topic),
                ));
            }
            Some(_) => {}
        }
    }

    let target_key = match (message.target_kind.as_deref(), message.target_name.as_deref()) {
        (Some(kind), Some(name)) => kind.parse().ok().map(|kind| TargetKey::new(kind, name)),
        _ => None,
    };

    Command::parse(message)
        .map(Some)
        .map_err(|e| Malformed {
            command_id,
            target_key,
            reason: e.to_string(),
        })
}
