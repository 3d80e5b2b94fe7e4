//! Main application run loop

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::app::options::{AppOptions, LifecycleOptions};
use crate::app::state::AppState;
use crate::errors::AgentError;
use crate::server::serve::serve;
use crate::server::state::ServerState;
use crate::workers::{dispatch, health, heartbeat, mqtt};

/// Extra time on top of the command grace period for workers to wind down
const SHUTDOWN_MARGIN: Duration = Duration::from_secs(10);

/// Run the edge agent
pub async fn run(
    agent_version: String,
    options: AppOptions,
    shutdown_signal: impl Future<Output = ()> + Send + 'static,
) -> Result<(), AgentError> {
    info!("Initializing edge agent...");

    // Intake workers stop first, the transport last so final statuses go out
    let (shutdown_tx, _shutdown_rx): (broadcast::Sender<()>, _) = broadcast::channel(1);
    let (transport_shutdown_tx, _transport_shutdown_rx): (broadcast::Sender<()>, _) =
        broadcast::channel(1);
    let mut shutdown_manager = ShutdownManager::new(
        shutdown_tx.clone(),
        transport_shutdown_tx.clone(),
        options.lifecycle.clone(),
    );

    // Initialize the app state
    if let Err(e) = init(
        agent_version,
        &options,
        &shutdown_tx,
        &transport_shutdown_tx,
        &mut shutdown_manager,
    )
    .await
    {
        error!("Failed to start agent: {}", e);
        shutdown_manager.shutdown().await?;
        return Err(e);
    }

    tokio::select! {
        _ = shutdown_signal => {
            info!("Shutdown signal received, shutting down...");
        }
    }

    // Shutdown
    drop(shutdown_tx);
    drop(transport_shutdown_tx);
    shutdown_manager.shutdown().await
}

// =============================== INITIALIZATION ================================== //

async fn init(
    agent_version: String,
    options: &AppOptions,
    shutdown_tx: &broadcast::Sender<()>,
    transport_shutdown_tx: &broadcast::Sender<()>,
    shutdown_manager: &mut ShutdownManager,
) -> Result<(), AgentError> {
    let app_state = Arc::new(AppState::init(agent_version, options)?);
    shutdown_manager.with_app_state(app_state.clone())?;

    let (commands_tx, commands_rx) = mpsc::channel(options.command_channel);
    let (heartbeat_tx, heartbeat_rx) = mpsc::channel(1);

    init_health_worker(
        options.health_worker.clone(),
        app_state.clone(),
        shutdown_manager,
        shutdown_tx.subscribe(),
    )?;

    init_dispatch_worker(
        app_state.clone(),
        commands_rx,
        shutdown_manager,
        shutdown_tx.subscribe(),
    )?;

    init_mqtt_worker(
        options.mqtt_worker.clone(),
        app_state.clone(),
        commands_tx,
        heartbeat_rx,
        shutdown_manager,
        transport_shutdown_tx.subscribe(),
    )?;

    init_heartbeat_worker(
        options.heartbeat_worker.clone(),
        app_state.clone(),
        heartbeat_tx,
        shutdown_manager,
        shutdown_tx.subscribe(),
    )?;

    if options.enable_socket_server {
        init_socket_server(
            options,
            app_state.clone(),
            shutdown_manager,
            shutdown_tx.subscribe(),
        )
        .await?;
    }

    Ok(())
}

fn init_health_worker(
    options: health::Options,
    app_state: Arc<AppState>,
    shutdown_manager: &mut ShutdownManager,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), AgentError> {
    info!("Initializing health worker...");

    let health_handle = tokio::spawn(async move {
        health::run(
            &options,
            app_state.health.as_ref(),
            &app_state.adapters,
            app_state.link.as_ref(),
            tokio::time::sleep,
            Box::pin(async move {
                let _ = shutdown_rx.recv().await;
            }),
        )
        .await;
    });

    shutdown_manager.with_health_worker_handle(health_handle)?;
    Ok(())
}

fn init_dispatch_worker(
    app_state: Arc<AppState>,
    commands_rx: mpsc::Receiver<crate::models::command::Command>,
    shutdown_manager: &mut ShutdownManager,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), AgentError> {
    info!("Initializing dispatch worker...");

    let orchestrator = app_state.orchestrator.clone();
    let dispatch_handle = tokio::spawn(async move {
        dispatch::run(
            orchestrator,
            commands_rx,
            Box::pin(async move {
                let _ = shutdown_rx.recv().await;
            }),
        )
        .await;
    });

    shutdown_manager.with_dispatch_worker_handle(dispatch_handle)?;
    Ok(())
}

fn init_mqtt_worker(
    options: mqtt::Options,
    app_state: Arc<AppState>,
    commands_tx: mpsc::Sender<crate::models::command::Command>,
    heartbeat_rx: mpsc::Receiver<crate::models::status::HealthReport>,
    shutdown_manager: &mut ShutdownManager,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), AgentError> {
    info!("Initializing MQTT worker...");

    let mqtt_handle = tokio::spawn(async move {
        mqtt::run(
            &options,
            mqtt::Channels {
                link: app_state.link.as_ref(),
                outbox: app_state.outbox.as_ref(),
                commands_tx,
                heartbeat_rx,
            },
            tokio::time::sleep,
            Box::pin(async move {
                let _ = shutdown_rx.recv().await;
            }),
        )
        .await;
    });

    shutdown_manager.with_mqtt_worker_handle(mqtt_handle)?;
    Ok(())
}

fn init_heartbeat_worker(
    options: heartbeat::Options,
    app_state: Arc<AppState>,
    reports_tx: mpsc::Sender<crate::models::status::HealthReport>,
    shutdown_manager: &mut ShutdownManager,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), AgentError> {
    info!("Initializing heartbeat worker...");

    let heartbeat_handle = tokio::spawn(async move {
        heartbeat::run(
            &options,
            app_state.health.as_ref(),
            reports_tx,
            tokio::time::sleep,
            Box::pin(async move {
                let _ = shutdown_rx.recv().await;
            }),
        )
        .await;
    });

    shutdown_manager.with_heartbeat_worker_handle(heartbeat_handle)?;
    Ok(())
}

async fn init_socket_server(
    options: &AppOptions,
    app_state: Arc<AppState>,
    shutdown_manager: &mut ShutdownManager,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), AgentError> {
    info!("Initializing local HTTP server...");

    let server_state = ServerState::new(
        app_state.orchestrator.clone(),
        app_state.health.clone(),
        app_state.adapters.kinds(),
    );

    let server_handle = serve(&options.server, Arc::new(server_state), async move {
        let _ = shutdown_rx.recv().await;
    })
    .await?;

    shutdown_manager.with_socket_server_handle(server_handle)?;
    Ok(())
}

// ================================= SHUTDOWN ===================================== //

struct ShutdownManager {
    shutdown_tx: broadcast::Sender<()>,
    transport_shutdown_tx: broadcast::Sender<()>,
    lifecycle_options: LifecycleOptions,
    app_state: Option<Arc<AppState>>,
    socket_server_handle: Option<JoinHandle<Result<(), AgentError>>>,
    dispatch_worker_handle: Option<JoinHandle<()>>,
    health_worker_handle: Option<JoinHandle<()>>,
    heartbeat_worker_handle: Option<JoinHandle<()>>,
    mqtt_worker_handle: Option<JoinHandle<()>>,
}

impl ShutdownManager {
    pub fn new(
        shutdown_tx: broadcast::Sender<()>,
        transport_shutdown_tx: broadcast::Sender<()>,
        lifecycle_options: LifecycleOptions,
    ) -> Self {
        Self {
            shutdown_tx,
            transport_shutdown_tx,
            lifecycle_options,
            app_state: None,
            socket_server_handle: None,
            dispatch_worker_handle: None,
            health_worker_handle: None,
            heartbeat_worker_handle: None,
            mqtt_worker_handle: None,
        }
    }

    pub fn with_app_state(&mut self, state: Arc<AppState>) -> Result<(), AgentError> {
        if self.app_state.is_some() {
            return Err(AgentError::ShutdownError("app_state already set".to_string()));
        }
        self.app_state = Some(state);
        Ok(())
    }

    pub fn with_dispatch_worker_handle(&mut self, handle: JoinHandle<()>) -> Result<(), AgentError> {
        if self.dispatch_worker_handle.is_some() {
            return Err(AgentError::ShutdownError("dispatch_handle already set".to_string()));
        }
        self.dispatch_worker_handle = Some(handle);
        Ok(())
    }

    pub fn with_health_worker_handle(&mut self, handle: JoinHandle<()>) -> Result<(), AgentError> {
        if self.health_worker_handle.is_some() {
            return Err(AgentError::ShutdownError("health_handle already set".to_string()));
        }
        self.health_worker_handle = Some(handle);
        Ok(())
    }

    pub fn with_heartbeat_worker_handle(
        &mut self,
        handle: JoinHandle<()>,
    ) -> Result<(), AgentError> {
        if self.heartbeat_worker_handle.is_some() {
            return Err(AgentError::ShutdownError("heartbeat_handle already set".to_string()));
        }
        self.heartbeat_worker_handle = Some(handle);
        Ok(())
    }

    pub fn with_mqtt_worker_handle(&mut self, handle: JoinHandle<()>) -> Result<(), AgentError> {
        if self.mqtt_worker_handle.is_some() {
            return Err(AgentError::ShutdownError("mqtt_handle already set".to_string()));
        }
        self.mqtt_worker_handle = Some(handle);
        Ok(())
    }

    pub fn with_socket_server_handle(
        &mut self,
        handle: JoinHandle<Result<(), AgentError>>,
    ) -> Result<(), AgentError> {
        if self.socket_server_handle.is_some() {
            return Err(AgentError::ShutdownError("server_handle already set".to_string()));
        }
        self.socket_server_handle = Some(handle);
        Ok(())
    }

    pub async fn shutdown(&mut self) -> Result<(), AgentError> {
        let _ = self.shutdown_tx.send(());

        let max_delay = self.lifecycle_options.max_shutdown_delay + SHUTDOWN_MARGIN;
        match tokio::time::timeout(max_delay, self.shutdown_impl()).await {
            Ok(result) => result,
            Err(_) => {
                error!("Shutdown timed out after {:?}, forcing shutdown...", max_delay);
                std::process::exit(1);
            }
        }
    }

    async fn shutdown_impl(&mut self) -> Result<(), AgentError> {
        info!("Shutting down edge agent...");

        // 1. Dispatch worker, no new commands past this point
        if let Some(handle) = self.dispatch_worker_handle.take() {
            handle.await.map_err(|e| AgentError::ShutdownError(e.to_string()))?;
        }

        // 2. Socket server
        if let Some(handle) = self.socket_server_handle.take() {
            handle.await.map_err(|e| AgentError::ShutdownError(e.to_string()))??;
        }

        // 3. Orchestrator, in-flight commands get the grace period
        if let Some(app_state) = self.app_state.take() {
            app_state
                .shutdown(self.lifecycle_options.max_shutdown_delay)
                .await?;
        }

        // 4. Health and heartbeat workers
        if let Some(handle) = self.health_worker_handle.take() {
            handle.await.map_err(|e| AgentError::ShutdownError(e.to_string()))?;
        }
        if let Some(handle) = self.heartbeat_worker_handle.take() {
            handle.await.map_err(|e| AgentError::ShutdownError(e.to_string()))?;
        }

        // 5. MQTT worker, flushes buffered status on the way out
        let _ = self.transport_shutdown_tx.send(());
        if let Some(handle) = self.mqtt_worker_handle.take() {
            handle.await.map_err(|e| AgentError::ShutdownError(e.to_string()))?;
        }

        info!("Shutdown complete");
        Ok(())
    }
}
