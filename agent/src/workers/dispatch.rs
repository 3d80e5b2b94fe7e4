//! Dispatch worker: feeds decoded commands into the orchestrator

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::models::command::Command;
use crate::orchestrator::{Orchestrator, SubmitOutcome};

/// Run the dispatch worker until shutdown or until the transport hangs up
pub async fn run(
    orchestrator: Arc<Orchestrator>,
    mut commands_rx: mpsc::Receiver<Command>,
    mut shutdown_signal: Pin<Box<dyn Future<Output = ()> + Send>>,
) {
    info!("Dispatch worker starting...");

    loop {
        tokio::select! {
            _ = &mut shutdown_signal => {
                info!("Dispatch worker shutting down...");
                return;
            }
            command = commands_rx.recv() => {
                let Some(command) = command else {
                    info!("Command channel closed, dispatch worker exiting...");
                    return;
                };
                let command_id = command.id.clone();
                match orchestrator.submit(command) {
                    SubmitOutcome::Accepted { position, .. } => {
                        debug!("Command {} queued at position {}", command_id, position);
                    }
                    SubmitOutcome::Rejected(rejection) => {
                        debug!("Command {} not queued: {}", command_id, rejection);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deploy::adapter::AdapterSet;
    use crate::health::table::HealthTable;
    use crate::models::command::{Action, TargetKind};
    use crate::mqtt::outbox::Outbox;
    use crate::orchestrator::Options;

    #[tokio::test]
    async fn test_exits_when_channel_closes() {
        let orchestrator = Arc::new(Orchestrator::new(
            Options::default(),
            AdapterSet::new(),
            Arc::new(HealthTable::default()),
            Arc::new(Outbox::new(8)),
        ));
        let (tx, rx) = mpsc::channel(4);
        tx.send(Command::new(
            Some("c1".to_string()),
            Action::Status,
            TargetKind::Container,
            "web",
            serde_json::json!({}),
        ))
        .await
        .unwrap();
        drop(tx);

        run(orchestrator.clone(), rx, Box::pin(std::future::pending())).await;
        // No container backend configured, nothing left in flight
        assert_eq!(orchestrator.inflight(), 0);
    }
}
