//! Server state

use std::sync::Arc;

use crate::health::table::HealthTable;
use crate::models::command::TargetKind;
use crate::orchestrator::Orchestrator;

/// Server state shared across handlers
pub struct ServerState {
    pub orchestrator: Arc<Orchestrator>,
    pub health: Arc<HealthTable>,

    /// Target kinds with a configured backend
    pub backends: Vec<TargetKind>,
}

impl ServerState {
    pub fn new(
        orchestrator: Arc<Orchestrator>,
        health: Arc<HealthTable>,
        backends: Vec<TargetKind>,
    ) -> Self {
        Self {
            orchestrator,
            health,
            backends,
        }
    }
}
