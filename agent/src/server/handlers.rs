//! HTTP request handlers

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::Serialize;

use crate::errors::ErrorKind;
use crate::models::command::{Command, CommandMessage, TargetKey, TargetKind};
use crate::models::health::HealthStatus;
use crate::models::record::DeploymentRecord;
use crate::orchestrator::{Rejection, SubmitOutcome, SubmitReply};
use crate::server::state::ServerState;
use crate::utils::version_info;

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,
}

/// Health check handler
pub async fn health_handler() -> impl IntoResponse {
    let version = version_info();
    Json(HealthResponse {
        status: "healthy".to_string(),
        service: "edgemgr".to_string(),
        version: version.version,
    })
}

/// Version handler
pub async fn version_handler() -> impl IntoResponse {
    Json(version_info())
}

/// Backends response
#[derive(Debug, Serialize)]
pub struct BackendsResponse {
    pub backends: Vec<TargetKind>,
    pub components: Vec<HealthStatus>,
}

/// Health table handler
pub async fn backends_handler(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    Json(BackendsResponse {
        backends: state.backends.clone(),
        components: state.health.snapshot(),
    })
}

/// Target status response
#[derive(Debug, Serialize)]
pub struct TargetResponse {
    pub target_key: TargetKey,
    pub queued: usize,
    pub record: DeploymentRecord,
}

/// Live or most recent record for a target
pub async fn target_handler(
    State(state): State<Arc<ServerState>>,
    Path((kind, name)): Path<(String, String)>,
) -> Result<impl IntoResponse, StatusCode> {
    let kind: TargetKind = kind.parse().map_err(|_| StatusCode::BAD_REQUEST)?;
    let target_key = TargetKey::new(kind, name);

    let record = state
        .orchestrator
        .status(&target_key)
        .ok_or(StatusCode::NOT_FOUND)?;

    Ok(Json(TargetResponse {
        queued: state.orchestrator.queued(&target_key),
        target_key,
        record,
    }))
}

/// Record by command id
pub async fn command_handler(
    State(state): State<Arc<ServerState>>,
    Path(command_id): Path<String>,
) -> Result<impl IntoResponse, StatusCode> {
    state
        .orchestrator
        .record(&command_id)
        .map(Json)
        .ok_or(StatusCode::NOT_FOUND)
}

/// Submit a command with the same body as the MQTT channel
pub async fn submit_handler(
    State(state): State<Arc<ServerState>>,
    Json(message): Json<CommandMessage>,
) -> impl IntoResponse {
    let supplied_id = message.id.clone().unwrap_or_default();
    let target_key = match (message.target_kind.as_deref(), message.target_name.as_deref()) {
        (Some(kind), Some(name)) => kind.parse().ok().map(|kind| TargetKey::new(kind, name)),
        _ => None,
    };
    let command = match Command::parse(message) {
        Ok(command) => command,
        Err(e) => {
            let reason = e.to_string();
            // Without an id the caller cannot correlate a status event
            if !supplied_id.trim().is_empty() {
                state
                    .orchestrator
                    .report_invalid(&supplied_id, target_key, &reason);
            }
            let rejection = Rejection::Invalid(reason);
            return (
                StatusCode::BAD_REQUEST,
                Json(SubmitReply::new(&supplied_id, SubmitOutcome::Rejected(rejection))),
            );
        }
    };

    let command_id = command.id.clone();
    let outcome = state.orchestrator.submit(command);
    let status = match &outcome {
        SubmitOutcome::Accepted { .. } => StatusCode::ACCEPTED,
        SubmitOutcome::Rejected(rejection) => rejection_status(rejection),
    };

    (status, Json(SubmitReply::new(&command_id, outcome)))
}

fn rejection_status(rejection: &Rejection) -> StatusCode {
    match rejection {
        Rejection::AlreadyProcessed(_) => StatusCode::OK,
        Rejection::InFlight(_) => StatusCode::CONFLICT,
        _ => match rejection.error_kind() {
            Some(ErrorKind::Validation) => StatusCode::BAD_REQUEST,
            Some(ErrorKind::Backpressure) => StatusCode::TOO_MANY_REQUESTS,
            _ => StatusCode::SERVICE_UNAVAILABLE,
        },
    }
}
