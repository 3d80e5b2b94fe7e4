pub mod dispatcher;
pub mod history;
pub mod lanes;

pub use dispatcher::Orchestrator;

use std::time::Duration;

use serde::Serialize;

use crate::errors::ErrorKind;
use crate::models::command::{TargetKey, TargetKind};
use crate::models::health::Component;
use crate::models::record::DeploymentRecord;
use crate::utils::CooldownOptions;

/// Orchestrator policy
#[derive(Debug, Clone)]
pub struct Options {
    /// Bound on a single adapter call
    pub adapter_timeout: Duration,

    /// Bound on the time a command may wait behind its target lock
    pub command_ttl: Duration,

    /// Commands queued per target before new ones are refused
    pub max_queue_depth: usize,

    /// Attempts for transient failures, the first one included
    pub max_attempts: u32,
    pub retry_backoff: CooldownOptions,

    pub history_capacity: usize,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            adapter_timeout: Duration::from_secs(120),
            command_ttl: Duration::from_secs(600),
            max_queue_depth: 16,
            max_attempts: 2,
            retry_backoff: CooldownOptions {
                base_delay: Duration::from_secs(1),
                max_delay: Duration::from_secs(30),
                multiplier: 2.0,
            },
            history_capacity: 1024,
        }
    }
}

/// Result of `Orchestrator::submit`
#[derive(Debug, Clone)]
pub enum SubmitOutcome {
    Accepted {
        command_id: String,
        target_key: TargetKey,
        /// Commands ahead of this one on the same target
        position: usize,
    },
    Rejected(Rejection),
}

impl SubmitOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, SubmitOutcome::Accepted { .. })
    }
}

/// Why a command was not queued
#[derive(Debug, Clone, thiserror::Error)]
pub enum Rejection {
    #[error("invalid command: {0}")]
    Invalid(String),

    #[error("{0} is down")]
    BackendDown(Component),

    #[error("no backend configured for {0} targets")]
    NoBackend(TargetKind),

    #[error("{0}")]
    Backpressure(String),

    #[error("agent is shutting down")]
    ShuttingDown,

    /// Id already executed; carries the cached result
    #[error("command {} already processed", .0.command_id)]
    AlreadyProcessed(DeploymentRecord),

    /// Id currently queued or executing
    #[error("command {0} is already in flight")]
    InFlight(String),
}

impl Rejection {
    /// Error kind reported on the status channel. Duplicates report nothing
    /// of their own.
    pub fn error_kind(&self) -> Option<ErrorKind> {
        match self {
            Rejection::Invalid(_) => Some(ErrorKind::Validation),
            Rejection::BackendDown(_) | Rejection::NoBackend(_) | Rejection::ShuttingDown => {
                Some(ErrorKind::Unavailable)
            }
            Rejection::Backpressure(_) => Some(ErrorKind::Backpressure),
            Rejection::AlreadyProcessed(_) | Rejection::InFlight(_) => None,
        }
    }
}

/// JSON view of a submission result, shared by the HTTP API
#[derive(Debug, Serialize)]
pub struct SubmitReply {
    pub accepted: bool,
    pub command_id: Option<String>,
    pub target_key: Option<TargetKey>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub record: Option<DeploymentRecord>,
}

impl SubmitReply {
    pub fn new(command_id: &str, outcome: SubmitOutcome) -> Self {
        match outcome {
            SubmitOutcome::Accepted {
                command_id,
                target_key,
                position,
            } => Self {
                accepted: true,
                command_id: Some(command_id),
                target_key: Some(target_key),
                position: Some(position),
                error_kind: None,
                message: None,
                record: None,
            },
            SubmitOutcome::Rejected(rejection) => {
                let message = rejection.to_string();
                let error_kind = rejection.error_kind();
                let record = match rejection {
                    Rejection::AlreadyProcessed(record) => Some(record),
                    _ => None,
                };
                Self {
                    accepted: false,
                    command_id: Some(command_id.to_string()),
                    target_key: record.as_ref().map(|r| r.target_key.clone()),
                    position: None,
                    error_kind,
                    message: Some(message),
                    record,
                }
            }
        }
    }
}
