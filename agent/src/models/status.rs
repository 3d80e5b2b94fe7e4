//! Outbound status messages

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::ErrorKind;
use crate::models::command::TargetKey;
use crate::models::health::HealthStatus;
use crate::models::record::{DeploymentRecord, RecordState};

/// State reported on the status channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportedState {
    Queued,
    InProgress,
    Completed,
    Failed,
    Unknown,

    /// Refused before execution
    Rejected,
}

impl From<RecordState> for ReportedState {
    fn from(state: RecordState) -> Self {
        match state {
            RecordState::Queued => ReportedState::Queued,
            RecordState::InProgress => ReportedState::InProgress,
            RecordState::Completed => ReportedState::Completed,
            RecordState::Failed => ReportedState::Failed,
            RecordState::Unknown => ReportedState::Unknown,
        }
    }
}

/// Status event published for a command
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusEvent {
    pub command_id: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_key: Option<TargetKey>,

    pub state: ReportedState,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<serde_json::Value>,

    pub timestamp: DateTime<Utc>,
}

impl StatusEvent {
    /// Event describing a record's current state
    pub fn from_record(record: &DeploymentRecord) -> Self {
        Self {
            command_id: record.command_id.clone(),
            target_key: Some(record.target_key.clone()),
            state: record.state.into(),
            error_kind: record.error_kind(),
            message: record.error.as_ref().map(|e| e.message.clone()),
            detail: record.result.clone(),
            timestamp: record.finished_at.unwrap_or_else(Utc::now),
        }
    }

    /// Event for a command refused before execution
    pub fn rejected(
        command_id: impl Into<String>,
        target_key: Option<TargetKey>,
        kind: ErrorKind,
        message: impl Into<String>,
    ) -> Self {
        Self {
            command_id: command_id.into(),
            target_key,
            state: ReportedState::Rejected,
            error_kind: Some(kind),
            message: Some(message.into()),
            detail: None,
            timestamp: Utc::now(),
        }
    }
}

/// Periodic health report
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    pub node_id: String,
    pub version: String,
    pub components: Vec<HealthStatus>,
    pub timestamp: DateTime<Utc>,
}
