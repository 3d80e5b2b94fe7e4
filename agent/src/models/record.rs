//! Deployment record model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::ErrorKind;
use crate::models::command::{Action, TargetKey};

/// Lifecycle state of a deployment record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordState {
    Queued,
    InProgress,
    Completed,
    Failed,

    /// Execution outcome lost (worker died or agent stopped mid-call)
    Unknown,
}

impl RecordState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RecordState::Completed | RecordState::Failed | RecordState::Unknown
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RecordState::Queued => "queued",
            RecordState::InProgress => "in_progress",
            RecordState::Completed => "completed",
            RecordState::Failed => "failed",
            RecordState::Unknown => "unknown",
        }
    }
}

/// Failure attached to a record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordError {
    pub kind: ErrorKind,
    pub message: String,
}

/// Tracks one command against one target
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentRecord {
    pub command_id: String,
    pub target_key: TargetKey,
    pub action: Action,
    pub state: RecordState,
    pub queued_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,

    /// Number of adapter invocations made so far
    pub attempts: u32,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RecordError>,
}

impl DeploymentRecord {
    pub fn new(command_id: impl Into<String>, target_key: TargetKey, action: Action) -> Self {
        Self {
            command_id: command_id.into(),
            target_key,
            action,
            state: RecordState::Queued,
            queued_at: Utc::now(),
            started_at: None,
            finished_at: None,
            attempts: 0,
            result: None,
            error: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        self.error.as_ref().map(|e| e.kind)
    }
}
