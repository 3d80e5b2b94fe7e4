//! Finite State Machine for deployment records
//!
//! `queued -> in_progress -> {completed, failed, unknown}`. Terminal states
//! accept no further events; a new attempt needs a new command id.

use chrono::Utc;

use crate::errors::ErrorKind;
use crate::models::record::{DeploymentRecord, RecordError, RecordState};

/// Record event
#[derive(Debug, Clone)]
pub enum RecordEvent {
    /// Lock acquired, first adapter call about to start
    Start,

    /// Another adapter attempt after a transient failure
    Retry,

    /// Adapter reported success
    Succeed(serde_json::Value),

    /// Execution failed
    Fail { kind: ErrorKind, message: String },

    /// Command waited too long in the target queue
    Expire(String),

    /// Execution outcome was lost
    Lose(String),
}

impl DeploymentRecord {
    /// Process an event and transition state
    pub fn process(&mut self, event: RecordEvent) -> Result<(), String> {
        let now = Utc::now();

        let new_state = match (&self.state, event) {
            // From Queued
            (RecordState::Queued, RecordEvent::Start) => {
                self.started_at = Some(now);
                self.attempts = 1;
                RecordState::InProgress
            }
            (RecordState::Queued, RecordEvent::Expire(message)) => {
                self.finished_at = Some(now);
                self.error = Some(RecordError {
                    kind: ErrorKind::Backpressure,
                    message,
                });
                RecordState::Failed
            }

            // From InProgress
            (RecordState::InProgress, RecordEvent::Retry) => {
                self.attempts += 1;
                RecordState::InProgress
            }
            (RecordState::InProgress, RecordEvent::Succeed(detail)) => {
                self.finished_at = Some(now);
                self.result = Some(detail);
                self.error = None;
                RecordState::Completed
            }
            (RecordState::InProgress, RecordEvent::Fail { kind, message }) => {
                self.finished_at = Some(now);
                self.error = Some(RecordError { kind, message });
                RecordState::Failed
            }
            (RecordState::InProgress, RecordEvent::Lose(reason)) => {
                self.finished_at = Some(now);
                self.result = Some(serde_json::json!({ "reason": reason }));
                RecordState::Unknown
            }

            // Invalid transitions
            (state, event) => {
                return Err(format!(
                    "Invalid transition for {}: {:?} -> {:?}",
                    self.command_id, state, event
                ));
            }
        };

        self.state = new_state;
        Ok(())
    }
}
