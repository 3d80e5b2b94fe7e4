//! Per-target command lanes
//!
//! Each target key owns one lane: a FIFO of accepted commands plus the record
//! currently executing. At most one drain task exists per lane; holding the
//! drain role is holding the target's exclusion lock.

use std::collections::VecDeque;
use std::sync::Mutex;

use tokio::task::AbortHandle;
use tokio::time::Instant;

use crate::models::command::{Command, TargetKey};
use crate::models::record::{DeploymentRecord, RecordState};

/// An accepted command waiting for its target lock
#[derive(Debug)]
pub struct Pending {
    pub command: Command,
    pub record: DeploymentRecord,
    pub accepted_at: Instant,

    /// Deadline timer, stopped once the command leaves the queue
    pub expiry: Option<AbortHandle>,
}

#[derive(Default)]
struct LaneInner {
    queue: VecDeque<Pending>,
    current: Option<DeploymentRecord>,
    draining: bool,
    abort: Option<AbortHandle>,
}

/// Command lane for a single target key
pub struct Lane {
    key: TargetKey,
    inner: Mutex<LaneInner>,
}

/// Result of offering a command to a lane
#[derive(Debug, PartialEq, Eq)]
pub enum Enqueued {
    /// Queued behind `position` commands; the caller must start a drain task
    /// when `start_drain` is set
    Accepted { position: usize, start_drain: bool },

    /// Queue already holds `depth` commands
    Full { depth: usize },
}

impl Lane {
    pub fn new(key: TargetKey) -> Self {
        Self {
            key,
            inner: Mutex::new(LaneInner::default()),
        }
    }

    pub fn key(&self) -> &TargetKey {
        &self.key
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, LaneInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Append a command unless the queue is at `max_depth`
    pub fn enqueue(&self, pending: Pending, max_depth: usize) -> Enqueued {
        let mut inner = self.lock();
        if inner.queue.len() >= max_depth {
            return Enqueued::Full {
                depth: inner.queue.len(),
            };
        }

        let running = inner
            .current
            .as_ref()
            .is_some_and(|r| r.state == RecordState::InProgress);
        let position = inner.queue.len() + usize::from(running);
        inner.queue.push_back(pending);

        let start_drain = !inner.draining;
        inner.draining = true;
        Enqueued::Accepted {
            position,
            start_drain,
        }
    }

    /// Next command in FIFO order. When the queue is empty the drain role is
    /// released in the same critical section, so a concurrent `enqueue`
    /// either sees the lane draining or starts a new drain.
    pub fn next(&self) -> Option<Pending> {
        let mut inner = self.lock();
        let next = inner.queue.pop_front();
        if next.is_none() {
            inner.draining = false;
        }
        next
    }

    /// Remove a command that is still waiting. `None` once it has been
    /// handed to the drain task.
    pub fn take_queued(&self, command_id: &str) -> Option<Pending> {
        let mut inner = self.lock();
        let index = inner
            .queue
            .iter()
            .position(|p| p.record.command_id == command_id)?;
        inner.queue.remove(index)
    }

    pub fn set_current(&self, record: DeploymentRecord) {
        self.lock().current = Some(record);
    }

    /// In-progress record, or the last finished one
    pub fn current(&self) -> Option<DeploymentRecord> {
        self.lock().current.clone()
    }

    pub fn set_abort(&self, handle: Option<AbortHandle>) {
        self.lock().abort = handle;
    }

    /// Abort the running execution, if any
    pub fn abort(&self) -> bool {
        match self.lock().abort.as_ref() {
            Some(handle) => {
                handle.abort();
                true
            }
            None => false,
        }
    }

    /// Whether a drain task holds the lane
    pub fn is_busy(&self) -> bool {
        self.lock().draining
    }

    pub fn queued(&self) -> usize {
        self.lock().queue.len()
    }

    /// Record of a queued or running command
    pub fn find(&self, command_id: &str) -> Option<DeploymentRecord> {
        let inner = self.lock();
        if let Some(current) = inner.current.as_ref().filter(|r| r.command_id == command_id) {
            return Some(current.clone());
        }
        inner
            .queue
            .iter()
            .find(|p| p.record.command_id == command_id)
            .map(|p| p.record.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::command::{Action, TargetKind};

    fn pending(id: &str) -> Pending {
        let command = Command::new(
            Some(id.to_string()),
            Action::Deploy,
            TargetKind::Container,
            "web",
            serde_json::json!({}),
        );
        let record = DeploymentRecord::new(id, command.target_key(), command.action);
        Pending {
            command,
            record,
            accepted_at: Instant::now(),
            expiry: None,
        }
    }

    #[test]
    fn test_first_enqueue_starts_drain() {
        let lane = Lane::new(TargetKey::new(TargetKind::Container, "web"));
        assert_eq!(
            lane.enqueue(pending("a"), 4),
            Enqueued::Accepted { position: 0, start_drain: true }
        );
        assert_eq!(
            lane.enqueue(pending("b"), 4),
            Enqueued::Accepted { position: 1, start_drain: false }
        );
    }

    #[test]
    fn test_fifo_and_release() {
        let lane = Lane::new(TargetKey::new(TargetKind::Container, "web"));
        lane.enqueue(pending("a"), 4);
        lane.enqueue(pending("b"), 4);

        assert_eq!(lane.next().unwrap().record.command_id, "a");
        assert_eq!(lane.next().unwrap().record.command_id, "b");
        assert!(lane.is_busy());
        assert!(lane.next().is_none());
        assert!(!lane.is_busy());
    }

    #[test]
    fn test_take_queued_skips_handed_out() {
        let lane = Lane::new(TargetKey::new(TargetKind::Container, "web"));
        lane.enqueue(pending("a"), 4);
        lane.enqueue(pending("b"), 4);
        lane.enqueue(pending("c"), 4);

        assert_eq!(lane.next().unwrap().record.command_id, "a");
        assert!(lane.take_queued("a").is_none());
        assert_eq!(lane.take_queued("b").unwrap().record.command_id, "b");
        assert_eq!(lane.queued(), 1);
        assert_eq!(lane.next().unwrap().record.command_id, "c");
    }

    #[test]
    fn test_full_queue() {
        let lane = Lane::new(TargetKey::new(TargetKind::Container, "web"));
        lane.enqueue(pending("a"), 1);
        assert_eq!(lane.enqueue(pending("b"), 1), Enqueued::Full { depth: 1 });
    }
}
