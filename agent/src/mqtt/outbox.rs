//! Bounded buffer of outbound status events
//!
//! Events queue here until the MQTT worker can publish them. When the buffer
//! is full the oldest event is dropped, never the newest.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use tokio::sync::Notify;
use tracing::warn;

use crate::models::status::StatusEvent;

/// Destination for status events
pub trait StatusSink: Send + Sync {
    fn publish(&self, event: StatusEvent);
}

/// Bounded drop-oldest status buffer
pub struct Outbox {
    events: Mutex<VecDeque<StatusEvent>>,
    capacity: usize,
    dropped: AtomicU64,
    notify: Notify,
}

impl Outbox {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            events: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            dropped: AtomicU64::new(0),
            notify: Notify::new(),
        }
    }

    /// Append an event, evicting the oldest when full
    pub fn push(&self, event: StatusEvent) {
        {
            let mut events = self.events.lock().unwrap_or_else(|e| e.into_inner());
            if events.len() >= self.capacity {
                if let Some(evicted) = events.pop_front() {
                    self.dropped.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        "Status buffer full, dropping oldest event for {}",
                        evicted.command_id
                    );
                }
            }
            events.push_back(event);
        }
        self.notify.notify_one();
    }

    /// Take the oldest event
    pub fn pop(&self) -> Option<StatusEvent> {
        let mut events = self.events.lock().unwrap_or_else(|e| e.into_inner());
        events.pop_front()
    }

    /// Put back an event that could not be published.
    ///
    /// If newer events filled the buffer meanwhile, the returned event is the
    /// oldest and is the one dropped.
    pub fn requeue(&self, event: StatusEvent) {
        let mut events = self.events.lock().unwrap_or_else(|e| e.into_inner());
        if events.len() >= self.capacity {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            warn!("Status buffer full, dropping requeued event for {}", event.command_id);
            return;
        }
        events.push_front(event);
    }

    /// Remove and return everything buffered, oldest first
    pub fn drain(&self) -> Vec<StatusEvent> {
        let mut events = self.events.lock().unwrap_or_else(|e| e.into_inner());
        events.drain(..).collect()
    }

    /// Wait until an event is pushed
    pub async fn notified(&self) {
        self.notify.notified().await
    }

    pub fn len(&self) -> usize {
        let events = self.events.lock().unwrap_or_else(|e| e.into_inner());
        events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of events dropped because the buffer was full
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl StatusSink for Outbox {
    fn publish(&self, event: StatusEvent) {
        self.push(event);
    }
}
