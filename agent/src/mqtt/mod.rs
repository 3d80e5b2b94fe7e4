pub mod client;
pub mod outbox;
pub mod topics;

use std::sync::atomic::{AtomicBool, Ordering};

/// Connection state of the broker link, shared with the health monitor
#[derive(Debug, Default)]
pub struct TransportLink {
    connected: AtomicBool,
}

impl TransportLink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}
