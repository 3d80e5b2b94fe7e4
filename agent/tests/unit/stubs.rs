//! Test doubles for adapters and status sinks

use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;

use edgemgr::deploy::adapter::{AdapterOutcome, BackendAdapter};
use edgemgr::errors::{AdapterError, ErrorKind};
use edgemgr::models::command::{Action, TargetKind};
use edgemgr::models::health::ProbeResult;
use edgemgr::models::status::StatusEvent;
use edgemgr::mqtt::outbox::StatusSink;

/// What a stub call does
#[derive(Debug, Clone)]
pub enum Behavior {
    Succeed,
    Delay(Duration),
    Fail(ErrorKind),
    Hang,
    Panic,
}

type BehaviorFn = dyn Fn(&str, u32) -> Behavior + Send + Sync;

/// Scripted adapter. The behavior closure gets the target name and the
/// 1-based call number across all targets.
pub struct StubAdapter {
    kind: TargetKind,
    behavior: Box<BehaviorFn>,
    calls: AtomicU32,
    log: Mutex<Vec<(String, serde_json::Value)>>,
    active: AtomicUsize,
    max_active: AtomicUsize,
}

impl StubAdapter {
    pub fn new(behavior: impl Fn(&str, u32) -> Behavior + Send + Sync + 'static) -> Arc<Self> {
        Arc::new(Self {
            kind: TargetKind::Container,
            behavior: Box::new(behavior),
            calls: AtomicU32::new(0),
            log: Mutex::new(Vec::new()),
            active: AtomicUsize::new(0),
            max_active: AtomicUsize::new(0),
        })
    }

    pub fn always(behavior: Behavior) -> Arc<Self> {
        Self::new(move |_, _| behavior.clone())
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    /// Most concurrent calls observed at once
    pub fn max_active(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }

    /// `(target, payload)` per call, in call order
    pub fn log(&self) -> Vec<(String, serde_json::Value)> {
        self.log.lock().unwrap().clone()
    }
}

struct ActiveGuard<'a>(&'a AtomicUsize);

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl BackendAdapter for StubAdapter {
    fn kind(&self) -> TargetKind {
        self.kind
    }

    async fn execute(
        &self,
        _action: Action,
        target_name: &str,
        payload: &serde_json::Value,
        _timeout: Duration,
    ) -> Result<AdapterOutcome, AdapterError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.log
            .lock()
            .unwrap()
            .push((target_name.to_string(), payload.clone()));

        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(active, Ordering::SeqCst);
        let _guard = ActiveGuard(&self.active);

        match (self.behavior)(target_name, call) {
            Behavior::Succeed => Ok(AdapterOutcome::new(serde_json::json!({ "call": call }))),
            Behavior::Delay(delay) => {
                tokio::time::sleep(delay).await;
                Ok(AdapterOutcome::new(serde_json::json!({ "call": call })))
            }
            Behavior::Fail(kind) => Err(AdapterError::new(kind, format!("call {call} failed"))),
            Behavior::Hang => std::future::pending().await,
            Behavior::Panic => panic!("adapter blew up on call {call}"),
        }
    }

    async fn probe(&self) -> ProbeResult {
        ProbeResult::Alive
    }
}

/// Sink that keeps every published event
#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<StatusEvent>>,
    notify: Notify,
}

impl RecordingSink {
    pub fn events(&self) -> Vec<StatusEvent> {
        self.events.lock().unwrap().clone()
    }

    /// Wait until at least `n` events were published
    pub async fn wait_for(&self, n: usize) -> Vec<StatusEvent> {
        let wait = async {
            loop {
                let notified = self.notify.notified();
                if self.events.lock().unwrap().len() >= n {
                    return;
                }
                notified.await;
            }
        };
        tokio::time::timeout(Duration::from_secs(3600), wait)
            .await
            .unwrap_or_else(|_| panic!("expected {n} events, got {:?}", self.events()));
        self.events()
    }
}

impl StatusSink for RecordingSink {
    fn publish(&self, event: StatusEvent) {
        self.events.lock().unwrap().push(event);
        self.notify.notify_waiters();
    }
}
