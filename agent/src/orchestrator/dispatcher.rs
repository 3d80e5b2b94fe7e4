//! Command orchestrator
//!
//! Admits commands, serializes them per target key and runs them against the
//! backend adapters. Unrelated targets never share a lock: lanes live in a
//! sharded map and each lane has its own mutex.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::deploy::adapter::{AdapterSet, BackendAdapter};
use crate::deploy::fsm::RecordEvent;
use crate::errors::ErrorKind;
use crate::health::table::HealthTable;
use crate::models::command::{Command, TargetKey};
use crate::models::health::Component;
use crate::models::record::{DeploymentRecord, RecordState};
use crate::models::status::StatusEvent;
use crate::mqtt::outbox::StatusSink;
use crate::orchestrator::history::History;
use crate::orchestrator::lanes::{Enqueued, Lane, Pending};
use crate::orchestrator::{Options, Rejection, SubmitOutcome};
use crate::utils::calc_exp_backoff;

/// Command orchestrator
pub struct Orchestrator {
    options: Options,
    adapters: AdapterSet,
    health: Arc<HealthTable>,
    sink: Arc<dyn StatusSink>,
    lanes: DashMap<TargetKey, Arc<Lane>>,
    history: History,

    /// Command ids queued or executing, mapped to their target
    inflight: DashMap<String, TargetKey>,

    accepting: AtomicBool,
    halted: AtomicBool,
}

impl Orchestrator {
    pub fn new(
        options: Options,
        adapters: AdapterSet,
        health: Arc<HealthTable>,
        sink: Arc<dyn StatusSink>,
    ) -> Self {
        let history = History::new(options.history_capacity);
        Self {
            options,
            adapters,
            health,
            sink,
            lanes: DashMap::new(),
            history,
            inflight: DashMap::new(),
            accepting: AtomicBool::new(true),
            halted: AtomicBool::new(false),
        }
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    /// Submit a command for execution.
    ///
    /// Must be called from within a tokio runtime: the first command for an
    /// idle target spawns that target's drain task.
    pub fn submit(self: &Arc<Self>, command: Command) -> SubmitOutcome {
        let key = command.target_key();
        debug!("Submitting command {} ({} {})", command.id, command.action, key);

        if !self.accepting.load(Ordering::SeqCst) {
            return self.reject(&command, Rejection::ShuttingDown);
        }

        if let Err(e) = command.validate() {
            return self.reject(&command, Rejection::Invalid(e.to_string()));
        }

        // Reserve the id. In-flight is checked before history so that a
        // command finishing concurrently is always seen by one of the two.
        match self.inflight.entry(command.id.clone()) {
            Entry::Occupied(_) => {
                info!("Command {} is already queued or running, ignoring duplicate", command.id);
                return SubmitOutcome::Rejected(Rejection::InFlight(command.id.clone()));
            }
            Entry::Vacant(slot) => {
                if let Some(record) = self.history.get(&command.id) {
                    info!(
                        "Command {} already finished as {}, replaying result",
                        command.id,
                        record.state.as_str()
                    );
                    self.sink.publish(StatusEvent::from_record(&record));
                    return SubmitOutcome::Rejected(Rejection::AlreadyProcessed(record));
                }
                slot.insert(key.clone());
            }
        }

        let component = Component::for_target(command.target_kind);
        if !self.health.is_admissible(component) {
            self.inflight.remove(&command.id);
            return self.reject(&command, Rejection::BackendDown(component));
        }

        if self.adapters.get(command.target_kind).is_none() {
            self.inflight.remove(&command.id);
            return self.reject(&command, Rejection::NoBackend(command.target_kind));
        }

        let lane = self
            .lanes
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Lane::new(key.clone())))
            .value()
            .clone();

        let command_id = command.id.clone();
        let record = DeploymentRecord::new(command.id.clone(), key.clone(), command.action);
        let accepted_at = Instant::now();
        let timer = tokio::spawn(self.clone().expire_queued(
            lane.clone(),
            command_id.clone(),
            accepted_at + self.options.command_ttl,
        ));
        let pending = Pending {
            command,
            record,
            accepted_at,
            expiry: Some(timer.abort_handle()),
        };

        match lane.enqueue(pending, self.options.max_queue_depth) {
            Enqueued::Accepted {
                position,
                start_drain,
            } => {
                if start_drain {
                    tokio::spawn(self.clone().drain(lane));
                }
                info!("Accepted command {} for {} (position {})", command_id, key, position);
                SubmitOutcome::Accepted {
                    command_id,
                    target_key: key,
                    position,
                }
            }
            Enqueued::Full { depth } => {
                timer.abort();
                self.inflight.remove(&command_id);
                let rejection = Rejection::Backpressure(format!(
                    "queue for {key} is full ({depth} commands)"
                ));
                warn!("Rejecting command {}: {}", command_id, rejection);
                self.sink.publish(StatusEvent::rejected(
                    &command_id,
                    Some(key),
                    ErrorKind::Backpressure,
                    rejection.to_string(),
                ));
                SubmitOutcome::Rejected(rejection)
            }
        }
    }

    fn reject(&self, command: &Command, rejection: Rejection) -> SubmitOutcome {
        warn!("Rejecting command {}: {}", command.id, rejection);
        if let Some(kind) = rejection.error_kind() {
            self.sink.publish(StatusEvent::rejected(
                &command.id,
                Some(command.target_key()),
                kind,
                rejection.to_string(),
            ));
        }
        SubmitOutcome::Rejected(rejection)
    }

    /// Publish a validation rejection for a request that never became a
    /// command. Used by entry points that parse bodies themselves.
    pub fn report_invalid(&self, command_id: &str, target_key: Option<TargetKey>, reason: &str) {
        warn!("Rejecting malformed command {}: {}", command_id, reason);
        self.sink.publish(StatusEvent::rejected(
            command_id,
            target_key,
            ErrorKind::Validation,
            reason,
        ));
    }

    /// Live or most recent record for a target
    pub fn status(&self, key: &TargetKey) -> Option<DeploymentRecord> {
        self.lanes
            .get(key)
            .and_then(|lane| lane.current())
            .or_else(|| self.history.latest_for(key))
    }

    /// Record of a command by id, whether queued, running or finished
    pub fn record(&self, command_id: &str) -> Option<DeploymentRecord> {
        let key = self.inflight.get(command_id).map(|k| k.value().clone());
        key.and_then(|key| self.lanes.get(&key).map(|lane| lane.value().clone()))
            .and_then(|lane| lane.find(command_id))
            .or_else(|| self.history.get(command_id))
    }

    /// Finished records, oldest first
    pub fn history(&self) -> Vec<DeploymentRecord> {
        self.history.records()
    }

    /// Commands waiting behind the target lock
    pub fn queued(&self, key: &TargetKey) -> usize {
        self.lanes.get(key).map(|lane| lane.queued()).unwrap_or(0)
    }

    /// Number of commands queued or executing across all targets
    pub fn inflight(&self) -> usize {
        self.inflight.len()
    }

    /// Stop intake, let running commands finish within `grace`, then abort
    /// what is left. Aborted executions end `unknown`; commands that never
    /// started end `failed` with a backpressure error.
    pub async fn shutdown(&self, grace: Duration) {
        info!("Shutting down orchestrator...");
        self.accepting.store(false, Ordering::SeqCst);

        let deadline = Instant::now() + grace;
        while self.busy_lanes() > 0 && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        let busy = self.busy_lanes();
        if busy == 0 {
            info!("Orchestrator drained");
            return;
        }

        warn!("{} targets still busy after {:?}, aborting executions", busy, grace);
        self.halted.store(true, Ordering::SeqCst);
        for lane in self.lanes.iter() {
            lane.abort();
        }

        // Give drain tasks a moment to record the outcome
        let deadline = Instant::now() + Duration::from_secs(1);
        while self.busy_lanes() > 0 && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    fn busy_lanes(&self) -> usize {
        self.lanes.iter().filter(|lane| lane.is_busy()).count()
    }

    /// Run a lane's queue to exhaustion
    async fn drain(self: Arc<Self>, lane: Arc<Lane>) {
        debug!("Lane {} acquired", lane.key());

        while let Some(pending) = lane.next() {
            let Pending {
                command,
                mut record,
                accepted_at,
                expiry,
            } = pending;
            if let Some(expiry) = expiry {
                expiry.abort();
            }

            if self.halted.load(Ordering::SeqCst) {
                transition(&mut record, RecordEvent::Expire("agent shutting down".to_string()));
                self.finish(&lane, record);
                continue;
            }

            let waited = accepted_at.elapsed();
            if waited > self.options.command_ttl {
                warn!(
                    "Command {} waited {:?} for {}, exceeding its TTL",
                    command.id,
                    waited,
                    lane.key()
                );
                transition(
                    &mut record,
                    RecordEvent::Expire(format!(
                        "command waited {}s in queue, TTL is {}s",
                        waited.as_secs(),
                        self.options.command_ttl.as_secs()
                    )),
                );
                self.finish(&lane, record);
                continue;
            }

            transition(&mut record, RecordEvent::Start);

            // Checked on admission; the adapter set is immutable afterwards
            let Some(adapter) = self.adapters.get(command.target_kind) else {
                transition(
                    &mut record,
                    RecordEvent::Fail {
                        kind: ErrorKind::Unavailable,
                        message: format!("no backend configured for {}", command.target_kind),
                    },
                );
                self.finish(&lane, record);
                continue;
            };

            lane.set_current(record.clone());
            info!("Executing {} {} ({})", command.action, lane.key(), command.id);

            let handle = tokio::spawn(execute(
                adapter,
                command,
                record.clone(),
                lane.clone(),
                self.options.clone(),
            ));
            lane.set_abort(Some(handle.abort_handle()));
            if self.halted.load(Ordering::SeqCst) {
                handle.abort();
            }

            let record = match handle.await {
                Ok(record) => record,
                Err(e) => {
                    let reason = if e.is_panic() {
                        "execution task panicked"
                    } else {
                        "execution aborted"
                    };
                    error!("Command {} on {}: {}", record.command_id, lane.key(), reason);
                    let mut lost = lane
                        .current()
                        .filter(|r| r.command_id == record.command_id)
                        .unwrap_or(record);
                    transition(&mut lost, RecordEvent::Lose(reason.to_string()));
                    lost
                }
            };
            lane.set_abort(None);

            self.finish(&lane, record);
        }

        debug!("Lane {} released", lane.key());
    }

    /// Fail a command that is still waiting when its TTL runs out. The head
    /// of the lane checks the TTL again in case this timer lost the race.
    async fn expire_queued(
        self: Arc<Self>,
        lane: Arc<Lane>,
        command_id: String,
        deadline: Instant,
    ) {
        tokio::time::sleep_until(deadline).await;

        let Some(pending) = lane.take_queued(&command_id) else {
            return;
        };
        let mut record = pending.record;
        warn!(
            "Command {} still queued for {} after its TTL of {:?}",
            command_id,
            lane.key(),
            self.options.command_ttl
        );
        transition(
            &mut record,
            RecordEvent::Expire(format!(
                "command waited {}s in queue, TTL is {}s",
                pending.accepted_at.elapsed().as_secs(),
                self.options.command_ttl.as_secs()
            )),
        );
        self.retire(lane.key(), record);
    }

    /// Make a terminal record the lane's latest, then retire it
    fn finish(&self, lane: &Lane, record: DeploymentRecord) {
        lane.set_current(record.clone());
        self.retire(lane.key(), record);
    }

    /// Index and publish a terminal record
    fn retire(&self, key: &TargetKey, record: DeploymentRecord) {
        match record.state {
            RecordState::Completed => info!("Command {} on {} completed", record.command_id, key),
            state => warn!(
                "Command {} on {} ended {}: {}",
                record.command_id,
                key,
                state.as_str(),
                record.error.as_ref().map(|e| e.message.as_str()).unwrap_or("")
            ),
        }

        // History before releasing the id, see `submit`
        self.history.append(record.clone());
        self.inflight.remove(&record.command_id);
        self.sink.publish(StatusEvent::from_record(&record));
    }
}

/// Call the adapter with timeout and retries; returns the terminal record
async fn execute(
    adapter: Arc<dyn BackendAdapter>,
    command: Command,
    mut record: DeploymentRecord,
    lane: Arc<Lane>,
    options: Options,
) -> DeploymentRecord {
    let timeout = options.adapter_timeout;

    loop {
        let call = adapter.execute(command.action, &command.target_name, &command.payload, timeout);

        match tokio::time::timeout(timeout, call).await {
            Ok(Ok(outcome)) => {
                transition(&mut record, RecordEvent::Succeed(outcome.detail));
                return record;
            }
            Ok(Err(err)) if err.kind.is_retryable() && record.attempts < options.max_attempts => {
                let delay = calc_exp_backoff(&options.retry_backoff, record.attempts - 1);
                warn!(
                    "Attempt {}/{} of {} failed: {}, retrying in {:?}",
                    record.attempts, options.max_attempts, command.id, err.message, delay
                );
                tokio::time::sleep(delay).await;
                transition(&mut record, RecordEvent::Retry);
                lane.set_current(record.clone());
            }
            Ok(Err(err)) => {
                transition(
                    &mut record,
                    RecordEvent::Fail {
                        kind: err.kind,
                        message: err.message,
                    },
                );
                return record;
            }
            Err(_) => {
                transition(
                    &mut record,
                    RecordEvent::Fail {
                        kind: ErrorKind::Timeout,
                        message: format!("adapter did not return within {}s", timeout.as_secs_f64()),
                    },
                );
                return record;
            }
        }
    }
}

fn transition(record: &mut DeploymentRecord, event: RecordEvent) {
    if let Err(e) = record.process(event) {
        error!("{}", e);
    }
}
