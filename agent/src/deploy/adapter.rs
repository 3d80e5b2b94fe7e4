//! Backend adapter contract

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::AdapterError;
use crate::models::command::{Action, TargetKind};
use crate::models::health::ProbeResult;

/// Successful adapter result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdapterOutcome {
    pub detail: serde_json::Value,
}

impl AdapterOutcome {
    pub fn new(detail: serde_json::Value) -> Self {
        Self { detail }
    }
}

/// A backend the orchestrator can execute deployment actions against.
///
/// Implementations must be cancel-safe: the orchestrator drops the
/// `execute` future when `timeout` elapses, and dropping it must not
/// leave work running in the background.
#[async_trait]
pub trait BackendAdapter: Send + Sync {
    /// Target kind served by this adapter
    fn kind(&self) -> TargetKind;

    /// Execute a single action against one target
    async fn execute(
        &self,
        action: Action,
        target_name: &str,
        payload: &serde_json::Value,
        timeout: Duration,
    ) -> Result<AdapterOutcome, AdapterError>;

    /// Cheap liveness probe used by the health monitor
    async fn probe(&self) -> ProbeResult;
}

/// Registered adapters, one per target kind
#[derive(Clone, Default)]
pub struct AdapterSet {
    adapters: BTreeMap<TargetKind, Arc<dyn BackendAdapter>>,
}

impl AdapterSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an adapter, replacing any previous one for the same kind
    pub fn with(mut self, adapter: Arc<dyn BackendAdapter>) -> Self {
        self.adapters.insert(adapter.kind(), adapter);
        self
    }

    pub fn get(&self, kind: TargetKind) -> Option<Arc<dyn BackendAdapter>> {
        self.adapters.get(&kind).cloned()
    }

    pub fn kinds(&self) -> Vec<TargetKind> {
        self.adapters.keys().copied().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn BackendAdapter>> {
        self.adapters.values()
    }

    pub fn len(&self) -> usize {
        self.adapters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }
}

/// Read a required string parameter
pub fn required_str<'a>(payload: &'a serde_json::Value, key: &str) -> Result<&'a str, AdapterError> {
    payload
        .get(key)
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| AdapterError::validation(format!("Missing parameter: {key}")))
}
