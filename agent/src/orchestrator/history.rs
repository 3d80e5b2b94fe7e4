//! Bounded log of finished deployment records

use std::collections::VecDeque;
use std::sync::Mutex;

use dashmap::DashMap;

use crate::models::command::TargetKey;
use crate::models::record::DeploymentRecord;

/// Append-only history of terminal records, oldest evicted first. Also the
/// idempotence index: a command id found here has already been executed.
pub struct History {
    log: Mutex<VecDeque<DeploymentRecord>>,
    by_id: DashMap<String, DeploymentRecord>,
    capacity: usize,
}

impl History {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            log: Mutex::new(VecDeque::with_capacity(capacity)),
            by_id: DashMap::new(),
            capacity,
        }
    }

    /// Append a finished record
    pub fn append(&self, record: DeploymentRecord) {
        let mut log = self.log.lock().unwrap_or_else(|e| e.into_inner());
        if log.len() >= self.capacity {
            if let Some(evicted) = log.pop_front() {
                self.by_id.remove(&evicted.command_id);
            }
        }
        self.by_id
            .insert(record.command_id.clone(), record.clone());
        log.push_back(record);
    }

    pub fn get(&self, command_id: &str) -> Option<DeploymentRecord> {
        self.by_id.get(command_id).map(|r| r.value().clone())
    }

    /// Most recent record for a target
    pub fn latest_for(&self, key: &TargetKey) -> Option<DeploymentRecord> {
        let log = self.log.lock().unwrap_or_else(|e| e.into_inner());
        log.iter().rev().find(|r| &r.target_key == key).cloned()
    }

    /// All records, oldest first
    pub fn records(&self) -> Vec<DeploymentRecord> {
        let log = self.log.lock().unwrap_or_else(|e| e.into_inner());
        log.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        let log = self.log.lock().unwrap_or_else(|e| e.into_inner());
        log.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
