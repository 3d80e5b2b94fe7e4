//! Health models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::command::TargetKind;

/// Monitored component
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Component {
    Transport,
    ContainerBackend,
    ClusterBackend,
}

impl Component {
    pub const ALL: [Component; 3] = [
        Component::Transport,
        Component::ContainerBackend,
        Component::ClusterBackend,
    ];

    /// Backend component serving a target kind
    pub fn for_target(kind: TargetKind) -> Self {
        match kind {
            TargetKind::Container => Component::ContainerBackend,
            TargetKind::ClusterResource => Component::ClusterBackend,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Component::Transport => "transport",
            Component::ContainerBackend => "container-backend",
            Component::ClusterBackend => "cluster-backend",
        }
    }
}

impl std::fmt::Display for Component {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Health state of a component
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    Up,
    Degraded,
    Down,
}

/// Latest health observation for a component
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthStatus {
    pub component: Component,
    pub state: HealthState,
    pub last_checked_at: Option<DateTime<Utc>>,

    /// Consecutive failed probes since the last success
    pub consecutive_failures: u32,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl HealthStatus {
    pub fn up(component: Component) -> Self {
        Self {
            component,
            state: HealthState::Up,
            last_checked_at: None,
            consecutive_failures: 0,
            last_error: None,
        }
    }
}

/// Outcome of a single liveness probe
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeResult {
    Alive,

    /// Probe failed, may be a passing condition
    Failed(String),

    /// Backend explicitly reported as unreachable
    Unreachable(String),
}
