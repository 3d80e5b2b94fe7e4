//! Command models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::AgentError;
use crate::utils::generate_uuid;

/// Deployment action requested by a command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Deploy,
    Scale,
    Remove,
    Status,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Deploy => "deploy",
            Action::Scale => "scale",
            Action::Remove => "remove",
            Action::Status => "status",
        }
    }
}

impl std::str::FromStr for Action {
    type Err = AgentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "deploy" => Ok(Action::Deploy),
            "scale" => Ok(Action::Scale),
            "remove" => Ok(Action::Remove),
            "status" => Ok(Action::Status),
            other => Err(AgentError::ValidationError(format!("Unknown action: {other}"))),
        }
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of backend a command targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TargetKind {
    #[serde(rename = "container")]
    Container,

    #[serde(rename = "cluster", alias = "cluster-resource")]
    ClusterResource,
}

impl TargetKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TargetKind::Container => "container",
            TargetKind::ClusterResource => "cluster",
        }
    }
}

impl std::str::FromStr for TargetKind {
    type Err = AgentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "container" | "docker" => Ok(TargetKind::Container),
            "cluster" | "cluster-resource" | "cluster_resource" | "kubernetes" => {
                Ok(TargetKind::ClusterResource)
            }
            other => Err(AgentError::ValidationError(format!(
                "Unknown target kind: {other}"
            ))),
        }
    }
}

impl std::fmt::Display for TargetKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Serialization domain for commands: target kind plus target name
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TargetKey {
    pub kind: TargetKind,
    pub name: String,
}

impl TargetKey {
    pub fn new(kind: TargetKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
        }
    }
}

impl std::fmt::Display for TargetKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.kind, self.name)
    }
}

impl std::str::FromStr for TargetKey {
    type Err = AgentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (kind, name) = s
            .split_once('/')
            .ok_or_else(|| AgentError::ValidationError(format!("Invalid target key: {s}")))?;
        Ok(TargetKey::new(kind.parse()?, name))
    }
}

impl Serialize for TargetKey {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for TargetKey {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Inbound command body as delivered by the broker
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CommandMessage {
    #[serde(default)]
    pub id: Option<String>,

    pub action: String,

    #[serde(default)]
    pub target_kind: Option<String>,

    #[serde(default)]
    pub target_name: Option<String>,

    #[serde(default)]
    pub parameters: serde_json::Value,
}

/// A parsed deployment command. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Command {
    pub id: String,
    pub action: Action,
    pub target_kind: TargetKind,
    pub target_name: String,
    pub payload: serde_json::Value,
    pub received_at: DateTime<Utc>,
}

impl Command {
    /// Build a command directly, generating an id when none is supplied
    pub fn new(
        id: Option<String>,
        action: Action,
        target_kind: TargetKind,
        target_name: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            id: id
                .filter(|id| !id.trim().is_empty())
                .unwrap_or_else(generate_uuid),
            action,
            target_kind,
            target_name: target_name.into(),
            payload,
            received_at: Utc::now(),
        }
    }

    /// Parse a wire message into a command
    pub fn parse(message: CommandMessage) -> Result<Self, AgentError> {
        let action: Action = message.action.parse()?;

        let target_kind: TargetKind = message
            .target_kind
            .as_deref()
            .ok_or_else(|| AgentError::ValidationError("Missing target_kind".to_string()))?
            .parse()?;

        let target_name = message
            .target_name
            .filter(|name| !name.trim().is_empty())
            .ok_or_else(|| AgentError::ValidationError("Missing target_name".to_string()))?;

        let payload = match message.parameters {
            serde_json::Value::Null => serde_json::Value::Object(Default::default()),
            value => value,
        };

        Ok(Self::new(message.id, action, target_kind, target_name, payload))
    }

    pub fn target_key(&self) -> TargetKey {
        TargetKey::new(self.target_kind, self.target_name.clone())
    }

    /// Structural checks performed on admission
    pub fn validate(&self) -> Result<(), AgentError> {
        if self.target_name.trim().is_empty() {
            return Err(AgentError::ValidationError("Missing target_name".to_string()));
        }

        let name_ok = self
            .target_name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
        if !name_ok || self.target_name.len() > 253 {
            return Err(AgentError::ValidationError(format!(
                "Invalid target_name: {}",
                self.target_name
            )));
        }

        if !self.payload.is_object() {
            return Err(AgentError::ValidationError(
                "parameters must be an object".to_string(),
            ));
        }

        Ok(())
    }

    /// Get a string parameter
    pub fn param_str(&self, key: &str) -> Option<&str> {
        self.payload.get(key).and_then(|v| v.as_str())
    }
}
