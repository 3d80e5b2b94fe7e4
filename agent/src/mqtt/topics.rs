//! MQTT topic definitions

use crate::models::command::TargetKind;

/// MQTT topic patterns
pub struct Topics;

impl Topics {
    /// Subscription filter for every command addressed to a node
    pub fn commands_filter(node_id: &str) -> String {
        format!("edge/{}/commands/#", node_id)
    }

    /// Command topic for a single target
    pub fn command(node_id: &str, kind: TargetKind, target_name: &str) -> String {
        format!("edge/{}/commands/{}/{}", node_id, kind.as_str(), target_name)
    }

    /// Status events topic
    pub fn status(node_id: &str) -> String {
        format!("edge/{}/status", node_id)
    }

    /// Heartbeat topic
    pub fn health(node_id: &str) -> String {
        format!("edge/{}/health", node_id)
    }

    /// Parse a command topic into its target kind and name.
    ///
    /// `edge/{node}/commands` alone is accepted with no target, leaving the
    /// body to name it. Topics for other nodes or with an unknown kind yield
    /// `None`.
    pub fn parse_command_target(
        node_id: &str,
        topic: &str,
    ) -> Option<(Option<TargetKind>, Option<String>)> {
        let parts: Vec<&str> = topic.split('/').collect();
        if parts.len() < 3 || parts[0] != "edge" || parts[1] != node_id || parts[2] != "commands" {
            return None;
        }

        match parts.len() {
            3 => Some((None, None)),
            4 => Some((Some(parts[3].parse().ok()?), None)),
            5 if !parts[4].is_empty() => {
                Some((Some(parts[3].parse().ok()?), Some(parts[4].to_string())))
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topic_generation() {
        assert_eq!(Topics::commands_filter("node-1"), "edge/node-1/commands/#");
        assert_eq!(
            Topics::command("node-1", TargetKind::ClusterResource, "api"),
            "edge/node-1/commands/cluster/api"
        );
        assert_eq!(Topics::status("node-1"), "edge/node-1/status");
        assert_eq!(Topics::health("node-1"), "edge/node-1/health");
    }

    #[test]
    fn test_topic_parsing() {
        assert_eq!(
            Topics::parse_command_target("node-1", "edge/node-1/commands/container/web"),
            Some((Some(TargetKind::Container), Some("web".to_string())))
        );
        assert_eq!(
            Topics::parse_command_target("node-1", "edge/node-1/commands/cluster-resource/api"),
            Some((Some(TargetKind::ClusterResource), Some("api".to_string())))
        );
        assert_eq!(
            Topics::parse_command_target("node-1", "edge/node-1/commands"),
            Some((None, None))
        );
    }

    #[test]
    fn test_topic_parsing_rejects_foreign_topics() {
        assert_eq!(Topics::parse_command_target("node-1", "edge/node-2/commands/container/web"), None);
        assert_eq!(Topics::parse_command_target("node-1", "edge/node-1/commands/vm/web"), None);
        assert_eq!(Topics::parse_command_target("node-1", "edge/node-1/status"), None);
        assert_eq!(
            Topics::parse_command_target("node-1", "edge/node-1/commands/container/web/extra"),
            None
        );
    }
}
