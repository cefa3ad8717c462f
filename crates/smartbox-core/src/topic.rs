// MQTT topic layout for one node:
//
//   {base_topic}/{sanitized_name}/{state}        retained state
//   {base_topic}/{sanitized_name}/{cmd}/set      commands

use std::fmt;

use smartbox_api::Node;
use strum::{AsRefStr, Display, EnumIter, IntoStaticStr};

/// Retained state topics, relative to the node namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, AsRefStr, Display, EnumIter, IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum StateTopic {
    Mode,
    /// Set-point (`stemp`).
    Temperature,
    /// Measured temperature (`mtemp`).
    CurrentTemperature,
    ComfortTemperature,
    EcoTemperature,
    IceTemperature,
    SelectedTemperature,
    Active,
    Power,
    Online,
}

/// Command topics, relative to the node namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, AsRefStr, Display, EnumIter, IntoStaticStr)]
pub enum CommandTopic {
    #[strum(serialize = "mode/set")]
    Mode,
    #[strum(serialize = "temperature/set")]
    Temperature,
}

/// Lower-case, collapse every run of non-alphanumerics into one `_`, and
/// trim separators from both ends.
///
/// `"Living Room (North)"` → `"living_room_north"`
pub fn sanitize_node_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut gap = false;
    for c in name.chars().flat_map(char::to_lowercase) {
        if c.is_ascii_alphanumeric() {
            if gap && !out.is_empty() {
                out.push('_');
            }
            gap = false;
            out.push(c);
        } else {
            gap = true;
        }
    }
    out
}

/// The topic namespace of one node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeTopics {
    base: String,
}

impl NodeTopics {
    /// Namespace for `node` under `base_topic`. Nodes whose name sanitises
    /// to nothing fall back to `{type}_{addr}`.
    pub fn for_node(base_topic: &str, node: &Node) -> Self {
        let mut segment = sanitize_node_name(&node.name);
        if segment.is_empty() {
            segment = format!("{}_{}", node.kind, node.addr);
        }
        Self {
            base: format!("{}/{segment}", base_topic.trim_end_matches('/')),
        }
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    pub fn state(&self, topic: StateTopic) -> String {
        format!("{}/{}", self.base, topic.as_ref())
    }

    pub fn command(&self, topic: CommandTopic) -> String {
        format!("{}/{}", self.base, topic.as_ref())
    }

    /// Which command an inbound topic addresses, if it is exactly one of
    /// this namespace's command topics.
    pub fn command_for(&self, topic: &str) -> Option<CommandTopic> {
        let suffix = topic.strip_prefix(self.base.as_str())?.strip_prefix('/')?;
        match suffix {
            "mode/set" => Some(CommandTopic::Mode),
            "temperature/set" => Some(CommandTopic::Temperature),
            _ => None,
        }
    }
}

impl fmt::Display for NodeTopics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.base)
    }
}
