// Bootstrap state machine for the push channel.
//
// Pure: no I/O, no clocks. The channel task feeds it connection edges and
// decoded events and acts on the returned `Action`. Incremental updates
// are only meaningful against a snapshot, so anything that arrives before
// the `dev_data` snapshot is dropped and answered with a fresh snapshot
// request.

use serde::Deserialize;
use serde_json::Value;
use strum::{Display, EnumString, IntoStaticStr};

use crate::models::{NodeKey, NodeKind, NodeStatus};

/// Event name of the full device snapshot, both request and response.
pub const SNAPSHOT_EVENT: &str = "dev_data";
/// Event name of incremental status pushes.
pub const UPDATE_EVENT: &str = "update";

/// Lifecycle of one realtime channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum ChannelState {
    Disconnected,
    Connecting,
    /// Socket up, waiting for the `dev_data` snapshot.
    Connected,
    /// Snapshot received; incremental updates are applied.
    Synced,
}

/// One node's status as carried by a push.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeUpdate {
    pub key: NodeKey,
    pub status: NodeStatus,
}

/// What the channel delivers to its consumer.
#[derive(Debug, Clone, PartialEq)]
pub enum RealtimeEvent {
    /// Full snapshot after (re)connect. May contain non-heater nodes.
    Snapshot(Vec<NodeUpdate>),
    /// Incremental status change for one or more nodes.
    Update(Vec<NodeUpdate>),
}

impl RealtimeEvent {
    pub fn updates(&self) -> &[NodeUpdate] {
        match self {
            Self::Snapshot(u) | Self::Update(u) => u,
        }
    }
}

/// What the channel task must do after feeding the session.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    None,
    /// Emit a `dev_data` request.
    RequestSnapshot,
    Deliver(RealtimeEvent),
}

#[derive(Debug)]
pub struct Session {
    state: ChannelState,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    pub fn new() -> Self {
        Self {
            state: ChannelState::Disconnected,
        }
    }

    pub fn state(&self) -> ChannelState {
        self.state
    }

    pub fn connecting(&mut self) {
        self.state = ChannelState::Connecting;
    }

    /// Namespace joined: ask for the snapshot.
    pub fn connected(&mut self) -> Action {
        self.state = ChannelState::Connected;
        Action::RequestSnapshot
    }

    pub fn disconnected(&mut self) {
        self.state = ChannelState::Disconnected;
    }

    /// Feed one decoded Socket.IO event.
    pub fn on_event(&mut self, name: &str, data: Option<&Value>) -> Action {
        match name {
            SNAPSHOT_EVENT => {
                let nodes = data.map(parse_snapshot).unwrap_or_default();
                self.state = ChannelState::Synced;
                Action::Deliver(RealtimeEvent::Snapshot(nodes))
            }
            UPDATE_EVENT => {
                if self.state != ChannelState::Synced {
                    tracing::debug!(state = %self.state, "update before snapshot, requesting snapshot");
                    return Action::RequestSnapshot;
                }
                let nodes = data.map(parse_update).unwrap_or_default();
                if nodes.is_empty() {
                    Action::None
                } else {
                    Action::Deliver(RealtimeEvent::Update(nodes))
                }
            }
            other => {
                tracing::trace!(event = other, "ignoring realtime event");
                Action::None
            }
        }
    }
}

// ── Payload parsing ──────────────────────────────────────────────────

#[derive(Deserialize)]
struct SnapshotNode {
    #[serde(rename = "type")]
    kind: NodeKind,
    addr: u32,
    #[serde(default)]
    status: Option<Value>,
}

#[derive(Deserialize)]
struct PathUpdate {
    path: String,
    #[serde(default)]
    body: Option<Value>,
}

/// `{"nodes": [{"type", "addr", "status"}, ...]}`
fn parse_snapshot(data: &Value) -> Vec<NodeUpdate> {
    let Some(nodes) = data.get("nodes").and_then(Value::as_array) else {
        tracing::debug!("snapshot without a nodes array");
        return Vec::new();
    };

    nodes
        .iter()
        .filter_map(|raw| {
            let node: SnapshotNode = serde_json::from_value(raw.clone())
                .map_err(|e| tracing::debug!(error = %e, "skipping malformed snapshot node"))
                .ok()?;
            let status = decode_status(node.status.as_ref()?)?;
            Some(NodeUpdate {
                key: NodeKey::new(node.kind, node.addr),
                status,
            })
        })
        .collect()
}

/// A single `{path, body}` object, an array of them, or a snapshot-shaped
/// `{"nodes": [...]}` object.
fn parse_update(data: &Value) -> Vec<NodeUpdate> {
    match data {
        Value::Array(items) => items.iter().filter_map(parse_path_update).collect(),
        Value::Object(map) if map.contains_key("nodes") => parse_snapshot(data),
        Value::Object(_) => parse_path_update(data).into_iter().collect(),
        _ => Vec::new(),
    }
}

fn parse_path_update(raw: &Value) -> Option<NodeUpdate> {
    let update: PathUpdate = serde_json::from_value(raw.clone()).ok()?;
    let Some(key) = NodeKey::from_status_path(&update.path) else {
        tracing::trace!(path = %update.path, "ignoring non-status update");
        return None;
    };
    let status = decode_status(update.body.as_ref()?)?;
    Some(NodeUpdate { key, status })
}

fn decode_status(body: &Value) -> Option<NodeStatus> {
    serde_json::from_value(body.clone())
        .map_err(|e| tracing::debug!(error = %e, "skipping undecodable status body"))
        .ok()
}
