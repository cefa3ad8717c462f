// Wire models for the Smartbox REST API.
//
// Every status field is optional: the same `NodeStatus` type carries full
// REST snapshots and the partial bodies pushed over the realtime channel.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize};

// ── Devices ─────────────────────────────────────────────────────────

/// A gateway registered to the account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    pub dev_id: String,
    #[serde(default)]
    pub name: String,
}

/// `GET devs` response body.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct DeviceList {
    #[serde(default)]
    pub devs: Vec<Device>,
}

// ── Nodes ───────────────────────────────────────────────────────────

/// The kind of a node attached to a gateway.
///
/// Only the heater kinds are bridged; everything else the backend reports
/// (power monitors, thermostats, the manager node itself) is kept as
/// [`Other`](Self::Other) so enumeration never fails on a new type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum NodeKind {
    /// Plain heater.
    Heater,
    /// Storage (accumulator) heater.
    Accumulator,
    /// Heater with modular control.
    HeaterModule,
    Other(String),
}

impl NodeKind {
    /// Wire identifier used in REST and realtime paths.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Heater => "htr",
            Self::Accumulator => "acm",
            Self::HeaterModule => "htr_mod",
            Self::Other(s) => s,
        }
    }

    pub fn is_heater(&self) -> bool {
        !matches!(self, Self::Other(_))
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NodeKind {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::from(s.to_owned()))
    }
}

impl From<String> for NodeKind {
    fn from(s: String) -> Self {
        match s.as_str() {
            "htr" => Self::Heater,
            "acm" => Self::Accumulator,
            "htr_mod" => Self::HeaterModule,
            _ => Self::Other(s),
        }
    }
}

impl From<NodeKind> for String {
    fn from(kind: NodeKind) -> Self {
        match kind {
            NodeKind::Other(s) => s,
            known => known.as_str().to_owned(),
        }
    }
}

/// Composite identity of a node within one device: `(type, address)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NodeKey {
    pub kind: NodeKind,
    pub addr: u32,
}

impl NodeKey {
    pub fn new(kind: NodeKind, addr: u32) -> Self {
        Self { kind, addr }
    }

    /// Parse a realtime update path of the form `/{type}/{addr}/status`.
    ///
    /// Returns `None` for anything else (setup, version, away-status paths).
    pub fn from_status_path(path: &str) -> Option<Self> {
        let mut parts = path.strip_prefix('/')?.split('/');
        let kind = parts.next().filter(|s| !s.is_empty())?;
        let addr = parts.next()?.parse().ok()?;
        if parts.next()? != "status" || parts.next().is_some() {
            return None;
        }
        Some(Self::new(NodeKind::from(kind.to_owned()), addr))
    }

    /// REST path segment: `{type}/{addr}`.
    pub fn path_segment(&self) -> String {
        format!("{}/{}", self.kind, self.addr)
    }
}

impl fmt::Display for NodeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind, self.addr)
    }
}

/// A node attached to a gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    #[serde(rename = "type")]
    pub kind: NodeKind,
    pub addr: u32,
    #[serde(default)]
    pub name: String,
}

impl Node {
    pub fn key(&self) -> NodeKey {
        NodeKey::new(self.kind.clone(), self.addr)
    }
}

/// `GET devs/{id}/mgr/nodes` response body.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct NodeList {
    #[serde(default)]
    pub nodes: Vec<Node>,
}

// ── Status ──────────────────────────────────────────────────────────

/// Value the backend reports in `sync_status` when the node is reachable.
pub const SYNC_STATUS_OK: &str = "ok";

/// Heater status, full (REST) or partial (realtime push).
///
/// Temperatures and power arrive as decimal strings on most firmware and
/// as bare numbers on some; both are normalised to strings so they can be
/// republished verbatim.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
    #[serde(default, deserialize_with = "de_opt_text", skip_serializing_if = "Option::is_none")]
    pub stemp: Option<String>,
    #[serde(default, deserialize_with = "de_opt_text", skip_serializing_if = "Option::is_none")]
    pub mtemp: Option<String>,
    #[serde(default, deserialize_with = "de_opt_text", skip_serializing_if = "Option::is_none")]
    pub comf_temp: Option<String>,
    #[serde(default, deserialize_with = "de_opt_text", skip_serializing_if = "Option::is_none")]
    pub eco_temp: Option<String>,
    #[serde(default, deserialize_with = "de_opt_text", skip_serializing_if = "Option::is_none")]
    pub ice_temp: Option<String>,
    #[serde(default, deserialize_with = "de_opt_text", skip_serializing_if = "Option::is_none")]
    pub selected_temp: Option<String>,
    #[serde(default, deserialize_with = "de_opt_truthy", skip_serializing_if = "Option::is_none")]
    pub active: Option<bool>,
    #[serde(default, deserialize_with = "de_opt_text", skip_serializing_if = "Option::is_none")]
    pub power: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sync_status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub units: Option<String>,
}

impl NodeStatus {
    /// `Some(true)` when the backend currently reaches the node.
    pub fn online(&self) -> Option<bool> {
        self.sync_status.as_deref().map(|s| s == SYNC_STATUS_OK)
    }
}

/// Partial status body for `POST devs/{id}/{type}/{addr}/status`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StatusUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stemp: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub units: Option<String>,
}

impl StatusUpdate {
    pub fn mode(mode: impl Into<String>) -> Self {
        Self {
            mode: Some(mode.into()),
            ..Self::default()
        }
    }

    /// Set-point update, rounded to one decimal as the backend expects.
    pub fn setpoint(temperature: f64, units: impl Into<String>) -> Self {
        Self {
            stemp: Some(format!("{temperature:.1}")),
            units: Some(units.into()),
            ..Self::default()
        }
    }
}

// ── Lenient field decoding ──────────────────────────────────────────

fn de_opt_text<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::String(s)) => Some(s),
        Some(serde_json::Value::Number(n)) => Some(n.to_string()),
        Some(serde_json::Value::Bool(b)) => Some(b.to_string()),
        _ => None,
    })
}

fn de_opt_truthy<'de, D>(deserializer: D) -> Result<Option<bool>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        None | Some(serde_json::Value::Null) => None,
        Some(serde_json::Value::Bool(b)) => Some(b),
        Some(serde_json::Value::Number(n)) => Some(n.as_f64().is_some_and(|v| v != 0.0)),
        Some(serde_json::Value::String(s)) => Some(!s.is_empty()),
        Some(_) => Some(true),
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    #[test]
    fn node_kind_round_trips_known_and_unknown() {
        assert_eq!(NodeKind::from("htr_mod".to_owned()), NodeKind::HeaterModule);
        assert_eq!(NodeKind::from("pmo".to_owned()), NodeKind::Other("pmo".into()));
        assert_eq!(String::from(NodeKind::Accumulator), "acm");
        assert!(!NodeKind::Other("mgr".into()).is_heater());
        assert!(NodeKind::Heater.is_heater());
    }

    #[test]
    fn status_path_parsing() {
        assert_eq!(
            NodeKey::from_status_path("/htr/2/status"),
            Some(NodeKey::new(NodeKind::Heater, 2))
        );
        assert_eq!(
            NodeKey::from_status_path("/acm/10/status"),
            Some(NodeKey::new(NodeKind::Accumulator, 10))
        );
        assert_eq!(NodeKey::from_status_path("/htr/2/setup"), None);
        assert_eq!(NodeKey::from_status_path("/htr/x/status"), None);
        assert_eq!(NodeKey::from_status_path("/htr/2/status/extra"), None);
        assert_eq!(NodeKey::from_status_path("htr/2/status"), None);
        assert_eq!(NodeKey::from_status_path("/mgr/away_status"), None);
        assert_eq!(NodeKey::from_status_path(""), None);
    }

    #[test]
    fn node_deserializes_type_field() {
        let node: Node =
            serde_json::from_value(json!({"type": "htr", "addr": 1, "name": "Living Room", "installed": true}))
                .unwrap();
        assert_eq!(node.kind, NodeKind::Heater);
        assert_eq!(node.key().to_string(), "htr/1");
    }

    #[test]
    fn status_accepts_numbers_and_strings() {
        let status: NodeStatus = serde_json::from_value(json!({
            "mode": "auto",
            "stemp": "21.0",
            "mtemp": 19.5,
            "active": 1,
            "power": 850,
            "sync_status": "ok"
        }))
        .unwrap();
        assert_eq!(status.stemp.as_deref(), Some("21.0"));
        assert_eq!(status.mtemp.as_deref(), Some("19.5"));
        assert_eq!(status.power.as_deref(), Some("850"));
        assert_eq!(status.active, Some(true));
        assert_eq!(status.online(), Some(true));
        assert_eq!(status.comf_temp, None);
    }

    #[test]
    fn partial_status_leaves_fields_absent() {
        let status: NodeStatus = serde_json::from_value(json!({"mtemp": "18.2"})).unwrap();
        assert_eq!(status.mtemp.as_deref(), Some("18.2"));
        assert_eq!(status.mode, None);
        assert_eq!(status.active, None);
        assert_eq!(status.online(), None);
    }

    #[test]
    fn setpoint_update_is_one_decimal() {
        let update = StatusUpdate::setpoint(21.54, "C");
        assert_eq!(
            serde_json::to_value(&update).unwrap(),
            json!({"stemp": "21.5", "units": "C"})
        );
        let update = StatusUpdate::setpoint(21.0, "C");
        assert_eq!(update.stemp.as_deref(), Some("21.0"));
    }

    #[test]
    fn mode_update_serializes_only_mode() {
        let update = StatusUpdate::mode("manual");
        assert_eq!(serde_json::to_value(&update).unwrap(), json!({"mode": "manual"}));
    }
}
