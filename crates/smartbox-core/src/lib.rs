//! Heater state synchronisation between the Smartbox cloud and an MQTT
//! broker.
//!
//! - **[`NodeBridge`]** — One heater node's topic namespace. Publishes
//!   retained state from any of three sources (startup, poll timer,
//!   realtime push) and turns `mode/set` / `temperature/set` commands into
//!   status writes.
//!
//! - **[`TopicBinding`]** — `(type, addr)` → bridge routing table for one
//!   device, used to deliver realtime pushes.
//!
//! - **[`Orchestrator`]** — Startup sequence (authenticate, enumerate,
//!   wire) and ordered shutdown.
//!
//! - **[`MqttTransport`]** — Broker seam, with [`RumqttTransport`] as the
//!   production implementation.

pub mod config;
pub mod error;
pub mod mqtt;
pub mod node_api;
pub mod node_bridge;
pub mod orchestrator;
pub mod routing;
pub mod topic;

// ── Primary re-exports ──────────────────────────────────────────────
pub use config::{BridgeConfig, MqttSettings, SmartboxSettings};
pub use error::CoreError;
pub use mqtt::{InboundMessage, MqttTransport, Ownership, RumqttTransport};
pub use node_api::NodeApi;
pub use node_bridge::{BridgeSettings, NodeBridge, render_status};
pub use orchestrator::Orchestrator;
pub use routing::TopicBinding;
pub use topic::{CommandTopic, NodeTopics, StateTopic, sanitize_node_name};
