// smartbox-api: Async Rust client for the Helki Smartbox heater cloud
// (OAuth-style token grants, REST v2, Socket.IO push channel)

pub mod auth;
pub mod client;
pub mod error;
pub mod models;
pub mod realtime;
pub mod reseller;
pub mod transport;

pub use auth::{AuthSession, AuthToken, REFRESH_MARGIN};
pub use client::ApiClient;
pub use error::Error;
pub use models::{Device, Node, NodeKey, NodeKind, NodeStatus, StatusUpdate};
pub use realtime::{ChannelState, NodeUpdate, RealtimeChannel, RealtimeConfig, RealtimeEvent};
pub use reseller::Reseller;
pub use transport::{TlsMode, TransportConfig};
