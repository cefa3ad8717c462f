// Realtime push channel: Socket.IO over WebSocket, one per device.

mod channel;
pub mod packet;
mod session;

pub use channel::{API_V2_NAMESPACE, RealtimeChannel, RealtimeConfig};
pub use session::{
    Action, ChannelState, NodeUpdate, RealtimeEvent, SNAPSHOT_EVENT, Session, UPDATE_EVENT,
};
