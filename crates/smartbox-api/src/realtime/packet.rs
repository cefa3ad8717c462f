// Engine.IO / Socket.IO text framing.
//
// The push channel speaks Socket.IO over a raw WebSocket. Only the text
// subset the Smartbox backend uses is handled: open/close/ping/pong/message
// at the Engine.IO layer, and connect/disconnect/event/error inside
// messages. Binary attachments and acks are recognised but not decoded.

use serde::Deserialize;
use serde_json::Value;

use crate::error::Error;

/// Default Socket.IO namespace.
const ROOT_NAMESPACE: &str = "/";

// ── Engine.IO ───────────────────────────────────────────────────────

/// Engine.IO open handshake.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Handshake {
    #[serde(default)]
    pub sid: String,
    /// Milliseconds between pings.
    #[serde(default)]
    pub ping_interval: u64,
    #[serde(default)]
    pub ping_timeout: u64,
}

/// One Engine.IO packet.
#[derive(Debug, Clone, PartialEq)]
pub enum EnginePacket {
    Open(Handshake),
    Close,
    Ping(String),
    Pong(String),
    Message(String),
    Upgrade,
    Noop,
}

impl EnginePacket {
    pub fn decode(frame: &str) -> Result<Self, Error> {
        let mut chars = frame.chars();
        let kind = chars
            .next()
            .ok_or_else(|| Error::RealtimeProtocol("empty frame".into()))?;
        let rest = chars.as_str();

        match kind {
            '0' => serde_json::from_str(rest)
                .map(Self::Open)
                .map_err(|e| Error::RealtimeProtocol(format!("bad open packet: {e}"))),
            '1' => Ok(Self::Close),
            '2' => Ok(Self::Ping(rest.to_owned())),
            '3' => Ok(Self::Pong(rest.to_owned())),
            '4' => Ok(Self::Message(rest.to_owned())),
            '5' => Ok(Self::Upgrade),
            '6' => Ok(Self::Noop),
            other => Err(Error::RealtimeProtocol(format!(
                "unknown engine packet type {other:?}"
            ))),
        }
    }

    pub fn encode(&self) -> String {
        match self {
            Self::Open(_) => "0".to_owned(),
            Self::Close => "1".to_owned(),
            Self::Ping(data) => format!("2{data}"),
            Self::Pong(data) => format!("3{data}"),
            Self::Message(data) => format!("4{data}"),
            Self::Upgrade => "5".to_owned(),
            Self::Noop => "6".to_owned(),
        }
    }
}

// ── Socket.IO ───────────────────────────────────────────────────────

/// One Socket.IO packet carried inside an Engine.IO message.
#[derive(Debug, Clone, PartialEq)]
pub enum SocketPacket {
    Connect {
        namespace: String,
    },
    Disconnect {
        namespace: String,
    },
    Event {
        namespace: String,
        name: String,
        data: Option<Value>,
    },
    Error {
        namespace: String,
        data: Option<Value>,
    },
    /// Acks and binary packets; not used by this backend.
    Unsupported {
        namespace: String,
        kind: char,
    },
}

impl SocketPacket {
    pub fn namespace(&self) -> &str {
        match self {
            Self::Connect { namespace }
            | Self::Disconnect { namespace }
            | Self::Event { namespace, .. }
            | Self::Error { namespace, .. }
            | Self::Unsupported { namespace, .. } => namespace,
        }
    }

    /// Decode the payload of an Engine.IO message packet.
    pub fn decode(payload: &str) -> Result<Self, Error> {
        let mut chars = payload.chars();
        let kind = chars
            .next()
            .ok_or_else(|| Error::RealtimeProtocol("empty socket packet".into()))?;
        let (namespace, rest) = split_namespace(chars.as_str());
        let namespace = namespace.to_owned();

        // Optional ack id precedes the JSON payload.
        let body = rest.trim_start_matches(|c: char| c.is_ascii_digit());
        let data = if body.is_empty() {
            None
        } else {
            Some(
                serde_json::from_str::<Value>(body)
                    .map_err(|e| Error::RealtimeProtocol(format!("bad packet payload: {e}")))?,
            )
        };

        match kind {
            '0' => Ok(Self::Connect { namespace }),
            '1' => Ok(Self::Disconnect { namespace }),
            '2' => {
                let Some(Value::Array(mut items)) = data else {
                    return Err(Error::RealtimeProtocol(
                        "event payload is not an array".into(),
                    ));
                };
                if items.is_empty() {
                    return Err(Error::RealtimeProtocol("event without a name".into()));
                }
                let name = match items.remove(0) {
                    Value::String(name) => name,
                    other => {
                        return Err(Error::RealtimeProtocol(format!(
                            "event name is not a string: {other}"
                        )));
                    }
                };
                let data = if items.is_empty() {
                    None
                } else {
                    Some(items.remove(0))
                };
                Ok(Self::Event {
                    namespace,
                    name,
                    data,
                })
            }
            '4' => Ok(Self::Error { namespace, data }),
            '3' | '5' | '6' => Ok(Self::Unsupported { namespace, kind }),
            other => Err(Error::RealtimeProtocol(format!(
                "unknown socket packet type {other:?}"
            ))),
        }
    }

    /// Encode as a complete Engine.IO frame (`4` prefix included).
    pub fn encode(&self) -> String {
        let (kind, namespace, payload) = match self {
            Self::Connect { namespace } => ('0', namespace, None),
            Self::Disconnect { namespace } => ('1', namespace, None),
            Self::Event {
                namespace,
                name,
                data,
            } => {
                let mut items = vec![Value::String(name.clone())];
                items.extend(data.iter().cloned());
                ('2', namespace, Some(Value::Array(items)))
            }
            Self::Error { namespace, data } => ('4', namespace, data.clone()),
            Self::Unsupported { namespace, kind } => (*kind, namespace, None),
        };

        let mut out = String::from("4");
        out.push(kind);
        if namespace != ROOT_NAMESPACE && !namespace.is_empty() {
            out.push_str(namespace);
            out.push(',');
        }
        if let Some(payload) = payload {
            out.push_str(&payload.to_string());
        }
        out
    }
}

/// Split `"/ns,rest"` into `("/ns", "rest")`. Packets without a namespace
/// belong to the root namespace.
fn split_namespace(input: &str) -> (&str, &str) {
    if !input.starts_with('/') {
        return (ROOT_NAMESPACE, input);
    }
    match input.find(',') {
        Some(idx) => (&input[..idx], &input[idx + 1..]),
        None => (input, ""),
    }
}
