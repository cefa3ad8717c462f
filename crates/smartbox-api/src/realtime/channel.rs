// Per-device push channel task.
//
// One background task owns the WebSocket and the bootstrap `Session`. The
// handle talks to it over an unbounded control queue and reads its state
// from a watch channel; decoded events flow out over a bounded mpsc. There
// is no backoff: a dropped socket stays down until the next explicit
// reconnect or the forced-reconnect timer fires.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use secrecy::ExposeSecret;
use tokio::net::TcpStream;
use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, trace, warn};
use url::Url;

use super::packet::{EnginePacket, SocketPacket};
use super::session::{Action, ChannelState, RealtimeEvent, SNAPSHOT_EVENT, Session};
use crate::auth::AuthSession;
use crate::error::Error;

const EVENT_CHANNEL_CAPACITY: usize = 256;
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

/// Socket.IO namespace of the v2 API.
pub const API_V2_NAMESPACE: &str = "/api/v2/socket_io";

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

// ── RealtimeConfig ───────────────────────────────────────────────────

/// Tuning for one realtime channel.
#[derive(Debug, Clone)]
pub struct RealtimeConfig {
    /// Period of the unconditional reconnect. Default: 10 minutes.
    pub forced_reconnect: Duration,
    /// Engine.IO protocol revision sent as `EIO`. Default: 3.
    pub engine_io_version: u8,
    pub namespace: String,
    /// Socket host override. `None` derives it from the session base URL.
    pub endpoint: Option<Url>,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            forced_reconnect: Duration::from_secs(600),
            engine_io_version: 3,
            namespace: API_V2_NAMESPACE.to_owned(),
            endpoint: None,
        }
    }
}

// ── RealtimeChannel ──────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
enum Control {
    Connect,
    Reconnect,
}

/// Handle to the push channel of one device.
///
/// Created idle; [`connect`](Self::connect) starts the first session.
/// Dropping the handle stops the task once the control queue closes.
pub struct RealtimeChannel {
    device_id: String,
    control_tx: mpsc::UnboundedSender<Control>,
    state_rx: watch::Receiver<ChannelState>,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl RealtimeChannel {
    /// Spawn the channel task for `device_id`.
    ///
    /// The task stops when `parent` is cancelled or when
    /// [`disconnect`](Self::disconnect) is called. Returns the handle and
    /// the receiver for decoded events.
    pub fn spawn(
        session: Arc<AuthSession>,
        device_id: impl Into<String>,
        config: RealtimeConfig,
        parent: &CancellationToken,
    ) -> (Self, mpsc::Receiver<RealtimeEvent>) {
        let device_id = device_id.into();
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let (state_tx, state_rx) = watch::channel(ChannelState::Disconnected);
        let cancel = parent.child_token();

        let worker = Worker {
            session,
            device_id: device_id.clone(),
            config,
            events: events_tx,
            state_tx,
            proto: Session::new(),
            conn: None,
            wanted: false,
            cancel: cancel.clone(),
        };
        let span = tracing::info_span!("realtime", device_id = %device_id);
        let task = tokio::spawn(worker.run(control_rx).instrument(span));

        let handle = Self {
            device_id,
            control_tx,
            state_rx,
            cancel,
            task: Mutex::new(Some(task)),
        };
        (handle, events_rx)
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn state(&self) -> ChannelState {
        *self.state_rx.borrow()
    }

    /// Receiver that observes every state transition.
    pub fn watch_state(&self) -> watch::Receiver<ChannelState> {
        self.state_rx.clone()
    }

    /// Open the socket if it is not already open and arm the forced
    /// reconnect timer.
    pub fn connect(&self) {
        self.command(Control::Connect);
    }

    /// Tear down the current socket (if any) and open a fresh one.
    pub fn reconnect(&self) {
        self.command(Control::Reconnect);
    }

    /// Close the socket and stop the task. Idempotent.
    pub async fn disconnect(&self) {
        self.cancel.cancel();
        let task = self.task.lock().await.take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!(device_id = %self.device_id, error = %e, "realtime task panicked");
            }
        }
    }

    fn command(&self, control: Control) {
        if self.control_tx.send(control).is_err() {
            debug!(device_id = %self.device_id, ?control, "realtime task already stopped");
        }
    }
}

impl std::fmt::Debug for RealtimeChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RealtimeChannel")
            .field("device_id", &self.device_id)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

// ── Background task ──────────────────────────────────────────────────

struct Connection {
    ws: WsStream,
    /// Client-side ping timer, armed by the open handshake on EIO < 4.
    ping: Option<Interval>,
}

enum Wire {
    Frame(Option<Result<Message, tungstenite::Error>>),
    PingDue,
}

impl Connection {
    async fn next(&mut self) -> Wire {
        match &mut self.ping {
            Some(ping) => tokio::select! {
                frame = self.ws.next() => Wire::Frame(frame),
                _ = ping.tick() => Wire::PingDue,
            },
            None => Wire::Frame(self.ws.next().await),
        }
    }
}

/// Next wire event, or never when there is no socket.
async fn next_wire(conn: &mut Option<Connection>) -> Wire {
    match conn {
        Some(conn) => conn.next().await,
        None => std::future::pending().await,
    }
}

struct Worker {
    session: Arc<AuthSession>,
    device_id: String,
    config: RealtimeConfig,
    events: mpsc::Sender<RealtimeEvent>,
    state_tx: watch::Sender<ChannelState>,
    proto: Session,
    conn: Option<Connection>,
    /// Set by the first connect; the forced timer only runs after it.
    wanted: bool,
    cancel: CancellationToken,
}

impl Worker {
    async fn run(mut self, mut control: mpsc::UnboundedReceiver<Control>) {
        let period = self.config.forced_reconnect;
        let mut forced = tokio::time::interval_at(Instant::now() + period, period);
        forced.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let cancel = self.cancel.clone();

        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                cmd = control.recv() => match cmd {
                    Some(Control::Connect) => {
                        self.wanted = true;
                        if self.conn.is_none() {
                            self.open().await;
                        }
                        forced.reset();
                    }
                    Some(Control::Reconnect) => {
                        self.wanted = true;
                        self.restart("reconnect requested").await;
                        forced.reset();
                    }
                    None => break,
                },
                _ = forced.tick(), if self.wanted => {
                    self.restart("forced reconnect").await;
                }
                wire = next_wire(&mut self.conn) => self.on_wire(wire).await,
            }
        }

        self.close().await;
        debug!("realtime task exiting");
    }

    // ── Connection lifecycle ─────────────────────────────────────────

    async fn open(&mut self) {
        self.proto.connecting();
        self.publish_state();

        let dialed = tokio::select! {
            biased;
            () = self.cancel.cancelled() => return,
            dialed = self.dial() => dialed,
        };

        match dialed {
            Ok(ws) => {
                info!("realtime socket open");
                self.conn = Some(Connection { ws, ping: None });
            }
            Err(e) => {
                error!(error = %e, "realtime connect failed");
                self.proto.disconnected();
                self.publish_state();
            }
        }
    }

    async fn dial(&self) -> Result<WsStream, Error> {
        let token = self.session.ensure_valid().await?;
        let base = self
            .config
            .endpoint
            .as_ref()
            .unwrap_or_else(|| self.session.base_url());
        let url = socket_url(
            base,
            token.access_token().expose_secret(),
            &self.device_id,
            self.config.engine_io_version,
        )?;
        debug!(host = url.host_str().unwrap_or_default(), "dialing realtime socket");

        let (ws, _response) = tokio::time::timeout(
            CONNECT_TIMEOUT,
            tokio_tungstenite::connect_async(url.as_str()),
        )
        .await
        .map_err(|_| Error::RealtimeConnect("handshake timed out".into()))?
        .map_err(|e| Error::RealtimeConnect(e.to_string()))?;
        Ok(ws)
    }

    async fn restart(&mut self, reason: &str) {
        info!(reason, "reconnecting realtime channel");
        self.close().await;
        self.open().await;
    }

    /// Graceful close: namespace disconnect, then a WebSocket close frame.
    async fn close(&mut self) {
        if let Some(mut conn) = self.conn.take() {
            let leave = SocketPacket::Disconnect {
                namespace: self.config.namespace.clone(),
            };
            let graceful = async {
                conn.ws.send(Message::text(leave.encode())).await?;
                conn.ws.close(None).await
            };
            match tokio::time::timeout(CLOSE_TIMEOUT, graceful).await {
                Ok(Ok(())) => debug!("realtime socket closed"),
                Ok(Err(e)) => debug!(error = %e, "realtime close failed"),
                Err(_) => debug!("realtime close timed out"),
            }
        }
        self.proto.disconnected();
        self.publish_state();
    }

    /// The socket is gone without a graceful close. Stays down until the
    /// next reconnect.
    fn drop_connection(&mut self, reason: &str) {
        if self.conn.take().is_some() {
            let err = Error::RealtimeClosed {
                reason: reason.to_owned(),
            };
            warn!(error = %err, transient = err.is_transient(), "realtime channel disconnected");
        }
        self.proto.disconnected();
        self.publish_state();
    }

    fn publish_state(&self) {
        self.state_tx.send_replace(self.proto.state());
    }

    async fn send(&mut self, frame: String) {
        let Some(conn) = self.conn.as_mut() else {
            return;
        };
        trace!(frame = %frame, "realtime send");
        let result = conn.ws.send(Message::text(frame)).await;
        if let Err(e) = result {
            self.drop_connection(&format!("send failed: {e}"));
        }
    }

    // ── Inbound ──────────────────────────────────────────────────────

    async fn on_wire(&mut self, wire: Wire) {
        match wire {
            Wire::PingDue => self.send(EnginePacket::Ping(String::new()).encode()).await,
            Wire::Frame(Some(Ok(Message::Text(text)))) => self.on_text(&text).await,
            Wire::Frame(Some(Ok(Message::Close(frame)))) => {
                let reason = frame.map(|f| f.reason.as_str().to_owned()).unwrap_or_default();
                self.drop_connection(&format!("close frame: {reason}"));
            }
            Wire::Frame(Some(Ok(_))) => {}
            Wire::Frame(Some(Err(e))) => self.drop_connection(&e.to_string()),
            Wire::Frame(None) => self.drop_connection("stream ended"),
        }
    }

    async fn on_text(&mut self, text: &str) {
        trace!(frame = text, "realtime recv");
        let packet = match EnginePacket::decode(text) {
            Ok(p) => p,
            Err(e) => {
                debug!(error = %e, "ignoring undecodable frame");
                return;
            }
        };

        match packet {
            EnginePacket::Open(handshake) => {
                debug!(
                    sid = %handshake.sid,
                    ping_interval_ms = handshake.ping_interval,
                    "engine.io open"
                );
                if self.config.engine_io_version < 4 && handshake.ping_interval > 0 {
                    if let Some(conn) = self.conn.as_mut() {
                        let period = Duration::from_millis(handshake.ping_interval);
                        let mut ping = tokio::time::interval_at(Instant::now() + period, period);
                        ping.set_missed_tick_behavior(MissedTickBehavior::Delay);
                        conn.ping = Some(ping);
                    }
                }
                let join = SocketPacket::Connect {
                    namespace: self.config.namespace.clone(),
                };
                self.send(join.encode()).await;
            }
            EnginePacket::Ping(data) => self.send(EnginePacket::Pong(data).encode()).await,
            EnginePacket::Pong(_) => trace!("engine.io pong"),
            EnginePacket::Close => self.drop_connection("engine.io close"),
            EnginePacket::Message(payload) => self.on_message(&payload).await,
            EnginePacket::Upgrade | EnginePacket::Noop => {}
        }
    }

    async fn on_message(&mut self, payload: &str) {
        let packet = match SocketPacket::decode(payload) {
            Ok(p) => p,
            Err(e) => {
                debug!(error = %e, "ignoring undecodable socket.io packet");
                return;
            }
        };
        if packet.namespace() != self.config.namespace {
            trace!(namespace = packet.namespace(), "ignoring packet for other namespace");
            return;
        }

        match packet {
            SocketPacket::Connect { .. } => {
                info!("realtime namespace joined");
                let action = self.proto.connected();
                self.publish_state();
                self.apply(action).await;
            }
            SocketPacket::Disconnect { .. } => self.drop_connection("namespace disconnect"),
            SocketPacket::Event { name, data, .. } => {
                let action = self.proto.on_event(&name, data.as_ref());
                self.publish_state();
                self.apply(action).await;
            }
            SocketPacket::Error { data, .. } => {
                error!(error = ?data, "realtime namespace error");
                self.drop_connection("namespace error");
            }
            SocketPacket::Unsupported { kind, .. } => {
                trace!(%kind, "ignoring unsupported socket.io packet");
            }
        }
    }

    async fn apply(&mut self, action: Action) {
        match action {
            Action::None => {}
            Action::RequestSnapshot => {
                let request = SocketPacket::Event {
                    namespace: self.config.namespace.clone(),
                    name: SNAPSHOT_EVENT.to_owned(),
                    data: None,
                };
                debug!("requesting device snapshot");
                self.send(request.encode()).await;
            }
            Action::Deliver(event) => {
                debug!(nodes = event.updates().len(), "realtime event");
                if self.events.send(event).await.is_err() {
                    debug!("realtime event receiver dropped");
                }
            }
        }
    }
}

/// `{base as ws/wss}/socket.io/?token=..&dev_id=..&EIO=..&transport=websocket`
fn socket_url(base: &Url, token: &str, device_id: &str, eio: u8) -> Result<Url, Error> {
    let mut url = base.join("socket.io/")?;
    let scheme = match url.scheme() {
        "https" | "wss" => "wss",
        "http" | "ws" => "ws",
        other => {
            return Err(Error::RealtimeConnect(format!(
                "unsupported URL scheme {other}"
            )));
        }
    };
    url.set_scheme(scheme)
        .map_err(|()| Error::RealtimeConnect(format!("cannot use scheme {scheme}")))?;
    url.query_pairs_mut()
        .append_pair("token", token)
        .append_pair("dev_id", device_id)
        .append_pair("EIO", &eio.to_string())
        .append_pair("transport", "websocket");
    Ok(url)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn socket_url_switches_scheme_and_carries_query() {
        let base = Url::parse("https://api-haverland.helki.com/").unwrap();
        let url = socket_url(&base, "tok/en", "dev42", 3).unwrap();
        assert_eq!(
            url.as_str(),
            "wss://api-haverland.helki.com/socket.io/?token=tok%2Fen&dev_id=dev42&EIO=3&transport=websocket"
        );
    }

    #[test]
    fn socket_url_plain_http_becomes_ws() {
        let base = Url::parse("http://127.0.0.1:8080").unwrap();
        let url = socket_url(&base, "t", "d", 4).unwrap();
        assert_eq!(url.scheme(), "ws");
        assert_eq!(url.path(), "/socket.io/");
        assert!(url.query().unwrap().contains("EIO=4"));
    }

    #[test]
    fn socket_url_rejects_other_schemes() {
        let base = Url::parse("ftp://example.com/").unwrap();
        assert!(socket_url(&base, "t", "d", 3).is_err());
    }

    #[test]
    fn default_config() {
        let config = RealtimeConfig::default();
        assert_eq!(config.forced_reconnect, Duration::from_secs(600));
        assert_eq!(config.engine_io_version, 3);
        assert_eq!(config.namespace, "/api/v2/socket_io");
        assert!(config.endpoint.is_none());
    }
}
