// ── MQTT transport ──
//
// The bridge only needs publish/subscribe/unsubscribe/close. The trait is
// the seam between NodeBridge and the broker client; `RumqttTransport` is
// the production implementation. Inbound publishes never go through the
// trait: the event-loop task forwards them into an mpsc channel that the
// orchestrator's dispatch loop drains. The forward never waits: the
// dispatch loop publishes through this same event loop, so a blocked
// poll would stall both.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rumqttc::{AsyncClient, ConnectionError, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS};
use secrecy::ExposeSecret;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, info_span, trace, warn};

use crate::config::MqttSettings;
use crate::error::CoreError;

const REQUEST_CHANNEL_CAPACITY: usize = 64;
const INBOUND_CHANNEL_CAPACITY: usize = 256;
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);
/// Pause between event-loop polls after a connection error; rumqttc
/// reconnects on the next poll.
const POLL_ERROR_PAUSE: Duration = Duration::from_secs(1);

/// Every publish and subscription uses at-least-once delivery.
pub const QOS: QoS = QoS::AtLeastOnce;

/// A publish received on a subscribed topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: String,
}

/// Whether a bridge may close the transport it publishes through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Ownership {
    /// Only this bridge uses the transport; `disconnect()` closes it.
    Exclusive,
    /// Other bridges publish through it too; it is left open.
    #[default]
    Shared,
}

/// Broker operations the bridge uses. Implementations must accept
/// concurrent calls from many bridges.
#[async_trait]
pub trait MqttTransport: Send + Sync {
    async fn publish(&self, topic: &str, payload: &str, retain: bool) -> Result<(), CoreError>;

    async fn subscribe(&self, topic: &str) -> Result<(), CoreError>;

    async fn unsubscribe(&self, topic: &str) -> Result<(), CoreError>;

    /// Disconnect from the broker. Further calls fail.
    async fn close(&self) -> Result<(), CoreError>;
}

// ── rumqttc implementation ───────────────────────────────────────────

/// [`MqttTransport`] over a `rumqttc` async client.
///
/// Subscriptions are remembered and re-issued after the event loop
/// reconnects, since the session is clean.
pub struct RumqttTransport {
    client: AsyncClient,
    subscriptions: Arc<Mutex<BTreeSet<String>>>,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl RumqttTransport {
    /// Connect to the broker and wait for the first CONNACK.
    ///
    /// Returns the transport and the receiver of inbound publishes. The
    /// event loop stops when `parent` is cancelled or on [`close`](MqttTransport::close).
    pub async fn connect(
        settings: &MqttSettings,
        parent: &CancellationToken,
    ) -> Result<(Self, mpsc::Receiver<InboundMessage>), CoreError> {
        let mut options = MqttOptions::new(&settings.client_id, &settings.host, settings.port);
        options.set_keep_alive(settings.keep_alive);
        options.set_clean_session(true);
        if let Some(username) = &settings.username {
            let password = settings
                .password
                .as_ref()
                .map(|p| p.expose_secret().to_owned())
                .unwrap_or_default();
            options.set_credentials(username, password);
        }

        let (client, mut eventloop) = AsyncClient::new(options, REQUEST_CHANNEL_CAPACITY);

        info!(host = %settings.host, port = settings.port, client_id = %settings.client_id, "connecting to MQTT broker");
        tokio::time::timeout(CONNECT_TIMEOUT, wait_for_connack(&mut eventloop))
            .await
            .map_err(|_| CoreError::Mqtt {
                message: format!(
                    "no CONNACK from {}:{} within {}s",
                    settings.host,
                    settings.port,
                    CONNECT_TIMEOUT.as_secs()
                ),
            })??;
        info!("connected to MQTT broker");

        let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_CHANNEL_CAPACITY);
        let subscriptions = Arc::new(Mutex::new(BTreeSet::new()));
        let cancel = parent.child_token();

        let span = info_span!("mqtt", host = %settings.host);
        let task = tokio::spawn(
            event_loop_task(
                eventloop,
                client.clone(),
                Arc::clone(&subscriptions),
                inbound_tx,
                cancel.clone(),
            )
            .instrument(span),
        );

        let transport = Self {
            client,
            subscriptions,
            cancel,
            task: Mutex::new(Some(task)),
        };
        Ok((transport, inbound_rx))
    }
}

#[async_trait]
impl MqttTransport for RumqttTransport {
    async fn publish(&self, topic: &str, payload: &str, retain: bool) -> Result<(), CoreError> {
        trace!(topic, payload, retain, "publish");
        self.client
            .publish(topic, QOS, retain, payload.as_bytes().to_vec())
            .await?;
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> Result<(), CoreError> {
        self.client.subscribe(topic, QOS).await?;
        self.subscriptions.lock().await.insert(topic.to_owned());
        debug!(topic, "subscribed");
        Ok(())
    }

    async fn unsubscribe(&self, topic: &str) -> Result<(), CoreError> {
        self.subscriptions.lock().await.remove(topic);
        self.client.unsubscribe(topic).await?;
        debug!(topic, "unsubscribed");
        Ok(())
    }

    async fn close(&self) -> Result<(), CoreError> {
        let Some(task) = self.task.lock().await.take() else {
            return Ok(());
        };
        let result = self.client.disconnect().await;

        // The event loop exits once DISCONNECT is on the wire.
        if tokio::time::timeout(CLOSE_TIMEOUT, task).await.is_err() {
            debug!("MQTT event loop did not stop in time, cancelling");
            self.cancel.cancel();
        }
        info!("disconnected from MQTT broker");
        result.map_err(CoreError::from)
    }
}

async fn wait_for_connack(eventloop: &mut EventLoop) -> Result<(), CoreError> {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(_))) => return Ok(()),
            Ok(_) => {}
            Err(e) => {
                return Err(CoreError::Mqtt {
                    message: format!("broker connection failed: {e}"),
                });
            }
        }
    }
}

async fn event_loop_task(
    mut eventloop: EventLoop,
    client: AsyncClient,
    subscriptions: Arc<Mutex<BTreeSet<String>>>,
    inbound: mpsc::Sender<InboundMessage>,
    cancel: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            event = eventloop.poll() => event,
        };

        match event {
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                let message = InboundMessage {
                    topic: publish.topic,
                    payload: String::from_utf8_lossy(&publish.payload).into_owned(),
                };
                debug!(topic = %message.topic, payload = %message.payload, "inbound message");
                forward_inbound(&inbound, message);
            }
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                let topics = subscriptions.lock().await.clone();
                info!(subscriptions = topics.len(), "reconnected to MQTT broker");
                for topic in topics {
                    if let Err(e) = client.try_subscribe(topic.as_str(), QOS) {
                        warn!(topic = %topic, error = %e, "resubscribe failed");
                    }
                }
            }
            Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                debug!("DISCONNECT sent");
                break;
            }
            Ok(_) => {}
            Err(ConnectionError::RequestsDone) => break,
            Err(e) => {
                warn!(error = %e, "MQTT connection error");
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => break,
                    () = tokio::time::sleep(POLL_ERROR_PAUSE) => {}
                }
            }
        }
    }
    debug!("MQTT event loop exiting");
}

/// Hand an inbound publish to the dispatch loop without blocking the
/// event loop. Returns `false` if the message was dropped.
fn forward_inbound(inbound: &mpsc::Sender<InboundMessage>, message: InboundMessage) -> bool {
    match inbound.try_send(message) {
        Ok(()) => true,
        Err(TrySendError::Full(message)) => {
            warn!(topic = %message.topic, "inbound queue full, dropping command");
            false
        }
        Err(TrySendError::Closed(_)) => {
            debug!("inbound receiver dropped");
            false
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn message(n: usize) -> InboundMessage {
        InboundMessage {
            topic: "heater/living_room/temperature/set".into(),
            payload: format!("{n}"),
        }
    }

    #[tokio::test]
    async fn forward_drops_instead_of_waiting_when_queue_is_full() {
        let (tx, mut rx) = mpsc::channel(2);

        assert!(forward_inbound(&tx, message(1)));
        assert!(forward_inbound(&tx, message(2)));
        // A third message would block a plain `send`; it must return at once.
        assert!(!forward_inbound(&tx, message(3)));

        assert_eq!(rx.recv().await.unwrap().payload, "1");
        assert_eq!(rx.recv().await.unwrap().payload, "2");
        assert!(rx.try_recv().is_err());

        // Room again once the consumer catches up.
        assert!(forward_inbound(&tx, message(4)));
        assert_eq!(rx.recv().await.unwrap().payload, "4");
    }

    #[test]
    fn forward_to_closed_receiver_is_dropped() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        assert!(!forward_inbound(&tx, message(1)));
    }
}
