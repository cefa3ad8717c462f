// ── Per-node MQTT binding ──
//
// A NodeBridge owns one heater's topic namespace. Three independent
// writers publish its retained state (initial publish, poll timer,
// realtime push) plus the re-publish after each command. They are not
// ordered against each other; the broker keeps whichever publish landed
// last.

use std::sync::Arc;
use std::time::Duration;

use smartbox_api::{Node, NodeKey, NodeStatus, StatusUpdate};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, info_span, warn};

use crate::error::CoreError;
use crate::mqtt::{MqttTransport, Ownership};
use crate::node_api::NodeApi;
use crate::topic::{CommandTopic, NodeTopics, StateTopic};

const ON: &str = "ON";
const OFF: &str = "OFF";

/// Settings every bridge on a transport shares.
#[derive(Debug, Clone)]
pub struct BridgeSettings {
    pub base_topic: String,
    /// Units sent with set-point writes.
    pub units: String,
}

struct Poller {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Binds one heater node to its MQTT namespace.
pub struct NodeBridge {
    device_id: String,
    node: Node,
    key: NodeKey,
    topics: NodeTopics,
    units: String,
    api: Arc<dyn NodeApi>,
    transport: Arc<dyn MqttTransport>,
    ownership: Ownership,
    poller: Mutex<Option<Poller>>,
}

impl NodeBridge {
    pub fn new(
        device_id: impl Into<String>,
        node: Node,
        api: Arc<dyn NodeApi>,
        transport: Arc<dyn MqttTransport>,
        ownership: Ownership,
        settings: &BridgeSettings,
    ) -> Self {
        let topics = NodeTopics::for_node(&settings.base_topic, &node);
        Self {
            device_id: device_id.into(),
            key: node.key(),
            node,
            topics,
            units: settings.units.clone(),
            api,
            transport,
            ownership,
            poller: Mutex::new(None),
        }
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn node(&self) -> &Node {
        &self.node
    }

    pub fn key(&self) -> &NodeKey {
        &self.key
    }

    pub fn topics(&self) -> &NodeTopics {
        &self.topics
    }

    pub fn command_topics(&self) -> [String; 2] {
        [
            self.topics.command(CommandTopic::Mode),
            self.topics.command(CommandTopic::Temperature),
        ]
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    /// Subscribe to both command topics, then publish the current status
    /// once. A failed initial publish is logged; the poll timer retries.
    pub async fn start(&self) -> Result<(), CoreError> {
        info!(node = %self.key, name = %self.node.name, topics = %self.topics, "setting up bridge");
        for topic in self.command_topics() {
            self.transport.subscribe(&topic).await?;
            info!(topic = %topic, "subscribed");
        }
        if let Err(e) = self.refresh().await {
            warn!(node = %self.key, error = %e, "initial status publish failed");
        }
        Ok(())
    }

    /// Fetch and publish the full status every `every`, first tick after
    /// one period. Replaces any previous poll timer.
    pub async fn start_polling(self: &Arc<Self>, every: Duration, parent: &CancellationToken) {
        let cancel = parent.child_token();
        let bridge = Arc::clone(self);
        let task_cancel = cancel.clone();
        let span = info_span!("poll", device_id = %self.device_id, node = %self.key);

        let handle = tokio::spawn(
            async move {
                let mut interval = tokio::time::interval(every);
                interval.tick().await; // consume the immediate first tick

                loop {
                    tokio::select! {
                        biased;
                        () = task_cancel.cancelled() => break,
                        _ = interval.tick() => {
                            if let Err(e) = bridge.refresh().await {
                                warn!(error = %e, "periodic refresh failed");
                            }
                        }
                    }
                }
                debug!("poll timer stopped");
            }
            .instrument(span),
        );

        let previous = self.poller.lock().await.replace(Poller { cancel, handle });
        if let Some(previous) = previous {
            previous.cancel.cancel();
        }
    }

    /// Stop the poll timer and wait for an in-progress refresh to finish.
    pub async fn stop_polling(&self) {
        let poller = self.poller.lock().await.take();
        if let Some(poller) = poller {
            poller.cancel.cancel();
            if let Err(e) = poller.handle.await {
                warn!(device_id = %self.device_id, node = %self.key, error = %e, "poll task panicked");
            }
        }
    }

    /// Remove both command subscriptions.
    pub async fn unsubscribe(&self) -> Result<(), CoreError> {
        for topic in self.command_topics() {
            self.transport.unsubscribe(&topic).await?;
        }
        Ok(())
    }

    /// Stop polling and close the transport if this bridge owns it.
    pub async fn disconnect(&self) -> Result<(), CoreError> {
        self.stop_polling().await;
        match self.ownership {
            Ownership::Exclusive => self.transport.close().await,
            Ownership::Shared => Ok(()),
        }
    }

    // ── Commands ─────────────────────────────────────────────────────

    /// Handle an inbound publish. Topics outside this namespace's two
    /// command topics are ignored.
    pub async fn handle_command(&self, topic: &str, payload: &str) -> Result<(), CoreError> {
        let Some(command) = self.topics.command_for(topic) else {
            return Ok(());
        };
        info!(node = %self.key, %command, payload, "command received");

        let update = match command {
            CommandTopic::Mode => StatusUpdate::mode(parse_mode(payload)?),
            CommandTopic::Temperature => StatusUpdate::setpoint(parse_setpoint(payload)?, &self.units),
        };

        self.api.set_status(&self.device_id, &self.key, &update).await?;
        info!(node = %self.key, %command, "command applied");
        self.refresh().await
    }

    // ── State ────────────────────────────────────────────────────────

    /// Fetch the full status and publish it.
    pub async fn refresh(&self) -> Result<(), CoreError> {
        let status = self.api.get_status(&self.device_id, &self.key).await?;
        self.publish_status(&status).await
    }

    /// Publish every field present in `status` as a retained message.
    ///
    /// Every present field is attempted; the first failure is returned.
    pub async fn publish_status(&self, status: &NodeStatus) -> Result<(), CoreError> {
        let mut first_error = None;
        for (topic, value) in render_status(status) {
            let topic = self.topics.state(topic);
            if let Err(e) = self.transport.publish(&topic, &value, true).await {
                warn!(topic = %topic, error = %e, "state publish failed");
                first_error.get_or_insert(e);
            }
        }
        debug!(
            node = %self.key,
            mode = status.mode.as_deref().unwrap_or("-"),
            stemp = status.stemp.as_deref().unwrap_or("-"),
            mtemp = status.mtemp.as_deref().unwrap_or("-"),
            "published state"
        );
        first_error.map_or(Ok(()), Err)
    }
}

impl std::fmt::Debug for NodeBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeBridge")
            .field("device_id", &self.device_id)
            .field("key", &self.key)
            .field("topics", &self.topics.base())
            .field("ownership", &self.ownership)
            .finish_non_exhaustive()
    }
}

/// Retained values for every field present in `status`, in topic order.
pub fn render_status(status: &NodeStatus) -> Vec<(StateTopic, String)> {
    let text = [
        (StateTopic::Mode, &status.mode),
        (StateTopic::Temperature, &status.stemp),
        (StateTopic::CurrentTemperature, &status.mtemp),
        (StateTopic::ComfortTemperature, &status.comf_temp),
        (StateTopic::EcoTemperature, &status.eco_temp),
        (StateTopic::IceTemperature, &status.ice_temp),
        (StateTopic::SelectedTemperature, &status.selected_temp),
    ];

    let mut out: Vec<(StateTopic, String)> = text
        .into_iter()
        .filter_map(|(topic, value)| value.clone().map(|v| (topic, v)))
        .collect();

    if let Some(active) = status.active {
        out.push((StateTopic::Active, on_off(active).to_owned()));
    }
    if let Some(power) = &status.power {
        out.push((StateTopic::Power, power.clone()));
    }
    if let Some(online) = status.online() {
        out.push((StateTopic::Online, on_off(online).to_owned()));
    }
    out
}

fn on_off(flag: bool) -> &'static str {
    if flag { ON } else { OFF }
}

fn parse_mode(payload: &str) -> Result<&str, CoreError> {
    let mode = payload.trim();
    if mode.is_empty() {
        return Err(CoreError::Validation {
            field: "mode",
            payload: payload.to_owned(),
            reason: "empty mode".into(),
        });
    }
    Ok(mode)
}

fn parse_setpoint(payload: &str) -> Result<f64, CoreError> {
    let invalid = |reason: &str| CoreError::Validation {
        field: "temperature",
        payload: payload.to_owned(),
        reason: reason.to_owned(),
    };
    let value: f64 = payload.trim().parse().map_err(|_| invalid("not a number"))?;
    if !value.is_finite() {
        return Err(invalid("not a finite number"));
    }
    Ok(value)
}
