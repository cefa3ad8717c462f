// ── Bridge orchestration ──
//
// Startup wiring and shutdown for the whole bridge: one NodeBridge per
// heater node on a shared transport, one RealtimeChannel per device, and
// the dispatch loops that feed them. The orchestrator owns every spawned
// task and the transport, and tears them down in order.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use smartbox_api::{ApiClient, Node, RealtimeChannel, RealtimeEvent};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::config::BridgeConfig;
use crate::error::CoreError;
use crate::mqtt::{InboundMessage, MqttTransport, Ownership};
use crate::node_api::NodeApi;
use crate::node_bridge::{BridgeSettings, NodeBridge};
use crate::routing::TopicBinding;

/// How long shutdown waits for in-flight dispatch work.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// A running bridge.
pub struct Orchestrator {
    bridges: Vec<Arc<NodeBridge>>,
    bindings: HashMap<String, Arc<TopicBinding>>,
    channels: Vec<RealtimeChannel>,
    transport: Arc<dyn MqttTransport>,
    tasks: Vec<JoinHandle<()>>,
    cancel: CancellationToken,
}

impl Orchestrator {
    /// Authenticate, enumerate, wire every heater node, and start the
    /// dispatch loops.
    ///
    /// `transport` must already be connected; `inbound` is its stream of
    /// received publishes. Fails (and stops everything it started) on
    /// authentication failure or when no devices or heater nodes exist.
    pub async fn start(
        config: &BridgeConfig,
        client: ApiClient,
        transport: Arc<dyn MqttTransport>,
        inbound: mpsc::Receiver<InboundMessage>,
        parent: &CancellationToken,
    ) -> Result<Self, CoreError> {
        let cancel = parent.child_token();
        let mut orchestrator = Self {
            bridges: Vec::new(),
            bindings: HashMap::new(),
            channels: Vec::new(),
            transport,
            tasks: Vec::new(),
            cancel,
        };

        if let Err(e) = orchestrator.wire(config, &client).await {
            orchestrator.cancel.cancel();
            return Err(e);
        }

        orchestrator.spawn_command_dispatch(inbound);
        if config.smartbox.realtime {
            orchestrator.spawn_realtime(config, &client);
        }
        orchestrator.log_summary();
        Ok(orchestrator)
    }

    pub fn bridges(&self) -> &[Arc<NodeBridge>] {
        &self.bridges
    }

    /// Routing table of one device, if it has heater nodes.
    pub fn binding(&self, device_id: &str) -> Option<&Arc<TopicBinding>> {
        self.bindings.get(device_id)
    }

    pub fn channels(&self) -> &[RealtimeChannel] {
        &self.channels
    }

    /// Unsubscribe every bridge, stop every timer and channel, then close
    /// the shared transport.
    pub async fn shutdown(self) {
        info!("shutting down");

        for bridge in &self.bridges {
            if let Err(e) = bridge.unsubscribe().await {
                warn!(node = %bridge.key(), error = %e, "unsubscribe failed");
            }
            if let Err(e) = bridge.disconnect().await {
                warn!(node = %bridge.key(), error = %e, "bridge disconnect failed");
            }
        }

        for channel in &self.channels {
            channel.disconnect().await;
        }

        self.cancel.cancel();
        for task in self.tasks {
            if tokio::time::timeout(SHUTDOWN_GRACE, task).await.is_err() {
                debug!("dispatch task still busy at shutdown, detaching");
            }
        }

        if let Err(e) = self.transport.close().await {
            warn!(error = %e, "transport close failed");
        }
        info!("shutdown complete");
    }

    // ── Startup steps ────────────────────────────────────────────────

    async fn wire(&mut self, config: &BridgeConfig, client: &ApiClient) -> Result<(), CoreError> {
        client.session().authenticate().await?;
        info!("authenticated with Smartbox API");

        let devices = client.list_devices().await?;
        info!(count = devices.len(), "found devices");
        if devices.is_empty() {
            return Err(CoreError::NoDevices);
        }

        let api: Arc<dyn NodeApi> = Arc::new(client.clone());
        let settings = BridgeSettings {
            base_topic: config.mqtt.base_topic.clone(),
            units: config.smartbox.units.clone(),
        };

        for device in &devices {
            let span = info_span!("device", device_id = %device.dev_id);
            let nodes = client.list_nodes(&device.dev_id).instrument(span.clone()).await?;
            let total = nodes.len();
            let heaters: Vec<Node> = nodes.into_iter().filter(|n| n.kind.is_heater()).collect();
            info!(
                device_id = %device.dev_id,
                name = %device.name,
                nodes = total,
                heaters = heaters.len(),
                "processing device"
            );

            let mut binding = TopicBinding::new();
            for node in heaters {
                let bridge = Arc::new(NodeBridge::new(
                    device.dev_id.clone(),
                    node,
                    Arc::clone(&api),
                    Arc::clone(&self.transport),
                    Ownership::Shared,
                    &settings,
                ));
                if let Err(duplicate) = binding.insert(Arc::clone(&bridge)) {
                    warn!(node = %duplicate.key(), "duplicate node key on device, skipping");
                    continue;
                }
                bridge.start().instrument(span.clone()).await?;
                bridge
                    .start_polling(config.smartbox.polling_interval, &self.cancel)
                    .await;
                self.bridges.push(bridge);
            }

            if !binding.is_empty() {
                self.bindings.insert(device.dev_id.clone(), Arc::new(binding));
            }
        }

        if self.bridges.is_empty() {
            return Err(CoreError::NoHeaterNodes);
        }
        Ok(())
    }

    fn spawn_command_dispatch(&mut self, inbound: mpsc::Receiver<InboundMessage>) {
        let task = tokio::spawn(
            command_dispatch_task(self.bridges.clone(), inbound, self.cancel.clone())
                .instrument(info_span!("commands")),
        );
        self.tasks.push(task);
    }

    fn spawn_realtime(&mut self, config: &BridgeConfig, client: &ApiClient) {
        let realtime = config.smartbox.realtime_config();
        for (device_id, binding) in &self.bindings {
            let (channel, events) = RealtimeChannel::spawn(
                Arc::clone(client.session()),
                device_id.clone(),
                realtime.clone(),
                &self.cancel,
            );
            channel.connect();

            let task = tokio::spawn(
                realtime_dispatch_task(Arc::clone(binding), events, self.cancel.clone())
                    .instrument(info_span!("realtime_dispatch", device_id = %device_id)),
            );
            self.tasks.push(task);
            self.channels.push(channel);
        }
    }

    fn log_summary(&self) {
        let mut seen = HashSet::new();
        for bridge in &self.bridges {
            if !seen.insert(bridge.topics().base()) {
                warn!(
                    topics = %bridge.topics(),
                    "several nodes share this topic namespace; commands reach all of them"
                );
            }
        }

        info!(
            heaters = self.bridges.len(),
            devices = self.bindings.len(),
            realtime = !self.channels.is_empty(),
            "smartbox2mqtt bridge is running"
        );
        for bridge in &self.bridges {
            for topic in bridge.command_topics() {
                info!(topic = %topic, "listening for commands");
            }
        }
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("bridges", &self.bridges.len())
            .field("channels", &self.channels.len())
            .finish_non_exhaustive()
    }
}

// ── Background tasks ─────────────────────────────────────────────────

/// Offer every inbound publish to every bridge; each ignores topics
/// outside its namespace.
async fn command_dispatch_task(
    bridges: Vec<Arc<NodeBridge>>,
    mut inbound: mpsc::Receiver<InboundMessage>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            message = inbound.recv() => {
                let Some(message) = message else { break };
                for bridge in &bridges {
                    match bridge.handle_command(&message.topic, &message.payload).await {
                        Ok(()) => {}
                        Err(e @ CoreError::Validation { .. }) => {
                            warn!(node = %bridge.key(), error = %e, "command rejected");
                        }
                        Err(e) => {
                            error!(node = %bridge.key(), error = %e, "command failed");
                        }
                    }
                }
            }
        }
    }
    debug!("command dispatch stopped");
}

/// Route realtime pushes of one device to its bridges.
async fn realtime_dispatch_task(
    binding: Arc<TopicBinding>,
    mut events: mpsc::Receiver<RealtimeEvent>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            event = events.recv() => {
                let Some(event) = event else { break };
                let routed = binding.dispatch(&event).await;
                debug!(routed, total = event.updates().len(), "realtime event routed");
            }
        }
    }
    debug!("realtime dispatch stopped");
}
