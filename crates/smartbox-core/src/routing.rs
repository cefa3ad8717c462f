// Composite-key routing of realtime pushes to bridges.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::Arc;

use smartbox_api::{NodeKey, RealtimeEvent};
use tracing::{trace, warn};

use crate::node_bridge::NodeBridge;

/// `(type, addr)` → bridge, for the nodes of one device.
///
/// Built once during startup and read-only afterwards.
#[derive(Debug, Default)]
pub struct TopicBinding {
    bridges: HashMap<NodeKey, Arc<NodeBridge>>,
}

impl TopicBinding {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a bridge under its node key. A second bridge for the same key
    /// is rejected and handed back.
    pub fn insert(&mut self, bridge: Arc<NodeBridge>) -> Result<(), Arc<NodeBridge>> {
        match self.bridges.entry(bridge.key().clone()) {
            Entry::Occupied(_) => Err(bridge),
            Entry::Vacant(slot) => {
                slot.insert(bridge);
                Ok(())
            }
        }
    }

    pub fn get(&self, key: &NodeKey) -> Option<&Arc<NodeBridge>> {
        self.bridges.get(key)
    }

    pub fn len(&self) -> usize {
        self.bridges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bridges.is_empty()
    }

    pub fn bridges(&self) -> impl Iterator<Item = &Arc<NodeBridge>> {
        self.bridges.values()
    }

    /// Publish every node status in `event` through its bridge. Unbound
    /// keys are skipped. Returns how many statuses were routed.
    pub async fn dispatch(&self, event: &RealtimeEvent) -> usize {
        let mut routed = 0;
        for update in event.updates() {
            let Some(bridge) = self.bridges.get(&update.key) else {
                trace!(node = %update.key, "no bridge for pushed node");
                continue;
            };
            routed += 1;
            if let Err(e) = bridge.publish_status(&update.status).await {
                warn!(node = %update.key, error = %e, "realtime publish failed");
            }
        }
        routed
    }
}
