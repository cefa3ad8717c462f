// The slice of the REST API a NodeBridge needs.

use async_trait::async_trait;
use smartbox_api::{ApiClient, NodeKey, NodeStatus, StatusUpdate};

/// Status read/write for a single node.
#[async_trait]
pub trait NodeApi: Send + Sync {
    async fn get_status(&self, device_id: &str, node: &NodeKey) -> Result<NodeStatus, smartbox_api::Error>;

    async fn set_status(
        &self,
        device_id: &str,
        node: &NodeKey,
        update: &StatusUpdate,
    ) -> Result<serde_json::Value, smartbox_api::Error>;
}

#[async_trait]
impl NodeApi for ApiClient {
    async fn get_status(&self, device_id: &str, node: &NodeKey) -> Result<NodeStatus, smartbox_api::Error> {
        ApiClient::get_status(self, device_id, node).await
    }

    async fn set_status(
        &self,
        device_id: &str,
        node: &NodeKey,
        update: &StatusUpdate,
    ) -> Result<serde_json::Value, smartbox_api::Error> {
        ApiClient::set_status(self, device_id, node, update).await
    }
}
