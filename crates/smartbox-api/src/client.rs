// Smartbox REST client
//
// Wraps `reqwest::Client` with bearer-token injection and `/api/v2/` URL
// construction. Every operation first asks the shared `AuthSession` for a
// valid token; failures propagate immediately with the failed path
// attached. There is no retry here: the next poll or command is the retry.

use std::sync::Arc;

use secrecy::ExposeSecret;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, trace};
use url::Url;

use crate::auth::AuthSession;
use crate::error::{Error, preview};
use crate::models::{Device, DeviceList, Node, NodeKey, NodeList, NodeStatus, StatusUpdate};

const API_PREFIX: &str = "api/v2/";

/// REST operations over an authenticated [`AuthSession`].
///
/// Cheaply cloneable; clones share the session and its token.
#[derive(Debug, Clone)]
pub struct ApiClient {
    session: Arc<AuthSession>,
}

impl ApiClient {
    pub fn new(session: Arc<AuthSession>) -> Self {
        Self { session }
    }

    pub fn session(&self) -> &Arc<AuthSession> {
        &self.session
    }

    // ── Operations ───────────────────────────────────────────────────

    /// All gateways registered to the account.
    pub async fn list_devices(&self) -> Result<Vec<Device>, Error> {
        let list: DeviceList = self.get("devs").await?;
        Ok(list.devs)
    }

    /// All nodes attached to a gateway, heater or not.
    pub async fn list_nodes(&self, device_id: &str) -> Result<Vec<Node>, Error> {
        let list: NodeList = self.get(&format!("devs/{device_id}/mgr/nodes")).await?;
        Ok(list.nodes)
    }

    /// Current status snapshot of one node.
    pub async fn get_status(&self, device_id: &str, node: &NodeKey) -> Result<NodeStatus, Error> {
        self.get(&status_path(device_id, node)).await
    }

    /// Apply a partial status update. Returns the backend's acknowledgement.
    pub async fn set_status(
        &self,
        device_id: &str,
        node: &NodeKey,
        update: &StatusUpdate,
    ) -> Result<serde_json::Value, Error> {
        debug!(device_id, node = %node, ?update, "setting node status");
        self.post(&status_path(device_id, node), update).await
    }

    // ── Request helpers ──────────────────────────────────────────────

    /// Build `{base}/api/v2/{path}`.
    fn api_url(&self, path: &str) -> Result<Url, Error> {
        self.session
            .base_url()
            .join(API_PREFIX)
            .and_then(|base| base.join(path))
            .map_err(Error::InvalidUrl)
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, Error> {
        let token = self.session.ensure_valid().await?;
        let url = self.api_url(path)?;
        debug!("GET {}", url);

        let resp = self
            .session
            .http()
            .get(url)
            .bearer_auth(token.access_token().expose_secret())
            .send()
            .await
            .map_err(|source| Error::Transport {
                path: path.to_owned(),
                source,
            })?;

        parse_response(path, resp).await
    }

    async fn post<T: DeserializeOwned>(
        &self,
        path: &str,
        body: &(impl Serialize + Sync),
    ) -> Result<T, Error> {
        let token = self.session.ensure_valid().await?;
        let url = self.api_url(path)?;
        debug!("POST {}", url);

        let resp = self
            .session
            .http()
            .post(url)
            .bearer_auth(token.access_token().expose_secret())
            .json(body)
            .send()
            .await
            .map_err(|source| Error::Transport {
                path: path.to_owned(),
                source,
            })?;

        parse_response(path, resp).await
    }
}

fn status_path(device_id: &str, node: &NodeKey) -> String {
    format!("devs/{device_id}/{}/status", node.path_segment())
}

/// Check the status code and decode the JSON body.
///
/// An empty success body decodes as JSON `null`, which the POST
/// acknowledgement path accepts.
async fn parse_response<T: DeserializeOwned>(path: &str, resp: reqwest::Response) -> Result<T, Error> {
    let status = resp.status();
    let body = resp.text().await.map_err(|source| Error::Transport {
        path: path.to_owned(),
        source,
    })?;

    if !status.is_success() {
        return Err(Error::Http {
            path: path.to_owned(),
            status: status.as_u16(),
            body: preview(&body).to_owned(),
        });
    }

    trace!(path, body = %preview(&body), "response");

    let text = if body.trim().is_empty() { "null" } else { &body };
    serde_json::from_str(text).map_err(|e| Error::Deserialization {
        path: path.to_owned(),
        message: e.to_string(),
        body,
    })
}
