// Hand-written fakes shared by the integration tests.

#![allow(dead_code, clippy::unwrap_used)]

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use smartbox_api::{NodeKey, NodeStatus, StatusUpdate};
use smartbox_core::{CoreError, MqttTransport, NodeApi};

// ── Transport ───────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Published {
    pub topic: String,
    pub payload: String,
    pub retain: bool,
}

/// Records every call; never touches a network.
#[derive(Debug, Default)]
pub struct FakeTransport {
    published: Mutex<Vec<Published>>,
    subscriptions: Mutex<Vec<String>>,
    unsubscribed: Mutex<Vec<String>>,
    closed: AtomicBool,
    fail_publish: AtomicBool,
}

impl FakeTransport {
    pub fn published(&self) -> Vec<Published> {
        self.published.lock().unwrap().clone()
    }

    pub fn clear_published(&self) {
        self.published.lock().unwrap().clear();
    }

    /// Last retained value per topic.
    pub fn retained(&self) -> HashMap<String, String> {
        self.published
            .lock()
            .unwrap()
            .iter()
            .filter(|p| p.retain)
            .map(|p| (p.topic.clone(), p.payload.clone()))
            .collect()
    }

    pub fn subscriptions(&self) -> Vec<String> {
        self.subscriptions.lock().unwrap().clone()
    }

    pub fn unsubscribed(&self) -> Vec<String> {
        self.unsubscribed.lock().unwrap().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn fail_publishes(&self, fail: bool) {
        self.fail_publish.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl MqttTransport for FakeTransport {
    async fn publish(&self, topic: &str, payload: &str, retain: bool) -> Result<(), CoreError> {
        if self.fail_publish.load(Ordering::SeqCst) {
            return Err(CoreError::Mqtt {
                message: "broker gone".into(),
            });
        }
        self.published.lock().unwrap().push(Published {
            topic: topic.to_owned(),
            payload: payload.to_owned(),
            retain,
        });
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> Result<(), CoreError> {
        self.subscriptions.lock().unwrap().push(topic.to_owned());
        Ok(())
    }

    async fn unsubscribe(&self, topic: &str) -> Result<(), CoreError> {
        self.subscriptions.lock().unwrap().retain(|t| t != topic);
        self.unsubscribed.lock().unwrap().push(topic.to_owned());
        Ok(())
    }

    async fn close(&self) -> Result<(), CoreError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

// ── Node API ────────────────────────────────────────────────────────

/// Serves one status record and applies writes to it.
#[derive(Debug, Default)]
pub struct FakeApi {
    status: Mutex<NodeStatus>,
    writes: Mutex<Vec<(String, NodeKey, StatusUpdate)>>,
    gets: AtomicUsize,
    fail_writes: AtomicBool,
    fail_reads: AtomicBool,
    panic_reads: AtomicBool,
}

impl FakeApi {
    pub fn with_status(status: NodeStatus) -> Self {
        Self {
            status: Mutex::new(status),
            ..Self::default()
        }
    }

    pub fn writes(&self) -> Vec<(String, NodeKey, StatusUpdate)> {
        self.writes.lock().unwrap().clone()
    }

    pub fn gets(&self) -> usize {
        self.gets.load(Ordering::SeqCst)
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn panic_reads(&self, panic: bool) {
        self.panic_reads.store(panic, Ordering::SeqCst);
    }
}

fn server_error(path: &str) -> smartbox_api::Error {
    smartbox_api::Error::Http {
        path: path.to_owned(),
        status: 500,
        body: "internal error".into(),
    }
}

#[async_trait]
impl NodeApi for FakeApi {
    async fn get_status(&self, _device_id: &str, _node: &NodeKey) -> Result<NodeStatus, smartbox_api::Error> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        assert!(!self.panic_reads.load(Ordering::SeqCst), "status read blew up");
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(server_error("status"));
        }
        Ok(self.status.lock().unwrap().clone())
    }

    async fn set_status(
        &self,
        device_id: &str,
        node: &NodeKey,
        update: &StatusUpdate,
    ) -> Result<serde_json::Value, smartbox_api::Error> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(server_error("status"));
        }
        self.writes
            .lock()
            .unwrap()
            .push((device_id.to_owned(), node.clone(), update.clone()));

        let mut status = self.status.lock().unwrap();
        if let Some(mode) = &update.mode {
            status.mode = Some(mode.clone());
        }
        if let Some(stemp) = &update.stemp {
            status.stemp = Some(stemp.clone());
        }
        Ok(serde_json::json!({}))
    }
}
