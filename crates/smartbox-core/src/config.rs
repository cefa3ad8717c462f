// ── Runtime bridge configuration ──
//
// Everything the bridge needs to run, already resolved and validated.
// `smartbox-config` builds a `BridgeConfig` from files and environment;
// core never touches disk.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use secrecy::SecretString;
use smartbox_api::{
    ApiClient, AuthSession, RealtimeConfig, Reseller, TlsMode, TransportConfig,
};
use url::Url;

use crate::error::CoreError;

/// Vendor-side settings.
#[derive(Debug, Clone)]
pub struct SmartboxSettings {
    pub username: String,
    pub password: SecretString,
    pub reseller: Reseller,
    /// Overrides the reseller host (tests, self-hosted proxies).
    pub base_url: Option<Url>,
    /// Extra CA certificate for `base_url`.
    pub ca_cert: Option<PathBuf>,
    pub request_timeout: Duration,
    pub polling_interval: Duration,
    /// Units sent with set-point writes.
    pub units: String,
    /// Enable the push channel. Polling runs either way.
    pub realtime: bool,
    pub reconnect_interval: Duration,
    pub engine_io_version: u8,
    /// Push channel host override. `None` uses the API host.
    pub realtime_url: Option<Url>,
}

impl SmartboxSettings {
    /// The API host: explicit override, else the reseller's host.
    pub fn api_url(&self) -> Result<Url, CoreError> {
        match &self.base_url {
            Some(url) => Ok(url.clone()),
            None => Ok(self.reseller.api_host()?),
        }
    }

    pub fn transport(&self) -> TransportConfig {
        TransportConfig {
            tls: self
                .ca_cert
                .clone()
                .map_or(TlsMode::System, TlsMode::CustomCa),
            timeout: self.request_timeout,
        }
    }

    pub fn realtime_config(&self) -> RealtimeConfig {
        RealtimeConfig {
            forced_reconnect: self.reconnect_interval,
            engine_io_version: self.engine_io_version,
            endpoint: self.realtime_url.clone(),
            ..RealtimeConfig::default()
        }
    }

    /// Build the shared session and a client over it. No network traffic.
    pub fn api_client(&self) -> Result<ApiClient, CoreError> {
        let http = self.transport().build_client()?;
        let session = AuthSession::new(
            http,
            self.api_url()?,
            self.reseller.clone(),
            self.username.clone(),
            self.password.clone(),
        );
        Ok(ApiClient::new(Arc::new(session)))
    }
}

/// Broker-side settings.
#[derive(Debug, Clone)]
pub struct MqttSettings {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<SecretString>,
    pub client_id: String,
    /// Root of every node namespace, e.g. `heater`.
    pub base_topic: String,
    pub keep_alive: Duration,
}

/// Complete configuration for one bridge process.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    pub smartbox: SmartboxSettings,
    pub mqtt: MqttSettings,
}
