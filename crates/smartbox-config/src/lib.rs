//! Configuration for smartbox2mqtt.
//!
//! JSON file discovery (with one-time migration of the legacy dotfile),
//! environment overrides, defaults, and validation into
//! `smartbox_core::BridgeConfig`. Core never reads files; the binary calls
//! [`load`] and hands the result over.

use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::{BaseDirs, ProjectDirs};
use figment::{
    Figment,
    providers::{Env, Format, Json},
};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use thiserror::Error;
use url::Url;

use smartbox_api::Reseller;
use smartbox_core::{BridgeConfig, MqttSettings, SmartboxSettings};

/// Prefix of environment overrides, nested with `__`
/// (`SMARTBOX2MQTT_MQTT__HOST`).
pub const ENV_PREFIX: &str = "SMARTBOX2MQTT_";

const APP_NAME: &str = "smartbox2mqtt";
const CONFIG_FILE: &str = "config.json";
const LEGACY_FILE: &str = ".smartbox2mqtt-config.json";

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("no config file found at {}", .path.display())]
    NotFound { path: PathBuf },

    #[error("invalid {field}: {reason}")]
    Validation { field: &'static str, reason: String },

    #[error("failed to migrate {} to {}: {source}", .from.display(), .to.display())]
    Migration {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

// ── File format ─────────────────────────────────────────────────────

/// On-disk configuration. Durations are milliseconds except `keepAlive`.
///
/// Every camelCase key also accepts its all-lowercase spelling, which is
/// what environment overrides produce.
#[derive(Debug, Default, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub smartbox: SmartboxSection,
    #[serde(default)]
    pub mqtt: MqttSection,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SmartboxSection {
    #[serde(default)]
    pub username: String,
    pub password: Option<SecretString>,
    #[serde(default = "default_api_name", alias = "apiname")]
    pub api_name: String,
    #[serde(default = "default_polling_interval", alias = "pollinginterval")]
    pub polling_interval: u64,
    #[serde(alias = "baseurl")]
    pub base_url: Option<String>,
    #[serde(alias = "cacert")]
    pub ca_cert: Option<PathBuf>,
    #[serde(default = "default_request_timeout", alias = "requesttimeout")]
    pub request_timeout: u64,
    #[serde(default = "default_units")]
    pub units: String,
    #[serde(default = "default_true")]
    pub realtime: bool,
    #[serde(default = "default_reconnect_interval", alias = "reconnectinterval")]
    pub reconnect_interval: u64,
    #[serde(default = "default_engine_io_version", alias = "engineioversion")]
    pub engine_io_version: u8,
}

impl Default for SmartboxSection {
    fn default() -> Self {
        Self {
            username: String::new(),
            password: None,
            api_name: default_api_name(),
            polling_interval: default_polling_interval(),
            base_url: None,
            ca_cert: None,
            request_timeout: default_request_timeout(),
            units: default_units(),
            realtime: true,
            reconnect_interval: default_reconnect_interval(),
            engine_io_version: default_engine_io_version(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MqttSection {
    #[serde(default)]
    pub host: String,
    #[serde(default = "default_mqtt_port")]
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<SecretString>,
    #[serde(default = "default_base_topic", alias = "basetopic")]
    pub base_topic: String,
    #[serde(alias = "clientid")]
    pub client_id: Option<String>,
    /// Seconds.
    #[serde(default = "default_keep_alive", alias = "keepalive")]
    pub keep_alive: u64,
}

impl Default for MqttSection {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: default_mqtt_port(),
            username: None,
            password: None,
            base_topic: default_base_topic(),
            client_id: None,
            keep_alive: default_keep_alive(),
        }
    }
}

fn default_api_name() -> String {
    "api".into()
}
fn default_polling_interval() -> u64 {
    60_000
}
fn default_request_timeout() -> u64 {
    30_000
}
fn default_units() -> String {
    "C".into()
}
fn default_true() -> bool {
    true
}
fn default_reconnect_interval() -> u64 {
    600_000
}
fn default_engine_io_version() -> u8 {
    3
}
fn default_mqtt_port() -> u16 {
    1883
}
fn default_base_topic() -> String {
    "heater".into()
}
fn default_keep_alive() -> u64 {
    30
}

// ── Paths ───────────────────────────────────────────────────────────

/// Canonical config file: `{config_dir}/smartbox2mqtt/config.json`.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("", "", APP_NAME).map_or_else(
        || {
            let mut p = home_fallback();
            p.push(".config");
            p.push(APP_NAME);
            p.push(CONFIG_FILE);
            p
        },
        |dirs| dirs.config_dir().join(CONFIG_FILE),
    )
}

/// The pre-XDG dotfile in the home directory.
pub fn legacy_config_path() -> PathBuf {
    BaseDirs::new().map_or_else(
        || home_fallback().join(LEGACY_FILE),
        |dirs| dirs.home_dir().join(LEGACY_FILE),
    )
}

fn home_fallback() -> PathBuf {
    PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()))
}

// ── Discovery ───────────────────────────────────────────────────────

/// Where the config came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Discovered {
    pub path: PathBuf,
    /// Set when the legacy dotfile was copied into place.
    pub migrated_from: Option<PathBuf>,
}

/// Locate the config file.
///
/// An explicit path is used as-is. Otherwise `canonical` is used when it
/// exists; failing that, `legacy` is copied to `canonical` first. The
/// legacy file itself is left in place.
pub fn discover(
    explicit: Option<&Path>,
    canonical: &Path,
    legacy: &Path,
) -> Result<Discovered, ConfigError> {
    if let Some(path) = explicit {
        if !path.is_file() {
            return Err(ConfigError::NotFound {
                path: path.to_owned(),
            });
        }
        return Ok(Discovered {
            path: path.to_owned(),
            migrated_from: None,
        });
    }

    if canonical.is_file() {
        return Ok(Discovered {
            path: canonical.to_owned(),
            migrated_from: None,
        });
    }

    if legacy.is_file() {
        migrate(legacy, canonical)?;
        tracing::warn!(
            from = %legacy.display(),
            to = %canonical.display(),
            "config migrated; the old file can be removed"
        );
        return Ok(Discovered {
            path: canonical.to_owned(),
            migrated_from: Some(legacy.to_owned()),
        });
    }

    Err(ConfigError::NotFound {
        path: canonical.to_owned(),
    })
}

fn migrate(from: &Path, to: &Path) -> Result<(), ConfigError> {
    let wrap = |source| ConfigError::Migration {
        from: from.to_owned(),
        to: to.to_owned(),
        source,
    };
    if let Some(parent) = to.parent() {
        std::fs::create_dir_all(parent).map_err(wrap)?;
    }
    std::fs::copy(from, to).map_err(wrap)?;
    Ok(())
}

// ── Loading ─────────────────────────────────────────────────────────

/// Parse `path` and layer environment overrides on top.
pub fn load_file(path: &Path) -> Result<FileConfig, ConfigError> {
    let figment = Figment::new()
        .merge(Json::file(path))
        .merge(Env::prefixed(ENV_PREFIX).split("__"));
    Ok(figment.extract()?)
}

/// A validated configuration and where it was read from.
#[derive(Debug)]
pub struct Loaded {
    pub source: Discovered,
    pub config: BridgeConfig,
}

/// Discover, load, and validate using the platform paths.
pub fn load(explicit: Option<&Path>) -> Result<Loaded, ConfigError> {
    let source = discover(explicit, &config_path(), &legacy_config_path())?;
    let config = load_file(&source.path)?.into_bridge_config()?;
    Ok(Loaded { source, config })
}

// ── Validation ──────────────────────────────────────────────────────

impl FileConfig {
    /// Validate and resolve into the runtime configuration.
    pub fn into_bridge_config(self) -> Result<BridgeConfig, ConfigError> {
        Ok(BridgeConfig {
            smartbox: self.smartbox.into_settings()?,
            mqtt: self.mqtt.into_settings()?,
        })
    }
}

impl SmartboxSection {
    fn into_settings(self) -> Result<SmartboxSettings, ConfigError> {
        require("smartbox.username", &self.username)?;
        let password = self
            .password
            .filter(|p| !p.expose_secret().is_empty())
            .ok_or_else(|| missing("smartbox.password"))?;
        require("smartbox.apiName", &self.api_name)?;

        let base_url = self
            .base_url
            .map(|raw| {
                Url::parse(&raw).map_err(|e| ConfigError::Validation {
                    field: "smartbox.baseUrl",
                    reason: format!("invalid URL {raw:?}: {e}"),
                })
            })
            .transpose()?;

        Ok(SmartboxSettings {
            username: self.username,
            password,
            reseller: Reseller::from_api_name(&self.api_name),
            base_url,
            ca_cert: self.ca_cert,
            request_timeout: positive_millis("smartbox.requestTimeout", self.request_timeout)?,
            polling_interval: positive_millis("smartbox.pollingInterval", self.polling_interval)?,
            units: self.units,
            realtime: self.realtime,
            reconnect_interval: positive_millis(
                "smartbox.reconnectInterval",
                self.reconnect_interval,
            )?,
            engine_io_version: match self.engine_io_version {
                v @ (3 | 4) => v,
                other => {
                    return Err(ConfigError::Validation {
                        field: "smartbox.engineIoVersion",
                        reason: format!("expected 3 or 4, got {other}"),
                    });
                }
            },
            realtime_url: None,
        })
    }
}

impl MqttSection {
    fn into_settings(self) -> Result<MqttSettings, ConfigError> {
        require("mqtt.host", &self.host)?;
        require("mqtt.baseTopic", &self.base_topic)?;
        if self.base_topic.contains(['+', '#']) {
            return Err(ConfigError::Validation {
                field: "mqtt.baseTopic",
                reason: "must not contain MQTT wildcards".into(),
            });
        }
        if self.keep_alive == 0 {
            return Err(ConfigError::Validation {
                field: "mqtt.keepAlive",
                reason: "must be greater than zero".into(),
            });
        }

        Ok(MqttSettings {
            host: self.host,
            port: self.port,
            username: self.username,
            password: self.password,
            client_id: self
                .client_id
                .filter(|id| !id.is_empty())
                .unwrap_or_else(generate_client_id),
            base_topic: self.base_topic.trim_end_matches('/').to_owned(),
            keep_alive: Duration::from_secs(self.keep_alive),
        })
    }
}

/// `smartbox2mqtt-` plus six random hex digits.
pub fn generate_client_id() -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    format!("{APP_NAME}-{}", &id[..6])
}

fn require(field: &'static str, value: &str) -> Result<(), ConfigError> {
    if value.trim().is_empty() {
        return Err(missing(field));
    }
    Ok(())
}

fn missing(field: &'static str) -> ConfigError {
    ConfigError::Validation {
        field,
        reason: "must be set".into(),
    }
}

fn positive_millis(field: &'static str, millis: u64) -> Result<Duration, ConfigError> {
    if millis == 0 {
        return Err(ConfigError::Validation {
            field,
            reason: "must be greater than zero".into(),
        });
    }
    Ok(Duration::from_millis(millis))
}
