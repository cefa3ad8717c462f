//! CLI error types with miette diagnostics.
//!
//! Maps `CoreError` and `ConfigError` into user-facing errors with help
//! text and a process exit code.

use miette::Diagnostic;
use thiserror::Error;

use smartbox_config::ConfigError;
use smartbox_core::CoreError;

pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const AUTH: i32 = 3;
    pub const CONNECTION: i32 = 7;
    /// `EX_CONFIG` from sysexits.h.
    pub const CONFIG: i32 = 78;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Configuration ────────────────────────────────────────────────
    #[error("Configuration file not found")]
    #[diagnostic(
        code(smartbox2mqtt::no_config),
        help(
            "Create one at: {path}\n\
             It needs at least smartbox.username, smartbox.password and mqtt.host."
        )
    )]
    NoConfig { path: String },

    #[error("Invalid value for {field}: {reason}")]
    #[diagnostic(code(smartbox2mqtt::invalid_config))]
    InvalidConfig { field: String, reason: String },

    #[error("Could not load configuration: {message}")]
    #[diagnostic(
        code(smartbox2mqtt::config),
        help("Check that the file is valid JSON. Print its location with --print-config-path.")
    )]
    ConfigLoad { message: String },

    // ── Authentication ───────────────────────────────────────────────
    #[error("Smartbox authentication failed: {message}")]
    #[diagnostic(
        code(smartbox2mqtt::auth_failed),
        help("Verify smartbox.username, smartbox.password and smartbox.apiName.")
    )]
    AuthFailed { message: String },

    // ── Connection ───────────────────────────────────────────────────
    #[error("Smartbox API request to {path} failed: {message}")]
    #[diagnostic(code(smartbox2mqtt::api_unavailable))]
    ApiUnavailable { path: String, message: String },

    #[error("MQTT broker unavailable: {message}")]
    #[diagnostic(
        code(smartbox2mqtt::broker_unavailable),
        help("Check mqtt.host, mqtt.port and the broker credentials.")
    )]
    BrokerUnavailable { message: String },

    // ── Startup ──────────────────────────────────────────────────────
    #[error("{0}")]
    #[diagnostic(
        code(smartbox2mqtt::nothing_to_bridge),
        help("The account has no heater nodes to bridge. Check the devices in the vendor app.")
    )]
    NothingToBridge(String),

    #[error(transparent)]
    #[diagnostic(code(smartbox2mqtt::core))]
    Core(CoreError),
}

impl CliError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::NoConfig { .. } | Self::InvalidConfig { .. } | Self::ConfigLoad { .. } => {
                exit_code::CONFIG
            }
            Self::AuthFailed { .. } => exit_code::AUTH,
            Self::ApiUnavailable { .. } | Self::BrokerUnavailable { .. } => exit_code::CONNECTION,
            Self::NothingToBridge(_) | Self::Core(_) => exit_code::GENERAL,
        }
    }
}

// ── Conversions ──────────────────────────────────────────────────────

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::Authentication { message } | CoreError::TokenRefresh { message } => {
                Self::AuthFailed { message }
            }
            CoreError::Transport { path, message, .. } => Self::ApiUnavailable { path, message },
            CoreError::Mqtt { message } => Self::BrokerUnavailable { message },
            CoreError::Config { message } => Self::ConfigLoad { message },
            e @ (CoreError::NoDevices | CoreError::NoHeaterNodes) => {
                Self::NothingToBridge(e.to_string())
            }
            other => Self::Core(other),
        }
    }
}

impl From<ConfigError> for CliError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::NotFound { path } => Self::NoConfig {
                path: path.display().to_string(),
            },
            ConfigError::Validation { field, reason } => Self::InvalidConfig {
                field: field.to_owned(),
                reason,
            },
            other => Self::ConfigLoad {
                message: other.to_string(),
            },
        }
    }
}
