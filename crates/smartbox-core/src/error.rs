// ── Core error types ──
//
// The bridge's failure taxonomy. Callers never match on HTTP status codes
// or socket errors directly: `From<smartbox_api::Error>` folds the
// transport-layer variants into the handful of cases the bridge acts on.

use thiserror::Error;

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Authentication ───────────────────────────────────────────────
    /// Bad credentials or unreachable token endpoint. Fatal at startup.
    #[error("Authentication failed: {message}")]
    Authentication { message: String },

    #[error("Token refresh failed: {message}")]
    TokenRefresh { message: String },

    // ── Operations ───────────────────────────────────────────────────
    /// A REST call failed. Only the one operation is affected.
    #[error("Request to {path} failed: {message}")]
    Transport {
        path: String,
        message: String,
        status: Option<u16>,
    },

    #[error("Realtime channel error: {message}")]
    Realtime { message: String },

    /// Malformed command payload, rejected before any API call.
    #[error("Invalid {field} command {payload:?}: {reason}")]
    Validation {
        field: &'static str,
        payload: String,
        reason: String,
    },

    #[error("MQTT error: {message}")]
    Mqtt { message: String },

    // ── Startup ──────────────────────────────────────────────────────
    #[error("No devices registered to this account")]
    NoDevices,

    #[error("No heater nodes found on any device")]
    NoHeaterNodes,

    #[error("Configuration error: {message}")]
    Config { message: String },
}

impl CoreError {
    /// `true` for errors that abort startup.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Authentication { .. } | Self::NoDevices | Self::NoHeaterNodes | Self::Config { .. }
        )
    }
}

// ── Conversion from transport-layer errors ───────────────────────────

impl From<smartbox_api::Error> for CoreError {
    fn from(err: smartbox_api::Error) -> Self {
        use smartbox_api::Error as Api;

        match err {
            Api::Authentication { message } => Self::Authentication { message },
            Api::TokenRefresh { message } => Self::TokenRefresh { message },
            Api::Transport { path, source } => Self::Transport {
                path,
                message: source.to_string(),
                status: None,
            },
            Api::Http { path, status, body } => Self::Transport {
                path,
                message: format!("HTTP {status}: {body}"),
                status: Some(status),
            },
            Api::Deserialization { path, message, .. } => Self::Transport {
                path,
                message: format!("unexpected response body: {message}"),
                status: None,
            },
            Api::InvalidUrl(e) => Self::Config {
                message: format!("invalid API URL: {e}"),
            },
            Api::Tls(message) => Self::Config { message },
            Api::RealtimeConnect(message) | Api::RealtimeProtocol(message) => {
                Self::Realtime { message }
            }
            Api::RealtimeClosed { reason } => Self::Realtime { message: reason },
        }
    }
}

impl From<rumqttc::ClientError> for CoreError {
    fn from(err: rumqttc::ClientError) -> Self {
        Self::Mqtt {
            message: err.to_string(),
        }
    }
}
