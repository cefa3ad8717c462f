use thiserror::Error;

/// Top-level error type for the `smartbox-api` crate.
///
/// Covers every failure mode across the vendor surfaces: token grants,
/// REST transport, response decoding, and the realtime push channel.
/// `smartbox-core` maps these into the bridge's error taxonomy.
#[derive(Debug, Error)]
pub enum Error {
    // ── Authentication ──────────────────────────────────────────────
    /// Password grant rejected or the token endpoint was unreachable.
    #[error("Authentication failed: {message}")]
    Authentication { message: String },

    /// Refresh-token grant rejected. Recoverable by a full password grant.
    #[error("Token refresh failed: {message}")]
    TokenRefresh { message: String },

    // ── Transport ───────────────────────────────────────────────────
    /// HTTP transport error (connection refused, DNS failure, timeout).
    #[error("HTTP transport error on {path}: {source}")]
    Transport {
        path: String,
        #[source]
        source: reqwest::Error,
    },

    /// Non-success HTTP status from a resource endpoint.
    #[error("HTTP {status} on {path}: {body}")]
    Http {
        path: String,
        status: u16,
        body: String,
    },

    /// URL parsing error.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// Failed to construct the HTTP client.
    #[error("TLS error: {0}")]
    Tls(String),

    // ── Data ────────────────────────────────────────────────────────
    /// JSON deserialization failed, with the raw body for debugging.
    #[error("Deserialization error on {path}: {message}")]
    Deserialization {
        path: String,
        message: String,
        body: String,
    },

    // ── Realtime ────────────────────────────────────────────────────
    /// WebSocket / Socket.IO handshake failed.
    #[error("Realtime connection failed: {0}")]
    RealtimeConnect(String),

    /// Push channel closed by the server or the transport.
    #[error("Realtime channel closed: {reason}")]
    RealtimeClosed { reason: String },

    /// Malformed Engine.IO / Socket.IO frame.
    #[error("Realtime protocol error: {0}")]
    RealtimeProtocol(String),
}

impl Error {
    /// Returns `true` if this error came out of a token grant.
    pub fn is_auth(&self) -> bool {
        matches!(self, Self::Authentication { .. } | Self::TokenRefresh { .. })
    }

    /// Returns `true` if this is a transient error the next poll or
    /// command attempt may clear.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport { source, .. } => source.is_timeout() || source.is_connect(),
            Self::Http { status, .. } => *status >= 500,
            Self::RealtimeConnect(_) | Self::RealtimeClosed { .. } => true,
            _ => false,
        }
    }

    /// The API path the failed request targeted, if any.
    pub fn path(&self) -> Option<&str> {
        match self {
            Self::Transport { path, .. }
            | Self::Http { path, .. }
            | Self::Deserialization { path, .. } => Some(path),
            _ => None,
        }
    }
}

/// First 200 characters of a response body, for error messages.
pub(crate) fn preview(body: &str) -> &str {
    body.char_indices().nth(200).map_or(body, |(i, _)| &body[..i])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_errors_are_classified() {
        let err = Error::TokenRefresh {
            message: "invalid_grant".into(),
        };
        assert!(err.is_auth());
        assert!(!err.is_transient());
    }

    #[test]
    fn server_errors_are_transient() {
        let err = Error::Http {
            path: "devs".into(),
            status: 502,
            body: String::new(),
        };
        assert!(err.is_transient());
        assert_eq!(err.path(), Some("devs"));

        let err = Error::Http {
            path: "devs".into(),
            status: 404,
            body: String::new(),
        };
        assert!(!err.is_transient());
    }

    #[test]
    fn closed_realtime_channel_is_transient() {
        let err = Error::RealtimeClosed {
            reason: "stream ended".into(),
        };
        assert!(err.is_transient());
        assert_eq!(err.to_string(), "Realtime channel closed: stream ended");
    }
}
