// Token lifecycle for the Smartbox API.
//
// The session owns the credentials and the current access/refresh token
// pair. Readers load the token lock-free through `ArcSwapOption`; renewals
// are serialized behind a single async mutex so concurrent callers that
// find the token stale wait for one grant instead of issuing their own.
// Each finished renewal bumps a generation counter and records its failure,
// so callers that queued behind a failed renewal share its error.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use arc_swap::ArcSwapOption;
use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use url::Url;

use crate::error::{Error, preview};
use crate::reseller::Reseller;

/// Minimum remaining validity before a token is renewed.
pub const REFRESH_MARGIN: Duration = Duration::from_secs(60);

const TOKEN_PATH: &str = "client/token";

// ── AuthToken ───────────────────────────────────────────────────────

/// An access/refresh token pair with its expiry instant.
///
/// Immutable: every grant produces a new token that replaces the old one
/// wholesale.
#[derive(Debug)]
pub struct AuthToken {
    access_token: SecretString,
    refresh_token: SecretString,
    expires_at: DateTime<Utc>,
}

impl AuthToken {
    pub fn new(
        access_token: SecretString,
        refresh_token: SecretString,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            access_token,
            refresh_token,
            expires_at,
        }
    }

    pub fn access_token(&self) -> &SecretString {
        &self.access_token
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    /// `true` if the token expires within `margin` of `now`.
    pub fn expires_within(&self, margin: Duration, now: DateTime<Utc>) -> bool {
        let margin = chrono::Duration::from_std(margin).unwrap_or(chrono::Duration::MAX);
        self.expires_at - now < margin
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: String,
    expires_in: i64,
}

impl TokenResponse {
    /// `None` if `expires_in` does not fit a timestamp.
    fn into_token(self, now: DateTime<Utc>) -> Option<AuthToken> {
        let expires_at = chrono::Duration::try_seconds(self.expires_in)
            .and_then(|ttl| now.checked_add_signed(ttl))?;
        Some(AuthToken {
            access_token: SecretString::from(self.access_token),
            refresh_token: SecretString::from(self.refresh_token),
            expires_at,
        })
    }
}

/// Which grant a token request performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Grant {
    Password,
    Refresh,
}

/// Outcome of the last finished renewal, guarded by the renewal lock.
#[derive(Default)]
struct Renewal {
    /// Grant error of the last renewal, kept so queued callers can share it.
    failure: Option<(Grant, String)>,
}

impl Renewal {
    fn shared_error(&self) -> Option<Error> {
        self.failure.as_ref().map(|(grant, message)| match grant {
            Grant::Password => Error::Authentication {
                message: message.clone(),
            },
            Grant::Refresh => Error::TokenRefresh {
                message: message.clone(),
            },
        })
    }
}

// ── AuthSession ─────────────────────────────────────────────────────

/// Owns the account credentials and the current [`AuthToken`].
pub struct AuthSession {
    http: reqwest::Client,
    base_url: Url,
    reseller: Reseller,
    username: String,
    password: SecretString,
    token: ArcSwapOption<AuthToken>,
    renewal: Mutex<Renewal>,
    /// Number of finished renewals. Only written under `renewal`.
    generation: AtomicU64,
}

impl AuthSession {
    /// Create a session against `base_url` (the reseller host, or a test
    /// server). No network traffic until the first grant.
    pub fn new(
        http: reqwest::Client,
        base_url: Url,
        reseller: Reseller,
        username: impl Into<String>,
        password: SecretString,
    ) -> Self {
        Self {
            http,
            base_url,
            reseller,
            username: username.into(),
            password,
            token: ArcSwapOption::empty(),
            renewal: Mutex::new(Renewal::default()),
            generation: AtomicU64::new(0),
        }
    }

    /// The API host this session authenticates against.
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }

    /// The token currently held, if any. May be stale.
    pub fn current_token(&self) -> Option<Arc<AuthToken>> {
        self.token.load_full()
    }

    /// Exchange username/password for a fresh token pair.
    pub async fn authenticate(&self) -> Result<Arc<AuthToken>, Error> {
        let mut renewal = self.renewal.lock().await;
        let result = self.grant(Grant::Password).await;
        self.finish(&mut renewal, Grant::Password, result)
    }

    /// Exchange the stored refresh token for a fresh token pair.
    ///
    /// Does not fall back to a password grant; [`ensure_valid`](Self::ensure_valid)
    /// owns that recovery path.
    pub async fn refresh(&self) -> Result<Arc<AuthToken>, Error> {
        let mut renewal = self.renewal.lock().await;
        let result = self.grant(Grant::Refresh).await;
        self.finish(&mut renewal, Grant::Refresh, result)
    }

    /// Return a token with at least [`REFRESH_MARGIN`] of validity left,
    /// renewing it first if necessary.
    ///
    /// Renewal is single-flight: concurrent callers queue on the renewal
    /// lock and re-check once they hold it, so only the first one hits the
    /// token endpoint. If that renewal failed, the callers queued behind it
    /// return its error instead of granting again.
    pub async fn ensure_valid(&self) -> Result<Arc<AuthToken>, Error> {
        if let Some(token) = self.usable_token() {
            return Ok(token);
        }

        let observed = self.generation.load(Ordering::Acquire);
        let mut renewal = self.renewal.lock().await;

        // Another caller may have renewed while we waited.
        if let Some(token) = self.usable_token() {
            return Ok(token);
        }
        if self.generation.load(Ordering::Acquire) != observed {
            if let Some(err) = renewal.shared_error() {
                debug!(error = %err, "sharing outcome of concurrent renewal");
                return Err(err);
            }
        }

        if self.token.load().is_none() {
            let result = self.grant(Grant::Password).await;
            return self.finish(&mut renewal, Grant::Password, result);
        }

        match self.grant(Grant::Refresh).await {
            Ok(token) => self.finish(&mut renewal, Grant::Refresh, Ok(token)),
            Err(e) => {
                warn!(error = %e, "token refresh failed, falling back to password grant");
                let result = self.grant(Grant::Password).await;
                self.finish(&mut renewal, Grant::Password, result)
            }
        }
    }

    /// Record the outcome of a renewal and publish a new generation.
    fn finish(
        &self,
        renewal: &mut Renewal,
        grant: Grant,
        result: Result<Arc<AuthToken>, Error>,
    ) -> Result<Arc<AuthToken>, Error> {
        renewal.failure = match &result {
            Ok(_) => None,
            Err(Error::Authentication { message } | Error::TokenRefresh { message }) => {
                Some((grant, message.clone()))
            }
            Err(other) => Some((grant, other.to_string())),
        };
        self.generation.fetch_add(1, Ordering::Release);
        result
    }

    fn usable_token(&self) -> Option<Arc<AuthToken>> {
        self.token
            .load_full()
            .filter(|t| !t.expires_within(REFRESH_MARGIN, Utc::now()))
    }

    /// Perform one grant and store the result. Caller must hold `renewal`.
    async fn grant(&self, grant: Grant) -> Result<Arc<AuthToken>, Error> {
        let url = self.base_url.join(TOKEN_PATH).map_err(Error::InvalidUrl)?;

        let fail = |message: String| match grant {
            Grant::Password => Error::Authentication { message },
            Grant::Refresh => Error::TokenRefresh { message },
        };

        let form: Vec<(&str, String)> = match grant {
            Grant::Password => vec![
                ("grant_type", "password".into()),
                ("username", self.username.clone()),
                ("password", self.password.expose_secret().to_owned()),
            ],
            Grant::Refresh => {
                let current = self
                    .token
                    .load_full()
                    .ok_or_else(|| fail("no refresh token held".into()))?;
                vec![
                    ("grant_type", "refresh_token".into()),
                    ("refresh_token", current.refresh_token.expose_secret().to_owned()),
                ]
            }
        };

        debug!(?grant, "requesting token at {}", url);

        let resp = self
            .http
            .post(url)
            .header(
                reqwest::header::AUTHORIZATION,
                format!("Basic {}", self.reseller.basic_auth()),
            )
            .form(&form)
            .send()
            .await
            .map_err(|e| fail(format!("token endpoint unreachable: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(fail(format!("HTTP {status}: {}", preview(&body))));
        }

        let body: TokenResponse = resp
            .json()
            .await
            .map_err(|e| fail(format!("malformed token response: {e}")))?;

        let expires_in = body.expires_in;
        let token = body
            .into_token(Utc::now())
            .map(Arc::new)
            .ok_or_else(|| fail(format!("token expiry out of range: expires_in={expires_in}")))?;
        self.token.store(Some(Arc::clone(&token)));

        match grant {
            Grant::Password => info!(expires_at = %token.expires_at, "authenticated"),
            Grant::Refresh => debug!(expires_at = %token.expires_at, "token refreshed"),
        }
        Ok(token)
    }
}

impl std::fmt::Debug for AuthSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthSession")
            .field("base_url", &self.base_url.as_str())
            .field("reseller", &self.reseller.api_name())
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token_expiring_in(secs: i64, now: DateTime<Utc>) -> AuthToken {
        AuthToken::new(
            SecretString::from("a".to_owned()),
            SecretString::from("r".to_owned()),
            now + chrono::Duration::seconds(secs),
        )
    }

    #[test]
    fn token_inside_margin_is_stale() {
        let now = Utc::now();
        assert!(token_expiring_in(59, now).expires_within(REFRESH_MARGIN, now));
        assert!(token_expiring_in(-5, now).expires_within(REFRESH_MARGIN, now));
    }

    #[test]
    fn out_of_range_expiry_is_rejected() {
        let response = TokenResponse {
            access_token: "a".into(),
            refresh_token: "r".into(),
            expires_in: i64::MAX,
        };
        assert!(response.into_token(Utc::now()).is_none());

        let response = TokenResponse {
            access_token: "a".into(),
            refresh_token: "r".into(),
            expires_in: 3600,
        };
        assert!(response.into_token(Utc::now()).is_some());
    }

    #[test]
    fn token_outside_margin_is_usable() {
        let now = Utc::now();
        assert!(!token_expiring_in(60, now).expires_within(REFRESH_MARGIN, now));
        assert!(!token_expiring_in(3600, now).expires_within(REFRESH_MARGIN, now));
    }
}
