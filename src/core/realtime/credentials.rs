//! Credential Provider collaborator.
//!
//! The bridge never issues tokens itself. Before every `connect()` it asks a
//! [`CredentialProvider`] for a short-lived realtime token and presents it to
//! the signaling endpoint.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use super::base::{BridgeError, BridgeResult};

/// Short-lived bearer token for the realtime transport.
#[derive(Clone)]
pub struct EphemeralToken {
    secret: String,
    expires_at: Option<i64>,
}

impl EphemeralToken {
    pub fn new(secret: impl Into<String>, expires_at: Option<i64>) -> Self {
        Self {
            secret: secret.into(),
            expires_at,
        }
    }

    /// The raw token. Never log this.
    pub fn secret(&self) -> &str {
        &self.secret
    }

    /// Expiry as unix seconds, when the issuer reported one.
    pub fn expires_at(&self) -> Option<i64> {
        self.expires_at
    }
}

impl fmt::Debug for EphemeralToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EphemeralToken")
            .field("secret", &"[REDACTED]")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

impl Drop for EphemeralToken {
    fn drop(&mut self) {
        use zeroize::Zeroize;
        self.secret.zeroize();
    }
}

/// Supplies a fresh realtime credential, once per connection attempt.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn fetch_token(&self) -> BridgeResult<EphemeralToken>;
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TokenResponse {
    token: String,
    #[serde(default)]
    expires_at: Option<i64>,
}

/// Fetches tokens with a GET against the application's token route.
///
/// Expects `200` with `{ "token": string, "expiresAt"?: number }`.
pub struct HttpCredentialProvider {
    url: String,
    timeout: Duration,
    client: reqwest::Client,
}

impl HttpCredentialProvider {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            timeout: Duration::from_secs(10),
            client: reqwest::Client::new(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }
}

#[async_trait]
impl CredentialProvider for HttpCredentialProvider {
    async fn fetch_token(&self) -> BridgeResult<EphemeralToken> {
        debug!(url = %self.url, "Requesting realtime token");

        let response = self
            .client
            .get(&self.url)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| BridgeError::Credential(format!("token request failed: {e}")))?;

        let status = response.status();
        if status != reqwest::StatusCode::OK {
            return Err(BridgeError::Credential(format!(
                "Failed to get Realtime token: HTTP {status}"
            )));
        }

        let mut body: TokenResponse = response
            .json()
            .await
            .map_err(|e| BridgeError::Credential(format!("invalid token response: {e}")))?;

        if body.token.trim().is_empty() {
            return Err(BridgeError::Credential("token response was empty".to_string()));
        }

        Ok(EphemeralToken::new(std::mem::take(&mut body.token), body.expires_at))
    }
}
