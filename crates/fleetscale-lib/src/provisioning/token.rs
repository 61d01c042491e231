//! OAuth2 client-credentials tokens for the management API

use super::TokenIssuer;
use crate::error::{ScaleError, ScaleResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::debug;
use url::Url;

/// Resource the management API tokens are issued for
pub const MANAGEMENT_RESOURCE: &str = "https://management.azure.com/";

/// A bearer token and its expiry
#[derive(Clone)]
pub struct AccessToken {
    pub value: String,
    pub expires_at: DateTime<Utc>,
}

impl AccessToken {
    pub fn new(value: impl Into<String>, expires_at: DateTime<Utc>) -> Self {
        Self {
            value: value.into(),
            expires_at,
        }
    }

    /// Whether the token is still valid `margin` from `now`
    pub fn is_fresh(&self, now: DateTime<Utc>, margin: Duration) -> bool {
        let margin = chrono::Duration::from_std(margin).unwrap_or_else(|_| chrono::Duration::zero());
        self.expires_at - margin > now
    }
}

impl std::fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessToken")
            .field("value", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// `expires_in` arrives as a number or as a numeric string
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Seconds {
    Number(i64),
    Text(String),
}

impl Seconds {
    fn as_secs(&self) -> Option<i64> {
        match self {
            Seconds::Number(n) => Some(*n),
            Seconds::Text(s) => s.trim().parse().ok(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: Option<Seconds>,
}

/// Acquires a fresh token with the client-credentials grant on every call
pub struct ClientCredentialsIssuer {
    client: Client,
    token_url: Url,
    client_id: String,
    client_secret: String,
    resource: String,
}

impl ClientCredentialsIssuer {
    pub fn new(
        authority: &str,
        tenant: &str,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        timeout: Duration,
    ) -> ScaleResult<Self> {
        let raw = format!("{}/{}/oauth2/token", authority.trim_end_matches('/'), tenant);
        let token_url = Url::parse(&raw).map_err(|e| {
            ScaleError::Configuration(format!("invalid authority endpoint {}: {}", authority, e))
        })?;

        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ScaleError::Authentication(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            token_url,
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            resource: MANAGEMENT_RESOURCE.to_string(),
        })
    }
}

#[async_trait]
impl TokenIssuer for ClientCredentialsIssuer {
    async fn acquire_token(&self) -> ScaleResult<AccessToken> {
        let form = [
            ("grant_type", "client_credentials"),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("resource", self.resource.as_str()),
        ];

        let response = self
            .client
            .post(self.token_url.clone())
            .form(&form)
            .send()
            .await
            .map_err(|e| ScaleError::Authentication(format!("token request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ScaleError::Authentication(format!(
                "token endpoint returned {}: {}",
                status, body
            )));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| ScaleError::Authentication(format!("malformed token response: {}", e)))?;

        let lifetime = token.expires_in.and_then(|s| s.as_secs()).unwrap_or(0);
        debug!(expires_in_secs = lifetime, "Acquired management token");

        Ok(AccessToken::new(
            token.access_token,
            Utc::now() + chrono::Duration::seconds(lifetime),
        ))
    }
}

/// Reuses a token until shortly before it expires
pub struct CachingTokenIssuer {
    inner: Arc<dyn TokenIssuer>,
    margin: Duration,
    cached: Mutex<Option<AccessToken>>,
}

impl CachingTokenIssuer {
    pub fn new(inner: Arc<dyn TokenIssuer>) -> Self {
        Self::with_margin(inner, Duration::from_secs(60))
    }

    pub fn with_margin(inner: Arc<dyn TokenIssuer>, margin: Duration) -> Self {
        Self {
            inner,
            margin,
            cached: Mutex::new(None),
        }
    }
}

#[async_trait]
impl TokenIssuer for CachingTokenIssuer {
    async fn acquire_token(&self) -> ScaleResult<AccessToken> {
        let mut cached = self.cached.lock().await;
        if let Some(token) = cached.as_ref() {
            if token.is_fresh(Utc::now(), self.margin) {
                return Ok(token.clone());
            }
        }

        let token = self.inner.acquire_token().await?;
        *cached = Some(token.clone());
        Ok(token)
    }
}
