//! OAuth bearer token cache for providers using client credentials.

use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use reqwest::Client as HttpClient;
use serde::Deserialize;

use crate::clock::Clock;
use crate::error::SyncError;

/// A token is treated as expired this many seconds before `expires_at`.
pub const EXPIRY_MARGIN_SECS: i64 = 60;

#[derive(Debug, Clone)]
pub struct ProviderToken {
    pub value: String,
    pub expires_at: DateTime<Utc>,
}

impl ProviderToken {
    fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        self.expires_at - Duration::seconds(EXPIRY_MARGIN_SECS) > now
    }
}

#[derive(Debug, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub expires_in: i64,
}

/// Performs one token exchange against the provider.
#[async_trait]
pub trait TokenExchange: Send + Sync {
    async fn exchange(&self) -> Result<TokenResponse, SyncError>;
}

/// `grant_type=client_credentials` exchange over HTTP.
pub struct ClientCredentials {
    http_client: HttpClient,
    token_url: String,
    client_id: String,
    client_secret: String,
}

impl ClientCredentials {
    pub fn new(
        http_client: HttpClient,
        token_url: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
    ) -> Self {
        Self {
            http_client,
            token_url: token_url.into(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
        }
    }
}

#[async_trait]
impl TokenExchange for ClientCredentials {
    async fn exchange(&self) -> Result<TokenResponse, SyncError> {
        let params = [
            ("grant_type", "client_credentials"),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
        ];

        let response = self
            .http_client
            .post(&self.token_url)
            .form(&params)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(SyncError::Provider {
                status: status.as_u16(),
                body,
            });
        }

        serde_json::from_str(&body).map_err(|e| SyncError::decode("token", e))
    }
}

/// Process-wide token holder. Refresh is demand-driven: a stale or missing
/// token triggers one exchange on the calling task. Concurrent callers may
/// both exchange; the last write wins.
pub struct TokenCache {
    exchange: Box<dyn TokenExchange>,
    clock: Arc<dyn Clock>,
    cached: RwLock<Option<ProviderToken>>,
}

impl TokenCache {
    pub fn new(exchange: Box<dyn TokenExchange>, clock: Arc<dyn Clock>) -> Self {
        Self {
            exchange,
            clock,
            cached: RwLock::new(None),
        }
    }

    pub async fn get_token(&self) -> Result<String, SyncError> {
        if let Some(value) = self.fresh_token() {
            return Ok(value);
        }

        tracing::debug!("Provider token missing or near expiry, exchanging credentials");
        let response = self.exchange.exchange().await?;
        let token = ProviderToken {
            value: response.access_token,
            expires_at: self.clock.now() + Duration::seconds(response.expires_in),
        };

        if !token.is_fresh(self.clock.now()) {
            return Err(SyncError::Provider {
                status: 200,
                body: format!(
                    "token lifetime of {}s is shorter than the {}s refresh margin",
                    response.expires_in, EXPIRY_MARGIN_SECS
                ),
            });
        }

        let value = token.value.clone();
        *self.cached.write().unwrap_or_else(|p| p.into_inner()) = Some(token);
        Ok(value)
    }

    fn fresh_token(&self) -> Option<String> {
        let now = self.clock.now();
        let guard = self.cached.read().unwrap_or_else(|p| p.into_inner());
        guard
            .as_ref()
            .filter(|t| t.is_fresh(now))
            .map(|t| t.value.clone())
    }
}
