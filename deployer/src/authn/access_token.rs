//! Access tokens for calling Google APIs

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use secrecy::SecretString;
use serde::Deserialize;
use tokio::sync::RwLock;
use tracing::{debug, error, info};

use crate::errors::DeployerError;

/// Source of bearer tokens for outbound API calls
#[async_trait]
pub trait AccessTokenProvider: Send + Sync {
    /// Get a token valid for at least the next request
    async fn access_token(&self) -> Result<SecretString, DeployerError>;
}

/// A fixed token, for local runs and emulators
pub struct StaticTokenProvider {
    token: SecretString,
}

impl StaticTokenProvider {
    pub fn new(token: SecretString) -> Self {
        Self { token }
    }
}

#[async_trait]
impl AccessTokenProvider for StaticTokenProvider {
    async fn access_token(&self) -> Result<SecretString, DeployerError> {
        Ok(self.token.clone())
    }
}

#[derive(Debug, Deserialize)]
struct MetadataTokenResponse {
    access_token: String,
    expires_in: i64,
}

#[derive(Debug, Clone)]
struct CachedToken {
    token: SecretString,
    expires_at: DateTime<Utc>,
}

/// Tokens are refreshed this long before they expire
const REFRESH_MARGIN_SECS: i64 = 60;

/// Service-account tokens from the instance metadata server
pub struct MetadataTokenProvider {
    client: reqwest::Client,
    base_url: String,
    cached_token: RwLock<Option<CachedToken>>,
}

impl MetadataTokenProvider {
    pub fn new(base_url: &str) -> Result<Self, DeployerError> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            cached_token: RwLock::new(None),
        })
    }

    async fn fetch_token(&self) -> Result<CachedToken, DeployerError> {
        let url = format!(
            "{}/instance/service-accounts/default/token",
            self.base_url
        );
        debug!("GET {} (access token)", url);

        let response = self
            .client
            .get(&url)
            .header("Metadata-Flavor", "Google")
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            error!("Metadata token request failed: {} - {}", status, body);
            return Err(DeployerError::TokenError(format!(
                "Metadata server returned {}",
                status
            )));
        }

        let body: MetadataTokenResponse = response.json().await?;
        let expires_at = Utc::now() + Duration::seconds(body.expires_in);
        info!("Fetched access token, expires at: {}", expires_at);

        Ok(CachedToken {
            token: SecretString::from(body.access_token),
            expires_at,
        })
    }
}

#[async_trait]
impl AccessTokenProvider for MetadataTokenProvider {
    async fn access_token(&self) -> Result<SecretString, DeployerError> {
        let refresh_before = Utc::now() + Duration::seconds(REFRESH_MARGIN_SECS);

        {
            let cached = self.cached_token.read().await;
            if let Some(token) = cached.as_ref() {
                if token.expires_at > refresh_before {
                    return Ok(token.token.clone());
                }
            }
        }

        let mut cached = self.cached_token.write().await;
        // Another caller may have refreshed while we waited for the lock
        if let Some(token) = cached.as_ref() {
            if token.expires_at > refresh_before {
                return Ok(token.token.clone());
            }
        }

        let fresh = self.fetch_token().await?;
        let token = fresh.token.clone();
        *cached = Some(fresh);
        Ok(token)
    }
}
