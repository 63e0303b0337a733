//! Azure Authentication
//!
//! Acquires OAuth2 bearer tokens for Resource Manager using the
//! client-credentials grant of the environment's Active Directory authority,
//! and caches them until shortly before they expire.

use super::environment::Environment;
use crate::error::{ArmError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

/// Token expiry buffer - refresh tokens this much before they actually expire
/// This prevents using tokens that are about to expire during a request
const TOKEN_EXPIRY_BUFFER: Duration = Duration::from_secs(60);

/// Default token TTL if the authority doesn't report one (conservative: 30 minutes)
const DEFAULT_TOKEN_TTL: Duration = Duration::from_secs(30 * 60);

/// A bearer token as handed out by a [`TokenProvider`]
#[derive(Debug, Clone)]
pub struct AccessToken {
    pub token: String,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Source of fresh access tokens
#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn fetch_token(&self) -> Result<AccessToken>;
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

/// Service principal authenticating with a client secret
pub struct ClientSecretProvider {
    http: reqwest::Client,
    token_url: String,
    client_id: String,
    client_secret: String,
    scope: String,
}

impl ClientSecretProvider {
    pub fn new(
        environment: Environment,
        tenant_id: &str,
        client_id: &str,
        client_secret: &str,
    ) -> Result<Self> {
        Self::with_authority(
            environment.active_directory_endpoint(),
            &environment.token_scope(),
            tenant_id,
            client_id,
            client_secret,
        )
    }

    /// Use an explicit authority host (tests point this at a mock server)
    pub fn with_authority(
        authority: &str,
        scope: &str,
        tenant_id: &str,
        client_id: &str,
        client_secret: &str,
    ) -> Result<Self> {
        if tenant_id.is_empty() || client_id.is_empty() || client_secret.is_empty() {
            return Err(ArmError::Auth(
                "tenant_id, client_id and client_secret are all required".to_string(),
            ));
        }

        let http = reqwest::Client::builder()
            .user_agent(super::USER_AGENT)
            .build()
            .map_err(|e| ArmError::Auth(format!("failed to create HTTP client: {e}")))?;

        Ok(Self {
            http,
            token_url: token_url(authority, tenant_id),
            client_id: client_id.to_string(),
            client_secret: client_secret.to_string(),
            scope: scope.to_string(),
        })
    }
}

#[async_trait]
impl TokenProvider for ClientSecretProvider {
    async fn fetch_token(&self) -> Result<AccessToken> {
        tracing::debug!("Requesting access token from {}", self.token_url);

        let form = [
            ("grant_type", "client_credentials"),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("scope", self.scope.as_str()),
        ];

        let response = self
            .http
            .post(&self.token_url)
            .form(&form)
            .send()
            .await
            .map_err(|e| ArmError::Auth(format!("token request failed: {e}")))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ArmError::Auth(format!("failed to read token response: {e}")))?;

        if !status.is_success() {
            // Security: the body can echo request parameters, keep it out of the error
            tracing::error!("Token endpoint returned {}", status);
            return Err(ArmError::Auth(format!(
                "token endpoint returned {status}; check the tenant ID and client credentials"
            )));
        }

        let parsed: TokenResponse = serde_json::from_str(&body)
            .map_err(|e| ArmError::Auth(format!("malformed token response: {e}")))?;

        Ok(AccessToken {
            token: parsed.access_token,
            expires_at: parsed
                .expires_in
                .map(|secs| Utc::now() + chrono::Duration::seconds(secs as i64)),
        })
    }
}

/// A fixed token, e.g. from `ARM_ACCESS_TOKEN` or a test
pub struct StaticTokenProvider {
    token: String,
}

impl StaticTokenProvider {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

#[async_trait]
impl TokenProvider for StaticTokenProvider {
    async fn fetch_token(&self) -> Result<AccessToken> {
        Ok(AccessToken {
            token: self.token.clone(),
            expires_at: None,
        })
    }
}

/// Azure credentials holder with token caching
#[derive(Clone)]
pub struct AzureCredentials {
    provider: Arc<dyn TokenProvider>,
    token_cache: Arc<RwLock<Option<CachedToken>>>,
}

#[derive(Clone)]
struct CachedToken {
    token: String,
    /// When this token expires (with buffer applied)
    expires_at: Instant,
}

impl CachedToken {
    fn is_valid(&self) -> bool {
        Instant::now() < self.expires_at
    }
}

impl AzureCredentials {
    pub fn new(provider: Arc<dyn TokenProvider>) -> Self {
        Self {
            provider,
            token_cache: Arc::new(RwLock::new(None)),
        }
    }

    /// Credentials that always hand out the same token
    pub fn from_static_token(token: impl Into<String>) -> Self {
        Self::new(Arc::new(StaticTokenProvider::new(token)))
    }

    /// Get an access token for API calls
    /// Security: Checks token expiry before returning cached token
    pub async fn get_token(&self) -> Result<String> {
        {
            let cache = self.token_cache.read().await;
            if let Some(cached) = cache.as_ref() {
                if cached.is_valid() {
                    return Ok(cached.token.clone());
                }
                tracing::debug!("Cached token expired, fetching new token");
            }
        }

        let fresh = self.provider.fetch_token().await?;
        let expires_at = cache_deadline(fresh.expires_at);

        {
            let mut cache = self.token_cache.write().await;
            *cache = Some(CachedToken {
                token: fresh.token.clone(),
                expires_at,
            });
        }

        tracing::debug!(
            "New token cached, valid for ~{} minutes",
            expires_at.saturating_duration_since(Instant::now()).as_secs() / 60
        );

        Ok(fresh.token)
    }

    /// Force refresh the token
    pub async fn refresh_token(&self) -> Result<String> {
        {
            let mut cache = self.token_cache.write().await;
            *cache = None;
        }

        self.get_token().await
    }
}

fn token_url(authority: &str, tenant_id: &str) -> String {
    format!(
        "{}/{}/oauth2/v2.0/token",
        authority.trim_end_matches('/'),
        tenant_id
    )
}

/// Convert a wall-clock expiry into the instant the cache stops serving the token
fn cache_deadline(expires_at: Option<DateTime<Utc>>) -> Instant {
    let ttl = match expires_at {
        Some(at) => (at - Utc::now()).to_std().unwrap_or(Duration::ZERO),
        None => DEFAULT_TOKEN_TTL,
    };
    Instant::now() + ttl.saturating_sub(TOKEN_EXPIRY_BUFFER)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingProvider {
        calls: AtomicUsize,
        expires_in: i64,
    }

    #[async_trait]
    impl TokenProvider for CountingProvider {
        async fn fetch_token(&self) -> Result<AccessToken> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(AccessToken {
                token: format!("token-{n}"),
                expires_at: Some(Utc::now() + chrono::Duration::seconds(self.expires_in)),
            })
        }
    }

    #[test]
    fn test_token_url() {
        assert_eq!(
            token_url("https://login.microsoftonline.com/", "tenant-1"),
            "https://login.microsoftonline.com/tenant-1/oauth2/v2.0/token"
        );
    }

    #[tokio::test]
    async fn test_valid_token_is_reused() {
        let provider = Arc::new(CountingProvider {
            calls: AtomicUsize::new(0),
            expires_in: 3600,
        });
        let creds = AzureCredentials::new(provider.clone());

        assert_eq!(creds.get_token().await.unwrap(), "token-0");
        assert_eq!(creds.get_token().await.unwrap(), "token-0");
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);

        assert_eq!(creds.refresh_token().await.unwrap(), "token-1");
        assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_token_inside_expiry_buffer_is_refetched() {
        // Expires in 30s, which is inside the 60s buffer
        let provider = Arc::new(CountingProvider {
            calls: AtomicUsize::new(0),
            expires_in: 30,
        });
        let creds = AzureCredentials::new(provider.clone());

        creds.get_token().await.unwrap();
        creds.get_token().await.unwrap();
        assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_client_secret_provider_requires_credentials() {
        let result = ClientSecretProvider::new(Environment::Public, "tenant", "", "secret");
        assert!(matches!(result, Err(ArmError::Auth(_))));
    }
}
