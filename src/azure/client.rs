//! ARM Client
//!
//! Main client for interacting with Azure Resource Manager, combining
//! authentication, HTTP functionality and the provider-wide settings every
//! resource handler needs. Built once and shared read-only.

use super::auth::{AzureCredentials, ClientSecretProvider};
use super::http::{ArmHttpClient, ArmResponse};
use crate::config::{Features, ProviderConfig};
use crate::error::{ArmError, Result};
use crate::lro::PollerOptions;
use crate::resource_id::ResourceId;
use reqwest::Method;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

/// Main ARM client
#[derive(Clone)]
pub struct ArmClient {
    pub credentials: AzureCredentials,
    pub http: ArmHttpClient,
    pub subscription_id: String,
    /// Resource Manager base URL without trailing slash
    pub endpoint: String,
    pub features: Features,
    pub poller: PollerOptions,
}

impl ArmClient {
    /// Create a client with the given credentials against `endpoint`
    pub fn new(credentials: AzureCredentials, subscription_id: &str, endpoint: &str) -> Result<Self> {
        Ok(Self {
            credentials,
            http: ArmHttpClient::new()?,
            subscription_id: subscription_id.to_string(),
            endpoint: endpoint.trim_end_matches('/').to_string(),
            features: Features::default(),
            poller: PollerOptions::default(),
        })
    }

    /// Build the client from validated provider configuration
    pub fn from_config(config: &ProviderConfig) -> Result<Self> {
        config.validate()?;

        let credentials = match &config.access_token {
            Some(token) => AzureCredentials::from_static_token(token.clone()),
            None => {
                let provider = ClientSecretProvider::new(
                    config.environment,
                    config.tenant_id.as_deref().unwrap_or_default(),
                    config.client_id.as_deref().unwrap_or_default(),
                    config.client_secret.as_deref().unwrap_or_default(),
                )?;
                AzureCredentials::new(Arc::new(provider))
            },
        };

        let subscription_id = config
            .subscription_id
            .as_deref()
            .ok_or_else(|| ArmError::Config("subscription_id is not set".to_string()))?;

        let http = ArmHttpClient::new()?
            .with_retry_policy(config.max_retries(), Duration::from_millis(500));

        Ok(
            Self::new(credentials, subscription_id, &config.resource_manager_endpoint())?
                .with_http(http)
                .with_features(config.features.clone())
                .with_poller_options(PollerOptions {
                    default_interval: config.poll_interval(),
                    ..PollerOptions::default()
                }),
        )
    }

    pub fn with_features(mut self, features: Features) -> Self {
        self.features = features;
        self
    }

    pub fn with_poller_options(mut self, poller: PollerOptions) -> Self {
        self.poller = poller;
        self
    }

    pub fn with_http(mut self, http: ArmHttpClient) -> Self {
        self.http = http;
        self
    }

    /// Get the current access token
    pub async fn get_token(&self) -> Result<String> {
        self.credentials.get_token().await
    }

    /// Send a request to an absolute URL. A 401 forces one token refresh and
    /// a single retry.
    pub async fn send(&self, method: Method, url: &str, body: Option<&Value>) -> Result<ArmResponse> {
        let token = self.get_token().await?;
        match self.http.send(method.clone(), url, &token, body).await {
            Err(ArmError::Api { status: 401, .. }) => {
                tracing::debug!("401 from {}, refreshing token", url);
                let token = self.credentials.refresh_token().await?;
                self.http.send(method, url, &token, body).await
            },
            other => other,
        }
    }

    /// Make a GET request
    pub async fn get(&self, url: &str) -> Result<ArmResponse> {
        self.send(Method::GET, url, None).await
    }

    /// Make a POST request
    pub async fn post(&self, url: &str, body: Option<&Value>) -> Result<ArmResponse> {
        self.send(Method::POST, url, body).await
    }

    /// Fetch every item of a list endpoint, following `nextLink`
    pub async fn list(&self, url: &str) -> Result<Vec<Value>> {
        let mut items = Vec::new();
        let mut next = Some(url.to_string());

        while let Some(page_url) = next {
            let page = self.get(&page_url).await?;
            if let Some(values) = page.body.get("value").and_then(|v| v.as_array()) {
                items.extend(values.iter().cloned());
            }
            next = page
                .body
                .get("nextLink")
                .and_then(|v| v.as_str())
                .filter(|s| !s.is_empty())
                .map(|s| s.to_string());
        }

        Ok(items)
    }

    // =========================================================================
    // URL helpers
    // =========================================================================

    /// Build a management URL from an ARM path
    pub fn url(&self, path: &str, api_version: &str) -> String {
        let separator = if path.contains('?') { '&' } else { '?' };
        format!(
            "{}{}{}api-version={}",
            self.endpoint,
            path,
            separator,
            urlencoding::encode(api_version)
        )
    }

    /// URL of the object a resource ID points at; each segment is percent-encoded
    pub fn resource_url(&self, id: &ResourceId, api_version: &str) -> String {
        self.url(&encoded_path(id), api_version)
    }

    /// URL of an action or collection below a resource, e.g. `listCredentials`
    pub fn action_url(&self, id: &ResourceId, action: &str, api_version: &str) -> String {
        self.url(&format!("{}/{}", encoded_path(id), action), api_version)
    }

    /// URL below the client's subscription, e.g. `/providers/Microsoft.ContainerRegistry/checkNameAvailability`
    pub fn subscription_url(&self, path: &str, api_version: &str) -> String {
        self.url(
            &format!("/subscriptions/{}{}", self.subscription_id, path),
            api_version,
        )
    }
}

fn encoded_path(id: &ResourceId) -> String {
    id.to_string()
        .split('/')
        .filter(|s| !s.is_empty())
        .map(|s| format!("/{}", urlencoding::encode(s)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> ArmClient {
        ArmClient::new(
            AzureCredentials::from_static_token("t"),
            "00000000-0000-0000-0000-000000000000",
            "https://management.azure.com/",
        )
        .unwrap()
    }

    #[test]
    fn test_resource_url() {
        let id = ResourceId::parse(
            "/subscriptions/00000000-0000-0000-0000-000000000000/resourceGroups/my rg/providers/Microsoft.ContainerRegistry/registries/acr1",
        )
        .unwrap();

        assert_eq!(
            client().resource_url(&id, "2023-07-01"),
            "https://management.azure.com/subscriptions/00000000-0000-0000-0000-000000000000/resourceGroups/my%20rg/providers/Microsoft.ContainerRegistry/registries/acr1?api-version=2023-07-01"
        );
    }

    #[test]
    fn test_subscription_url() {
        assert_eq!(
            client().subscription_url("/providers/Microsoft.ContainerRegistry/checkNameAvailability", "2023-07-01"),
            "https://management.azure.com/subscriptions/00000000-0000-0000-0000-000000000000/providers/Microsoft.ContainerRegistry/checkNameAvailability?api-version=2023-07-01"
        );
    }

    #[test]
    fn test_url_appends_to_existing_query() {
        assert_eq!(
            client().url("/subscriptions/x/resources?$top=1", "2022-09-01"),
            "https://management.azure.com/subscriptions/x/resources?$top=1&api-version=2022-09-01"
        );
    }

    #[test]
    fn test_from_config_uses_access_token() {
        let config = ProviderConfig {
            subscription_id: Some("00000000-0000-0000-0000-000000000000".to_string()),
            access_token: Some("abc".to_string()),
            poll_interval_secs: Some(2),
            ..Default::default()
        };

        let client = ArmClient::from_config(&config).unwrap();
        assert_eq!(client.endpoint, "https://management.azure.com");
        assert_eq!(client.poller.default_interval, Duration::from_secs(2));
    }
}
