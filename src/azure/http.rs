//! HTTP utilities for Resource Manager REST calls

use crate::error::{is_retryable_status, ArmError, Result};
use reqwest::header::HeaderMap;
use reqwest::{Client, Method};
use serde_json::Value;
use std::time::Duration;

/// Maximum length of response body to log (to avoid logging sensitive data)
const MAX_LOG_BODY_LENGTH: usize = 200;

/// Retries for throttled/transient responses before giving up
const DEFAULT_MAX_RETRIES: u32 = 3;

/// Base delay between retries (doubled each attempt)
const DEFAULT_RETRY_BASE_DELAY: Duration = Duration::from_millis(500);

/// Sanitize response body for logging
/// Truncates long responses and drops control characters
pub(crate) fn sanitize_for_log(body: &str) -> String {
    let truncated = if body.len() > MAX_LOG_BODY_LENGTH {
        let mut end = MAX_LOG_BODY_LENGTH;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}... [truncated, {} bytes total]", &body[..end], body.len())
    } else {
        body.to_string()
    };

    truncated.replace(|c: char| c.is_control(), "")
}

/// A successful response, kept whole because the operation poller needs the headers
#[derive(Debug, Clone)]
pub struct ArmResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: Value,
}

impl ArmResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Delay requested by the service through `Retry-After` (seconds form)
    pub fn retry_after(&self) -> Option<Duration> {
        retry_after(&self.headers)
    }
}

fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

/// HTTP client wrapper for Resource Manager calls
#[derive(Clone)]
pub struct ArmHttpClient {
    client: Client,
    max_retries: u32,
    retry_base_delay: Duration,
}

impl ArmHttpClient {
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .user_agent(super::USER_AGENT)
            .build()
            .map_err(|e| ArmError::Transport(format!("failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_base_delay: DEFAULT_RETRY_BASE_DELAY,
        })
    }

    /// Override how often throttled/transient responses are retried
    pub fn with_retry_policy(mut self, max_retries: u32, base_delay: Duration) -> Self {
        self.max_retries = max_retries;
        self.retry_base_delay = base_delay;
        self
    }

    /// Send a request, retrying 408/429/5xx and connection failures a bounded
    /// number of times. Non-2xx responses that are not retried become
    /// [`ArmError::Api`] with the service's error code and message.
    pub async fn send(
        &self,
        method: Method,
        url: &str,
        token: &str,
        body: Option<&Value>,
    ) -> Result<ArmResponse> {
        let mut attempt = 0;

        loop {
            tracing::debug!("{} {}", method, url);

            let mut request = self
                .client
                .request(method.clone(), url)
                .bearer_auth(token)
                .header("x-ms-client-request-id", uuid::Uuid::new_v4().to_string());

            if let Some(body) = body {
                request = request.json(body);
            }

            let response = match request.send().await {
                Ok(response) => response,
                Err(e) if attempt < self.max_retries => {
                    let delay = self.backoff(attempt);
                    tracing::warn!("{} {} failed: {} - retrying in {:?}", method, url, e, delay);
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                    continue;
                },
                Err(e) => return Err(ArmError::Transport(e.to_string())),
            };

            let status = response.status().as_u16();
            let headers = response.headers().clone();
            let text = response
                .text()
                .await
                .map_err(|e| ArmError::Transport(format!("failed to read response body: {e}")))?;

            if (200..300).contains(&status) {
                let body = if text.trim().is_empty() {
                    Value::Null
                } else {
                    serde_json::from_str(&text)?
                };
                return Ok(ArmResponse {
                    status,
                    headers,
                    body,
                });
            }

            if is_retryable_status(status) && attempt < self.max_retries {
                let delay = retry_after(&headers).unwrap_or_else(|| self.backoff(attempt));
                tracing::warn!("{} {} -> {} - retrying in {:?}", method, url, status, delay);
                tokio::time::sleep(delay).await;
                attempt += 1;
                continue;
            }

            if status == 404 {
                tracing::debug!("{} {} -> 404", method, url);
            } else {
                // Security: Only log sanitized/truncated error body to avoid leaking sensitive data
                tracing::error!("API error: {} - {}", status, sanitize_for_log(&text));
            }
            return Err(ArmError::from_response(status, &text));
        }
    }

    fn backoff(&self, attempt: u32) -> Duration {
        self.retry_base_delay * 2u32.saturating_pow(attempt)
    }
}
