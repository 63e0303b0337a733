//! Long-running operations
//!
//! ARM answers mutating calls either synchronously or by handing back a way
//! to track the work: an `Azure-AsyncOperation` status URL, a `Location` URL,
//! or a `provisioningState` on the resource itself. [`PollHandle`] picks the
//! strategy from the initial response and polls until a terminal status, the
//! deadline of the [`OperationContext`] or cancellation.

pub mod state_change;

use crate::azure::client::ArmClient;
use crate::azure::http::ArmResponse;
use crate::error::{extract_error_envelope, ArmError, Result};
use crate::timeouts::OperationContext;
use reqwest::Method;
use serde_json::Value;
use std::time::Duration;

const AZURE_ASYNC_OPERATION: &str = "azure-asyncoperation";
const LOCATION: &str = "location";

/// How the poller behaves when the service doesn't dictate an interval
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollerOptions {
    pub default_interval: Duration,
    /// Consecutive transient poll failures tolerated before giving up
    pub max_transient_retries: u32,
}

impl Default for PollerOptions {
    fn default() -> Self {
        Self {
            default_interval: Duration::from_secs(10),
            max_transient_retries: 3,
        }
    }
}

/// Status reported by an operation or a `provisioningState`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationStatus {
    Succeeded,
    Failed,
    Canceled,
    /// Anything else (`InProgress`, `Accepted`, `Updating`, ...) keeps polling
    InProgress(String),
}

impl OperationStatus {
    pub fn parse(value: &str) -> Self {
        match value.to_ascii_lowercase().as_str() {
            "succeeded" => Self::Succeeded,
            "failed" => Self::Failed,
            "canceled" | "cancelled" => Self::Canceled,
            _ => Self::InProgress(value.to_string()),
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::InProgress(_))
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Succeeded => "Succeeded",
            Self::Failed => "Failed",
            Self::Canceled => "Canceled",
            Self::InProgress(raw) => raw,
        }
    }
}

/// Where the outcome of an operation is observed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollStrategy {
    /// Poll the `Azure-AsyncOperation` URL for `status`
    AsyncOperation(String),
    /// Poll the `Location` URL until it stops answering 202
    Location(String),
    /// GET the resource until `properties.provisioningState` is terminal
    ProvisioningState,
    /// Accepted delete without tracking headers: GET the resource until 404
    UntilGone,
    /// The initial response is the final result
    Done,
}

/// A started operation
#[derive(Debug, Clone)]
pub struct PollHandle {
    method: Method,
    resource_url: String,
    strategy: PollStrategy,
    initial: ArmResponse,
}

impl PollHandle {
    /// Derive the polling strategy from the response to the initial request
    pub fn from_response(method: Method, resource_url: &str, response: ArmResponse) -> Self {
        let strategy = if let Some(url) = response.header(AZURE_ASYNC_OPERATION) {
            PollStrategy::AsyncOperation(url.to_string())
        } else if let (Some(url), 201 | 202) = (response.header(LOCATION), response.status) {
            PollStrategy::Location(url.to_string())
        } else if is_put_or_patch(&method)
            && provisioning_state(&response.body).is_some_and(|s| !s.is_terminal())
        {
            PollStrategy::ProvisioningState
        } else if method == Method::DELETE && response.status == 202 {
            PollStrategy::UntilGone
        } else {
            PollStrategy::Done
        };

        Self {
            method,
            resource_url: resource_url.to_string(),
            strategy,
            initial: response,
        }
    }

    pub fn strategy(&self) -> &PollStrategy {
        &self.strategy
    }

    /// Poll to completion. Returns the final resource body for PUT/PATCH,
    /// `None` for deletes and bodiless results.
    pub async fn wait(self, client: &ArmClient, ctx: &OperationContext) -> Result<Option<Value>> {
        let is_delete = self.method == Method::DELETE;

        let poll_url = match &self.strategy {
            PollStrategy::Done => return self.finish_immediately(),
            PollStrategy::AsyncOperation(url) | PollStrategy::Location(url) => url.clone(),
            PollStrategy::ProvisioningState | PollStrategy::UntilGone => self.resource_url.clone(),
        };

        tracing::debug!(
            "Waiting for {} ({:?}) via {}",
            ctx.waiting_for(),
            self.strategy,
            poll_url
        );

        let mut interval = self.initial.retry_after();
        let mut polls: u32 = 0;
        let mut transient_failures: u32 = 0;

        loop {
            ctx.sleep(interval.unwrap_or(client.poller.default_interval))
                .await?;
            polls += 1;

            let response = match ctx.run(client.get(&poll_url)).await {
                Ok(response) => {
                    transient_failures = 0;
                    response
                },
                Err(e) if is_delete && e.is_not_found() => {
                    tracing::debug!("{} gone after {} polls", self.resource_url, polls);
                    return Ok(None);
                },
                Err(e) if e.is_transient() && transient_failures < client.poller.max_transient_retries => {
                    transient_failures += 1;
                    tracing::warn!(
                        "Transient error polling {} (attempt {}/{}): {}",
                        poll_url,
                        transient_failures,
                        client.poller.max_transient_retries,
                        e
                    );
                    interval = None;
                    continue;
                },
                Err(e) => return Err(e),
            };

            interval = response.retry_after();

            let status = match &self.strategy {
                PollStrategy::AsyncOperation(_) => operation_status(&response.body),
                PollStrategy::Location(_) if response.status == 202 => {
                    OperationStatus::InProgress("Accepted".to_string())
                },
                PollStrategy::Location(_) => OperationStatus::Succeeded,
                PollStrategy::ProvisioningState => provisioning_state(&response.body)
                    .unwrap_or(OperationStatus::Succeeded),
                PollStrategy::UntilGone => OperationStatus::InProgress("Deleting".to_string()),
                PollStrategy::Done => OperationStatus::Succeeded,
            };

            tracing::debug!("Poll #{} of {}: {}", polls, poll_url, status.as_str());

            match status {
                OperationStatus::InProgress(_) => continue,
                OperationStatus::Failed | OperationStatus::Canceled => {
                    return Err(operation_failed(&status, &response.body));
                },
                OperationStatus::Succeeded => {
                    tracing::debug!("{} finished after {} polls", ctx.waiting_for(), polls);
                    return self.final_result(client, ctx, response).await;
                },
            }
        }
    }

    fn finish_immediately(self) -> Result<Option<Value>> {
        if is_put_or_patch(&self.method) {
            if let Some(status @ (OperationStatus::Failed | OperationStatus::Canceled)) =
                provisioning_state(&self.initial.body)
            {
                return Err(operation_failed(&status, &self.initial.body));
            }
        }

        Ok(non_null(self.method, self.initial.body))
    }

    async fn final_result(
        &self,
        client: &ArmClient,
        ctx: &OperationContext,
        last: ArmResponse,
    ) -> Result<Option<Value>> {
        if self.method == Method::DELETE {
            return Ok(None);
        }

        let needs_resource_get = match &self.strategy {
            PollStrategy::AsyncOperation(_) => is_put_or_patch(&self.method),
            PollStrategy::Location(_) => is_put_or_patch(&self.method) && last.body.is_null(),
            _ => false,
        };

        if needs_resource_get {
            let response = ctx.run(client.get(&self.resource_url)).await?;
            return Ok(non_null(self.method.clone(), response.body));
        }

        Ok(non_null(self.method.clone(), last.body))
    }
}

/// Send a mutating request and wait for the operation it starts.
///
/// A 404 answering a DELETE counts as success: the object is already gone.
pub async fn send_and_wait(
    client: &ArmClient,
    ctx: &OperationContext,
    method: Method,
    url: &str,
    body: Option<&Value>,
) -> Result<Option<Value>> {
    let initial = match ctx.run(client.send(method.clone(), url, body)).await {
        Ok(response) => response,
        Err(e) if method == Method::DELETE && e.is_not_found() => {
            tracing::debug!("DELETE {} -> 404, nothing to wait for", url);
            return Ok(None);
        },
        Err(e) => return Err(e),
    };

    PollHandle::from_response(method, url, initial)
        .wait(client, ctx)
        .await
}

fn is_put_or_patch(method: &Method) -> bool {
    *method == Method::PUT || *method == Method::PATCH
}

fn non_null(method: Method, body: Value) -> Option<Value> {
    if method == Method::DELETE || body.is_null() {
        None
    } else {
        Some(body)
    }
}

fn operation_status(body: &Value) -> OperationStatus {
    body.get("status")
        .and_then(|v| v.as_str())
        .map(OperationStatus::parse)
        .unwrap_or_else(|| OperationStatus::InProgress("Unknown".to_string()))
}

fn provisioning_state(body: &Value) -> Option<OperationStatus> {
    body.get("properties")
        .and_then(|p| p.get("provisioningState"))
        .and_then(|v| v.as_str())
        .map(OperationStatus::parse)
}

fn operation_failed(status: &OperationStatus, body: &Value) -> ArmError {
    let (code, message) = extract_error_envelope(body).unwrap_or_else(|| {
        (
            status.as_str().to_string(),
            format!("the operation finished with status {:?}", status.as_str()),
        )
    });

    ArmError::OperationFailed {
        status: status.as_str().to_string(),
        code,
        message,
    }
}
