//! Error taxonomy
//!
//! Library code returns [`ArmError`]; the binary wraps it in `anyhow` with
//! context the same way the rest of the CLI does.

use crate::resource_id::ResourceIdError;
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

/// Errors surfaced by the ARM client, the operation poller and the lifecycle engine
#[derive(Error, Debug)]
pub enum ArmError {
    /// Configuration rejected before any network call
    #[error("invalid value for `{field}`: {message}")]
    Validation { field: String, message: String },

    /// The remote object does not exist (HTTP 404)
    #[error("{0} was not found")]
    NotFound(String),

    /// Create found an object that is not tracked in state
    #[error(
        "a resource with the ID {id:?} already exists - to be managed it needs to be imported \
         into the state with `armctl import` (resource type {resource_type:?})"
    )]
    RequiresImport { resource_type: String, id: String },

    /// Deleting a resource group that still holds resources was refused
    #[error(
        "the resource group still contains {} resource(s): {}. Remove them first, or set \
         `features.resource_group.prevent_deletion_if_contains_resources` to false",
        .resources.len(),
        .resources.join(", ")
    )]
    ResourceGroupNotEmpty { resources: Vec<String> },

    /// Non-2xx response from the management API
    #[error("unexpected status {status} ({code}): {message}")]
    Api {
        status: u16,
        code: String,
        message: String,
    },

    /// A long-running operation reached a failed terminal state
    #[error("operation ended with status {status:?} ({code}): {message}")]
    OperationFailed {
        status: String,
        code: String,
        message: String,
    },

    /// The operation deadline elapsed
    #[error("timed out waiting for {waiting_for} (timeout was {after:?})")]
    Timeout { waiting_for: String, after: Duration },

    /// The operation was cancelled by the caller
    #[error("cancelled while {0}")]
    Cancelled(String),

    /// Connection-level failure talking to the API
    #[error("request failed: {0}")]
    Transport(String),

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("invalid provider configuration: {0}")]
    Config(String),

    #[error("state error: {0}")]
    State(String),

    #[error("invalid manifest: {0}")]
    Manifest(String),

    #[error(transparent)]
    ResourceId(#[from] ResourceIdError),

    #[error("decoding response: {0}")]
    Json(#[from] serde_json::Error),

    /// An error annotated with the action and the object it applied to
    #[error("{action} {target}: {source}")]
    Operation {
        action: String,
        target: String,
        #[source]
        source: Box<ArmError>,
    },
}

pub type Result<T> = std::result::Result<T, ArmError>;

impl ArmError {
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Build an API error from a status code and the raw response body.
    ///
    /// ARM wraps errors as `{"error": {"code": ..., "message": ...}}`; bodies
    /// that don't follow the envelope are kept as the message.
    pub fn from_response(status: u16, body: &str) -> Self {
        let (code, message) = match serde_json::from_str::<Value>(body) {
            Ok(value) => extract_error_envelope(&value)
                .unwrap_or_else(|| (status_code_name(status), body.to_string())),
            Err(_) => (status_code_name(status), body.to_string()),
        };

        Self::Api {
            status,
            code,
            message,
        }
    }

    /// Wrap `self` with the action being performed and the object it targeted.
    pub fn during(self, action: impl Into<String>, target: impl std::fmt::Display) -> Self {
        Self::Operation {
            action: action.into(),
            target: target.to_string(),
            source: Box::new(self),
        }
    }

    /// Innermost error, looking through [`ArmError::Operation`] wrappers
    pub fn root(&self) -> &ArmError {
        match self {
            Self::Operation { source, .. } => source.root(),
            other => other,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self.root(), Self::NotFound(_) | Self::Api { status: 404, .. })
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self.root(), Self::Timeout { .. })
    }

    /// Errors worth retrying: connection failures, throttling and server errors
    pub fn is_transient(&self) -> bool {
        match self.root() {
            Self::Transport(_) => true,
            Self::Api { status, .. } => is_retryable_status(*status),
            _ => false,
        }
    }
}

/// Statuses the HTTP layer and the poller retry
pub fn is_retryable_status(status: u16) -> bool {
    matches!(status, 408 | 429 | 500 | 502 | 503 | 504)
}

/// Pull `error.code` / `error.message` out of an ARM error body
pub fn extract_error_envelope(value: &Value) -> Option<(String, String)> {
    let error = value.get("error")?;
    let code = error
        .get("code")
        .and_then(|v| v.as_str())
        .unwrap_or("Unknown")
        .to_string();
    let message = error
        .get("message")
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string();
    Some((code, message))
}

fn status_code_name(status: u16) -> String {
    match status {
        400 => "BadRequest",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "NotFound",
        409 => "Conflict",
        429 => "TooManyRequests",
        500..=599 => "ServerError",
        _ => "Unknown",
    }
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_response_reads_arm_envelope() {
        let body = r#"{"error":{"code":"ResourceGroupNotFound","message":"Resource group 'x' could not be found."}}"#;
        let err = ArmError::from_response(404, body);

        match &err {
            ArmError::Api {
                status,
                code,
                message,
            } => {
                assert_eq!(*status, 404);
                assert_eq!(code, "ResourceGroupNotFound");
                assert!(message.contains("could not be found"));
            },
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(err.is_not_found());
    }

    #[test]
    fn test_from_response_keeps_plain_body() {
        let err = ArmError::from_response(502, "Bad Gateway");
        assert!(err.to_string().contains("Bad Gateway"));
        assert!(err.is_transient());
    }

    #[test]
    fn test_wrapped_errors_keep_classification() {
        let err = ArmError::Timeout {
            waiting_for: "creating registry".to_string(),
            after: Duration::from_secs(1),
        }
        .during("creating", "Registry \"a\"");

        assert!(err.is_timeout());
        assert!(!err.is_not_found());
        assert!(err.to_string().starts_with("creating Registry \"a\": timed out waiting for"));
    }

    #[test]
    fn test_conflict_is_not_transient() {
        assert!(!ArmError::from_response(409, "{}").is_transient());
        assert!(ArmError::from_response(429, "{}").is_transient());
    }
}
