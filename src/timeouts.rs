//! Operation deadlines
//!
//! Every handler call runs inside an [`OperationContext`]: a deadline derived
//! from the per-operation timeout plus a cancellation token that is a child of
//! the process-wide stop token.

use crate::error::{ArmError, Result};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// The four lifecycle operations a resource supports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    Create,
    Read,
    Update,
    Delete,
}

impl OperationKind {
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Create => "Create",
            Self::Read => "Read",
            Self::Update => "Update",
            Self::Delete => "Delete",
        }
    }

    pub fn present_participle(&self) -> &'static str {
        match self {
            Self::Create => "creating",
            Self::Read => "retrieving",
            Self::Update => "updating",
            Self::Delete => "deleting",
        }
    }
}

/// Default timeouts of one resource type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OperationTimeouts {
    pub create: Duration,
    pub read: Duration,
    pub update: Duration,
    pub delete: Duration,
}

impl OperationTimeouts {
    pub const fn minutes(create: u64, read: u64, update: u64, delete: u64) -> Self {
        Self {
            create: Duration::from_secs(create * 60),
            read: Duration::from_secs(read * 60),
            update: Duration::from_secs(update * 60),
            delete: Duration::from_secs(delete * 60),
        }
    }

    pub fn for_kind(&self, kind: OperationKind) -> Duration {
        match kind {
            OperationKind::Create => self.create,
            OperationKind::Read => self.read,
            OperationKind::Update => self.update,
            OperationKind::Delete => self.delete,
        }
    }

    /// Apply user-supplied overrides on top of these defaults
    pub fn with_overrides(&self, overrides: &TimeoutOverrides) -> Result<Self> {
        let pick = |field: &str, value: &Option<String>, default: Duration| -> Result<Duration> {
            match value {
                Some(raw) => parse_duration(raw)
                    .map_err(|message| ArmError::validation(format!("timeouts.{field}"), message)),
                None => Ok(default),
            }
        };

        Ok(Self {
            create: pick("create", &overrides.create, self.create)?,
            read: pick("read", &overrides.read, self.read)?,
            update: pick("update", &overrides.update, self.update)?,
            delete: pick("delete", &overrides.delete, self.delete)?,
        })
    }
}

impl Default for OperationTimeouts {
    fn default() -> Self {
        Self::minutes(30, 5, 30, 30)
    }
}

/// `timeouts` block of a resource declaration, e.g. `create: 1h30m`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeoutOverrides {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub create: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub read: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delete: Option<String>,
}

/// Parse durations such as `45s`, `30m`, `1h30m` or `250ms`
pub fn parse_duration(input: &str) -> std::result::Result<Duration, String> {
    let input = input.trim();
    if input.is_empty() {
        return Err("duration was empty".to_string());
    }

    let mut total = Duration::ZERO;
    let mut rest = input;

    while !rest.is_empty() {
        let digits_end = rest
            .find(|c: char| !c.is_ascii_digit())
            .ok_or_else(|| format!("duration {input:?} is missing a unit (h, m, s or ms)"))?;
        if digits_end == 0 {
            return Err(format!("duration {input:?} is not of the form 1h30m"));
        }

        let value: u64 = rest[..digits_end]
            .parse()
            .map_err(|_| format!("duration {input:?} has an out-of-range number"))?;
        rest = &rest[digits_end..];

        let unit_end = rest
            .find(|c: char| c.is_ascii_digit())
            .unwrap_or(rest.len());
        let unit = &rest[..unit_end];
        rest = &rest[unit_end..];

        total += match unit {
            "h" => Duration::from_secs(value * 3600),
            "m" => Duration::from_secs(value * 60),
            "s" => Duration::from_secs(value),
            "ms" => Duration::from_millis(value),
            other => return Err(format!("duration {input:?} has unknown unit {other:?}")),
        };
    }

    Ok(total)
}

/// Deadline and cancellation scope of one handler invocation
#[derive(Debug, Clone)]
pub struct OperationContext {
    kind: OperationKind,
    description: String,
    timeout: Duration,
    deadline: Instant,
    cancel: CancellationToken,
}

impl OperationContext {
    pub fn new(
        kind: OperationKind,
        description: impl Into<String>,
        timeout: Duration,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            kind,
            description: description.into(),
            timeout,
            deadline: Instant::now() + timeout,
            cancel,
        }
    }

    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.deadline
    }

    /// What the caller is blocked on, e.g. `creating Registry "acr1" (...)`
    pub fn waiting_for(&self) -> String {
        format!("{} {}", self.kind.present_participle(), self.description)
    }

    pub fn timeout_error(&self) -> ArmError {
        ArmError::Timeout {
            waiting_for: self.waiting_for(),
            after: self.timeout,
        }
    }

    /// Derive a context for a nested wait that shares deadline and cancellation
    pub fn nested(&self, description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            ..self.clone()
        }
    }

    /// Run a future, aborting it at the deadline or on cancellation
    pub async fn run<T, F>(&self, future: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        tokio::select! {
            _ = self.cancel.cancelled() => Err(ArmError::Cancelled(self.waiting_for())),
            outcome = tokio::time::timeout_at(self.deadline, future) => match outcome {
                Ok(result) => result,
                Err(_) => Err(self.timeout_error()),
            },
        }
    }

    /// Sleep for `duration`, capped at the deadline. Reaching the deadline is a
    /// timeout error so callers never outlive it.
    pub async fn sleep(&self, duration: Duration) -> Result<()> {
        let wake = std::cmp::min(Instant::now() + duration, self.deadline);

        tokio::select! {
            _ = self.cancel.cancelled() => return Err(ArmError::Cancelled(self.waiting_for())),
            _ = tokio::time::sleep_until(wake) => {},
        }

        if self.is_expired() {
            return Err(self.timeout_error());
        }
        Ok(())
    }
}
