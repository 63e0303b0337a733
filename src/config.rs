//! Provider Configuration
//!
//! Subscription, credentials, cloud environment and feature flags. Read once
//! at start-up (config file, then `ARM_*` environment variables, then CLI
//! flags) and shared read-only by every resource handler.

use crate::azure::environment::Environment;
use crate::error::{ArmError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Interval between operation polls when the service sends no `Retry-After`
const DEFAULT_POLL_INTERVAL_SECS: u64 = 10;

const DEFAULT_MAX_RETRIES: u32 = 3;

const DEFAULT_MAX_CONCURRENCY: usize = 4;

/// Behaviour switches that change how specific resource types are managed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Features {
    #[serde(default)]
    pub resource_group: ResourceGroupFeatures,
    #[serde(default)]
    pub subnet: SubnetFeatures,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceGroupFeatures {
    /// Refuse to delete a resource group that still contains resources
    #[serde(default = "default_true")]
    pub prevent_deletion_if_contains_resources: bool,
}

impl Default for ResourceGroupFeatures {
    fn default() -> Self {
        Self {
            prevent_deletion_if_contains_resources: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubnetFeatures {
    /// Keep polling after a subnet delete until the network reports it gone
    #[serde(default = "default_true")]
    pub wait_for_deletion: bool,
}

impl Default for SubnetFeatures {
    fn default() -> Self {
        Self {
            wait_for_deletion: true,
        }
    }
}

fn default_true() -> bool {
    true
}

/// Provider-wide configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ProviderConfig {
    #[serde(default)]
    pub subscription_id: Option<String>,
    #[serde(default)]
    pub tenant_id: Option<String>,
    #[serde(default)]
    pub client_id: Option<String>,
    /// Security: never written back to disk
    #[serde(default, skip_serializing)]
    pub client_secret: Option<String>,
    /// Pre-acquired bearer token (`ARM_ACCESS_TOKEN`), bypasses client credentials
    #[serde(default, skip_serializing)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub environment: Environment,
    /// Override the environment's Resource Manager endpoint
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub features: Features,
    #[serde(default)]
    pub poll_interval_secs: Option<u64>,
    #[serde(default)]
    pub max_retries: Option<u32>,
    #[serde(default)]
    pub max_concurrency: Option<usize>,
}

impl ProviderConfig {
    /// Get the config file path
    pub fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("armctl").join("config.json"))
    }

    /// Load configuration from the default location, falling back to defaults
    pub fn load() -> Result<Self> {
        match Self::config_path() {
            Some(path) if path.exists() => Self::load_from(&path),
            _ => Ok(Self::default()),
        }
    }

    /// Load configuration from an explicit file
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ArmError::Config(format!("reading {}: {}", path.display(), e))
        })?;
        serde_json::from_str(&content)
            .map_err(|e| ArmError::Config(format!("parsing {}: {}", path.display(), e)))
    }

    /// Overlay `ARM_*` environment variables
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_env_from(|key| std::env::var(key).ok())
    }

    /// Overlay values from a lookup function (the process environment in production)
    pub fn apply_env_from<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = non_empty("ARM_SUBSCRIPTION_ID") {
            self.subscription_id = Some(v);
        }
        if let Some(v) = non_empty("ARM_TENANT_ID") {
            self.tenant_id = Some(v);
        }
        if let Some(v) = non_empty("ARM_CLIENT_ID") {
            self.client_id = Some(v);
        }
        if let Some(v) = non_empty("ARM_CLIENT_SECRET") {
            self.client_secret = Some(v);
        }
        if let Some(v) = non_empty("ARM_ACCESS_TOKEN") {
            self.access_token = Some(v);
        }
        if let Some(v) = non_empty("ARM_ENVIRONMENT") {
            self.environment = v.parse().map_err(ArmError::Config)?;
        }
        if let Some(v) = non_empty("ARM_ENDPOINT") {
            self.endpoint = Some(v);
        }
        Ok(())
    }

    /// Check the configuration is complete enough to build a client
    pub fn validate(&self) -> Result<()> {
        let subscription_id = self
            .subscription_id
            .as_deref()
            .ok_or_else(|| ArmError::Config("subscription_id is not set (ARM_SUBSCRIPTION_ID)".to_string()))?;
        ensure_uuid("subscription_id", subscription_id)?;

        if let Some(endpoint) = &self.endpoint {
            url::Url::parse(endpoint)
                .map_err(|e| ArmError::Config(format!("endpoint {endpoint:?} is not a URL: {e}")))?;
        }

        if self.access_token.is_some() {
            return Ok(());
        }

        let tenant_id = self
            .tenant_id
            .as_deref()
            .ok_or_else(|| ArmError::Config("tenant_id is not set (ARM_TENANT_ID)".to_string()))?;
        ensure_uuid("tenant_id", tenant_id)?;

        if self.client_id.is_none() || self.client_secret.is_none() {
            return Err(ArmError::Config(
                "client_id and client_secret are required (ARM_CLIENT_ID / ARM_CLIENT_SECRET) unless ARM_ACCESS_TOKEN is set"
                    .to_string(),
            ));
        }

        Ok(())
    }

    /// Effective Resource Manager endpoint
    pub fn resource_manager_endpoint(&self) -> String {
        self.endpoint
            .clone()
            .unwrap_or_else(|| self.environment.resource_manager_endpoint().to_string())
            .trim_end_matches('/')
            .to_string()
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.unwrap_or(DEFAULT_POLL_INTERVAL_SECS))
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries.unwrap_or(DEFAULT_MAX_RETRIES)
    }

    pub fn max_concurrency(&self) -> usize {
        self.max_concurrency.unwrap_or(DEFAULT_MAX_CONCURRENCY).max(1)
    }
}

fn ensure_uuid(field: &str, value: &str) -> Result<()> {
    uuid::Uuid::parse_str(value)
        .map(|_| ())
        .map_err(|_| ArmError::Config(format!("{field} {value:?} is not a valid UUID")))
}
