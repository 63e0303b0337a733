//! Azure Resource Manager interaction module
//!
//! Everything needed to talk to the ARM control plane: cloud environments,
//! token acquisition, the retrying HTTP layer and the client bundle handed to
//! resource handlers.
//!
//! # Module Structure
//!
//! - [`environment`] - Sovereign cloud endpoints
//! - [`auth`] - Client-credentials tokens with caching
//! - [`http`] - HTTP utilities for REST API calls
//! - [`client`] - Main ARM client for making API requests
//!
//! # Example
//!
//! ```ignore
//! use armctl::azure::client::ArmClient;
//!
//! async fn example(config: &armctl::config::ProviderConfig) -> armctl::error::Result<()> {
//!     let client = ArmClient::from_config(config)?;
//!     let url = client.subscription_url("/resourcegroups", "2022-09-01");
//!     let groups = client.get(&url).await?;
//!     Ok(())
//! }
//! ```

pub mod auth;
pub mod client;
pub mod environment;
pub mod http;

/// Sent on every request so calls can be attributed in activity logs
pub const USER_AGENT: &str = concat!("armctl/", env!("CARGO_PKG_VERSION"));
