//! armctl - declarative lifecycle management for Azure Resource Manager
//!
//! - [`resource_id`] parses and formats ARM resource IDs
//! - [`lro`] waits for long-running operations
//! - [`resource`] drives create, read, update, delete and import for every
//!   registered resource type
//! - [`plan`] reconciles a [`manifest`] with the state store

pub mod azure;
pub mod config;
pub mod error;
pub mod lro;
pub mod manifest;
pub mod plan;
pub mod resource;
pub mod resource_id;
pub mod services;
pub mod timeouts;

pub use error::{ArmError, Result};
pub use resource_id::ResourceId;
