//! Resource abstraction layer
//!
//! Every resource type is a descriptor: a schema, an ID format, default
//! timeouts and four typed async functions. The generic [`lifecycle`] engine
//! turns a descriptor into a [`ManagedResource`] with uniform create, read,
//! update, delete and import semantics, and the [`registry`] keeps them in a
//! table keyed by type name.
//!
//! # Architecture
//!
//! - [`schema`] - Attribute declarations, defaults and validation
//! - [`validate`] - Reusable attribute validators
//! - [`state`] - Resource state, the state file and schema upgraders
//! - [`lifecycle`] - The generic CRUD engine
//! - [`registry`] - Lookup of descriptors by type name
//!
//! # Example
//!
//! ```ignore
//! use armctl::resource::{get_resource, Scope};
//!
//! async fn create(scope: &Scope<'_>, attributes: &Attributes) -> armctl::error::Result<()> {
//!     let registry = get_resource("azurerm_container_registry").unwrap();
//!     let state = registry.create(scope, attributes).await?;
//!     println!("created {}", state.id);
//!     Ok(())
//! }
//! ```

pub mod lifecycle;
mod registry;
pub mod schema;
pub mod state;
pub mod validate;

pub use lifecycle::{DataSource, Lifecycle};
pub use registry::*;
pub use schema::Attributes;
pub use state::{ResourceState, StateStore, StateUpgrader};

use crate::azure::client::ArmClient;
use crate::error::Result;
use crate::resource_id::{IdFormat, ResourceId};
use crate::timeouts::{OperationContext, OperationTimeouts, TimeoutOverrides};
use async_trait::async_trait;
use schema::Schema;
use serde::de::DeserializeOwned;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// What one engine call runs with: the shared client, the process-wide stop
/// token and the caller's timeout overrides
#[derive(Clone, Copy)]
pub struct Scope<'a> {
    pub client: &'a ArmClient,
    pub cancel: &'a CancellationToken,
    pub timeouts: &'a TimeoutOverrides,
}

/// Typed definition of a managed resource type
#[async_trait]
pub trait ResourceDescriptor: Send + Sync + 'static {
    /// Attribute map decoded once, after schema validation
    type Config: DeserializeOwned + Send + Sync;

    /// e.g. `azurerm_container_registry`
    fn type_name(&self) -> &'static str;

    /// e.g. `Container Registry`
    fn display_name(&self) -> &'static str;

    fn schema(&self) -> &'static Schema;

    fn id_format(&self) -> &'static IdFormat;

    fn timeouts(&self) -> OperationTimeouts {
        OperationTimeouts::default()
    }

    fn upgraders(&self) -> &'static [StateUpgrader] {
        &[]
    }

    /// Cross-attribute rules the schema can't express
    fn check(&self, _config: &Self::Config) -> Result<()> {
        Ok(())
    }

    fn id(&self, subscription_id: &str, config: &Self::Config) -> ResourceId;

    /// Remote checks before create, e.g. global name availability
    async fn pre_create(&self, _client: &ArmClient, _ctx: &OperationContext, _config: &Self::Config) -> Result<()> {
        Ok(())
    }

    async fn create(&self, client: &ArmClient, ctx: &OperationContext, id: &ResourceId, config: &Self::Config)
        -> Result<()>;

    /// Current attributes; a missing object is an error for which
    /// [`ArmError::is_not_found`](crate::error::ArmError::is_not_found) holds
    async fn read(&self, client: &ArmClient, ctx: &OperationContext, id: &ResourceId) -> Result<Attributes>;

    /// `changed` lists the configurable attributes that differ from state
    async fn update(
        &self,
        client: &ArmClient,
        ctx: &OperationContext,
        id: &ResourceId,
        config: &Self::Config,
        changed: &[&'static str],
    ) -> Result<()>;

    async fn delete(&self, client: &ArmClient, ctx: &OperationContext, id: &ResourceId) -> Result<()>;
}

/// Typed definition of a read-only data source
#[async_trait]
pub trait DataSourceDescriptor: Send + Sync + 'static {
    type Config: DeserializeOwned + Send + Sync;

    fn type_name(&self) -> &'static str;

    fn display_name(&self) -> &'static str;

    fn schema(&self) -> &'static Schema;

    fn read_timeout(&self) -> Duration {
        Duration::from_secs(5 * 60)
    }

    fn id(&self, subscription_id: &str, config: &Self::Config) -> ResourceId;

    async fn read(&self, client: &ArmClient, ctx: &OperationContext, id: &ResourceId) -> Result<Attributes>;
}

/// A resource type with its descriptor erased, as stored in the registry
#[async_trait]
pub trait ManagedResource: Send + Sync {
    fn type_name(&self) -> &'static str;

    fn display_name(&self) -> &'static str;

    fn schema(&self) -> &'static Schema;

    fn id_format(&self) -> &'static IdFormat;

    fn default_timeouts(&self) -> OperationTimeouts;

    /// Validate configuration and return it with defaults applied
    fn validate(&self, attributes: &Attributes) -> Result<Attributes>;

    /// ID the configuration would create
    fn planned_id(&self, subscription_id: &str, attributes: &Attributes) -> Result<ResourceId>;

    async fn create(&self, scope: &Scope<'_>, attributes: &Attributes) -> Result<ResourceState>;

    /// `None` when the object no longer exists
    async fn read(&self, scope: &Scope<'_>, state: &ResourceState) -> Result<Option<ResourceState>>;

    async fn update(&self, scope: &Scope<'_>, prior: &ResourceState, attributes: &Attributes) -> Result<ResourceState>;

    /// Succeeds if the object is already gone
    async fn delete(&self, scope: &Scope<'_>, state: &ResourceState) -> Result<()>;

    async fn import(&self, scope: &Scope<'_>, id: &str) -> Result<ResourceState>;

    /// Bring stored state up to the current schema version
    fn upgrade(&self, state: ResourceState) -> Result<ResourceState>;
}

/// A data source with its descriptor erased
#[async_trait]
pub trait ManagedDataSource: Send + Sync {
    fn type_name(&self) -> &'static str;

    fn display_name(&self) -> &'static str;

    fn schema(&self) -> &'static Schema;

    async fn read(&self, scope: &Scope<'_>, attributes: &Attributes) -> Result<ResourceState>;
}
