//! Resource Registry
//!
//! Table of every resource type and data source this build manages, keyed by
//! type name. Descriptors are stateless, so the table is built once on first
//! access and shared for the lifetime of the process.

use super::lifecycle::{DataSource, Lifecycle};
use super::{DataSourceDescriptor, ManagedDataSource, ManagedResource, ResourceDescriptor};
use std::collections::BTreeMap;
use std::sync::OnceLock;

#[derive(Default)]
pub struct Registry {
    resources: BTreeMap<&'static str, Box<dyn ManagedResource>>,
    data_sources: BTreeMap<&'static str, Box<dyn ManagedDataSource>>,
}

impl Registry {
    pub fn register_resource<D: ResourceDescriptor>(&mut self, descriptor: D) {
        let name = descriptor.type_name();
        if self
            .resources
            .insert(name, Box::new(Lifecycle::new(descriptor)))
            .is_some()
        {
            tracing::warn!("Resource type {} registered twice", name);
        }
    }

    pub fn register_data_source<D: DataSourceDescriptor>(&mut self, descriptor: D) {
        let name = descriptor.type_name();
        if self
            .data_sources
            .insert(name, Box::new(DataSource::new(descriptor)))
            .is_some()
        {
            tracing::warn!("Data source {} registered twice", name);
        }
    }

    pub fn resource(&self, type_name: &str) -> Option<&dyn ManagedResource> {
        self.resources.get(type_name).map(|r| r.as_ref())
    }

    pub fn data_source(&self, type_name: &str) -> Option<&dyn ManagedDataSource> {
        self.data_sources.get(type_name).map(|d| d.as_ref())
    }
}

/// Global registry
static REGISTRY: OnceLock<Registry> = OnceLock::new();

/// Get the registry (built on first access)
pub fn get_registry() -> &'static Registry {
    REGISTRY.get_or_init(|| {
        let mut registry = Registry::default();
        crate::services::register_all(&mut registry);
        registry
    })
}

/// Get a resource type by name
pub fn get_resource(type_name: &str) -> Option<&'static dyn ManagedResource> {
    get_registry().resource(type_name)
}

/// Get a data source by name
pub fn get_data_source(type_name: &str) -> Option<&'static dyn ManagedDataSource> {
    get_registry().data_source(type_name)
}

/// All resource type names, sorted
pub fn get_all_resource_keys() -> Vec<&'static str> {
    get_registry().resources.keys().copied().collect()
}

/// All data source names, sorted
pub fn get_all_data_source_keys() -> Vec<&'static str> {
    get_registry().data_sources.keys().copied().collect()
}
