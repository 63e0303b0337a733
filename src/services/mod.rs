//! Resource type implementations
//!
//! One module per Azure service. Each exposes descriptors that the
//! [registry](crate::resource::Registry) wraps in the lifecycle engine.

pub mod container_registry;
pub mod network;
pub mod resource_group;

use crate::resource::schema::Attributes;
use crate::resource::Registry;
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Register every resource type and data source
pub fn register_all(registry: &mut Registry) {
    registry.register_resource(resource_group::ResourceGroupResource);
    registry.register_data_source(resource_group::ResourceGroupDataSource);

    registry.register_resource(container_registry::ContainerRegistryResource);
    registry.register_data_source(container_registry::ContainerRegistryDataSource);

    registry.register_resource(network::VirtualNetworkResource);
    registry.register_resource(network::SubnetResource);
}

/// `tags` as sent to ARM
pub(crate) fn expand_tags(tags: &BTreeMap<String, String>) -> Value {
    Value::Object(
        tags.iter()
            .map(|(k, v)| (k.clone(), Value::String(v.clone())))
            .collect(),
    )
}

/// `tags` as reported by ARM; a missing or `null` map is empty
pub(crate) fn flatten_tags(body: &Value) -> Value {
    let tags: Map<String, Value> = body
        .get("tags")
        .and_then(|t| t.as_object())
        .map(|t| {
            t.iter()
                .filter(|(_, v)| v.is_string())
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect()
        })
        .unwrap_or_default();
    Value::Object(tags)
}

/// String at a dotted path, e.g. `properties.loginServer`
pub(crate) fn str_at<'a>(body: &'a Value, path: &str) -> Option<&'a str> {
    value_at(body, path).and_then(|v| v.as_str())
}

pub(crate) fn value_at<'a>(body: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(body, |current, key| current.get(key))
}

/// List of strings at a dotted path; missing is empty
pub(crate) fn string_list_at(body: &Value, path: &str) -> Value {
    let items = value_at(body, path)
        .and_then(|v| v.as_array())
        .map(|items| items.iter().filter(|v| v.is_string()).cloned().collect())
        .unwrap_or_default();
    Value::Array(items)
}

/// Attribute map from `(name, value)` pairs, skipping `null`s
pub(crate) fn attributes<I>(pairs: I) -> Attributes
where
    I: IntoIterator<Item = (&'static str, Value)>,
{
    pairs
        .into_iter()
        .filter(|(_, v)| !v.is_null())
        .map(|(k, v)| (k.to_string(), v))
        .collect()
}
