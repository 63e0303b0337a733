//! Resource groups (`Microsoft.Resources/resourceGroups`)

use super::{attributes, expand_tags, flatten_tags, str_at};
use crate::azure::client::ArmClient;
use crate::error::{ArmError, Result};
use crate::lro::send_and_wait;
use crate::resource::schema::{Attribute, AttributeType, Attributes, Schema};
use crate::resource::validate::{self, Validator};
use crate::resource::{DataSourceDescriptor, ResourceDescriptor};
use crate::resource_id::{IdFormat, ResourceId};
use crate::timeouts::{OperationContext, OperationTimeouts};
use async_trait::async_trait;
use reqwest::Method;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;

const API_VERSION: &str = "2022-09-01";

static NAME_CHECKS: &[Validator] = &[Validator::Func(validate::resource_group_name)];
static TAG_CHECKS: &[Validator] = &[Validator::Func(validate::tags)];

static SCHEMA: Schema = Schema {
    version: 0,
    attributes: &[
        Attribute::required("name", AttributeType::String)
            .force_new()
            .validate(NAME_CHECKS),
        Attribute::required("location", AttributeType::String)
            .force_new()
            .normalize(validate::normalize_location),
        Attribute::optional("tags", AttributeType::Map).validate(TAG_CHECKS),
    ],
};

static DATA_SCHEMA: Schema = Schema {
    version: 0,
    attributes: &[
        Attribute::required("name", AttributeType::String).validate(NAME_CHECKS),
        Attribute::computed("location", AttributeType::String),
        Attribute::computed("tags", AttributeType::Map),
    ],
};

#[derive(Debug, Clone, Deserialize)]
pub struct ResourceGroupConfig {
    pub name: String,
    pub location: String,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResourceGroupLookup {
    pub name: String,
}

async fn get(client: &ArmClient, id: &ResourceId) -> Result<Attributes> {
    let response = client.get(&client.resource_url(id, API_VERSION)).await?;
    Ok(flatten(id, &response.body))
}

fn flatten(id: &ResourceId, body: &Value) -> Attributes {
    attributes([
        ("name", json!(str_at(body, "name").unwrap_or(id.resource_group()))),
        (
            "location",
            json!(str_at(body, "location").map(validate::normalize_location)),
        ),
        ("tags", flatten_tags(body)),
    ])
}

pub struct ResourceGroupResource;

#[async_trait]
impl ResourceDescriptor for ResourceGroupResource {
    type Config = ResourceGroupConfig;

    fn type_name(&self) -> &'static str {
        "azurerm_resource_group"
    }

    fn display_name(&self) -> &'static str {
        "Resource Group"
    }

    fn schema(&self) -> &'static Schema {
        &SCHEMA
    }

    fn id_format(&self) -> &'static IdFormat {
        &IdFormat::RESOURCE_GROUP
    }

    fn timeouts(&self) -> OperationTimeouts {
        OperationTimeouts::minutes(90, 5, 90, 90)
    }

    fn id(&self, subscription_id: &str, config: &ResourceGroupConfig) -> ResourceId {
        ResourceId::resource_group_id(subscription_id, &config.name)
    }

    async fn create(
        &self,
        client: &ArmClient,
        ctx: &OperationContext,
        id: &ResourceId,
        config: &ResourceGroupConfig,
    ) -> Result<()> {
        let body = json!({
            "location": config.location,
            "tags": expand_tags(&config.tags),
        });
        send_and_wait(client, ctx, Method::PUT, &client.resource_url(id, API_VERSION), Some(&body)).await?;
        Ok(())
    }

    async fn read(&self, client: &ArmClient, _ctx: &OperationContext, id: &ResourceId) -> Result<Attributes> {
        get(client, id).await
    }

    async fn update(
        &self,
        client: &ArmClient,
        ctx: &OperationContext,
        id: &ResourceId,
        config: &ResourceGroupConfig,
        changed: &[&'static str],
    ) -> Result<()> {
        if !changed.contains(&"tags") {
            return Ok(());
        }

        let body = json!({ "tags": expand_tags(&config.tags) });
        send_and_wait(client, ctx, Method::PATCH, &client.resource_url(id, API_VERSION), Some(&body)).await?;
        Ok(())
    }

    async fn delete(&self, client: &ArmClient, ctx: &OperationContext, id: &ResourceId) -> Result<()> {
        if client.features.resource_group.prevent_deletion_if_contains_resources {
            let url = client.action_url(id, "resources", API_VERSION);
            let nested: Vec<String> = client
                .list(&url)
                .await?
                .iter()
                .filter_map(|r| r.get("id").and_then(|v| v.as_str()))
                .map(|s| s.to_string())
                .collect();

            if !nested.is_empty() {
                return Err(ArmError::ResourceGroupNotEmpty { resources: nested });
            }
        }

        send_and_wait(client, ctx, Method::DELETE, &client.resource_url(id, API_VERSION), None).await?;
        Ok(())
    }
}

pub struct ResourceGroupDataSource;

#[async_trait]
impl DataSourceDescriptor for ResourceGroupDataSource {
    type Config = ResourceGroupLookup;

    fn type_name(&self) -> &'static str {
        "azurerm_resource_group"
    }

    fn display_name(&self) -> &'static str {
        "Resource Group"
    }

    fn schema(&self) -> &'static Schema {
        &DATA_SCHEMA
    }

    fn id(&self, subscription_id: &str, config: &ResourceGroupLookup) -> ResourceId {
        ResourceId::resource_group_id(subscription_id, &config.name)
    }

    async fn read(&self, client: &ArmClient, _ctx: &OperationContext, id: &ResourceId) -> Result<Attributes> {
        get(client, id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flatten_normalises_location() {
        let id = ResourceId::resource_group_id("sub", "acctestRG-1");
        let body = json!({
            "id": "/subscriptions/sub/resourceGroups/acctestRG-1",
            "name": "acctestRG-1",
            "location": "West Europe",
            "properties": {"provisioningState": "Succeeded"}
        });

        let attrs = flatten(&id, &body);
        assert_eq!(attrs["name"], json!("acctestRG-1"));
        assert_eq!(attrs["location"], json!("westeurope"));
        assert_eq!(attrs["tags"], json!({}));
    }

    #[test]
    fn test_schema_rejects_bad_names() {
        let input: Attributes = json!({"name": "bad.", "location": "westeurope"})
            .as_object()
            .cloned()
            .unwrap();
        let err = SCHEMA.validate(&input).unwrap_err();
        assert!(matches!(err, ArmError::Validation { ref field, .. } if field == "name"));
    }
}
