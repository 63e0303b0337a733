//! Container registries (`Microsoft.ContainerRegistry/registries`)

use super::{attributes, expand_tags, flatten_tags, str_at, value_at};
use crate::azure::client::ArmClient;
use crate::error::{ArmError, Result};
use crate::lro::send_and_wait;
use crate::resource::schema::{Attribute, AttributeType, Attributes, DefaultValue, Schema};
use crate::resource::state::{normalize_id_casing, ResourceState, StateUpgrader};
use crate::resource::validate::{self, Validator};
use crate::resource::{DataSourceDescriptor, ResourceDescriptor};
use crate::resource_id::{IdFormat, ResourceId};
use crate::timeouts::OperationContext;
use async_trait::async_trait;
use reqwest::Method;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;

const API_VERSION: &str = "2023-07-01";

pub const REGISTRY_ID: IdFormat = IdFormat::new(
    "Microsoft.ContainerRegistry",
    &["registries"],
    "/subscriptions/{subscriptionId}/resourceGroups/{resourceGroupName}/providers/Microsoft.ContainerRegistry/registries/{registryName}",
);

const SKUS: &[&str] = &["Basic", "Standard", "Premium"];

static NAME_CHECKS: &[Validator] = &[Validator::Func(validate::container_registry_name)];
static RESOURCE_GROUP_CHECKS: &[Validator] = &[Validator::Func(validate::resource_group_name)];
static SKU_CHECKS: &[Validator] = &[Validator::OneOf(SKUS)];
static TAG_CHECKS: &[Validator] = &[Validator::Func(validate::tags)];

static SCHEMA: Schema = Schema {
    version: 1,
    attributes: &[
        Attribute::required("name", AttributeType::String)
            .force_new()
            .validate(NAME_CHECKS),
        Attribute::required("resource_group_name", AttributeType::String)
            .force_new()
            .validate(RESOURCE_GROUP_CHECKS),
        Attribute::required("location", AttributeType::String)
            .force_new()
            .normalize(validate::normalize_location),
        Attribute::required("sku", AttributeType::String)
            .validate(SKU_CHECKS)
            .normalize(normalize_sku),
        Attribute::optional("admin_enabled", AttributeType::Bool).default_value(DefaultValue::Bool(false)),
        Attribute::optional("public_network_access_enabled", AttributeType::Bool)
            .default_value(DefaultValue::Bool(true)),
        Attribute::optional("zone_redundancy_enabled", AttributeType::Bool)
            .force_new()
            .default_value(DefaultValue::Bool(false)),
        Attribute::optional("tags", AttributeType::Map).validate(TAG_CHECKS),
        Attribute::computed("login_server", AttributeType::String),
        Attribute::computed("admin_username", AttributeType::String),
        Attribute::computed("admin_password", AttributeType::String).sensitive(),
    ],
};

static DATA_SCHEMA: Schema = Schema {
    version: 0,
    attributes: &[
        Attribute::required("name", AttributeType::String).validate(NAME_CHECKS),
        Attribute::required("resource_group_name", AttributeType::String).validate(RESOURCE_GROUP_CHECKS),
        Attribute::computed("location", AttributeType::String),
        Attribute::computed("sku", AttributeType::String),
        Attribute::computed("admin_enabled", AttributeType::Bool),
        Attribute::computed("login_server", AttributeType::String),
        Attribute::computed("admin_username", AttributeType::String),
        Attribute::computed("admin_password", AttributeType::String).sensitive(),
        Attribute::computed("tags", AttributeType::Map),
    ],
};

static UPGRADERS: &[StateUpgrader] = &[StateUpgrader {
    from_version: 0,
    upgrade: upgrade_v0_to_v1,
}];

/// Version 0 stored IDs with whatever casing the API returned
fn upgrade_v0_to_v1(state: &mut ResourceState) -> Result<()> {
    normalize_id_casing(state, &REGISTRY_ID)
}

#[derive(Debug, Clone, Deserialize)]
pub struct ContainerRegistryConfig {
    pub name: String,
    pub resource_group_name: String,
    pub location: String,
    pub sku: String,
    pub admin_enabled: bool,
    pub public_network_access_enabled: bool,
    pub zone_redundancy_enabled: bool,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ContainerRegistryLookup {
    pub name: String,
    pub resource_group_name: String,
}

fn enabled(flag: bool) -> &'static str {
    if flag {
        "Enabled"
    } else {
        "Disabled"
    }
}

/// Request body shared by create (PUT) and update (PATCH)
fn expand(config: &ContainerRegistryConfig, include_create_only: bool) -> Value {
    let mut body = json!({
        "sku": { "name": canonical_sku(&config.sku) },
        "tags": expand_tags(&config.tags),
        "properties": {
            "adminUserEnabled": config.admin_enabled,
            "publicNetworkAccess": enabled(config.public_network_access_enabled),
        },
    });

    if include_create_only {
        body["location"] = json!(config.location);
        body["properties"]["zoneRedundancy"] = json!(enabled(config.zone_redundancy_enabled));
    }
    body
}

fn canonical_sku(sku: &str) -> &str {
    SKUS.iter()
        .copied()
        .find(|s| s.eq_ignore_ascii_case(sku))
        .unwrap_or(sku)
}

fn normalize_sku(sku: &str) -> String {
    canonical_sku(sku).to_string()
}

fn flatten(id: &ResourceId, body: &Value) -> Attributes {
    let flag = |path: &str, default: bool| {
        str_at(body, path)
            .map(|v| v.eq_ignore_ascii_case("Enabled"))
            .unwrap_or(default)
    };

    attributes([
        ("name", json!(str_at(body, "name").unwrap_or(id.name()))),
        ("resource_group_name", json!(id.resource_group())),
        (
            "location",
            json!(str_at(body, "location").map(validate::normalize_location)),
        ),
        ("sku", json!(str_at(body, "sku.name"))),
        (
            "admin_enabled",
            json!(value_at(body, "properties.adminUserEnabled")
                .and_then(|v| v.as_bool())
                .unwrap_or(false)),
        ),
        (
            "public_network_access_enabled",
            json!(flag("properties.publicNetworkAccess", true)),
        ),
        (
            "zone_redundancy_enabled",
            json!(flag("properties.zoneRedundancy", false)),
        ),
        ("login_server", json!(str_at(body, "properties.loginServer"))),
        ("tags", flatten_tags(body)),
    ])
}

/// GET the registry and, when the admin user is on, its credentials
async fn get(client: &ArmClient, id: &ResourceId) -> Result<Attributes> {
    let response = client.get(&client.resource_url(id, API_VERSION)).await?;
    let mut attrs = flatten(id, &response.body);

    if attrs.get("admin_enabled") == Some(&Value::Bool(true)) {
        let credentials = client
            .post(&client.action_url(id, "listCredentials", API_VERSION), None)
            .await?;
        if let Some(username) = str_at(&credentials.body, "username") {
            attrs.insert("admin_username".to_string(), json!(username));
        }
        if let Some(password) = credentials
            .body
            .get("passwords")
            .and_then(|p| p.get(0))
            .and_then(|p| p.get("value"))
        {
            attrs.insert("admin_password".to_string(), password.clone());
        }
    }

    Ok(attrs)
}

pub struct ContainerRegistryResource;

#[async_trait]
impl ResourceDescriptor for ContainerRegistryResource {
    type Config = ContainerRegistryConfig;

    fn type_name(&self) -> &'static str {
        "azurerm_container_registry"
    }

    fn display_name(&self) -> &'static str {
        "Container Registry"
    }

    fn schema(&self) -> &'static Schema {
        &SCHEMA
    }

    fn id_format(&self) -> &'static IdFormat {
        &REGISTRY_ID
    }

    fn upgraders(&self) -> &'static [StateUpgrader] {
        UPGRADERS
    }

    fn check(&self, config: &ContainerRegistryConfig) -> Result<()> {
        if config.zone_redundancy_enabled && !config.sku.eq_ignore_ascii_case("Premium") {
            return Err(ArmError::validation(
                "zone_redundancy_enabled",
                "can only be set to true for a Premium SKU",
            ));
        }
        Ok(())
    }

    fn id(&self, subscription_id: &str, config: &ContainerRegistryConfig) -> ResourceId {
        REGISTRY_ID.build(subscription_id, &config.resource_group_name, &[&config.name])
    }

    /// Registry names are global, so a free name in this subscription can still be taken
    async fn pre_create(
        &self,
        client: &ArmClient,
        _ctx: &OperationContext,
        config: &ContainerRegistryConfig,
    ) -> Result<()> {
        let url = client.subscription_url(
            "/providers/Microsoft.ContainerRegistry/checkNameAvailability",
            API_VERSION,
        );
        let body = json!({
            "name": config.name,
            "type": "Microsoft.ContainerRegistry/registries",
        });

        let response = client.post(&url, Some(&body)).await?;
        let available = response
            .body
            .get("nameAvailable")
            .and_then(|v| v.as_bool())
            .unwrap_or(true);

        if available {
            Ok(())
        } else {
            let reason = str_at(&response.body, "message").unwrap_or("the name is already in use");
            Err(ArmError::validation("name", reason))
        }
    }

    async fn create(
        &self,
        client: &ArmClient,
        ctx: &OperationContext,
        id: &ResourceId,
        config: &ContainerRegistryConfig,
    ) -> Result<()> {
        let body = expand(config, true);
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
        config: &ContainerRegistryConfig,
        _changed: &[&'static str],
    ) -> Result<()> {
        let body = expand(config, false);
        send_and_wait(client, ctx, Method::PATCH, &client.resource_url(id, API_VERSION), Some(&body)).await?;
        Ok(())
    }

    async fn delete(&self, client: &ArmClient, ctx: &OperationContext, id: &ResourceId) -> Result<()> {
        send_and_wait(client, ctx, Method::DELETE, &client.resource_url(id, API_VERSION), None).await?;
        Ok(())
    }
}

pub struct ContainerRegistryDataSource;

#[async_trait]
impl DataSourceDescriptor for ContainerRegistryDataSource {
    type Config = ContainerRegistryLookup;

    fn type_name(&self) -> &'static str {
        "azurerm_container_registry"
    }

    fn display_name(&self) -> &'static str {
        "Container Registry"
    }

    fn schema(&self) -> &'static Schema {
        &DATA_SCHEMA
    }

    fn id(&self, subscription_id: &str, config: &ContainerRegistryLookup) -> ResourceId {
        REGISTRY_ID.build(subscription_id, &config.resource_group_name, &[&config.name])
    }

    async fn read(&self, client: &ArmClient, _ctx: &OperationContext, id: &ResourceId) -> Result<Attributes> {
        get(client, id).await
    }
}
