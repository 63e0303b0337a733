//! Virtual networks and their subnets (`Microsoft.Network`)
//!
//! Subnets are child objects of a virtual network, and ARM reports them in
//! both places. Virtual network updates therefore re-send whatever subnets
//! the service currently holds instead of the (empty) configured list.

use super::{attributes, expand_tags, flatten_tags, str_at, string_list_at, value_at};
use crate::azure::client::ArmClient;
use crate::error::Result;
use crate::lro::send_and_wait;
use crate::lro::state_change::StateChangeConf;
use crate::resource::schema::{Attribute, AttributeType, Attributes, Schema};
use crate::resource::state::{normalize_id_casing, ResourceState, StateUpgrader};
use crate::resource::validate::{self, Validator};
use crate::resource::ResourceDescriptor;
use crate::resource_id::{IdFormat, ResourceId};
use crate::timeouts::OperationContext;
use async_trait::async_trait;
use reqwest::Method;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;

const API_VERSION: &str = "2023-09-01";

pub const VIRTUAL_NETWORK_ID: IdFormat = IdFormat::new(
    "Microsoft.Network",
    &["virtualNetworks"],
    "/subscriptions/{subscriptionId}/resourceGroups/{resourceGroupName}/providers/Microsoft.Network/virtualNetworks/{virtualNetworkName}",
);

pub const SUBNET_ID: IdFormat = IdFormat::new(
    "Microsoft.Network",
    &["virtualNetworks", "subnets"],
    "/subscriptions/{subscriptionId}/resourceGroups/{resourceGroupName}/providers/Microsoft.Network/virtualNetworks/{virtualNetworkName}/subnets/{subnetName}",
);

static VNET_NAME_CHECKS: &[Validator] = &[Validator::Func(validate::virtual_network_name)];
static SUBNET_NAME_CHECKS: &[Validator] = &[Validator::Func(validate::subnet_name)];
static RESOURCE_GROUP_CHECKS: &[Validator] = &[Validator::Func(validate::resource_group_name)];
static CIDR_CHECKS: &[Validator] = &[Validator::Func(validate::cidr)];
static IP_CHECKS: &[Validator] = &[Validator::Func(validate::ip_address)];
static SERVICE_ENDPOINT_CHECKS: &[Validator] = &[Validator::Func(validate::service_endpoint)];
static TAG_CHECKS: &[Validator] = &[Validator::Func(validate::tags)];

static VIRTUAL_NETWORK_SCHEMA: Schema = Schema {
    version: 1,
    attributes: &[
        Attribute::required("name", AttributeType::String)
            .force_new()
            .validate(VNET_NAME_CHECKS),
        Attribute::required("resource_group_name", AttributeType::String)
            .force_new()
            .validate(RESOURCE_GROUP_CHECKS),
        Attribute::required("location", AttributeType::String)
            .force_new()
            .normalize(validate::normalize_location),
        Attribute::required("address_space", AttributeType::List)
            .min_items(1)
            .validate(CIDR_CHECKS),
        Attribute::optional("dns_servers", AttributeType::List).validate(IP_CHECKS),
        Attribute::optional("tags", AttributeType::Map).validate(TAG_CHECKS),
        Attribute::computed("guid", AttributeType::String),
    ],
};

static SUBNET_SCHEMA: Schema = Schema {
    version: 0,
    attributes: &[
        Attribute::required("name", AttributeType::String)
            .force_new()
            .validate(SUBNET_NAME_CHECKS),
        Attribute::required("resource_group_name", AttributeType::String)
            .force_new()
            .validate(RESOURCE_GROUP_CHECKS),
        Attribute::required("virtual_network_name", AttributeType::String)
            .force_new()
            .validate(VNET_NAME_CHECKS),
        Attribute::required("address_prefixes", AttributeType::List)
            .min_items(1)
            .validate(CIDR_CHECKS),
        Attribute::optional("service_endpoints", AttributeType::List).validate(SERVICE_ENDPOINT_CHECKS),
    ],
};

static VIRTUAL_NETWORK_UPGRADERS: &[StateUpgrader] = &[StateUpgrader {
    from_version: 0,
    upgrade: upgrade_virtual_network_v0_to_v1,
}];

fn upgrade_virtual_network_v0_to_v1(state: &mut ResourceState) -> Result<()> {
    normalize_id_casing(state, &VIRTUAL_NETWORK_ID)
}

// =============================================================================
// Virtual network
// =============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct VirtualNetworkConfig {
    pub name: String,
    pub resource_group_name: String,
    pub location: String,
    pub address_space: Vec<String>,
    #[serde(default)]
    pub dns_servers: Vec<String>,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
}

/// Apply the configured fields onto `body`, leaving everything else as is
fn merge_virtual_network(body: &mut Value, config: &VirtualNetworkConfig) {
    if !body.is_object() {
        *body = json!({});
    }
    body["location"] = json!(config.location);
    body["tags"] = expand_tags(&config.tags);

    if !body.get("properties").is_some_and(|p| p.is_object()) {
        body["properties"] = json!({});
    }
    body["properties"]["addressSpace"] = json!({ "addressPrefixes": config.address_space });
    body["properties"]["dhcpOptions"] = json!({ "dnsServers": config.dns_servers });
}

fn flatten_virtual_network(id: &ResourceId, body: &Value) -> Attributes {
    attributes([
        ("name", json!(str_at(body, "name").unwrap_or(id.name()))),
        ("resource_group_name", json!(id.resource_group())),
        (
            "location",
            json!(str_at(body, "location").map(validate::normalize_location)),
        ),
        (
            "address_space",
            string_list_at(body, "properties.addressSpace.addressPrefixes"),
        ),
        ("dns_servers", string_list_at(body, "properties.dhcpOptions.dnsServers")),
        ("tags", flatten_tags(body)),
        ("guid", json!(str_at(body, "properties.resourceGuid"))),
    ])
}

pub struct VirtualNetworkResource;

#[async_trait]
impl ResourceDescriptor for VirtualNetworkResource {
    type Config = VirtualNetworkConfig;

    fn type_name(&self) -> &'static str {
        "azurerm_virtual_network"
    }

    fn display_name(&self) -> &'static str {
        "Virtual Network"
    }

    fn schema(&self) -> &'static Schema {
        &VIRTUAL_NETWORK_SCHEMA
    }

    fn id_format(&self) -> &'static IdFormat {
        &VIRTUAL_NETWORK_ID
    }

    fn upgraders(&self) -> &'static [StateUpgrader] {
        VIRTUAL_NETWORK_UPGRADERS
    }

    fn id(&self, subscription_id: &str, config: &VirtualNetworkConfig) -> ResourceId {
        VIRTUAL_NETWORK_ID.build(subscription_id, &config.resource_group_name, &[&config.name])
    }

    async fn create(
        &self,
        client: &ArmClient,
        ctx: &OperationContext,
        id: &ResourceId,
        config: &VirtualNetworkConfig,
    ) -> Result<()> {
        let mut body = json!({ "properties": { "subnets": [] } });
        merge_virtual_network(&mut body, config);
        send_and_wait(client, ctx, Method::PUT, &client.resource_url(id, API_VERSION), Some(&body)).await?;
        Ok(())
    }

    async fn read(&self, client: &ArmClient, _ctx: &OperationContext, id: &ResourceId) -> Result<Attributes> {
        let response = client.get(&client.resource_url(id, API_VERSION)).await?;
        Ok(flatten_virtual_network(id, &response.body))
    }

    async fn update(
        &self,
        client: &ArmClient,
        ctx: &OperationContext,
        id: &ResourceId,
        config: &VirtualNetworkConfig,
        _changed: &[&'static str],
    ) -> Result<()> {
        let url = client.resource_url(id, API_VERSION);
        let mut body = client.get(&url).await?.body;
        merge_virtual_network(&mut body, config);

        let subnets = value_at(&body, "properties.subnets")
            .and_then(|s| s.as_array())
            .map_or(0, |s| s.len());
        tracing::debug!("Re-sending {} existing subnets with {}", subnets, id.describe(self.display_name()));

        send_and_wait(client, ctx, Method::PUT, &url, Some(&body)).await?;
        Ok(())
    }

    async fn delete(&self, client: &ArmClient, ctx: &OperationContext, id: &ResourceId) -> Result<()> {
        send_and_wait(client, ctx, Method::DELETE, &client.resource_url(id, API_VERSION), None).await?;
        Ok(())
    }
}

// =============================================================================
// Subnet
// =============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct SubnetConfig {
    pub name: String,
    pub resource_group_name: String,
    pub virtual_network_name: String,
    pub address_prefixes: Vec<String>,
    #[serde(default)]
    pub service_endpoints: Vec<String>,
}

fn merge_subnet(body: &mut Value, config: &SubnetConfig) {
    if !body.is_object() {
        *body = json!({});
    }
    if !body.get("properties").is_some_and(|p| p.is_object()) {
        body["properties"] = json!({});
    }

    let properties = &mut body["properties"];
    if let Some(props) = properties.as_object_mut() {
        // The API accepts either form but rejects both at once
        props.remove("addressPrefix");
    }
    properties["addressPrefixes"] = json!(config.address_prefixes);
    properties["serviceEndpoints"] = Value::Array(
        config
            .service_endpoints
            .iter()
            .map(|service| json!({ "service": service }))
            .collect(),
    );
}

fn flatten_subnet(id: &ResourceId, body: &Value) -> Attributes {
    // Single-prefix subnets come back with `addressPrefix` only
    let address_prefixes = match str_at(body, "properties.addressPrefix") {
        Some(prefix) if value_at(body, "properties.addressPrefixes").is_none() => json!([prefix]),
        _ => string_list_at(body, "properties.addressPrefixes"),
    };

    let service_endpoints: Vec<&str> = value_at(body, "properties.serviceEndpoints")
        .and_then(|v| v.as_array())
        .map(|items| items.iter().filter_map(|e| str_at(e, "service")).collect())
        .unwrap_or_default();

    attributes([
        ("name", json!(str_at(body, "name").unwrap_or(id.name()))),
        ("resource_group_name", json!(id.resource_group())),
        ("virtual_network_name", json!(id.name_for("virtualNetworks"))),
        ("address_prefixes", address_prefixes),
        ("service_endpoints", json!(service_endpoints)),
    ])
}

pub struct SubnetResource;

#[async_trait]
impl ResourceDescriptor for SubnetResource {
    type Config = SubnetConfig;

    fn type_name(&self) -> &'static str {
        "azurerm_subnet"
    }

    fn display_name(&self) -> &'static str {
        "Subnet"
    }

    fn schema(&self) -> &'static Schema {
        &SUBNET_SCHEMA
    }

    fn id_format(&self) -> &'static IdFormat {
        &SUBNET_ID
    }

    fn id(&self, subscription_id: &str, config: &SubnetConfig) -> ResourceId {
        SUBNET_ID.build(
            subscription_id,
            &config.resource_group_name,
            &[&config.virtual_network_name, &config.name],
        )
    }

    async fn create(
        &self,
        client: &ArmClient,
        ctx: &OperationContext,
        id: &ResourceId,
        config: &SubnetConfig,
    ) -> Result<()> {
        let mut body = json!({});
        merge_subnet(&mut body, config);
        send_and_wait(client, ctx, Method::PUT, &client.resource_url(id, API_VERSION), Some(&body)).await?;
        Ok(())
    }

    async fn read(&self, client: &ArmClient, _ctx: &OperationContext, id: &ResourceId) -> Result<Attributes> {
        let response = client.get(&client.resource_url(id, API_VERSION)).await?;
        Ok(flatten_subnet(id, &response.body))
    }

    async fn update(
        &self,
        client: &ArmClient,
        ctx: &OperationContext,
        id: &ResourceId,
        config: &SubnetConfig,
        _changed: &[&'static str],
    ) -> Result<()> {
        let url = client.resource_url(id, API_VERSION);
        let mut body = client.get(&url).await?.body;
        merge_subnet(&mut body, config);
        send_and_wait(client, ctx, Method::PUT, &url, Some(&body)).await?;
        Ok(())
    }

    async fn delete(&self, client: &ArmClient, ctx: &OperationContext, id: &ResourceId) -> Result<()> {
        let url = client.resource_url(id, API_VERSION);
        send_and_wait(client, ctx, Method::DELETE, &url, None).await?;

        if !client.features.subnet.wait_for_deletion {
            return Ok(());
        }

        // The parent network can keep reporting the subnet for a while
        let wait = ctx.nested(format!("{} to disappear", id.describe(self.display_name())));
        let url = url.as_str();
        StateChangeConf::new(&["Exists"], &["NotFound"])
            .poll_interval(client.poller.default_interval)
            .continuous_target_occurrence(2)
            .wait_for_state(&wait, move || async move {
                match client.get(url).await {
                    Ok(_) => Ok((Some(()), "Exists".to_string())),
                    Err(e) if e.is_not_found() => Ok((None, "NotFound".to_string())),
                    Err(e) => Err(e),
                }
            })
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vnet_config() -> VirtualNetworkConfig {
        VirtualNetworkConfig {
            name: "acctestvnet".to_string(),
            resource_group_name: "acctestRG-1".to_string(),
            location: "westeurope".to_string(),
            address_space: vec!["10.0.0.0/16".to_string()],
            dns_servers: vec!["10.0.0.4".to_string()],
            tags: BTreeMap::new(),
        }
    }

    #[test]
    fn test_merge_keeps_remote_subnets() {
        let mut body = json!({
            "id": "/subscriptions/sub/resourceGroups/acctestRG-1/providers/Microsoft.Network/virtualNetworks/acctestvnet",
            "location": "westeurope",
            "properties": {
                "addressSpace": {"addressPrefixes": ["10.1.0.0/16"]},
                "subnets": [{"name": "internal", "properties": {"addressPrefix": "10.1.2.0/24"}}]
            }
        });

        merge_virtual_network(&mut body, &vnet_config());

        assert_eq!(body["properties"]["addressSpace"]["addressPrefixes"], json!(["10.0.0.0/16"]));
        assert_eq!(body["properties"]["dhcpOptions"]["dnsServers"], json!(["10.0.0.4"]));
        assert_eq!(body["properties"]["subnets"][0]["name"], json!("internal"));
    }

    #[test]
    fn test_flatten_virtual_network() {
        let id = VIRTUAL_NETWORK_ID.build("sub", "acctestRG-1", &["acctestvnet"]);
        let body = json!({
            "name": "acctestvnet",
            "location": "West Europe",
            "properties": {
                "resourceGuid": "7a7b8a39-0c5c-4c7e-9a28-2b1d2f0f7e11",
                "addressSpace": {"addressPrefixes": ["10.0.0.0/16"]}
            }
        });

        let attrs = flatten_virtual_network(&id, &body);
        assert_eq!(attrs["location"], json!("westeurope"));
        assert_eq!(attrs["dns_servers"], json!([]));
        assert_eq!(attrs["guid"], json!("7a7b8a39-0c5c-4c7e-9a28-2b1d2f0f7e11"));
    }

    #[test]
    fn test_flatten_subnet_single_prefix() {
        let id = SUBNET_ID.build("sub", "acctestRG-1", &["acctestvnet", "internal"]);
        let body = json!({
            "name": "internal",
            "properties": {
                "addressPrefix": "10.0.2.0/24",
                "serviceEndpoints": [{"service": "Microsoft.Storage", "locations": ["westeurope"]}]
            }
        });

        let attrs = flatten_subnet(&id, &body);
        assert_eq!(attrs["virtual_network_name"], json!("acctestvnet"));
        assert_eq!(attrs["address_prefixes"], json!(["10.0.2.0/24"]));
        assert_eq!(attrs["service_endpoints"], json!(["Microsoft.Storage"]));
    }

    #[test]
    fn test_merge_subnet_replaces_single_prefix() {
        let mut body = json!({"name": "internal", "properties": {"addressPrefix": "10.0.2.0/24"}});
        let config = SubnetConfig {
            name: "internal".to_string(),
            resource_group_name: "acctestRG-1".to_string(),
            virtual_network_name: "acctestvnet".to_string(),
            address_prefixes: vec!["10.0.2.0/24".to_string(), "10.0.3.0/24".to_string()],
            service_endpoints: vec![],
        };

        merge_subnet(&mut body, &config);
        assert!(body["properties"].get("addressPrefix").is_none());
        assert_eq!(body["properties"]["addressPrefixes"].as_array().unwrap().len(), 2);
        assert_eq!(body["properties"]["serviceEndpoints"], json!([]));
    }

    #[test]
    fn test_subnet_schema_checks_each_prefix() {
        let input: Attributes = json!({
            "name": "internal",
            "resource_group_name": "acctestRG-1",
            "virtual_network_name": "acctestvnet",
            "address_prefixes": ["10.0.2.0/24", "10.0.3.0/33"]
        })
        .as_object()
        .cloned()
        .unwrap();

        let err = SUBNET_SCHEMA.validate(&input).unwrap_err();
        assert!(err.to_string().contains("address_prefixes.1"), "{}", err);
    }

    #[test]
    fn test_subnet_id_is_nested() {
        let id = SubnetResource.id(
            "sub",
            &SubnetConfig {
                name: "internal".to_string(),
                resource_group_name: "rg".to_string(),
                virtual_network_name: "vnet".to_string(),
                address_prefixes: vec![],
                service_endpoints: vec![],
            },
        );
        assert_eq!(
            id.to_string(),
            "/subscriptions/sub/resourceGroups/rg/providers/Microsoft.Network/virtualNetworks/vnet/subnets/internal"
        );
        assert_eq!(id.parent().map(|p| p.name().to_string()), Some("vnet".to_string()));
    }
}
