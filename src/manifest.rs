//! Declarative configuration
//!
//! A YAML file listing the resources that should exist and the data sources
//! they read from:
//!
//! ```yaml
//! data:
//!   - address: shared
//!     type: azurerm_resource_group
//!     attributes:
//!       name: shared-services
//!
//! resources:
//!   - address: registry
//!     type: azurerm_container_registry
//!     attributes:
//!       name: acmeregistry
//!       resource_group_name: ${data.shared.name}
//!       location: ${data.shared.location}
//!       sku: Premium
//!     timeouts:
//!       create: 1h
//! ```
//!
//! A string that consists of a single `${address.attribute}` (or
//! `${data.address.attribute}`) reference is replaced by that attribute of the
//! named resource or data source once it is known.

use crate::error::{ArmError, Result};
use crate::resource::{get_data_source, get_resource, Attributes};
use crate::timeouts::TimeoutOverrides;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::path::Path;

static ADDRESS_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_-]+$").expect("Invalid address regex"));

static REFERENCE_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\$\{(?:(data)\.)?([A-Za-z0-9_-]+)\.([A-Za-z0-9_]+)\}$").expect("Invalid reference regex")
});

/// One managed resource declaration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceBlock {
    pub address: String,
    #[serde(rename = "type")]
    pub resource_type: String,
    #[serde(default)]
    pub attributes: Attributes,
    #[serde(default)]
    pub timeouts: TimeoutOverrides,
}

/// One data source declaration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataBlock {
    pub address: String,
    #[serde(rename = "type")]
    pub data_type: String,
    #[serde(default)]
    pub attributes: Attributes,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    #[serde(default)]
    pub data: Vec<DataBlock>,
    #[serde(default)]
    pub resources: Vec<ResourceBlock>,
}

/// Target of a `${...}` reference
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reference {
    Resource { address: String, attribute: String },
    Data { address: String, attribute: String },
}

impl Reference {
    pub fn parse(value: &str) -> Option<Self> {
        let caps = REFERENCE_REGEX.captures(value)?;
        let address = caps[2].to_string();
        let attribute = caps[3].to_string();

        Some(if caps.get(1).is_some() {
            Self::Data { address, attribute }
        } else {
            Self::Resource { address, attribute }
        })
    }
}

impl Manifest {
    /// Load and check a manifest file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ArmError::Manifest(format!("reading {}: {}", path.display(), e)))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        let manifest: Self =
            serde_yaml::from_str(content).map_err(|e| ArmError::Manifest(e.to_string()))?;
        manifest.check()?;
        Ok(manifest)
    }

    pub fn resource(&self, address: &str) -> Option<&ResourceBlock> {
        self.resources.iter().find(|r| r.address == address)
    }

    /// Addresses well-formed and unique, types known, references resolvable
    fn check(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for block in &self.resources {
            check_address(&block.address)?;
            if !seen.insert(block.address.as_str()) {
                return Err(ArmError::Manifest(format!(
                    "resource address {:?} is declared twice",
                    block.address
                )));
            }
            if get_resource(&block.resource_type).is_none() {
                return Err(ArmError::Manifest(format!(
                    "{}: unknown resource type {:?}",
                    block.address, block.resource_type
                )));
            }
        }

        let mut seen_data = HashSet::new();
        for block in &self.data {
            check_address(&block.address)?;
            if !seen_data.insert(block.address.as_str()) {
                return Err(ArmError::Manifest(format!(
                    "data source address {:?} is declared twice",
                    block.address
                )));
            }
            if get_data_source(&block.data_type).is_none() {
                return Err(ArmError::Manifest(format!(
                    "data.{}: unknown data source type {:?}",
                    block.address, block.data_type
                )));
            }
        }

        // Resources may only refer to data sources and to resources declared before them
        for (index, block) in self.resources.iter().enumerate() {
            for reference in references(&block.attributes) {
                let known = match &reference {
                    Reference::Data { address, .. } => seen_data.contains(address.as_str()),
                    Reference::Resource { address, .. } => {
                        self.resources[..index].iter().any(|r| &r.address == address)
                    },
                };
                if !known {
                    return Err(ArmError::Manifest(format!(
                        "{}: {:?} refers to something not declared before it",
                        block.address, reference
                    )));
                }
            }
        }

        for block in &self.data {
            if !references(&block.attributes).is_empty() {
                return Err(ArmError::Manifest(format!(
                    "data.{}: data source attributes cannot contain references",
                    block.address
                )));
            }
        }

        Ok(())
    }
}

fn check_address(address: &str) -> Result<()> {
    if ADDRESS_REGEX.is_match(address) {
        Ok(())
    } else {
        Err(ArmError::Manifest(format!(
            "address {address:?} may only contain letters, digits, underscores and hyphens"
        )))
    }
}

/// Every reference in an attribute map, including inside lists
pub fn references(attributes: &Attributes) -> Vec<Reference> {
    fn collect(value: &Value, out: &mut Vec<Reference>) {
        match value {
            Value::String(s) => out.extend(Reference::parse(s)),
            Value::Array(items) => items.iter().for_each(|v| collect(v, out)),
            Value::Object(map) => map.values().for_each(|v| collect(v, out)),
            _ => {},
        }
    }

    let mut out = Vec::new();
    attributes.values().for_each(|v| collect(v, &mut out));
    out
}

/// Replace references using `lookup`. Returns the names of top-level
/// attributes that could not be resolved yet; those keep the reference text.
pub fn resolve<F>(attributes: &Attributes, lookup: F) -> (Attributes, Vec<String>)
where
    F: Fn(&Reference) -> Option<Value>,
{
    fn substitute<F: Fn(&Reference) -> Option<Value>>(value: &Value, lookup: &F, unresolved: &mut bool) -> Value {
        match value {
            Value::String(s) => match Reference::parse(s) {
                Some(reference) => lookup(&reference).unwrap_or_else(|| {
                    *unresolved = true;
                    value.clone()
                }),
                None => value.clone(),
            },
            Value::Array(items) => Value::Array(items.iter().map(|v| substitute(v, lookup, unresolved)).collect()),
            Value::Object(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), substitute(v, lookup, unresolved)))
                    .collect(),
            ),
            other => other.clone(),
        }
    }

    let mut resolved = Attributes::new();
    let mut pending = Vec::new();
    for (key, value) in attributes {
        let mut unresolved = false;
        resolved.insert(key.clone(), substitute(value, &lookup, &mut unresolved));
        if unresolved {
            pending.push(key.clone());
        }
    }
    (resolved, pending)
}
