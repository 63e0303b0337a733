//! ARM Resource IDs
//!
//! Parses and formats Azure Resource Manager paths of the form
//! `/subscriptions/{sub}/resourceGroups/{rg}/providers/{ns}/{type}/{name}[/{childType}/{childName}...]`.
//!
//! Azure is inconsistent about the casing of type segments across API versions,
//! so every lookup by type name is case-insensitive. Formatting always emits the
//! canonical `subscriptions`/`resourceGroups`/`providers` keywords, which makes
//! `format(parse(s))` equal to `s` modulo casing of those keywords.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

const SUBSCRIPTIONS: &str = "subscriptions";
const RESOURCE_GROUPS: &str = "resourceGroups";
const PROVIDERS: &str = "providers";

/// Reasons a string is not a usable resource ID
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResourceIdError {
    #[error("resource ID was empty")]
    Empty,

    #[error("resource ID {input:?} contains an empty path segment")]
    EmptySegment { input: String },

    #[error("resource ID {input:?} has an odd number of path segments after the provider namespace")]
    OddSegmentCount { input: String },

    #[error("resource ID {input:?} does not start with a `subscriptions` segment")]
    MissingSubscription { input: String },

    #[error("resource ID {input:?} is missing the `resourceGroups` segment")]
    MissingResourceGroup { input: String },

    #[error("resource ID {input:?} expected `providers` after the resource group but found {found:?}")]
    MissingProviders { input: String, found: String },

    #[error("resource ID {input:?} names a provider namespace but no resource type")]
    MissingResourceType { input: String },

    #[error("resource ID {input:?} is not of the expected form {expected:?}")]
    WrongFormat { input: String, expected: String },
}

/// One `{type}/{name}` pair below the provider namespace
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub kind: String,
    pub name: String,
}

/// Structured decomposition of an ARM resource path
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ResourceId {
    subscription_id: String,
    resource_group: String,
    provider: Option<String>,
    segments: Vec<Segment>,
}

impl ResourceId {
    /// ID of a resource group
    pub fn resource_group_id(subscription_id: &str, resource_group: &str) -> Self {
        Self {
            subscription_id: subscription_id.to_string(),
            resource_group: resource_group.to_string(),
            provider: None,
            segments: Vec::new(),
        }
    }

    /// ID of a provider resource, with `path` listing `(type, name)` pairs top-down
    pub fn new(
        subscription_id: &str,
        resource_group: &str,
        provider: &str,
        path: &[(&str, &str)],
    ) -> Self {
        Self {
            subscription_id: subscription_id.to_string(),
            resource_group: resource_group.to_string(),
            provider: Some(provider.to_string()),
            segments: path
                .iter()
                .map(|(kind, name)| Segment {
                    kind: kind.to_string(),
                    name: name.to_string(),
                })
                .collect(),
        }
    }

    /// Parse an ARM path
    pub fn parse(input: &str) -> Result<Self, ResourceIdError> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(ResourceIdError::Empty);
        }

        let path = trimmed.trim_start_matches('/').trim_end_matches('/');
        let components: Vec<&str> = path.split('/').collect();

        if components.iter().any(|c| c.is_empty()) {
            return Err(ResourceIdError::EmptySegment {
                input: input.to_string(),
            });
        }

        if !components[0].eq_ignore_ascii_case(SUBSCRIPTIONS) || components.len() < 2 {
            return Err(ResourceIdError::MissingSubscription {
                input: input.to_string(),
            });
        }

        if components.len() < 4 || !components[2].eq_ignore_ascii_case(RESOURCE_GROUPS) {
            return Err(ResourceIdError::MissingResourceGroup {
                input: input.to_string(),
            });
        }

        let subscription_id = components[1].to_string();
        let resource_group = components[3].to_string();
        let rest = &components[4..];

        if rest.is_empty() {
            return Ok(Self::resource_group_id(&subscription_id, &resource_group));
        }

        if !rest[0].eq_ignore_ascii_case(PROVIDERS) {
            return Err(ResourceIdError::MissingProviders {
                input: input.to_string(),
                found: rest[0].to_string(),
            });
        }

        let Some(namespace) = rest.get(1) else {
            return Err(ResourceIdError::OddSegmentCount {
                input: input.to_string(),
            });
        };

        let pairs = &rest[2..];
        if pairs.is_empty() {
            return Err(ResourceIdError::MissingResourceType {
                input: input.to_string(),
            });
        }
        if pairs.len() % 2 != 0 {
            return Err(ResourceIdError::OddSegmentCount {
                input: input.to_string(),
            });
        }

        let segments = pairs
            .chunks(2)
            .map(|pair| Segment {
                kind: pair[0].to_string(),
                name: pair[1].to_string(),
            })
            .collect();

        Ok(Self {
            subscription_id,
            resource_group,
            provider: Some(namespace.to_string()),
            segments,
        })
    }

    pub fn subscription_id(&self) -> &str {
        &self.subscription_id
    }

    pub fn resource_group(&self) -> &str {
        &self.resource_group
    }

    /// Provider namespace, `None` for resource group IDs
    pub fn provider(&self) -> Option<&str> {
        self.provider.as_deref()
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Name stored under a type segment, matched case-insensitively
    pub fn name_for(&self, kind: &str) -> Option<&str> {
        self.segments
            .iter()
            .find(|s| s.kind.eq_ignore_ascii_case(kind))
            .map(|s| s.name.as_str())
    }

    /// Name of the object the ID points at
    pub fn name(&self) -> &str {
        self.segments
            .last()
            .map(|s| s.name.as_str())
            .unwrap_or(&self.resource_group)
    }

    /// Full type, e.g. `Microsoft.Network/virtualNetworks/subnets`
    pub fn resource_type(&self) -> String {
        match &self.provider {
            None => "Microsoft.Resources/resourceGroups".to_string(),
            Some(ns) => {
                let mut out = ns.clone();
                for segment in &self.segments {
                    out.push('/');
                    out.push_str(&segment.kind);
                }
                out
            },
        }
    }

    /// ID of the enclosing object (the resource group for top-level resources)
    pub fn parent(&self) -> Option<Self> {
        match self.segments.len() {
            0 => None,
            1 => Some(Self::resource_group_id(
                &self.subscription_id,
                &self.resource_group,
            )),
            _ => {
                let mut parent = self.clone();
                parent.segments.pop();
                Some(parent)
            },
        }
    }

    /// Nested ID below this one
    pub fn child(&self, kind: &str, name: &str) -> Self {
        let mut child = self.clone();
        child.segments.push(Segment {
            kind: kind.to_string(),
            name: name.to_string(),
        });
        child
    }

    /// Human-readable description used in error messages and logs
    pub fn describe(&self, display_name: &str) -> String {
        format!(
            "{} {:?} (Resource Group {:?}, Subscription {:?})",
            display_name,
            self.name(),
            self.resource_group,
            self.subscription_id
        )
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "/{}/{}/{}/{}",
            SUBSCRIPTIONS, self.subscription_id, RESOURCE_GROUPS, self.resource_group
        )?;
        if let Some(ns) = &self.provider {
            write!(f, "/{}/{}", PROVIDERS, ns)?;
            for segment in &self.segments {
                write!(f, "/{}/{}", segment.kind, segment.name)?;
            }
        }
        Ok(())
    }
}

impl FromStr for ResourceId {
    type Err = ResourceIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for ResourceId {
    type Error = ResourceIdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<ResourceId> for String {
    fn from(id: ResourceId) -> Self {
        id.to_string()
    }
}

/// Expected shape of the IDs of one resource type
#[derive(Debug, Clone, Copy)]
pub struct IdFormat {
    /// Provider namespace, `None` for resource groups
    pub namespace: Option<&'static str>,
    /// Type segments top-down, e.g. `["virtualNetworks", "subnets"]`
    pub types: &'static [&'static str],
    /// Template shown when an ID does not match
    pub example: &'static str,
}

impl IdFormat {
    pub const RESOURCE_GROUP: IdFormat = IdFormat {
        namespace: None,
        types: &[],
        example: "/subscriptions/{subscriptionId}/resourceGroups/{resourceGroupName}",
    };

    pub const fn new(
        namespace: &'static str,
        types: &'static [&'static str],
        example: &'static str,
    ) -> Self {
        Self {
            namespace: Some(namespace),
            types,
            example,
        }
    }

    /// Check namespace and type sequence, ignoring case
    pub fn validate(&self, id: &ResourceId) -> Result<(), ResourceIdError> {
        let namespace_matches = match (self.namespace, id.provider()) {
            (None, None) => true,
            (Some(expected), Some(actual)) => expected.eq_ignore_ascii_case(actual),
            _ => false,
        };

        let types_match = id.segments().len() == self.types.len()
            && id
                .segments()
                .iter()
                .zip(self.types)
                .all(|(segment, expected)| segment.kind.eq_ignore_ascii_case(expected));

        if namespace_matches && types_match {
            Ok(())
        } else {
            Err(ResourceIdError::WrongFormat {
                input: id.to_string(),
                expected: self.example.to_string(),
            })
        }
    }

    /// Parse and validate in one step
    pub fn parse(&self, input: &str) -> Result<ResourceId, ResourceIdError> {
        let id = ResourceId::parse(input)?;
        self.validate(&id).map_err(|_| ResourceIdError::WrongFormat {
            input: input.to_string(),
            expected: self.example.to_string(),
        })?;
        Ok(id)
    }

    /// Build an ID of this format from names given top-down
    pub fn build(&self, subscription_id: &str, resource_group: &str, names: &[&str]) -> ResourceId {
        match self.namespace {
            None => ResourceId::resource_group_id(subscription_id, resource_group),
            Some(ns) => {
                let path: Vec<(&str, &str)> = self
                    .types
                    .iter()
                    .copied()
                    .zip(names.iter().copied())
                    .collect();
                ResourceId::new(subscription_id, resource_group, ns, &path)
            },
        }
    }

    /// Rewrite namespace and type segments to their canonical casing
    pub fn normalize(&self, id: &ResourceId) -> Result<ResourceId, ResourceIdError> {
        self.validate(id)?;
        let names: Vec<&str> = id.segments().iter().map(|s| s.name.as_str()).collect();
        Ok(self.build(id.subscription_id(), id.resource_group(), &names))
    }
}
