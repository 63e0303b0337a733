//! Reusable attribute validators and normalisers

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::net::{Ipv4Addr, Ipv6Addr};

static RESOURCE_GROUP_NAME_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[-\w.()]{1,90}$").expect("Invalid resource group name regex"));

static CONTAINER_REGISTRY_NAME_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-zA-Z0-9]{5,50}$").expect("Invalid registry name regex"));

static VIRTUAL_NETWORK_NAME_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[a-zA-Z0-9][a-zA-Z0-9_.-]{0,62}[a-zA-Z0-9_]$").expect("Invalid virtual network name regex")
});

static SUBNET_NAME_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[a-zA-Z0-9]([a-zA-Z0-9_.-]{0,78}[a-zA-Z0-9_])?$").expect("Invalid subnet name regex")
});

static SERVICE_ENDPOINT_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^Microsoft\.[A-Za-z]+(\.[A-Za-z]+)?$").expect("Invalid service endpoint regex")
});

/// A check run against an attribute value (each element, for lists)
#[derive(Debug, Clone, Copy)]
pub enum Validator {
    Func(fn(&Value) -> Result<(), String>),
    /// Value must be one of the listed strings, ignoring case
    OneOf(&'static [&'static str]),
}

impl Validator {
    pub fn check(&self, value: &Value) -> Result<(), String> {
        match self {
            Self::Func(f) => f(value),
            Self::OneOf(allowed) => {
                let s = as_str(value)?;
                if allowed.iter().any(|a| a.eq_ignore_ascii_case(s)) {
                    Ok(())
                } else {
                    Err(format!("expected one of {allowed:?}, got {s:?}"))
                }
            },
        }
    }
}

fn as_str(value: &Value) -> Result<&str, String> {
    value
        .as_str()
        .ok_or_else(|| format!("expected a string, got {value}"))
}

/// 1-90 characters: alphanumerics, underscores, parentheses, hyphens and periods, not ending in a period
pub fn resource_group_name(value: &Value) -> Result<(), String> {
    let name = as_str(value)?;

    if !RESOURCE_GROUP_NAME_REGEX.is_match(name) {
        return Err(format!(
            "{name:?} may only contain alphanumerics, underscores, parentheses, hyphens and periods and must be 1-90 characters"
        ));
    }
    if name.ends_with('.') {
        return Err(format!("{name:?} cannot end with a period"));
    }
    Ok(())
}

/// 5-50 alphanumerics
pub fn container_registry_name(value: &Value) -> Result<(), String> {
    let name = as_str(value)?;

    if CONTAINER_REGISTRY_NAME_REGEX.is_match(name) {
        Ok(())
    } else {
        Err(format!(
            "{name:?} may only contain alphanumeric characters and must be between 5 and 50 characters"
        ))
    }
}

/// 2-64 characters, starting alphanumeric and ending alphanumeric or underscore
pub fn virtual_network_name(value: &Value) -> Result<(), String> {
    let name = as_str(value)?;

    if VIRTUAL_NETWORK_NAME_REGEX.is_match(name) {
        Ok(())
    } else {
        Err(format!(
            "{name:?} must be 2-64 characters of alphanumerics, underscores, periods and hyphens, start with an alphanumeric and end with an alphanumeric or underscore"
        ))
    }
}

/// 1-80 characters, starting alphanumeric and ending alphanumeric or underscore
pub fn subnet_name(value: &Value) -> Result<(), String> {
    let name = as_str(value)?;

    if SUBNET_NAME_REGEX.is_match(name) {
        Ok(())
    } else {
        Err(format!(
            "{name:?} must be 1-80 characters of alphanumerics, underscores, periods and hyphens, start with an alphanumeric and end with an alphanumeric or underscore"
        ))
    }
}

/// IPv4 or IPv6 network in CIDR notation, e.g. `10.0.0.0/16`
pub fn cidr(value: &Value) -> Result<(), String> {
    let s = as_str(value)?;
    let (address, prefix) = s
        .split_once('/')
        .ok_or_else(|| format!("{s:?} is not in CIDR notation (missing /prefix)"))?;
    let prefix: u8 = prefix
        .parse()
        .map_err(|_| format!("{s:?} has an invalid prefix length"))?;

    let max_prefix = if address.parse::<Ipv4Addr>().is_ok() {
        32
    } else if address.parse::<Ipv6Addr>().is_ok() {
        128
    } else {
        return Err(format!("{s:?} does not start with an IP address"));
    };

    if prefix > max_prefix {
        return Err(format!("{s:?} has a prefix longer than {max_prefix}"));
    }
    Ok(())
}

/// IPv4 or IPv6 address
pub fn ip_address(value: &Value) -> Result<(), String> {
    let s = as_str(value)?;
    if s.parse::<Ipv4Addr>().is_ok() || s.parse::<Ipv6Addr>().is_ok() {
        Ok(())
    } else {
        Err(format!("{s:?} is not a valid IP address"))
    }
}

pub fn uuid(value: &Value) -> Result<(), String> {
    let s = as_str(value)?;
    uuid::Uuid::parse_str(s)
        .map(|_| ())
        .map_err(|_| format!("{s:?} is not a valid UUID"))
}

/// `Microsoft.Storage`-style service endpoint names
pub fn service_endpoint(value: &Value) -> Result<(), String> {
    let s = as_str(value)?;

    if SERVICE_ENDPOINT_REGEX.is_match(s) {
        Ok(())
    } else {
        Err(format!("{s:?} is not a service endpoint such as \"Microsoft.Storage\""))
    }
}

/// At most 50 tags, keys up to 512 characters, values up to 256
pub fn tags(value: &Value) -> Result<(), String> {
    let Some(map) = value.as_object() else {
        return Err(format!("expected a map, got {value}"));
    };

    if map.len() > 50 {
        return Err(format!("a maximum of 50 tags can be applied, got {}", map.len()));
    }
    for (key, v) in map {
        if key.len() > 512 {
            return Err(format!("tag key {key:?} exceeds 512 characters"));
        }
        if v.as_str().is_some_and(|s| s.len() > 256) {
            return Err(format!("value of tag {key:?} exceeds 256 characters"));
        }
    }
    Ok(())
}

/// Canonical location form: lower-case without spaces, so `West Europe` == `westeurope`
pub fn normalize_location(location: &str) -> String {
    location.replace(' ', "").to_lowercase()
}
