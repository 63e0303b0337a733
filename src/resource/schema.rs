//! Attribute schemas
//!
//! A [`Schema`] declares every attribute a resource type accepts or reports.
//! Declarations are `const` so each service keeps its schema in a `static`.

use super::validate::Validator;
use crate::error::{ArmError, Result};
use serde_json::{Map, Value};

pub type Attributes = Map<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttributeType {
    String,
    Bool,
    /// List of strings
    List,
    /// String-to-string map
    Map,
}

impl AttributeType {
    fn matches(&self, value: &Value) -> bool {
        match self {
            Self::String => value.is_string(),
            Self::Bool => value.is_boolean(),
            Self::List => value
                .as_array()
                .is_some_and(|items| items.iter().all(Value::is_string)),
            Self::Map => value
                .as_object()
                .is_some_and(|map| map.values().all(Value::is_string)),
        }
    }

    pub fn describe(&self) -> &'static str {
        match self {
            Self::String => "a string",
            Self::Bool => "a boolean",
            Self::List => "a list of strings",
            Self::Map => "a map of strings",
        }
    }
}

/// Const-friendly default values
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DefaultValue {
    Bool(bool),
}

impl DefaultValue {
    pub fn to_value(self) -> Value {
        match self {
            Self::Bool(b) => Value::Bool(b),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Attribute {
    pub name: &'static str,
    pub kind: AttributeType,
    pub required: bool,
    pub optional: bool,
    pub computed: bool,
    /// Changing the value means replacing the remote object
    pub force_new: bool,
    /// Hidden from `show` output
    pub sensitive: bool,
    pub default: Option<DefaultValue>,
    /// Minimum number of list elements
    pub min_items: usize,
    /// Run against the value, or each element for lists
    pub validators: &'static [Validator],
    /// Applied to string values (and list elements) before comparison
    pub normalize: Option<fn(&str) -> String>,
}

impl Attribute {
    const fn base(name: &'static str, kind: AttributeType) -> Self {
        Self {
            name,
            kind,
            required: false,
            optional: false,
            computed: false,
            force_new: false,
            sensitive: false,
            default: None,
            min_items: 0,
            validators: &[],
            normalize: None,
        }
    }

    pub const fn required(name: &'static str, kind: AttributeType) -> Self {
        Self {
            required: true,
            ..Self::base(name, kind)
        }
    }

    pub const fn optional(name: &'static str, kind: AttributeType) -> Self {
        Self {
            optional: true,
            ..Self::base(name, kind)
        }
    }

    /// Reported by the API, never set in configuration
    pub const fn computed(name: &'static str, kind: AttributeType) -> Self {
        Self {
            computed: true,
            ..Self::base(name, kind)
        }
    }

    pub const fn force_new(self) -> Self {
        Self {
            force_new: true,
            ..self
        }
    }

    pub const fn sensitive(self) -> Self {
        Self {
            sensitive: true,
            ..self
        }
    }

    pub const fn default_value(self, default: DefaultValue) -> Self {
        Self {
            default: Some(default),
            ..self
        }
    }

    pub const fn min_items(self, min_items: usize) -> Self {
        Self { min_items, ..self }
    }

    pub const fn validate(self, validators: &'static [Validator]) -> Self {
        Self { validators, ..self }
    }

    pub const fn normalize(self, normalize: fn(&str) -> String) -> Self {
        Self {
            normalize: Some(normalize),
            ..self
        }
    }

    fn is_computed_only(&self) -> bool {
        self.computed && !self.required && !self.optional
    }

    fn check(&self, value: &Value) -> Result<()> {
        if !self.kind.matches(value) {
            return Err(ArmError::validation(
                self.name,
                format!("expected {}, got {}", self.kind.describe(), value),
            ));
        }

        if let Some(items) = value.as_array() {
            if items.len() < self.min_items {
                return Err(ArmError::validation(
                    self.name,
                    format!("at least {} item(s) required, got {}", self.min_items, items.len()),
                ));
            }
            for (i, item) in items.iter().enumerate() {
                for validator in self.validators {
                    validator
                        .check(item)
                        .map_err(|message| ArmError::validation(format!("{}.{}", self.name, i), message))?;
                }
            }
            return Ok(());
        }

        for validator in self.validators {
            validator
                .check(value)
                .map_err(|message| ArmError::validation(self.name, message))?;
        }
        Ok(())
    }

    fn normalized(&self, value: Value) -> Value {
        let Some(normalize) = self.normalize else {
            return value;
        };
        match value {
            Value::String(s) => Value::String(normalize(&s)),
            Value::Array(items) => Value::Array(
                items
                    .into_iter()
                    .map(|item| match item {
                        Value::String(s) => Value::String(normalize(&s)),
                        other => other,
                    })
                    .collect(),
            ),
            other => other,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Schema {
    /// Bumped whenever stored state needs an upgrader
    pub version: u32,
    pub attributes: &'static [Attribute],
}

impl Schema {
    pub fn attribute(&self, name: &str) -> Option<&Attribute> {
        self.attributes.iter().find(|a| a.name == name)
    }

    /// Validate configuration before any network call: rejects unknown and
    /// computed-only keys, checks types and validators, fills defaults and
    /// normalises values. `null` counts as unset.
    pub fn validate(&self, input: &Attributes) -> Result<Attributes> {
        for key in input.keys() {
            match self.attribute(key) {
                None => {
                    return Err(ArmError::validation(
                        key.clone(),
                        "is not a supported attribute",
                    ))
                },
                Some(attr) if attr.is_computed_only() && !input[key].is_null() => {
                    return Err(ArmError::validation(
                        key.clone(),
                        "is computed by the service and cannot be set",
                    ))
                },
                Some(_) => {},
            }
        }

        let mut output = Attributes::new();
        for attr in self.attributes {
            let value = input.get(attr.name).filter(|v| !v.is_null()).cloned();

            let value = match (value, attr.default) {
                (Some(v), _) => v,
                (None, Some(default)) => default.to_value(),
                (None, None) if attr.required => {
                    return Err(ArmError::validation(attr.name, "is required"));
                },
                (None, None) => continue,
            };

            attr.check(&value)?;
            output.insert(attr.name.to_string(), attr.normalized(value));
        }

        Ok(output)
    }

    /// Drop keys the schema doesn't declare and normalise the rest
    pub fn strip_undeclared(&self, attributes: Attributes) -> Attributes {
        attributes
            .into_iter()
            .filter_map(|(key, value)| {
                let attr = self.attribute(&key)?;
                Some((key, attr.normalized(value)))
            })
            .collect()
    }

    /// Configurable attributes whose desired value differs from `current`
    pub fn changed_attributes(&self, current: &Attributes, desired: &Attributes) -> Vec<&'static str> {
        self.attributes
            .iter()
            .filter(|a| !a.is_computed_only())
            .filter(|a| !values_equal(current.get(a.name), desired.get(a.name)))
            .map(|a| a.name)
            .collect()
    }

    /// Changed attributes that can only be applied by replacement
    pub fn force_new_changes(&self, current: &Attributes, desired: &Attributes) -> Vec<&'static str> {
        self.changed_attributes(current, desired)
            .into_iter()
            .filter(|name| self.attribute(name).is_some_and(|a| a.force_new))
            .collect()
    }

    /// Copy of `attributes` with sensitive values masked
    pub fn redact(&self, attributes: &Attributes) -> Attributes {
        attributes
            .iter()
            .map(|(key, value)| {
                let hidden = self.attribute(key).is_some_and(|a| a.sensitive);
                let value = if hidden {
                    Value::String("(sensitive)".to_string())
                } else {
                    value.clone()
                };
                (key.clone(), value)
            })
            .collect()
    }
}

/// Absent, `null` and empty collections compare equal
fn values_equal(a: Option<&Value>, b: Option<&Value>) -> bool {
    fn is_empty(v: Option<&Value>) -> bool {
        match v {
            None | Some(Value::Null) => true,
            Some(Value::Array(items)) => items.is_empty(),
            Some(Value::Object(map)) => map.is_empty(),
            _ => false,
        }
    }

    if is_empty(a) && is_empty(b) {
        return true;
    }
    a == b
}
