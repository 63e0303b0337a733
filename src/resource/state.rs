//! Resource state
//!
//! What is known about each managed object after the last operation, and the
//! JSON file it is persisted to between runs.

use super::schema::Attributes;
use crate::error::{ArmError, Result};
use crate::resource_id::{IdFormat, ResourceId};
use crate::timeouts::TimeoutOverrides;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Version of the state file layout (not of any resource schema)
const STATE_FORMAT_VERSION: u32 = 1;

/// Last known state of one remote object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceState {
    #[serde(rename = "type")]
    pub resource_type: String,
    pub id: String,
    #[serde(default)]
    pub schema_version: u32,
    #[serde(default)]
    pub attributes: Attributes,
    #[serde(default, skip_serializing_if = "is_default_timeouts")]
    pub timeouts: TimeoutOverrides,
}

fn is_default_timeouts(t: &TimeoutOverrides) -> bool {
    *t == TimeoutOverrides::default()
}

impl ResourceState {
    pub fn new(resource_type: &str, id: &ResourceId, schema_version: u32, attributes: Attributes) -> Self {
        Self {
            resource_type: resource_type.to_string(),
            id: id.to_string(),
            schema_version,
            attributes,
            timeouts: TimeoutOverrides::default(),
        }
    }

    pub fn parsed_id(&self) -> Result<ResourceId> {
        Ok(ResourceId::parse(&self.id)?)
    }
}

/// Migrates state written by schema version `from_version` to `from_version + 1`
#[derive(Debug, Clone, Copy)]
pub struct StateUpgrader {
    pub from_version: u32,
    pub upgrade: fn(&mut ResourceState) -> Result<()>,
}

/// Run upgraders until `state` is at `current_version`
pub fn upgrade_state(
    mut state: ResourceState,
    current_version: u32,
    upgraders: &[StateUpgrader],
) -> Result<ResourceState> {
    if state.schema_version > current_version {
        return Err(ArmError::State(format!(
            "{} {:?} was written by a newer schema (version {}, this build knows {})",
            state.resource_type, state.id, state.schema_version, current_version
        )));
    }

    while state.schema_version < current_version {
        let from = state.schema_version;
        let upgrader = upgraders
            .iter()
            .find(|u| u.from_version == from)
            .ok_or_else(|| {
                ArmError::State(format!(
                    "no upgrader for {} state from schema version {}",
                    state.resource_type, from
                ))
            })?;

        (upgrader.upgrade)(&mut state)?;
        state.schema_version = from + 1;
        tracing::info!(
            "Upgraded {} {:?} state from schema version {} to {}",
            state.resource_type,
            state.id,
            from,
            from + 1
        );
    }

    Ok(state)
}

/// Rewrite the stored ID with canonical type-segment casing
pub fn normalize_id_casing(state: &mut ResourceState, format: &IdFormat) -> Result<()> {
    let id = format.normalize(&state.parsed_id()?)?;
    state.id = id.to_string();
    Ok(())
}

/// A state entry and the address it is declared under
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateEntry {
    pub address: String,
    #[serde(flatten)]
    pub state: ResourceState,
}

/// The state file: entries in the order they were created
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateStore {
    #[serde(default = "default_format_version")]
    pub version: u32,
    /// Incremented on every save
    #[serde(default)]
    pub serial: u64,
    #[serde(default)]
    pub resources: Vec<StateEntry>,
}

fn default_format_version() -> u32 {
    STATE_FORMAT_VERSION
}

impl Default for StateStore {
    fn default() -> Self {
        Self {
            version: STATE_FORMAT_VERSION,
            serial: 0,
            resources: Vec::new(),
        }
    }
}

impl StateStore {
    /// Default state file path
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("armctl").join("state.json"))
    }

    /// Load state from disk; a missing file is an empty state
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!("No state file at {}, starting empty", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .map_err(|e| ArmError::State(format!("reading {}: {}", path.display(), e)))?;
        let store: Self = serde_json::from_str(&content)
            .map_err(|e| ArmError::State(format!("parsing {}: {}", path.display(), e)))?;

        if store.version > STATE_FORMAT_VERSION {
            return Err(ArmError::State(format!(
                "{} uses state format {}, newer than supported ({})",
                path.display(),
                store.version,
                STATE_FORMAT_VERSION
            )));
        }
        Ok(store)
    }

    /// Save state to disk, replacing the previous file atomically
    pub fn save(&mut self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| ArmError::State(format!("creating {}: {}", parent.display(), e)))?;
        }

        self.serial += 1;
        let content = serde_json::to_string_pretty(self)?;

        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, content)
            .map_err(|e| ArmError::State(format!("writing {}: {}", tmp.display(), e)))?;
        std::fs::rename(&tmp, path)
            .map_err(|e| ArmError::State(format!("replacing {}: {}", path.display(), e)))?;

        tracing::debug!("Saved state serial {} to {}", self.serial, path.display());
        Ok(())
    }

    pub fn get(&self, address: &str) -> Option<&ResourceState> {
        self.resources
            .iter()
            .find(|e| e.address == address)
            .map(|e| &e.state)
    }

    /// Insert or replace; a new address goes to the end
    pub fn put(&mut self, address: &str, state: ResourceState) {
        match self.resources.iter_mut().find(|e| e.address == address) {
            Some(entry) => entry.state = state,
            None => self.resources.push(StateEntry {
                address: address.to_string(),
                state,
            }),
        }
    }

    pub fn remove(&mut self, address: &str) -> Option<ResourceState> {
        let index = self.resources.iter().position(|e| e.address == address)?;
        Some(self.resources.remove(index).state)
    }

    pub fn addresses(&self) -> Vec<String> {
        self.resources.iter().map(|e| e.address.clone()).collect()
    }

    /// Address already tracking `id`, compared case-insensitively
    pub fn address_of(&self, id: &str) -> Option<&str> {
        self.resources
            .iter()
            .find(|e| e.state.id.eq_ignore_ascii_case(id))
            .map(|e| e.address.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const FORMAT: IdFormat = IdFormat::new(
        "Microsoft.ContainerRegistry",
        &["registries"],
        "/subscriptions/{subscriptionId}/resourceGroups/{resourceGroupName}/providers/Microsoft.ContainerRegistry/registries/{registryName}",
    );

    fn v0_state() -> ResourceState {
        ResourceState {
            resource_type: "azurerm_container_registry".to_string(),
            id: "/subscriptions/abc/resourcegroups/rg/providers/microsoft.containerregistry/Registries/acr1".to_string(),
            schema_version: 0,
            attributes: Attributes::new(),
            timeouts: TimeoutOverrides::default(),
        }
    }

    fn upgrade_v0(state: &mut ResourceState) -> Result<()> {
        normalize_id_casing(state, &FORMAT)
    }

    #[test]
    fn test_upgrade_normalises_id() {
        let upgraders = [StateUpgrader {
            from_version: 0,
            upgrade: upgrade_v0,
        }];

        let state = upgrade_state(v0_state(), 1, &upgraders).unwrap();
        assert_eq!(state.schema_version, 1);
        assert_eq!(
            state.id,
            "/subscriptions/abc/resourceGroups/rg/providers/Microsoft.ContainerRegistry/registries/acr1"
        );
    }

    #[test]
    fn test_missing_upgrader_is_an_error() {
        let err = upgrade_state(v0_state(), 2, &[]).unwrap_err();
        assert!(err.to_string().contains("schema version 0"));
    }

    #[test]
    fn test_newer_state_is_rejected() {
        let mut state = v0_state();
        state.schema_version = 5;
        assert!(upgrade_state(state, 1, &[]).is_err());
    }

    #[test]
    fn test_store_round_trip_keeps_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");

        let mut store = StateStore::load(&path).unwrap();
        assert!(store.is_empty());

        let mut second = v0_state();
        second.attributes.insert("name".to_string(), json!("acr1"));
        store.put("b", v0_state());
        store.put("a", second.clone());
        store.save(&path).unwrap();

        let loaded = StateStore::load(&path).unwrap();
        assert_eq!(loaded.serial, 1);
        assert_eq!(loaded.addresses(), vec!["b", "a"]);
        assert_eq!(loaded.get("a"), Some(&second));
        assert!(loaded.address_of(&second.id.to_uppercase()).is_some());
    }

    #[test]
    fn test_put_replaces_in_place() {
        let mut store = StateStore::default();
        store.put("a", v0_state());
        store.put("b", v0_state());

        let mut updated = v0_state();
        updated.schema_version = 1;
        store.put("a", updated);

        assert_eq!(store.addresses(), vec!["a", "b"]);
        assert_eq!(store.get("a").unwrap().schema_version, 1);
        assert!(store.remove("a").is_some());
        assert!(store.remove("a").is_none());
    }
}
