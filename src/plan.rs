//! Plan and apply
//!
//! Compares a [`Manifest`] with the state store, decides per address whether
//! to create, update, replace or delete, and executes that plan through the
//! lifecycle engine. State is written after every completed step so an
//! interrupted run never forgets a created object.

use crate::azure::client::ArmClient;
use crate::error::{ArmError, Result};
use crate::manifest::{resolve, Manifest, Reference, ResourceBlock};
use crate::resource::{get_data_source, get_resource, Attributes, ManagedResource, ResourceState, Scope, StateStore};
use crate::timeouts::TimeoutOverrides;
use futures::stream::{self, StreamExt};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;

/// What apply will do with one address
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Create,
    /// In-place update of the listed attributes
    Update { changed: Vec<String> },
    /// Delete then create, forced by the listed attributes
    Replace { forced_by: Vec<String> },
    /// Declared nowhere any more
    Delete,
    NoOp,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Create => write!(f, "create"),
            Self::Update { changed } => write!(f, "update ({})", changed.join(", ")),
            Self::Replace { forced_by } => write!(f, "replace (forced by {})", forced_by.join(", ")),
            Self::Delete => write!(f, "delete"),
            Self::NoOp => write!(f, "no changes"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedChange {
    pub address: String,
    pub resource_type: String,
    pub action: Action,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Plan {
    pub changes: Vec<PlannedChange>,
}

impl Plan {
    pub fn has_changes(&self) -> bool {
        self.changes.iter().any(|c| c.action != Action::NoOp)
    }

    /// Counts of (create, update, replace, delete)
    pub fn summary(&self) -> (usize, usize, usize, usize) {
        self.changes
            .iter()
            .fold((0, 0, 0, 0), |(c, u, r, d), change| match change.action {
                Action::Create => (c + 1, u, r, d),
                Action::Update { .. } => (c, u + 1, r, d),
                Action::Replace { .. } => (c, u, r + 1, d),
                Action::Delete => (c, u, r, d + 1),
                Action::NoOp => (c, u, r, d),
            })
    }
}

impl fmt::Display for Plan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for change in &self.changes {
            writeln!(f, "{} ({}): {}", change.address, change.resource_type, change.action)?;
        }
        let (create, update, replace, delete) = self.summary();
        write!(
            f,
            "Plan: {create} to create, {update} to update, {replace} to replace, {delete} to delete."
        )
    }
}

/// State store plus the file it is saved to
pub struct Workspace {
    pub state: StateStore,
    path: Option<PathBuf>,
}

impl Workspace {
    pub fn new(state: StateStore, path: Option<PathBuf>) -> Self {
        Self { state, path }
    }

    /// Load state and bring every entry up to its resource's schema version
    pub fn load(path: PathBuf) -> Result<Self> {
        let mut state = StateStore::load(&path)?;
        upgrade_all(&mut state)?;
        Ok(Self::new(state, Some(path)))
    }

    pub fn commit(&mut self) -> Result<()> {
        match &self.path {
            Some(path) => self.state.save(path),
            None => Ok(()),
        }
    }
}

fn managed(resource_type: &str) -> Result<&'static dyn ManagedResource> {
    get_resource(resource_type)
        .ok_or_else(|| ArmError::State(format!("unknown resource type {resource_type:?} in state")))
}

/// Run schema upgraders on every stored entry
pub fn upgrade_all(state: &mut StateStore) -> Result<()> {
    for entry in &mut state.resources {
        let resource = managed(&entry.state.resource_type)?;
        if entry.state.schema_version != resource.schema().version {
            entry.state = resource.upgrade(entry.state.clone())?;
        }
    }
    Ok(())
}

/// Drives plans against one subscription
pub struct Engine<'a> {
    client: &'a ArmClient,
    cancel: &'a CancellationToken,
    max_concurrency: usize,
}

impl<'a> Engine<'a> {
    pub fn new(client: &'a ArmClient, cancel: &'a CancellationToken, max_concurrency: usize) -> Self {
        Self {
            client,
            cancel,
            max_concurrency: max_concurrency.max(1),
        }
    }

    fn scope<'s>(&'s self, timeouts: &'s TimeoutOverrides) -> Scope<'s> {
        Scope {
            client: self.client,
            cancel: self.cancel,
            timeouts,
        }
    }

    /// Read every data source of the manifest; a missing object is an error
    pub async fn read_data(&self, manifest: &Manifest) -> Result<HashMap<String, Attributes>> {
        let timeouts = TimeoutOverrides::default();
        let mut results = HashMap::new();

        for block in &manifest.data {
            let source = get_data_source(&block.data_type)
                .ok_or_else(|| ArmError::Manifest(format!("unknown data source type {:?}", block.data_type)))?;
            let state = source
                .read(&self.scope(&timeouts), &block.attributes)
                .await
                .map_err(|e| e.during("reading data source", format!("data.{}", block.address)))?;
            tracing::debug!("Read data.{} ({})", block.address, state.id);

            let mut attributes = state.attributes;
            attributes.insert("id".to_string(), json!(state.id));
            results.insert(block.address.clone(), attributes);
        }

        Ok(results)
    }

    /// Re-read every object in state concurrently. Objects that no longer
    /// exist are dropped; errors leave their entry untouched.
    pub async fn refresh(&self, workspace: &mut Workspace) -> Result<()> {
        let entries = workspace.state.resources.clone();
        let total = entries.len();

        let results: Vec<(String, Result<Option<ResourceState>>)> = stream::iter(entries)
            .map(|entry| async move {
                let outcome = match managed(&entry.state.resource_type) {
                    Ok(resource) => resource.read(&self.scope(&entry.state.timeouts), &entry.state).await,
                    Err(e) => Err(e),
                };
                (entry.address, outcome)
            })
            .buffer_unordered(self.max_concurrency)
            .collect()
            .await;

        let mut first_error = None;
        let mut removed = 0;
        for (address, outcome) in results {
            match outcome {
                Ok(Some(state)) => workspace.state.put(&address, state),
                Ok(None) => {
                    workspace.state.remove(&address);
                    removed += 1;
                },
                Err(e) => {
                    tracing::error!("Refreshing {} failed: {}", address, e);
                    first_error.get_or_insert(e.during("refreshing", address));
                },
            }
        }

        tracing::info!("Refreshed {} objects, {} gone", total, removed);
        workspace.commit()?;
        first_error.map_or(Ok(()), Err)
    }

    /// Compare the manifest with state
    pub async fn plan(&self, manifest: &Manifest, state: &StateStore) -> Result<Plan> {
        let data = self.read_data(manifest).await?;
        let mut changes = Vec::new();

        for block in &manifest.resources {
            let resource = managed(&block.resource_type)?;
            let (attributes, pending) = resolve(&block.attributes, |r| lookup(r, &data, state));

            let action = match state.get(&block.address) {
                None => {
                    if pending.is_empty() {
                        resource
                            .validate(&attributes)
                            .map_err(|e| e.during("validating", &block.address))?;
                    }
                    Action::Create
                },
                Some(prior) if prior.resource_type != block.resource_type => Action::Replace {
                    forced_by: vec!["type".to_string()],
                },
                Some(prior) => diff(resource, block, prior, &attributes, &pending)?,
            };

            changes.push(PlannedChange {
                address: block.address.clone(),
                resource_type: block.resource_type.clone(),
                action,
            });
        }

        // Orphans go in reverse creation order
        for entry in state.resources.iter().rev() {
            if manifest.resource(&entry.address).is_none() {
                changes.push(PlannedChange {
                    address: entry.address.clone(),
                    resource_type: entry.state.resource_type.clone(),
                    action: Action::Delete,
                });
            }
        }

        Ok(Plan { changes })
    }

    /// Execute a plan produced by [`Engine::plan`] for the same manifest.
    ///
    /// Deletions of orphaned objects run first, then the manifest's resources
    /// in declaration order.
    pub async fn apply(&self, manifest: &Manifest, plan: &Plan, workspace: &mut Workspace) -> Result<()> {
        let data = self.read_data(manifest).await?;

        for change in plan.changes.iter().filter(|c| c.action == Action::Delete) {
            self.delete_address(&change.address, workspace).await?;
        }

        for change in plan.changes.iter().filter(|c| c.action != Action::Delete) {
            let Some(block) = manifest.resource(&change.address) else {
                return Err(ArmError::Manifest(format!(
                    "plan refers to {:?}, which the manifest does not declare",
                    change.address
                )));
            };

            if change.action == Action::NoOp {
                continue;
            }

            let resource = managed(&block.resource_type)?;
            let (attributes, pending) = resolve(&block.attributes, |r| lookup(r, &data, &workspace.state));
            if !pending.is_empty() {
                return Err(ArmError::Manifest(format!(
                    "{}: could not resolve {}",
                    block.address,
                    pending.join(", ")
                )));
            }

            let scope = self.scope(&block.timeouts);
            match &change.action {
                Action::Create => {
                    let state = resource.create(&scope, &attributes).await?;
                    self.record(workspace, &block.address, state)?;
                },
                Action::Update { .. } => {
                    let prior = self.prior(workspace, &block.address)?;
                    // References may resolve differently now than at plan time
                    let state = match diff(resource, block, &prior, &attributes, &[])? {
                        Action::Replace { .. } => self.replace(resource, block, &prior, &attributes, workspace).await?,
                        Action::NoOp => continue,
                        _ => resource.update(&scope, &prior, &attributes).await?,
                    };
                    self.record(workspace, &block.address, state)?;
                },
                Action::Replace { .. } => {
                    let prior = self.prior(workspace, &block.address)?;
                    let state = self.replace(resource, block, &prior, &attributes, workspace).await?;
                    self.record(workspace, &block.address, state)?;
                },
                Action::Delete | Action::NoOp => {},
            }
        }

        Ok(())
    }

    async fn replace(
        &self,
        resource: &dyn ManagedResource,
        block: &ResourceBlock,
        prior: &ResourceState,
        attributes: &Attributes,
        workspace: &mut Workspace,
    ) -> Result<ResourceState> {
        self.delete_address(&block.address, workspace).await?;
        tracing::info!("{}: replacing {}", block.address, prior.id);
        resource.create(&self.scope(&block.timeouts), attributes).await
    }

    fn prior(&self, workspace: &Workspace, address: &str) -> Result<ResourceState> {
        workspace
            .state
            .get(address)
            .cloned()
            .ok_or_else(|| ArmError::State(format!("{address} is not in state")))
    }

    fn record(&self, workspace: &mut Workspace, address: &str, state: ResourceState) -> Result<()> {
        workspace.state.put(address, state);
        workspace.commit()
    }

    async fn delete_address(&self, address: &str, workspace: &mut Workspace) -> Result<()> {
        let Some(state) = workspace.state.get(address).cloned() else {
            return Ok(());
        };
        let resource = managed(&state.resource_type)?;
        resource.delete(&self.scope(&state.timeouts), &state).await?;
        workspace.state.remove(address);
        workspace.commit()
    }

    /// Delete everything in state, newest first
    pub async fn destroy(&self, workspace: &mut Workspace) -> Result<usize> {
        let addresses: Vec<String> = workspace.state.addresses().into_iter().rev().collect();
        for address in &addresses {
            self.delete_address(address, workspace).await?;
        }
        Ok(addresses.len())
    }

    /// Adopt an existing object under `address`
    pub async fn import(
        &self,
        workspace: &mut Workspace,
        address: &str,
        resource_type: &str,
        id: &str,
    ) -> Result<ResourceState> {
        if workspace.state.get(address).is_some() {
            return Err(ArmError::State(format!("{address} is already managed")));
        }
        if let Some(existing) = workspace.state.address_of(id) {
            return Err(ArmError::State(format!("{id} is already managed as {existing}")));
        }

        let resource = get_resource(resource_type)
            .ok_or_else(|| ArmError::validation("type", format!("unknown resource type {resource_type:?}")))?;
        let timeouts = TimeoutOverrides::default();
        let state = resource.import(&self.scope(&timeouts), id).await?;

        self.record(workspace, address, state.clone())?;
        Ok(state)
    }
}

/// Decide between update, replace and no-op for an object already in state
fn diff(
    resource: &dyn ManagedResource,
    block: &ResourceBlock,
    prior: &ResourceState,
    attributes: &Attributes,
    pending: &[String],
) -> Result<Action> {
    if !pending.is_empty() {
        // Unknown until apply; force-new ones are treated as changed
        let forced: Vec<String> = pending
            .iter()
            .filter(|name| resource.schema().attribute(name).is_some_and(|a| a.force_new))
            .cloned()
            .collect();
        return Ok(if forced.is_empty() {
            Action::Update {
                changed: pending.to_vec(),
            }
        } else {
            Action::Replace { forced_by: forced }
        });
    }

    let desired = resource
        .validate(attributes)
        .map_err(|e| e.during("validating", &block.address))?;
    let schema = resource.schema();

    let forced = schema.force_new_changes(&prior.attributes, &desired);
    if !forced.is_empty() {
        return Ok(Action::Replace {
            forced_by: forced.iter().map(|s| s.to_string()).collect(),
        });
    }

    let changed = schema.changed_attributes(&prior.attributes, &desired);
    Ok(if changed.is_empty() {
        Action::NoOp
    } else {
        Action::Update {
            changed: changed.iter().map(|s| s.to_string()).collect(),
        }
    })
}

fn lookup(reference: &Reference, data: &HashMap<String, Attributes>, state: &StateStore) -> Option<Value> {
    match reference {
        Reference::Data { address, attribute } => data.get(address)?.get(attribute).cloned(),
        Reference::Resource { address, attribute } => {
            let entry = state.get(address)?;
            if attribute == "id" {
                Some(json!(entry.id))
            } else {
                entry.attributes.get(attribute).cloned()
            }
        },
    }
}

/// Stored state with sensitive values masked
pub fn show(state: &StateStore) -> Value {
    let resources: Vec<Value> = state
        .resources
        .iter()
        .map(|entry| {
            let attributes = match get_resource(&entry.state.resource_type) {
                Some(resource) => resource.schema().redact(&entry.state.attributes),
                None => entry.state.attributes.clone(),
            };
            json!({
                "address": entry.address,
                "type": entry.state.resource_type,
                "id": entry.state.id,
                "schema_version": entry.state.schema_version,
                "attributes": attributes,
            })
        })
        .collect();

    json!({ "serial": state.serial, "resources": resources })
}
