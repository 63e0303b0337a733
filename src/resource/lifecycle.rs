//! The generic lifecycle engine
//!
//! Wraps a [`ResourceDescriptor`] and gives every resource type the same
//! contract:
//!
//! - create refuses to adopt an object that already exists remotely
//! - read of a missing object clears state instead of failing
//! - update rejects changes to force-new attributes
//! - delete of a missing object succeeds
//!
//! State moves `absent -> creating -> present -> (updating -> present)* ->
//! deleting -> absent`; each transition is logged at info level.

use super::schema::Attributes;
use super::state::{upgrade_state, ResourceState};
use super::{DataSourceDescriptor, ManagedDataSource, ManagedResource, ResourceDescriptor, Scope};
use crate::error::{ArmError, Result};
use crate::resource_id::{IdFormat, ResourceId};
use crate::timeouts::{OperationContext, OperationKind, OperationTimeouts};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;

/// Decode validated attributes into a descriptor's typed configuration
fn decode<C: DeserializeOwned>(attributes: &Attributes) -> Result<C> {
    serde_json::from_value(Value::Object(attributes.clone()))
        .map_err(|e| ArmError::validation("attributes", e.to_string()))
}

/// A resource descriptor driven by the lifecycle engine
pub struct Lifecycle<D> {
    descriptor: D,
}

impl<D: ResourceDescriptor> Lifecycle<D> {
    pub fn new(descriptor: D) -> Self {
        Self { descriptor }
    }

    pub fn descriptor(&self) -> &D {
        &self.descriptor
    }

    fn prepare(&self, attributes: &Attributes) -> Result<(Attributes, D::Config)> {
        let validated = self.descriptor.schema().validate(attributes)?;
        let config: D::Config = decode(&validated)?;
        self.descriptor.check(&config)?;
        Ok((validated, config))
    }

    fn context(&self, scope: &Scope<'_>, kind: OperationKind, description: &str) -> Result<OperationContext> {
        let timeouts = self.descriptor.timeouts().with_overrides(scope.timeouts)?;
        Ok(OperationContext::new(
            kind,
            description,
            timeouts.for_kind(kind),
            scope.cancel.child_token(),
        ))
    }

    fn describe(&self, id: &ResourceId) -> String {
        id.describe(self.descriptor.display_name())
    }

    fn state(&self, scope: &Scope<'_>, id: &ResourceId, attributes: Attributes) -> ResourceState {
        let schema = self.descriptor.schema();
        let mut state = ResourceState::new(
            self.descriptor.type_name(),
            id,
            schema.version,
            schema.strip_undeclared(attributes),
        );
        state.timeouts = scope.timeouts.clone();
        state
    }
}

#[async_trait]
impl<D: ResourceDescriptor> ManagedResource for Lifecycle<D> {
    fn type_name(&self) -> &'static str {
        self.descriptor.type_name()
    }

    fn display_name(&self) -> &'static str {
        self.descriptor.display_name()
    }

    fn schema(&self) -> &'static super::schema::Schema {
        self.descriptor.schema()
    }

    fn id_format(&self) -> &'static IdFormat {
        self.descriptor.id_format()
    }

    fn default_timeouts(&self) -> OperationTimeouts {
        self.descriptor.timeouts()
    }

    fn validate(&self, attributes: &Attributes) -> Result<Attributes> {
        self.prepare(attributes).map(|(validated, _)| validated)
    }

    fn planned_id(&self, subscription_id: &str, attributes: &Attributes) -> Result<ResourceId> {
        let (_, config) = self.prepare(attributes)?;
        Ok(self.descriptor.id(subscription_id, &config))
    }

    async fn create(&self, scope: &Scope<'_>, attributes: &Attributes) -> Result<ResourceState> {
        let (_, config) = self.prepare(attributes)?;
        let client = scope.client;
        let id = self.descriptor.id(&client.subscription_id, &config);
        let target = self.describe(&id);
        let ctx = self.context(scope, OperationKind::Create, &target)?;

        tracing::info!("{}: absent -> creating", target);

        match ctx.run(self.descriptor.read(client, &ctx, &id)).await {
            Ok(_) => {
                return Err(ArmError::RequiresImport {
                    resource_type: self.descriptor.type_name().to_string(),
                    id: id.to_string(),
                })
            },
            Err(e) if e.is_not_found() => {},
            Err(e) => return Err(e.during("checking for presence of existing", &target)),
        }

        ctx.run(self.descriptor.pre_create(client, &ctx, &config))
            .await
            .map_err(|e| e.during("creating", &target))?;

        ctx.run(self.descriptor.create(client, &ctx, &id, &config))
            .await
            .map_err(|e| e.during("creating", &target))?;

        let attributes = ctx
            .run(self.descriptor.read(client, &ctx, &id))
            .await
            .map_err(|e| e.during("retrieving", &target))?;

        tracing::info!("{}: creating -> present", target);
        Ok(self.state(scope, &id, attributes))
    }

    async fn read(&self, scope: &Scope<'_>, state: &ResourceState) -> Result<Option<ResourceState>> {
        let id = state.parsed_id()?;
        let target = self.describe(&id);
        let ctx = self.context(scope, OperationKind::Read, &target)?;

        match ctx.run(self.descriptor.read(scope.client, &ctx, &id)).await {
            Ok(attributes) => {
                let mut refreshed = self.state(scope, &id, attributes);
                refreshed.id = state.id.clone();
                Ok(Some(refreshed))
            },
            Err(e) if e.is_not_found() => {
                tracing::info!("{} was not found - removing from state", target);
                Ok(None)
            },
            Err(e) => Err(e.during("retrieving", &target)),
        }
    }

    async fn update(&self, scope: &Scope<'_>, prior: &ResourceState, attributes: &Attributes) -> Result<ResourceState> {
        let (validated, config) = self.prepare(attributes)?;
        let schema = self.descriptor.schema();
        let id = prior.parsed_id()?;
        let target = self.describe(&id);

        if let Some(field) = schema.force_new_changes(&prior.attributes, &validated).first() {
            return Err(ArmError::validation(
                *field,
                format!("cannot be changed in place, {target} must be replaced"),
            ));
        }

        let changed = schema.changed_attributes(&prior.attributes, &validated);
        let ctx = self.context(scope, OperationKind::Update, &target)?;

        tracing::info!("{}: present -> updating ({})", target, changed.join(", "));

        ctx.run(
            self.descriptor
                .update(scope.client, &ctx, &id, &config, &changed),
        )
        .await
        .map_err(|e| e.during("updating", &target))?;

        let attributes = ctx
            .run(self.descriptor.read(scope.client, &ctx, &id))
            .await
            .map_err(|e| e.during("retrieving", &target))?;

        tracing::info!("{}: updating -> present", target);
        let mut updated = self.state(scope, &id, attributes);
        updated.id = prior.id.clone();
        Ok(updated)
    }

    async fn delete(&self, scope: &Scope<'_>, state: &ResourceState) -> Result<()> {
        let id = state.parsed_id()?;
        let target = self.describe(&id);
        let ctx = self.context(scope, OperationKind::Delete, &target)?;

        tracing::info!("{}: present -> deleting", target);

        match ctx.run(self.descriptor.delete(scope.client, &ctx, &id)).await {
            Ok(()) => {},
            Err(e) if e.is_not_found() => {
                tracing::debug!("{} was already gone", target);
            },
            Err(e) => return Err(e.during("deleting", &target)),
        }

        tracing::info!("{}: deleting -> absent", target);
        Ok(())
    }

    async fn import(&self, scope: &Scope<'_>, id: &str) -> Result<ResourceState> {
        let id = self.descriptor.id_format().parse(id)?;
        let target = self.describe(&id);
        let ctx = self.context(scope, OperationKind::Read, &target)?;

        match ctx.run(self.descriptor.read(scope.client, &ctx, &id)).await {
            Ok(attributes) => {
                tracing::info!("{}: imported", target);
                Ok(self.state(scope, &id, attributes))
            },
            Err(e) if e.is_not_found() => Err(ArmError::NotFound(target)),
            Err(e) => Err(e.during("importing", &target)),
        }
    }

    fn upgrade(&self, state: ResourceState) -> Result<ResourceState> {
        upgrade_state(
            state,
            self.descriptor.schema().version,
            self.descriptor.upgraders(),
        )
    }
}

/// A data source descriptor driven by the lifecycle engine
pub struct DataSource<D> {
    descriptor: D,
}

impl<D: DataSourceDescriptor> DataSource<D> {
    pub fn new(descriptor: D) -> Self {
        Self { descriptor }
    }
}

#[async_trait]
impl<D: DataSourceDescriptor> ManagedDataSource for DataSource<D> {
    fn type_name(&self) -> &'static str {
        self.descriptor.type_name()
    }

    fn display_name(&self) -> &'static str {
        self.descriptor.display_name()
    }

    fn schema(&self) -> &'static super::schema::Schema {
        self.descriptor.schema()
    }

    /// Unlike a resource read, a missing object is an error here
    async fn read(&self, scope: &Scope<'_>, attributes: &Attributes) -> Result<ResourceState> {
        let schema = self.descriptor.schema();
        let validated = schema.validate(attributes)?;
        let config: D::Config = decode(&validated)?;
        let id = self.descriptor.id(&scope.client.subscription_id, &config);
        let target = id.describe(self.descriptor.display_name());

        let ctx = OperationContext::new(
            OperationKind::Read,
            target.as_str(),
            self.descriptor.read_timeout(),
            scope.cancel.child_token(),
        );

        match ctx.run(self.descriptor.read(scope.client, &ctx, &id)).await {
            Ok(remote) => Ok(ResourceState::new(
                self.descriptor.type_name(),
                &id,
                schema.version,
                schema.strip_undeclared(remote),
            )),
            Err(e) if e.is_not_found() => Err(ArmError::NotFound(target)),
            Err(e) => Err(e.during("retrieving", &target)),
        }
    }
}
