// ============================================================================
// Unit of Work
// ============================================================================
//
// Owns one persistence context and drives the interceptor against one
// session coordinator. Inserts and deletes are issued immediately; updates
// are deferred to flush and only cover dirty attributes.
//
//   open ──commit──> closed
//     │
//     ├──rollback──> closed
//     └──close─────> closed   (rolls back an active transaction)
//
// After closing, already materialized state stays readable; anything that
// would need a query fails with `DetachedLazyAccess`.
//
// ============================================================================

use super::config::SessionConfig;
use super::context::PersistenceContext;
use super::coordinator::{SessionCoordinator, WriteRequest};
use super::detached::DetachedEntity;
use crate::core::{ContextId, EntityKey, EntityRef, OrmError, Result, Value};
use crate::interceptor::{AttributeValue, InterceptorStats, LazyAttributeInterceptor, sync_inverse};
use crate::metadata::{EntityDescriptor, IdentityGeneration, LifecycleEvent, Metamodel};
use crate::proxy::{AssociationSlot, AssociationState, EntityProxyState, ProxyState};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SessionStats {
    pub managed: usize,
    pub persists: u64,
    pub removes: u64,
    pub updates: u64,
    pub flushes: u64,
    pub interceptor: InterceptorStats,
}

pub struct UnitOfWork {
    config: SessionConfig,
    context: PersistenceContext,
    interceptor: LazyAttributeInterceptor,
    stats: SessionStats,
    closed: bool,
}

impl UnitOfWork {
    pub fn new(
        metamodel: Arc<Metamodel>,
        coordinator: Arc<dyn SessionCoordinator>,
        config: SessionConfig,
    ) -> Result<Self> {
        config.validate()?;
        let context = PersistenceContext::new();
        debug!(session = %config.name, context = %context.id(), "unit of work opened");

        Ok(Self {
            config,
            context,
            interceptor: LazyAttributeInterceptor::new(metamodel, coordinator),
            stats: SessionStats::default(),
            closed: false,
        })
    }

    pub fn id(&self) -> ContextId {
        self.context.id()
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn is_open(&self) -> bool {
        !self.closed
    }

    pub fn context(&self) -> &PersistenceContext {
        &self.context
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            return Err(OrmError::SessionClosed);
        }
        Ok(())
    }

    fn metamodel(&self) -> Arc<Metamodel> {
        Arc::clone(self.interceptor.metamodel())
    }

    fn coordinator(&self) -> Arc<dyn SessionCoordinator> {
        Arc::clone(self.interceptor.coordinator())
    }

    // ------------------------------------------------------------------
    // Loading
    // ------------------------------------------------------------------

    /// Reference to an instance by identity, without touching the database
    /// unless enhancement-as-proxy is disabled.
    pub async fn get_reference(&mut self, entity: &str, identity: impl Into<Value>) -> Result<EntityRef> {
        self.ensure_open()?;
        let metamodel = self.metamodel();
        let descriptor = metamodel.entity(entity)?;
        let identity = checked_identity(descriptor, identity.into())?;

        let handle = self.context.reference(descriptor, identity);
        if !self.config.allow_enhancement_as_proxy {
            self.interceptor.initialize(&mut self.context, handle).await?;
        }
        Ok(handle)
    }

    /// Loads an instance's base group. `None` when no such row exists.
    pub async fn find(&mut self, entity: &str, identity: impl Into<Value>) -> Result<Option<EntityRef>> {
        self.ensure_open()?;
        let metamodel = self.metamodel();
        let descriptor = metamodel.entity(entity)?;
        let identity = checked_identity(descriptor, identity.into())?;
        let key = EntityKey::new(entity, identity.clone());

        let existing = self.context.lookup(&key);
        if let Some(handle) = existing {
            if self.context.is_initialized(handle) {
                return Ok(Some(handle));
            }
        }

        let handle = self.context.reference(descriptor, identity);
        match self.interceptor.initialize(&mut self.context, handle).await {
            Ok(()) => Ok(Some(handle)),
            Err(OrmError::EntityNotFound { .. }) => {
                if existing.is_none() {
                    self.context.evict(handle)?;
                }
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    pub async fn initialize(&mut self, entity: EntityRef) -> Result<()> {
        self.interceptor.initialize(&mut self.context, entity).await
    }

    pub async fn initialize_association(
        &mut self,
        entity: EntityRef,
        attribute: &str,
    ) -> Result<Option<EntityRef>> {
        self.interceptor
            .initialize_association(&mut self.context, entity, attribute)
            .await
    }

    // ------------------------------------------------------------------
    // Attribute access
    // ------------------------------------------------------------------

    /// Reads an attribute. Associations read as the target identity.
    pub async fn get(&mut self, entity: EntityRef, attribute: &str) -> Result<Value> {
        match self
            .interceptor
            .read(&mut self.context, entity, attribute)
            .await?
        {
            AttributeValue::Scalar(value) => Ok(value),
            AttributeValue::Entity(Some(target)) => Ok(self.context.get(target)?.identity().clone()),
            AttributeValue::Entity(None) => Ok(Value::Null),
        }
    }

    pub async fn get_entity(&mut self, entity: EntityRef, attribute: &str) -> Result<Option<EntityRef>> {
        self.interceptor
            .read(&mut self.context, entity, attribute)
            .await?
            .into_entity()
    }

    pub async fn set(&mut self, entity: EntityRef, attribute: &str, value: impl Into<Value>) -> Result<()> {
        self.ensure_open()?;
        self.interceptor
            .write(&mut self.context, entity, attribute, value.into())
            .await
    }

    pub async fn set_entity(
        &mut self,
        entity: EntityRef,
        attribute: &str,
        target: Option<EntityRef>,
    ) -> Result<()> {
        self.ensure_open()?;
        self.interceptor
            .write_association(&mut self.context, entity, attribute, target)
            .await
    }

    // ------------------------------------------------------------------
    // Inspection
    // ------------------------------------------------------------------

    pub fn identity(&self, entity: EntityRef) -> Result<Value> {
        Ok(self.context.get(entity)?.identity().clone())
    }

    pub fn key(&self, entity: EntityRef) -> Result<EntityKey> {
        Ok(self.context.get(entity)?.key().clone())
    }

    pub fn proxy_state(&self, entity: EntityRef) -> Result<ProxyState> {
        Ok(self.context.get(entity)?.state().clone())
    }

    pub fn is_loaded(&self, entity: EntityRef, attribute: &str) -> Result<bool> {
        let state = self.context.get(entity)?;
        let metamodel = self.metamodel();
        let index = metamodel.entity(state.entity())?.attribute(attribute)?.index();
        Ok(state.is_loaded(index))
    }

    pub fn is_dirty(&self, entity: EntityRef) -> Result<bool> {
        Ok(self.context.get(entity)?.is_dirty())
    }

    /// State of a to-one association; `None` while its fetch group is unloaded.
    pub fn association_state(&self, entity: EntityRef, attribute: &str) -> Result<Option<AssociationState>> {
        let state = self.context.get(entity)?;
        let metamodel = self.metamodel();
        let attr = metamodel.entity(state.entity())?.attribute(attribute)?;
        if attr.association().is_none() {
            return Err(OrmError::TypeMismatch(format!(
                "'{}.{}' is not an association",
                state.entity(),
                attribute
            )));
        }
        if !state.is_loaded(attr.index()) {
            return Ok(None);
        }

        Ok(Some(match state.association(attr.index()) {
            Some(slot) => {
                let initialized = slot
                    .target()
                    .is_some_and(|target| self.context.is_initialized(target));
                slot.observed(initialized)
            }
            None => AssociationState::Loaded,
        }))
    }

    pub fn stats(&self) -> SessionStats {
        SessionStats {
            managed: self.context.len(),
            interceptor: self.interceptor.stats(),
            ..self.stats.clone()
        }
    }

    // ------------------------------------------------------------------
    // Writes
    // ------------------------------------------------------------------

    /// Inserts a new instance and returns its handle. Associations are given
    /// as the target identity.
    pub async fn persist<I, K>(&mut self, entity: &str, values: I) -> Result<EntityRef>
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        self.ensure_open()?;
        let metamodel = self.metamodel();
        let descriptor = metamodel.entity(entity)?;
        let identity_attr = descriptor.identity();

        let mut payload = BTreeMap::new();
        for (name, value) in values {
            let name = name.into();
            descriptor.attribute(&name)?;
            payload.insert(name, value);
        }

        let mut identity = payload
            .remove(identity_attr.name())
            .filter(|value| !value.is_null());
        match descriptor.identity_generation() {
            IdentityGeneration::Assigned if identity.is_none() => {
                return Err(OrmError::ConstraintViolation(format!(
                    "identity of '{}' must be assigned before persist",
                    entity
                )));
            }
            IdentityGeneration::Sequence if identity.is_some() => {
                return Err(OrmError::ConstraintViolation(format!(
                    "identity of '{}' is assigned by a sequence",
                    entity
                )));
            }
            IdentityGeneration::Uuid if identity.is_none() => {
                identity = descriptor.identity_generation().generate_in_memory();
            }
            _ => {}
        }
        if let Some(value) = identity.take() {
            let value = checked_identity(descriptor, value)?;
            let key = EntityKey::new(entity, value.clone());
            if self.context.lookup(&key).is_some() {
                return Err(OrmError::ConstraintViolation(format!(
                    "{} is already managed",
                    key
                )));
            }
            identity = Some(value);
        }

        for attr in descriptor.attributes() {
            if let Some(value) = attr.generation().and_then(|g| g.generate_in_memory()) {
                payload.insert(attr.name().to_string(), value);
            }
        }

        metamodel.dispatch(descriptor, LifecycleEvent::PrePersist, identity.as_ref(), &mut payload)?;

        let mut columns = Vec::new();
        let mut generated = Vec::new();
        for attr in descriptor.attributes() {
            if attr.is_identity() || !attr.is_column_backed() {
                continue;
            }
            if let Some(expression) = attr.generation().and_then(|g| g.database_expression()) {
                generated.push((attr.name().to_string(), expression.to_string()));
                continue;
            }
            let value = payload.get(attr.name()).cloned().unwrap_or(Value::Null);
            columns.push((attr.name().to_string(), value));
        }

        let response = self
            .coordinator()
            .execute_insert(WriteRequest {
                entity: descriptor,
                identity,
                values: columns,
                generated,
            })
            .await?;

        let mut values = BTreeMap::new();
        for attr in descriptor.attributes() {
            if attr.is_identity() {
                continue;
            }
            let value = response
                .generated
                .iter()
                .find(|(name, _)| name == attr.name())
                .map(|(_, value)| value.clone())
                .or_else(|| payload.get(attr.name()).cloned())
                .unwrap_or(Value::Null);
            values.insert(attr.index(), value);
        }

        let key = EntityKey::new(entity, response.identity.clone());
        let handle = self
            .context
            .attach(EntityProxyState::managed(key, descriptor, values))?;
        self.link_associations(&metamodel, descriptor, handle)?;

        let state = self.context.get(handle)?;
        let mut snapshot = state.loaded_values(descriptor);
        metamodel.dispatch(
            descriptor,
            LifecycleEvent::PostPersist,
            Some(state.identity()),
            &mut snapshot,
        )?;

        self.stats.persists += 1;
        debug!(entity, identity = %response.identity, "persisted");
        Ok(handle)
    }

    /// Builds the association slots of a freshly persisted instance.
    fn link_associations(
        &mut self,
        metamodel: &Metamodel,
        descriptor: &EntityDescriptor,
        handle: EntityRef,
    ) -> Result<()> {
        for attr in descriptor.attributes() {
            let Some(association) = attr.association() else {
                continue;
            };
            let value = self
                .context
                .get(handle)?
                .value(attr.index())
                .cloned()
                .unwrap_or(Value::Null);

            let target = if value.is_null() {
                None
            } else {
                let target_descriptor = metamodel.entity(&association.target)?;
                Some(self.context.reference(target_descriptor, value))
            };
            let initialized = target.is_some_and(|t| self.context.is_initialized(t));
            self.context
                .get_mut(handle)?
                .set_association(attr.index(), AssociationSlot::resolved(target, initialized));

            if !association.is_inverse() && target.is_some() {
                sync_inverse(
                    metamodel,
                    &mut self.context,
                    descriptor,
                    attr,
                    association,
                    handle,
                    None,
                    target,
                )?;
            }
        }
        Ok(())
    }

    /// Deletes the instance immediately. Its loaded state stays readable.
    pub async fn remove(&mut self, entity: EntityRef) -> Result<()> {
        self.ensure_open()?;
        let metamodel = self.metamodel();
        let state = self.context.get(entity)?;
        if state.state().is_removed() {
            return Ok(());
        }
        let descriptor = metamodel.entity(state.entity())?;
        let identity = state.identity().clone();
        let mut snapshot = state.loaded_values(descriptor);

        metamodel.dispatch(descriptor, LifecycleEvent::PreRemove, Some(&identity), &mut snapshot)?;
        self.coordinator()
            .execute_delete(descriptor, &identity)
            .await?;

        self.context.get_mut(entity)?.mark_removed();
        self.context.unlink(entity)?;
        metamodel.dispatch(descriptor, LifecycleEvent::PostRemove, Some(&identity), &mut snapshot)?;

        self.stats.removes += 1;
        debug!(entity = descriptor.name(), %identity, "removed");
        Ok(())
    }

    /// Writes dirty attributes of every managed instance.
    pub async fn flush(&mut self) -> Result<()> {
        self.ensure_open()?;
        let metamodel = self.metamodel();
        let coordinator = self.coordinator();

        for handle in self.context.refs() {
            let state = self.context.get(handle)?;
            if state.state().is_removed() || !state.is_dirty() {
                continue;
            }
            let descriptor = metamodel.entity(state.entity())?;
            let identity = state.identity().clone();

            let before = state.loaded_values(descriptor);
            let mut values = before.clone();
            metamodel.dispatch(descriptor, LifecycleEvent::PreUpdate, Some(&identity), &mut values)?;
            for (name, value) in values {
                if before.get(&name) == Some(&value) {
                    continue;
                }
                let attr = descriptor.attribute(&name)?;
                if attr.is_identity() {
                    return Err(OrmError::ImmutableIdentity(format!(
                        "{}.{}",
                        descriptor.name(),
                        name
                    )));
                }
                if attr.association().is_some() {
                    // slot and inverse side follow the new target
                    self.interceptor
                        .write(&mut self.context, handle, &name, value)
                        .await?;
                } else {
                    self.context
                        .get_mut(handle)?
                        .write(attr.index(), value, attr.is_column_backed());
                }
            }

            for attr in descriptor.attributes() {
                let Some(generation) = attr.generation() else {
                    continue;
                };
                if !generation.applies_on_update() {
                    continue;
                }
                if let Some(value) = generation.generate_in_memory() {
                    self.context.get_mut(handle)?.write(attr.index(), value, true);
                }
            }

            let state = self.context.get(handle)?;
            let mut columns = Vec::new();
            for index in state.dirty_attributes() {
                let attr = descriptor.attribute_at(index)?;
                if !attr.is_column_backed() || attr.generation().is_some_and(|g| g.database_expression().is_some()) {
                    continue;
                }
                columns.push((
                    attr.name().to_string(),
                    state.value(index).cloned().unwrap_or(Value::Null),
                ));
            }
            let generated: Vec<(String, String)> = descriptor
                .attributes()
                .iter()
                .filter_map(|attr| {
                    let generation = attr.generation()?;
                    let expression = generation.database_expression()?;
                    generation
                        .applies_on_update()
                        .then(|| (attr.name().to_string(), expression.to_string()))
                })
                .collect();

            if columns.is_empty() && generated.is_empty() {
                self.context.get_mut(handle)?.clear_dirty();
                continue;
            }

            let response = coordinator
                .execute_update(WriteRequest {
                    entity: descriptor,
                    identity: Some(identity.clone()),
                    values: columns,
                    generated,
                })
                .await?;

            let state = self.context.get_mut(handle)?;
            for (name, value) in response.generated {
                state.apply_generated(descriptor.attribute(&name)?.index(), value);
            }
            state.clear_dirty();

            let state = self.context.get(handle)?;
            let mut snapshot = state.loaded_values(descriptor);
            metamodel.dispatch(descriptor, LifecycleEvent::PostUpdate, Some(&identity), &mut snapshot)?;
            self.stats.updates += 1;
        }

        self.stats.flushes += 1;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Transaction boundaries
    // ------------------------------------------------------------------

    pub async fn commit(&mut self) -> Result<()> {
        self.ensure_open()?;
        if self.config.flush_on_commit {
            self.flush().await?;
        }
        self.coordinator().commit().await?;
        self.closed = true;
        debug!(session = %self.config.name, context = %self.context.id(), "committed");
        Ok(())
    }

    pub async fn rollback(&mut self) -> Result<()> {
        self.ensure_open()?;
        self.coordinator().rollback().await?;
        self.closed = true;
        self.invalidate_states()?;
        debug!(session = %self.config.name, context = %self.context.id(), "rolled back");
        Ok(())
    }

    /// Drops every materialized value after a rollback. Handles stay valid
    /// but only the identity remains readable.
    fn invalidate_states(&mut self) -> Result<()> {
        let metamodel = self.metamodel();
        for handle in self.context.refs() {
            let state = self.context.get(handle)?;
            let descriptor = metamodel.entity(state.entity())?;
            let reset = EntityProxyState::uninitialized(state.key().clone(), descriptor);
            *self.context.get_mut(handle)? = reset;
        }
        Ok(())
    }

    /// Ends the unit of work, rolling back a transaction that is still active.
    pub async fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        let coordinator = self.coordinator();
        if coordinator.is_active() {
            warn!(
                session = %self.config.name,
                context = %self.context.id(),
                "closing with an active transaction, rolling back"
            );
            coordinator.rollback().await?;
            self.invalidate_states()?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Detach / reattach
    // ------------------------------------------------------------------

    /// Removes the instance from this unit of work and returns an owned copy
    /// of its materialized state.
    pub fn detach(&mut self, entity: EntityRef) -> Result<DetachedEntity> {
        let metamodel = self.metamodel();
        let descriptor = metamodel.entity(self.context.get(entity)?.entity())?;
        let state = self.context.evict(entity)?;

        let attributes = descriptor
            .attributes()
            .iter()
            .map(|attr| {
                let value = if attr.is_identity() {
                    Some(state.identity().clone())
                } else {
                    state.value(attr.index()).cloned()
                };
                (attr.name().to_string(), value)
            })
            .collect();

        Ok(DetachedEntity::new(
            state.key().clone(),
            state.state().clone(),
            attributes,
        ))
    }

    /// Brings a detached instance back as an identity-only instance. Returns
    /// the managed instance when one with the same identity already exists.
    pub fn reattach(&mut self, detached: &DetachedEntity) -> Result<EntityRef> {
        self.ensure_open()?;
        let metamodel = self.metamodel();
        let descriptor = metamodel.entity(detached.entity())?;
        if detached.identity().is_null() {
            return Err(OrmError::UnresolvableIdentity(detached.entity().to_string()));
        }
        let identity = checked_identity(descriptor, detached.identity().clone())?;

        let key = EntityKey::new(detached.entity(), identity);
        if let Some(existing) = self.context.lookup(&key) {
            return Ok(existing);
        }
        self.context
            .attach(EntityProxyState::uninitialized(key, descriptor))
    }
}

impl std::fmt::Debug for UnitOfWork {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnitOfWork")
            .field("config", &self.config)
            .field("context", &self.context.id())
            .field("managed", &self.context.len())
            .field("closed", &self.closed)
            .finish()
    }
}

fn checked_identity(descriptor: &EntityDescriptor, identity: Value) -> Result<Value> {
    if identity.is_null() {
        return Err(OrmError::UnresolvableIdentity(descriptor.name().to_string()));
    }
    if !identity.is_identity_compatible() {
        return Err(OrmError::TypeMismatch(format!(
            "{} cannot identify '{}'",
            identity.type_name(),
            descriptor.name()
        )));
    }
    Ok(identity)
}
