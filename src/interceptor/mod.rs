// ============================================================================
// Lazy Attribute Interceptor
// ============================================================================
//
// Every attribute access on a managed instance goes through here.
//
//   read(attr) ─┬─ identity / loaded ──────────────> pass-through
//               └─ unloaded ─> resolve group ─> one fetch ─> mark_loaded
//                                                     └─> re-dispatch
//
// Join-fetched associations arrive inside the owner's row and initialize
// their targets in the same step, so the later read of such an association
// costs no query.
//
// ============================================================================

use crate::core::{EntityKey, EntityRef, OrmError, Result, Value};
use crate::metadata::{
    Association, AttributeDescriptor, EntityDescriptor, FetchGroup, FetchGroupId,
    FetchGroupResolver, LifecycleEvent, Metamodel, Resolution,
};
use crate::proxy::{AssociationSlot, AssociationState, MarkOutcome, WriteOutcome};
use crate::session::{EntityRow, Joined, PersistenceContext, SessionCoordinator};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, trace};

/// Value handed back by a mediated read.
#[derive(Debug, Clone, PartialEq)]
pub enum AttributeValue {
    Scalar(Value),
    /// A to-one association; `None` when null
    Entity(Option<EntityRef>),
}

impl AttributeValue {
    pub fn as_value(&self) -> Option<&Value> {
        match self {
            Self::Scalar(value) => Some(value),
            Self::Entity(_) => None,
        }
    }

    pub fn as_entity(&self) -> Option<EntityRef> {
        match self {
            Self::Entity(target) => *target,
            Self::Scalar(_) => None,
        }
    }

    pub fn into_value(self) -> Result<Value> {
        match self {
            Self::Scalar(value) => Ok(value),
            Self::Entity(_) => Err(OrmError::TypeMismatch(
                "expected a scalar attribute, found an association".into(),
            )),
        }
    }

    pub fn into_entity(self) -> Result<Option<EntityRef>> {
        match self {
            Self::Entity(target) => Ok(target),
            Self::Scalar(_) => Err(OrmError::TypeMismatch(
                "expected an association, found a scalar attribute".into(),
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct InterceptorStats {
    pub passthrough_reads: u64,
    pub lazy_loads: u64,
    /// Joined associations settled on first read
    pub join_initializations: u64,
    pub overlay_writes: u64,
    /// Association writes that had to load their group first
    pub load_before_writes: u64,
}

pub struct LazyAttributeInterceptor {
    metamodel: Arc<Metamodel>,
    coordinator: Arc<dyn SessionCoordinator>,
    stats: InterceptorStats,
}

impl LazyAttributeInterceptor {
    pub fn new(metamodel: Arc<Metamodel>, coordinator: Arc<dyn SessionCoordinator>) -> Self {
        Self {
            metamodel,
            coordinator,
            stats: InterceptorStats::default(),
        }
    }

    pub fn metamodel(&self) -> &Arc<Metamodel> {
        &self.metamodel
    }

    pub fn coordinator(&self) -> &Arc<dyn SessionCoordinator> {
        &self.coordinator
    }

    pub fn stats(&self) -> InterceptorStats {
        self.stats
    }

    pub async fn read(
        &mut self,
        context: &mut PersistenceContext,
        entity: EntityRef,
        attribute: &str,
    ) -> Result<AttributeValue> {
        let metamodel = Arc::clone(&self.metamodel);
        let descriptor = metamodel.entity(context.get(entity)?.entity())?;
        let attr = descriptor.attribute(attribute)?;

        let group = match FetchGroupResolver::resolve(attr, descriptor)? {
            Resolution::Identity => {
                self.stats.passthrough_reads += 1;
                return Ok(AttributeValue::Scalar(context.get(entity)?.identity().clone()));
            }
            Resolution::Group(group) => group,
        };

        let state = context.get(entity)?;
        if state.is_loaded(attr.index()) {
            self.stats.passthrough_reads += 1;
        } else if state.state().is_removed() {
            return Err(removed(state.entity(), state.identity()));
        } else {
            self.load_group(context, entity, descriptor, group, attr.name())
                .await?;
        }

        self.materialize(context, entity, attr)
    }

    /// Writes a scalar, or an association given the target's identity.
    pub async fn write(
        &mut self,
        context: &mut PersistenceContext,
        entity: EntityRef,
        attribute: &str,
        value: Value,
    ) -> Result<()> {
        let metamodel = Arc::clone(&self.metamodel);
        let descriptor = metamodel.entity(context.get(entity)?.entity())?;
        let attr = descriptor.attribute(attribute)?;

        if let Some(association) = attr.association() {
            let target = if value.is_null() {
                None
            } else {
                let target = metamodel.entity(&association.target)?;
                Some(context.reference(target, value))
            };
            return self
                .write_association(context, entity, attribute, target)
                .await;
        }

        check_writable(context, entity, descriptor, attr)?;

        let outcome = context
            .get_mut(entity)?
            .write(attr.index(), value, attr.is_column_backed());
        if outcome == WriteOutcome::Overlay {
            self.stats.overlay_writes += 1;
            trace!(entity = descriptor.name(), attribute, "overlay write");
        }
        Ok(())
    }

    pub async fn write_association(
        &mut self,
        context: &mut PersistenceContext,
        entity: EntityRef,
        attribute: &str,
        target: Option<EntityRef>,
    ) -> Result<()> {
        let metamodel = Arc::clone(&self.metamodel);
        let descriptor = metamodel.entity(context.get(entity)?.entity())?;
        let attr = descriptor.attribute(attribute)?;
        let association = attr.association().ok_or_else(|| {
            OrmError::TypeMismatch(format!(
                "'{}.{}' is not an association",
                descriptor.name(),
                attribute
            ))
        })?;

        check_writable(context, entity, descriptor, attr)?;

        let target_identity = match target {
            Some(target) => {
                let state = context.get(target)?;
                if state.entity() != association.target {
                    return Err(OrmError::TypeMismatch(format!(
                        "'{}.{}' expects {}, got {}",
                        descriptor.name(),
                        attribute,
                        association.target,
                        state.key()
                    )));
                }
                state.identity().clone()
            }
            None if !association.optional => {
                return Err(OrmError::ConstraintViolation(format!(
                    "'{}.{}' is not optional",
                    descriptor.name(),
                    attribute
                )));
            }
            None => Value::Null,
        };

        // The prior target is needed to keep the inverse side consistent.
        if !context.get(entity)?.is_loaded(attr.index()) {
            let group = descriptor.fetch_group(attr.group().unwrap_or(FetchGroupId::BASE))?;
            self.load_group(context, entity, descriptor, group, attr.name())
                .await?;
            self.stats.load_before_writes += 1;
        }

        let previous = context
            .get(entity)?
            .association(attr.index())
            .and_then(AssociationSlot::target);

        let initialized = target.is_some_and(|t| context.is_initialized(t));
        let state = context.get_mut(entity)?;
        state.write(attr.index(), target_identity, attr.is_column_backed());
        state.set_association(attr.index(), AssociationSlot::resolved(target, initialized));

        if !association.is_inverse() && previous != target {
            sync_inverse(&metamodel, context, descriptor, attr, association, entity, previous, target)?;
        }
        Ok(())
    }

    /// Loads the base group of an identity-only instance.
    pub async fn initialize(&mut self, context: &mut PersistenceContext, entity: EntityRef) -> Result<()> {
        let metamodel = Arc::clone(&self.metamodel);
        let state = context.get(entity)?;
        if state.is_initialized() {
            return Ok(());
        }
        if state.state().is_removed() {
            return Err(removed(state.entity(), state.identity()));
        }

        let descriptor = metamodel.entity(state.entity())?;
        let base = descriptor.base_group();
        self.load_group(context, entity, descriptor, base, base.name())
            .await
    }

    /// Reads the association and loads its target's base group.
    pub async fn initialize_association(
        &mut self,
        context: &mut PersistenceContext,
        entity: EntityRef,
        attribute: &str,
    ) -> Result<Option<EntityRef>> {
        let Some(target) = self.read(context, entity, attribute).await?.into_entity()? else {
            return Ok(None);
        };
        if context.is_initialized(target) {
            return Ok(Some(target));
        }

        let index = self
            .metamodel
            .entity(context.get(entity)?.entity())?
            .attribute(attribute)?
            .index();
        if let Some(slot) = context.get_mut(entity)?.association_mut(index) {
            slot.begin_loading();
        }

        let result = self.initialize(context, target).await;

        let initialized = context.is_initialized(target);
        if let Some(slot) = context.get_mut(entity)?.association_mut(index) {
            slot.settle(initialized);
        }
        result.map(|_| Some(target))
    }

    async fn load_group(
        &mut self,
        context: &mut PersistenceContext,
        entity: EntityRef,
        descriptor: &EntityDescriptor,
        group: &FetchGroup,
        attribute: &str,
    ) -> Result<()> {
        if !self.coordinator.is_active() {
            return Err(OrmError::DetachedLazyAccess {
                entity: descriptor.name().to_string(),
                attribute: attribute.to_string(),
            });
        }

        let identity = context.get(entity)?.identity().clone();
        debug!(
            entity = descriptor.name(),
            %identity,
            group = group.name(),
            "lazy loading fetch group"
        );

        let row = self
            .coordinator
            .execute_fetch(descriptor, &identity, group)
            .await?
            .ok_or_else(|| OrmError::EntityNotFound {
                entity: descriptor.name().to_string(),
                identity: identity.to_string(),
            })?;
        self.stats.lazy_loads += 1;

        let mut initialized = Vec::new();
        apply_row(&self.metamodel, context, entity, group.id(), row, &mut initialized)?;
        fire_post_load(&self.metamodel, context, &initialized)
    }

    fn materialize(
        &mut self,
        context: &mut PersistenceContext,
        entity: EntityRef,
        attr: &AttributeDescriptor,
    ) -> Result<AttributeValue> {
        let index = attr.index();
        let state = context.get(entity)?;
        let value = state.value(index).cloned().unwrap_or(Value::Null);

        let Some(association) = attr.association() else {
            return Ok(AttributeValue::Scalar(value));
        };

        let slot = match state.association(index).copied() {
            Some(slot) => slot,
            None if value.is_null() => AssociationSlot::empty(),
            None => {
                let target = context.reference(self.metamodel.entity(&association.target)?, value);
                let slot = AssociationSlot::resolved(Some(target), context.is_initialized(target));
                context.get_mut(entity)?.set_association(index, slot);
                slot
            }
        };

        let Some(target) = slot.target() else {
            return Ok(AttributeValue::Entity(None));
        };

        let initialized = context.is_initialized(target);
        if let Some(slot) = context.get_mut(entity)?.association_mut(index) {
            if slot.state() == AssociationState::Joined {
                self.stats.join_initializations += 1;
            }
            slot.settle(initialized);
        }
        Ok(AttributeValue::Entity(Some(target)))
    }
}

fn removed(entity: &str, identity: &Value) -> OrmError {
    OrmError::EntityRemoved {
        entity: entity.to_string(),
        identity: identity.to_string(),
    }
}

fn check_writable(
    context: &PersistenceContext,
    entity: EntityRef,
    descriptor: &EntityDescriptor,
    attr: &AttributeDescriptor,
) -> Result<()> {
    if attr.is_identity() {
        return Err(OrmError::ImmutableIdentity(format!(
            "{}.{}",
            descriptor.name(),
            attr.name()
        )));
    }
    let state = context.get(entity)?;
    if state.state().is_removed() {
        return Err(removed(state.entity(), state.identity()));
    }
    Ok(())
}

/// Keeps an initialized inverse side pointing at its current owner.
#[allow(clippy::too_many_arguments)]
pub(crate) fn sync_inverse(
    metamodel: &Metamodel,
    context: &mut PersistenceContext,
    owner: &EntityDescriptor,
    attr: &AttributeDescriptor,
    association: &Association,
    entity: EntityRef,
    previous: Option<EntityRef>,
    target: Option<EntityRef>,
) -> Result<()> {
    let target_descriptor = metamodel.entity(&association.target)?;
    let Some(inverse) = target_descriptor.attributes().iter().find(|candidate| {
        candidate.association().is_some_and(|a| {
            a.target == owner.name() && a.mapped_by.as_deref() == Some(attr.name())
        })
    }) else {
        return Ok(());
    };

    if let Some(previous) = previous {
        let state = context.get_mut(previous)?;
        let points_here = state
            .association(inverse.index())
            .is_some_and(|slot| slot.target() == Some(entity));
        if points_here {
            state.write(inverse.index(), Value::Null, false);
            state.set_association(inverse.index(), AssociationSlot::empty());
        }
    }

    if let Some(target) = target {
        let owner_identity = context.get(entity)?.identity().clone();
        let owner_initialized = context.is_initialized(entity);
        let state = context.get_mut(target)?;
        if state.is_loaded(inverse.index()) {
            state.write(inverse.index(), owner_identity, false);
            state.set_association(
                inverse.index(),
                AssociationSlot::resolved(Some(entity), owner_initialized),
            );
        }
    }
    Ok(())
}

/// Applies one fetched row to `entity`, initializing joined targets along
/// the way. Instances whose base group became loaded are appended to
/// `initialized`, innermost first.
pub(crate) fn apply_row(
    metamodel: &Metamodel,
    context: &mut PersistenceContext,
    entity: EntityRef,
    group: FetchGroupId,
    row: EntityRow,
    initialized: &mut Vec<EntityRef>,
) -> Result<MarkOutcome> {
    let state = context.get(entity)?;
    if state.entity() != row.entity || *state.identity() != row.identity {
        return Err(OrmError::IdentityMismatch {
            entity: state.entity().to_string(),
            expected: state.key().to_string(),
            actual: format!("{}#{}", row.entity, row.identity),
        });
    }
    if state.is_group_loaded(group) {
        return Ok(MarkOutcome::AlreadyLoaded);
    }

    let descriptor = metamodel.entity(&row.entity)?;
    check_row(metamodel, context, descriptor, group, &row)?;

    let fetch_group = descriptor.fetch_group(group)?;
    let mut values: HashMap<String, Value> = row.values.into_iter().collect();
    let mut joined: HashMap<String, Joined> = row.joined.into_iter().collect();

    let incomplete = |attr: &AttributeDescriptor| OrmError::IncompleteFetch {
        entity: descriptor.name().to_string(),
        group: fetch_group.name().to_string(),
        attribute: attr.name().to_string(),
    };

    let mut loaded = Vec::with_capacity(fetch_group.len());
    let mut associations = Vec::new();

    for &idx in fetch_group.attributes() {
        let attr = descriptor.attribute_at(idx)?;
        let Some(association) = attr.association() else {
            let value = values.remove(attr.name()).ok_or_else(|| incomplete(attr))?;
            loaded.push((idx, value));
            continue;
        };

        let target_descriptor = metamodel.entity(&association.target)?;
        let (value, slot) = if association.is_join_fetched() {
            match joined.remove(attr.name()).ok_or_else(|| incomplete(attr))? {
                Joined::Absent => (Value::Null, AssociationSlot::empty()),
                Joined::Reference(identity) => {
                    let target = context.reference(target_descriptor, identity.clone());
                    let slot = AssociationSlot::resolved(Some(target), context.is_initialized(target));
                    (identity, slot)
                }
                Joined::Row(target_row) => {
                    let identity = target_row.identity.clone();
                    let target = context.reference(target_descriptor, identity.clone());
                    apply_row(
                        metamodel,
                        context,
                        target,
                        FetchGroupId::BASE,
                        *target_row,
                        initialized,
                    )?;
                    (identity, AssociationSlot::joined(target))
                }
            }
        } else {
            let identity = values.remove(attr.name()).ok_or_else(|| incomplete(attr))?;
            if identity.is_null() {
                (Value::Null, AssociationSlot::empty())
            } else {
                let target = context.reference(target_descriptor, identity.clone());
                let slot = AssociationSlot::resolved(Some(target), context.is_initialized(target));
                (identity, slot)
            }
        };
        loaded.push((idx, value));
        associations.push((idx, slot));
    }

    if let Some(extra) = values.keys().chain(joined.keys()).next() {
        return Err(OrmError::InconsistentFetchGroup(format!(
            "{}: fetched attribute '{}' is not part of group '{}'",
            descriptor.name(),
            extra,
            fetch_group.name()
        )));
    }

    let state = context.get_mut(entity)?;
    let outcome = state.mark_loaded(descriptor, group, loaded)?;
    for (idx, slot) in associations {
        state.set_association(idx, slot);
    }

    if outcome == MarkOutcome::Applied && group.is_base() {
        initialized.push(entity);
    }
    Ok(outcome)
}

/// Verifies a fetched row and every row joined into it against the group
/// layouts, so a rejected statement leaves no instance half applied.
fn check_row(
    metamodel: &Metamodel,
    context: &PersistenceContext,
    descriptor: &EntityDescriptor,
    group: FetchGroupId,
    row: &EntityRow,
) -> Result<()> {
    let fetch_group = descriptor.fetch_group(group)?;
    let mut values: Vec<&str> = row.values.iter().map(|(name, _)| name.as_str()).collect();
    let mut joined: Vec<(&str, &Joined)> = row
        .joined
        .iter()
        .map(|(name, joined)| (name.as_str(), joined))
        .collect();

    for &idx in fetch_group.attributes() {
        let attr = descriptor.attribute_at(idx)?;
        let join_fetched = attr.association().is_some_and(Association::is_join_fetched);
        let found = if join_fetched {
            joined
                .iter()
                .position(|(name, _)| *name == attr.name())
                .map(|pos| Some(joined.swap_remove(pos).1))
        } else {
            values
                .iter()
                .position(|name| *name == attr.name())
                .map(|pos| {
                    values.swap_remove(pos);
                    None
                })
        };
        let Some(found) = found else {
            return Err(OrmError::IncompleteFetch {
                entity: descriptor.name().to_string(),
                group: fetch_group.name().to_string(),
                attribute: attr.name().to_string(),
            });
        };

        if let (Some(association), Some(Joined::Row(target_row))) = (attr.association(), found) {
            let target = metamodel.entity(&association.target)?;
            if target_row.entity != target.name() {
                return Err(OrmError::IdentityMismatch {
                    entity: target.name().to_string(),
                    expected: target.name().to_string(),
                    actual: format!("{}#{}", target_row.entity, target_row.identity),
                });
            }
            let key = EntityKey::new(target.name(), target_row.identity.clone());
            if let Some(existing) = context.lookup(&key) {
                let state = context.get(existing)?;
                if state.state().is_removed() {
                    return Err(removed(state.entity(), state.identity()));
                }
                if state.is_group_loaded(FetchGroupId::BASE) {
                    continue;
                }
            }
            check_row(metamodel, context, target, FetchGroupId::BASE, target_row)?;
        }
    }

    if let Some(extra) = values.first().or(joined.first().map(|(name, _)| name)) {
        return Err(OrmError::InconsistentFetchGroup(format!(
            "{}: fetched attribute '{}' is not part of group '{}'",
            descriptor.name(),
            extra,
            fetch_group.name()
        )));
    }
    Ok(())
}

pub(crate) fn fire_post_load(
    metamodel: &Metamodel,
    context: &PersistenceContext,
    initialized: &[EntityRef],
) -> Result<()> {
    for &entity in initialized {
        let state = context.get(entity)?;
        let descriptor = metamodel.entity(state.entity())?;
        let mut values = state.loaded_values(descriptor);
        metamodel.dispatch(
            descriptor,
            LifecycleEvent::PostLoad,
            Some(state.identity()),
            &mut values,
        )?;
    }
    Ok(())
}

#[cfg(test)]
mod tests;
