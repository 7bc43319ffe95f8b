// ============================================================================
// Entity Proxy State
// ============================================================================
//
// Per-instance bookkeeping of which attributes are materialized. The tag
// (`ProxyState`) drives the interceptor's dispatch; `mark_loaded` is the only
// way a fetch group becomes loaded.
//
// State transitions:
//
//   IdentityOnly ──mark_loaded──> PartiallyLoaded ──mark_loaded*──> FullyLoaded
//        │                              │                                │
//        └──────────────────────── remove ──────────────────────────> Removed
//
// ============================================================================

use super::association::AssociationSlot;
use crate::core::{EntityKey, OrmError, Result, Value};
use crate::metadata::{EntityDescriptor, FetchGroupId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProxyState {
    /// Only the identity is known
    IdentityOnly,
    /// Some fetch groups are loaded
    PartiallyLoaded(BTreeSet<FetchGroupId>),
    FullyLoaded,
    Removed,
}

impl ProxyState {
    pub fn is_removed(&self) -> bool {
        matches!(self, Self::Removed)
    }
}

impl fmt::Display for ProxyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::IdentityOnly => write!(f, "IDENTITY_ONLY"),
            Self::PartiallyLoaded(groups) => {
                let ids: Vec<String> = groups.iter().map(|g| g.0.to_string()).collect();
                write!(f, "PARTIALLY_LOADED[{}]", ids.join(","))
            }
            Self::FullyLoaded => write!(f, "FULLY_LOADED"),
            Self::Removed => write!(f, "REMOVED"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AttributeSlot {
    Unloaded,
    Loaded(Value),
    /// Written while its fetch group was still unloaded
    Written(Value),
}

impl AttributeSlot {
    pub fn value(&self) -> Option<&Value> {
        match self {
            Self::Unloaded => None,
            Self::Loaded(v) | Self::Written(v) => Some(v),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkOutcome {
    Applied,
    /// The group was already loaded; nothing changed
    AlreadyLoaded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Unchanged,
    Updated,
    /// Value recorded without loading the attribute's group
    Overlay,
}

#[derive(Debug, Clone)]
pub struct EntityProxyState {
    key: EntityKey,
    state: ProxyState,
    group_count: usize,
    identity_index: usize,
    slots: Vec<AttributeSlot>,
    associations: BTreeMap<usize, AssociationSlot>,
    dirty: BTreeSet<usize>,
}

impl EntityProxyState {
    /// An identity-only instance: nothing but the key is known.
    pub fn uninitialized(key: EntityKey, entity: &EntityDescriptor) -> Self {
        let identity_index = entity.identity().index();
        let mut slots = vec![AttributeSlot::Unloaded; entity.attributes().len()];
        slots[identity_index] = AttributeSlot::Loaded(key.identity.clone());

        Self {
            key,
            state: ProxyState::IdentityOnly,
            group_count: entity.group_count(),
            identity_index,
            slots,
            associations: BTreeMap::new(),
            dirty: BTreeSet::new(),
        }
    }

    /// A fully loaded instance, e.g. right after persist.
    pub fn managed(key: EntityKey, entity: &EntityDescriptor, mut values: BTreeMap<usize, Value>) -> Self {
        let mut state = Self::uninitialized(key, entity);
        for (idx, slot) in state.slots.iter_mut().enumerate() {
            if idx != state.identity_index {
                *slot = AttributeSlot::Loaded(values.remove(&idx).unwrap_or(Value::Null));
            }
        }
        state.state = ProxyState::FullyLoaded;
        state
    }

    pub fn key(&self) -> &EntityKey {
        &self.key
    }

    pub fn entity(&self) -> &str {
        &self.key.entity
    }

    /// Always available, whatever the state.
    pub fn identity(&self) -> &Value {
        &self.key.identity
    }

    pub fn state(&self) -> &ProxyState {
        &self.state
    }

    /// Whether the base group is loaded.
    pub fn is_initialized(&self) -> bool {
        self.is_group_loaded(FetchGroupId::BASE)
    }

    pub fn is_group_loaded(&self, group: FetchGroupId) -> bool {
        match &self.state {
            ProxyState::FullyLoaded => true,
            ProxyState::PartiallyLoaded(groups) => groups.contains(&group),
            ProxyState::IdentityOnly | ProxyState::Removed => false,
        }
    }

    pub fn is_loaded(&self, attribute: usize) -> bool {
        attribute == self.identity_index
            || self
                .slots
                .get(attribute)
                .is_some_and(|slot| slot.value().is_some())
    }

    pub fn slot(&self, attribute: usize) -> Option<&AttributeSlot> {
        self.slots.get(attribute)
    }

    pub fn value(&self, attribute: usize) -> Option<&Value> {
        self.slots.get(attribute).and_then(AttributeSlot::value)
    }

    /// Materializes one fetch group.
    ///
    /// Idempotent: a group that is already loaded is left untouched and
    /// `AlreadyLoaded` is reported, so the first materialized values stay
    /// authoritative for the lifetime of the unit of work. Attributes written
    /// before the load keep their written value.
    pub fn mark_loaded(
        &mut self,
        entity: &EntityDescriptor,
        group: FetchGroupId,
        values: Vec<(usize, Value)>,
    ) -> Result<MarkOutcome> {
        if self.state.is_removed() {
            return Err(OrmError::EntityRemoved {
                entity: self.key.entity.clone(),
                identity: self.key.identity.to_string(),
            });
        }
        if self.is_group_loaded(group) {
            return Ok(MarkOutcome::AlreadyLoaded);
        }

        let descriptor = entity.fetch_group(group)?;
        let mut incoming = BTreeMap::new();
        for (idx, value) in values {
            if !descriptor.contains(idx) {
                return Err(OrmError::InconsistentFetchGroup(format!(
                    "{}: attribute #{} is not part of group '{}'",
                    entity.name(),
                    idx,
                    descriptor.name()
                )));
            }
            incoming.insert(idx, value);
        }
        if let Some(&missing) = descriptor
            .attributes()
            .iter()
            .find(|idx| !incoming.contains_key(idx))
        {
            return Err(OrmError::IncompleteFetch {
                entity: entity.name().to_string(),
                group: descriptor.name().to_string(),
                attribute: entity.attribute_at(missing)?.name().to_string(),
            });
        }

        for (idx, value) in incoming {
            let slot = &mut self.slots[idx];
            *slot = match std::mem::replace(slot, AttributeSlot::Unloaded) {
                AttributeSlot::Written(written) => AttributeSlot::Loaded(written),
                _ => AttributeSlot::Loaded(value),
            };
        }

        let mut loaded = match std::mem::replace(&mut self.state, ProxyState::IdentityOnly) {
            ProxyState::PartiallyLoaded(groups) => groups,
            _ => BTreeSet::new(),
        };
        loaded.insert(group);
        self.state = if loaded.len() >= self.group_count {
            ProxyState::FullyLoaded
        } else {
            ProxyState::PartiallyLoaded(loaded)
        };

        Ok(MarkOutcome::Applied)
    }

    pub(crate) fn write(&mut self, attribute: usize, value: Value, track_dirty: bool) -> WriteOutcome {
        let slot = &mut self.slots[attribute];
        let outcome = match slot {
            AttributeSlot::Loaded(current) if *current == value => return WriteOutcome::Unchanged,
            AttributeSlot::Loaded(current) => {
                *current = value;
                WriteOutcome::Updated
            }
            AttributeSlot::Written(current) => {
                *current = value;
                WriteOutcome::Overlay
            }
            AttributeSlot::Unloaded => {
                *slot = AttributeSlot::Written(value);
                WriteOutcome::Overlay
            }
        };
        if track_dirty {
            self.dirty.insert(attribute);
        }
        outcome
    }

    /// Stores a value the database generated; not a user change.
    pub(crate) fn apply_generated(&mut self, attribute: usize, value: Value) {
        if let Some(slot) = self.slots.get_mut(attribute) {
            *slot = AttributeSlot::Loaded(value);
        }
    }

    pub(crate) fn mark_removed(&mut self) {
        self.state = ProxyState::Removed;
        self.dirty.clear();
    }

    pub fn is_dirty(&self) -> bool {
        !self.dirty.is_empty()
    }

    pub fn dirty_attributes(&self) -> impl Iterator<Item = usize> + '_ {
        self.dirty.iter().copied()
    }

    pub(crate) fn clear_dirty(&mut self) {
        self.dirty.clear();
    }

    pub fn association(&self, attribute: usize) -> Option<&AssociationSlot> {
        self.associations.get(&attribute)
    }

    pub(crate) fn association_mut(&mut self, attribute: usize) -> Option<&mut AssociationSlot> {
        self.associations.get_mut(&attribute)
    }

    pub(crate) fn set_association(&mut self, attribute: usize, slot: AssociationSlot) {
        self.associations.insert(attribute, slot);
    }

    /// Name-keyed snapshot of every available value, identity included.
    pub fn loaded_values(&self, entity: &EntityDescriptor) -> BTreeMap<String, Value> {
        entity
            .attributes()
            .iter()
            .filter_map(|attr| {
                self.value(attr.index())
                    .map(|v| (attr.name().to_string(), v.clone()))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{AttributeMapping, EntityMapping, Metamodel};

    fn model() -> Metamodel {
        Metamodel::builder()
            .entity(
                EntityMapping::new("Article", "article")
                    .attribute(AttributeMapping::identity("id"))
                    .attribute(AttributeMapping::basic("title"))
                    .attribute(AttributeMapping::basic("body").lazy()),
            )
            .build()
            .unwrap()
    }

    #[test]
    fn test_identity_available_when_uninitialized() {
        let model = model();
        let article = model.entity("Article").unwrap();
        let state = EntityProxyState::uninitialized(EntityKey::new("Article", 5), article);

        assert_eq!(state.state(), &ProxyState::IdentityOnly);
        assert_eq!(state.identity(), &Value::from(5));
        assert!(state.is_loaded(0));
        assert!(!state.is_loaded(1));
    }

    #[test]
    fn test_mark_loaded_transitions() {
        let model = model();
        let article = model.entity("Article").unwrap();
        let mut state = EntityProxyState::uninitialized(EntityKey::new("Article", 5), article);

        state
            .mark_loaded(article, FetchGroupId(0), vec![(1, Value::from("Intro"))])
            .unwrap();
        assert!(matches!(state.state(), ProxyState::PartiallyLoaded(g) if g.len() == 1));
        assert!(state.is_initialized());

        state
            .mark_loaded(article, FetchGroupId(1), vec![(2, Value::from("..."))])
            .unwrap();
        assert_eq!(state.state(), &ProxyState::FullyLoaded);
    }

    #[test]
    fn test_mark_loaded_is_idempotent() {
        let model = model();
        let article = model.entity("Article").unwrap();
        let mut state = EntityProxyState::uninitialized(EntityKey::new("Article", 5), article);

        let values = vec![(1, Value::from("Intro"))];
        assert_eq!(
            state.mark_loaded(article, FetchGroupId(0), values.clone()).unwrap(),
            MarkOutcome::Applied
        );
        let before = state.state().clone();
        assert_eq!(
            state.mark_loaded(article, FetchGroupId(0), values).unwrap(),
            MarkOutcome::AlreadyLoaded
        );
        assert_eq!(state.state(), &before);
        assert_eq!(state.value(1), Some(&Value::from("Intro")));
    }

    #[test]
    fn test_mark_loaded_rejects_foreign_and_missing_attributes() {
        let model = model();
        let article = model.entity("Article").unwrap();
        let mut state = EntityProxyState::uninitialized(EntityKey::new("Article", 5), article);

        let err = state
            .mark_loaded(article, FetchGroupId(0), vec![(1, Value::Null), (2, Value::Null)])
            .unwrap_err();
        assert!(matches!(err, OrmError::InconsistentFetchGroup(_)));

        let err = state.mark_loaded(article, FetchGroupId(0), vec![]).unwrap_err();
        assert!(matches!(err, OrmError::IncompleteFetch { .. }));
        assert_eq!(state.state(), &ProxyState::IdentityOnly);
    }

    #[test]
    fn test_written_value_survives_group_load() {
        let model = model();
        let article = model.entity("Article").unwrap();
        let mut state = EntityProxyState::uninitialized(EntityKey::new("Article", 5), article);

        assert_eq!(state.write(2, Value::from("draft"), true), WriteOutcome::Overlay);
        assert!(state.is_loaded(2));
        assert!(!state.is_group_loaded(FetchGroupId(1)));

        state
            .mark_loaded(article, FetchGroupId(1), vec![(2, Value::from("stored"))])
            .unwrap();
        assert_eq!(state.value(2), Some(&Value::from("draft")));
        assert!(state.is_dirty());
    }

    #[test]
    fn test_removed_rejects_loading() {
        let model = model();
        let article = model.entity("Article").unwrap();
        let mut state = EntityProxyState::uninitialized(EntityKey::new("Article", 5), article);
        state.mark_removed();

        let err = state
            .mark_loaded(article, FetchGroupId(0), vec![(1, Value::Null)])
            .unwrap_err();
        assert!(matches!(err, OrmError::EntityRemoved { .. }));
    }

    #[test]
    fn test_managed_is_fully_loaded() {
        let model = model();
        let article = model.entity("Article").unwrap();
        let mut values = BTreeMap::new();
        values.insert(1, Value::from("Intro"));
        let state = EntityProxyState::managed(EntityKey::new("Article", 5), article, values);

        assert_eq!(state.state(), &ProxyState::FullyLoaded);
        assert_eq!(state.value(1), Some(&Value::from("Intro")));
        assert_eq!(state.value(2), Some(&Value::Null));
        assert!(!state.is_dirty());
    }
}
