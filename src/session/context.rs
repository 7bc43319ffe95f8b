use crate::core::{ContextId, EntityKey, EntityRef, OrmError, Result, Value};
use crate::metadata::EntityDescriptor;
use crate::proxy::EntityProxyState;
use std::collections::HashMap;

/// Identity map plus the proxy states it owns.
///
/// States live in an arena addressed by `EntityRef`; the identity map
/// guarantees at most one instance per `(entity, identity)`.
#[derive(Debug)]
pub struct PersistenceContext {
    id: ContextId,
    entries: Vec<Option<EntityProxyState>>,
    identity_map: HashMap<EntityKey, usize>,
}

impl PersistenceContext {
    pub fn new() -> Self {
        Self {
            id: ContextId::new(),
            entries: Vec::new(),
            identity_map: HashMap::new(),
        }
    }

    pub fn id(&self) -> ContextId {
        self.id
    }

    pub fn lookup(&self, key: &EntityKey) -> Option<EntityRef> {
        self.identity_map
            .get(key)
            .map(|&slot| EntityRef::new(self.id, slot))
    }

    pub fn attach(&mut self, state: EntityProxyState) -> Result<EntityRef> {
        if self.identity_map.contains_key(state.key()) {
            return Err(OrmError::ConstraintViolation(format!(
                "{} is already managed",
                state.key()
            )));
        }
        let slot = self.entries.len();
        self.identity_map.insert(state.key().clone(), slot);
        self.entries.push(Some(state));
        Ok(EntityRef::new(self.id, slot))
    }

    /// Finds the managed instance for `identity`, or creates an identity-only one.
    pub fn reference(&mut self, entity: &EntityDescriptor, identity: Value) -> EntityRef {
        let key = EntityKey::new(entity.name(), identity);
        if let Some(existing) = self.lookup(&key) {
            return existing;
        }
        let slot = self.entries.len();
        self.identity_map.insert(key.clone(), slot);
        self.entries
            .push(Some(EntityProxyState::uninitialized(key, entity)));
        EntityRef::new(self.id, slot)
    }

    pub fn get(&self, entity: EntityRef) -> Result<&EntityProxyState> {
        if entity.context() != self.id {
            return Err(OrmError::UnknownEntityRef(entity.to_string()));
        }
        self.entries
            .get(entity.slot())
            .and_then(Option::as_ref)
            .ok_or_else(|| OrmError::UnknownEntityRef(entity.to_string()))
    }

    pub fn get_mut(&mut self, entity: EntityRef) -> Result<&mut EntityProxyState> {
        if entity.context() != self.id {
            return Err(OrmError::UnknownEntityRef(entity.to_string()));
        }
        self.entries
            .get_mut(entity.slot())
            .and_then(Option::as_mut)
            .ok_or_else(|| OrmError::UnknownEntityRef(entity.to_string()))
    }

    pub fn is_initialized(&self, entity: EntityRef) -> bool {
        self.get(entity).is_ok_and(EntityProxyState::is_initialized)
    }

    /// Drops the instance from the context; its handle becomes invalid.
    pub fn evict(&mut self, entity: EntityRef) -> Result<EntityProxyState> {
        self.get(entity)?;
        let state = self.entries[entity.slot()]
            .take()
            .ok_or_else(|| OrmError::UnknownEntityRef(entity.to_string()))?;
        if self.identity_map.get(state.key()) == Some(&entity.slot()) {
            self.identity_map.remove(state.key());
        }
        Ok(state)
    }

    /// Frees the identity of a removed instance while keeping its state
    /// readable through the existing handle.
    pub fn unlink(&mut self, entity: EntityRef) -> Result<()> {
        let key = self.get(entity)?.key().clone();
        if self.identity_map.get(&key) == Some(&entity.slot()) {
            self.identity_map.remove(&key);
        }
        Ok(())
    }

    /// Handles of every live instance, in creation order.
    pub fn refs(&self) -> Vec<EntityRef> {
        self.entries
            .iter()
            .enumerate()
            .filter(|(_, entry)| entry.is_some())
            .map(|(slot, _)| EntityRef::new(self.id, slot))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.iter().filter(|entry| entry.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.identity_map.clear();
    }
}

impl Default for PersistenceContext {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures;
    use crate::proxy::ProxyState;

    #[test]
    fn test_reference_is_unique_per_identity() {
        let model = fixtures::customer_supplemental().unwrap();
        let customer = model.entity("Customer").unwrap();
        let mut context = PersistenceContext::new();

        let a = context.reference(customer, Value::from(1));
        let b = context.reference(customer, Value::from(1));
        let c = context.reference(customer, Value::from(2));

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(context.len(), 2);
        assert_eq!(context.get(a).unwrap().state(), &ProxyState::IdentityOnly);
    }

    #[test]
    fn test_foreign_handles_rejected() {
        let model = fixtures::customer_supplemental().unwrap();
        let customer = model.entity("Customer").unwrap();
        let mut first = PersistenceContext::new();
        let second = PersistenceContext::new();

        let handle = first.reference(customer, Value::from(1));
        assert!(matches!(
            second.get(handle),
            Err(OrmError::UnknownEntityRef(_))
        ));
    }

    #[test]
    fn test_evict_and_unlink() {
        let model = fixtures::customer_supplemental().unwrap();
        let customer = model.entity("Customer").unwrap();
        let mut context = PersistenceContext::new();
        let key = EntityKey::new("Customer", 1);

        let handle = context.reference(customer, Value::from(1));
        context.unlink(handle).unwrap();
        assert!(context.lookup(&key).is_none());
        assert!(context.get(handle).is_ok());

        context.evict(handle).unwrap();
        assert!(context.get(handle).is_err());
        assert!(context.is_empty());
    }

    #[test]
    fn test_attach_rejects_duplicates() {
        let model = fixtures::customer_supplemental().unwrap();
        let customer = model.entity("Customer").unwrap();
        let mut context = PersistenceContext::new();

        let key = EntityKey::new("Customer", 7);
        context
            .attach(EntityProxyState::uninitialized(key.clone(), customer))
            .unwrap();
        assert!(
            context
                .attach(EntityProxyState::uninitialized(key, customer))
                .is_err()
        );
    }
}
