use crate::core::{EntityKey, OrmError, Result, Value};
use crate::proxy::ProxyState;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// An instance taken out of its unit of work.
///
/// Owns whatever was materialized at detach time. Attributes that were never
/// loaded cannot be read any more.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetachedEntity {
    key: EntityKey,
    state: ProxyState,
    /// `None` for attributes that were not loaded
    attributes: BTreeMap<String, Option<Value>>,
}

impl DetachedEntity {
    pub(crate) fn new(
        key: EntityKey,
        state: ProxyState,
        attributes: BTreeMap<String, Option<Value>>,
    ) -> Self {
        Self {
            key,
            state,
            attributes,
        }
    }

    pub fn key(&self) -> &EntityKey {
        &self.key
    }

    pub fn entity(&self) -> &str {
        &self.key.entity
    }

    pub fn identity(&self) -> &Value {
        &self.key.identity
    }

    /// Load state at detach time.
    pub fn state(&self) -> &ProxyState {
        &self.state
    }

    pub fn is_loaded(&self, attribute: &str) -> bool {
        matches!(self.attributes.get(attribute), Some(Some(_)))
    }

    pub fn get(&self, attribute: &str) -> Result<&Value> {
        match self.attributes.get(attribute) {
            Some(Some(value)) => Ok(value),
            Some(None) => Err(OrmError::DetachedLazyAccess {
                entity: self.key.entity.clone(),
                attribute: attribute.to_string(),
            }),
            None => Err(OrmError::AttributeNotFound(
                attribute.to_string(),
                self.key.entity.clone(),
            )),
        }
    }

    pub fn attributes(&self) -> &BTreeMap<String, Option<Value>> {
        &self.attributes
    }

    pub fn to_msgpack(&self) -> Result<Vec<u8>> {
        Ok(rmp_serde::to_vec_named(self)?)
    }

    pub fn from_msgpack(bytes: &[u8]) -> Result<Self> {
        Ok(rmp_serde::from_slice(bytes)?)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detached() -> DetachedEntity {
        let mut attributes = BTreeMap::new();
        attributes.insert("id".to_string(), Some(Value::from(1)));
        attributes.insert("name".to_string(), Some(Value::from("Acme Brick")));
        attributes.insert("notes".to_string(), None);
        DetachedEntity::new(
            EntityKey::new("Customer", 1),
            ProxyState::PartiallyLoaded([crate::metadata::FetchGroupId::BASE].into()),
            attributes,
        )
    }

    #[test]
    fn test_unloaded_attribute_is_detached_access() {
        let entity = detached();
        assert_eq!(entity.get("name").unwrap(), &Value::from("Acme Brick"));
        assert!(matches!(
            entity.get("notes"),
            Err(OrmError::DetachedLazyAccess { .. })
        ));
        assert!(matches!(
            entity.get("missing"),
            Err(OrmError::AttributeNotFound(..))
        ));
        assert!(entity.is_loaded("id"));
        assert!(!entity.is_loaded("notes"));
    }

    #[test]
    fn test_msgpack_encoding() {
        let entity = detached();
        let bytes = entity.to_msgpack().unwrap();
        let decoded = DetachedEntity::from_msgpack(&bytes).unwrap();
        assert_eq!(decoded, entity);
        assert!(decoded.get("notes").is_err());
    }

    #[test]
    fn test_json_encoding() {
        let entity = detached();
        let json = entity.to_json().unwrap();
        assert!(json.contains("Acme Brick"));
        assert_eq!(DetachedEntity::from_json(&json).unwrap(), entity);
    }
}
