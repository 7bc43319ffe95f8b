// ============================================================================
// Lifecycle Callbacks
// ============================================================================
//
// Each entity mapping carries a callback container: a description, a
// target-class reference and one optional slot per lifecycle event. A slot
// names a callback registered on the metamodel builder; the unit of work and
// the interceptor dispatch the named callback around load/store transitions.
//
// ============================================================================

use crate::core::{Result, Value};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum LifecycleEvent {
    PrePersist,
    PostPersist,
    PreRemove,
    PostRemove,
    PreUpdate,
    PostUpdate,
    PostLoad,
}

impl LifecycleEvent {
    pub const ALL: [LifecycleEvent; 7] = [
        Self::PrePersist,
        Self::PostPersist,
        Self::PreRemove,
        Self::PostRemove,
        Self::PreUpdate,
        Self::PostUpdate,
        Self::PostLoad,
    ];

    /// Whether changes a callback makes to the context values are applied.
    pub fn accepts_changes(&self) -> bool {
        matches!(self, Self::PrePersist | Self::PreUpdate)
    }
}

impl fmt::Display for LifecycleEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::PrePersist => "pre-persist",
            Self::PostPersist => "post-persist",
            Self::PreRemove => "pre-remove",
            Self::PostRemove => "post-remove",
            Self::PreUpdate => "pre-update",
            Self::PostUpdate => "post-update",
            Self::PostLoad => "post-load",
        };
        write!(f, "{}", name)
    }
}

/// A hook slot: the name of a registered callback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LifecycleCallback {
    pub method_name: String,
}

impl LifecycleCallback {
    pub fn new(method_name: impl Into<String>) -> Self {
        Self {
            method_name: method_name.into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LifecycleCallbackContainer {
    description: Option<String>,
    class: Option<String>,
    pre_persist: Option<LifecycleCallback>,
    post_persist: Option<LifecycleCallback>,
    pre_remove: Option<LifecycleCallback>,
    post_remove: Option<LifecycleCallback>,
    pre_update: Option<LifecycleCallback>,
    post_update: Option<LifecycleCallback>,
    post_load: Option<LifecycleCallback>,
}

impl LifecycleCallbackContainer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn set_description(&mut self, value: impl Into<String>) {
        self.description = Some(value.into());
    }

    /// Target class the callbacks were declared on, when it differs from the entity.
    pub fn class(&self) -> Option<&str> {
        self.class.as_deref()
    }

    pub fn set_class(&mut self, value: impl Into<String>) {
        self.class = Some(value.into());
    }

    pub fn pre_persist(&self) -> Option<&LifecycleCallback> {
        self.pre_persist.as_ref()
    }

    pub fn post_persist(&self) -> Option<&LifecycleCallback> {
        self.post_persist.as_ref()
    }

    pub fn pre_remove(&self) -> Option<&LifecycleCallback> {
        self.pre_remove.as_ref()
    }

    pub fn post_remove(&self) -> Option<&LifecycleCallback> {
        self.post_remove.as_ref()
    }

    pub fn pre_update(&self) -> Option<&LifecycleCallback> {
        self.pre_update.as_ref()
    }

    pub fn post_update(&self) -> Option<&LifecycleCallback> {
        self.post_update.as_ref()
    }

    pub fn post_load(&self) -> Option<&LifecycleCallback> {
        self.post_load.as_ref()
    }

    pub fn callback(&self, event: LifecycleEvent) -> Option<&LifecycleCallback> {
        match event {
            LifecycleEvent::PrePersist => self.pre_persist(),
            LifecycleEvent::PostPersist => self.post_persist(),
            LifecycleEvent::PreRemove => self.pre_remove(),
            LifecycleEvent::PostRemove => self.post_remove(),
            LifecycleEvent::PreUpdate => self.pre_update(),
            LifecycleEvent::PostUpdate => self.post_update(),
            LifecycleEvent::PostLoad => self.post_load(),
        }
    }

    pub fn set_callback(&mut self, event: LifecycleEvent, callback: Option<LifecycleCallback>) {
        let slot = match event {
            LifecycleEvent::PrePersist => &mut self.pre_persist,
            LifecycleEvent::PostPersist => &mut self.post_persist,
            LifecycleEvent::PreRemove => &mut self.pre_remove,
            LifecycleEvent::PostRemove => &mut self.post_remove,
            LifecycleEvent::PreUpdate => &mut self.pre_update,
            LifecycleEvent::PostUpdate => &mut self.post_update,
            LifecycleEvent::PostLoad => &mut self.post_load,
        };
        *slot = callback;
    }

    /// Configured slots in event order.
    pub fn configured(&self) -> impl Iterator<Item = (LifecycleEvent, &LifecycleCallback)> + '_ {
        LifecycleEvent::ALL
            .into_iter()
            .filter_map(|event| self.callback(event).map(|cb| (event, cb)))
    }

    pub fn is_empty(&self) -> bool {
        self.configured().next().is_none()
    }
}

/// What a callback sees: the event, the entity and a map of attribute values.
///
/// For pre-persist the map is the insert payload and for pre-update the loaded
/// state; changes made there are applied. For the other events the map is a
/// snapshot of loaded state and changes are discarded.
pub struct CallbackContext<'a> {
    event: LifecycleEvent,
    entity: &'a str,
    identity: Option<&'a Value>,
    values: &'a mut BTreeMap<String, Value>,
}

impl<'a> CallbackContext<'a> {
    pub fn new(
        event: LifecycleEvent,
        entity: &'a str,
        identity: Option<&'a Value>,
        values: &'a mut BTreeMap<String, Value>,
    ) -> Self {
        Self {
            event,
            entity,
            identity,
            values,
        }
    }

    pub fn event(&self) -> LifecycleEvent {
        self.event
    }

    pub fn entity(&self) -> &str {
        self.entity
    }

    pub fn identity(&self) -> Option<&Value> {
        self.identity
    }

    pub fn get(&self, attribute: &str) -> Option<&Value> {
        self.values.get(attribute)
    }

    pub fn set(&mut self, attribute: impl Into<String>, value: impl Into<Value>) {
        self.values.insert(attribute.into(), value.into());
    }

    pub fn values(&self) -> &BTreeMap<String, Value> {
        &*self.values
    }
}

pub type LifecycleCallbackFn = Arc<dyn Fn(&mut CallbackContext<'_>) -> Result<()> + Send + Sync>;

/// Named callbacks referenced from callback containers.
#[derive(Clone, Default)]
pub struct CallbackRegistry {
    callbacks: HashMap<String, LifecycleCallbackFn>,
}

impl CallbackRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, name: impl Into<String>, callback: F)
    where
        F: Fn(&mut CallbackContext<'_>) -> Result<()> + Send + Sync + 'static,
    {
        self.callbacks.insert(name.into(), Arc::new(callback));
    }

    pub fn get(&self, name: &str) -> Option<&LifecycleCallbackFn> {
        self.callbacks.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.callbacks.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.callbacks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.callbacks.is_empty()
    }
}

impl fmt::Debug for CallbackRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&String> = self.callbacks.keys().collect();
        names.sort();
        f.debug_struct("CallbackRegistry").field("callbacks", &names).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slots_round_trip() {
        let mut container = LifecycleCallbackContainer::new();
        assert!(container.is_empty());

        container.set_description("audit hooks");
        container.set_class("AuditListener");
        container.set_callback(LifecycleEvent::PostLoad, Some(LifecycleCallback::new("onLoad")));
        container.set_callback(LifecycleEvent::PrePersist, Some(LifecycleCallback::new("stamp")));

        assert_eq!(container.description(), Some("audit hooks"));
        assert_eq!(container.class(), Some("AuditListener"));
        assert_eq!(container.post_load().unwrap().method_name, "onLoad");
        assert!(container.pre_remove().is_none());

        let configured: Vec<LifecycleEvent> = container.configured().map(|(e, _)| e).collect();
        assert_eq!(
            configured,
            vec![LifecycleEvent::PrePersist, LifecycleEvent::PostLoad]
        );

        container.set_callback(LifecycleEvent::PostLoad, None);
        assert!(container.post_load().is_none());
    }

    #[test]
    fn test_registry_invocation() {
        let mut registry = CallbackRegistry::new();
        registry.register("stamp", |ctx| {
            ctx.set("created_by", "system");
            Ok(())
        });

        let mut values = BTreeMap::new();
        let mut ctx = CallbackContext::new(LifecycleEvent::PrePersist, "Event", None, &mut values);
        (registry.get("stamp").unwrap())(&mut ctx).unwrap();

        assert_eq!(values.get("created_by"), Some(&Value::from("system")));
        assert!(LifecycleEvent::PrePersist.accepts_changes());
        assert!(!LifecycleEvent::PostLoad.accepts_changes());
    }
}
