use super::Value;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Global persistence context counter
static NEXT_CONTEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of a persistence context (one per unit of work).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContextId(pub u64);

impl ContextId {
    pub fn new() -> Self {
        ContextId(NEXT_CONTEXT_ID.fetch_add(1, Ordering::SeqCst))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for ContextId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ctx_{}", self.0)
    }
}

/// Entity type name plus identity value. Keys the identity map.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityKey {
    pub entity: String,
    pub identity: Value,
}

impl EntityKey {
    pub fn new(entity: impl Into<String>, identity: impl Into<Value>) -> Self {
        Self {
            entity: entity.into(),
            identity: identity.into(),
        }
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.entity, self.identity)
    }
}

/// Handle to an entity instance managed by a persistence context.
///
/// Handles are cheap to copy; all access goes through the owning unit of
/// work, which validates that the handle belongs to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EntityRef {
    context: ContextId,
    slot: usize,
}

impl EntityRef {
    pub(crate) fn new(context: ContextId, slot: usize) -> Self {
        Self { context, slot }
    }

    pub fn context(&self) -> ContextId {
        self.context
    }

    pub(crate) fn slot(&self) -> usize {
        self.slot
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.context, self.slot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_ids_increase() {
        let a = ContextId::new();
        let b = ContextId::new();
        assert!(b.as_u64() > a.as_u64());
    }

    #[test]
    fn test_entity_key_display() {
        let key = EntityKey::new("Customer", 1);
        assert_eq!(key.to_string(), "Customer#1");
    }
}
