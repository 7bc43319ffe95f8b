use super::fetch_group::{FetchGroup, FetchGroupId};
use super::generation::{IdentityGeneration, ValueGeneration};
use super::lifecycle::LifecycleCallbackContainer;
use crate::core::{OrmError, Result};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FetchTiming {
    #[default]
    Eager,
    Lazy,
}

/// How an association's target is obtained when its owner's group loads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FetchMode {
    /// Only the target identity is read; the target becomes an identity-only proxy
    #[default]
    Select,
    /// The target's base group is joined into the owner's query
    Join,
}

/// To-one association metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Association {
    pub target: String,
    /// Attribute on the target holding the foreign key (inverse side only)
    pub mapped_by: Option<String>,
    pub fetch_mode: FetchMode,
    pub optional: bool,
}

impl Association {
    pub fn is_inverse(&self) -> bool {
        self.mapped_by.is_some()
    }

    pub fn is_join_fetched(&self) -> bool {
        self.fetch_mode == FetchMode::Join
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttributeKind {
    Identity,
    Basic,
    ToOne(Association),
}

/// Static metadata of one mapped attribute. Shared read-only by every
/// instance of the owning entity type.
#[derive(Debug, Clone)]
pub struct AttributeDescriptor {
    pub(crate) name: String,
    pub(crate) column: String,
    pub(crate) owner: String,
    pub(crate) index: usize,
    pub(crate) kind: AttributeKind,
    pub(crate) timing: FetchTiming,
    pub(crate) group: Option<FetchGroupId>,
    pub(crate) generation: Option<ValueGeneration>,
}

impl AttributeDescriptor {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn column(&self) -> &str {
        &self.column
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn kind(&self) -> &AttributeKind {
        &self.kind
    }

    pub fn timing(&self) -> FetchTiming {
        self.timing
    }

    /// Fetch group the attribute belongs to; `None` for the identity.
    pub fn group(&self) -> Option<FetchGroupId> {
        self.group
    }

    pub fn generation(&self) -> Option<&ValueGeneration> {
        self.generation.as_ref()
    }

    pub fn is_identity(&self) -> bool {
        matches!(self.kind, AttributeKind::Identity)
    }

    pub fn is_lazy(&self) -> bool {
        self.timing == FetchTiming::Lazy
    }

    pub fn association(&self) -> Option<&Association> {
        match &self.kind {
            AttributeKind::ToOne(association) => Some(association),
            _ => None,
        }
    }

    /// Whether the attribute is stored in a column of the owner's table.
    /// Inverse associations are not.
    pub fn is_column_backed(&self) -> bool {
        !self.association().is_some_and(Association::is_inverse)
    }
}

#[derive(Debug, Clone)]
pub struct EntityDescriptor {
    pub(crate) name: String,
    pub(crate) table: String,
    pub(crate) identity: usize,
    pub(crate) identity_generation: IdentityGeneration,
    pub(crate) attributes: Vec<AttributeDescriptor>,
    pub(crate) by_name: HashMap<String, usize>,
    pub(crate) groups: Vec<FetchGroup>,
    pub(crate) callbacks: LifecycleCallbackContainer,
}

impl EntityDescriptor {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn identity(&self) -> &AttributeDescriptor {
        &self.attributes[self.identity]
    }

    pub fn identity_generation(&self) -> IdentityGeneration {
        self.identity_generation
    }

    pub fn attributes(&self) -> &[AttributeDescriptor] {
        &self.attributes
    }

    pub fn attribute(&self, name: &str) -> Result<&AttributeDescriptor> {
        self.by_name
            .get(name)
            .map(|&idx| &self.attributes[idx])
            .ok_or_else(|| OrmError::AttributeNotFound(name.to_string(), self.name.clone()))
    }

    pub fn attribute_at(&self, index: usize) -> Result<&AttributeDescriptor> {
        self.attributes.get(index).ok_or_else(|| {
            OrmError::AttributeNotFound(format!("#{}", index), self.name.clone())
        })
    }

    pub fn fetch_groups(&self) -> &[FetchGroup] {
        &self.groups
    }

    pub fn fetch_group(&self, id: FetchGroupId) -> Result<&FetchGroup> {
        self.groups.get(id.0).ok_or_else(|| {
            OrmError::InconsistentFetchGroup(format!(
                "entity '{}' has no fetch group #{}",
                self.name, id.0
            ))
        })
    }

    pub fn base_group(&self) -> &FetchGroup {
        &self.groups[FetchGroupId::BASE.0]
    }

    pub fn group_count(&self) -> usize {
        self.groups.len()
    }

    pub fn callbacks(&self) -> &LifecycleCallbackContainer {
        &self.callbacks
    }
}
