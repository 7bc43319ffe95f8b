//! Builder-style mapping declarations, turned into descriptors by
//! [`MetamodelBuilder::build`](super::MetamodelBuilder::build).

use super::descriptor::{Association, AttributeKind, FetchMode, FetchTiming};
use super::generation::{IdentityGeneration, ValueGeneration};
use super::lifecycle::{LifecycleCallback, LifecycleCallbackContainer, LifecycleEvent};

#[derive(Debug, Clone)]
pub struct AttributeMapping {
    pub(crate) name: String,
    pub(crate) column: Option<String>,
    pub(crate) kind: AttributeKind,
    pub(crate) timing: FetchTiming,
    pub(crate) group: Option<String>,
    pub(crate) generation: Option<ValueGeneration>,
    pub(crate) identity_generation: IdentityGeneration,
}

impl AttributeMapping {
    fn with_kind(name: impl Into<String>, kind: AttributeKind) -> Self {
        Self {
            name: name.into(),
            column: None,
            kind,
            timing: FetchTiming::Eager,
            group: None,
            generation: None,
            identity_generation: IdentityGeneration::Assigned,
        }
    }

    pub fn identity(name: impl Into<String>) -> Self {
        Self::with_kind(name, AttributeKind::Identity)
    }

    pub fn basic(name: impl Into<String>) -> Self {
        Self::with_kind(name, AttributeKind::Basic)
    }

    pub fn to_one(name: impl Into<String>, target: impl Into<String>) -> Self {
        Self::with_kind(
            name,
            AttributeKind::ToOne(Association {
                target: target.into(),
                mapped_by: None,
                fetch_mode: FetchMode::Select,
                optional: true,
            }),
        )
    }

    pub fn column(mut self, column: impl Into<String>) -> Self {
        self.column = Some(column.into());
        self
    }

    pub fn lazy(mut self) -> Self {
        self.timing = FetchTiming::Lazy;
        self
    }

    /// Places a lazy attribute in the named fetch group.
    pub fn group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self
    }

    pub fn mapped_by(mut self, attribute: impl Into<String>) -> Self {
        if let AttributeKind::ToOne(association) = &mut self.kind {
            association.mapped_by = Some(attribute.into());
        }
        self
    }

    pub fn fetch_mode(mut self, mode: FetchMode) -> Self {
        if let AttributeKind::ToOne(association) = &mut self.kind {
            association.fetch_mode = mode;
        }
        self
    }

    pub fn optional(mut self, optional: bool) -> Self {
        if let AttributeKind::ToOne(association) = &mut self.kind {
            association.optional = optional;
        }
        self
    }

    pub fn generated(mut self, generation: ValueGeneration) -> Self {
        self.generation = Some(generation);
        self
    }

    /// Identity generation strategy; only meaningful on the identity attribute.
    pub fn generated_identity(mut self, strategy: IdentityGeneration) -> Self {
        self.identity_generation = strategy;
        self
    }
}

#[derive(Debug, Clone)]
pub struct EntityMapping {
    pub(crate) name: String,
    pub(crate) table: String,
    pub(crate) attributes: Vec<AttributeMapping>,
    pub(crate) groups: Vec<(String, Vec<String>)>,
    pub(crate) callbacks: LifecycleCallbackContainer,
}

impl EntityMapping {
    pub fn new(name: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            table: table.into(),
            attributes: Vec::new(),
            groups: Vec::new(),
            callbacks: LifecycleCallbackContainer::new(),
        }
    }

    pub fn attribute(mut self, attribute: AttributeMapping) -> Self {
        self.attributes.push(attribute);
        self
    }

    /// Declares a lazy fetch group by listing its members.
    pub fn fetch_group<I, S>(mut self, name: impl Into<String>, members: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.groups
            .push((name.into(), members.into_iter().map(Into::into).collect()));
        self
    }

    pub fn callback(mut self, event: LifecycleEvent, method_name: impl Into<String>) -> Self {
        self.callbacks
            .set_callback(event, Some(LifecycleCallback::new(method_name)));
        self
    }

    pub fn callbacks(mut self, callbacks: LifecycleCallbackContainer) -> Self {
        self.callbacks = callbacks;
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.callbacks.set_description(description);
        self
    }
}
