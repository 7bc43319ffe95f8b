use super::descriptor::{AttributeDescriptor, AttributeKind, EntityDescriptor, FetchTiming};
use super::fetch_group::{FetchGroupResolver, Resolution, partition, validate_partition};
use super::lifecycle::{CallbackContext, CallbackRegistry, LifecycleEvent};
use super::mapping::EntityMapping;
use crate::core::{OrmError, Result, Value};
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, trace};

/// Validated, immutable mapping metadata for all entity types.
///
/// Built once at mapping-load time and shared read-only (usually behind an
/// `Arc`) by every unit of work.
#[derive(Debug)]
pub struct Metamodel {
    entities: Vec<EntityDescriptor>,
    by_name: HashMap<String, usize>,
    callbacks: CallbackRegistry,
}

impl Metamodel {
    pub fn builder() -> MetamodelBuilder {
        MetamodelBuilder::default()
    }

    pub fn entity(&self, name: &str) -> Result<&EntityDescriptor> {
        self.by_name
            .get(name)
            .map(|&idx| &self.entities[idx])
            .ok_or_else(|| OrmError::EntityTypeNotFound(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    pub fn entities(&self) -> &[EntityDescriptor] {
        &self.entities
    }

    pub fn callbacks(&self) -> &CallbackRegistry {
        &self.callbacks
    }

    pub fn resolve(&self, entity: &str, attribute: &str) -> Result<Resolution<'_>> {
        let descriptor = self.entity(entity)?;
        FetchGroupResolver::resolve(descriptor.attribute(attribute)?, descriptor)
    }

    /// Invokes the callback configured for `event` on `entity`, if any.
    pub fn dispatch(
        &self,
        entity: &EntityDescriptor,
        event: LifecycleEvent,
        identity: Option<&Value>,
        values: &mut BTreeMap<String, Value>,
    ) -> Result<()> {
        let Some(slot) = entity.callbacks().callback(event) else {
            return Ok(());
        };

        let callback = self.callbacks.get(&slot.method_name).ok_or_else(|| {
            OrmError::InvalidMapping(format!(
                "callback '{}' is not registered",
                slot.method_name
            ))
        })?;

        trace!(entity = entity.name(), %event, callback = %slot.method_name, "lifecycle callback");

        let failed = |e: OrmError| OrmError::CallbackFailed {
            callback: slot.method_name.clone(),
            message: e.to_string(),
        };
        if event.accepts_changes() {
            let mut ctx = CallbackContext::new(event, entity.name(), identity, values);
            return callback(&mut ctx).map_err(failed);
        }

        // post events observe a copy
        let mut observed = values.clone();
        let mut ctx = CallbackContext::new(event, entity.name(), identity, &mut observed);
        callback(&mut ctx).map_err(failed)
    }

    fn validate_entity(&self, entity: &EntityDescriptor) -> Result<()> {
        validate_partition(entity)?;

        for attr in entity.attributes() {
            let Some(association) = attr.association() else {
                continue;
            };

            let target = self.entity(&association.target).map_err(|_| {
                OrmError::InvalidMapping(format!(
                    "'{}.{}' targets unknown entity '{}'",
                    entity.name(),
                    attr.name(),
                    association.target
                ))
            })?;

            if let Some(mapped_by) = &association.mapped_by {
                let owning = target.attribute(mapped_by).map_err(|_| {
                    OrmError::InvalidMapping(format!(
                        "'{}.{}' is mapped by unknown attribute '{}.{}'",
                        entity.name(),
                        attr.name(),
                        target.name(),
                        mapped_by
                    ))
                })?;

                let points_back = owning
                    .association()
                    .is_some_and(|o| o.target == entity.name() && !o.is_inverse());
                if !points_back {
                    return Err(OrmError::InvalidMapping(format!(
                        "'{}.{}' must be an owning association to '{}'",
                        target.name(),
                        mapped_by,
                        entity.name()
                    )));
                }

                // No foreign key on this side: the target can only be found by
                // joining, otherwise the group would need a second query.
                if !association.is_join_fetched() {
                    return Err(OrmError::InvalidMapping(format!(
                        "inverse association '{}.{}' must be join fetched",
                        entity.name(),
                        attr.name()
                    )));
                }
            }

            if attr.generation().is_some() {
                return Err(OrmError::InvalidMapping(format!(
                    "association '{}.{}' cannot be generated",
                    entity.name(),
                    attr.name()
                )));
            }
        }

        for (event, slot) in entity.callbacks().configured() {
            if !self.callbacks.contains(&slot.method_name) {
                return Err(OrmError::InvalidMapping(format!(
                    "{} callback '{}' of '{}' is not registered",
                    event,
                    slot.method_name,
                    entity.name()
                )));
            }
        }

        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct MetamodelBuilder {
    mappings: Vec<EntityMapping>,
    callbacks: CallbackRegistry,
}

impl MetamodelBuilder {
    pub fn entity(mut self, mapping: EntityMapping) -> Self {
        self.mappings.push(mapping);
        self
    }

    pub fn callback<F>(mut self, name: impl Into<String>, callback: F) -> Self
    where
        F: Fn(&mut CallbackContext<'_>) -> Result<()> + Send + Sync + 'static,
    {
        self.callbacks.register(name, callback);
        self
    }

    /// Builds descriptors and fetch groups, then validates the whole model.
    /// Every metadata error surfaces here, before any instance exists.
    pub fn build(self) -> Result<Metamodel> {
        let mut entities = Vec::with_capacity(self.mappings.len());
        let mut by_name = HashMap::new();

        for mapping in self.mappings {
            if by_name.contains_key(&mapping.name) {
                return Err(OrmError::InvalidMapping(format!(
                    "entity '{}' is mapped twice",
                    mapping.name
                )));
            }
            let descriptor = build_entity(mapping)?;
            by_name.insert(descriptor.name.clone(), entities.len());
            entities.push(descriptor);
        }

        let model = Metamodel {
            entities,
            by_name,
            callbacks: self.callbacks,
        };

        for entity in &model.entities {
            model.validate_entity(entity)?;
            debug!(
                entity = entity.name(),
                table = entity.table(),
                attributes = entity.attributes().len(),
                groups = entity.group_count(),
                "entity mapped"
            );
        }

        Ok(model)
    }
}

fn build_entity(mapping: EntityMapping) -> Result<EntityDescriptor> {
    if mapping.table.is_empty() {
        return Err(OrmError::InvalidMapping(format!(
            "entity '{}' has no table",
            mapping.name
        )));
    }

    let mut attributes: Vec<AttributeDescriptor> = Vec::with_capacity(mapping.attributes.len());
    let mut declared = Vec::with_capacity(mapping.attributes.len());
    let mut by_name = HashMap::new();
    let mut identity = None;
    let mut identity_generation = Default::default();

    for (index, attr) in mapping.attributes.into_iter().enumerate() {
        if by_name.insert(attr.name.clone(), index).is_some() {
            return Err(OrmError::InvalidMapping(format!(
                "attribute '{}.{}' is mapped twice",
                mapping.name, attr.name
            )));
        }

        if attr.kind == AttributeKind::Identity {
            if identity.is_some() {
                return Err(OrmError::InvalidMapping(format!(
                    "entity '{}' declares more than one identity",
                    mapping.name
                )));
            }
            if attr.timing == FetchTiming::Lazy {
                return Err(OrmError::InconsistentFetchGroup(format!(
                    "{}: identity attribute '{}' cannot be lazy",
                    mapping.name, attr.name
                )));
            }
            if attr.generation.is_some() {
                return Err(OrmError::InvalidMapping(format!(
                    "identity '{}.{}' uses identity generation, not value generation",
                    mapping.name, attr.name
                )));
            }
            identity = Some(index);
            identity_generation = attr.identity_generation;
        }

        declared.push(attr.group);
        attributes.push(AttributeDescriptor {
            column: attr.column.unwrap_or_else(|| attr.name.clone()),
            name: attr.name,
            owner: mapping.name.clone(),
            index,
            kind: attr.kind,
            timing: attr.timing,
            group: None,
            generation: attr.generation,
        });
    }

    let identity = identity.ok_or_else(|| {
        OrmError::InvalidMapping(format!("entity '{}' has no identity attribute", mapping.name))
    })?;

    let groups = partition(&mapping.name, &mut attributes, &declared, &mapping.groups)?;

    Ok(EntityDescriptor {
        name: mapping.name,
        table: mapping.table,
        identity,
        identity_generation,
        attributes,
        by_name,
        groups,
        callbacks: mapping.callbacks,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{AttributeMapping, FetchMode};

    fn article() -> EntityMapping {
        EntityMapping::new("Article", "article")
            .attribute(AttributeMapping::identity("id"))
            .attribute(AttributeMapping::basic("title"))
            .attribute(AttributeMapping::basic("body").lazy().group("text"))
            .attribute(AttributeMapping::basic("summary").lazy().group("text"))
            .attribute(AttributeMapping::basic("thumbnail").lazy())
    }

    #[test]
    fn test_groups_partition_lazy_attributes() {
        let model = Metamodel::builder().entity(article()).build().unwrap();
        let article = model.entity("Article").unwrap();

        let names: Vec<&str> = article.fetch_groups().iter().map(|g| g.name()).collect();
        assert_eq!(names, vec!["base", "text", "DEFAULT"]);
        assert_eq!(article.fetch_group(crate::metadata::FetchGroupId(1)).unwrap().len(), 2);
        assert!(article.identity().group().is_none());
    }

    #[test]
    fn test_resolve() {
        let model = Metamodel::builder().entity(article()).build().unwrap();

        assert_eq!(model.resolve("Article", "id").unwrap(), Resolution::Identity);
        match model.resolve("Article", "summary").unwrap() {
            Resolution::Group(group) => {
                assert_eq!(group.name(), "text");
                assert_eq!(group.attributes(), &[2, 3]);
            }
            other => panic!("unexpected resolution {:?}", other),
        }
        assert!(matches!(
            model.resolve("Article", "missing"),
            Err(OrmError::AttributeNotFound(..))
        ));
    }

    #[test]
    fn test_overlapping_explicit_groups_rejected() {
        let mapping = article()
            .fetch_group("media", ["thumbnail"])
            .fetch_group("extra", ["thumbnail"]);
        let err = Metamodel::builder().entity(mapping).build().unwrap_err();
        assert!(matches!(err, OrmError::InconsistentFetchGroup(_)));
    }

    #[test]
    fn test_identity_in_group_rejected() {
        let mapping = article().fetch_group("media", ["id"]);
        let err = Metamodel::builder().entity(mapping).build().unwrap_err();
        assert!(matches!(err, OrmError::InconsistentFetchGroup(_)));
    }

    #[test]
    fn test_inverse_select_rejected() {
        let err = Metamodel::builder()
            .entity(
                EntityMapping::new("Person", "person")
                    .attribute(AttributeMapping::identity("id"))
                    .attribute(AttributeMapping::to_one("passport", "Passport")),
            )
            .entity(
                EntityMapping::new("Passport", "passport")
                    .attribute(AttributeMapping::identity("id"))
                    .attribute(
                        AttributeMapping::to_one("holder", "Person")
                            .mapped_by("passport")
                            .fetch_mode(FetchMode::Select),
                    ),
            )
            .build()
            .unwrap_err();
        assert!(matches!(err, OrmError::InvalidMapping(_)));
    }

    #[test]
    fn test_unregistered_callback_rejected() {
        let mapping = article().callback(LifecycleEvent::PostLoad, "onLoad");
        assert!(Metamodel::builder().entity(mapping.clone()).build().is_err());

        let model = Metamodel::builder()
            .entity(mapping)
            .callback("onLoad", |_| Ok(()))
            .build()
            .unwrap();
        assert_eq!(model.callbacks().len(), 1);
    }

    #[test]
    fn test_only_pre_events_change_values() {
        let mapping = article()
            .callback(LifecycleEvent::PreUpdate, "stamp")
            .callback(LifecycleEvent::PostLoad, "stamp");
        let model = Metamodel::builder()
            .entity(mapping)
            .callback("stamp", |ctx| {
                ctx.set("title", "stamped");
                Ok(())
            })
            .build()
            .unwrap();
        let article = model.entity("Article").unwrap();

        let mut values = BTreeMap::from([("title".to_string(), Value::from("draft"))]);
        model
            .dispatch(article, LifecycleEvent::PostLoad, None, &mut values)
            .unwrap();
        assert_eq!(values["title"], Value::from("draft"));

        model
            .dispatch(article, LifecycleEvent::PreUpdate, None, &mut values)
            .unwrap();
        assert_eq!(values["title"], Value::from("stamped"));
    }
}
