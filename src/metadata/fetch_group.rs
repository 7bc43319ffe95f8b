// ============================================================================
// Fetch Groups
// ============================================================================
//
// Attributes that load together in one query. Group 0 ("base") holds every
// eager non-identity attribute. Lazy attributes are partitioned into named
// groups, "DEFAULT" unless declared otherwise. The identity attribute is
// never part of a group: it is known as soon as an instance exists.
//
// ============================================================================

use super::descriptor::{AttributeDescriptor, EntityDescriptor, FetchTiming};
use crate::core::{OrmError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fmt;

pub const BASE_GROUP_NAME: &str = "base";
pub const DEFAULT_LAZY_GROUP: &str = "DEFAULT";

/// Index of a fetch group within its entity descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FetchGroupId(pub usize);

impl FetchGroupId {
    pub const BASE: FetchGroupId = FetchGroupId(0);

    pub fn is_base(&self) -> bool {
        *self == Self::BASE
    }
}

impl fmt::Display for FetchGroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "group_{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchGroup {
    pub(crate) id: FetchGroupId,
    pub(crate) name: String,
    pub(crate) entity: String,
    pub(crate) attributes: Vec<usize>,
    pub(crate) joins: Vec<usize>,
}

impl FetchGroup {
    pub fn id(&self) -> FetchGroupId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn entity(&self) -> &str {
        &self.entity
    }

    /// Attribute indices, in declaration order.
    pub fn attributes(&self) -> &[usize] {
        &self.attributes
    }

    /// Join-fetched association attributes of this group.
    pub fn joins(&self) -> &[usize] {
        &self.joins
    }

    pub fn contains(&self, attribute: usize) -> bool {
        self.attributes.contains(&attribute)
    }

    pub fn is_base(&self) -> bool {
        self.id.is_base()
    }

    pub fn len(&self) -> usize {
        self.attributes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty()
    }
}

/// Outcome of resolving an attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution<'a> {
    /// The identity attribute, always loaded
    Identity,
    Group(&'a FetchGroup),
}

pub struct FetchGroupResolver;

impl FetchGroupResolver {
    /// Determines which group loads together with `attribute`. Pure; no I/O.
    pub fn resolve<'a>(
        attribute: &AttributeDescriptor,
        metadata: &'a EntityDescriptor,
    ) -> Result<Resolution<'a>> {
        if attribute.owner() != metadata.name() {
            return Err(OrmError::AttributeNotFound(
                attribute.name().to_string(),
                metadata.name().to_string(),
            ));
        }

        if attribute.is_identity() {
            return Ok(Resolution::Identity);
        }

        let id = attribute.group().ok_or_else(|| {
            OrmError::InconsistentFetchGroup(format!(
                "attribute '{}.{}' has no fetch group",
                metadata.name(),
                attribute.name()
            ))
        })?;

        metadata.fetch_group(id).map(Resolution::Group)
    }
}

/// Assigns every non-identity attribute to a group and builds the group list.
///
/// `declared` holds each attribute's own group declaration; `explicit` holds
/// group declarations made on the entity.
pub(crate) fn partition(
    entity: &str,
    attributes: &mut [AttributeDescriptor],
    declared: &[Option<String>],
    explicit: &[(String, Vec<String>)],
) -> Result<Vec<FetchGroup>> {
    let inconsistent = |msg: String| OrmError::InconsistentFetchGroup(format!("{}: {}", entity, msg));

    let by_name: HashMap<&str, usize> = attributes
        .iter()
        .enumerate()
        .map(|(idx, attr)| (attr.name.as_str(), idx))
        .collect();

    for (attr, group) in attributes.iter().zip(declared) {
        let Some(group) = group else { continue };
        if attr.is_identity() {
            return Err(inconsistent(format!(
                "identity attribute '{}' cannot belong to group '{}'",
                attr.name, group
            )));
        }
        if attr.timing == FetchTiming::Eager {
            return Err(inconsistent(format!(
                "eager attribute '{}' cannot be declared in lazy group '{}'",
                attr.name, group
            )));
        }
        if group == BASE_GROUP_NAME {
            return Err(inconsistent(format!("group name '{}' is reserved", BASE_GROUP_NAME)));
        }
    }

    let mut assignment: Vec<Option<String>> = vec![None; attributes.len()];

    for (group, members) in explicit {
        if group == BASE_GROUP_NAME {
            return Err(inconsistent(format!("group name '{}' is reserved", BASE_GROUP_NAME)));
        }
        if members.is_empty() {
            return Err(inconsistent(format!("group '{}' is empty", group)));
        }
        for member in members {
            let &idx = by_name.get(member.as_str()).ok_or_else(|| {
                inconsistent(format!("group '{}' names unknown attribute '{}'", group, member))
            })?;
            let attr = &attributes[idx];
            if attr.is_identity() {
                return Err(inconsistent(format!(
                    "identity attribute '{}' cannot belong to group '{}'",
                    member, group
                )));
            }
            if attr.timing == FetchTiming::Eager {
                return Err(inconsistent(format!(
                    "eager attribute '{}' cannot be declared in lazy group '{}'",
                    member, group
                )));
            }
            if let Some(existing) = &assignment[idx] {
                return Err(inconsistent(format!(
                    "attribute '{}' is declared in both '{}' and '{}'",
                    member, existing, group
                )));
            }
            if let Some(own) = &declared[idx] {
                if own != group {
                    return Err(inconsistent(format!(
                        "attribute '{}' declares group '{}' but is listed in '{}'",
                        member, own, group
                    )));
                }
            }
            assignment[idx] = Some(group.clone());
        }
    }

    let mut groups = vec![FetchGroup {
        id: FetchGroupId::BASE,
        name: BASE_GROUP_NAME.to_string(),
        entity: entity.to_string(),
        attributes: Vec::new(),
        joins: Vec::new(),
    }];
    let mut group_ids: HashMap<String, FetchGroupId> = HashMap::new();

    for idx in 0..attributes.len() {
        if attributes[idx].is_identity() {
            attributes[idx].group = None;
            continue;
        }

        let id = match attributes[idx].timing {
            FetchTiming::Eager => FetchGroupId::BASE,
            FetchTiming::Lazy => {
                let name = assignment[idx]
                    .take()
                    .or_else(|| declared[idx].clone())
                    .unwrap_or_else(|| DEFAULT_LAZY_GROUP.to_string());
                *group_ids.entry(name.clone()).or_insert_with(|| {
                    let id = FetchGroupId(groups.len());
                    groups.push(FetchGroup {
                        id,
                        name,
                        entity: entity.to_string(),
                        attributes: Vec::new(),
                        joins: Vec::new(),
                    });
                    id
                })
            }
        };

        let group = &mut groups[id.0];
        group.attributes.push(idx);
        if attributes[idx].association().is_some_and(|a| a.is_join_fetched()) {
            group.joins.push(idx);
        }
        attributes[idx].group = Some(id);
    }

    Ok(groups)
}

/// Verifies that the groups of `entity` partition its non-identity attributes.
pub fn validate_partition(entity: &EntityDescriptor) -> Result<()> {
    let inconsistent =
        |msg: String| OrmError::InconsistentFetchGroup(format!("{}: {}", entity.name(), msg));

    let mut seen = BTreeSet::new();
    for (position, group) in entity.fetch_groups().iter().enumerate() {
        if group.id().0 != position {
            return Err(inconsistent(format!("group '{}' is out of order", group.name())));
        }
        for &idx in group.attributes() {
            let attr = entity.attribute_at(idx)?;
            if attr.is_identity() {
                return Err(inconsistent(format!(
                    "identity attribute '{}' is part of group '{}'",
                    attr.name(),
                    group.name()
                )));
            }
            if !seen.insert(idx) {
                return Err(inconsistent(format!(
                    "attribute '{}' belongs to more than one group",
                    attr.name()
                )));
            }
            if attr.group() != Some(group.id()) {
                return Err(inconsistent(format!(
                    "attribute '{}' does not point back to group '{}'",
                    attr.name(),
                    group.name()
                )));
            }
            if group.is_base() == attr.is_lazy() {
                return Err(inconsistent(format!(
                    "attribute '{}' has the wrong timing for group '{}'",
                    attr.name(),
                    group.name()
                )));
            }
        }
    }

    if let Some(orphan) = entity
        .attributes()
        .iter()
        .find(|attr| !attr.is_identity() && !seen.contains(&attr.index()))
    {
        return Err(inconsistent(format!(
            "attribute '{}' belongs to no group",
            orphan.name()
        )));
    }

    Ok(())
}
