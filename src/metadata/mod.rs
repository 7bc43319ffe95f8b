// ============================================================================
// Mapping Metadata
// ============================================================================
//
// Entity and attribute descriptors, fetch groups, lifecycle callback slots
// and value generation, assembled into one immutable `Metamodel` at
// mapping-load time and shared read-only afterwards.
//
// ============================================================================

pub mod descriptor;
pub mod fetch_group;
pub mod generation;
pub mod lifecycle;
pub mod mapping;
pub mod metamodel;

pub use descriptor::{
    Association, AttributeDescriptor, AttributeKind, EntityDescriptor, FetchMode, FetchTiming,
};
pub use fetch_group::{
    BASE_GROUP_NAME, DEFAULT_LAZY_GROUP, FetchGroup, FetchGroupId, FetchGroupResolver, Resolution,
    validate_partition,
};
pub use generation::{GenerationTiming, IdentityGeneration, ValueGeneration, ValueGenerator};
pub use lifecycle::{
    CallbackContext, CallbackRegistry, LifecycleCallback, LifecycleCallbackContainer,
    LifecycleCallbackFn, LifecycleEvent,
};
pub use mapping::{AttributeMapping, EntityMapping};
pub use metamodel::{Metamodel, MetamodelBuilder};
