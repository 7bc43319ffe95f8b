// ============================================================================
// LazyORM Library
// ============================================================================
//
// Lazy-attribute interception for partially loaded entities. A managed
// instance starts out knowing only its identity; the first read of an
// unloaded attribute loads that attribute's whole fetch group in one query.
// Join-fetched associations arrive with their owner, so reading them costs
// nothing extra.
//
// ============================================================================

pub mod core;
pub mod fixtures;
pub mod interceptor;
pub mod metadata;
pub mod proxy;
pub mod session;
pub mod store;

// Re-export main types for convenience
pub use core::{ContextId, EntityKey, EntityRef, OrmError, Result, Value};
pub use interceptor::{AttributeValue, InterceptorStats, LazyAttributeInterceptor};
pub use metadata::{
    AttributeMapping, EntityMapping, FetchMode, GenerationTiming, IdentityGeneration,
    LifecycleEvent, Metamodel, ValueGeneration,
};
pub use proxy::{AssociationState, ProxyState};
pub use session::{DetachedEntity, SessionConfig, SessionCoordinator, SessionStats, UnitOfWork};
pub use store::{MemoryStore, StoreConfig};
