// ============================================================================
// Entity Proxy State
// ============================================================================
//
// Per-instance lazy-loading bookkeeping: which fetch groups are loaded, the
// materialized attribute values, dirty tracking and the state of each to-one
// association. Owned exclusively by the persistence context.
//
// ============================================================================

pub mod association;
pub mod state;

pub use association::{AssociationSlot, AssociationState};
pub use state::{AttributeSlot, EntityProxyState, MarkOutcome, ProxyState, WriteOutcome};
