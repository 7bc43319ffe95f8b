// ============================================================================
// Sessions
// ============================================================================
//
// The coordinator trait is the boundary to whatever owns the transactional
// scope. A unit of work pairs one coordinator with one persistence context;
// proxy states are only valid inside it.
//
// ============================================================================

pub mod config;
pub mod context;
pub mod coordinator;
pub mod detached;
pub mod unit_of_work;

pub use config::SessionConfig;
pub use context::PersistenceContext;
pub use coordinator::{EntityRow, Joined, SessionCoordinator, WriteRequest, WriteResponse};
pub use detached::DetachedEntity;
pub use unit_of_work::{SessionStats, UnitOfWork};
