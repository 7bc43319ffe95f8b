// ============================================================================
// Memory Store
// ============================================================================
//
// Reference backend for the session coordinator: one in-memory table per
// entity, SQL rendered for every statement and kept in a statement log,
// rollback through an undo log.
//
// ============================================================================

pub mod change;
pub mod config;
pub mod memory;
pub mod session;
pub mod sql;
pub mod table;
pub mod transaction;

pub use change::{Change, Row};
pub use config::StoreConfig;
pub use memory::{MemoryStore, StatementLog};
pub use session::MemorySession;
pub use sql::{SelectPlan, evaluate_expression};
pub use table::Table;
pub use transaction::{Transaction, TransactionId, TransactionState};
