// ============================================================================
// Store Change Tracking
// ============================================================================
//
// Every row mutation a memory session performs is recorded as a Change so
// that rollback can undo it. Changes are undone in reverse order.
//
// ============================================================================

use crate::core::Value;
use std::collections::BTreeMap;

/// Column name to value.
pub type Row = BTreeMap<String, Value>;

/// A reversible row mutation
#[derive(Debug, Clone, PartialEq)]
pub enum Change {
    InsertRow { table: String, identity: Value },

    UpdateRow {
        table: String,
        identity: Value,
        old_row: Row,
    },

    DeleteRow {
        table: String,
        identity: Value,
        position: usize,
        old_row: Row,
    },
}

impl Change {
    pub fn table_name(&self) -> &str {
        match self {
            Change::InsertRow { table, .. }
            | Change::UpdateRow { table, .. }
            | Change::DeleteRow { table, .. } => table,
        }
    }

    pub fn identity(&self) -> &Value {
        match self {
            Change::InsertRow { identity, .. }
            | Change::UpdateRow { identity, .. }
            | Change::DeleteRow { identity, .. } => identity,
        }
    }
}
