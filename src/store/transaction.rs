// ============================================================================
// Memory Session Transactions
// ============================================================================
//
// One transaction per memory session. It starts active and ends in exactly
// one terminal state:
//
//   Active ──commit──> Committed
//     │
//     └──rollback──> Aborted
//
// ============================================================================

use super::change::Change;
use crate::core::{OrmError, Result};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

static NEXT_TXN_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransactionId(pub u64);

impl TransactionId {
    pub fn new() -> Self {
        TransactionId(NEXT_TXN_ID.fetch_add(1, Ordering::SeqCst))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for TransactionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TransactionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "txn_{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Active,
    Committed,
    Aborted,
}

impl TransactionState {
    pub fn is_active(&self) -> bool {
        matches!(self, TransactionState::Active)
    }
}

impl std::fmt::Display for TransactionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransactionState::Active => write!(f, "ACTIVE"),
            TransactionState::Committed => write!(f, "COMMITTED"),
            TransactionState::Aborted => write!(f, "ABORTED"),
        }
    }
}

#[derive(Debug)]
pub struct Transaction {
    id: TransactionId,
    state: TransactionState,
    /// Undo log, oldest first
    changes: Vec<Change>,
    start_time: Instant,
}

impl Transaction {
    pub fn begin() -> Self {
        Self {
            id: TransactionId::new(),
            state: TransactionState::Active,
            changes: Vec::new(),
            start_time: Instant::now(),
        }
    }

    pub fn id(&self) -> TransactionId {
        self.id
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }

    pub fn change_count(&self) -> usize {
        self.changes.len()
    }

    pub fn duration(&self) -> Duration {
        self.start_time.elapsed()
    }

    pub fn ensure_active(&self) -> Result<()> {
        if !self.state.is_active() {
            return Err(OrmError::ExecutionError(format!(
                "transaction {} is {}",
                self.id, self.state
            )));
        }
        Ok(())
    }

    pub fn record_change(&mut self, change: Change) -> Result<()> {
        self.ensure_active()?;
        self.changes.push(change);
        Ok(())
    }

    pub fn commit(&mut self) -> Result<()> {
        self.ensure_active()?;
        self.changes.clear();
        self.state = TransactionState::Committed;
        Ok(())
    }

    /// Ends the transaction and hands back the changes to undo, newest first.
    pub fn abort(&mut self) -> Result<Vec<Change>> {
        self.ensure_active()?;
        self.state = TransactionState::Aborted;
        let mut changes = std::mem::take(&mut self.changes);
        changes.reverse();
        Ok(changes)
    }
}
