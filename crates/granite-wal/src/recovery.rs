//! Bookkeeping for recovery processing.

use std::collections::{HashMap, HashSet};

use granite_common::{Lsn, TxnId};

/// Transaction bookkeeping built up by the redo pass and consumed by
/// the undo pass.
#[derive(Debug)]
pub struct RecoveryInfo {
    /// Where recovery starts reading.
    pub first_lsn: Lsn,
    /// Just past the last record recovery will read.
    pub next_lsn: Lsn,
    /// Transactions seen without a commit or abort, and each one's most
    /// recent LSN.
    incomplete: HashMap<TxnId, Lsn>,
    /// Transactions whose commit or abort record was seen.
    completed: HashSet<TxnId>,
}

impl RecoveryInfo {
    /// Creates recovery bookkeeping for the given WAL range.
    #[must_use]
    pub fn new(first_lsn: Lsn, next_lsn: Lsn) -> Self {
        Self {
            first_lsn,
            next_lsn,
            incomplete: HashMap::new(),
            completed: HashSet::new(),
        }
    }

    /// Records that `txn_id`'s most recent record is at `lsn`.
    pub fn update_info(&mut self, txn_id: TxnId, lsn: Lsn) {
        self.incomplete.insert(txn_id, lsn);
    }

    /// Returns the most recent LSN recorded for `txn_id`.
    #[must_use]
    pub fn last_lsn(&self, txn_id: TxnId) -> Option<Lsn> {
        self.incomplete.get(&txn_id).copied()
    }

    /// Marks `txn_id` completed (committed or aborted).
    pub fn record_txn_completed(&mut self, txn_id: TxnId) {
        self.incomplete.remove(&txn_id);
        self.completed.insert(txn_id);
    }

    /// Returns true if `txn_id` has completed.
    #[must_use]
    pub fn is_txn_complete(&self, txn_id: TxnId) -> bool {
        self.completed.contains(&txn_id)
    }

    /// Returns true while any incomplete transaction remains.
    #[must_use]
    pub fn has_incomplete_txns(&self) -> bool {
        !self.incomplete.is_empty()
    }

    /// Number of incomplete transactions.
    #[must_use]
    pub fn incomplete_count(&self) -> usize {
        self.incomplete.len()
    }
}
