//! Per-session transaction state.

use super::{Lsn, TxnId};

/// The transaction state of one logical session.
///
/// Each session owns exactly one `TransactionState` and passes it
/// explicitly into every transaction-manager and heap-file operation
/// that runs inside a transaction.  There is no process-global or
/// thread-local transaction context.
///
/// The `START_TXN` record is written lazily: a transaction that never
/// modifies a page writes no WAL records at all, so `logged_start`
/// tracks whether the start record has been emitted yet.
#[derive(Debug, Clone, Default)]
pub struct TransactionState {
    txn_id: Option<TxnId>,
    logged_start: bool,
    last_lsn: Option<Lsn>,
}

impl TransactionState {
    /// Creates a fresh state with no transaction in progress.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if a transaction is currently in progress.
    #[inline]
    #[must_use]
    pub fn is_in_progress(&self) -> bool {
        self.txn_id.is_some()
    }

    /// Returns the current transaction's ID, if one is in progress.
    #[inline]
    #[must_use]
    pub fn txn_id(&self) -> Option<TxnId> {
        self.txn_id
    }

    /// Marks a transaction as started with the given ID.
    pub fn start(&mut self, txn_id: TxnId) {
        self.txn_id = Some(txn_id);
        self.logged_start = false;
        self.last_lsn = None;
    }

    /// Returns true if the transaction's `START_TXN` record has been
    /// written to the WAL.
    #[inline]
    #[must_use]
    pub fn logged_start(&self) -> bool {
        self.logged_start
    }

    /// Records that the transaction's `START_TXN` record was written.
    pub fn set_logged_start(&mut self) {
        self.logged_start = true;
    }

    /// Returns the LSN of this transaction's most recent WAL record.
    #[inline]
    #[must_use]
    pub fn last_lsn(&self) -> Option<Lsn> {
        self.last_lsn
    }

    /// Updates the LSN of this transaction's most recent WAL record.
    pub fn set_last_lsn(&mut self, lsn: Lsn) {
        self.last_lsn = Some(lsn);
    }

    /// Clears all transaction state, ending the transaction.
    pub fn clear(&mut self) {
        self.txn_id = None;
        self.logged_start = false;
        self.last_lsn = None;
    }
}
