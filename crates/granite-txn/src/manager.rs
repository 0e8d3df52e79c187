//! The transaction manager.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, trace};

use granite_common::{DbError, DbResult, Lsn, TransactionState, TxnId};
use granite_storage::{
    BufferManager, DbFileType, PageWriteLogger, PinnedPage, WalSync,
};
use granite_wal::{wal_file_name, RecoveryInfo, WalManager, WalRecordType};

use crate::state_file::{TxnStateData, TxnStateFile};

/// What the txn-state file currently says on disk.
struct DurableLsns {
    first_lsn: Lsn,
    next_lsn: Lsn,
}

/// Coordinates transactions, the WAL rule, and recovery.
///
/// One instance serves every session; each session passes its own
/// [`TransactionState`] into the methods that run inside a
/// transaction.  The manager is also the implementation behind the
/// storage layer's two seams: [`WalSync`] (forcing the log before
/// dirty pages reach disk) and [`PageWriteLogger`] (capturing page
/// mutations as update records).
pub struct TransactionManager {
    buffer: Arc<BufferManager>,
    wal: Arc<WalManager>,
    state_file: TxnStateFile,
    next_txn_id: AtomicU32,
    durable: Mutex<DurableLsns>,
}

impl TransactionManager {
    /// Creates a transaction manager over the given subsystems, seeded
    /// from the persisted transaction state.
    pub fn new(
        buffer: Arc<BufferManager>,
        wal: Arc<WalManager>,
        state_file: TxnStateFile,
        stored: TxnStateData,
    ) -> Self {
        Self {
            buffer,
            wal,
            state_file,
            next_txn_id: AtomicU32::new(stored.next_txn_id),
            durable: Mutex::new(DurableLsns {
                first_lsn: stored.first_lsn,
                next_lsn: stored.next_lsn,
            }),
        }
    }

    /// Returns the WAL manager.
    #[must_use]
    pub fn wal(&self) -> &Arc<WalManager> {
        &self.wal
    }

    /// Starts a transaction in `txn`.
    ///
    /// No WAL record is written yet; the `START_TXN` record is emitted
    /// lazily by the first modifying operation.
    pub fn begin_transaction(&self, txn: &mut TransactionState) -> DbResult<()> {
        if txn.is_in_progress() {
            return Err(DbError::illegal_state(format!(
                "transaction {} is already in progress",
                txn.txn_id().expect("in progress")
            )));
        }

        let txn_id = TxnId::new(self.next_txn_id.fetch_add(1, Ordering::SeqCst));
        txn.start(txn_id);
        debug!(%txn_id, "transaction started");
        Ok(())
    }

    /// Commits the transaction in `txn`: writes its `COMMIT_TXN`
    /// record, forces the WAL through it, and clears the state.  When
    /// this returns, the commit is durable.
    ///
    /// A transaction that never modified anything has no records to
    /// write or force.
    pub fn commit_transaction(&self, txn: &mut TransactionState) -> DbResult<()> {
        let txn_id = txn
            .txn_id()
            .ok_or_else(|| DbError::illegal_state("no transaction is currently in progress"))?;

        if txn.logged_start() {
            let commit_lsn = self.wal.write_txn_record(txn, WalRecordType::CommitTxn)?;
            self.force_wal(commit_lsn)?;
            info!(%txn_id, %commit_lsn, "transaction committed");
        } else {
            debug!(%txn_id, "read-only transaction committed; nothing to force");
        }

        txn.clear();
        Ok(())
    }

    /// Rolls back the transaction in `txn`, replaying its record chain
    /// backward with compensation records, and clears the state.
    pub fn rollback_transaction(&self, txn: &mut TransactionState) -> DbResult<()> {
        let txn_id = txn
            .txn_id()
            .ok_or_else(|| DbError::illegal_state("no transaction is currently in progress"))?;

        if txn.logged_start() {
            self.wal.rollback_transaction(txn)?;
            info!(%txn_id, "transaction rolled back");
        } else {
            debug!(%txn_id, "read-only transaction rolled back; nothing to undo");
        }

        txn.clear();
        Ok(())
    }

    /// Makes the WAL durable through the record at `up_to` and
    /// publishes the new durable bound in the txn-state file.
    ///
    /// Phase one writes and syncs every WAL-file page holding bytes of
    /// the forced range; phase two atomically rewrites the txn-state
    /// file.  A crash between the phases leaves extra durable WAL
    /// bytes past the published `next_lsn`, which recovery ignores.
    pub fn force_wal(&self, up_to: Lsn) -> DbResult<()> {
        let target = self.wal.next_lsn_after(up_to);

        let mut durable = self.durable.lock();
        if target <= durable.next_lsn {
            trace!(%target, durable = %durable.next_lsn, "WAL already durable");
            return Ok(());
        }
        debug!(%target, from = %durable.next_lsn, "forcing WAL");

        // Phase 1: flush and sync the affected WAL files.
        let file_manager = self.buffer.file_manager();
        let mut file_no = durable.next_lsn.file_no();
        loop {
            if let Some(file) = file_manager.open_file(&wal_file_name(file_no))? {
                self.buffer.flush_file(&file, true)?;
            }
            if file_no == target.file_no() {
                break;
            }
            file_no = file_no.wrapping_add(1);
        }

        // Phase 2: publish the new bound atomically.
        self.state_file.write(&TxnStateData {
            next_txn_id: self.next_txn_id.load(Ordering::SeqCst),
            first_lsn: durable.first_lsn,
            next_lsn: target,
        })?;
        durable.next_lsn = target;
        Ok(())
    }

    fn ensure_start_logged(&self, txn: &mut TransactionState) -> DbResult<()> {
        if !txn.logged_start() {
            self.wal.write_txn_record(txn, WalRecordType::StartTxn)?;
            txn.set_logged_start();
        }
        Ok(())
    }

    /// Runs crash recovery: redo from `first_lsn`, undo of incomplete
    /// transactions, then force, flush-all-with-sync, and the
    /// `first_lsn := next_lsn` advance.  Called once at startup,
    /// before any session runs.
    pub fn recover(&self) -> DbResult<()> {
        let (first_lsn, next_lsn) = {
            let durable = self.durable.lock();
            (durable.first_lsn, durable.next_lsn)
        };

        if first_lsn == next_lsn {
            info!(%first_lsn, "no recovery necessary");
            return Ok(());
        }

        info!(%first_lsn, %next_lsn, "starting crash recovery");
        let mut recovery_info = RecoveryInfo::new(first_lsn, next_lsn);
        self.wal.perform_redo(&mut recovery_info)?;
        self.wal.perform_undo(&mut recovery_info)?;

        // Undo appended compensation and abort records; make the whole
        // log durable, then write every data page out.
        self.force_wal(self.wal.next_lsn())?;
        self.buffer.write_all(true)?;

        // Everything on disk now reflects the entire log, so recovery
        // on the next startup can begin where this log ends.
        let new_first = self.wal.advance_first_lsn_to_next();
        self.state_file.write(&TxnStateData {
            next_txn_id: self.next_txn_id.load(Ordering::SeqCst),
            first_lsn: new_first,
            next_lsn: new_first,
        })?;
        {
            let mut durable = self.durable.lock();
            durable.first_lsn = new_first;
            durable.next_lsn = new_first;
        }

        info!(first_lsn = %new_first, "crash recovery complete");
        Ok(())
    }
}

impl WalSync for TransactionManager {
    /// Enforces the WAL rule: forces the log through the highest
    /// `page_lsn` among the departing pages.  WAL and txn-state pages
    /// are not themselves WAL-protected and are skipped.
    fn before_write_dirty_pages(&self, pages: &[PinnedPage]) -> DbResult<()> {
        let mut max_lsn: Option<Lsn> = None;
        for page in pages {
            match page.file().file_type() {
                DbFileType::WriteAheadLogFile | DbFileType::TxnStateFile => continue,
                _ => {}
            }
            if let Some(lsn) = page.page_lsn() {
                max_lsn = Some(match max_lsn {
                    Some(current) if current >= lsn => current,
                    _ => lsn,
                });
            }
        }

        match max_lsn {
            Some(lsn) => self.force_wal(lsn),
            None => Ok(()),
        }
    }
}

impl PageWriteLogger for TransactionManager {
    /// Captures a dirty page's pending changes as an `UPDATE_PAGE`
    /// record, writing the transaction's `START_TXN` record first if
    /// this is its first modification.
    fn log_page_write(&self, txn: &mut TransactionState, page: &PinnedPage) -> DbResult<()> {
        match page.file().file_type() {
            DbFileType::WriteAheadLogFile | DbFileType::TxnStateFile => return Ok(()),
            _ => {}
        }
        if !page.is_dirty() {
            return Ok(());
        }
        if !txn.is_in_progress() {
            return Err(DbError::illegal_state(
                "page write logged without an active transaction",
            ));
        }

        self.ensure_start_logged(txn)?;
        self.wal.write_update_page_record(txn, page)?;
        Ok(())
    }
}

impl std::fmt::Debug for TransactionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let durable = self.durable.lock();
        f.debug_struct("TransactionManager")
            .field("next_txn_id", &self.next_txn_id.load(Ordering::SeqCst))
            .field("durable_first_lsn", &durable.first_lsn)
            .field("durable_next_lsn", &durable.next_lsn)
            .finish()
    }
}
