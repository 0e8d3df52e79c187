//! The storage engine: explicit composition of every subsystem.
//!
//! There are no process-wide singletons; callers hold a
//! [`StorageEngine`] and reach every subsystem through it.

use std::sync::Arc;

use tracing::info;

use granite_common::constants::OFFSET_FIRST_RECORD;
use granite_common::{DbError, DbResult, EngineConfig, Lsn, TransactionState};
use granite_storage::{
    BufferManager, FileManager, HeapFileManager, PageWriteLogger, WalSync,
};
use granite_wal::{wal_file_name, WalManager};

use crate::manager::TransactionManager;
use crate::state_file::{TxnStateData, TxnStateFile};

/// The Granite storage engine.
///
/// [`StorageEngine::open`] assembles the file manager, buffer manager,
/// WAL manager, transaction manager, and heap file manager, wires the
/// WAL seams, and runs crash recovery.  Dropping the engine without
/// calling [`StorageEngine::shutdown`] abandons unflushed data pages,
/// which is exactly the crash model recovery handles.
pub struct StorageEngine {
    config: EngineConfig,
    file_manager: Arc<FileManager>,
    buffer: Arc<BufferManager>,
    wal: Arc<WalManager>,
    txns: Arc<TransactionManager>,
    heap_files: Arc<HeapFileManager>,
}

impl StorageEngine {
    /// Opens (or initializes) the database in `config.data_dir` and
    /// runs recovery.
    pub fn open(config: EngineConfig) -> DbResult<Self> {
        config.validate()?;
        info!(data_dir = %config.data_dir.display(), "opening storage engine");

        let file_manager = Arc::new(FileManager::new(&config.data_dir)?);
        let buffer = Arc::new(BufferManager::new(
            Arc::clone(&file_manager),
            config.buffer_pool.capacity_bytes,
        ));

        let (state_file, stored) = match TxnStateFile::open(&file_manager)? {
            Some(state_file) => {
                let stored = state_file.read()?;
                (state_file, stored)
            }
            None => {
                info!("initializing fresh database");
                let state_file = TxnStateFile::create(&file_manager)?;
                let initial = TxnStateData {
                    next_txn_id: 1,
                    first_lsn: Lsn::new(0, OFFSET_FIRST_RECORD),
                    next_lsn: Lsn::new(0, OFFSET_FIRST_RECORD),
                };
                state_file.write(&initial)?;
                (state_file, initial)
            }
        };

        let wal = Arc::new(WalManager::new(
            Arc::clone(&file_manager),
            Arc::clone(&buffer),
            config.storage.page_size,
            config.wal.max_file_size,
            stored.first_lsn,
            stored.next_lsn,
        ));

        // The file holding the next record must exist before appends
        // or recovery touch the log.  Only the very first WAL file is
        // ever created here; later files are created at wrap time.
        if file_manager
            .open_file(&wal_file_name(stored.next_lsn.file_no()))?
            .is_none()
        {
            if stored.next_lsn != Lsn::new(0, OFFSET_FIRST_RECORD) {
                return Err(DbError::data_format(format!(
                    "txn-state file points at {} but that WAL file is missing",
                    stored.next_lsn
                )));
            }
            wal.create_wal_file(0, 0)?;
        }

        let txns = Arc::new(TransactionManager::new(
            Arc::clone(&buffer),
            Arc::clone(&wal),
            state_file,
            stored,
        ));
        buffer.set_wal_sync(Arc::clone(&txns) as Arc<dyn WalSync>);

        let heap_files = Arc::new(HeapFileManager::new(
            Arc::clone(&file_manager),
            Arc::clone(&buffer),
            Arc::clone(&txns) as Arc<dyn PageWriteLogger>,
            config.storage.page_size,
        ));

        txns.recover()?;

        Ok(Self {
            config,
            file_manager,
            buffer,
            wal,
            txns,
            heap_files,
        })
    }

    /// Returns the engine configuration.
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Returns the file manager.
    #[must_use]
    pub fn file_manager(&self) -> &Arc<FileManager> {
        &self.file_manager
    }

    /// Returns the buffer manager.
    #[must_use]
    pub fn buffer(&self) -> &Arc<BufferManager> {
        &self.buffer
    }

    /// Returns the WAL manager.
    #[must_use]
    pub fn wal(&self) -> &Arc<WalManager> {
        &self.wal
    }

    /// Returns the transaction manager.
    #[must_use]
    pub fn transactions(&self) -> &Arc<TransactionManager> {
        &self.txns
    }

    /// Returns the heap file manager.
    #[must_use]
    pub fn heap_files(&self) -> &Arc<HeapFileManager> {
        &self.heap_files
    }

    /// Starts a transaction and returns the session state holding it.
    pub fn begin(&self) -> DbResult<TransactionState> {
        let mut txn = TransactionState::new();
        self.txns.begin_transaction(&mut txn)?;
        Ok(txn)
    }

    /// Commits the given session's transaction.
    pub fn commit(&self, txn: &mut TransactionState) -> DbResult<()> {
        self.txns.commit_transaction(txn)
    }

    /// Rolls back the given session's transaction.
    pub fn rollback(&self, txn: &mut TransactionState) -> DbResult<()> {
        self.txns.rollback_transaction(txn)
    }

    /// Flushes every dirty page with sync, leaving the on-disk state
    /// clean for the next open.
    pub fn shutdown(&self) -> DbResult<()> {
        info!("shutting down storage engine");
        self.buffer.write_all(true)
    }
}

impl std::fmt::Debug for StorageEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageEngine")
            .field("data_dir", &self.config.data_dir)
            .field("page_size", &self.config.storage.page_size)
            .finish()
    }
}
