//! The transaction-state file.
//!
//! One sector holding the values recovery needs before the WAL can be
//! read: the next transaction ID and the `first_lsn`/`next_lsn` bounds
//! of the log range to recover.  The whole record fits in a single
//! 512-byte page and is rewritten with one write call followed by an
//! fsync; the OS is assumed to make single-sector writes atomic.
//!
//! Layout: `[0]` file-type tag, `[1]` page-size exponent, `[2,6)`
//! `next_txn_id` (u32), `[6,12)` `first_lsn`, `[12,18)` `next_lsn`.
//!
//! This file is read and written directly through the file manager,
//! not the buffer pool, so the atomic rewrite is never reordered or
//! deferred by caching.

use std::sync::Arc;

use granite_common::constants::TXN_STATE_PAGE_SIZE;
use granite_common::{DbError, DbResult, Lsn};
use granite_storage::{DbFile, DbFileType, FileManager};

/// Name of the transaction-state file in the data directory.
pub const TXN_STATE_FILENAME: &str = "txnstate.dat";

const OFFSET_NEXT_TXN_ID: usize = 2;
const OFFSET_FIRST_LSN: usize = 6;
const OFFSET_NEXT_LSN: usize = 12;

/// The persisted transaction state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TxnStateData {
    /// The next transaction ID to assign.
    pub next_txn_id: u32,
    /// Where recovery starts reading the WAL.
    pub first_lsn: Lsn,
    /// Just past the last durable WAL record.
    pub next_lsn: Lsn,
}

/// Handle to the transaction-state file.
pub struct TxnStateFile {
    file_manager: Arc<FileManager>,
    file: Arc<DbFile>,
}

impl TxnStateFile {
    /// Creates the transaction-state file.  The caller must write an
    /// initial state before anything else reads it.
    pub fn create(file_manager: &Arc<FileManager>) -> DbResult<Self> {
        let file = file_manager.create_file(
            TXN_STATE_FILENAME,
            DbFileType::TxnStateFile,
            TXN_STATE_PAGE_SIZE,
        )?;
        Ok(Self {
            file_manager: Arc::clone(file_manager),
            file,
        })
    }

    /// Opens the transaction-state file, or returns `None` if this is
    /// a fresh data directory.
    pub fn open(file_manager: &Arc<FileManager>) -> DbResult<Option<Self>> {
        let Some(file) =
            file_manager.open_typed(TXN_STATE_FILENAME, DbFileType::TxnStateFile)?
        else {
            return Ok(None);
        };
        Ok(Some(Self {
            file_manager: Arc::clone(file_manager),
            file,
        }))
    }

    /// Reads the persisted state.
    pub fn read(&self) -> DbResult<TxnStateData> {
        let mut buf = vec![0u8; TXN_STATE_PAGE_SIZE];
        if !self.file_manager.load_page(&self.file, 0, &mut buf)? {
            return Err(DbError::data_format("transaction-state file is empty"));
        }

        let next_txn_id = u32::from_be_bytes(
            buf[OFFSET_NEXT_TXN_ID..OFFSET_NEXT_TXN_ID + 4]
                .try_into()
                .unwrap(),
        );
        let first_lsn = Lsn::from_be_bytes(
            buf[OFFSET_FIRST_LSN..OFFSET_FIRST_LSN + 6].try_into().unwrap(),
        );
        let next_lsn =
            Lsn::from_be_bytes(buf[OFFSET_NEXT_LSN..OFFSET_NEXT_LSN + 6].try_into().unwrap());

        if first_lsn > next_lsn {
            return Err(DbError::data_format(format!(
                "transaction-state file has first LSN {} past next LSN {}",
                first_lsn, next_lsn
            )));
        }

        Ok(TxnStateData {
            next_txn_id,
            first_lsn,
            next_lsn,
        })
    }

    /// Rewrites the state in a single sector-sized write and syncs it.
    pub fn write(&self, data: &TxnStateData) -> DbResult<()> {
        let mut buf = vec![0u8; TXN_STATE_PAGE_SIZE];
        buf[0] = DbFileType::TxnStateFile.as_u8();
        buf[1] = TXN_STATE_PAGE_SIZE.trailing_zeros() as u8;
        buf[OFFSET_NEXT_TXN_ID..OFFSET_NEXT_TXN_ID + 4]
            .copy_from_slice(&data.next_txn_id.to_be_bytes());
        buf[OFFSET_FIRST_LSN..OFFSET_FIRST_LSN + 6]
            .copy_from_slice(&data.first_lsn.to_be_bytes());
        buf[OFFSET_NEXT_LSN..OFFSET_NEXT_LSN + 6].copy_from_slice(&data.next_lsn.to_be_bytes());

        self.file_manager.save_page(&self.file, 0, &buf)?;
        self.file_manager.sync_file(&self.file)
    }
}

impl std::fmt::Debug for TxnStateFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TxnStateFile")
            .field("path", self.file.path())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_round_trip() {
        let tmp = TempDir::new().unwrap();
        let fm = Arc::new(FileManager::new(tmp.path()).unwrap());

        assert!(TxnStateFile::open(&fm).unwrap().is_none());

        let state_file = TxnStateFile::create(&fm).unwrap();
        let data = TxnStateData {
            next_txn_id: 17,
            first_lsn: Lsn::new(0, 6),
            next_lsn: Lsn::new(2, 4096),
        };
        state_file.write(&data).unwrap();
        assert_eq!(state_file.read().unwrap(), data);

        // Reopen through a fresh file manager.
        let fm2 = Arc::new(FileManager::new(tmp.path()).unwrap());
        let reopened = TxnStateFile::open(&fm2).unwrap().unwrap();
        assert_eq!(reopened.read().unwrap(), data);
    }

    #[test]
    fn test_rejects_inverted_bounds() {
        let tmp = TempDir::new().unwrap();
        let fm = Arc::new(FileManager::new(tmp.path()).unwrap());

        let state_file = TxnStateFile::create(&fm).unwrap();
        state_file
            .write(&TxnStateData {
                next_txn_id: 1,
                first_lsn: Lsn::new(3, 100),
                next_lsn: Lsn::new(1, 6),
            })
            .unwrap();
        assert!(state_file.read().unwrap_err().is_corruption());
    }
}
