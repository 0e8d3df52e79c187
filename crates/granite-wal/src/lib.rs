//! # granite-wal
//!
//! The write-ahead log of the Granite engine: physical-diff update
//! records chained per transaction, forward and backward log
//! traversal, redo, and undo with compensation log records.
//!
//! # Log structure
//!
//! The log is a sequence of files `wal-00000.log`, `wal-00001.log`, …
//! Each is an ordinary paged [`granite_storage::DbFile`]; bytes `[0,2)`
//! are the standard file-type header, bytes `[2,6)` hold the ending
//! offset of the previous WAL file (0 in the first), and records begin
//! at offset 6.  When a record's end reaches the configured size limit
//! the next record goes to a new file with the next (wrapping) file
//! number.
//!
//! # Record formats
//!
//! All integers are big-endian; LSNs are `u16 file_no || u32 offset`.
//!
//! ```text
//! START_TXN:    type(1) txnId(4) type(1)
//! COMMIT_TXN:   type(1) txnId(4) prevLSN(6) type(1)
//! ABORT_TXN:    type(1) txnId(4) prevLSN(6) type(1)
//! UPDATE_PAGE:  type(1) txnId(4) prevLSN(6) filename(VARSTRING255)
//!               pageNo(2) numSegs(2)
//!               { start(2) size(2) oldBytes newBytes }*
//!               recordStart(4) type(1)
//! UPDATE_PAGE_REDO_ONLY: as UPDATE_PAGE with only newBytes segments
//! ```
//!
//! The trailing type byte (and, for update records, the preceding
//! record-start offset) make every record traversable backward: one
//! byte before a record boundary names the record's type, and five
//! bytes before it locate an update record's start.

#![warn(clippy::all)]

pub mod diff;
mod manager;
mod record;
mod recovery;

pub use manager::{wal_file_name, WalManager};
pub use record::{RecordSummary, WalRecordType, START_RECORD_SIZE, TXN_RECORD_SIZE};
pub use recovery::RecoveryInfo;
