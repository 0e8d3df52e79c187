//! # granite-txn
//!
//! Transaction management and crash recovery for the Granite engine:
//! begin/commit/rollback, the WAL rule's enforcement point, the
//! transaction-state file, the recovery driver, and [`StorageEngine`],
//! the struct that composes every storage subsystem.
//!
//! # Durability protocol
//!
//! The WAL rule is enforced at a single chokepoint: before any dirty
//! page leaves the buffer pool, the transaction manager forces the WAL
//! through the highest `page_lsn` among the departing pages.  Forcing
//! is two-phase: WAL-file pages are flushed and synced first, then the
//! txn-state file's `next_lsn` is rewritten in one sector-sized atomic
//! write and synced.  A crash between the phases leaves harmless
//! already-durable WAL tail bytes beyond the published `next_lsn`.
//!
//! On startup, [`StorageEngine::open`] reads the txn-state file and,
//! when `first_lsn != next_lsn`, runs redo over that range followed by
//! undo of incomplete transactions, then forces the log, flushes every
//! page with sync, and publishes `first_lsn := next_lsn`.  That is the
//! only place `first_lsn` ever advances.

#![warn(clippy::all)]

mod engine;
mod manager;
mod state_file;

pub use engine::StorageEngine;
pub use manager::TransactionManager;
pub use state_file::{TxnStateData, TxnStateFile, TXN_STATE_FILENAME};
