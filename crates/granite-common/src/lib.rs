//! # granite-common
//!
//! Common types, errors, and configuration for the Granite storage engine.
//!
//! This crate provides the foundational pieces shared by every Granite
//! component:
//!
//! - **Types**: core identifiers (`Lsn`, `TxnId`, `FilePointer`) and the
//!   per-session `TransactionState`
//! - **Errors**: the unified `DbError` taxonomy and `DbResult` alias
//! - **Config**: engine configuration structures
//! - **Constants**: system-wide constants and limits

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod constants;
pub mod error;
pub mod types;

pub use config::EngineConfig;
pub use error::{DbError, DbResult};
pub use types::{FilePointer, Lsn, TransactionState, TxnId};
