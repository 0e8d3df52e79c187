//! Core types shared across Granite components.

mod ids;
mod lsn;
mod txn_state;

pub use ids::{FilePointer, TxnId};
pub use lsn::Lsn;
pub use txn_state::TransactionState;
