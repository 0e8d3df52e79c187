//! Schemas, values, and table statistics.
//!
//! These are the contracts the storage core shares with its external
//! collaborators (planner, evaluator): an ordered column list with
//! types, the values tuples hold, and the statistics ANALYZE collects.

mod schema;
mod stats;
mod tuple;

pub use schema::{ColumnInfo, ColumnType, Schema};
pub use stats::{ColumnStats, ColumnStatsCollector, TableStats};
pub use tuple::{LiteralTuple, Value};
