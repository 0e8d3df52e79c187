//! System-wide constants for Granite.

// =============================================================================
// Page sizes
// =============================================================================

/// Default page size for data files (8 KB).
pub const DEFAULT_PAGE_SIZE: usize = 8 * 1024;

/// Minimum supported page size.
pub const MIN_PAGE_SIZE: usize = 512;

/// Maximum supported page size.
pub const MAX_PAGE_SIZE: usize = 64 * 1024;

/// Page size of the transaction-state file.  One sector, so that the
/// state record can be rewritten with a single atomic write.
pub const TXN_STATE_PAGE_SIZE: usize = 512;

// =============================================================================
// Buffer pool
// =============================================================================

/// Default buffer pool capacity (4 MB).
pub const DEFAULT_BUFFER_POOL_SIZE: usize = 4 * 1024 * 1024;

// =============================================================================
// Write-ahead log
// =============================================================================

/// Default maximum size of a single WAL file (10 MB).  When the current
/// WAL file reaches this size, the next record goes to a new file with
/// the next file number.
pub const DEFAULT_MAX_WAL_FILE_SIZE: u32 = 10 * 1024 * 1024;

/// Maximum WAL file number.  File numbers wrap around past this value.
pub const MAX_WAL_FILE_NUMBER: u16 = 65_535;

/// File offset of the "previous WAL file's last record end" field in a
/// WAL file.  The value is an unsigned 32-bit integer, 0 for the first
/// WAL file ever written.
pub const OFFSET_PREV_FILE_END: u32 = 2;

/// File offset of the first log record in every WAL file.
pub const OFFSET_FIRST_RECORD: u32 = 6;
