//! Engine configuration structures.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::constants::{
    DEFAULT_BUFFER_POOL_SIZE, DEFAULT_MAX_WAL_FILE_SIZE, DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE,
    MIN_PAGE_SIZE, OFFSET_FIRST_RECORD,
};
use crate::error::{DbError, DbResult};

/// Top-level engine configuration.
///
/// # Example
///
/// ```rust
/// use granite_common::config::EngineConfig;
///
/// let config = EngineConfig::with_data_dir("./data");
/// assert_eq!(config.storage.page_size, 8192);
/// config.validate().unwrap();
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Directory holding every database file.
    pub data_dir: PathBuf,

    /// Storage layer configuration.
    pub storage: StorageConfig,

    /// Buffer pool configuration.
    pub buffer_pool: BufferPoolConfig,

    /// Write-ahead log configuration.
    pub wal: WalConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            storage: StorageConfig::default(),
            buffer_pool: BufferPoolConfig::default(),
            wal: WalConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Creates a configuration with the specified data directory.
    #[must_use]
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Default::default()
        }
    }

    /// Creates a small configuration suitable for tests.
    #[must_use]
    pub fn for_testing(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            storage: StorageConfig { page_size: 1024 },
            buffer_pool: BufferPoolConfig {
                capacity_bytes: 64 * 1024,
            },
            wal: WalConfig::default(),
        }
    }

    /// Validates the configuration.
    pub fn validate(&self) -> DbResult<()> {
        let page_size = self.storage.page_size;
        if !page_size.is_power_of_two() {
            return Err(DbError::config("page_size must be a power of two"));
        }
        if !(MIN_PAGE_SIZE..=MAX_PAGE_SIZE).contains(&page_size) {
            return Err(DbError::config(format!(
                "page_size must be between {} and {}",
                MIN_PAGE_SIZE, MAX_PAGE_SIZE
            )));
        }
        if self.buffer_pool.capacity_bytes < page_size * 16 {
            return Err(DbError::config(
                "buffer_pool.capacity_bytes must hold at least 16 pages",
            ));
        }
        if self.wal.max_file_size <= OFFSET_FIRST_RECORD {
            return Err(DbError::config(
                "wal.max_file_size must leave room for records",
            ));
        }
        Ok(())
    }
}

/// Storage layer configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Size of each page in bytes.  Must be a power of two in
    /// `[512, 65536]`.  Applies to files created by this engine; files
    /// opened from disk self-identify their page size.
    pub page_size: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

/// Buffer pool configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BufferPoolConfig {
    /// Total bytes of page data the buffer pool may cache.
    pub capacity_bytes: usize,
}

impl Default for BufferPoolConfig {
    fn default() -> Self {
        Self {
            capacity_bytes: DEFAULT_BUFFER_POOL_SIZE,
        }
    }
}

/// Write-ahead log configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalConfig {
    /// Size at which the current WAL file is closed and the next record
    /// goes to a new file.
    pub max_file_size: u32,
}

impl Default for WalConfig {
    fn default() -> Self {
        Self {
            max_file_size: DEFAULT_MAX_WAL_FILE_SIZE,
        }
    }
}
