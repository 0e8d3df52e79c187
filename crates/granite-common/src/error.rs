//! Error handling for Granite.
//!
//! A single unified error type is used across all Granite components.
//! Each variant carries the context a caller needs to act on the error.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::types::FilePointer;

/// Result type alias for Granite operations.
pub type DbResult<T> = std::result::Result<T, DbError>;

/// The unified error type for Granite operations.
#[derive(Debug, Error)]
pub enum DbError {
    /// I/O error from the underlying system.  Fatal to the current
    /// statement; the enclosing transaction must roll back.
    #[error("I/O error: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: io::Error,
    },

    /// A file does not exist.
    #[error("file not found: {path}")]
    FileNotFound {
        /// Path of the missing file.
        path: PathBuf,
    },

    /// A page does not exist in its file.
    #[error("page {page_no} not found in file {file_name}")]
    PageNotFound {
        /// Name of the file.
        file_name: String,
        /// The missing page number.
        page_no: u32,
    },

    /// A file was opened whose type byte does not match the caller's
    /// expectation.
    #[error("file {path} has type {found}, expected {expected}")]
    TypeMismatch {
        /// Path of the offending file.
        path: PathBuf,
        /// The expected file-type tag.
        expected: u8,
        /// The tag actually found in the file's header.
        found: u8,
    },

    /// On-disk data is corrupted: an unknown record-type byte, an
    /// impossible offset, or a malformed structure.  Fatal during
    /// recovery.
    #[error("data format error: {message}")]
    DataFormat {
        /// Description of the corruption.
        message: String,
    },

    /// A file pointer does not reference a live tuple.
    #[error("invalid file pointer {pointer}: {reason}")]
    InvalidFilePointer {
        /// The dangling pointer.
        pointer: FilePointer,
        /// Why the pointer could not be resolved.
        reason: String,
    },

    /// An in-place tuple update cannot fit in its page.  The
    /// transaction may continue.
    #[error("page {page_no} cannot fit updated value: need {needed} more bytes, have {available}")]
    PageFullOnUpdate {
        /// The page that is out of space.
        page_no: u32,
        /// Additional bytes the update requires.
        needed: usize,
        /// Free bytes actually available.
        available: usize,
    },

    /// A tuple is too large to ever fit in a page.
    #[error("tuple size {size} exceeds page capacity {capacity}")]
    TupleTooLarge {
        /// Storage size of the rejected tuple.
        size: usize,
        /// Maximum storage a page can hold.
        capacity: usize,
    },

    /// The buffer pool cannot make room: every cached page is pinned.
    #[error("buffer pool is full: every cached page is pinned")]
    BufferPoolFull,

    /// API misuse; indicates a programming error in the caller.
    #[error("illegal state: {message}")]
    IllegalState {
        /// Description of the misuse.
        message: String,
    },

    /// Invalid configuration.
    #[error("configuration error: {message}")]
    Config {
        /// What is wrong with the configuration.
        message: String,
    },
}

impl DbError {
    /// Creates a `FileNotFound` error.
    pub fn file_not_found(path: impl Into<PathBuf>) -> Self {
        Self::FileNotFound { path: path.into() }
    }

    /// Creates a `PageNotFound` error.
    pub fn page_not_found(file_name: impl Into<String>, page_no: u32) -> Self {
        Self::PageNotFound {
            file_name: file_name.into(),
            page_no,
        }
    }

    /// Creates a `DataFormat` error.
    pub fn data_format(message: impl Into<String>) -> Self {
        Self::DataFormat {
            message: message.into(),
        }
    }

    /// Creates an `InvalidFilePointer` error.
    pub fn invalid_file_pointer(pointer: FilePointer, reason: impl Into<String>) -> Self {
        Self::InvalidFilePointer {
            pointer,
            reason: reason.into(),
        }
    }

    /// Creates an `IllegalState` error.
    pub fn illegal_state(message: impl Into<String>) -> Self {
        Self::IllegalState {
            message: message.into(),
        }
    }

    /// Creates a `Config` error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Returns true if this error means a file or page was absent.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::FileNotFound { .. } | Self::PageNotFound { .. })
            || matches!(self, Self::Io { source } if source.kind() == io::ErrorKind::NotFound)
    }

    /// Returns true if this error indicates on-disk corruption.
    #[must_use]
    pub fn is_corruption(&self) -> bool {
        matches!(self, Self::DataFormat { .. } | Self::TypeMismatch { .. })
    }

    /// Returns true if the current transaction may continue after this
    /// error is reported to the caller.
    #[must_use]
    pub fn is_statement_recoverable(&self) -> bool {
        matches!(
            self,
            Self::PageFullOnUpdate { .. }
                | Self::TupleTooLarge { .. }
                | Self::InvalidFilePointer { .. }
        )
    }
}
