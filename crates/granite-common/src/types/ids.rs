//! Identifier types.
//!
//! Type-safe wrappers around numeric identifiers, preventing accidental
//! misuse of different ID kinds.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Transaction identifier.
///
/// Transaction IDs are assigned monotonically by the transaction manager
/// and recorded in every WAL record a transaction writes.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct TxnId(u32);

impl TxnId {
    /// Creates a new `TxnId` from a raw u32 value.
    #[inline]
    #[must_use]
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// Returns the raw u32 value.
    #[inline]
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0
    }

    /// Returns the next transaction ID.
    #[inline]
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0.wrapping_add(1))
    }

    /// Converts to bytes (big-endian).
    #[inline]
    #[must_use]
    pub fn to_be_bytes(self) -> [u8; 4] {
        self.0.to_be_bytes()
    }

    /// Creates a TxnId from bytes (big-endian).
    #[inline]
    #[must_use]
    pub fn from_be_bytes(bytes: [u8; 4]) -> Self {
        Self(u32::from_be_bytes(bytes))
    }
}

impl fmt::Debug for TxnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TxnId({})", self.0)
    }
}

impl fmt::Display for TxnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for TxnId {
    #[inline]
    fn from(id: u32) -> Self {
        Self::new(id)
    }
}

/// A pointer to a tuple's slot within a heap file.
///
/// The offset is the byte position of the tuple's *slot array entry*
/// within its page, not the tuple data itself; the tuple data is found
/// by reading the slot.  This indirection lets tuples move within a
/// page without invalidating pointers held by indexes.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FilePointer {
    /// Page number within the heap file.
    pub page_no: u16,
    /// Byte offset of the slot entry within the page.
    pub offset: u16,
}

impl FilePointer {
    /// Creates a new file pointer.
    #[inline]
    #[must_use]
    pub const fn new(page_no: u16, offset: u16) -> Self {
        Self { page_no, offset }
    }
}

impl fmt::Debug for FilePointer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FilePointer({}:{})", self.page_no, self.offset)
    }
}

impl fmt::Display for FilePointer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.page_no, self.offset)
    }
}
