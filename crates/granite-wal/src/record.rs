//! WAL record types.

use granite_common::{DbError, DbResult, Lsn, TxnId};

/// On-disk size of a `START_TXN` record.
pub const START_RECORD_SIZE: u32 = 6;

/// On-disk size of a `COMMIT_TXN` or `ABORT_TXN` record.
pub const TXN_RECORD_SIZE: u32 = 12;

/// Record type tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum WalRecordType {
    /// A transaction's first record.
    StartTxn = 1,
    /// A transaction committed.
    CommitTxn = 2,
    /// A transaction aborted.
    AbortTxn = 3,
    /// A physical page diff with undo and redo images.
    UpdatePage = 4,
    /// A redo-only page diff (compensation log record).
    UpdatePageRedoOnly = 5,
}

impl WalRecordType {
    /// Returns the on-disk tag.
    #[inline]
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Decodes an on-disk tag.  An unknown tag is a `DataFormat`
    /// error; during recovery that aborts startup.
    pub fn from_u8(value: u8) -> DbResult<Self> {
        match value {
            1 => Ok(Self::StartTxn),
            2 => Ok(Self::CommitTxn),
            3 => Ok(Self::AbortTxn),
            4 => Ok(Self::UpdatePage),
            5 => Ok(Self::UpdatePageRedoOnly),
            other => Err(DbError::data_format(format!(
                "unrecognized WAL record-type value {}",
                other
            ))),
        }
    }

    /// Returns true for the two update-record forms.
    #[must_use]
    pub const fn is_update(self) -> bool {
        matches!(self, Self::UpdatePage | Self::UpdatePageRedoOnly)
    }
}

impl std::fmt::Display for WalRecordType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::StartTxn => "START_TXN",
            Self::CommitTxn => "COMMIT_TXN",
            Self::AbortTxn => "ABORT_TXN",
            Self::UpdatePage => "UPDATE_PAGE",
            Self::UpdatePageRedoOnly => "UPDATE_PAGE_REDO_ONLY",
        };
        write!(f, "{}", name)
    }
}

/// One record's identity, as produced by a forward log scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordSummary {
    /// The record's LSN; its `record_size` is filled in by the scan.
    pub lsn: Lsn,
    /// The record's type.
    pub record_type: WalRecordType,
    /// The transaction the record belongs to.
    pub txn_id: TxnId,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tag_round_trip() {
        for tag in 1..=5u8 {
            let rtype = WalRecordType::from_u8(tag).unwrap();
            assert_eq!(rtype.as_u8(), tag);
        }
    }

    #[test]
    fn test_unknown_tag_is_data_format() {
        let err = WalRecordType::from_u8(0).unwrap_err();
        assert!(err.is_corruption());
        assert!(WalRecordType::from_u8(200).is_err());
    }

    #[test]
    fn test_is_update() {
        assert!(WalRecordType::UpdatePage.is_update());
        assert!(WalRecordType::UpdatePageRedoOnly.is_update());
        assert!(!WalRecordType::StartTxn.is_update());
        assert!(!WalRecordType::CommitTxn.is_update());
    }
}
