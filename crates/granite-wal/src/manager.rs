//! The write-ahead log manager.
//!
//! All appenders and readers serialize on one mutex, held for the
//! duration of any record write, rollback, or recovery pass.  A record
//! is written in full before the lock releases, so records from
//! different transactions may interleave in LSN order but never
//! byte-interleave within a record.  Reads of already-written,
//! strictly-earlier LSN ranges are safe under the same lock because
//! those bytes are immutable.
//!
//! Transaction-level coordination (forcing the log, the txn-state
//! file, commit/abort policy) lives in the transaction manager; this
//! module owns the record formats and the log traversals.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, trace};

use granite_common::constants::{OFFSET_FIRST_RECORD, OFFSET_PREV_FILE_END};
use granite_common::{DbError, DbResult, Lsn, TransactionState, TxnId};

use granite_storage::{BufferManager, DbFile, DbFileType, FileCursor, FileManager, PinnedPage};

use crate::diff;
use crate::record::{RecordSummary, WalRecordType, START_RECORD_SIZE, TXN_RECORD_SIZE};
use crate::recovery::RecoveryInfo;

/// Returns the file name of WAL file `file_no`.
#[must_use]
pub fn wal_file_name(file_no: u16) -> String {
    format!("wal-{:05}.log", file_no)
}

struct WalState {
    first_lsn: Lsn,
    next_lsn: Lsn,
}

/// A reader positioned in one WAL file, reusable across records of the
/// same file.
struct WalCursor {
    file_no: u16,
    cursor: FileCursor,
}

/// The write-ahead log manager.
pub struct WalManager {
    file_manager: Arc<FileManager>,
    buffer: Arc<BufferManager>,
    page_size: usize,
    max_file_size: u32,
    guard: Mutex<WalState>,
}

impl WalManager {
    /// Creates a WAL manager over an existing log whose recovery bounds
    /// are `first_lsn` and `next_lsn` (from the txn-state file).
    pub fn new(
        file_manager: Arc<FileManager>,
        buffer: Arc<BufferManager>,
        page_size: usize,
        max_file_size: u32,
        first_lsn: Lsn,
        next_lsn: Lsn,
    ) -> Self {
        Self {
            file_manager,
            buffer,
            page_size,
            max_file_size,
            guard: Mutex::new(WalState { first_lsn, next_lsn }),
        }
    }

    /// The LSN where recovery must start.
    #[must_use]
    pub fn first_lsn(&self) -> Lsn {
        self.guard.lock().first_lsn
    }

    /// The LSN where the next record will be written.
    #[must_use]
    pub fn next_lsn(&self) -> Lsn {
        self.guard.lock().next_lsn
    }

    /// The LSN immediately after the record starting at `lsn`, with the
    /// file-wrap rule applied.  Pure computation; takes no lock.
    #[must_use]
    pub fn next_lsn_after(&self, lsn: Lsn) -> Lsn {
        compute_next_lsn(lsn.file_no(), lsn.record_end(), self.max_file_size)
    }

    /// Creates WAL file `file_no`, recording `prev_file_end` (the
    /// ending offset of the previous WAL file, 0 for the very first)
    /// in its header.
    pub fn create_wal_file(&self, file_no: u16, prev_file_end: u32) -> DbResult<Arc<DbFile>> {
        debug!(file_no, prev_file_end, "creating WAL file");
        let file = self.file_manager.create_file(
            &wal_file_name(file_no),
            DbFileType::WriteAheadLogFile,
            self.page_size,
        )?;
        let page = self
            .buffer
            .fetch_page(&file, 0, false)?
            .ok_or_else(|| DbError::page_not_found(file.file_name(), 0))?;
        page.write_u32(OFFSET_PREV_FILE_END as usize, prev_file_end);
        Ok(file)
    }

    fn open_wal_file(&self, file_no: u16) -> DbResult<Arc<DbFile>> {
        let name = wal_file_name(file_no);
        self.file_manager
            .open_typed(&name, DbFileType::WriteAheadLogFile)?
            .ok_or_else(|| DbError::file_not_found(self.file_manager.base_dir().join(&name)))
    }

    fn wal_writer(&self, lsn: Lsn) -> DbResult<FileCursor> {
        let file = self.open_wal_file(lsn.file_no())?;
        let mut cursor = FileCursor::appender(file, Arc::clone(&self.buffer));
        cursor.set_position(u64::from(lsn.offset()));
        Ok(cursor)
    }

    /// Returns a reader positioned at `lsn`, reusing `current` when it
    /// is already open on the right file.
    fn wal_reader(&self, current: Option<WalCursor>, lsn: Lsn) -> DbResult<WalCursor> {
        if let Some(mut cur) = current {
            if cur.file_no == lsn.file_no() {
                cur.cursor.set_position(u64::from(lsn.offset()));
                return Ok(cur);
            }
        }
        let file = self.open_wal_file(lsn.file_no())?;
        let mut cursor = FileCursor::reader(file, Arc::clone(&self.buffer));
        cursor.set_position(u64::from(lsn.offset()));
        Ok(WalCursor {
            file_no: lsn.file_no(),
            cursor,
        })
    }

    /// Advances `next_lsn` past a record that ended at `end_pos`.  On
    /// wrap, the next WAL file is created immediately, while the
    /// previous file's end offset is still known, and its header
    /// records that offset for backward traversal.
    fn advance_next_lsn(&self, state: &mut WalState, end_pos: u32) -> DbResult<()> {
        let file_no = state.next_lsn.file_no();
        if end_pos >= self.max_file_size {
            let next_file = file_no.wrapping_add(1);
            self.create_wal_file(next_file, end_pos)?;
            state.next_lsn = Lsn::new(next_file, OFFSET_FIRST_RECORD);
        } else {
            state.next_lsn = Lsn::new(file_no, end_pos);
        }
        trace!(next_lsn = %state.next_lsn, "advanced next LSN");
        Ok(())
    }

    // =========================================================================
    // Appending records
    // =========================================================================

    /// Writes a transaction demarcation record for an explicitly given
    /// transaction.  Used by undo processing, where transaction state
    /// is dictated by the log rather than by a session.
    fn append_txn_record(
        &self,
        state: &mut WalState,
        record_type: WalRecordType,
        txn_id: TxnId,
        prev_lsn: Option<Lsn>,
    ) -> DbResult<Lsn> {
        if record_type.is_update() {
            return Err(DbError::illegal_state(
                "append_txn_record only writes demarcation records",
            ));
        }
        if record_type != WalRecordType::StartTxn && prev_lsn.is_none() {
            return Err(DbError::illegal_state(format!(
                "prev_lsn is required for a {} record",
                record_type
            )));
        }

        let lsn = state.next_lsn;
        debug!(%lsn, %record_type, %txn_id, "writing txn record");

        let mut writer = self.wal_writer(lsn)?;
        writer.write_u8(record_type.as_u8())?;
        writer.write_u32(txn_id.as_u32())?;

        let record_size = if record_type == WalRecordType::StartTxn {
            writer.write_u8(record_type.as_u8())?;
            START_RECORD_SIZE
        } else {
            let prev = prev_lsn.expect("checked above");
            writer.write_u16(prev.file_no())?;
            writer.write_u32(prev.offset())?;
            writer.write_u8(record_type.as_u8())?;
            TXN_RECORD_SIZE
        };

        let end_pos = writer.position() as u32;
        drop(writer);
        self.advance_next_lsn(state, end_pos)?;

        Ok(Lsn::with_record_size(
            lsn.file_no(),
            lsn.offset(),
            record_size,
        ))
    }

    /// Writes a `START_TXN`, `COMMIT_TXN`, or `ABORT_TXN` record for
    /// the session's current transaction and updates its chain.
    pub fn write_txn_record(
        &self,
        txn: &mut TransactionState,
        record_type: WalRecordType,
    ) -> DbResult<Lsn> {
        let txn_id = txn
            .txn_id()
            .ok_or_else(|| DbError::illegal_state("no transaction is currently in progress"))?;

        let mut state = self.guard.lock();
        let lsn = self.append_txn_record(&mut state, record_type, txn_id, txn.last_lsn())?;
        drop(state);

        txn.set_last_lsn(lsn);
        Ok(lsn)
    }

    /// Writes an `UPDATE_PAGE` record capturing `page`'s diff between
    /// `old_data` and `data`, then resynchronizes the two and stamps
    /// the page's LSN.
    pub fn write_update_page_record(
        &self,
        txn: &mut TransactionState,
        page: &PinnedPage,
    ) -> DbResult<Lsn> {
        let txn_id = txn
            .txn_id()
            .ok_or_else(|| DbError::illegal_state("no transaction is currently in progress"))?;
        if !page.is_dirty() {
            return Err(DbError::illegal_state("page has no updates to log"));
        }
        let prev_lsn = txn.last_lsn().ok_or_else(|| {
            DbError::illegal_state("update record written before the transaction's start record")
        })?;

        let mut state = self.guard.lock();
        let segments = page.with_images(|old, new| diff::diff_segments(old, new));
        let lsn = state.next_lsn;
        debug!(
            %lsn,
            %txn_id,
            file = page.file().file_name(),
            page_no = page.page_no(),
            segments = segments.len(),
            "writing update record"
        );

        let mut writer = self.wal_writer(lsn)?;
        writer.write_u8(WalRecordType::UpdatePage.as_u8())?;
        writer.write_u32(txn_id.as_u32())?;
        writer.write_u16(prev_lsn.file_no())?;
        writer.write_u32(prev_lsn.offset())?;
        writer.write_varstring255(page.file().file_name())?;
        writer.write_u16(page.page_no() as u16)?;
        writer.write_u16(segments.len() as u16)?;

        for seg in &segments {
            writer.write_u16(seg.start)?;
            writer.write_u16(seg.old.len() as u16)?;
            writer.write_bytes(&seg.old)?;
            writer.write_bytes(&seg.new)?;
        }

        // Trailer: the record's start offset and type, so backward
        // scans can find the record's head.
        writer.write_u32(lsn.offset())?;
        writer.write_u8(WalRecordType::UpdatePage.as_u8())?;

        let end_pos = writer.position() as u32;
        drop(writer);

        let lsn = Lsn::with_record_size(lsn.file_no(), lsn.offset(), end_pos - lsn.offset());
        page.set_page_lsn(lsn);
        page.sync_old_data();
        txn.set_last_lsn(lsn);

        self.advance_next_lsn(&mut state, end_pos)?;
        Ok(lsn)
    }

    /// Writes an `UPDATE_PAGE_REDO_ONLY` record (a compensation log
    /// record) whose redo data is `changes`, stamping the page's LSN.
    fn append_redo_only_record(
        &self,
        state: &mut WalState,
        txn_id: TxnId,
        prev_lsn: Lsn,
        page: &PinnedPage,
        num_segments: u16,
        changes: &[u8],
    ) -> DbResult<Lsn> {
        let lsn = state.next_lsn;
        debug!(
            %lsn,
            %txn_id,
            file = page.file().file_name(),
            page_no = page.page_no(),
            num_segments,
            "writing redo-only update record"
        );

        let mut writer = self.wal_writer(lsn)?;
        writer.write_u8(WalRecordType::UpdatePageRedoOnly.as_u8())?;
        writer.write_u32(txn_id.as_u32())?;
        writer.write_u16(prev_lsn.file_no())?;
        writer.write_u32(prev_lsn.offset())?;
        writer.write_varstring255(page.file().file_name())?;
        writer.write_u16(page.page_no() as u16)?;
        writer.write_u16(num_segments)?;
        writer.write_bytes(changes)?;

        writer.write_u32(lsn.offset())?;
        writer.write_u8(WalRecordType::UpdatePageRedoOnly.as_u8())?;

        let end_pos = writer.position() as u32;
        drop(writer);

        let lsn = Lsn::with_record_size(lsn.file_no(), lsn.offset(), end_pos - lsn.offset());
        page.set_page_lsn(lsn);
        page.sync_old_data();

        self.advance_next_lsn(state, end_pos)?;
        Ok(lsn)
    }

    // =========================================================================
    // Applying records to pages
    // =========================================================================

    /// Applies an update record's redo data to a page.  The cursor must
    /// be positioned at the record's first segment; it ends just past
    /// the last segment.
    fn apply_redo(
        cursor: &mut FileCursor,
        page: &PinnedPage,
        num_segments: u16,
        redo_only: bool,
    ) -> DbResult<()> {
        for _ in 0..num_segments {
            let start = cursor.read_u16()? as usize;
            let size = cursor.read_u16()? as usize;

            // A full update record stores the undo image first.
            if !redo_only {
                cursor.move_position(size as i64);
            }

            let mut redo_data = vec![0u8; size];
            cursor.read_exact(&mut redo_data)?;
            page.write_bytes(start, &redo_data);
        }
        Ok(())
    }

    /// Applies an `UPDATE_PAGE` record's undo data to a page, and
    /// builds the segment payload for the corresponding redo-only
    /// record.  The cursor must be positioned at the first segment.
    fn apply_undo_and_gen_redo_only_data(
        cursor: &mut FileCursor,
        page: &PinnedPage,
        num_segments: u16,
    ) -> DbResult<Vec<u8>> {
        let mut changes = Vec::new();
        for _ in 0..num_segments {
            let start = cursor.read_u16()?;
            let size = cursor.read_u16()? as usize;

            let mut undo_data = vec![0u8; size];
            cursor.read_exact(&mut undo_data)?;
            page.write_bytes(start as usize, &undo_data);

            // Skip the redo image.
            cursor.move_position(size as i64);

            changes.extend_from_slice(&start.to_be_bytes());
            changes.extend_from_slice(&(size as u16).to_be_bytes());
            changes.extend_from_slice(&undo_data);
        }
        Ok(changes)
    }

    fn load_target_page(&self, file_name: &str, page_no: u16) -> DbResult<PinnedPage> {
        let file = self
            .file_manager
            .open_file(file_name)?
            .ok_or_else(|| DbError::file_not_found(self.file_manager.base_dir().join(file_name)))?;
        self.buffer
            .fetch_page(&file, u32::from(page_no), true)?
            .ok_or_else(|| DbError::page_not_found(file_name, u32::from(page_no)))
    }

    // =========================================================================
    // Rollback
    // =========================================================================

    /// Rolls back the session's current transaction by walking its
    /// record chain backward, undoing each page update and logging a
    /// redo-only compensation record for it, then writing the final
    /// `ABORT_TXN` record.
    pub fn rollback_transaction(&self, txn: &mut TransactionState) -> DbResult<()> {
        let txn_id = txn
            .txn_id()
            .ok_or_else(|| DbError::illegal_state("no transaction is currently in progress"))?;
        let mut lsn = txn
            .last_lsn()
            .ok_or_else(|| DbError::illegal_state("rollback of a transaction with no records"))?;

        info!(%txn_id, last_lsn = %lsn, "rolling back transaction");

        let mut state = self.guard.lock();
        let mut reader: Option<WalCursor> = None;

        loop {
            let mut cur = self.wal_reader(reader.take(), lsn)?;

            let record_type = WalRecordType::from_u8(cur.cursor.read_u8()?)?;
            let record_txn = TxnId::new(cur.cursor.read_u32()?);
            if record_txn != txn_id {
                return Err(DbError::data_format(format!(
                    "rollback of transaction {} reached a record of transaction {} at {}",
                    txn_id, record_txn, lsn
                )));
            }

            trace!(%lsn, %record_type, "undoing record");

            match record_type {
                WalRecordType::StartTxn => break,
                WalRecordType::UpdatePage => {
                    let prev_lsn =
                        Lsn::new(cur.cursor.read_u16()?, cur.cursor.read_u32()?);
                    let file_name = cur.cursor.read_varstring255()?;
                    let page_no = cur.cursor.read_u16()?;
                    let num_segments = cur.cursor.read_u16()?;

                    let page = self.load_target_page(&file_name, page_no)?;
                    let changes = Self::apply_undo_and_gen_redo_only_data(
                        &mut cur.cursor,
                        &page,
                        num_segments,
                    )?;

                    let chain_lsn = txn.last_lsn().expect("chain is nonempty during rollback");
                    let clr = self.append_redo_only_record(
                        &mut state,
                        txn_id,
                        chain_lsn,
                        &page,
                        num_segments,
                        &changes,
                    )?;
                    txn.set_last_lsn(clr);

                    lsn = prev_lsn;
                }
                other => {
                    return Err(DbError::data_format(format!(
                        "unexpected {} record in the chain of transaction {} at {}",
                        other, txn_id, lsn
                    )));
                }
            }

            reader = Some(cur);
        }

        let abort = self.append_txn_record(
            &mut state,
            WalRecordType::AbortTxn,
            txn_id,
            txn.last_lsn(),
        )?;
        txn.set_last_lsn(abort);

        info!(%txn_id, "rollback complete");
        Ok(())
    }

    // =========================================================================
    // Recovery passes
    // =========================================================================

    /// Redo: walks forward from `first_lsn` to `next_lsn`, reapplying
    /// every update record's redo data (idempotent physical redo) and
    /// building the transaction tables for undo.
    pub fn perform_redo(&self, info: &mut RecoveryInfo) -> DbResult<()> {
        let _state = self.guard.lock();
        let mut curr = info.first_lsn;
        debug!(start = %curr, end = %info.next_lsn, "starting redo pass");

        let mut reader: Option<WalCursor> = None;
        while curr < info.next_lsn {
            let mut cur = self.wal_reader(reader.take(), curr)?;

            let record_type = WalRecordType::from_u8(cur.cursor.read_u8()?)?;
            let txn_id = TxnId::new(cur.cursor.read_u32()?);
            trace!(lsn = %curr, %record_type, %txn_id, "redo: examining record");

            match record_type {
                WalRecordType::StartTxn => {
                    info.update_info(txn_id, curr);
                    cur.cursor.move_position(1);
                }
                WalRecordType::UpdatePage | WalRecordType::UpdatePageRedoOnly => {
                    // prevLSN is not needed while scanning forward.
                    cur.cursor.move_position(6);
                    let file_name = cur.cursor.read_varstring255()?;
                    let page_no = cur.cursor.read_u16()?;
                    let num_segments = cur.cursor.read_u16()?;

                    let page = self.load_target_page(&file_name, page_no)?;
                    Self::apply_redo(
                        &mut cur.cursor,
                        &page,
                        num_segments,
                        record_type == WalRecordType::UpdatePageRedoOnly,
                    )?;

                    let start_offset = cur.cursor.read_u32()?;
                    if start_offset != curr.offset() {
                        return Err(DbError::data_format(format!(
                            "update record at {} carries start offset {}",
                            curr, start_offset
                        )));
                    }
                    cur.cursor.move_position(1);

                    let record_size = cur.cursor.position() as u32 - curr.offset();
                    let applied =
                        Lsn::with_record_size(curr.file_no(), curr.offset(), record_size);
                    page.set_page_lsn(applied);
                    page.sync_old_data();

                    info.update_info(txn_id, curr);
                }
                WalRecordType::CommitTxn | WalRecordType::AbortTxn => {
                    cur.cursor.move_position(7);
                    info.record_txn_completed(txn_id);
                }
            }

            curr = compute_next_lsn(
                curr.file_no(),
                cur.cursor.position() as u32,
                self.max_file_size,
            );
            reader = Some(cur);
        }

        if curr != info.next_lsn {
            return Err(DbError::data_format(format!(
                "redo traversal ended at {} but the txn-state file recorded {}",
                curr, info.next_lsn
            )));
        }

        debug!(
            incomplete = info.incomplete_count(),
            "redo pass complete"
        );
        Ok(())
    }

    /// Undo: walks backward from `next_lsn` while incomplete
    /// transactions remain, undoing their updates with compensation
    /// records and writing their abort records.  Never reads past
    /// `first_lsn`.
    pub fn perform_undo(&self, info: &mut RecoveryInfo) -> DbResult<()> {
        let mut state = self.guard.lock();
        let mut curr = info.next_lsn;
        debug!(start = %curr, incomplete = info.incomplete_count(), "starting undo pass");

        let mut reader: Option<WalCursor> = None;
        while info.has_incomplete_txns() {
            let mut file_no = curr.file_no();
            let mut offset = curr.offset();

            if offset == OFFSET_FIRST_RECORD {
                // At the start of this file's records: hop to the end
                // of the previous WAL file, whose last offset is in
                // this file's header.
                let mut cur = self.wal_reader(reader.take(), curr)?;
                cur.cursor.set_position(u64::from(OFFSET_PREV_FILE_END));
                let prev_file_end = cur.cursor.read_u32()?;
                reader = Some(cur);
                if prev_file_end == 0 {
                    debug!("reached the very start of the write-ahead log");
                    break;
                }
                file_no = file_no.wrapping_sub(1);
                offset = prev_file_end;
                curr = Lsn::new(file_no, offset);
            } else if offset < OFFSET_FIRST_RECORD {
                return Err(DbError::data_format(format!(
                    "overshot the start of WAL file {}'s records at offset {}",
                    file_no, offset
                )));
            }

            if curr <= info.first_lsn {
                break;
            }

            // `curr` is a record boundary; the byte before it is the
            // previous record's trailing type tag.
            let mut cur = self.wal_reader(reader.take(), curr)?;
            cur.cursor.set_position(u64::from(offset) - 1);
            let record_type = WalRecordType::from_u8(cur.cursor.read_u8()?)?;

            let start_offset = match record_type {
                WalRecordType::StartTxn => offset - START_RECORD_SIZE,
                WalRecordType::CommitTxn | WalRecordType::AbortTxn => offset - TXN_RECORD_SIZE,
                WalRecordType::UpdatePage | WalRecordType::UpdatePageRedoOnly => {
                    // The record-start offset sits just before the
                    // trailing type byte.
                    cur.cursor.set_position(u64::from(offset) - 5);
                    cur.cursor.read_u32()?
                }
            };

            curr = Lsn::new(file_no, start_offset);
            if curr < info.first_lsn {
                break;
            }

            cur.cursor.set_position(u64::from(start_offset) + 1);
            let txn_id = TxnId::new(cur.cursor.read_u32()?);
            if info.is_txn_complete(txn_id) {
                reader = Some(cur);
                continue;
            }

            trace!(lsn = %curr, %record_type, %txn_id, "undo: examining record");
            let last_lsn = info.last_lsn(txn_id).ok_or_else(|| {
                DbError::data_format(format!(
                    "incomplete transaction {} has no recorded LSN",
                    txn_id
                ))
            })?;

            match record_type {
                WalRecordType::StartTxn => {
                    self.append_txn_record(
                        &mut state,
                        WalRecordType::AbortTxn,
                        txn_id,
                        Some(last_lsn),
                    )?;
                    info.record_txn_completed(txn_id);
                }
                WalRecordType::UpdatePage => {
                    cur.cursor.move_position(6);
                    let file_name = cur.cursor.read_varstring255()?;
                    let page_no = cur.cursor.read_u16()?;
                    let num_segments = cur.cursor.read_u16()?;

                    let page = self.load_target_page(&file_name, page_no)?;
                    let changes = Self::apply_undo_and_gen_redo_only_data(
                        &mut cur.cursor,
                        &page,
                        num_segments,
                    )?;

                    let clr = self.append_redo_only_record(
                        &mut state,
                        txn_id,
                        last_lsn,
                        &page,
                        num_segments,
                        &changes,
                    )?;
                    info.update_info(txn_id, clr);
                }
                WalRecordType::UpdatePageRedoOnly => {
                    // A prior undo already compensated this update.
                }
                WalRecordType::CommitTxn | WalRecordType::AbortTxn => {
                    // Only reachable for completed transactions, which
                    // were skipped above.
                }
            }

            reader = Some(cur);
        }

        debug!("undo pass complete");
        Ok(())
    }

    /// Publishes `first_lsn := next_lsn` at the end of recovery and
    /// returns the new common value.  This is the only mover of
    /// `first_lsn`.
    pub fn advance_first_lsn_to_next(&self) -> Lsn {
        let mut state = self.guard.lock();
        state.first_lsn = state.next_lsn;
        info!(first_lsn = %state.first_lsn, "advanced WAL start to recovery end");
        state.first_lsn
    }

    // =========================================================================
    // Forward scanning
    // =========================================================================

    /// Walks the log forward from `first_lsn` to `next_lsn`, returning
    /// each record's identity.  Diagnostic aid; also exercises the
    /// record-length arithmetic the recovery passes depend on.
    pub fn scan_records(&self) -> DbResult<Vec<RecordSummary>> {
        let state = self.guard.lock();
        let (first, next) = (state.first_lsn, state.next_lsn);

        let mut records = Vec::new();
        let mut curr = first;
        let mut reader: Option<WalCursor> = None;
        while curr < next {
            let mut cur = self.wal_reader(reader.take(), curr)?;

            let record_type = WalRecordType::from_u8(cur.cursor.read_u8()?)?;
            let txn_id = TxnId::new(cur.cursor.read_u32()?);

            match record_type {
                WalRecordType::StartTxn => cur.cursor.move_position(1),
                WalRecordType::CommitTxn | WalRecordType::AbortTxn => cur.cursor.move_position(7),
                WalRecordType::UpdatePage | WalRecordType::UpdatePageRedoOnly => {
                    cur.cursor.move_position(6);
                    let _file_name = cur.cursor.read_varstring255()?;
                    let _page_no = cur.cursor.read_u16()?;
                    let num_segments = cur.cursor.read_u16()?;
                    for _ in 0..num_segments {
                        let _start = cur.cursor.read_u16()?;
                        let size = cur.cursor.read_u16()? as i64;
                        let images = if record_type == WalRecordType::UpdatePage {
                            2
                        } else {
                            1
                        };
                        cur.cursor.move_position(size * images);
                    }
                    cur.cursor.move_position(5);
                }
            }

            let record_size = cur.cursor.position() as u32 - curr.offset();
            records.push(RecordSummary {
                lsn: Lsn::with_record_size(curr.file_no(), curr.offset(), record_size),
                record_type,
                txn_id,
            });

            curr = compute_next_lsn(
                curr.file_no(),
                cur.cursor.position() as u32,
                self.max_file_size,
            );
            reader = Some(cur);
        }

        Ok(records)
    }
}

impl std::fmt::Debug for WalManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.guard.lock();
        f.debug_struct("WalManager")
            .field("first_lsn", &state.first_lsn)
            .field("next_lsn", &state.next_lsn)
            .field("max_file_size", &self.max_file_size)
            .finish()
    }
}

/// Applies the file-wrap rule: when `offset` has reached the file size
/// limit, the next record goes to the next (wrapping) file, at the
/// first-record offset.
#[must_use]
pub(crate) fn compute_next_lsn(file_no: u16, offset: u32, max_file_size: u32) -> Lsn {
    if offset >= max_file_size {
        Lsn::new(file_no.wrapping_add(1), OFFSET_FIRST_RECORD)
    } else {
        Lsn::new(file_no, offset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use granite_common::constants::DEFAULT_MAX_WAL_FILE_SIZE;
    use tempfile::TempDir;

    const PAGE_SIZE: usize = 512;

    struct Fixture {
        _tmp: TempDir,
        file_manager: Arc<FileManager>,
        buffer: Arc<BufferManager>,
        wal: WalManager,
        data_file: Arc<DbFile>,
    }

    fn setup(max_file_size: u32) -> Fixture {
        let tmp = TempDir::new().unwrap();
        let file_manager = Arc::new(FileManager::new(tmp.path()).unwrap());
        let buffer = Arc::new(BufferManager::new(Arc::clone(&file_manager), 128 * PAGE_SIZE));
        let data_file = file_manager
            .create_file("t.tbl", DbFileType::HeapTupleFile, PAGE_SIZE)
            .unwrap();

        let first = Lsn::new(0, OFFSET_FIRST_RECORD);
        let wal = WalManager::new(
            Arc::clone(&file_manager),
            Arc::clone(&buffer),
            PAGE_SIZE,
            max_file_size,
            first,
            first,
        );
        wal.create_wal_file(0, 0).unwrap();

        Fixture {
            _tmp: tmp,
            file_manager,
            buffer,
            wal,
            data_file,
        }
    }

    fn begin(txn_id: u32) -> TransactionState {
        let mut txn = TransactionState::new();
        txn.start(TxnId::new(txn_id));
        txn
    }

    fn data_page(fx: &Fixture) -> PinnedPage {
        fx.buffer.fetch_page(&fx.data_file, 1, true).unwrap().unwrap()
    }

    fn page_snapshot(page: &PinnedPage) -> Vec<u8> {
        page.with_data(|d| d.to_vec())
    }

    fn record_types(fx: &Fixture) -> Vec<WalRecordType> {
        fx.wal
            .scan_records()
            .unwrap()
            .iter()
            .map(|r| r.record_type)
            .collect()
    }

    #[test]
    fn test_txn_record_layout() {
        let fx = setup(DEFAULT_MAX_WAL_FILE_SIZE);
        let mut txn = begin(1);

        let start = fx.wal.write_txn_record(&mut txn, WalRecordType::StartTxn).unwrap();
        assert_eq!(start, Lsn::new(0, 6));
        assert_eq!(start.record_size(), START_RECORD_SIZE);
        assert_eq!(txn.last_lsn(), Some(start));

        let commit = fx.wal.write_txn_record(&mut txn, WalRecordType::CommitTxn).unwrap();
        assert_eq!(commit, Lsn::new(0, 12));
        assert_eq!(commit.record_size(), TXN_RECORD_SIZE);
        assert_eq!(fx.wal.next_lsn(), Lsn::new(0, 24));

        let records = fx.wal.scan_records().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].record_type, WalRecordType::StartTxn);
        assert_eq!(records[0].txn_id, TxnId::new(1));
        assert_eq!(records[1].record_type, WalRecordType::CommitTxn);
    }

    #[test]
    fn test_write_requires_transaction_and_dirty_page() {
        let fx = setup(DEFAULT_MAX_WAL_FILE_SIZE);

        let mut idle = TransactionState::new();
        assert!(fx
            .wal
            .write_txn_record(&mut idle, WalRecordType::StartTxn)
            .is_err());

        let mut txn = begin(1);
        fx.wal.write_txn_record(&mut txn, WalRecordType::StartTxn).unwrap();
        let page = data_page(&fx);
        // Page is clean: nothing to log.
        assert!(fx.wal.write_update_page_record(&mut txn, &page).is_err());
    }

    #[test]
    fn test_update_record_stamps_page_and_syncs() {
        let fx = setup(DEFAULT_MAX_WAL_FILE_SIZE);
        let mut txn = begin(1);
        fx.wal.write_txn_record(&mut txn, WalRecordType::StartTxn).unwrap();

        let page = data_page(&fx);
        page.write_bytes(100, b"granite");
        assert!(page.page_lsn().is_none());

        let lsn = fx.wal.write_update_page_record(&mut txn, &page).unwrap();
        assert_eq!(page.page_lsn(), Some(lsn));
        assert!(lsn.record_size() > 0);
        assert_eq!(txn.last_lsn(), Some(lsn));
        // The pre-image has been resynchronized with the log.
        page.with_images(|old, new| assert_eq!(old, new));
    }

    #[test]
    fn test_backward_traversal_bytes() {
        let fx = setup(DEFAULT_MAX_WAL_FILE_SIZE);
        let mut txn = begin(1);
        fx.wal.write_txn_record(&mut txn, WalRecordType::StartTxn).unwrap();

        let page = data_page(&fx);
        page.write_bytes(0, b"xyz");
        let lsn = fx.wal.write_update_page_record(&mut txn, &page).unwrap();
        let end = lsn.record_end();

        // One byte before the record's end: its type.  Five bytes
        // before: its start offset.
        let wal_file = fx.file_manager.open_file(&wal_file_name(0)).unwrap().unwrap();
        let mut reader = FileCursor::reader(wal_file, Arc::clone(&fx.buffer));
        reader.set_position(u64::from(end) - 1);
        assert_eq!(
            reader.read_u8().unwrap(),
            WalRecordType::UpdatePage.as_u8()
        );
        reader.set_position(u64::from(end) - 5);
        assert_eq!(reader.read_u32().unwrap(), lsn.offset());

        // Forward walk from the record's start plus its length lands on
        // the next record boundary.
        assert_eq!(fx.wal.next_lsn(), Lsn::new(0, end));
    }

    #[test]
    fn test_rollback_restores_page_and_logs_clrs() {
        let fx = setup(DEFAULT_MAX_WAL_FILE_SIZE);
        let mut txn = begin(1);
        fx.wal.write_txn_record(&mut txn, WalRecordType::StartTxn).unwrap();

        let page = data_page(&fx);
        let before = page_snapshot(&page);

        page.write_bytes(40, b"first change");
        fx.wal.write_update_page_record(&mut txn, &page).unwrap();
        page.write_bytes(200, b"second change");
        fx.wal.write_update_page_record(&mut txn, &page).unwrap();

        fx.wal.rollback_transaction(&mut txn).unwrap();
        assert_eq!(page_snapshot(&page), before);

        assert_eq!(
            record_types(&fx),
            vec![
                WalRecordType::StartTxn,
                WalRecordType::UpdatePage,
                WalRecordType::UpdatePage,
                WalRecordType::UpdatePageRedoOnly,
                WalRecordType::UpdatePageRedoOnly,
                WalRecordType::AbortTxn,
            ]
        );
    }

    #[test]
    fn test_redo_is_idempotent() {
        let fx = setup(DEFAULT_MAX_WAL_FILE_SIZE);
        let mut txn = begin(1);
        fx.wal.write_txn_record(&mut txn, WalRecordType::StartTxn).unwrap();

        let page = data_page(&fx);
        page.write_bytes(64, b"durable bytes");
        fx.wal.write_update_page_record(&mut txn, &page).unwrap();
        fx.wal.write_txn_record(&mut txn, WalRecordType::CommitTxn).unwrap();
        let committed = page_snapshot(&page);

        // Clobber the page, as if the flush never happened.
        page.write_bytes(64, &[0u8; 13]);
        page.sync_old_data();

        let mut info = RecoveryInfo::new(fx.wal.first_lsn(), fx.wal.next_lsn());
        fx.wal.perform_redo(&mut info).unwrap();
        assert_eq!(page_snapshot(&page), committed);
        assert!(!info.has_incomplete_txns());

        // Redo applied a second time produces the same bytes.
        let mut info2 = RecoveryInfo::new(fx.wal.first_lsn(), fx.wal.next_lsn());
        fx.wal.perform_redo(&mut info2).unwrap();
        assert_eq!(page_snapshot(&page), committed);
    }

    #[test]
    fn test_undo_compensates_incomplete_transaction() {
        let fx = setup(DEFAULT_MAX_WAL_FILE_SIZE);
        let mut txn = begin(1);
        fx.wal.write_txn_record(&mut txn, WalRecordType::StartTxn).unwrap();

        let page = data_page(&fx);
        let before = page_snapshot(&page);
        page.write_bytes(10, b"uncommitted");
        fx.wal.write_update_page_record(&mut txn, &page).unwrap();
        // No commit: the transaction is incomplete.

        let mut info = RecoveryInfo::new(fx.wal.first_lsn(), fx.wal.next_lsn());
        fx.wal.perform_redo(&mut info).unwrap();
        assert_eq!(info.incomplete_count(), 1);

        fx.wal.perform_undo(&mut info).unwrap();
        assert!(!info.has_incomplete_txns());
        assert_eq!(page_snapshot(&page), before);

        assert_eq!(
            record_types(&fx),
            vec![
                WalRecordType::StartTxn,
                WalRecordType::UpdatePage,
                WalRecordType::UpdatePageRedoOnly,
                WalRecordType::AbortTxn,
            ]
        );
    }

    #[test]
    fn test_file_wrap_and_cross_file_undo() {
        // A small limit forces the log into a second file quickly.
        let fx = setup(80);

        // T1 updates a page and never commits.
        let mut t1 = begin(1);
        fx.wal.write_txn_record(&mut t1, WalRecordType::StartTxn).unwrap();
        let page = data_page(&fx);
        let before = page_snapshot(&page);
        page.write_bytes(8, b"gone");
        fx.wal.write_update_page_record(&mut t1, &page).unwrap();

        // Short committed transactions push the log past the limit.
        let mut next_id = 2;
        while fx.wal.next_lsn().file_no() == 0 {
            let mut t = begin(next_id);
            next_id += 1;
            fx.wal.write_txn_record(&mut t, WalRecordType::StartTxn).unwrap();
            fx.wal.write_txn_record(&mut t, WalRecordType::CommitTxn).unwrap();
        }

        // The wrap landed the next record at the start of file 1, and
        // file 1's header records where file 0's records ended.
        let next = fx.wal.next_lsn();
        assert_eq!(next, Lsn::new(1, OFFSET_FIRST_RECORD));
        let file1 = fx.file_manager.open_file(&wal_file_name(1)).unwrap().unwrap();
        let mut reader = FileCursor::reader(file1, Arc::clone(&fx.buffer));
        reader.set_position(u64::from(OFFSET_PREV_FILE_END));
        let prev_end = reader.read_u32().unwrap();
        assert!(prev_end >= 80);
        drop(reader);

        // Undo must hop backward across the file boundary to find T1.
        let mut info = RecoveryInfo::new(fx.wal.first_lsn(), next);
        fx.wal.perform_redo(&mut info).unwrap();
        assert_eq!(info.incomplete_count(), 1);
        fx.wal.perform_undo(&mut info).unwrap();
        assert!(!info.has_incomplete_txns());
        assert_eq!(page_snapshot(&page), before);

        // The compensation record and abort landed in file 1.
        let records = fx.wal.scan_records().unwrap();
        let clr = records
            .iter()
            .find(|r| r.record_type == WalRecordType::UpdatePageRedoOnly)
            .unwrap();
        assert_eq!(clr.lsn.file_no(), 1);
        assert_eq!(records.last().unwrap().record_type, WalRecordType::AbortTxn);
    }

    #[test]
    fn test_rollback_rejects_foreign_record() {
        let fx = setup(DEFAULT_MAX_WAL_FILE_SIZE);

        let mut t1 = begin(1);
        fx.wal.write_txn_record(&mut t1, WalRecordType::StartTxn).unwrap();
        let page = data_page(&fx);
        page.write_bytes(0, b"t1 data");
        let t1_update = fx.wal.write_update_page_record(&mut t1, &page).unwrap();

        // A corrupted chain pointing at another transaction's record is
        // fatal.
        let mut t2 = begin(2);
        t2.set_last_lsn(t1_update);
        let err = fx.wal.rollback_transaction(&mut t2).unwrap_err();
        assert!(err.is_corruption());
    }
}
