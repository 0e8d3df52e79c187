//! Heap tuple file operations: scan, point lookup, insert, update,
//! delete, and ANALYZE.

use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, trace};

use granite_common::{DbError, DbResult, FilePointer, TransactionState};

use super::{data_page, header_page, HeapFileManager, PageTuple, Tuple};
use crate::file::DbFile;
use crate::page::PinnedPage;
use crate::relations::{ColumnStatsCollector, Schema, TableStats, Value};

/// A heap file: tuples in slotted pages, with a free-page list for
/// insert placement.
pub struct HeapFile {
    manager: Arc<HeapFileManager>,
    db_file: Arc<DbFile>,
    schema: Arc<Schema>,
    stats: RwLock<TableStats>,
}

impl HeapFile {
    pub(super) fn new(
        manager: Arc<HeapFileManager>,
        db_file: Arc<DbFile>,
        schema: Arc<Schema>,
        stats: TableStats,
    ) -> Self {
        Self {
            manager,
            db_file,
            schema,
            stats: RwLock::new(stats),
        }
    }

    /// Returns the file's schema.
    #[must_use]
    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    /// Returns the file's current statistics.
    #[must_use]
    pub fn stats(&self) -> TableStats {
        self.stats.read().clone()
    }

    /// Returns the underlying paged file.
    #[must_use]
    pub fn db_file(&self) -> &Arc<DbFile> {
        &self.db_file
    }

    fn fetch_page(&self, page_no: u32, create: bool) -> DbResult<Option<PinnedPage>> {
        self.manager.buffer().fetch_page(&self.db_file, page_no, create)
    }

    /// Returns the first tuple in the file, or `None` if the file holds
    /// no tuples.
    ///
    /// The first tuple lives in the lowest-numbered slot of the
    /// lowest-numbered data page that has a non-empty slot.
    pub fn first_tuple(&self) -> DbResult<Option<PageTuple>> {
        let mut page_no = 1u32;
        loop {
            let Some(page) = self.fetch_page(page_no, false)? else {
                return Ok(None);
            };

            for slot in 0..data_page::num_slots(&page) {
                let offset = data_page::slot_value(&page, slot);
                if offset != data_page::EMPTY_SLOT {
                    let tuple =
                        PageTuple::new(Arc::clone(&self.schema), page.clone(), slot, offset)?;
                    return Ok(Some(tuple));
                }
            }
            page_no += 1;
        }
    }

    /// Returns the tuple following `tuple`, or `None` at the end of the
    /// file.
    ///
    /// The search reloads the page by number, so it works whether or
    /// not the input tuple's own pin is still the page's only one.
    pub fn next_tuple(&self, tuple: &PageTuple) -> DbResult<Option<PageTuple>> {
        let mut page_no = tuple.page().page_no();
        let mut next_slot = tuple.slot() + 1;

        loop {
            let Some(page) = self.fetch_page(page_no, false)? else {
                return Ok(None);
            };

            let num_slots = data_page::num_slots(&page);
            while next_slot < num_slots {
                let offset = data_page::slot_value(&page, next_slot);
                if offset != data_page::EMPTY_SLOT {
                    let tuple =
                        PageTuple::new(Arc::clone(&self.schema), page.clone(), next_slot, offset)?;
                    return Ok(Some(tuple));
                }
                next_slot += 1;
            }

            page_no += 1;
            next_slot = 0;
        }
    }

    /// Resolves a file pointer to its tuple.
    pub fn get_tuple(&self, pointer: FilePointer) -> DbResult<PageTuple> {
        let Some(page) = self.fetch_page(u32::from(pointer.page_no), false)? else {
            return Err(DbError::invalid_file_pointer(
                pointer,
                format!("page {} does not exist", pointer.page_no),
            ));
        };

        if pointer.offset % 2 != 0 {
            return Err(DbError::invalid_file_pointer(
                pointer,
                "offset is not a slot-array entry",
            ));
        }
        let slot = pointer.offset / 2;
        if slot >= data_page::num_slots(&page) {
            return Err(DbError::invalid_file_pointer(
                pointer,
                format!("page has only {} slots", data_page::num_slots(&page)),
            ));
        }

        let offset = data_page::slot_value(&page, slot);
        if offset == data_page::EMPTY_SLOT {
            return Err(DbError::invalid_file_pointer(pointer, "slot is empty"));
        }

        PageTuple::new(Arc::clone(&self.schema), page, slot, offset)
    }

    /// Adds a tuple to the file and returns its page-backed handle.
    ///
    /// Placement walks the free-page list from the header's
    /// `free_head`; pages without enough room are unlinked as the walk
    /// passes them.  When the list runs out, a new page is appended and
    /// pushed onto the list.
    pub fn add_tuple(&self, txn: &mut TransactionState, tuple: &Tuple) -> DbResult<PageTuple> {
        if tuple.num_columns() != self.schema.num_columns() {
            return Err(DbError::illegal_state(format!(
                "tuple has {} values for a {}-column schema",
                tuple.num_columns(),
                self.schema.num_columns()
            )));
        }
        let values: Vec<Value> = (0..tuple.num_columns())
            .map(|i| tuple.value(i))
            .collect::<DbResult<_>>()?;

        let size = PageTuple::storage_size(&self.schema, &values);
        trace!(file = self.db_file.file_name(), size, "adding tuple");

        // The "+ 2" covers the slot entry the tuple may need.
        let capacity = self.db_file.page_size() - 4;
        if size + 2 > capacity {
            return Err(DbError::TupleTooLarge { size, capacity });
        }

        let header = self
            .fetch_page(0, false)?
            .ok_or_else(|| DbError::page_not_found(self.db_file.file_name(), 0))?;

        // Walk the free list for a page with room.
        let mut target: Option<PinnedPage> = None;
        let mut page_no = header_page::free_head(&header);
        while page_no != 0 {
            let page = self.fetch_page(u32::from(page_no), false)?.ok_or_else(|| {
                DbError::data_format(format!(
                    "free list of {} references nonexistent page {}",
                    self.db_file.file_name(),
                    page_no
                ))
            })?;

            let free = data_page::free_space(&page);
            trace!(page_no, free, "considering free-list page");
            if free >= size + 2 {
                target = Some(page);
                break;
            }

            // Not enough room: unlink the page as the walk passes it.
            let next = data_page::free_next(&page);
            data_page::set_free_next(&page, data_page::INVALID_PGNO);
            header_page::set_free_head(&header, next);
            self.manager.logger().log_page_write(txn, &page)?;
            page_no = next;
        }

        let page = match target {
            Some(page) => page,
            None => {
                // Free list exhausted: append a fresh page and make it
                // the new head.
                let new_page_no = self.db_file.num_pages();
                debug!(
                    file = self.db_file.file_name(),
                    page_no = new_page_no,
                    "extending heap file with a new data page"
                );
                let page = self
                    .fetch_page(new_page_no, true)?
                    .ok_or_else(|| DbError::page_not_found(self.db_file.file_name(), new_page_no))?;
                data_page::init_new_page(&page);
                header_page::set_free_head(&header, new_page_no as u16);
                data_page::set_free_next(&page, 0);
                page
            }
        };

        let slot = data_page::alloc_new_tuple(&page, size)?;
        let offset = data_page::slot_value(&page, slot);
        trace!(page_no = page.page_no(), slot, offset, "placed new tuple");

        let tuple = PageTuple::store_new_tuple(
            Arc::clone(&self.schema),
            page.clone(),
            slot,
            offset,
            &values,
        )?;
        data_page::sanity_check(&page);

        self.manager.logger().log_page_write(txn, &page)?;
        self.manager.logger().log_page_write(txn, &header)?;
        Ok(tuple)
    }

    /// Applies column updates to `tuple` in place.
    ///
    /// Updates are named `(column, value)` pairs.  A size-changing
    /// update that no longer fits fails with `PageFullOnUpdate` and
    /// leaves that column unchanged; earlier columns in `updates` keep
    /// their new values and are logged.
    pub fn update_tuple(
        &self,
        txn: &mut TransactionState,
        tuple: &mut PageTuple,
        updates: &[(String, Value)],
    ) -> DbResult<()> {
        let result = (|| -> DbResult<()> {
            for (name, value) in updates {
                let index = self.schema.column_index(name).ok_or_else(|| {
                    DbError::illegal_state(format!("no column named {:?}", name))
                })?;
                tuple.set_column(index, value)?;
            }
            Ok(())
        })();

        data_page::sanity_check(tuple.page());
        self.manager.logger().log_page_write(txn, tuple.page())?;
        result
    }

    /// Deletes `tuple` from the file, consuming its handle (and pin).
    ///
    /// If the tuple's page was not already on the free-page list, it is
    /// pushed onto the head of the list.
    pub fn delete_tuple(&self, txn: &mut TransactionState, tuple: PageTuple) -> DbResult<()> {
        let page = tuple.page().clone();
        let slot = tuple.slot();
        drop(tuple);

        data_page::delete_tuple(&page, slot)?;
        data_page::sanity_check(&page);

        if data_page::free_next(&page) == data_page::INVALID_PGNO {
            let header = self
                .fetch_page(0, false)?
                .ok_or_else(|| DbError::page_not_found(self.db_file.file_name(), 0))?;

            let prev_head = header_page::free_head(&header);
            header_page::set_free_head(&header, page.page_no() as u16);
            data_page::set_free_next(&page, prev_head);

            self.manager.logger().log_page_write(txn, &header)?;
        }

        self.manager.logger().log_page_write(txn, &page)?;
        Ok(())
    }

    /// Scans the whole file, recomputing table and per-column
    /// statistics, and persists them through the heap file manager.
    pub fn analyze(&self, txn: &mut TransactionState) -> DbResult<TableStats> {
        let num_columns = self.schema.num_columns();
        let mut collectors: Vec<ColumnStatsCollector> = self
            .schema
            .columns()
            .map(|col| ColumnStatsCollector::new(col.col_type))
            .collect();

        let mut num_pages = 0u32;
        let mut num_tuples = 0u32;
        let mut total_bytes = 0usize;

        for page_no in 1..self.db_file.num_pages() {
            let Some(page) = self.fetch_page(page_no, false)? else {
                break;
            };

            num_pages += 1;
            total_bytes += data_page::tuple_data_end(&page) - data_page::tuple_data_start(&page);

            for slot in 0..data_page::num_slots(&page) {
                let offset = data_page::slot_value(&page, slot);
                if offset == data_page::EMPTY_SLOT {
                    continue;
                }
                num_tuples += 1;
                let tuple = PageTuple::new(Arc::clone(&self.schema), page.clone(), slot, offset)?;
                for (index, collector) in collectors.iter_mut().enumerate().take(num_columns) {
                    collector.add_value(&tuple.get_column(index)?);
                }
            }
        }

        let avg_tuple_size = if num_tuples == 0 {
            0.0
        } else {
            total_bytes as f32 / num_tuples as f32
        };
        let stats = TableStats {
            num_pages,
            num_tuples,
            avg_tuple_size,
            column_stats: collectors
                .into_iter()
                .map(ColumnStatsCollector::into_stats)
                .collect(),
        };

        debug!(
            file = self.db_file.file_name(),
            num_pages, num_tuples, "analyzed heap file"
        );

        *self.stats.write() = stats.clone();
        self.manager.save_metadata(self, txn)?;
        Ok(stats)
    }

    pub(super) fn replace_stats(&self, stats: TableStats) {
        *self.stats.write() = stats;
    }

    /// Iterates over every tuple in the file.
    #[must_use]
    pub fn scan(&self) -> TupleScan<'_> {
        TupleScan {
            file: self,
            current: None,
            started: false,
        }
    }
}

impl std::fmt::Debug for HeapFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HeapFile")
            .field("file", &self.db_file.file_name())
            .field("columns", &self.schema.num_columns())
            .finish()
    }
}

/// An iterator over a heap file's tuples, holding at most one page pin
/// at a time.
pub struct TupleScan<'a> {
    file: &'a HeapFile,
    current: Option<PageTuple>,
    started: bool,
}

impl Iterator for TupleScan<'_> {
    type Item = DbResult<PageTuple>;

    fn next(&mut self) -> Option<Self::Item> {
        let next = if self.started {
            match self.current.take() {
                Some(prev) => self.file.next_tuple(&prev),
                None => return None,
            }
        } else {
            self.started = true;
            self.file.first_tuple()
        };

        match next {
            Ok(Some(tuple)) => {
                // Keep a handle for the next advance; hand the caller
                // its own pin.
                let again = PageTuple::new(
                    Arc::clone(&self.file.schema),
                    tuple.page().clone(),
                    tuple.slot(),
                    data_page::slot_value(tuple.page(), tuple.slot()),
                );
                match again {
                    Ok(copy) => {
                        self.current = Some(copy);
                        Some(Ok(tuple))
                    }
                    Err(e) => Some(Err(e)),
                }
            }
            Ok(None) => None,
            Err(e) => Some(Err(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::data_page;
    use super::*;
    use crate::heap::PageWriteLogger;
    use crate::relations::{ColumnInfo, ColumnType, LiteralTuple};
    use tempfile::TempDir;

    const PAGE_SIZE: usize = 512;

    struct NoopLogger;

    impl PageWriteLogger for NoopLogger {
        fn log_page_write(&self, _txn: &mut TransactionState, _page: &PinnedPage) -> DbResult<()> {
            Ok(())
        }
    }

    fn setup() -> (TempDir, Arc<HeapFileManager>, Arc<HeapFile>) {
        let tmp = TempDir::new().unwrap();
        let fm = Arc::new(crate::file::FileManager::new(tmp.path()).unwrap());
        let buffer = Arc::new(crate::buffer::BufferManager::new(
            Arc::clone(&fm),
            64 * PAGE_SIZE,
        ));
        let manager = Arc::new(HeapFileManager::new(
            fm,
            buffer,
            Arc::new(NoopLogger),
            PAGE_SIZE,
        ));

        let schema = Schema::new(vec![
            ColumnInfo::new("id", ColumnType::Integer),
            ColumnInfo::new("name", ColumnType::Varchar { max_length: 100 }),
        ])
        .unwrap();
        let heap = manager.create_file("t1.tbl", schema).unwrap();
        (tmp, manager, heap)
    }

    fn row(id: i32, name: &str) -> Tuple {
        Tuple::Literal(LiteralTuple::new(vec![
            Value::Integer(id),
            Value::Varchar(name.to_string()),
        ]))
    }

    fn collect_ids(heap: &HeapFile) -> Vec<i32> {
        heap.scan()
            .map(|t| match t.unwrap().get_column(0).unwrap() {
                Value::Integer(v) => v,
                other => panic!("unexpected value {:?}", other),
            })
            .collect()
    }

    #[test]
    fn test_empty_file_scans_empty() {
        let (_tmp, _mgr, heap) = setup();
        assert!(heap.first_tuple().unwrap().is_none());
        assert_eq!(heap.scan().count(), 0);
    }

    #[test]
    fn test_insert_and_scan_order() {
        let (_tmp, _mgr, heap) = setup();
        let mut txn = TransactionState::new();

        for id in 1..=5 {
            heap.add_tuple(&mut txn, &row(id, &format!("row-{}", id)))
                .unwrap();
        }
        assert_eq!(collect_ids(&heap), vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_read_back_values() {
        let (_tmp, _mgr, heap) = setup();
        let mut txn = TransactionState::new();

        let stored = heap.add_tuple(&mut txn, &row(42, "hello")).unwrap();
        assert_eq!(stored.get_column(0).unwrap(), Value::Integer(42));
        assert_eq!(
            stored.get_column(1).unwrap(),
            Value::Varchar("hello".to_string())
        );
        assert!(!stored.is_null(0));
    }

    #[test]
    fn test_get_tuple_by_pointer() {
        let (_tmp, _mgr, heap) = setup();
        let mut txn = TransactionState::new();

        let stored = heap.add_tuple(&mut txn, &row(7, "seven")).unwrap();
        let pointer = stored.file_pointer();
        drop(stored);

        let fetched = heap.get_tuple(pointer).unwrap();
        assert_eq!(fetched.get_column(0).unwrap(), Value::Integer(7));

        // A pointer to an empty slot is invalid.
        heap.delete_tuple(&mut txn, fetched).unwrap();
        let err = heap.get_tuple(pointer).unwrap_err();
        assert!(matches!(err, DbError::InvalidFilePointer { .. }));

        // So is a pointer to a nonexistent page.
        let err = heap
            .get_tuple(granite_common::FilePointer::new(99, 0))
            .unwrap_err();
        assert!(matches!(err, DbError::InvalidFilePointer { .. }));
    }

    #[test]
    fn test_delete_and_rescan() {
        let (_tmp, _mgr, heap) = setup();
        let mut txn = TransactionState::new();

        heap.add_tuple(&mut txn, &row(1, "a")).unwrap();
        let second = heap.add_tuple(&mut txn, &row(2, "b")).unwrap();
        heap.add_tuple(&mut txn, &row(3, "c")).unwrap();

        heap.delete_tuple(&mut txn, second).unwrap();
        assert_eq!(collect_ids(&heap), vec![1, 3]);
    }

    #[test]
    fn test_deleted_page_joins_free_list() {
        let (_tmp, mgr, heap) = setup();
        let mut txn = TransactionState::new();

        let stored = heap.add_tuple(&mut txn, &row(1, "x")).unwrap();
        let page_no = stored.page().page_no() as u16;

        // The new page went onto the free list at insert time and has
        // room, so it is still on it.
        let header = mgr
            .buffer()
            .fetch_page(heap.db_file(), 0, false)
            .unwrap()
            .unwrap();
        assert_eq!(header_page::free_head(&header), page_no);
        drop(header);

        heap.delete_tuple(&mut txn, stored).unwrap();

        let header = mgr
            .buffer()
            .fetch_page(heap.db_file(), 0, false)
            .unwrap()
            .unwrap();
        assert_eq!(header_page::free_head(&header), page_no);
    }

    #[test]
    fn test_full_pages_unlinked_from_free_list() {
        let (_tmp, mgr, heap) = setup();
        let mut txn = TransactionState::new();

        // Rows of ~120 bytes: a 512-byte page fits at most 4.
        let filler = "f".repeat(110);
        for id in 0..12 {
            heap.add_tuple(&mut txn, &row(id, &filler)).unwrap();
        }

        // Every page reachable from free_head must have free space and
        // free_next set; the chain must be acyclic.
        let header = mgr
            .buffer()
            .fetch_page(heap.db_file(), 0, false)
            .unwrap()
            .unwrap();
        let mut seen = std::collections::HashSet::new();
        let mut page_no = header_page::free_head(&header);
        while page_no != 0 {
            assert!(seen.insert(page_no), "free list cycle at page {}", page_no);
            let page = mgr
                .buffer()
                .fetch_page(heap.db_file(), u32::from(page_no), false)
                .unwrap()
                .unwrap();
            let next = data_page::free_next(&page);
            assert_ne!(next, data_page::INVALID_PGNO);
            page_no = next;
        }

        // Unlinked pages are exactly the ones not reachable.
        for page_no in 1..heap.db_file().num_pages() {
            let page = mgr
                .buffer()
                .fetch_page(heap.db_file(), page_no, false)
                .unwrap()
                .unwrap();
            let on_list = data_page::free_next(&page) != data_page::INVALID_PGNO;
            assert_eq!(on_list, seen.contains(&(page_no as u16)));
        }

        assert_eq!(collect_ids(&heap), (0..12).collect::<Vec<_>>());
    }

    #[test]
    fn test_tuple_too_large_rejected() {
        let (_tmp, _mgr, heap) = setup();
        let mut txn = TransactionState::new();

        // Larger than any page could hold, counting the slot entry.
        let huge = Tuple::Literal(LiteralTuple::new(vec![
            Value::Integer(1),
            Value::Varchar("z".repeat(520)),
        ]));
        let err = heap.add_tuple(&mut txn, &huge).unwrap_err();
        assert!(matches!(err, DbError::TupleTooLarge { .. }));
    }

    #[test]
    fn test_update_same_size_in_place() {
        let (_tmp, _mgr, heap) = setup();
        let mut txn = TransactionState::new();

        let mut stored = heap.add_tuple(&mut txn, &row(5, "abcde")).unwrap();
        heap.update_tuple(
            &mut txn,
            &mut stored,
            &[("name".to_string(), Value::Varchar("edcba".into()))],
        )
        .unwrap();
        assert_eq!(
            stored.get_column(1).unwrap(),
            Value::Varchar("edcba".to_string())
        );
    }

    #[test]
    fn test_update_resizes_and_preserves_neighbors() {
        let (_tmp, _mgr, heap) = setup();
        let mut txn = TransactionState::new();

        heap.add_tuple(&mut txn, &row(1, "one")).unwrap();
        let mut middle = heap.add_tuple(&mut txn, &row(2, "two")).unwrap();
        heap.add_tuple(&mut txn, &row(3, "three")).unwrap();

        heap.update_tuple(
            &mut txn,
            &mut middle,
            &[("name".to_string(), Value::Varchar("much longer text".into()))],
        )
        .unwrap();
        drop(middle);

        let values: Vec<(i32, String)> = heap
            .scan()
            .map(|t| {
                let t = t.unwrap();
                let id = match t.get_column(0).unwrap() {
                    Value::Integer(v) => v,
                    _ => unreachable!(),
                };
                let name = match t.get_column(1).unwrap() {
                    Value::Varchar(s) => s,
                    _ => unreachable!(),
                };
                (id, name)
            })
            .collect();
        assert_eq!(
            values,
            vec![
                (1, "one".to_string()),
                (2, "much longer text".to_string()),
                (3, "three".to_string()),
            ]
        );
    }

    #[test]
    fn test_update_null_transitions() {
        let (_tmp, _mgr, heap) = setup();
        let mut txn = TransactionState::new();

        let mut stored = heap.add_tuple(&mut txn, &row(9, "to-null")).unwrap();
        heap.update_tuple(&mut txn, &mut stored, &[("name".to_string(), Value::Null)])
            .unwrap();
        assert!(stored.is_null(1));
        assert_eq!(stored.get_column(1).unwrap(), Value::Null);
        assert_eq!(stored.get_column(0).unwrap(), Value::Integer(9));

        heap.update_tuple(
            &mut txn,
            &mut stored,
            &[("name".to_string(), Value::Varchar("back".into()))],
        )
        .unwrap();
        assert!(!stored.is_null(1));
        assert_eq!(
            stored.get_column(1).unwrap(),
            Value::Varchar("back".to_string())
        );
    }

    #[test]
    fn test_update_page_full() {
        let (_tmp, _mgr, heap) = setup();
        let mut txn = TransactionState::new();

        // One 13-byte row plus five 99-byte rows fill the 508-byte
        // tuple region of a 512-byte page exactly.
        let mut first = heap.add_tuple(&mut txn, &row(0, "abcd")).unwrap();
        let first_page = first.page().page_no();
        let filler = "g".repeat(90);
        for id in 1..=5 {
            let t = heap.add_tuple(&mut txn, &row(id, &filler)).unwrap();
            assert_eq!(t.page().page_no(), first_page);
        }
        assert_eq!(data_page::free_space(first.page()), 0);

        let err = heap
            .update_tuple(
                &mut txn,
                &mut first,
                &[("name".to_string(), Value::Varchar("h".repeat(10)))],
            )
            .unwrap_err();
        assert!(matches!(err, DbError::PageFullOnUpdate { .. }));
        // The tuple is unchanged and the transaction continues.
        assert_eq!(
            first.get_column(1).unwrap(),
            Value::Varchar("abcd".to_string())
        );
    }

    #[test]
    fn test_analyze_statistics() {
        let (_tmp, _mgr, heap) = setup();
        let mut txn = TransactionState::new();

        let names = ["ant", "bee", "ant", "cat", "bee", "ant"];
        for (i, name) in names.iter().enumerate() {
            heap.add_tuple(&mut txn, &row((i % 3) as i32, name)).unwrap();
        }
        let null_row = Tuple::Literal(LiteralTuple::new(vec![Value::Null, Value::Null]));
        heap.add_tuple(&mut txn, &null_row).unwrap();

        let stats = heap.analyze(&mut txn).unwrap();
        assert_eq!(stats.num_tuples, 7);
        assert_eq!(stats.num_pages, heap.db_file().num_pages() - 1);
        assert!(stats.avg_tuple_size > 0.0);

        let id_stats = &stats.column_stats[0];
        assert_eq!(id_stats.num_distinct, Some(3));
        assert_eq!(id_stats.num_null, 1);
        assert_eq!(id_stats.min, Some(Value::Integer(0)));
        assert_eq!(id_stats.max, Some(Value::Integer(2)));

        let name_stats = &stats.column_stats[1];
        assert_eq!(name_stats.num_distinct, Some(3));
        assert_eq!(name_stats.num_null, 1);
        assert!(name_stats.min.is_none());
        assert!(name_stats.max.is_none());

        // Stats survive a reopen through a fresh manager.
        assert_eq!(heap.stats(), stats);
    }

    #[test]
    fn test_scan_survives_unpinned_input() {
        let (_tmp, mgr, heap) = setup();
        let mut txn = TransactionState::new();

        heap.add_tuple(&mut txn, &row(1, "a")).unwrap();
        heap.add_tuple(&mut txn, &row(2, "b")).unwrap();

        let first = heap.first_tuple().unwrap().unwrap();
        let page_no = first.page().page_no();
        let slot = first.slot();
        let offset = data_page::slot_value(first.page(), slot);
        let schema = Arc::clone(heap.schema());
        drop(first);

        // Rebuild the handle after its pin was released; next_tuple
        // reloads the page by number.
        let page = mgr
            .buffer()
            .fetch_page(heap.db_file(), page_no, false)
            .unwrap()
            .unwrap();
        let revived = PageTuple::new(schema, page, slot, offset).unwrap();
        let next = heap.next_tuple(&revived).unwrap().unwrap();
        assert_eq!(next.get_column(0).unwrap(), Value::Integer(2));
        assert!(heap.next_tuple(&next).unwrap().is_none());
    }
}
