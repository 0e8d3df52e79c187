//! Tuples stored in heap-file pages.
//!
//! # Storage format
//!
//! A tuple begins with a null bitmap of `ceil(num_columns / 8)` bytes
//! (bit set = NULL), followed by the non-NULL column values in schema
//! order.  INTEGER is 4 bytes, BIGINT and DOUBLE 8 bytes, VARCHAR a
//! 2-byte length prefix plus its ASCII bytes.  All integers are
//! big-endian.

use std::sync::Arc;

use granite_common::{DbError, DbResult, FilePointer};

use super::{data_page, SlotId};
use crate::page::PinnedPage;
use crate::relations::{ColumnType, LiteralTuple, Schema, Value};

/// Sentinel in `value_offsets` for a NULL column.
const NULL_OFFSET: u16 = 0;

/// A tuple backed by a slot in a heap-file data page.
///
/// The tuple owns a pin on its page; the pin is released when the
/// tuple is dropped.
pub struct PageTuple {
    schema: Arc<Schema>,
    page: PinnedPage,
    slot: SlotId,
    /// Page offset of the tuple's first byte (the null bitmap).
    page_offset: u16,
    /// Resolved page offset of each column's value; `NULL_OFFSET` for
    /// NULL columns.
    value_offsets: Vec<u16>,
}

impl PageTuple {
    /// Builds a tuple handle over existing tuple bytes.
    pub fn new(
        schema: Arc<Schema>,
        page: PinnedPage,
        slot: SlotId,
        page_offset: u16,
    ) -> DbResult<Self> {
        let mut tuple = Self {
            schema,
            page,
            slot,
            page_offset,
            value_offsets: Vec::new(),
        };
        tuple.compute_value_offsets()?;
        Ok(tuple)
    }

    /// Storage bytes needed for a tuple with the given values.
    #[must_use]
    pub fn storage_size(schema: &Schema, values: &[Value]) -> usize {
        let bitmap = (schema.num_columns() + 7) / 8;
        bitmap + values.iter().map(Value::storage_size).sum::<usize>()
    }

    /// Writes a new tuple's bytes into space already allocated at
    /// `page_offset`, and returns a handle to it.
    pub fn store_new_tuple(
        schema: Arc<Schema>,
        page: PinnedPage,
        slot: SlotId,
        page_offset: u16,
        values: &[Value],
    ) -> DbResult<Self> {
        if values.len() != schema.num_columns() {
            return Err(DbError::illegal_state(format!(
                "tuple has {} values for a {}-column schema",
                values.len(),
                schema.num_columns()
            )));
        }
        for (i, value) in values.iter().enumerate() {
            if !value.matches_type(&schema.column(i).col_type) {
                return Err(DbError::illegal_state(format!(
                    "value {} does not fit column {} ({})",
                    value,
                    schema.column(i).name,
                    schema.column(i).col_type
                )));
            }
        }

        let bitmap_len = (schema.num_columns() + 7) / 8;
        let mut bitmap = vec![0u8; bitmap_len];
        for (i, value) in values.iter().enumerate() {
            if value.is_null() {
                bitmap[i / 8] |= 1 << (i % 8);
            }
        }
        page.write_bytes(page_offset as usize, &bitmap);

        let mut pos = page_offset as usize + bitmap_len;
        for value in values {
            let bytes = value.to_storage_bytes();
            page.write_bytes(pos, &bytes);
            pos += bytes.len();
        }

        Self::new(schema, page, slot, page_offset)
    }

    /// Returns the tuple's schema.
    #[must_use]
    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    /// Returns the page backing this tuple.
    #[must_use]
    pub fn page(&self) -> &PinnedPage {
        &self.page
    }

    /// Returns the tuple's slot index.
    #[must_use]
    pub fn slot(&self) -> SlotId {
        self.slot
    }

    /// Returns a pointer to this tuple's slot, usable with
    /// `HeapFile::get_tuple`.
    #[must_use]
    pub fn file_pointer(&self) -> FilePointer {
        FilePointer::new(
            self.page.page_no() as u16,
            data_page::slot_entry_offset(self.slot) as u16,
        )
    }

    /// Returns true if column `index` is NULL.
    #[must_use]
    pub fn is_null(&self, index: usize) -> bool {
        self.value_offsets[index] == NULL_OFFSET
    }

    /// Reads the value of column `index`.
    pub fn get_column(&self, index: usize) -> DbResult<Value> {
        let offset = self.value_offsets[index] as usize;
        if offset == NULL_OFFSET as usize {
            return Ok(Value::Null);
        }
        let value = match self.schema.column(index).col_type {
            ColumnType::Integer => Value::Integer(self.page.read_i32(offset)),
            ColumnType::BigInt => Value::BigInt(self.page.read_i64(offset)),
            ColumnType::Double => Value::Double(self.page.read_f64(offset)),
            ColumnType::Varchar { .. } => Value::Varchar(self.page.read_varstring65535(offset)?),
        };
        Ok(value)
    }

    /// Overwrites column `index` with `value`, resizing the tuple's
    /// bytes within the page as needed.
    ///
    /// Fails with `PageFullOnUpdate` if a size increase does not fit in
    /// the page; the tuple is left unchanged in that case.  Tuple
    /// relocation is never attempted.
    pub fn set_column(&mut self, index: usize, value: &Value) -> DbResult<()> {
        let col = self.schema.column(index);
        if !value.matches_type(&col.col_type) {
            return Err(DbError::illegal_state(format!(
                "value {} does not fit column {} ({})",
                value, col.name, col.col_type
            )));
        }

        let old_offset = self.value_offsets[index] as usize;
        let old_null = old_offset == NULL_OFFSET as usize;
        let old_size = if old_null {
            0
        } else {
            self.stored_value_size(index, old_offset)
        };
        let new_size = value.storage_size();

        if old_null && value.is_null() {
            return Ok(());
        }

        // Same-size overwrite needs no byte shuffling.
        if !old_null && !value.is_null() && old_size == new_size {
            self.page.write_bytes(old_offset, &value.to_storage_bytes());
            return Ok(());
        }

        if new_size > old_size {
            let needed = new_size - old_size;
            let available = data_page::free_space(&self.page);
            if available < needed {
                return Err(DbError::PageFullOnUpdate {
                    page_no: self.page.page_no(),
                    needed,
                    available,
                });
            }
        }

        // Drop the old bytes, marking the column NULL while it has no
        // storage.  The null bit must be set before the shift, while
        // the bitmap is still at its current position.
        if !old_null {
            let bitmap_byte = self.page_offset as usize + index / 8;
            let bits = self.page.read_u8(bitmap_byte);
            self.page.write_u8(bitmap_byte, bits | (1 << (index % 8)));

            data_page::delete_tuple_data_range(&self.page, old_offset, old_size);
            self.page_offset = data_page::slot_value(&self.page, self.slot);
            self.compute_value_offsets()?;
        }

        if !value.is_null() {
            // Open a gap ending where this column's data belongs: just
            // past the last non-NULL value before it.
            let insert_at = self.value_insert_position(index);
            data_page::insert_tuple_data_range(&self.page, insert_at, new_size);
            self.page_offset = data_page::slot_value(&self.page, self.slot);

            let bitmap_byte = self.page_offset as usize + index / 8;
            let bits = self.page.read_u8(bitmap_byte);
            self.page.write_u8(bitmap_byte, bits & !(1 << (index % 8)));
            self.page
                .write_bytes(insert_at - new_size, &value.to_storage_bytes());
        }

        self.compute_value_offsets()?;
        data_page::sanity_check(&self.page);
        Ok(())
    }

    /// Walks the tuple's bytes and records each column's value offset.
    fn compute_value_offsets(&mut self) -> DbResult<()> {
        let num_columns = self.schema.num_columns();
        let bitmap_len = (num_columns + 7) / 8;
        let start = self.page_offset as usize;

        self.value_offsets.clear();
        let mut pos = start + bitmap_len;
        for index in 0..num_columns {
            let null = self.page.read_u8(start + index / 8) & (1 << (index % 8)) != 0;
            if null {
                self.value_offsets.push(NULL_OFFSET);
            } else {
                self.value_offsets.push(pos as u16);
                pos += self.stored_value_size(index, pos);
            }
        }
        Ok(())
    }

    /// Size of the stored (non-NULL) value of column `index` at
    /// `offset`.
    fn stored_value_size(&self, index: usize, offset: usize) -> usize {
        match self.schema.column(index).col_type {
            ColumnType::Integer => 4,
            ColumnType::BigInt | ColumnType::Double => 8,
            ColumnType::Varchar { .. } => 2 + self.page.read_u16(offset) as usize,
        }
    }

    /// Page position just past where column `index`'s value belongs:
    /// the end of the last non-NULL column before it, or the end of the
    /// bitmap when every earlier column is NULL.
    fn value_insert_position(&self, index: usize) -> usize {
        let bitmap_len = (self.schema.num_columns() + 7) / 8;
        let mut pos = self.page_offset as usize + bitmap_len;
        for earlier in 0..index {
            let offset = self.value_offsets[earlier] as usize;
            if offset != NULL_OFFSET as usize {
                pos = offset + self.stored_value_size(earlier, offset);
            }
        }
        pos
    }
}

impl std::fmt::Debug for PageTuple {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageTuple")
            .field("file", &self.page.file().file_name())
            .field("page_no", &self.page.page_no())
            .field("slot", &self.slot)
            .field("page_offset", &self.page_offset)
            .finish()
    }
}

/// A tuple, page-backed or literal.
///
/// The two variants share the capability set the rest of the system
/// relies on: read a column by index, report the column count, and
/// (for page-backed tuples) report the backing file pointer.
#[derive(Debug)]
pub enum Tuple {
    /// A tuple stored in a heap-file page.
    Page(PageTuple),
    /// An in-memory tuple.
    Literal(LiteralTuple),
}

impl Tuple {
    /// Number of columns.
    #[must_use]
    pub fn num_columns(&self) -> usize {
        match self {
            Self::Page(t) => t.schema().num_columns(),
            Self::Literal(t) => t.num_columns(),
        }
    }

    /// Reads the value of column `index`.
    pub fn value(&self, index: usize) -> DbResult<Value> {
        match self {
            Self::Page(t) => t.get_column(index),
            Self::Literal(t) => Ok(t.value(index).clone()),
        }
    }

    /// Returns the backing file pointer, for page-backed tuples.
    #[must_use]
    pub fn file_pointer(&self) -> Option<FilePointer> {
        match self {
            Self::Page(t) => Some(t.file_pointer()),
            Self::Literal(_) => None,
        }
    }
}

impl From<LiteralTuple> for Tuple {
    fn from(tuple: LiteralTuple) -> Self {
        Self::Literal(tuple)
    }
}

impl From<PageTuple> for Tuple {
    fn from(tuple: PageTuple) -> Self {
        Self::Page(tuple)
    }
}
