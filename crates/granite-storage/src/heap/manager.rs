//! Creation, opening, and metadata persistence of heap files.
//!
//! The header page stores the serialized schema and table statistics;
//! this module owns those byte formats.

use std::sync::Arc;

use tracing::{debug, info};

use granite_common::{DbError, DbResult, TransactionState};

use super::{header_page, HeapFile, PageWriteLogger};
use crate::buffer::BufferManager;
use crate::file::{DbFileType, FileManager};
use crate::relations::{ColumnInfo, ColumnStats, ColumnType, Schema, TableStats, Value};

/// Creates and opens [`HeapFile`]s and persists their metadata.
pub struct HeapFileManager {
    file_manager: Arc<FileManager>,
    buffer: Arc<BufferManager>,
    logger: Arc<dyn PageWriteLogger>,
    page_size: usize,
}

impl HeapFileManager {
    /// Creates a heap file manager.  `page_size` applies to files
    /// created through this manager.
    pub fn new(
        file_manager: Arc<FileManager>,
        buffer: Arc<BufferManager>,
        logger: Arc<dyn PageWriteLogger>,
        page_size: usize,
    ) -> Self {
        Self {
            file_manager,
            buffer,
            logger,
            page_size,
        }
    }

    pub(super) fn buffer(&self) -> &Arc<BufferManager> {
        &self.buffer
    }

    pub(super) fn logger(&self) -> &Arc<dyn PageWriteLogger> {
        &self.logger
    }

    /// Creates a new heap file with the given schema.
    ///
    /// The header page (schema, empty statistics, empty free list) is
    /// flushed and synced before returning, so the file is usable by
    /// recovery even if the creating process crashes immediately after.
    pub fn create_file(self: &Arc<Self>, name: &str, schema: Schema) -> DbResult<Arc<HeapFile>> {
        let stats = TableStats::unknown(schema.num_columns());
        let schema_bytes = serialize_schema(&schema);
        let stats_bytes = serialize_stats(&stats);

        if header_page::OFFSET_SCHEMA_START + schema_bytes.len() + stats_bytes.len()
            > self.page_size
        {
            return Err(DbError::illegal_state(format!(
                "schema for {} does not fit in a {}-byte header page",
                name, self.page_size
            )));
        }

        let db_file = self
            .file_manager
            .create_file(name, DbFileType::HeapTupleFile, self.page_size)?;

        let header = self
            .buffer
            .fetch_page(&db_file, 0, false)?
            .ok_or_else(|| DbError::page_not_found(name, 0))?;
        header_page::set_schema_size(&header, schema_bytes.len());
        header_page::set_stats_size(&header, stats_bytes.len());
        header_page::set_free_head(&header, 0);
        header.write_bytes(header_page::OFFSET_SCHEMA_START, &schema_bytes);
        header.write_bytes(
            header_page::OFFSET_SCHEMA_START + schema_bytes.len(),
            &stats_bytes,
        );
        drop(header);

        self.buffer.flush_file(&db_file, true)?;
        info!(file = name, columns = schema.num_columns(), "created heap file");

        Ok(Arc::new(HeapFile::new(
            Arc::clone(self),
            db_file,
            Arc::new(schema),
            stats,
        )))
    }

    /// Opens an existing heap file, or returns `None` if it does not
    /// exist.
    pub fn open_file(self: &Arc<Self>, name: &str) -> DbResult<Option<Arc<HeapFile>>> {
        let Some(db_file) = self
            .file_manager
            .open_typed(name, DbFileType::HeapTupleFile)?
        else {
            return Ok(None);
        };

        let header = self
            .buffer
            .fetch_page(&db_file, 0, false)?
            .ok_or_else(|| DbError::page_not_found(name, 0))?;

        let schema_size = header_page::schema_size(&header);
        let mut schema_bytes = vec![0u8; schema_size];
        header.read_bytes(header_page::OFFSET_SCHEMA_START, &mut schema_bytes);
        let schema = deserialize_schema(&schema_bytes)?;

        let stats_size = header_page::stats_size(&header);
        let mut stats_bytes = vec![0u8; stats_size];
        header.read_bytes(header_page::stats_offset(&header), &mut stats_bytes);
        let stats = deserialize_stats(&stats_bytes, &schema)?;
        drop(header);

        debug!(file = name, "opened heap file");
        Ok(Some(Arc::new(HeapFile::new(
            Arc::clone(self),
            db_file,
            Arc::new(schema),
            stats,
        ))))
    }

    /// Rewrites a heap file's schema and statistics in its header page
    /// and logs the change as part of the current transaction.
    pub fn save_metadata(&self, heap: &HeapFile, txn: &mut TransactionState) -> DbResult<()> {
        let stats = heap.stats();
        let schema_bytes = serialize_schema(heap.schema());
        let stats_bytes = serialize_stats(&stats);

        if header_page::OFFSET_SCHEMA_START + schema_bytes.len() + stats_bytes.len()
            > heap.db_file().page_size()
        {
            return Err(DbError::illegal_state(format!(
                "metadata for {} no longer fits in its header page",
                heap.db_file().file_name()
            )));
        }

        let header = self
            .buffer
            .fetch_page(heap.db_file(), 0, false)?
            .ok_or_else(|| DbError::page_not_found(heap.db_file().file_name(), 0))?;
        header_page::set_schema_size(&header, schema_bytes.len());
        header_page::set_stats_size(&header, stats_bytes.len());
        header.write_bytes(header_page::OFFSET_SCHEMA_START, &schema_bytes);
        header.write_bytes(
            header_page::OFFSET_SCHEMA_START + schema_bytes.len(),
            &stats_bytes,
        );

        self.logger.log_page_write(txn, &header)?;
        heap.replace_stats(stats);
        Ok(())
    }
}

impl std::fmt::Debug for HeapFileManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HeapFileManager")
            .field("page_size", &self.page_size)
            .finish()
    }
}

// =============================================================================
// Metadata byte formats
// =============================================================================

struct ByteReader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn take(&mut self, len: usize) -> DbResult<&'a [u8]> {
        if self.pos + len > self.bytes.len() {
            return Err(DbError::data_format("truncated heap-file metadata"));
        }
        let slice = &self.bytes[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    fn read_u8(&mut self) -> DbResult<u8> {
        Ok(self.take(1)?[0])
    }

    fn read_u16(&mut self) -> DbResult<u16> {
        Ok(u16::from_be_bytes(self.take(2)?.try_into().unwrap()))
    }

    fn read_u32(&mut self) -> DbResult<u32> {
        Ok(u32::from_be_bytes(self.take(4)?.try_into().unwrap()))
    }

    fn read_i64(&mut self) -> DbResult<i64> {
        Ok(i64::from_be_bytes(self.take(8)?.try_into().unwrap()))
    }

    fn read_f64_bits(&mut self) -> DbResult<f64> {
        Ok(f64::from_bits(u64::from_be_bytes(
            self.take(8)?.try_into().unwrap(),
        )))
    }

    fn read_string255(&mut self) -> DbResult<String> {
        let len = self.read_u8()? as usize;
        let bytes = self.take(len)?;
        if !bytes.is_ascii() {
            return Err(DbError::data_format("metadata string is not US-ASCII"));
        }
        Ok(String::from_utf8(bytes.to_vec()).expect("ascii is valid utf-8"))
    }
}

fn serialize_schema(schema: &Schema) -> Vec<u8> {
    let mut out = Vec::new();
    out.push(schema.num_columns() as u8);
    for col in schema.columns() {
        out.push(col.col_type.type_tag());
        if let ColumnType::Varchar { max_length } = col.col_type {
            out.extend_from_slice(&max_length.to_be_bytes());
        }
        out.push(col.name.len() as u8);
        out.extend_from_slice(col.name.as_bytes());
    }
    out
}

fn deserialize_schema(bytes: &[u8]) -> DbResult<Schema> {
    let mut reader = ByteReader::new(bytes);
    let num_columns = reader.read_u8()? as usize;
    let mut columns = Vec::with_capacity(num_columns);
    for _ in 0..num_columns {
        let tag = reader.read_u8()?;
        let col_type = match tag {
            1 => ColumnType::Integer,
            2 => ColumnType::BigInt,
            3 => ColumnType::Double,
            4 => ColumnType::Varchar {
                max_length: reader.read_u16()?,
            },
            other => {
                return Err(DbError::data_format(format!(
                    "unknown column-type tag {}",
                    other
                )))
            }
        };
        let name = reader.read_string255()?;
        columns.push(ColumnInfo::new(name, col_type));
    }
    Schema::new(columns)
}

fn serialize_value(out: &mut Vec<u8>, value: &Value) {
    match value {
        Value::Null => {}
        Value::Integer(v) => out.extend_from_slice(&v.to_be_bytes()),
        Value::BigInt(v) => out.extend_from_slice(&v.to_be_bytes()),
        Value::Double(v) => out.extend_from_slice(&v.to_bits().to_be_bytes()),
        Value::Varchar(_) => unreachable!("string min/max is never persisted"),
    }
}

fn serialize_stats(stats: &TableStats) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&stats.num_pages.to_be_bytes());
    out.extend_from_slice(&stats.num_tuples.to_be_bytes());
    out.extend_from_slice(&stats.avg_tuple_size.to_bits().to_be_bytes());
    out.push(stats.column_stats.len() as u8);
    for col in &stats.column_stats {
        match col.num_distinct {
            Some(n) => {
                out.push(1);
                out.extend_from_slice(&n.to_be_bytes());
            }
            None => out.push(0),
        }
        out.extend_from_slice(&col.num_null.to_be_bytes());
        for bound in [&col.min, &col.max] {
            match bound {
                Some(value) => {
                    out.push(1);
                    serialize_value(&mut out, value);
                }
                None => out.push(0),
            }
        }
    }
    out
}

fn deserialize_stats(bytes: &[u8], schema: &Schema) -> DbResult<TableStats> {
    let mut reader = ByteReader::new(bytes);
    let num_pages = reader.read_u32()?;
    let num_tuples = reader.read_u32()?;
    let avg_tuple_size = f32::from_bits(reader.read_u32()?);
    let num_columns = reader.read_u8()? as usize;
    if num_columns != schema.num_columns() {
        return Err(DbError::data_format(
            "statistics column count does not match the schema",
        ));
    }

    let mut column_stats = Vec::with_capacity(num_columns);
    for index in 0..num_columns {
        let num_distinct = if reader.read_u8()? == 1 {
            Some(reader.read_u32()?)
        } else {
            None
        };
        let num_null = reader.read_u32()?;

        let read_bound = |reader: &mut ByteReader<'_>| -> DbResult<Option<Value>> {
            if reader.read_u8()? != 1 {
                return Ok(None);
            }
            let value = match schema.column(index).col_type {
                ColumnType::Integer => Value::Integer(reader.read_u32()? as i32),
                ColumnType::BigInt => Value::BigInt(reader.read_i64()?),
                ColumnType::Double => Value::Double(reader.read_f64_bits()?),
                ColumnType::Varchar { .. } => {
                    return Err(DbError::data_format(
                        "string column has a persisted min/max",
                    ))
                }
            };
            Ok(Some(value))
        };
        let min = read_bound(&mut reader)?;
        let max = read_bound(&mut reader)?;

        column_stats.push(ColumnStats {
            num_distinct,
            num_null,
            min,
            max,
        });
    }

    Ok(TableStats {
        num_pages,
        num_tuples,
        avg_tuple_size,
        column_stats,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_schema() -> Schema {
        Schema::new(vec![
            ColumnInfo::new("id", ColumnType::Integer),
            ColumnInfo::new("total", ColumnType::BigInt),
            ColumnInfo::new("ratio", ColumnType::Double),
            ColumnInfo::new("name", ColumnType::Varchar { max_length: 64 }),
        ])
        .unwrap()
    }

    #[test]
    fn test_schema_round_trip() {
        let schema = sample_schema();
        let bytes = serialize_schema(&schema);
        let back = deserialize_schema(&bytes).unwrap();

        assert_eq!(back.num_columns(), 4);
        assert_eq!(back.column(0).name, "id");
        assert_eq!(back.column(3).col_type, ColumnType::Varchar { max_length: 64 });
    }

    #[test]
    fn test_stats_round_trip() {
        let schema = sample_schema();
        let stats = TableStats {
            num_pages: 3,
            num_tuples: 120,
            avg_tuple_size: 27.5,
            column_stats: vec![
                ColumnStats {
                    num_distinct: Some(120),
                    num_null: 0,
                    min: Some(Value::Integer(1)),
                    max: Some(Value::Integer(120)),
                },
                ColumnStats {
                    num_distinct: Some(5),
                    num_null: 2,
                    min: Some(Value::BigInt(-10)),
                    max: Some(Value::BigInt(99)),
                },
                ColumnStats {
                    num_distinct: Some(7),
                    num_null: 0,
                    min: Some(Value::Double(0.25)),
                    max: Some(Value::Double(88.0)),
                },
                ColumnStats {
                    num_distinct: Some(100),
                    num_null: 20,
                    min: None,
                    max: None,
                },
            ],
        };

        let bytes = serialize_stats(&stats);
        let back = deserialize_stats(&bytes, &schema).unwrap();
        assert_eq!(back, stats);
    }

    #[test]
    fn test_unknown_stats_round_trip() {
        let schema = sample_schema();
        let stats = TableStats::unknown(4);
        let bytes = serialize_stats(&stats);
        let back = deserialize_stats(&bytes, &schema).unwrap();
        assert_eq!(back, stats);
    }

    #[test]
    fn test_truncated_metadata_is_rejected() {
        let schema = sample_schema();
        let bytes = serialize_schema(&schema);
        assert!(deserialize_schema(&bytes[..bytes.len() - 2]).is_err());

        let stats_bytes = serialize_stats(&TableStats::unknown(4));
        assert!(deserialize_stats(&stats_bytes[..3], &schema).is_err());
    }
}
