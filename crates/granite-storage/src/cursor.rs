//! Sequential cursors over paged files.
//!
//! A [`FileCursor`] presents a [`DbFile`] as a single byte stream,
//! hiding the page structure.  Exactly one page is pinned at a time;
//! moving into the next page releases the previous one, and dropping
//! the cursor releases the last.  Multi-byte primitives that straddle a
//! page boundary are split across the two pages through a small staging
//! buffer.
//!
//! The two constructor modes differ in how they treat the end of the
//! file: a reader fails when positioned past the last page, while an
//! appender extends the file with fresh zeroed pages.

use std::sync::Arc;

use granite_common::{DbError, DbResult};

use crate::buffer::BufferManager;
use crate::file::DbFile;
use crate::page::PinnedPage;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CursorMode {
    ReadOnly,
    Extend,
}

/// A sequential reader/writer over a paged file.
pub struct FileCursor {
    file: Arc<DbFile>,
    buffer: Arc<BufferManager>,
    mode: CursorMode,
    position: u64,
    current: Option<(u32, PinnedPage)>,
}

impl FileCursor {
    /// Creates a read-only cursor positioned at offset 0.
    #[must_use]
    pub fn reader(file: Arc<DbFile>, buffer: Arc<BufferManager>) -> Self {
        Self {
            file,
            buffer,
            mode: CursorMode::ReadOnly,
            position: 0,
            current: None,
        }
    }

    /// Creates a writing cursor positioned at offset 0 that extends the
    /// file when it moves past the last page.
    #[must_use]
    pub fn appender(file: Arc<DbFile>, buffer: Arc<BufferManager>) -> Self {
        Self {
            file,
            buffer,
            mode: CursorMode::Extend,
            position: 0,
            current: None,
        }
    }

    /// Returns the file this cursor traverses.
    #[must_use]
    pub fn file(&self) -> &Arc<DbFile> {
        &self.file
    }

    /// Returns the current byte position.
    #[inline]
    #[must_use]
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Moves to an absolute byte position.
    pub fn set_position(&mut self, position: u64) {
        self.position = position;
    }

    /// Moves the position by a signed delta.
    pub fn move_position(&mut self, delta: i64) {
        self.position = self.position.checked_add_signed(delta).expect("position underflow");
    }

    #[inline]
    fn page_size(&self) -> usize {
        self.file.page_size()
    }

    #[inline]
    fn page_offset(&self) -> usize {
        (self.position % self.page_size() as u64) as usize
    }

    /// Pins the page containing the current position, releasing the
    /// previously pinned page if the position has moved off it.
    fn current_page(&mut self) -> DbResult<&PinnedPage> {
        let page_no = (self.position / self.page_size() as u64) as u32;

        let stale = match &self.current {
            Some((cached_no, _)) => *cached_no != page_no,
            None => true,
        };
        if stale {
            // Release before fetching so at most one page is pinned.
            self.current = None;
            let create = self.mode == CursorMode::Extend;
            let page = self
                .buffer
                .fetch_page(&self.file, page_no, create)?
                .ok_or_else(|| DbError::page_not_found(self.file.file_name(), page_no))?;
            self.current = Some((page_no, page));
        }

        Ok(&self.current.as_ref().expect("page just ensured").1)
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Reads exactly `buf.len()` bytes, crossing pages as needed.
    pub fn read_exact(&mut self, buf: &mut [u8]) -> DbResult<()> {
        let page_size = self.page_size();
        let mut filled = 0;
        while filled < buf.len() {
            let page_offset = self.page_offset();
            let chunk = (page_size - page_offset).min(buf.len() - filled);
            let page = self.current_page()?;
            page.read_bytes(page_offset, &mut buf[filled..filled + chunk]);
            filled += chunk;
            self.position += chunk as u64;
        }
        Ok(())
    }

    /// Reads one byte.
    pub fn read_u8(&mut self) -> DbResult<u8> {
        let page_offset = self.page_offset();
        let value = self.current_page()?.read_u8(page_offset);
        self.position += 1;
        Ok(value)
    }

    /// Reads a boolean.
    pub fn read_bool(&mut self) -> DbResult<bool> {
        Ok(self.read_u8()? != 0)
    }

    /// Reads an unsigned 16-bit integer.
    pub fn read_u16(&mut self) -> DbResult<u16> {
        let mut buf = [0u8; 2];
        self.read_exact(&mut buf)?;
        Ok(u16::from_be_bytes(buf))
    }

    /// Reads a signed 16-bit integer.
    pub fn read_i16(&mut self) -> DbResult<i16> {
        Ok(self.read_u16()? as i16)
    }

    /// Reads an unsigned 32-bit integer.
    pub fn read_u32(&mut self) -> DbResult<u32> {
        let mut buf = [0u8; 4];
        self.read_exact(&mut buf)?;
        Ok(u32::from_be_bytes(buf))
    }

    /// Reads a signed 32-bit integer.
    pub fn read_i32(&mut self) -> DbResult<i32> {
        Ok(self.read_u32()? as i32)
    }

    /// Reads an unsigned 64-bit integer.
    pub fn read_u64(&mut self) -> DbResult<u64> {
        let mut buf = [0u8; 8];
        self.read_exact(&mut buf)?;
        Ok(u64::from_be_bytes(buf))
    }

    /// Reads a signed 64-bit integer.
    pub fn read_i64(&mut self) -> DbResult<i64> {
        Ok(self.read_u64()? as i64)
    }

    /// Reads a 32-bit float.
    pub fn read_f32(&mut self) -> DbResult<f32> {
        Ok(f32::from_bits(self.read_u32()?))
    }

    /// Reads a 64-bit float.
    pub fn read_f64(&mut self) -> DbResult<f64> {
        Ok(f64::from_bits(self.read_u64()?))
    }

    /// Reads a string with a one-byte length prefix.
    pub fn read_varstring255(&mut self) -> DbResult<String> {
        let len = self.read_u8()? as usize;
        let mut buf = vec![0u8; len];
        self.read_exact(&mut buf)?;
        if !buf.is_ascii() {
            return Err(DbError::data_format("stored string is not US-ASCII"));
        }
        Ok(String::from_utf8(buf).expect("ascii is valid utf-8"))
    }

    /// Reads a string with a two-byte length prefix.
    pub fn read_varstring65535(&mut self) -> DbResult<String> {
        let len = self.read_u16()? as usize;
        let mut buf = vec![0u8; len];
        self.read_exact(&mut buf)?;
        if !buf.is_ascii() {
            return Err(DbError::data_format("stored string is not US-ASCII"));
        }
        Ok(String::from_utf8(buf).expect("ascii is valid utf-8"))
    }

    // =========================================================================
    // Writes
    // =========================================================================

    fn check_writable(&self) -> DbResult<()> {
        if self.mode != CursorMode::Extend {
            return Err(DbError::illegal_state(
                "write through a read-only file cursor",
            ));
        }
        Ok(())
    }

    /// Writes all of `bytes`, crossing pages as needed.
    pub fn write_bytes(&mut self, bytes: &[u8]) -> DbResult<()> {
        self.check_writable()?;
        let page_size = self.page_size();
        let mut written = 0;
        while written < bytes.len() {
            let page_offset = self.page_offset();
            let chunk = (page_size - page_offset).min(bytes.len() - written);
            let page = self.current_page()?;
            page.write_bytes(page_offset, &bytes[written..written + chunk]);
            written += chunk;
            self.position += chunk as u64;
        }
        Ok(())
    }

    /// Writes one byte.
    pub fn write_u8(&mut self, value: u8) -> DbResult<()> {
        self.write_bytes(&[value])
    }

    /// Writes a boolean as one byte.
    pub fn write_bool(&mut self, value: bool) -> DbResult<()> {
        self.write_u8(u8::from(value))
    }

    /// Writes an unsigned 16-bit integer.
    pub fn write_u16(&mut self, value: u16) -> DbResult<()> {
        self.write_bytes(&value.to_be_bytes())
    }

    /// Writes a signed 16-bit integer.
    pub fn write_i16(&mut self, value: i16) -> DbResult<()> {
        self.write_u16(value as u16)
    }

    /// Writes an unsigned 32-bit integer.
    pub fn write_u32(&mut self, value: u32) -> DbResult<()> {
        self.write_bytes(&value.to_be_bytes())
    }

    /// Writes a signed 32-bit integer.
    pub fn write_i32(&mut self, value: i32) -> DbResult<()> {
        self.write_u32(value as u32)
    }

    /// Writes an unsigned 64-bit integer.
    pub fn write_u64(&mut self, value: u64) -> DbResult<()> {
        self.write_bytes(&value.to_be_bytes())
    }

    /// Writes a signed 64-bit integer.
    pub fn write_i64(&mut self, value: i64) -> DbResult<()> {
        self.write_u64(value as u64)
    }

    /// Writes a 32-bit float.
    pub fn write_f32(&mut self, value: f32) -> DbResult<()> {
        self.write_u32(value.to_bits())
    }

    /// Writes a 64-bit float.
    pub fn write_f64(&mut self, value: f64) -> DbResult<()> {
        self.write_u64(value.to_bits())
    }

    /// Writes a string with a one-byte length prefix (US-ASCII, at
    /// most 255 bytes).
    pub fn write_varstring255(&mut self, value: &str) -> DbResult<()> {
        if !value.is_ascii() || value.len() > 255 {
            return Err(DbError::illegal_state(
                "varstring255 must be US-ASCII and at most 255 bytes",
            ));
        }
        self.write_u8(value.len() as u8)?;
        self.write_bytes(value.as_bytes())
    }

    /// Writes a string with a two-byte length prefix (US-ASCII, at
    /// most 65535 bytes).
    pub fn write_varstring65535(&mut self, value: &str) -> DbResult<()> {
        if !value.is_ascii() || value.len() > 65_535 {
            return Err(DbError::illegal_state(
                "varstring65535 must be US-ASCII and at most 65535 bytes",
            ));
        }
        self.write_u16(value.len() as u16)?;
        self.write_bytes(value.as_bytes())
    }
}

impl std::fmt::Debug for FileCursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileCursor")
            .field("file", &self.file.file_name())
            .field("mode", &self.mode)
            .field("position", &self.position)
            .finish()
    }
}
