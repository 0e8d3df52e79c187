//! In-memory page images with pin, dirty, and LSN bookkeeping.
//!
//! A [`DbPage`] is the unit of caching: one block of its file, plus the
//! metadata the WAL rule depends on.  Alongside the current `data`
//! image the page keeps `old_data`, the image as of the last WAL record
//! describing this page; the WAL manager diffs the two to build
//! physical update records and then resynchronizes them.
//!
//! Pages are shared as `Arc<DbPage>` and protected from eviction by a
//! pin count.  Code outside the buffer manager only ever holds a
//! [`PinnedPage`], an RAII guard that owns one pin and releases it on
//! drop.

use std::ops::Deref;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use granite_common::{DbError, DbResult, Lsn};

use crate::file::DbFile;

struct PageState {
    data: Box<[u8]>,
    old_data: Box<[u8]>,
    dirty: bool,
    page_lsn: Option<Lsn>,
}

/// An in-memory image of one page of a [`DbFile`].
///
/// All typed accessors use big-endian byte order.  The first write to a
/// clean page marks it dirty; `old_data` already equals the last image
/// synchronized with the WAL at that point, so no snapshot is needed.
pub struct DbPage {
    file: Arc<DbFile>,
    page_no: u32,
    pin_count: AtomicU32,
    state: RwLock<PageState>,
}

impl DbPage {
    pub(crate) fn new(file: Arc<DbFile>, page_no: u32, data: Box<[u8]>) -> Self {
        let old_data = data.clone();
        Self {
            file,
            page_no,
            pin_count: AtomicU32::new(0),
            state: RwLock::new(PageState {
                data,
                old_data,
                dirty: false,
                page_lsn: None,
            }),
        }
    }

    /// Returns the file this page belongs to.
    #[inline]
    #[must_use]
    pub fn file(&self) -> &Arc<DbFile> {
        &self.file
    }

    /// Returns this page's page number.
    #[inline]
    #[must_use]
    pub fn page_no(&self) -> u32 {
        self.page_no
    }

    /// Returns the page size in bytes.
    #[inline]
    #[must_use]
    pub fn page_size(&self) -> usize {
        self.file.page_size()
    }

    /// Returns the current pin count.
    #[inline]
    #[must_use]
    pub fn pin_count(&self) -> u32 {
        self.pin_count.load(Ordering::Acquire)
    }

    fn pin(&self) {
        self.pin_count.fetch_add(1, Ordering::AcqRel);
    }

    fn unpin(&self) {
        let prev = self.pin_count.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(prev > 0, "unpin of a page with pin count 0");
    }

    /// Returns true if the page has been modified since its last flush.
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.state.read().dirty
    }

    /// Clears the dirty flag after the page has been written to disk.
    /// `old_data` is untouched; it tracks the WAL, not the disk.
    pub fn mark_clean(&self) {
        self.state.write().dirty = false;
    }

    /// Returns the LSN of the most recent WAL record describing this
    /// page, if any.
    #[must_use]
    pub fn page_lsn(&self) -> Option<Lsn> {
        self.state.read().page_lsn
    }

    /// Records the LSN of the WAL record that now describes this page.
    pub fn set_page_lsn(&self, lsn: Lsn) {
        self.state.write().page_lsn = Some(lsn);
    }

    /// Resynchronizes `old_data` with `data` after the page's changes
    /// have been captured in a WAL record.
    pub fn sync_old_data(&self) {
        let mut state = self.state.write();
        let PageState { data, old_data, .. } = &mut *state;
        old_data.copy_from_slice(data);
    }

    /// Calls `f` with the page's current data.
    pub fn with_data<R>(&self, f: impl FnOnce(&[u8]) -> R) -> R {
        f(&self.state.read().data)
    }

    /// Calls `f` with the page's pre-image and current data.
    pub fn with_images<R>(&self, f: impl FnOnce(&[u8], &[u8]) -> R) -> R {
        let state = self.state.read();
        f(&state.old_data, &state.data)
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Reads `buf.len()` bytes starting at `offset`.
    pub fn read_bytes(&self, offset: usize, buf: &mut [u8]) {
        let state = self.state.read();
        buf.copy_from_slice(&state.data[offset..offset + buf.len()]);
    }

    /// Reads one byte.
    #[must_use]
    pub fn read_u8(&self, offset: usize) -> u8 {
        self.state.read().data[offset]
    }

    /// Reads a boolean (any nonzero byte is true).
    #[must_use]
    pub fn read_bool(&self, offset: usize) -> bool {
        self.read_u8(offset) != 0
    }

    /// Reads an unsigned 16-bit integer.
    #[must_use]
    pub fn read_u16(&self, offset: usize) -> u16 {
        let mut buf = [0u8; 2];
        self.read_bytes(offset, &mut buf);
        u16::from_be_bytes(buf)
    }

    /// Reads a signed 16-bit integer.
    #[must_use]
    pub fn read_i16(&self, offset: usize) -> i16 {
        self.read_u16(offset) as i16
    }

    /// Reads an unsigned 32-bit integer.
    #[must_use]
    pub fn read_u32(&self, offset: usize) -> u32 {
        let mut buf = [0u8; 4];
        self.read_bytes(offset, &mut buf);
        u32::from_be_bytes(buf)
    }

    /// Reads a signed 32-bit integer.
    #[must_use]
    pub fn read_i32(&self, offset: usize) -> i32 {
        self.read_u32(offset) as i32
    }

    /// Reads an unsigned 64-bit integer.
    #[must_use]
    pub fn read_u64(&self, offset: usize) -> u64 {
        let mut buf = [0u8; 8];
        self.read_bytes(offset, &mut buf);
        u64::from_be_bytes(buf)
    }

    /// Reads a signed 64-bit integer.
    #[must_use]
    pub fn read_i64(&self, offset: usize) -> i64 {
        self.read_u64(offset) as i64
    }

    /// Reads a 32-bit float.
    #[must_use]
    pub fn read_f32(&self, offset: usize) -> f32 {
        f32::from_bits(self.read_u32(offset))
    }

    /// Reads a 64-bit float.
    #[must_use]
    pub fn read_f64(&self, offset: usize) -> f64 {
        f64::from_bits(self.read_u64(offset))
    }

    /// Reads a string with a one-byte length prefix (US-ASCII, at most
    /// 255 bytes).
    pub fn read_varstring255(&self, offset: usize) -> DbResult<String> {
        let len = self.read_u8(offset) as usize;
        let mut buf = vec![0u8; len];
        self.read_bytes(offset + 1, &mut buf);
        bytes_to_ascii(buf)
    }

    /// Reads a string with a two-byte length prefix (US-ASCII, at most
    /// 65535 bytes).
    pub fn read_varstring65535(&self, offset: usize) -> DbResult<String> {
        let len = self.read_u16(offset) as usize;
        let mut buf = vec![0u8; len];
        self.read_bytes(offset + 2, &mut buf);
        bytes_to_ascii(buf)
    }

    // =========================================================================
    // Writes
    // =========================================================================

    /// Writes `bytes` starting at `offset`, marking the page dirty.
    pub fn write_bytes(&self, offset: usize, bytes: &[u8]) {
        let mut state = self.state.write();
        state.dirty = true;
        state.data[offset..offset + bytes.len()].copy_from_slice(bytes);
    }

    /// Writes one byte.
    pub fn write_u8(&self, offset: usize, value: u8) {
        self.write_bytes(offset, &[value]);
    }

    /// Writes a boolean as one byte.
    pub fn write_bool(&self, offset: usize, value: bool) {
        self.write_u8(offset, u8::from(value));
    }

    /// Writes an unsigned 16-bit integer.
    pub fn write_u16(&self, offset: usize, value: u16) {
        self.write_bytes(offset, &value.to_be_bytes());
    }

    /// Writes a signed 16-bit integer.
    pub fn write_i16(&self, offset: usize, value: i16) {
        self.write_u16(offset, value as u16);
    }

    /// Writes an unsigned 32-bit integer.
    pub fn write_u32(&self, offset: usize, value: u32) {
        self.write_bytes(offset, &value.to_be_bytes());
    }

    /// Writes a signed 32-bit integer.
    pub fn write_i32(&self, offset: usize, value: i32) {
        self.write_u32(offset, value as u32);
    }

    /// Writes an unsigned 64-bit integer.
    pub fn write_u64(&self, offset: usize, value: u64) {
        self.write_bytes(offset, &value.to_be_bytes());
    }

    /// Writes a signed 64-bit integer.
    pub fn write_i64(&self, offset: usize, value: i64) {
        self.write_u64(offset, value as u64);
    }

    /// Writes a 32-bit float.
    pub fn write_f32(&self, offset: usize, value: f32) {
        self.write_u32(offset, value.to_bits());
    }

    /// Writes a 64-bit float.
    pub fn write_f64(&self, offset: usize, value: f64) {
        self.write_u64(offset, value.to_bits());
    }

    /// Writes a string with a one-byte length prefix.  Returns the
    /// total number of bytes written.
    pub fn write_varstring255(&self, offset: usize, value: &str) -> DbResult<usize> {
        let bytes = ascii_bytes(value, 255)?;
        self.write_u8(offset, bytes.len() as u8);
        self.write_bytes(offset + 1, bytes);
        Ok(1 + bytes.len())
    }

    /// Writes a string with a two-byte length prefix.  Returns the
    /// total number of bytes written.
    pub fn write_varstring65535(&self, offset: usize, value: &str) -> DbResult<usize> {
        let bytes = ascii_bytes(value, 65_535)?;
        self.write_u16(offset, bytes.len() as u16);
        self.write_bytes(offset + 2, bytes);
        Ok(2 + bytes.len())
    }

    /// Moves the bytes in `src` to start at `dest`, as by
    /// `copy_within`.  Marks the page dirty.
    pub fn copy_within(&self, src: std::ops::Range<usize>, dest: usize) {
        let mut state = self.state.write();
        state.dirty = true;
        state.data.copy_within(src, dest);
    }
}

impl std::fmt::Debug for DbPage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DbPage")
            .field("file", &self.file.file_name())
            .field("page_no", &self.page_no)
            .field("pin_count", &self.pin_count())
            .field("dirty", &self.is_dirty())
            .field("page_lsn", &self.page_lsn())
            .finish()
    }
}

fn ascii_bytes(value: &str, max_len: usize) -> DbResult<&[u8]> {
    if !value.is_ascii() {
        return Err(DbError::illegal_state(format!(
            "string {:?} is not US-ASCII",
            value
        )));
    }
    if value.len() > max_len {
        return Err(DbError::illegal_state(format!(
            "string of {} bytes exceeds the {}-byte limit",
            value.len(),
            max_len
        )));
    }
    Ok(value.as_bytes())
}

fn bytes_to_ascii(buf: Vec<u8>) -> DbResult<String> {
    if !buf.is_ascii() {
        return Err(DbError::data_format("stored string is not US-ASCII"));
    }
    // Safe: just verified ASCII.
    Ok(String::from_utf8(buf).expect("ascii is valid utf-8"))
}

/// An RAII pin on a cached page.
///
/// Holding a `PinnedPage` guarantees the page will not be evicted.
/// Cloning takes an additional pin; dropping releases one.  Every pin
/// acquired through the buffer manager is released this way on all exit
/// paths, including errors.
pub struct PinnedPage {
    page: Arc<DbPage>,
}

impl PinnedPage {
    pub(crate) fn new(page: Arc<DbPage>) -> Self {
        page.pin();
        Self { page }
    }
}

impl Clone for PinnedPage {
    fn clone(&self) -> Self {
        Self::new(Arc::clone(&self.page))
    }
}

impl Deref for PinnedPage {
    type Target = DbPage;

    #[inline]
    fn deref(&self) -> &DbPage {
        &self.page
    }
}

impl Drop for PinnedPage {
    fn drop(&mut self) {
        self.page.unpin();
    }
}

impl std::fmt::Debug for PinnedPage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.page.fmt(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file::{DbFileType, FileManager};
    use tempfile::TempDir;

    fn test_page() -> (TempDir, DbPage) {
        let tmp = TempDir::new().unwrap();
        let fm = FileManager::new(tmp.path()).unwrap();
        let file = fm
            .create_file("p.tbl", DbFileType::HeapTupleFile, 1024)
            .unwrap();
        let page = DbPage::new(file, 1, vec![0u8; 1024].into_boxed_slice());
        (tmp, page)
    }

    #[test]
    fn test_scalar_round_trips() {
        let (_tmp, page) = test_page();

        page.write_u8(0, 0xFE);
        page.write_bool(1, true);
        page.write_u16(2, 0xBEEF);
        page.write_i16(4, -12345);
        page.write_u32(6, 0xDEADBEEF);
        page.write_i32(10, -7);
        page.write_u64(14, u64::MAX - 3);
        page.write_i64(22, i64::MIN + 1);
        page.write_f32(30, 3.5);
        page.write_f64(34, -2.25e100);

        assert_eq!(page.read_u8(0), 0xFE);
        assert!(page.read_bool(1));
        assert_eq!(page.read_u16(2), 0xBEEF);
        assert_eq!(page.read_i16(4), -12345);
        assert_eq!(page.read_u32(6), 0xDEADBEEF);
        assert_eq!(page.read_i32(10), -7);
        assert_eq!(page.read_u64(14), u64::MAX - 3);
        assert_eq!(page.read_i64(22), i64::MIN + 1);
        assert_eq!(page.read_f32(30), 3.5);
        assert_eq!(page.read_f64(34), -2.25e100);
    }

    #[test]
    fn test_big_endian_layout() {
        let (_tmp, page) = test_page();
        page.write_u32(0, 0x01020304);
        assert_eq!(page.read_u8(0), 0x01);
        assert_eq!(page.read_u8(3), 0x04);
    }

    #[test]
    fn test_varstrings() {
        let (_tmp, page) = test_page();

        let n = page.write_varstring255(10, "hello").unwrap();
        assert_eq!(n, 6);
        assert_eq!(page.read_varstring255(10).unwrap(), "hello");

        let n = page.write_varstring65535(100, "").unwrap();
        assert_eq!(n, 2);
        assert_eq!(page.read_varstring65535(100).unwrap(), "");

        assert!(page.write_varstring255(10, "héllo").is_err());
        let long = "x".repeat(256);
        assert!(page.write_varstring255(10, &long).is_err());
    }

    #[test]
    fn test_dirty_and_old_data() {
        let (_tmp, page) = test_page();
        assert!(!page.is_dirty());

        page.write_u8(5, 42);
        assert!(page.is_dirty());
        page.with_images(|old, new| {
            assert_eq!(old[5], 0);
            assert_eq!(new[5], 42);
        });

        page.sync_old_data();
        page.with_images(|old, new| {
            assert_eq!(old[5], 42);
            assert_eq!(old, new);
        });

        page.mark_clean();
        assert!(!page.is_dirty());
        // A flush does not disturb the WAL pre-image.
        page.write_u8(5, 43);
        page.with_images(|old, _| assert_eq!(old[5], 42));
    }

    #[test]
    fn test_pinned_page_refcount() {
        let (_tmp, page) = test_page();
        let page = Arc::new(page);

        let pin1 = PinnedPage::new(Arc::clone(&page));
        assert_eq!(page.pin_count(), 1);
        let pin2 = pin1.clone();
        assert_eq!(page.pin_count(), 2);
        drop(pin1);
        assert_eq!(page.pin_count(), 1);
        drop(pin2);
        assert_eq!(page.pin_count(), 0);
    }
}
