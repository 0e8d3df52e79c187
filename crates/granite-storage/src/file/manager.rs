//! The file manager: creation, opening, and block-aligned page I/O.

use std::collections::HashMap;
use std::fs::OpenOptions;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use granite_common::constants::{MAX_PAGE_SIZE, MIN_PAGE_SIZE};
use granite_common::{DbError, DbResult};

use super::{DbFile, DbFileType, OFFSET_FILE_TYPE, OFFSET_PAGE_SIZE};

/// Creates, opens, and performs page I/O on [`DbFile`]s.
///
/// Open files are cached, so repeated opens of the same name return the
/// same `Arc<DbFile>`.  All page I/O is block-aligned: pages are read
/// and written as whole units at `page_no * page_size`.
pub struct FileManager {
    base_dir: PathBuf,
    open_files: Mutex<HashMap<String, Arc<DbFile>>>,
}

impl FileManager {
    /// Creates a file manager rooted at `base_dir`, creating the
    /// directory if necessary.
    pub fn new(base_dir: impl AsRef<Path>) -> DbResult<Self> {
        let base_dir = base_dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&base_dir)?;
        Ok(Self {
            base_dir,
            open_files: Mutex::new(HashMap::new()),
        })
    }

    /// Returns the directory this manager stores files in.
    #[must_use]
    pub fn base_dir(&self) -> &PathBuf {
        &self.base_dir
    }

    /// Creates a new file of the given type and page size.
    ///
    /// Page 0 is initialized with the two-byte self-identifying header
    /// and written to disk.  Fails if the file already exists.
    pub fn create_file(
        &self,
        name: &str,
        file_type: DbFileType,
        page_size: usize,
    ) -> DbResult<Arc<DbFile>> {
        if !page_size.is_power_of_two() || !(MIN_PAGE_SIZE..=MAX_PAGE_SIZE).contains(&page_size) {
            return Err(DbError::config(format!(
                "invalid page size {} for file {}",
                page_size, name
            )));
        }

        let path = self.base_dir.join(name);
        debug!(file = name, %file_type, page_size, "creating file");

        let mut open_files = self.open_files.lock();
        if open_files.contains_key(name) {
            return Err(DbError::illegal_state(format!(
                "file {} is already open",
                name
            )));
        }

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(&path)?;

        let mut page0 = vec![0u8; page_size];
        page0[OFFSET_FILE_TYPE] = file_type.as_u8();
        page0[OFFSET_PAGE_SIZE] = page_size.trailing_zeros() as u8;
        file.write_all(&page0)?;

        let db_file = Arc::new(DbFile::new(
            name.to_string(),
            path,
            file_type,
            page_size,
            1,
            file,
        ));
        open_files.insert(name.to_string(), Arc::clone(&db_file));
        Ok(db_file)
    }

    /// Opens an existing file, or returns `None` if it does not exist.
    ///
    /// The file's type and page size are decoded from its header.
    pub fn open_file(&self, name: &str) -> DbResult<Option<Arc<DbFile>>> {
        let mut open_files = self.open_files.lock();
        if let Some(db_file) = open_files.get(name) {
            return Ok(Some(Arc::clone(db_file)));
        }

        let path = self.base_dir.join(name);
        let mut file = match OpenOptions::new().read(true).write(true).open(&path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let mut header = [0u8; 2];
        file.read_exact(&mut header).map_err(|_| {
            DbError::data_format(format!("file {} is too short to hold a header", name))
        })?;

        let file_type = DbFileType::from_u8(header[0]).ok_or_else(|| {
            DbError::data_format(format!(
                "file {} has unrecognized type tag {}",
                name, header[0]
            ))
        })?;

        let page_size = 1usize
            .checked_shl(u32::from(header[1]))
            .filter(|ps| ps.is_power_of_two() && (MIN_PAGE_SIZE..=MAX_PAGE_SIZE).contains(ps))
            .ok_or_else(|| {
                DbError::data_format(format!(
                    "file {} has invalid page-size exponent {}",
                    name, header[1]
                ))
            })?;

        let len = file.metadata()?.len();
        let num_pages = len.div_ceil(page_size as u64) as u32;

        debug!(file = name, %file_type, page_size, num_pages, "opened file");

        let db_file = Arc::new(DbFile::new(
            name.to_string(),
            path,
            file_type,
            page_size,
            num_pages,
            file,
        ));
        open_files.insert(name.to_string(), Arc::clone(&db_file));
        Ok(Some(db_file))
    }

    /// Opens an existing file, checking that it has the expected type.
    pub fn open_typed(&self, name: &str, expected: DbFileType) -> DbResult<Option<Arc<DbFile>>> {
        match self.open_file(name)? {
            None => Ok(None),
            Some(db_file) => {
                if db_file.file_type() != expected {
                    return Err(DbError::TypeMismatch {
                        path: db_file.path().clone(),
                        expected: expected.as_u8(),
                        found: db_file.file_type().as_u8(),
                    });
                }
                Ok(Some(db_file))
            }
        }
    }

    /// Reads one page into `buf`.
    ///
    /// Returns `Ok(true)` if the page was read from disk, `Ok(false)`
    /// (with `buf` zeroed) if the page lies past the physical end of
    /// the file.  A page straddling the end of a short file is read
    /// partially and zero-filled.
    pub fn load_page(&self, file: &DbFile, page_no: u32, buf: &mut [u8]) -> DbResult<bool> {
        let page_size = file.page_size();
        debug_assert_eq!(buf.len(), page_size);

        let offset = u64::from(page_no) * page_size as u64;
        let mut raw = file.raw_file().lock();
        let len = raw.metadata()?.len();

        if offset >= len {
            buf.fill(0);
            return Ok(false);
        }

        let available = ((len - offset) as usize).min(page_size);
        raw.seek(SeekFrom::Start(offset))?;
        raw.read_exact(&mut buf[..available])?;
        buf[available..].fill(0);
        Ok(true)
    }

    /// Writes one page at its block-aligned position, extending the
    /// file if the page lies past the current end.
    pub fn save_page(&self, file: &DbFile, page_no: u32, data: &[u8]) -> DbResult<()> {
        let page_size = file.page_size();
        debug_assert_eq!(data.len(), page_size);

        let offset = u64::from(page_no) * page_size as u64;
        let mut raw = file.raw_file().lock();
        raw.seek(SeekFrom::Start(offset))?;
        raw.write_all(data)?;
        Ok(())
    }

    /// Flushes the file's data and metadata to stable storage.
    pub fn sync_file(&self, file: &DbFile) -> DbResult<()> {
        file.raw_file().lock().sync_all()?;
        Ok(())
    }
}

impl std::fmt::Debug for FileManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileManager")
            .field("base_dir", &self.base_dir)
            .field("open_files", &self.open_files.lock().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_create_and_reopen() {
        let tmp = TempDir::new().unwrap();
        let fm = FileManager::new(tmp.path()).unwrap();

        let file = fm
            .create_file("test.tbl", DbFileType::HeapTupleFile, 4096)
            .unwrap();
        assert_eq!(file.num_pages(), 1);
        assert_eq!(file.page_size(), 4096);

        // Same Arc from the cache.
        let again = fm.open_file("test.tbl").unwrap().unwrap();
        assert!(Arc::ptr_eq(&file, &again));

        // Fresh manager decodes the header from disk.
        let fm2 = FileManager::new(tmp.path()).unwrap();
        let reopened = fm2.open_file("test.tbl").unwrap().unwrap();
        assert_eq!(reopened.file_type(), DbFileType::HeapTupleFile);
        assert_eq!(reopened.page_size(), 4096);
        assert_eq!(reopened.num_pages(), 1);
    }

    #[test]
    fn test_open_missing_returns_none() {
        let tmp = TempDir::new().unwrap();
        let fm = FileManager::new(tmp.path()).unwrap();
        assert!(fm.open_file("nope.tbl").unwrap().is_none());
    }

    #[test]
    fn test_open_typed_mismatch() {
        let tmp = TempDir::new().unwrap();
        let fm = FileManager::new(tmp.path()).unwrap();
        fm.create_file("log.wal", DbFileType::WriteAheadLogFile, 1024)
            .unwrap();

        let err = fm
            .open_typed("log.wal", DbFileType::HeapTupleFile)
            .unwrap_err();
        assert!(matches!(err, DbError::TypeMismatch { .. }));
    }

    #[test]
    fn test_page_io_round_trip() {
        let tmp = TempDir::new().unwrap();
        let fm = FileManager::new(tmp.path()).unwrap();
        let file = fm
            .create_file("t.tbl", DbFileType::HeapTupleFile, 512)
            .unwrap();

        let mut page = vec![0u8; 512];
        page[0] = 0xAB;
        page[511] = 0xCD;
        fm.save_page(&file, 3, &page).unwrap();
        fm.sync_file(&file).unwrap();

        let mut read = vec![0u8; 512];
        assert!(fm.load_page(&file, 3, &mut read).unwrap());
        assert_eq!(read, page);

        // Pages 1 and 2 were skipped over; they read as zeroes.
        assert!(fm.load_page(&file, 1, &mut read).unwrap());
        assert!(read.iter().all(|&b| b == 0));

        // Past the end of the file.
        assert!(!fm.load_page(&file, 10, &mut read).unwrap());
        assert!(read.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_rejects_bad_page_size() {
        let tmp = TempDir::new().unwrap();
        let fm = FileManager::new(tmp.path()).unwrap();
        assert!(fm
            .create_file("bad.tbl", DbFileType::HeapTupleFile, 1000)
            .is_err());
        assert!(fm
            .create_file("bad.tbl", DbFileType::HeapTupleFile, 128)
            .is_err());
    }
}
