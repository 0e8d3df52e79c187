//! The buffer manager: a bounded cache of pages with pin-aware
//! eviction and WAL-gated write-back.
//!
//! The cache maps `(file, page_no)` to a shared [`DbPage`].  Fetching a
//! page pins it; the returned [`PinnedPage`] releases the pin on drop.
//! Eviction chooses the least-recently-used page whose pin count is
//! zero.
//!
//! # The WAL rule
//!
//! No dirty page may reach disk before the WAL records describing it
//! are durable.  Every dirty write-back that leaves this module through
//! [`BufferManager::write_all`] or eviction first passes the pages to
//! the installed [`WalSync`] hook, which forces the WAL through the
//! highest `page_lsn` among them.  [`BufferManager::flush_file`] skips
//! the hook; it exists for the WAL manager's own files and for freshly
//! created metadata, which carry no page LSNs.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, trace};

use granite_common::{DbError, DbResult};

use crate::file::{DbFile, FileManager};
use crate::page::{DbPage, PinnedPage};

/// Invoked before dirty pages leave the buffer pool for disk.
///
/// Implemented by the transaction manager; forces the write-ahead log
/// through the highest `page_lsn` among `pages` before returning.
pub trait WalSync: Send + Sync {
    /// Makes the WAL durable through every given page's `page_lsn`.
    fn before_write_dirty_pages(&self, pages: &[PinnedPage]) -> DbResult<()>;
}

/// Counters describing buffer pool activity.
#[derive(Debug, Default)]
pub struct BufferStats {
    fetches: AtomicU64,
    hits: AtomicU64,
    evictions: AtomicU64,
    flushes: AtomicU64,
}

impl BufferStats {
    /// Total page fetches.
    pub fn fetches(&self) -> u64 {
        self.fetches.load(Ordering::Relaxed)
    }

    /// Fetches satisfied from the cache.
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    /// Pages evicted to make room.
    pub fn evictions(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }

    /// Dirty pages written back to disk.
    pub fn flushes(&self) -> u64 {
        self.flushes.load(Ordering::Relaxed)
    }
}

type PageKey = (String, u32);

struct CacheEntry {
    page: Arc<DbPage>,
    last_access: u64,
}

#[derive(Default)]
struct PageCache {
    pages: HashMap<PageKey, CacheEntry>,
    bytes_cached: usize,
    clock: u64,
}

impl PageCache {
    fn touch(&mut self, key: &PageKey) -> Option<&CacheEntry> {
        self.clock += 1;
        let clock = self.clock;
        let entry = self.pages.get_mut(key)?;
        entry.last_access = clock;
        Some(entry)
    }

    /// Least-recently-used unpinned page, if any.
    fn choose_victim(&self) -> Option<PageKey> {
        self.pages
            .iter()
            .filter(|(_, e)| e.page.pin_count() == 0)
            .min_by_key(|(_, e)| e.last_access)
            .map(|(k, _)| k.clone())
    }
}

/// A bounded cache of [`DbPage`]s shared by every storage component.
pub struct BufferManager {
    file_manager: Arc<FileManager>,
    capacity_bytes: usize,
    cache: Mutex<PageCache>,
    wal_sync: RwLock<Option<Arc<dyn WalSync>>>,
    stats: BufferStats,
}

impl BufferManager {
    /// Creates a buffer manager that caches at most `capacity_bytes`
    /// of page data.
    pub fn new(file_manager: Arc<FileManager>, capacity_bytes: usize) -> Self {
        Self {
            file_manager,
            capacity_bytes,
            cache: Mutex::new(PageCache::default()),
            wal_sync: RwLock::new(None),
            stats: BufferStats::default(),
        }
    }

    /// Installs the WAL-force hook.  Called once during engine
    /// assembly, after the transaction manager exists.
    pub fn set_wal_sync(&self, hook: Arc<dyn WalSync>) {
        *self.wal_sync.write() = Some(hook);
    }

    /// Returns the file manager backing this buffer pool.
    #[must_use]
    pub fn file_manager(&self) -> &Arc<FileManager> {
        &self.file_manager
    }

    /// Returns buffer activity counters.
    #[must_use]
    pub fn stats(&self) -> &BufferStats {
        &self.stats
    }

    /// Fetches a page, pinning it for the caller.
    ///
    /// On a cache miss the page is read from disk.  A page past the end
    /// of the file yields `Ok(None)` unless `create` is set, in which
    /// case a zeroed page is materialized and the file's logical page
    /// count grows to cover it.
    pub fn fetch_page(
        &self,
        file: &Arc<DbFile>,
        page_no: u32,
        create: bool,
    ) -> DbResult<Option<PinnedPage>> {
        self.stats.fetches.fetch_add(1, Ordering::Relaxed);
        let key: PageKey = (file.file_name().to_string(), page_no);
        let page_size = file.page_size();

        loop {
            let victim = {
                let mut cache = self.cache.lock();

                if let Some(entry) = cache.touch(&key) {
                    self.stats.hits.fetch_add(1, Ordering::Relaxed);
                    return Ok(Some(PinnedPage::new(Arc::clone(&entry.page))));
                }

                if cache.bytes_cached + page_size <= self.capacity_bytes {
                    // Room available: read the page in and cache it.
                    let mut data = vec![0u8; page_size].into_boxed_slice();
                    let on_disk = self.file_manager.load_page(file, page_no, &mut data)?;
                    if !on_disk && page_no >= file.num_pages() {
                        if !create {
                            return Ok(None);
                        }
                        file.extend_to(page_no + 1);
                        trace!(
                            file = file.file_name(),
                            page_no,
                            "created page past end of file"
                        );
                    }

                    let page = Arc::new(DbPage::new(Arc::clone(file), page_no, data));
                    let pinned = PinnedPage::new(Arc::clone(&page));
                    cache.clock += 1;
                    let last_access = cache.clock;
                    cache.pages.insert(key, CacheEntry { page, last_access });
                    cache.bytes_cached += page_size;
                    return Ok(Some(pinned));
                }

                // Must evict first.
                match cache.choose_victim() {
                    Some(victim_key) => {
                        let page = Arc::clone(&cache.pages[&victim_key].page);
                        (victim_key, page)
                    }
                    None => return Err(DbError::BufferPoolFull),
                }
            };

            // Flush outside the cache lock: the WAL hook may re-enter
            // the buffer manager to flush WAL-file pages.
            self.evict(victim)?;
        }
    }

    /// Writes a victim page back (if dirty) and removes it from the
    /// cache, unless it was pinned or re-dirtied in the meantime.
    fn evict(&self, (key, page): (PageKey, Arc<DbPage>)) -> DbResult<()> {
        if page.is_dirty() {
            let pinned = PinnedPage::new(Arc::clone(&page));
            if let Some(hook) = self.wal_sync.read().clone() {
                hook.before_write_dirty_pages(std::slice::from_ref(&pinned))?;
            }
            self.flush_page(&page)?;
        }

        let mut cache = self.cache.lock();
        let still_evictable = cache
            .pages
            .get(&key)
            .is_some_and(|e| e.page.pin_count() == 0 && !e.page.is_dirty());
        if still_evictable {
            let entry = cache.pages.remove(&key).expect("entry just observed");
            cache.bytes_cached -= entry.page.page_size();
            self.stats.evictions.fetch_add(1, Ordering::Relaxed);
            trace!(file = key.0.as_str(), page_no = key.1, "evicted page");
        }
        Ok(())
    }

    fn flush_page(&self, page: &DbPage) -> DbResult<()> {
        page.with_data(|data| self.file_manager.save_page(page.file(), page.page_no(), data))?;
        page.mark_clean();
        self.stats.flushes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Flushes every dirty page in the cache, WAL-first, and optionally
    /// syncs the affected files.
    pub fn write_all(&self, sync: bool) -> DbResult<()> {
        let dirty: Vec<PinnedPage> = {
            let cache = self.cache.lock();
            cache
                .pages
                .values()
                .filter(|e| e.page.is_dirty())
                .map(|e| PinnedPage::new(Arc::clone(&e.page)))
                .collect()
        };

        debug!(dirty_pages = dirty.len(), sync, "writing all dirty pages");

        if !dirty.is_empty() {
            if let Some(hook) = self.wal_sync.read().clone() {
                hook.before_write_dirty_pages(&dirty)?;
            }
            for page in &dirty {
                if page.is_dirty() {
                    self.flush_page(page)?;
                }
            }
        }

        if sync {
            let mut files: HashMap<String, Arc<DbFile>> = HashMap::new();
            for page in &dirty {
                files
                    .entry(page.file().file_name().to_string())
                    .or_insert_with(|| Arc::clone(page.file()));
            }
            for file in files.values() {
                self.file_manager.sync_file(file)?;
            }
        }
        Ok(())
    }

    /// Flushes the cached dirty pages of one file, without the WAL
    /// hook, and optionally syncs it.
    ///
    /// This is the write path for WAL files themselves (forcing the log
    /// must not recurse into a WAL force) and for freshly created file
    /// metadata.
    pub fn flush_file(&self, file: &Arc<DbFile>, sync: bool) -> DbResult<()> {
        let dirty: Vec<PinnedPage> = {
            let cache = self.cache.lock();
            cache
                .pages
                .values()
                .filter(|e| {
                    e.page.file().file_name() == file.file_name() && e.page.is_dirty()
                })
                .map(|e| PinnedPage::new(Arc::clone(&e.page)))
                .collect()
        };

        for page in &dirty {
            self.flush_page(page)?;
        }
        if sync {
            self.file_manager.sync_file(file)?;
        }
        Ok(())
    }

    /// Number of cached pages currently pinned.  Test support.
    #[must_use]
    pub fn pinned_page_count(&self) -> usize {
        let cache = self.cache.lock();
        cache
            .pages
            .values()
            .filter(|e| e.page.pin_count() > 0)
            .count()
    }

    /// Number of pages currently cached.
    #[must_use]
    pub fn cached_page_count(&self) -> usize {
        self.cache.lock().pages.len()
    }
}

impl std::fmt::Debug for BufferManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let cache = self.cache.lock();
        f.debug_struct("BufferManager")
            .field("capacity_bytes", &self.capacity_bytes)
            .field("bytes_cached", &cache.bytes_cached)
            .field("cached_pages", &cache.pages.len())
            .finish()
    }
}
