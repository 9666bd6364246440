use std::path::Path;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info};

use super::page::Page;
use crate::primitives::cache::{CacheSource, RefCache};
use crate::primitives::io::{FileIo, StdFileIo};
use crate::types::{PageNo, Result, VellumError, PAGE_SIZE};

/// Smallest number of pages a page cache may hold.
pub const MIN_CACHE_PAGES: usize = 10;

/// Counters describing page cache file traffic.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PagerStats {
    /// Pages read from the data file on a cache miss.
    pub loads: u64,
    /// Dirty pages written back on eviction or flush.
    pub dirty_writebacks: u64,
    /// Pages appended to the data file.
    pub allocations: u64,
}

#[derive(Default)]
struct Counters {
    loads: AtomicU64,
    dirty_writebacks: AtomicU64,
    allocations: AtomicU64,
}

pub(crate) struct PageSource {
    io: Arc<dyn FileIo>,
    counters: Counters,
}

impl PageSource {
    fn write_back(&self, page: &Page) -> Result<()> {
        let raw = page.read();
        self.io.write_page(page.number(), &raw)?;
        self.counters.dirty_writebacks.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

impl CacheSource<Page> for PageSource {
    fn load(&self, key: u64) -> Result<Page> {
        let pgno = PageNo(key as u32);
        let mut buf = vec![0u8; PAGE_SIZE].into_boxed_slice();
        self.io.read_page(pgno, &mut buf)?;
        self.counters.loads.fetch_add(1, Ordering::Relaxed);
        Ok(Page::new(pgno, buf))
    }

    fn evict(&self, page: &Page) -> Result<()> {
        if page.take_dirty() {
            if let Err(err) = self.write_back(page) {
                page.set_dirty();
                return Err(err);
            }
        }
        Ok(())
    }
}

/// Bounded cache of fixed-size pages over a single data file.
///
/// Pages are pinned by [`get_page`](Self::get_page) and unpinned by
/// [`release`](Self::release); an unpinned page is written back if dirty and
/// dropped from memory.
pub struct PageCache {
    io: Arc<dyn FileIo>,
    cache: RefCache<Page, PageSource>,
    page_count: AtomicU32,
    // Serializes allocation and truncation of the file tail.
    tail: Mutex<()>,
}

impl PageCache {
    /// Creates a new, empty data file at `path`.
    pub fn create(path: impl AsRef<Path>, memory_budget: u64) -> Result<Self> {
        let path = path.as_ref();
        let capacity = Self::capacity_for(memory_budget)?;
        let io: Arc<dyn FileIo> = Arc::new(StdFileIo::create(path)?);
        info!(path = %path.display(), capacity, "pager.create");
        Ok(Self::with_io(io, capacity, 0))
    }

    /// Opens an existing data file at `path`.
    pub fn open(path: impl AsRef<Path>, memory_budget: u64) -> Result<Self> {
        let path = path.as_ref();
        let capacity = Self::capacity_for(memory_budget)?;
        let io: Arc<dyn FileIo> = Arc::new(StdFileIo::open(path)?);
        let page_count = io.page_count()?;
        info!(path = %path.display(), capacity, page_count, "pager.open");
        Ok(Self::with_io(io, capacity, page_count))
    }

    fn capacity_for(memory_budget: u64) -> Result<usize> {
        let pages = usize::try_from(memory_budget / PAGE_SIZE as u64).unwrap_or(usize::MAX);
        if pages < MIN_CACHE_PAGES {
            return Err(VellumError::MemTooSmall {
                budget: memory_budget,
                min: MIN_CACHE_PAGES,
            });
        }
        Ok(pages)
    }

    fn with_io(io: Arc<dyn FileIo>, capacity: usize, page_count: u32) -> Self {
        let source = PageSource {
            io: Arc::clone(&io),
            counters: Counters::default(),
        };
        Self {
            io,
            cache: RefCache::new(source, capacity),
            page_count: AtomicU32::new(page_count),
            tail: Mutex::new(()),
        }
    }

    /// Appends a page initialized with `init` and returns its number.
    ///
    /// The image is written to the file immediately; the page is not cached.
    pub fn new_page(&self, init: &[u8]) -> Result<PageNo> {
        if init.len() != PAGE_SIZE {
            return Err(VellumError::Invalid("page image must be exactly one page"));
        }
        let _tail = self.tail.lock();
        let pgno = PageNo(self.page_count.load(Ordering::Acquire) + 1);
        self.io.write_page(pgno, init)?;
        self.page_count.store(pgno.0, Ordering::Release);
        self.cache
            .source()
            .counters
            .allocations
            .fetch_add(1, Ordering::Relaxed);
        debug!(pgno = pgno.0, "pager.new_page");
        Ok(pgno)
    }

    /// Pins page `pgno`, loading it from the file on a miss.
    pub fn get_page(&self, pgno: PageNo) -> Result<Arc<Page>> {
        if pgno.0 == 0 || pgno.0 > self.page_count() {
            return Err(VellumError::Invalid("page number out of range"));
        }
        self.cache.get(u64::from(pgno.0))
    }

    /// Unpins `page`; the last release writes it back if dirty.
    pub fn release(&self, page: &Page) -> Result<()> {
        self.cache.release(u64::from(page.number().0))
    }

    /// Writes `page` to the file and syncs, whether or not it is pinned.
    pub fn flush_page(&self, page: &Page) -> Result<()> {
        page.take_dirty();
        if let Err(err) = self.cache.source().write_back(page) {
            page.set_dirty();
            return Err(err);
        }
        self.io.sync_all()
    }

    /// Shrinks (or zero-extends) the file to exactly `max` pages.
    pub fn truncate_by_page_number(&self, max: PageNo) -> Result<()> {
        let _tail = self.tail.lock();
        self.io.truncate(u64::from(max.0) * PAGE_SIZE as u64)?;
        self.page_count.store(max.0, Ordering::Release);
        info!(page_count = max.0, "pager.truncate");
        Ok(())
    }

    /// Number of pages in the data file.
    pub fn page_count(&self) -> u32 {
        self.page_count.load(Ordering::Acquire)
    }

    /// Counters for file traffic so far.
    pub fn stats(&self) -> PagerStats {
        let counters = &self.cache.source().counters;
        PagerStats {
            loads: counters.loads.load(Ordering::Relaxed),
            dirty_writebacks: counters.dirty_writebacks.load(Ordering::Relaxed),
            allocations: counters.allocations.load(Ordering::Relaxed),
        }
    }

    /// Writes back every resident page and syncs the file.
    pub fn close(&self) -> Result<()> {
        let evicted = self.cache.close();
        let synced = self.io.sync_all();
        debug!(stats = ?self.stats(), "pager.close");
        evicted.and(synced)
    }
}
