use std::ffi::OsString;
use std::ops::Deref;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use super::data_item::{wrap_raw, DataItem};
use super::options::StoreOptions;
use super::record;
use super::recovery::{self, RecoveryStats};
use super::txn::TransactionStatus;
use crate::primitives::cache::{CacheSource, RefCache};
use crate::primitives::pager::{
    layout, meta, FreeSpaceIndex, Page, PageCache, PagerStats, FSO_LEN, MAX_FREE_SPACE,
};
use crate::primitives::wal::{Wal, WalStats};
use crate::types::{fatal, PageNo, Result, Uid, VellumError, Xid, META_PAGE};

/// Attempts to find or create a page with room before giving up.
const INSERT_ATTEMPTS: usize = 5;

struct ItemSource {
    pages: Arc<PageCache>,
    wal: Arc<Wal>,
}

impl CacheSource<DataItem> for ItemSource {
    fn load(&self, key: u64) -> Result<DataItem> {
        let uid = Uid(key);
        let page = self.pages.get_page(uid.page())?;
        match DataItem::parse(uid, Arc::clone(&page), Arc::clone(&self.wal)) {
            Ok(item) => Ok(item),
            Err(err) => {
                self.pages.release(&page)?;
                Err(err)
            }
        }
    }

    fn evict(&self, item: &DataItem) -> Result<()> {
        self.pages.release(item.page())
    }
}

struct Inner {
    pages: Arc<PageCache>,
    wal: Arc<Wal>,
    items: RefCache<DataItem, ItemSource>,
    free_space: FreeSpaceIndex,
    page_one: Mutex<Option<Arc<Page>>>,
    recovery: Option<RecoveryStats>,
    closed: AtomicBool,
}

impl Inner {
    fn release_item(&self, uid: Uid) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Ok(());
        }
        self.items.release(uid.0)
    }
}

/// Page-backed store of variable-length data items with write-ahead logging.
///
/// A store at base path `p` keeps pages in `p.db` and its log in `p.log`.
/// Handles are cheap to clone and share one underlying store.
#[derive(Clone)]
pub struct DataManager {
    inner: Arc<Inner>,
}

fn with_suffix(base: &Path, suffix: &str) -> PathBuf {
    let mut path = OsString::from(base.as_os_str());
    path.push(suffix);
    PathBuf::from(path)
}

impl DataManager {
    /// Creates a new store; fails if either backing file already exists.
    pub fn create(path: impl AsRef<Path>, options: StoreOptions) -> Result<Self> {
        let path = path.as_ref();
        let db_path = with_suffix(path, ".db");
        let log_path = with_suffix(path, ".log");
        for existing in [&db_path, &log_path] {
            if existing.exists() {
                return Err(VellumError::FileExists(existing.clone()));
            }
        }
        let pages = Arc::new(PageCache::create(&db_path, options.memory_budget)?);
        let wal = Arc::new(Wal::create(&log_path, options.synchronous.wal_mode())?);
        let pgno = pages.new_page(&meta::init_raw())?;
        if pgno != META_PAGE {
            return Err(VellumError::Corruption("meta page is not page one"));
        }
        let page_one = pages.get_page(META_PAGE)?;
        pages.flush_page(&page_one)?;
        info!(path = %path.display(), "dm.create");
        Ok(Self::assemble(pages, wal, page_one, &options, None))
    }

    /// Opens an existing store, running recovery if it was not closed cleanly.
    pub fn open(
        path: impl AsRef<Path>,
        options: StoreOptions,
        txns: Arc<dyn TransactionStatus>,
    ) -> Result<Self> {
        let path = path.as_ref();
        let pages = Arc::new(PageCache::open(
            with_suffix(path, ".db"),
            options.memory_budget,
        )?);
        let wal = Arc::new(Wal::open(
            with_suffix(path, ".log"),
            options.synchronous.wal_mode(),
        )?);
        if pages.page_count() == 0 {
            return Err(VellumError::Corruption("data file has no meta page"));
        }
        let page_one = pages.get_page(META_PAGE)?;

        let recovery = if meta::check(&page_one) {
            None
        } else {
            warn!(path = %path.display(), "dm.open.unclean_shutdown");
            match recovery::recover(txns.as_ref(), &wal, &pages) {
                Ok(stats) => Some(stats),
                Err(err) => fatal("recovery", err),
            }
        };

        let dm = Self::assemble(pages, wal, page_one, &options, recovery);
        dm.fill_free_space()?;
        {
            let page_one = dm.inner.page_one.lock();
            if let Some(page) = page_one.as_ref() {
                meta::set_open(page);
                dm.inner.pages.flush_page(page)?;
            }
        }
        info!(
            path = %path.display(),
            page_count = dm.page_count(),
            recovered = dm.inner.recovery.is_some(),
            "dm.open"
        );
        Ok(dm)
    }

    fn assemble(
        pages: Arc<PageCache>,
        wal: Arc<Wal>,
        page_one: Arc<Page>,
        options: &StoreOptions,
        recovery: Option<RecoveryStats>,
    ) -> Self {
        let source = ItemSource {
            pages: Arc::clone(&pages),
            wal: Arc::clone(&wal),
        };
        Self {
            inner: Arc::new(Inner {
                pages,
                wal,
                items: RefCache::new(source, options.item_cache_limit),
                free_space: FreeSpaceIndex::new(),
                page_one: Mutex::new(Some(page_one)),
                recovery,
                closed: AtomicBool::new(false),
            }),
        }
    }

    fn fill_free_space(&self) -> Result<()> {
        let pages = &self.inner.pages;
        for pgno in 2..=pages.page_count() {
            let page = pages.get_page(PageNo(pgno))?;
            // A zero-filled tail page left by recovery has no valid offset yet.
            if usize::from(layout::fso(&page.read())) < FSO_LEN {
                debug!(pgno, "dm.open.reinit_page");
                page.write().copy_from_slice(&layout::init_raw());
            }
            self.inner
                .free_space
                .add(page.number(), layout::free_space(&page));
            pages.release(&page)?;
        }
        Ok(())
    }

    fn ensure_open(&self) -> Result<()> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(VellumError::Invalid("data manager is closed"));
        }
        Ok(())
    }

    /// Stores `payload` as a new data item written by `xid` and returns its uid.
    ///
    /// The insert record is logged before the page is modified.
    pub fn insert(&self, xid: Xid, payload: &[u8]) -> Result<Uid> {
        self.ensure_open()?;
        let raw = wrap_raw(payload)?;
        if raw.len() > MAX_FREE_SPACE {
            return Err(VellumError::DataTooLarge {
                len: raw.len(),
                max: MAX_FREE_SPACE,
            });
        }
        let inner = &self.inner;

        let mut slot = None;
        for _ in 0..INSERT_ATTEMPTS {
            if let Some(info) = inner.free_space.select(raw.len()) {
                slot = Some(info);
                break;
            }
            let pgno = inner.pages.new_page(&layout::init_raw())?;
            inner.free_space.add(pgno, MAX_FREE_SPACE);
        }
        let Some(info) = slot else {
            debug!(len = raw.len(), "dm.insert.busy");
            return Err(VellumError::DatabaseBusy);
        };

        let page = match inner.pages.get_page(info.pgno) {
            Ok(page) => page,
            Err(err) => {
                inner.free_space.add(info.pgno, info.free);
                return Err(err);
            }
        };
        let written = (|| {
            let offset = layout::fso(&page.read());
            inner
                .wal
                .log(&record::encode_insert(xid, info.pgno, offset, &raw))?;
            layout::append(&page, &raw)
        })();
        inner.free_space.add(info.pgno, layout::free_space(&page));
        let released = inner.pages.release(&page);
        let offset = written?;
        released?;
        let uid = Uid::new(info.pgno, offset);
        debug!(xid, uid = %uid, len = payload.len(), "dm.insert");
        Ok(uid)
    }

    /// Looks up the item at `uid`; returns `None` if it has been tombstoned.
    pub fn read(&self, uid: Uid) -> Result<Option<DataItemRef>> {
        self.ensure_open()?;
        let item = self.inner.items.get(uid.0)?;
        if !item.is_valid() {
            self.inner.release_item(uid)?;
            return Ok(None);
        }
        Ok(Some(DataItemRef {
            item,
            inner: Arc::clone(&self.inner),
            released: false,
        }))
    }

    /// Marks page one clean and flushes everything to disk.
    ///
    /// Item handles still alive afterwards must not be used.
    pub fn close(&self) -> Result<()> {
        let inner = &self.inner;
        if inner.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        if let Some(page_one) = inner.page_one.lock().take() {
            meta::set_close(&page_one);
            inner.pages.flush_page(&page_one)?;
            inner.pages.release(&page_one)?;
        }
        inner.items.close()?;
        inner.wal.close()?;
        inner.pages.close()?;
        info!(
            page_count = inner.pages.page_count(),
            wal = ?inner.wal.stats(),
            "dm.close"
        );
        Ok(())
    }

    /// Number of pages in the data file, page one included.
    pub fn page_count(&self) -> u32 {
        self.inner.pages.page_count()
    }

    /// Statistics from the recovery run performed by [`open`](Self::open), if any.
    pub fn last_recovery(&self) -> Option<&RecoveryStats> {
        self.inner.recovery.as_ref()
    }

    /// Page cache file traffic counters.
    pub fn pager_stats(&self) -> PagerStats {
        self.inner.pages.stats()
    }

    /// Write-ahead log counters.
    pub fn wal_stats(&self) -> WalStats {
        self.inner.wal.stats()
    }
}

/// A pinned data item; dropping the handle releases the pin.
pub struct DataItemRef {
    item: Arc<DataItem>,
    inner: Arc<Inner>,
    released: bool,
}

impl DataItemRef {
    /// Releases the pin, surfacing any write-back failure.
    pub fn release(mut self) -> Result<()> {
        self.released = true;
        self.inner.release_item(self.item.uid())
    }
}

impl Deref for DataItemRef {
    type Target = DataItem;

    fn deref(&self) -> &DataItem {
        &self.item
    }
}

impl Drop for DataItemRef {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Err(err) = self.inner.release_item(self.item.uid()) {
            warn!(uid = %self.item.uid(), error = %err, "dm.item.release_failed");
        }
    }
}
