use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::types::{PageNo, Result, VellumError, PAGE_SIZE};

/// Width of the free-space-offset header at the start of every data page.
pub const FSO_LEN: usize = 2;

/// Free space of a freshly initialized data page.
pub const MAX_FREE_SPACE: usize = PAGE_SIZE - FSO_LEN;

/// A resident page: its number, its 8 KiB image and a dirty flag.
///
/// The image lives behind a reader/writer lock so short in-place reads and
/// writes can proceed page-locally. Taking the write guard marks the page
/// dirty.
pub struct Page {
    pgno: PageNo,
    buf: RwLock<Box<[u8]>>,
    dirty: AtomicBool,
}

impl Page {
    pub(crate) fn new(pgno: PageNo, buf: Box<[u8]>) -> Self {
        debug_assert_eq!(buf.len(), PAGE_SIZE);
        Self {
            pgno,
            buf: RwLock::new(buf),
            dirty: AtomicBool::new(false),
        }
    }

    /// Page number of this page.
    pub fn number(&self) -> PageNo {
        self.pgno
    }

    /// Shared view of the page image.
    pub fn read(&self) -> RwLockReadGuard<'_, Box<[u8]>> {
        self.buf.read()
    }

    /// Exclusive view of the page image; marks the page dirty.
    pub fn write(&self) -> RwLockWriteGuard<'_, Box<[u8]>> {
        self.set_dirty();
        self.buf.write()
    }

    /// Flags the page for write-back on eviction.
    pub fn set_dirty(&self) {
        self.dirty.store(true, Ordering::Release);
    }

    /// Returns true if the in-memory image differs from the file.
    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    pub(crate) fn take_dirty(&self) -> bool {
        self.dirty.swap(false, Ordering::AcqRel)
    }
}

/// Free-space-offset layout for data pages: `[FSO:2][records...]`.
///
/// The FSO is an absolute in-page offset to the first unused byte; records are
/// appended at the FSO and never move.
pub mod layout {
    use super::*;

    /// Returns a fresh data page image with FSO set just past the header.
    pub fn init_raw() -> Box<[u8]> {
        let mut raw = vec![0u8; PAGE_SIZE].into_boxed_slice();
        set_fso(&mut raw, FSO_LEN as u16);
        raw
    }

    /// Reads the free-space offset of a page image.
    pub fn fso(raw: &[u8]) -> u16 {
        u16::from_be_bytes([raw[0], raw[1]])
    }

    pub(crate) fn set_fso(raw: &mut [u8], fso: u16) {
        raw[..FSO_LEN].copy_from_slice(&fso.to_be_bytes());
    }

    /// Unused bytes remaining at the end of `page`.
    pub fn free_space(page: &Page) -> usize {
        PAGE_SIZE.saturating_sub(usize::from(fso(&page.read())))
    }

    /// Appends `record` at the page's FSO and returns the offset it landed at.
    pub fn append(page: &Page, record: &[u8]) -> Result<u16> {
        let mut raw = page.write();
        let offset = fso(&raw);
        let start = usize::from(offset);
        let end = start + record.len();
        if start < FSO_LEN || end > PAGE_SIZE {
            return Err(VellumError::Invalid("record does not fit in page"));
        }
        raw[start..end].copy_from_slice(record);
        set_fso(&mut raw, end as u16);
        Ok(offset)
    }

    /// Writes `record` at `offset` and raises the FSO to cover it if needed.
    pub fn recover_insert(page: &Page, record: &[u8], offset: u16) -> Result<()> {
        let mut raw = page.write();
        let end = copy_into(&mut raw, record, offset)?;
        if usize::from(fso(&raw)) < end {
            set_fso(&mut raw, end as u16);
        }
        Ok(())
    }

    /// Writes `record` at `offset` leaving the FSO untouched.
    pub fn recover_update(page: &Page, record: &[u8], offset: u16) -> Result<()> {
        let mut raw = page.write();
        copy_into(&mut raw, record, offset)?;
        Ok(())
    }

    fn copy_into(raw: &mut [u8], record: &[u8], offset: u16) -> Result<usize> {
        let start = usize::from(offset);
        let end = start + record.len();
        if start < FSO_LEN || end > PAGE_SIZE {
            return Err(VellumError::Corruption("record offset outside page"));
        }
        raw[start..end].copy_from_slice(record);
        Ok(end)
    }
}
