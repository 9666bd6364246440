//! Data items: length-prefixed records living inside data pages.
//!
//! Wrapped layout: `[valid:1][size:2][payload...]`. A valid flag of `0` means
//! the item is live; recovery sets it to `1` to tombstone an undone insert.
//!
//! Mutation goes through [`DataItem::before`], which snapshots the old image
//! and returns a guard. [`ItemWrite::after`] logs an update record and ends
//! the bracket; dropping the guard without `after` restores the snapshot.

use std::convert::TryInto;
use std::ops::Range;
use std::sync::Arc;

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use super::record;
use crate::primitives::pager::{Page, FSO_LEN, MAX_FREE_SPACE};
use crate::primitives::wal::Wal;
use crate::types::{Result, Uid, VellumError, Xid, PAGE_SIZE};

const OF_VALID: usize = 0;
const OF_SIZE: usize = 1;
/// Bytes in front of the payload of a wrapped item.
pub const ITEM_HEADER_LEN: usize = 3;

/// Wraps `payload` as a live item ready to be appended to a page.
pub fn wrap_raw(payload: &[u8]) -> Result<Vec<u8>> {
    let size = u16::try_from(payload.len()).map_err(|_| VellumError::DataTooLarge {
        len: payload.len() + ITEM_HEADER_LEN,
        max: MAX_FREE_SPACE,
    })?;
    let mut raw = Vec::with_capacity(ITEM_HEADER_LEN + payload.len());
    raw.push(0);
    raw.extend_from_slice(&size.to_be_bytes());
    raw.extend_from_slice(payload);
    Ok(raw)
}

/// Marks a wrapped item image as tombstoned.
pub(crate) fn set_raw_invalid(raw: &mut [u8]) {
    raw[OF_VALID] = 1;
}

/// A data item resolved to its page.
///
/// Holds the page for as long as the item is resident in the item cache.
pub struct DataItem {
    uid: Uid,
    page: Arc<Page>,
    range: Range<usize>,
    wal: Arc<Wal>,
    // Guards the item; holds the before-image while a write bracket is open.
    latch: RwLock<Vec<u8>>,
}

impl DataItem {
    pub(crate) fn parse(uid: Uid, page: Arc<Page>, wal: Arc<Wal>) -> Result<Self> {
        let start = usize::from(uid.offset());
        let range = {
            let raw = page.read();
            if start < FSO_LEN || start + ITEM_HEADER_LEN > PAGE_SIZE {
                return Err(VellumError::Corruption("data item offset outside page"));
            }
            let size = u16::from_be_bytes(
                raw[start + OF_SIZE..start + ITEM_HEADER_LEN].try_into().unwrap(),
            );
            let end = start + ITEM_HEADER_LEN + usize::from(size);
            if end > PAGE_SIZE {
                return Err(VellumError::Corruption("data item overruns page"));
            }
            start..end
        };
        let len = range.len();
        Ok(Self {
            uid,
            page,
            range,
            wal,
            latch: RwLock::new(vec![0u8; len]),
        })
    }

    /// Global identifier of this item.
    pub fn uid(&self) -> Uid {
        self.uid
    }

    pub(crate) fn page(&self) -> &Arc<Page> {
        &self.page
    }

    /// Returns false once the item has been tombstoned.
    pub fn is_valid(&self) -> bool {
        self.page.read()[self.range.start + OF_VALID] == 0
    }

    /// Payload length in bytes.
    pub fn len(&self) -> usize {
        self.range.len() - ITEM_HEADER_LEN
    }

    /// Returns true for a zero-length payload.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn payload_range(&self) -> Range<usize> {
        self.range.start + ITEM_HEADER_LEN..self.range.end
    }

    /// Takes the item's shared latch.
    pub fn read(&self) -> ItemRead<'_> {
        ItemRead {
            item: self,
            _latch: self.latch.read(),
        }
    }

    /// Copies the payload out under the shared latch.
    pub fn data(&self) -> Vec<u8> {
        self.read().with_data(<[u8]>::to_vec)
    }

    /// Opens a write bracket: takes the exclusive latch and snapshots the
    /// current image.
    pub fn before(&self) -> ItemWrite<'_> {
        let mut snapshot = self.latch.write();
        self.page.set_dirty();
        snapshot.copy_from_slice(&self.page.read()[self.range.clone()]);
        ItemWrite {
            item: self,
            snapshot,
            finished: false,
        }
    }
}

/// Shared access to an item's payload.
pub struct ItemRead<'a> {
    item: &'a DataItem,
    _latch: RwLockReadGuard<'a, Vec<u8>>,
}

impl ItemRead<'_> {
    /// Runs `f` over the payload bytes.
    pub fn with_data<R>(&self, f: impl FnOnce(&[u8]) -> R) -> R {
        f(&self.item.page.read()[self.item.payload_range()])
    }
}

/// An open write bracket on a data item.
pub struct ItemWrite<'a> {
    item: &'a DataItem,
    snapshot: RwLockWriteGuard<'a, Vec<u8>>,
    finished: bool,
}

impl ItemWrite<'_> {
    /// Runs `f` over the current payload bytes.
    pub fn with_data<R>(&self, f: impl FnOnce(&[u8]) -> R) -> R {
        f(&self.item.page.read()[self.item.payload_range()])
    }

    /// Runs `f` over the payload bytes in place.
    pub fn update<R>(&mut self, f: impl FnOnce(&mut [u8]) -> R) -> R {
        f(&mut self.item.page.write()[self.item.payload_range()])
    }

    /// Logs the change under `xid` and closes the bracket.
    ///
    /// If the record cannot be logged the old image is restored.
    pub fn after(mut self, xid: Xid) -> Result<()> {
        let new = self.item.page.read()[self.item.range.clone()].to_vec();
        let bytes = record::encode_update(xid, self.item.uid, &self.snapshot, &new);
        self.item.wal.log(&bytes)?;
        self.finished = true;
        Ok(())
    }

    /// Restores the snapshot and closes the bracket.
    pub fn rollback(self) {}
}

impl Drop for ItemWrite<'_> {
    fn drop(&mut self) {
        if !self.finished {
            self.item.page.write()[self.item.range.clone()].copy_from_slice(&self.snapshot);
        }
    }
}
