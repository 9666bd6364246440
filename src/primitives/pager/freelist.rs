use std::collections::VecDeque;

use parking_lot::Mutex;

use super::page::MAX_FREE_SPACE;
use crate::types::{PageNo, PAGE_SIZE};

/// Number of free-space intervals a page is classified into.
pub const INTERVALS: usize = 40;

/// Width in bytes of one free-space interval.
pub const THRESHOLD: usize = PAGE_SIZE / INTERVALS;

/// A page together with the free space it had when it was indexed.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct PageInfo {
    /// Indexed page.
    pub pgno: PageNo,
    /// Free bytes recorded for the page.
    pub free: usize,
}

/// Bucketed index of data pages by free space.
///
/// A page is present at most once at any time: [`select`](Self::select)
/// removes the page it returns and the caller re-adds it once done writing.
pub struct FreeSpaceIndex {
    buckets: Mutex<Vec<VecDeque<PageInfo>>>,
}

impl FreeSpaceIndex {
    /// Creates an empty index.
    pub fn new() -> Self {
        Self {
            buckets: Mutex::new(vec![VecDeque::new(); INTERVALS + 1]),
        }
    }

    /// Records that `pgno` has `free` bytes available.
    pub fn add(&self, pgno: PageNo, free: usize) {
        let free = free.min(MAX_FREE_SPACE);
        let bucket = free / THRESHOLD;
        self.buckets.lock()[bucket].push_back(PageInfo { pgno, free });
    }

    /// Removes and returns a page with at least `required` free bytes.
    ///
    /// Lookup starts one interval above the one `required` falls into so the
    /// first candidate found normally fits without inspecting it.
    pub fn select(&self, required: usize) -> Option<PageInfo> {
        let mut start = required / THRESHOLD;
        if start < INTERVALS {
            start += 1;
        }
        let mut buckets = self.buckets.lock();
        for bucket in buckets.iter_mut().skip(start) {
            if let Some(pos) = bucket.iter().position(|info| info.free >= required) {
                return bucket.remove(pos);
            }
        }
        None
    }

    /// Number of indexed pages.
    pub fn len(&self) -> usize {
        self.buckets.lock().iter().map(VecDeque::len).sum()
    }

    /// Returns true if no page is indexed.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for FreeSpaceIndex {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn select_removes_the_page() {
        let index = FreeSpaceIndex::new();
        index.add(PageNo(2), MAX_FREE_SPACE);
        let info = index.select(100).unwrap();
        assert_eq!(info.pgno, PageNo(2));
        assert_eq!(info.free, MAX_FREE_SPACE);
        assert!(index.select(100).is_none());
        assert!(index.is_empty());
    }

    #[test]
    fn select_skips_the_requested_interval() {
        let index = FreeSpaceIndex::new();
        // 300 bytes lands in interval 1 alongside requests of 204..408 bytes.
        index.add(PageNo(3), 300);
        assert!(index.select(250).is_none());
        assert_eq!(index.select(100).map(|i| i.pgno), Some(PageNo(3)));
    }

    #[test]
    fn oldest_entry_in_a_bucket_wins() {
        let index = FreeSpaceIndex::new();
        index.add(PageNo(4), 5000);
        index.add(PageNo(5), 5000);
        assert_eq!(index.select(10).map(|i| i.pgno), Some(PageNo(4)));
        assert_eq!(index.select(10).map(|i| i.pgno), Some(PageNo(5)));
    }

    #[test]
    fn full_page_request_never_gets_a_short_page() {
        let index = FreeSpaceIndex::new();
        index.add(PageNo(6), 8170);
        assert!(index.select(MAX_FREE_SPACE).is_none());
        index.add(PageNo(7), MAX_FREE_SPACE);
        assert_eq!(index.select(MAX_FREE_SPACE).map(|i| i.pgno), Some(PageNo(7)));
    }

    proptest! {
        #[test]
        fn selected_pages_always_fit(
            frees in prop::collection::vec(0usize..=MAX_FREE_SPACE, 1..32),
            required in 0usize..=MAX_FREE_SPACE
        ) {
            let index = FreeSpaceIndex::new();
            for (i, free) in frees.iter().enumerate() {
                index.add(PageNo(i as u32 + 2), *free);
            }
            while let Some(info) = index.select(required) {
                prop_assert!(info.free >= required);
            }
        }
    }
}
