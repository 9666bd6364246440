//! B+Tree node stored as one data item.
//!
//! Layout: `[isLeaf:1][noKeys:2][sibling:8]` followed by `2 * BALANCE + 2`
//! slots of `(son:8, key:8)`. In a leaf `son` is the indexed uid; in an
//! internal node it is the child covering keys below `key`. The rightmost
//! internal entry of each level carries `i64::MAX`.

use std::convert::TryInto;

use tracing::debug;

use crate::storage::dm::{DataItemRef, DataManager};
use crate::storage::txn::SUPER_XID;
use crate::types::{fatal, Result, Uid};

/// Half of the maximum number of entries a node holds before splitting.
pub const BALANCE: usize = 32;

const IS_LEAF: usize = 0;
const NO_KEYS: usize = 1;
const SIBLING: usize = 3;
const HEADER_LEN: usize = 11;
const ENTRY_LEN: usize = 16;

/// Encoded size of every node.
pub const NODE_SIZE: usize = HEADER_LEN + ENTRY_LEN * (2 * BALANCE + 2);

fn entry(k: usize) -> usize {
    HEADER_LEN + k * ENTRY_LEN
}

pub(crate) fn is_leaf(raw: &[u8]) -> bool {
    raw[IS_LEAF] == 1
}

fn set_leaf(raw: &mut [u8], leaf: bool) {
    raw[IS_LEAF] = u8::from(leaf);
}

pub(crate) fn key_count(raw: &[u8]) -> usize {
    usize::from(u16::from_be_bytes(raw[NO_KEYS..SIBLING].try_into().unwrap()))
}

fn set_key_count(raw: &mut [u8], count: usize) {
    raw[NO_KEYS..SIBLING].copy_from_slice(&(count as u16).to_be_bytes());
}

pub(crate) fn sibling(raw: &[u8]) -> Uid {
    Uid(u64::from_be_bytes(raw[SIBLING..HEADER_LEN].try_into().unwrap()))
}

fn set_sibling(raw: &mut [u8], sibling: Uid) {
    raw[SIBLING..HEADER_LEN].copy_from_slice(&sibling.0.to_be_bytes());
}

pub(crate) fn son(raw: &[u8], k: usize) -> Uid {
    let at = entry(k);
    Uid(u64::from_be_bytes(raw[at..at + 8].try_into().unwrap()))
}

fn set_son(raw: &mut [u8], k: usize, son: Uid) {
    let at = entry(k);
    raw[at..at + 8].copy_from_slice(&son.0.to_be_bytes());
}

pub(crate) fn key(raw: &[u8], k: usize) -> i64 {
    let at = entry(k) + 8;
    i64::from_be_bytes(raw[at..at + 8].try_into().unwrap())
}

fn set_key(raw: &mut [u8], k: usize, key: i64) {
    let at = entry(k) + 8;
    raw[at..at + 8].copy_from_slice(&key.to_be_bytes());
}

/// Moves entries `k..count` one slot to the right.
fn shift_right(raw: &mut [u8], k: usize, count: usize) {
    if k < count {
        raw.copy_within(entry(k)..entry(count), entry(k + 1));
    }
}

/// Image of an empty leaf used as the root of a new tree.
pub fn nil_root_raw() -> Vec<u8> {
    let mut raw = vec![0u8; NODE_SIZE];
    set_leaf(&mut raw, true);
    raw
}

/// Image of an internal root over `left` and `right`, split at `key`.
pub fn new_root_raw(left: Uid, right: Uid, key: i64) -> Vec<u8> {
    let mut raw = vec![0u8; NODE_SIZE];
    set_leaf(&mut raw, false);
    set_key_count(&mut raw, 2);
    set_son(&mut raw, 0, left);
    set_key(&mut raw, 0, key);
    set_son(&mut raw, 1, right);
    set_key(&mut raw, 1, i64::MAX);
    raw
}

/// Inserts `(son, key)` into a node image; returns false if the key belongs
/// to a right sibling.
fn insert_entry(raw: &mut [u8], son_uid: Uid, new_key: i64) -> bool {
    let count = key_count(raw);
    let mut kth = 0;
    while kth < count && key(raw, kth) < new_key {
        kth += 1;
    }
    if kth == count && !sibling(raw).is_null() {
        return false;
    }
    if is_leaf(raw) {
        shift_right(raw, kth, count);
        set_key(raw, kth, new_key);
        set_son(raw, kth, son_uid);
    } else {
        let displaced = key(raw, kth);
        set_key(raw, kth, new_key);
        shift_right(raw, kth + 1, count);
        set_key(raw, kth + 1, displaced);
        set_son(raw, kth + 1, son_uid);
    }
    set_key_count(raw, count + 1);
    true
}

/// Builds the upper-half node for a split and returns it with its first key.
fn upper_half(raw: &[u8]) -> (Vec<u8>, i64) {
    let mut upper = vec![0u8; NODE_SIZE];
    set_leaf(&mut upper, is_leaf(raw));
    set_key_count(&mut upper, BALANCE);
    set_sibling(&mut upper, sibling(raw));
    upper[entry(0)..entry(BALANCE)].copy_from_slice(&raw[entry(BALANCE)..entry(2 * BALANCE)]);
    (upper, key(raw, BALANCE))
}

/// Where a descent continues from an internal node.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub(crate) enum SearchNext {
    /// Descend into this child.
    Child(Uid),
    /// The key lies beyond this node; continue at its right sibling.
    Sibling(Uid),
}

/// Outcome of inserting into one node.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub(crate) enum InsertOutcome {
    /// The key belongs to the sibling; nothing was changed.
    Sibling(Uid),
    /// Inserted; the node split if `Some`.
    Inserted(Option<Split>),
}

/// New right node produced by a split, and the first key it holds.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub(crate) struct Split {
    pub son: Uid,
    pub key: i64,
}

/// A pinned tree node.
pub(crate) struct Node {
    item: DataItemRef,
}

impl Node {
    /// Pins the node at `uid`; a uid that no longer resolves is fatal.
    pub fn load(dm: &DataManager, uid: Uid) -> Result<Self> {
        match dm.read(uid)? {
            Some(item) => Ok(Self { item }),
            None => fatal("btree.node_missing", uid),
        }
    }

    pub fn is_leaf(&self) -> bool {
        self.item.read().with_data(is_leaf)
    }

    /// Picks the child to descend into for `search_key`.
    pub fn search_next(&self, search_key: i64) -> SearchNext {
        self.item.read().with_data(|raw| {
            let count = key_count(raw);
            for k in 0..count {
                if search_key < key(raw, k) {
                    return SearchNext::Child(son(raw, k));
                }
            }
            let next = sibling(raw);
            if next.is_null() && count > 0 {
                // Only `i64::MAX` itself gets here; the last child covers it.
                SearchNext::Child(son(raw, count - 1))
            } else {
                SearchNext::Sibling(next)
            }
        })
    }

    /// Collects uids with keys in `lo..=hi`; also returns the sibling to
    /// continue at, or the null uid when the range ended inside this leaf.
    pub fn leaf_search_range(&self, lo: i64, hi: i64) -> (Vec<Uid>, Uid) {
        self.item.read().with_data(|raw| {
            let count = key_count(raw);
            let mut kth = 0;
            while kth < count && key(raw, kth) < lo {
                kth += 1;
            }
            let mut uids = Vec::new();
            while kth < count && key(raw, kth) <= hi {
                uids.push(son(raw, kth));
                kth += 1;
            }
            let next = if kth == count { sibling(raw) } else { Uid(0) };
            (uids, next)
        })
    }

    /// Inserts `(son_uid, new_key)`, splitting the node once it is full.
    pub fn insert_and_split(
        &self,
        dm: &DataManager,
        son_uid: Uid,
        new_key: i64,
    ) -> Result<InsertOutcome> {
        let mut write = self.item.before();
        if !write.update(|raw| insert_entry(raw, son_uid, new_key)) {
            let next = write.with_data(sibling);
            write.rollback();
            return Ok(InsertOutcome::Sibling(next));
        }
        if write.with_data(key_count) < 2 * BALANCE {
            write.after(SUPER_XID)?;
            return Ok(InsertOutcome::Inserted(None));
        }
        let (upper, split_key) = write.with_data(upper_half);
        // An error here drops `write`, restoring the unsplit image.
        let son = dm.insert(SUPER_XID, &upper)?;
        write.update(|raw| {
            set_key_count(raw, BALANCE);
            set_sibling(raw, son);
        });
        write.after(SUPER_XID)?;
        debug!(node = %self.item.uid(), son = %son, key = split_key, "btree.split");
        Ok(InsertOutcome::Inserted(Some(Split {
            son,
            key: split_key,
        })))
    }
}
