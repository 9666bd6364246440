use std::convert::TryInto;

use parking_lot::Mutex;
use tracing::{debug, info};

use super::node::{self, InsertOutcome, Node, SearchNext, Split};
use crate::storage::dm::{DataItemRef, DataManager};
use crate::storage::txn::SUPER_XID;
use crate::types::{Result, Uid, VellumError};

const BOOT_LEN: usize = 8;

/// B+Tree over `i64` keys whose nodes are data items.
///
/// The tree is reached through a boot item holding the current root uid, so
/// a root split only rewrites those eight bytes.
pub struct BPlusTree {
    dm: DataManager,
    boot_uid: Uid,
    boot: DataItemRef,
    boot_lock: Mutex<()>,
}

impl BPlusTree {
    /// Writes an empty tree through `dm` and returns the uid of its boot item.
    pub fn create(dm: &DataManager) -> Result<Uid> {
        let root = dm.insert(SUPER_XID, &node::nil_root_raw())?;
        let boot = dm.insert(SUPER_XID, &root.0.to_be_bytes())?;
        info!(boot = %boot, root = %root, "btree.create");
        Ok(boot)
    }

    /// Opens the tree whose boot item is `boot_uid`.
    pub fn load(boot_uid: Uid, dm: &DataManager) -> Result<Self> {
        let boot = dm.read(boot_uid)?.ok_or(VellumError::NotFound)?;
        if boot.len() != BOOT_LEN {
            return Err(VellumError::Corruption("btree boot item has wrong length"));
        }
        Ok(Self {
            dm: dm.clone(),
            boot_uid,
            boot,
            boot_lock: Mutex::new(()),
        })
    }

    /// Uid of the boot item, to be persisted by the caller.
    pub fn boot_uid(&self) -> Uid {
        self.boot_uid
    }

    fn root_uid(&self) -> Uid {
        let _boot = self.boot_lock.lock();
        let bytes: [u8; BOOT_LEN] = self
            .boot
            .read()
            .with_data(|data| data[..BOOT_LEN].try_into().unwrap());
        Uid(u64::from_be_bytes(bytes))
    }

    fn update_root(&self, left: Uid, right: Uid, key: i64) -> Result<()> {
        let _boot = self.boot_lock.lock();
        let root = self
            .dm
            .insert(SUPER_XID, &node::new_root_raw(left, right, key))?;
        let mut write = self.boot.before();
        write.update(|data| data.copy_from_slice(&root.0.to_be_bytes()));
        write.after(SUPER_XID)?;
        info!(root = %root, left = %left, right = %right, key, "btree.root_split");
        Ok(())
    }

    /// Uids indexed under exactly `key`.
    pub fn search(&self, key: i64) -> Result<Vec<Uid>> {
        self.search_range(key, key)
    }

    /// Uids indexed under keys in `lo..=hi`, in key order.
    pub fn search_range(&self, lo: i64, hi: i64) -> Result<Vec<Uid>> {
        let mut uids = Vec::new();
        if lo > hi {
            return Ok(uids);
        }
        let mut leaf = self.search_leaf(self.root_uid(), lo)?;
        loop {
            let (found, next) = Node::load(&self.dm, leaf)?.leaf_search_range(lo, hi);
            uids.extend(found);
            if next.is_null() {
                break;
            }
            leaf = next;
        }
        Ok(uids)
    }

    /// Indexes `uid` under `key`.
    pub fn insert(&self, key: i64, uid: Uid) -> Result<()> {
        let root = self.root_uid();
        if let Some(split) = self.insert_at(root, uid, key)? {
            self.update_root(root, split.son, split.key)?;
        }
        debug!(key, uid = %uid, "btree.insert");
        Ok(())
    }

    /// Releases the boot item.
    pub fn close(self) -> Result<()> {
        self.boot.release()
    }

    fn search_leaf(&self, mut node_uid: Uid, key: i64) -> Result<Uid> {
        loop {
            if Node::load(&self.dm, node_uid)?.is_leaf() {
                return Ok(node_uid);
            }
            node_uid = self.search_next(node_uid, key)?;
        }
    }

    fn search_next(&self, mut node_uid: Uid, key: i64) -> Result<Uid> {
        loop {
            match Node::load(&self.dm, node_uid)?.search_next(key) {
                SearchNext::Child(child) => return Ok(child),
                SearchNext::Sibling(sibling) => node_uid = sibling,
            }
        }
    }

    fn insert_at(&self, node_uid: Uid, uid: Uid, key: i64) -> Result<Option<Split>> {
        if Node::load(&self.dm, node_uid)?.is_leaf() {
            return self.insert_and_split(node_uid, uid, key);
        }
        let next = self.search_next(node_uid, key)?;
        match self.insert_at(next, uid, key)? {
            Some(split) => self.insert_and_split(node_uid, split.son, split.key),
            None => Ok(None),
        }
    }

    fn insert_and_split(&self, mut node_uid: Uid, uid: Uid, key: i64) -> Result<Option<Split>> {
        loop {
            match Node::load(&self.dm, node_uid)?.insert_and_split(&self.dm, uid, key)? {
                InsertOutcome::Sibling(sibling) => node_uid = sibling,
                InsertOutcome::Inserted(split) => return Ok(split),
            }
        }
    }
}
