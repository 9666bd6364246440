//! Vellum: an embedded page-based storage engine.
//!
//! Data items live in 8 KiB pages behind a reference-counted page cache.
//! Every mutation is written ahead to a log so that an unclean shutdown can
//! be repaired on the next open, and a B+Tree index is layered on top of the
//! same data items.

#![warn(missing_docs)]

pub mod primitives;
pub mod storage;
pub mod types;

pub use storage::{
    BPlusTree, DataItem, DataItemRef, DataManager, MemoryTransactions, StoreOptions, Synchronous,
    TransactionStatus, SUPER_XID,
};
pub use types::{PageNo, Result, Uid, VellumError, Xid, PAGE_SIZE};
