//! Data-item storage engine and the B+Tree index built on it.
//!
//! Implements the data manager with its write-ahead mutation protocol, crash
//! recovery, and a B+Tree whose nodes are data items.

/// B+Tree index over 64-bit keys.
pub mod btree;

/// Tagged log records.
pub mod record;

/// Crash recovery driven by the write-ahead log.
pub mod recovery;

mod data_item;
mod dm;
mod options;
mod txn;

pub use btree::{BPlusTree, BALANCE, NODE_SIZE};
pub use data_item::{wrap_raw, DataItem, ItemRead, ItemWrite, ITEM_HEADER_LEN};
pub use dm::{DataItemRef, DataManager};
pub use options::{StoreOptions, Synchronous};
pub use recovery::RecoveryStats;
pub use txn::{MemoryTransactions, TransactionStatus, TxnState, SUPER_XID};
