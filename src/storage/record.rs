//! Tagged log records written ahead of every data-item mutation.
//!
//! Big-endian layouts:
//! - insert: `[0][xid:8][pgno:4][offset:2][raw...]`
//! - update: `[1][xid:8][uid:8][old...][new...]`, `old` and `new` equal length

use std::convert::TryInto;

use crate::types::{PageNo, Result, Uid, VellumError, Xid};

const TAG_INSERT: u8 = 0;
const TAG_UPDATE: u8 = 1;

const INSERT_HEADER_LEN: usize = 1 + 8 + 4 + 2;
const UPDATE_HEADER_LEN: usize = 1 + 8 + 8;

/// A decoded log record.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum LogRecord {
    /// A wrapped data item appended to a page.
    Insert {
        /// Writing transaction.
        xid: Xid,
        /// Target page.
        pgno: PageNo,
        /// In-page offset the item was written at.
        offset: u16,
        /// Wrapped item bytes.
        raw: Vec<u8>,
    },
    /// An in-place overwrite of a data item.
    Update {
        /// Writing transaction.
        xid: Xid,
        /// Item that was overwritten.
        uid: Uid,
        /// Wrapped item bytes before the write.
        old: Vec<u8>,
        /// Wrapped item bytes after the write.
        new: Vec<u8>,
    },
}

impl LogRecord {
    /// Transaction that wrote this record.
    pub fn xid(&self) -> Xid {
        match self {
            LogRecord::Insert { xid, .. } | LogRecord::Update { xid, .. } => *xid,
        }
    }

    /// Page touched by this record.
    pub fn page(&self) -> PageNo {
        match self {
            LogRecord::Insert { pgno, .. } => *pgno,
            LogRecord::Update { uid, .. } => uid.page(),
        }
    }

    /// Parses a record read back from the log.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        match bytes.first() {
            Some(&TAG_INSERT) => {
                if bytes.len() < INSERT_HEADER_LEN {
                    return Err(VellumError::Corruption("insert record truncated"));
                }
                Ok(LogRecord::Insert {
                    xid: u64::from_be_bytes(bytes[1..9].try_into().unwrap()),
                    pgno: PageNo(u32::from_be_bytes(bytes[9..13].try_into().unwrap())),
                    offset: u16::from_be_bytes(bytes[13..15].try_into().unwrap()),
                    raw: bytes[INSERT_HEADER_LEN..].to_vec(),
                })
            }
            Some(&TAG_UPDATE) => {
                let images = bytes
                    .len()
                    .checked_sub(UPDATE_HEADER_LEN)
                    .ok_or(VellumError::Corruption("update record truncated"))?;
                if images % 2 != 0 {
                    return Err(VellumError::Corruption("update record images differ in length"));
                }
                let split = UPDATE_HEADER_LEN + images / 2;
                Ok(LogRecord::Update {
                    xid: u64::from_be_bytes(bytes[1..9].try_into().unwrap()),
                    uid: Uid(u64::from_be_bytes(bytes[9..17].try_into().unwrap())),
                    old: bytes[UPDATE_HEADER_LEN..split].to_vec(),
                    new: bytes[split..].to_vec(),
                })
            }
            Some(_) => Err(VellumError::Corruption("unknown log record tag")),
            None => Err(VellumError::Corruption("empty log record")),
        }
    }
}

/// Encodes an insert record without copying `raw` first.
pub fn encode_insert(xid: Xid, pgno: PageNo, offset: u16, raw: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(INSERT_HEADER_LEN + raw.len());
    out.push(TAG_INSERT);
    out.extend_from_slice(&xid.to_be_bytes());
    out.extend_from_slice(&pgno.0.to_be_bytes());
    out.extend_from_slice(&offset.to_be_bytes());
    out.extend_from_slice(raw);
    out
}

/// Encodes an update record; `old` and `new` must have equal length.
pub fn encode_update(xid: Xid, uid: Uid, old: &[u8], new: &[u8]) -> Vec<u8> {
    debug_assert_eq!(old.len(), new.len());
    let mut out = Vec::with_capacity(UPDATE_HEADER_LEN + old.len() + new.len());
    out.push(TAG_UPDATE);
    out.extend_from_slice(&xid.to_be_bytes());
    out.extend_from_slice(&uid.0.to_be_bytes());
    out.extend_from_slice(old);
    out.extend_from_slice(new);
    out
}
