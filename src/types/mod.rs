#![forbid(unsafe_code)]
//! Identifiers, error type and on-disk constants shared across the engine.

use std::fmt;
use std::path::PathBuf;

use tracing::error;

/// Size in bytes of every page in the data file.
pub const PAGE_SIZE: usize = 1 << 13;

/// Reserved page holding the open/close validation marker.
pub const META_PAGE: PageNo = PageNo(1);

/// One-based page number inside the data file.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Default)]
pub struct PageNo(pub u32);

impl PageNo {
    /// Byte offset of this page inside the data file.
    pub fn file_offset(self) -> u64 {
        u64::from(self.0.saturating_sub(1)) * PAGE_SIZE as u64
    }
}

impl fmt::Display for PageNo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Global identifier of a data item: `(page << 32) | offset`.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Default)]
pub struct Uid(pub u64);

impl Uid {
    /// Builds a uid from a page number and an in-page offset.
    pub fn new(page: PageNo, offset: u16) -> Self {
        Uid((u64::from(page.0) << 32) | u64::from(offset))
    }

    /// Page holding the item.
    pub fn page(self) -> PageNo {
        PageNo((self.0 >> 32) as u32)
    }

    /// Offset of the item inside its page.
    pub fn offset(self) -> u16 {
        (self.0 & 0xFFFF) as u16
    }

    /// Returns true for the null uid used as "no sibling" / "no child".
    pub fn is_null(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for Uid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.page().0, self.offset())
    }
}

/// Transaction identifier issued by the transaction-status oracle.
pub type Xid = u64;

/// Recoverable errors returned by engine operations.
#[allow(missing_docs)]
#[derive(thiserror::Error, Debug)]
pub enum VellumError {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),
    #[error("corruption: {0}")]
    Corruption(&'static str),
    #[error("invalid argument: {0}")]
    Invalid(&'static str),
    #[error("file already exists: {}", .0.display())]
    FileExists(PathBuf),
    #[error("file does not exist: {}", .0.display())]
    FileNotExists(PathBuf),
    #[error("file cannot be read or written: {}", .0.display())]
    FileCannotRw(PathBuf),
    #[error("memory budget of {budget} bytes is below the {min}-page minimum")]
    MemTooSmall { budget: u64, min: usize },
    #[error("cache is full")]
    CacheFull,
    #[error("data too large: {len} bytes (max {max})")]
    DataTooLarge { len: usize, max: usize },
    #[error("database busy")]
    DatabaseBusy,
    #[error("not found")]
    NotFound,
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, VellumError>;

/// Logs the violated invariant and aborts the process.
pub fn fatal(context: &'static str, err: impl fmt::Display) -> ! {
    error!(context, error = %err, "vellum.fatal");
    std::process::abort()
}
