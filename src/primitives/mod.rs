//! Low-level primitives for building the storage engine.
//!
//! Includes positioned file I/O, the reference-counted cache, paging and
//! write-ahead logging (WAL).

/// Reference-counted resource cache.
///
/// Shared by the page cache and the data-item cache.
pub mod cache;

/// I/O abstractions and utilities.
///
/// Interfaces for reading/writing data and file operations.
pub mod io;

/// Paging subsystem.
///
/// Page buffers, the page cache, the page-one marker and the free-space index.
pub mod pager;

/// Write-ahead logging (WAL) for crash recovery.
///
/// Ensures durability through sequential logging of data-item mutations.
pub mod wal;
