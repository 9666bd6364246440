#![forbid(unsafe_code)]

use std::fs::{File, OpenOptions};
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};

use tracing::trace;

use crate::types::{PageNo, Result, VellumError, PAGE_SIZE};

/// Positioned reads and writes against one backing file.
pub trait FileIo: Send + Sync + 'static {
    /// Fills `dst` from `off`; reading past the end is an error.
    fn read_at(&self, off: u64, dst: &mut [u8]) -> Result<()>;
    /// Writes all of `src` at `off`, extending the file if needed.
    fn write_at(&self, off: u64, src: &[u8]) -> Result<()>;
    /// Flushes file data and metadata to stable storage.
    fn sync_all(&self) -> Result<()>;
    /// Current file length in bytes.
    fn len(&self) -> Result<u64>;
    /// Returns true if the file is empty.
    fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
    /// Sets the file length, discarding or zero-filling the tail.
    fn truncate(&self, len: u64) -> Result<()>;

    /// Reads page `pgno` into a page-sized buffer.
    fn read_page(&self, pgno: PageNo, dst: &mut [u8]) -> Result<()> {
        debug_assert_eq!(dst.len(), PAGE_SIZE);
        self.read_at(pgno.file_offset(), dst)
    }

    /// Writes a page-sized buffer as page `pgno`.
    fn write_page(&self, pgno: PageNo, src: &[u8]) -> Result<()> {
        debug_assert_eq!(src.len(), PAGE_SIZE);
        self.write_at(pgno.file_offset(), src)
    }

    /// Number of whole pages in the file.
    fn page_count(&self) -> Result<u32> {
        u32::try_from(self.len()? / PAGE_SIZE as u64)
            .map_err(|_| VellumError::Corruption("data file too large"))
    }
}

#[cfg(unix)]
fn pread(file: &File, dst: &mut [u8], off: u64) -> io::Result<usize> {
    std::os::unix::fs::FileExt::read_at(file, dst, off)
}

#[cfg(unix)]
fn pwrite(file: &File, src: &[u8], off: u64) -> io::Result<usize> {
    std::os::unix::fs::FileExt::write_at(file, src, off)
}

#[cfg(windows)]
fn pread(file: &File, dst: &mut [u8], off: u64) -> io::Result<usize> {
    std::os::windows::fs::FileExt::seek_read(file, dst, off)
}

#[cfg(windows)]
fn pwrite(file: &File, src: &[u8], off: u64) -> io::Result<usize> {
    std::os::windows::fs::FileExt::seek_write(file, src, off)
}

/// [`FileIo`] over a standard library file handle.
pub struct StdFileIo {
    file: File,
}

impl StdFileIo {
    /// Creates a brand-new file; fails if `path` already exists.
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(path)
            .map_err(|err| classify_open_error(err, path))?;
        Ok(Self { file })
    }

    /// Opens an existing file for read-write access; fails if it is absent.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|err| classify_open_error(err, path))?;
        Ok(Self { file })
    }
}

fn classify_open_error(err: io::Error, path: &Path) -> VellumError {
    let path = PathBuf::from(path);
    match err.kind() {
        ErrorKind::AlreadyExists => VellumError::FileExists(path),
        ErrorKind::NotFound => VellumError::FileNotExists(path),
        ErrorKind::PermissionDenied => VellumError::FileCannotRw(path),
        _ => VellumError::Io(err),
    }
}

impl FileIo for StdFileIo {
    fn read_at(&self, mut off: u64, mut dst: &mut [u8]) -> Result<()> {
        trace!(off, len = dst.len(), "io.read_at");
        while !dst.is_empty() {
            let read = pread(&self.file, dst, off)?;
            if read == 0 {
                let eof = io::Error::new(ErrorKind::UnexpectedEof, "read past end of file");
                return Err(eof.into());
            }
            dst = &mut std::mem::take(&mut dst)[read..];
            off += read as u64;
        }
        Ok(())
    }

    fn write_at(&self, mut off: u64, mut src: &[u8]) -> Result<()> {
        trace!(off, len = src.len(), "io.write_at");
        while !src.is_empty() {
            let written = pwrite(&self.file, src, off)?;
            if written == 0 {
                let zero = io::Error::new(ErrorKind::WriteZero, "write returned zero bytes");
                return Err(zero.into());
            }
            src = &src[written..];
            off += written as u64;
        }
        Ok(())
    }

    fn sync_all(&self) -> Result<()> {
        trace!("io.sync_all");
        self.file.sync_all()?;
        Ok(())
    }

    fn len(&self) -> Result<u64> {
        Ok(self.file.metadata()?.len())
    }

    fn truncate(&self, len: u64) -> Result<()> {
        self.file.set_len(len)?;
        Ok(())
    }
}
