#![forbid(unsafe_code)]

use std::convert::TryInto;
use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::primitives::io::{FileIo, StdFileIo};
use crate::types::{Result, VellumError};

const WAL_MAGIC: [u8; 4] = *b"VLMW";
const WAL_FORMAT_VERSION: u16 = 1;
const FILE_HEADER_LEN: usize = 12;
const FRAME_HEADER_LEN: usize = 8;

/// Synchronization mode applied after each appended record.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum WalSyncMode {
    /// Sync immediately after writing each record
    #[default]
    Immediate,
    /// Leave records in the OS cache until the next explicit sync or close
    Deferred,
    /// Never sync (unsafe, for testing only)
    Off,
}

/// Statistics tracking WAL operations.
#[derive(Clone, Debug, Default)]
pub struct WalStats {
    /// Number of records appended to the log
    pub records_appended: u64,
    /// Total bytes written to the log, frame headers included
    pub bytes_appended: u64,
    /// Number of sync operations performed
    pub syncs: u64,
    /// Torn bytes discarded when the log was opened
    pub truncated_bytes: u64,
}

fn encode_file_header() -> [u8; FILE_HEADER_LEN] {
    let mut buf = [0u8; FILE_HEADER_LEN];
    buf[0..4].copy_from_slice(&WAL_MAGIC);
    buf[4..6].copy_from_slice(&WAL_FORMAT_VERSION.to_be_bytes());
    let crc = crc32fast::hash(&buf[..8]);
    buf[8..12].copy_from_slice(&crc.to_be_bytes());
    buf
}

fn check_file_header(header: &[u8; FILE_HEADER_LEN]) -> Result<()> {
    if header[0..4] != WAL_MAGIC {
        return Err(VellumError::Corruption("wal magic mismatch"));
    }
    let version = u16::from_be_bytes(header[4..6].try_into().unwrap());
    if version != WAL_FORMAT_VERSION {
        return Err(VellumError::Corruption("wal format version mismatch"));
    }
    if header[6..8] != [0, 0] {
        return Err(VellumError::Corruption("wal reserved header bytes non-zero"));
    }
    let stored_crc = u32::from_be_bytes(header[8..12].try_into().unwrap());
    if crc32fast::hash(&header[..8]) != stored_crc {
        return Err(VellumError::Corruption("wal header crc mismatch"));
    }
    Ok(())
}

/// Reads the frame at `offset`, returning `None` if it is truncated or fails
/// its checksum. Frames are `[len:4][crc32:4][payload]`.
fn read_frame(io: &dyn FileIo, offset: u64, end: u64) -> Result<Option<Vec<u8>>> {
    if offset + FRAME_HEADER_LEN as u64 > end {
        return Ok(None);
    }
    let mut header = [0u8; FRAME_HEADER_LEN];
    io.read_at(offset, &mut header)?;
    let len = u32::from_be_bytes(header[0..4].try_into().unwrap());
    let crc = u32::from_be_bytes(header[4..8].try_into().unwrap());
    let payload_off = offset + FRAME_HEADER_LEN as u64;
    if payload_off + u64::from(len) > end {
        return Ok(None);
    }
    let mut payload = vec![0u8; len as usize];
    io.read_at(payload_off, &mut payload)?;
    if crc32fast::hash(&payload) != crc {
        return Ok(None);
    }
    Ok(Some(payload))
}

struct WalState {
    append_offset: u64,
    read_offset: u64,
    stats: WalStats,
}

/// Append-only log of opaque, length-framed records.
///
/// Appends and the read cursor are serialized by one mutex, so concurrent
/// writers never interleave partial frames and a reader never observes a
/// frame before it is fully written.
pub struct Wal {
    io: Arc<dyn FileIo>,
    sync_mode: WalSyncMode,
    state: Mutex<WalState>,
}

impl Wal {
    /// Creates a new log at `path`; fails if the file exists.
    pub fn create(path: impl AsRef<Path>, sync_mode: WalSyncMode) -> Result<Self> {
        let path = path.as_ref();
        let io: Arc<dyn FileIo> = Arc::new(StdFileIo::create(path)?);
        io.write_at(0, &encode_file_header())?;
        io.sync_all()?;
        info!(path = %path.display(), "wal.create");
        Ok(Self::with_io(io, sync_mode, FILE_HEADER_LEN as u64, 0))
    }

    /// Opens an existing log at `path`, discarding any torn tail.
    pub fn open(path: impl AsRef<Path>, sync_mode: WalSyncMode) -> Result<Self> {
        let path = path.as_ref();
        let io: Arc<dyn FileIo> = Arc::new(StdFileIo::open(path)?);
        let len = io.len()?;
        if len < FILE_HEADER_LEN as u64 {
            return Err(VellumError::Corruption("wal header truncated"));
        }
        let mut header = [0u8; FILE_HEADER_LEN];
        io.read_at(0, &mut header)?;
        check_file_header(&header)?;

        let mut valid_up_to = FILE_HEADER_LEN as u64;
        let mut records = 0u64;
        while let Some(payload) = read_frame(io.as_ref(), valid_up_to, len)? {
            valid_up_to += (FRAME_HEADER_LEN + payload.len()) as u64;
            records += 1;
        }
        let truncated = len - valid_up_to;
        if truncated > 0 {
            warn!(
                path = %path.display(),
                valid_up_to,
                truncated,
                "wal.open.truncated_tail"
            );
            io.truncate(valid_up_to)?;
            io.sync_all()?;
        }
        info!(path = %path.display(), records, "wal.open");
        Ok(Self::with_io(io, sync_mode, valid_up_to, truncated))
    }

    fn with_io(
        io: Arc<dyn FileIo>,
        sync_mode: WalSyncMode,
        append_offset: u64,
        truncated_bytes: u64,
    ) -> Self {
        Self {
            io,
            sync_mode,
            state: Mutex::new(WalState {
                append_offset,
                read_offset: FILE_HEADER_LEN as u64,
                stats: WalStats {
                    truncated_bytes,
                    ..WalStats::default()
                },
            }),
        }
    }

    /// Appends one record, syncing per the configured mode.
    pub fn log(&self, record: &[u8]) -> Result<()> {
        let len = u32::try_from(record.len())
            .map_err(|_| VellumError::Invalid("wal record too large"))?;
        let mut frame = Vec::with_capacity(FRAME_HEADER_LEN + record.len());
        frame.extend_from_slice(&len.to_be_bytes());
        frame.extend_from_slice(&crc32fast::hash(record).to_be_bytes());
        frame.extend_from_slice(record);

        let mut state = self.state.lock();
        self.io.write_at(state.append_offset, &frame)?;
        if self.sync_mode == WalSyncMode::Immediate {
            self.io.sync_all()?;
            state.stats.syncs += 1;
        }
        state.append_offset += frame.len() as u64;
        state.stats.records_appended += 1;
        state.stats.bytes_appended += frame.len() as u64;
        Ok(())
    }

    /// Resets the read cursor to the first record.
    pub fn rewind(&self) {
        self.state.lock().read_offset = FILE_HEADER_LEN as u64;
    }

    #[allow(clippy::should_implement_trait)]
    /// Returns the record under the read cursor and advances past it, or
    /// `None` at the end of the log.
    pub fn next(&self) -> Result<Option<Vec<u8>>> {
        let mut state = self.state.lock();
        let record = read_frame(self.io.as_ref(), state.read_offset, state.append_offset)?;
        if let Some(payload) = &record {
            state.read_offset += (FRAME_HEADER_LEN + payload.len()) as u64;
        }
        Ok(record)
    }

    /// Syncs all appended records to persistent storage.
    pub fn sync(&self) -> Result<()> {
        if self.sync_mode == WalSyncMode::Off {
            return Ok(());
        }
        let mut state = self.state.lock();
        self.io.sync_all()?;
        state.stats.syncs += 1;
        Ok(())
    }

    /// Flushes the log ahead of shutdown.
    pub fn close(&self) -> Result<()> {
        self.sync()?;
        debug!(stats = ?self.stats(), "wal.close");
        Ok(())
    }

    /// Returns current statistics for this WAL instance.
    pub fn stats(&self) -> WalStats {
        self.state.lock().stats.clone()
    }

    /// Returns the total size of the WAL file in bytes.
    pub fn len(&self) -> u64 {
        self.state.lock().append_offset
    }

    /// Returns true if the WAL contains no records.
    pub fn is_empty(&self) -> bool {
        self.len() <= FILE_HEADER_LEN as u64
    }
}
