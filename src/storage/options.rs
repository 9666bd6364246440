use crate::primitives::wal::WalSyncMode;

/// Durability mode for write-ahead log synchronization.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum Synchronous {
    /// Sync the log after every record (most durable).
    #[default]
    Full,
    /// Write records to the OS and sync only on close (balanced).
    Normal,
    /// No explicit syncs (fastest but least durable).
    Off,
}

impl Synchronous {
    /// Returns the string representation of the synchronous mode.
    pub fn as_str(self) -> &'static str {
        match self {
            Synchronous::Full => "full",
            Synchronous::Normal => "normal",
            Synchronous::Off => "off",
        }
    }

    /// Parses a synchronous mode from a string (case-insensitive).
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "full" => Some(Synchronous::Full),
            "normal" => Some(Synchronous::Normal),
            "off" => Some(Synchronous::Off),
            _ => None,
        }
    }

    pub(crate) fn wal_mode(self) -> WalSyncMode {
        match self {
            Synchronous::Full => WalSyncMode::Immediate,
            Synchronous::Normal => WalSyncMode::Deferred,
            Synchronous::Off => WalSyncMode::Off,
        }
    }
}

/// Configuration options supplied when creating or opening a
/// [`DataManager`](super::DataManager).
#[derive(Clone, Debug)]
pub struct StoreOptions {
    /// Bytes of memory the page cache may use; divided by the page size to
    /// bound resident pages.
    pub memory_budget: u64,
    /// Durability mode for the write-ahead log.
    pub synchronous: Synchronous,
    /// Maximum resident data items (0 means unbounded).
    pub item_cache_limit: usize,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            memory_budget: 64 << 20,
            synchronous: Synchronous::Full,
            item_cache_limit: 0,
        }
    }
}

impl StoreOptions {
    /// Sets the page cache memory budget in bytes.
    pub fn memory_budget(mut self, bytes: u64) -> Self {
        self.memory_budget = bytes;
        self
    }

    /// Sets the write-ahead log durability mode.
    pub fn synchronous(mut self, mode: Synchronous) -> Self {
        self.synchronous = mode;
        self
    }

    /// Caps the number of resident data items.
    pub fn item_cache_limit(mut self, limit: usize) -> Self {
        self.item_cache_limit = limit;
        self
    }
}
