use std::path::PathBuf;

/// Default memtable byte budget before the active memtable is rotated out.
pub const DEFAULT_MEMTABLE_SIZE_LIMIT: usize = 15 * 1024;

/// Configuration for an emberdb store.
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory path for the database.
    pub dir: PathBuf,

    /// Maximum size of a memtable before writes rotate to a fresh one (default: 15KiB).
    pub memtable_size_limit: usize,

    /// Combined size of queued memtables that triggers a flush of the
    /// non-active ones (default: one memtable size limit).
    pub memtable_flush_threshold: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("./emberdb"),
            memtable_size_limit: DEFAULT_MEMTABLE_SIZE_LIMIT,
            memtable_flush_threshold: DEFAULT_MEMTABLE_SIZE_LIMIT,
        }
    }
}

impl Config {
    /// Create a new config with the given directory.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            ..Default::default()
        }
    }

    /// Set the memtable size limit.
    pub fn memtable_size_limit(mut self, size: usize) -> Self {
        self.memtable_size_limit = size;
        self
    }

    /// Set the flush threshold.
    pub fn memtable_flush_threshold(mut self, size: usize) -> Self {
        self.memtable_flush_threshold = size;
        self
    }
}
