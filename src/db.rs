//! The database coordinator: routes writes into the active memtable,
//! rotates memtables when they fill, flushes frozen memtables into
//! SSTables, and resolves reads across both tiers newest-first.

use std::mem;

use crate::config::Config;
use crate::error::Result;
use crate::memtable::Memtable;
use crate::sstable;
use crate::storage::{FileMeta, Provider};

/// A single-node, embedded, write-optimized key-value store.
///
/// All operations run on the caller's thread; flushes happen
/// synchronously inside `set` and `delete`. A `Db` is not safe to share
/// across threads.
///
/// Durability: only flushed SSTables survive a crash. Whatever is still
/// in the memtables is lost, since there is no write-ahead log.
pub struct Db {
    config: Config,
    storage: Provider,
    /// Flushed SSTables, ascending file number, so newest last.
    sstables: Vec<FileMeta>,
    active_memtable: Memtable,
    /// Rotated-out memtables awaiting flush, oldest first. Read-only by
    /// convention: only the active memtable takes writes.
    frozen_memtables: Vec<Memtable>,
}

impl Db {
    /// Opens a store in the given directory with default configuration.
    pub fn open(dir: &str) -> Result<Self> {
        Self::open_with_config(Config::new(dir))
    }

    /// Opens a store with custom configuration. SSTables from previous
    /// runs are picked up and served immediately.
    pub fn open_with_config(config: Config) -> Result<Self> {
        let storage = Provider::open(&config.dir)?;
        let sstables = storage.list_files()?;
        let active_memtable = Memtable::new(config.memtable_size_limit);
        Ok(Self {
            config,
            storage,
            sstables,
            active_memtable,
            frozen_memtables: Vec::new(),
        })
    }

    /// Inserts or updates a key-value pair.
    pub fn set(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        if !self.active_memtable.has_room_for_write(key, value) {
            self.rotate_memtables();
        }
        self.active_memtable.insert(key, value);
        self.maybe_flush()
    }

    /// Deletes a key by writing a tombstone, which shadows any older
    /// version of the key in lower tiers.
    pub fn delete(&mut self, key: &[u8]) -> Result<()> {
        if !self.active_memtable.has_room_for_write(key, &[]) {
            self.rotate_memtables();
        }
        self.active_memtable.insert_tombstone(key);
        self.maybe_flush()
    }

    /// Retrieves the most recent live value for a key. Scans memtables
    /// newest to oldest, then SSTables newest to oldest; the first hit
    /// wins, and a tombstone hit means the key is gone.
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        if let Some(value) = self.active_memtable.get(key) {
            tracing::debug!(key = ?String::from_utf8_lossy(key), "found in active memtable");
            return Ok(value.into_bytes());
        }
        for (i, memtable) in self.frozen_memtables.iter().enumerate().rev() {
            if let Some(value) = memtable.get(key) {
                tracing::debug!(
                    key = ?String::from_utf8_lossy(key),
                    memtable = i,
                    tombstone = value.is_tombstone(),
                    "found in frozen memtable"
                );
                return Ok(value.into_bytes());
            }
        }

        for meta in self.sstables.iter().rev() {
            let file = self.storage.open_for_reading(meta)?;
            let mut reader = sstable::Reader::new(file)?;
            if let Some(value) = reader.get(key)? {
                tracing::debug!(
                    key = ?String::from_utf8_lossy(key),
                    sstable = meta.file_num(),
                    tombstone = value.is_tombstone(),
                    "found in sstable"
                );
                return Ok(value.into_bytes());
            }
        }

        Ok(None)
    }

    /// Freezes the active memtable by pushing it onto the frozen queue
    /// and installing a fresh one. The write that triggered the rotation
    /// goes into the fresh memtable unconditionally, so a single entry
    /// larger than the whole budget still succeeds.
    fn rotate_memtables(&mut self) {
        let frozen = mem::replace(
            &mut self.active_memtable,
            Memtable::new(self.config.memtable_size_limit),
        );
        tracing::debug!(size = frozen.size(), "rotated memtable");
        self.frozen_memtables.push(frozen);
    }

    /// Flushes all frozen memtables once the combined memtable size
    /// crosses the configured threshold.
    fn maybe_flush(&mut self) -> Result<()> {
        let total: usize = self.active_memtable.size()
            + self.frozen_memtables.iter().map(Memtable::size).sum::<usize>();
        if total <= self.config.memtable_flush_threshold {
            return Ok(());
        }
        self.flush_memtables()
    }

    /// Writes each frozen memtable to its own SSTable, oldest first, and
    /// drops it. On error the failed memtable and everything newer stay
    /// queued; a partial file may remain in the directory, but its
    /// number is never reused and it is not added to the live set.
    fn flush_memtables(&mut self) -> Result<()> {
        while !self.frozen_memtables.is_empty() {
            let memtable = &self.frozen_memtables[0];
            let meta = self.storage.prepare_new_file();

            let file = self.storage.open_for_writing(&meta)?;
            let mut writer = sstable::Writer::new(file);
            writer.write(memtable)?;
            writer.close()?;

            tracing::info!(
                sstable = meta.file_num(),
                size = memtable.size(),
                "flushed memtable"
            );
            self.sstables.push(meta);
            self.frozen_memtables.remove(0);
        }
        Ok(())
    }
}
