//! In-memory sorted write buffer, the first tier of the store.
//!
//! A memtable is an ordered probabilistic index (a skip list) plus
//! approximate size accounting against a fixed byte budget. The
//! coordinator consults [`Memtable::has_room_for_write`] before every
//! write and rotates to a fresh memtable when the budget is exhausted;
//! the memtable itself never rejects a write. Once rotated out, a
//! memtable is read-only by convention until it is flushed into an
//! SSTable and dropped.

use crate::format::Value;
use crossbeam_skiplist::SkipMap;

/// Size-bounded in-memory sorted table.
///
/// Upserts are handled by the skip list: a later insert of the same key
/// replaces the earlier value, so at most one version of a key is live
/// within a single memtable.
#[derive(Debug)]
pub struct Memtable {
    data: SkipMap<Vec<u8>, Value>,
    size_used: usize,
    size_limit: usize,
}

impl Memtable {
    /// Creates an empty memtable with the given byte budget.
    pub fn new(size_limit: usize) -> Self {
        Self {
            data: SkipMap::new(),
            size_used: 0,
            size_limit,
        }
    }

    /// Whether an entry of this key and value fits in the remaining budget.
    /// The one-byte operation tag is not counted; the check is a
    /// conservative approximation, not an exact fit test.
    pub fn has_room_for_write(&self, key: &[u8], value: &[u8]) -> bool {
        key.len() + value.len() <= self.size_limit.saturating_sub(self.size_used)
    }

    /// Inserts or updates a live key-value pair.
    pub fn insert(&mut self, key: &[u8], value: &[u8]) {
        self.data.insert(key.to_vec(), Value::Put(value.to_vec()));
        self.size_used += key.len() + value.len() + 1;
    }

    /// Inserts a deletion marker for the key.
    pub fn insert_tombstone(&mut self, key: &[u8]) {
        self.data.insert(key.to_vec(), Value::Tombstone);
        self.size_used += key.len() + 1;
    }

    /// Retrieves the stored value for a key, tombstones included.
    pub fn get(&self, key: &[u8]) -> Option<Value> {
        self.data.get(key).map(|entry| entry.value().clone())
    }

    /// Approximate bytes used so far.
    pub fn size(&self) -> usize {
        self.size_used
    }

    /// Iterates over all entries in ascending key order.
    pub fn iter(&self) -> impl Iterator<Item = (Vec<u8>, Value)> + '_ {
        self.data
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
    }
}
