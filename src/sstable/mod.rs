//! Immutable, sorted, block-structured table files.
//!
//! ## File layout
//!
//! ```text
//! +--------------------------------+
//! | data block 0 (snappy)          |
//! +--------------------------------+
//! | data block 1 (snappy)          |
//! +--------------------------------+
//! | ...                            |
//! +--------------------------------+
//! | index block (uncompressed)     |
//! +--------------------------------+
//! | footer (8 bytes)               |
//! +--------------------------------+
//! ```
//!
//! Both block kinds share one layout: prefix-compressed entries grouped
//! into chunks, followed by a trailer of little-endian `u32` chunk start
//! offsets plus the total block length and the offset count. Data blocks
//! group sixteen entries per chunk; the index block indexes every entry
//! (chunk size one), keyed by the last key of each data block, with an
//! 8-byte `(offset, length)` handle as the value.
//!
//! The footer is the final 8 bytes of the file: the index block's length
//! and its offset count. It doubles as the tail of the index block's own
//! trailer, so the index block is recovered by reading that many bytes
//! from the end of the file.

mod block;
mod reader;
mod writer;

pub use reader::Reader;
pub use writer::Writer;

/// Target uncompressed size for a data block.
pub const MAX_BLOCK_SIZE: usize = 4 << 10;

/// A data block is cut once its uncompressed size exceeds this. Advisory:
/// the entry that crosses the line still lands in the block.
pub(crate) const BLOCK_FLUSH_THRESHOLD: usize = MAX_BLOCK_SIZE * 9 / 10;

pub(crate) const FOOTER_SIZE: usize = 8;

pub(crate) const DATA_BLOCK_CHUNK_SIZE: usize = 16;
pub(crate) const INDEX_BLOCK_CHUNK_SIZE: usize = 1;
