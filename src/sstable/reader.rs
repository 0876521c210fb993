use std::fs::File;
use std::io::{Read, Seek, SeekFrom};

use byteorder::{ByteOrder, LittleEndian};

use crate::errdata;
use crate::error::Result;
use crate::format::Value;

use super::block::{Block, SeekBias};
use super::FOOTER_SIZE;

/// Point-lookup reader over one SSTable file.
///
/// A lookup is two biased binary searches and one short sequential scan:
/// the index block locates the data block whose key range covers the
/// needle, the data block's chunk offsets locate the chunk, and the chunk
/// is scanned entry by entry. Blocks are read and decompressed into
/// buffers allocated per call; nothing is cached between lookups.
pub struct Reader {
    file: File,
    file_size: u64,
}

impl Reader {
    /// Wraps an open SSTable file, capturing its size.
    pub fn new(file: File) -> Result<Self> {
        let file_size = file.metadata()?.len();
        Ok(Self { file, file_size })
    }

    /// Looks up a key. Returns the stored value, tombstones included, or
    /// `None` when the key is not present in this file.
    pub fn get(&mut self, key: &[u8]) -> Result<Option<Value>> {
        let index = self.read_index_block()?;

        // The index is keyed by each data block's largest key, so the
        // candidate block is the leftmost one whose key is >= the needle.
        let pos = index.search(key, SeekBias::BeforeEqual)?;
        if pos >= index.num_chunks() {
            // Larger than the largest key in the file.
            return Ok(None);
        }

        let (block_offset, block_len) = decode_block_handle(index.value_at(pos)?)?;
        let block = self.read_data_block(block_offset, block_len)?;

        // Data block offsets index chunk first keys, so the needle's
        // chunk is the one before the returned position.
        let pos = block.search(key, SeekBias::AfterEqual)?;
        if pos == 0 {
            // Smaller than the smallest key in the block.
            return Ok(None);
        }
        block.find_in_chunk(pos - 1, key)
    }

    /// Reads the index block off the end of the file. The 8-byte footer
    /// is the tail of the index block's own trailer, so the footer's
    /// length word tells us how many trailing bytes to load.
    fn read_index_block(&mut self) -> Result<Block> {
        if self.file_size < FOOTER_SIZE as u64 {
            return errdata!("sstable of {} bytes is too short", self.file_size);
        }
        let mut footer = [0u8; FOOTER_SIZE];
        self.file.seek(SeekFrom::End(-(FOOTER_SIZE as i64)))?;
        self.file.read_exact(&mut footer)?;

        let index_len = LittleEndian::read_u32(&footer[..4]) as u64;
        if index_len < FOOTER_SIZE as u64 || index_len > self.file_size {
            return errdata!(
                "index block length {index_len} inconsistent with file size {}",
                self.file_size
            );
        }

        let mut buf = vec![0u8; index_len as usize];
        self.file.seek(SeekFrom::Start(self.file_size - index_len))?;
        self.file.read_exact(&mut buf)?;
        Block::new(buf)
    }

    /// Reads and decompresses one data block.
    fn read_data_block(&mut self, offset: u32, len: u32) -> Result<Block> {
        let end = offset as u64 + len as u64;
        if end > self.file_size {
            return errdata!("data block at {offset}+{len} extends past end of file");
        }

        let mut compressed = vec![0u8; len as usize];
        self.file.seek(SeekFrom::Start(offset as u64))?;
        self.file.read_exact(&mut compressed)?;

        let buf = snap::raw::Decoder::new().decompress_vec(&compressed)?;
        Block::new(buf)
    }
}

/// Decodes an index entry value: a live-tagged 8-byte payload holding the
/// data block's file offset and compressed length.
fn decode_block_handle(encoded: &[u8]) -> Result<(u32, u32)> {
    let value = Value::decode(encoded)?;
    let handle = match &value {
        Value::Put(bytes) if bytes.len() == 8 => bytes,
        _ => return errdata!("malformed index entry value"),
    };
    Ok((
        LittleEndian::read_u32(&handle[..4]),
        LittleEndian::read_u32(&handle[4..]),
    ))
}
