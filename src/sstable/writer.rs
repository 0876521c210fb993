use std::fs::File;
use std::io::{BufWriter, Write};

use byteorder::{LittleEndian, WriteBytesExt};

use crate::error::Result;
use crate::format::Value;
use crate::memtable::Memtable;

use super::block::Builder;
use super::{BLOCK_FLUSH_THRESHOLD, DATA_BLOCK_CHUNK_SIZE, INDEX_BLOCK_CHUNK_SIZE};

/// Streams a memtable into an SSTable file: snappy-compressed data
/// blocks, then the uncompressed index block whose final trailer words
/// double as the file footer.
pub struct Writer {
    out: BufWriter<File>,
    data_block: Builder,
    index_block: Builder,
    compressor: snap::raw::Encoder,
    compression_buf: Vec<u8>,
    /// Compressed bytes flushed to the file so far; the start offset of
    /// the next data block.
    offset: u32,
    /// Uncompressed bytes in the data block under construction.
    bytes_written: usize,
    /// Last key added to the data block under construction. Becomes the
    /// block's index key, since memtable iteration is ascending.
    last_key: Vec<u8>,
}

impl Writer {
    pub fn new(file: File) -> Self {
        Self {
            out: BufWriter::new(file),
            data_block: Builder::new(DATA_BLOCK_CHUNK_SIZE),
            index_block: Builder::new(INDEX_BLOCK_CHUNK_SIZE),
            compressor: snap::raw::Encoder::new(),
            compression_buf: Vec::new(),
            offset: 0,
            bytes_written: 0,
            last_key: Vec::new(),
        }
    }

    /// Writes the memtable's entries, tombstones included, followed by
    /// the index block. Call [`Writer::close`] afterwards to sync the
    /// file.
    pub fn write(&mut self, memtable: &Memtable) -> Result<()> {
        for (key, value) in memtable.iter() {
            let encoded = value.encode();
            self.bytes_written += self.data_block.add(&key, &encoded);
            self.last_key = key;

            if self.bytes_written > BLOCK_FLUSH_THRESHOLD {
                self.flush_data_block()?;
            }
        }
        self.flush_data_block()?;

        let index = self.index_block.finish();
        self.out.write_all(&index)?;
        Ok(())
    }

    /// Compresses and writes out the data block under construction, and
    /// records it in the index block keyed by its largest key.
    fn flush_data_block(&mut self) -> Result<()> {
        if self.bytes_written == 0 {
            return Ok(());
        }

        let block = self.data_block.finish();
        self.compression_buf
            .resize(snap::raw::max_compress_len(block.len()), 0);
        let compressed_len = self
            .compressor
            .compress(&block, &mut self.compression_buf)?;
        self.out.write_all(&self.compression_buf[..compressed_len])?;

        let mut handle = Vec::with_capacity(8);
        handle.write_u32::<LittleEndian>(self.offset).unwrap();
        handle.write_u32::<LittleEndian>(compressed_len as u32).unwrap();
        self.index_block
            .add(&self.last_key, &Value::Put(handle).encode());

        self.offset += compressed_len as u32;
        self.bytes_written = 0;
        Ok(())
    }

    /// Flushes buffered bytes and fsyncs the file.
    pub fn close(mut self) -> Result<()> {
        self.out.flush()?;
        self.out.get_ref().sync_all()?;
        Ok(())
    }
}
