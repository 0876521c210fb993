use byteorder::{ByteOrder, LittleEndian, WriteBytesExt};

use crate::errdata;
use crate::error::Result;
use crate::format::{self, Value};

/// Builds one block: prefix-compressed entries grouped into chunks of
/// `chunk_size`, followed by a trailer of chunk start offsets.
///
/// Each entry is three unsigned varints (shared key length, unshared key
/// length, value length) followed by the key suffix and the value. Keys
/// are compressed against the chunk's prefix key, the first key of the
/// chunk, so the first entry of every chunk always has a shared length of
/// zero and carries its key in full.
pub struct Builder {
    buf: Vec<u8>,
    offsets: Vec<u32>,
    chunk_size: usize,
    entries_in_chunk: usize,
    prefix_key: Option<Vec<u8>>,
}

impl Builder {
    pub fn new(chunk_size: usize) -> Self {
        Self {
            buf: Vec::with_capacity(super::MAX_BLOCK_SIZE),
            offsets: Vec::new(),
            chunk_size,
            entries_in_chunk: 0,
            prefix_key: None,
        }
    }

    /// Appends an entry and returns the number of bytes it occupied. Keys
    /// must arrive in ascending order; the builder does not verify this.
    pub fn add(&mut self, key: &[u8], value: &[u8]) -> usize {
        let shared_len = match &self.prefix_key {
            Some(prefix) => shared_prefix_len(prefix, key),
            None => {
                // First entry of a chunk: record the chunk start and
                // anchor the prefix.
                self.offsets.push(self.buf.len() as u32);
                self.prefix_key = Some(key.to_vec());
                0
            }
        };

        let before = self.buf.len();
        format::put_uvarint(&mut self.buf, shared_len as u64);
        format::put_uvarint(&mut self.buf, (key.len() - shared_len) as u64);
        format::put_uvarint(&mut self.buf, value.len() as u64);
        self.buf.extend_from_slice(&key[shared_len..]);
        self.buf.extend_from_slice(value);

        self.entries_in_chunk += 1;
        if self.entries_in_chunk == self.chunk_size {
            self.entries_in_chunk = 0;
            self.prefix_key = None;
        }

        self.buf.len() - before
    }

    /// Appends the trailer and hands back the finished block, leaving the
    /// builder empty and reusable.
    pub fn finish(&mut self) -> Vec<u8> {
        let trailer_len = (self.offsets.len() + 2) * 4;
        let block_len = self.buf.len() + trailer_len;

        let mut block = std::mem::take(&mut self.buf);
        block.reserve(trailer_len);
        for offset in &self.offsets {
            block.write_u32::<LittleEndian>(*offset).unwrap();
        }
        block.write_u32::<LittleEndian>(block_len as u32).unwrap();
        block.write_u32::<LittleEndian>(self.offsets.len() as u32).unwrap();

        self.offsets.clear();
        self.entries_in_chunk = 0;
        self.prefix_key = None;

        block
    }

    /// Uncompressed bytes buffered so far, trailer excluded.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
}

fn shared_prefix_len(a: &[u8], b: &[u8]) -> usize {
    let min_len = a.len().min(b.len());
    for i in 0..min_len {
        if a[i] != b[i] {
            return i;
        }
    }
    min_len
}

/// How the binary search over chunk keys treats an exact match.
#[derive(Clone, Copy, Debug)]
pub enum SeekBias {
    /// Advance past a chunk whose probe key equals the needle. Used for
    /// data blocks, where offsets index the *first* key of each chunk:
    /// a match lives in the chunk before the returned position.
    AfterEqual,
    /// Stop at a chunk whose probe key equals the needle. Used for the
    /// index block, where entries are keyed by the *last* key of each
    /// data block: a match lives at the returned position.
    BeforeEqual,
}

/// A decoded on-disk block: the entry payload plus its chunk offset
/// trailer. Validates the trailer on construction and bound-checks every
/// access, so a truncated or corrupt block fails the read instead of
/// returning wrong data.
pub struct Block {
    buf: Vec<u8>,
    offsets_start: usize,
    num_offsets: usize,
}

impl Block {
    pub fn new(buf: Vec<u8>) -> Result<Self> {
        if buf.len() < 8 {
            return errdata!("block of {} bytes is too short for a trailer", buf.len());
        }
        let block_len = LittleEndian::read_u32(&buf[buf.len() - 8..]) as usize;
        let num_offsets = LittleEndian::read_u32(&buf[buf.len() - 4..]) as usize;
        if block_len != buf.len() {
            return errdata!(
                "block trailer says {block_len} bytes, buffer has {}",
                buf.len()
            );
        }
        let trailer_len = match num_offsets.checked_add(2).and_then(|n| n.checked_mul(4)) {
            Some(len) if len <= buf.len() => len,
            _ => return errdata!("block trailer with {num_offsets} offsets does not fit"),
        };
        Ok(Self {
            offsets_start: buf.len() - trailer_len,
            num_offsets,
            buf,
        })
    }

    /// Number of chunks recorded in the trailer.
    pub fn num_chunks(&self) -> usize {
        self.num_offsets
    }

    fn chunk_start(&self, pos: usize) -> Result<usize> {
        let offset = LittleEndian::read_u32(&self.buf[self.offsets_start + pos * 4..]) as usize;
        if offset >= self.offsets_start {
            return errdata!("chunk offset {offset} points past the entry payload");
        }
        Ok(offset)
    }

    /// Byte range of chunk `pos`: from its recorded offset to the next
    /// chunk's offset, or to the start of the trailer for the last chunk.
    fn chunk_bounds(&self, pos: usize) -> Result<(usize, usize)> {
        let start = self.chunk_start(pos)?;
        let end = if pos + 1 < self.num_offsets {
            self.chunk_start(pos + 1)?
        } else {
            self.offsets_start
        };
        if end < start {
            return errdata!("chunk offsets out of order at position {pos}");
        }
        Ok((start, end))
    }

    /// Decodes the first entry of chunk `pos` and returns its key, which
    /// is stored uncompressed.
    pub fn key_at(&self, pos: usize) -> Result<&[u8]> {
        let (key, _) = self.first_entry(pos)?;
        Ok(key)
    }

    /// Decodes the first entry of chunk `pos` and returns its value bytes.
    pub fn value_at(&self, pos: usize) -> Result<&[u8]> {
        let (_, value) = self.first_entry(pos)?;
        Ok(value)
    }

    fn first_entry(&self, pos: usize) -> Result<(&[u8], &[u8])> {
        let (start, end) = self.chunk_bounds(pos)?;
        let mut cursor = &self.buf[start..end];
        let (shared_len, suffix, value) = decode_entry(&mut cursor)?;
        if shared_len != 0 {
            return errdata!("first entry of chunk {pos} has shared length {shared_len}");
        }
        Ok((suffix, value))
    }

    /// Binary search across the chunk keys. Returns the leftmost position
    /// whose key fails the advance condition, in `[0, num_chunks]`.
    pub fn search(&self, needle: &[u8], bias: SeekBias) -> Result<usize> {
        let (mut low, mut high) = (0, self.num_offsets);
        while low < high {
            let mid = (low + high) / 2;
            let key = self.key_at(mid)?;
            let advance = match bias {
                SeekBias::AfterEqual => needle >= key,
                SeekBias::BeforeEqual => needle > key,
            };
            if advance {
                low = mid + 1;
            } else {
                high = mid;
            }
        }
        Ok(low)
    }

    /// Scans chunk `pos` sequentially for the needle. Entries after the
    /// first reconstruct their key from the chunk's prefix key and their
    /// stored suffix. Stops early once the keys pass the needle.
    pub fn find_in_chunk(&self, pos: usize, needle: &[u8]) -> Result<Option<Value>> {
        let (start, end) = self.chunk_bounds(pos)?;
        let mut cursor = &self.buf[start..end];
        let mut prefix: &[u8] = &[];
        let mut key_buf = Vec::new();
        let mut first = true;

        while !cursor.is_empty() {
            let (shared_len, suffix, value) = decode_entry(&mut cursor)?;
            let key: &[u8] = if first {
                if shared_len != 0 {
                    return errdata!("first entry of chunk {pos} has shared length {shared_len}");
                }
                first = false;
                prefix = suffix;
                suffix
            } else {
                if shared_len > prefix.len() {
                    return errdata!(
                        "entry shares {shared_len} bytes with a {}-byte prefix key",
                        prefix.len()
                    );
                }
                key_buf.clear();
                key_buf.extend_from_slice(&prefix[..shared_len]);
                key_buf.extend_from_slice(suffix);
                &key_buf
            };

            match needle.cmp(key) {
                std::cmp::Ordering::Equal => return Value::decode(value).map(Some),
                std::cmp::Ordering::Less => return Ok(None),
                std::cmp::Ordering::Greater => {}
            }
        }
        Ok(None)
    }
}

/// Decodes one entry header and payload from the front of `cursor`,
/// advancing it. Returns the shared key length, the key suffix, and the
/// value bytes.
fn decode_entry<'a>(cursor: &mut &'a [u8]) -> Result<(usize, &'a [u8], &'a [u8])> {
    let shared_len = format::take_uvarint(cursor)? as usize;
    let unshared_len = format::take_uvarint(cursor)? as usize;
    let value_len = format::take_uvarint(cursor)? as usize;
    if unshared_len
        .checked_add(value_len)
        .map_or(true, |len| len > cursor.len())
    {
        return errdata!("entry payload extends past the end of its chunk");
    }
    let (suffix, rest) = cursor.split_at(unshared_len);
    let (value, rest) = rest.split_at(value_len);
    *cursor = rest;
    Ok((shared_len, suffix, value))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block_from(entries: &[(&[u8], &[u8])], chunk_size: usize) -> Block {
        let mut builder = Builder::new(chunk_size);
        for (key, value) in entries {
            builder.add(key, value);
        }
        Block::new(builder.finish()).expect("failed to parse built block")
    }

    /// Decodes every entry of every chunk in order.
    fn decode_all(block: &Block) -> Vec<(Vec<u8>, Vec<u8>)> {
        let mut entries = Vec::new();
        for pos in 0..block.num_chunks() {
            let (start, end) = block.chunk_bounds(pos).unwrap();
            let mut cursor = &block.buf[start..end];
            let mut prefix: Vec<u8> = Vec::new();
            let mut first = true;
            while !cursor.is_empty() {
                let (shared_len, suffix, value) = decode_entry(&mut cursor).unwrap();
                let key = if first {
                    assert_eq!(shared_len, 0);
                    first = false;
                    prefix = suffix.to_vec();
                    suffix.to_vec()
                } else {
                    let mut key = prefix[..shared_len].to_vec();
                    key.extend_from_slice(suffix);
                    key
                };
                entries.push((key, value.to_vec()));
            }
        }
        entries
    }

    #[test]
    fn test_roundtrip_single_chunk() {
        let entries: Vec<(&[u8], &[u8])> = vec![
            (b"apple", b"fruit"),
            (b"application", b"software"),
            (b"apply", b"verb"),
        ];
        let block = block_from(&entries, 16);
        assert_eq!(block.num_chunks(), 1);

        let decoded = decode_all(&block);
        assert_eq!(decoded.len(), entries.len());
        for ((key, value), (dk, dv)) in entries.iter().zip(&decoded) {
            assert_eq!(&dk[..], *key);
            assert_eq!(&dv[..], *value);
        }
    }

    #[test]
    fn test_prefix_compression_layout() {
        let mut builder = Builder::new(16);
        builder.add(b"apple", b"1");
        let buf_after_first = builder.buf.clone();
        builder.add(b"application", b"2");
        builder.add(b"apply", b"3");

        // First entry: shared 0, unshared 5, full key.
        assert_eq!(&buf_after_first, &[0, 5, 1, b'a', b'p', b'p', b'l', b'e', b'1']);
        // Second entry shares "appl" with the chunk prefix "apple".
        let second = &builder.buf[buf_after_first.len()..];
        assert_eq!(&second[..3], &[4, 7, 1]);
        assert_eq!(&second[3..10], b"ication");
        // Third entry also shares "appl".
        assert_eq!(&second[11..14], &[4, 1, 1]);
        assert_eq!(second[14], b'y');
    }

    #[test]
    fn test_key_extending_the_prefix_key() {
        // The second key extends the chunk prefix exactly: its suffix is
        // the two extra bytes.
        let entries: Vec<(&[u8], &[u8])> = vec![(b"app", b"\x011"), (b"apple", b"\x012")];
        let block = block_from(&entries, 16);
        assert_eq!(
            block.find_in_chunk(0, b"apple").unwrap(),
            Some(Value::Put(b"2".to_vec()))
        );
        assert_eq!(
            block.find_in_chunk(0, b"app").unwrap(),
            Some(Value::Put(b"1".to_vec()))
        );
    }

    #[test]
    fn test_chunking_and_search_gte() {
        // Chunk size 2 over six keys: chunks [b,d], [f,h], [j,l].
        let keys: Vec<&[u8]> = vec![b"b", b"d", b"f", b"h", b"j", b"l"];
        let entries: Vec<(&[u8], &[u8])> = keys.iter().map(|k| (*k, b"x" as &[u8])).collect();
        let block = block_from(&entries, 2);
        assert_eq!(block.num_chunks(), 3);

        // AfterEqual: leftmost chunk whose first key is strictly greater
        // than the needle.
        for (needle, expected) in [
            (b"a" as &[u8], 0),
            (b"b", 1),
            (b"c", 1),
            (b"f", 2),
            (b"g", 2),
            (b"j", 3),
            (b"m", 3),
        ] {
            assert_eq!(
                block.search(needle, SeekBias::AfterEqual).unwrap(),
                expected,
                "needle {needle:?}"
            );
        }
    }

    #[test]
    fn test_search_gt() {
        // Chunk size 1, as the index block uses: every key is a chunk key.
        let entries: Vec<(&[u8], &[u8])> = vec![(b"b", b"x"), (b"d", b"x"), (b"f", b"x")];
        let block = block_from(&entries, 1);

        // BeforeEqual: leftmost chunk whose key is >= the needle.
        for (needle, expected) in [
            (b"a" as &[u8], 0),
            (b"b", 0),
            (b"c", 1),
            (b"d", 1),
            (b"e", 2),
            (b"f", 2),
            (b"g", 3),
        ] {
            assert_eq!(
                block.search(needle, SeekBias::BeforeEqual).unwrap(),
                expected,
                "needle {needle:?}"
            );
        }
    }

    #[test]
    fn test_find_in_chunk() {
        let entries: Vec<(&[u8], &[u8])> = vec![
            (b"bar", b"\x011"),
            (b"baz", b"\x012"),
            (b"foo", b"\x013"),
        ];
        let block = block_from(&entries, 16);

        assert_eq!(
            block.find_in_chunk(0, b"baz").unwrap(),
            Some(Value::Put(b"2".to_vec()))
        );
        assert_eq!(
            block.find_in_chunk(0, b"foo").unwrap(),
            Some(Value::Put(b"3".to_vec()))
        );
        // Between stored keys, and past the last key.
        assert_eq!(block.find_in_chunk(0, b"bat").unwrap(), None);
        assert_eq!(block.find_in_chunk(0, b"zzz").unwrap(), None);
    }

    #[test]
    fn test_empty_values() {
        let entries: Vec<(&[u8], &[u8])> = vec![(b"a", b"\x01"), (b"b", b"\x01")];
        let block = block_from(&entries, 16);
        assert_eq!(
            block.find_in_chunk(0, b"a").unwrap(),
            Some(Value::Put(Vec::new()))
        );
    }

    #[test]
    fn test_builder_is_reusable() {
        let mut builder = Builder::new(1);
        builder.add(b"a", b"1");
        let first = builder.finish();

        assert!(builder.is_empty());
        builder.add(b"b", b"2");
        let second = builder.finish();

        let first = Block::new(first).unwrap();
        let second = Block::new(second).unwrap();
        assert_eq!(first.key_at(0).unwrap(), b"a");
        assert_eq!(second.key_at(0).unwrap(), b"b");
    }

    #[test]
    fn test_block_rejects_truncated_buffer() {
        assert!(Block::new(vec![0; 4]).is_err());

        let mut builder = Builder::new(16);
        builder.add(b"a", b"1");
        let mut block = builder.finish();
        block.pop();
        assert!(Block::new(block).is_err());
    }

    #[test]
    fn test_block_rejects_inconsistent_trailer() {
        // Claims more offsets than the buffer can hold.
        let mut buf = vec![0u8; 8];
        LittleEndian::write_u32(&mut buf[0..4], 8);
        LittleEndian::write_u32(&mut buf[4..8], 1000);
        assert!(Block::new(buf).is_err());
    }
}
