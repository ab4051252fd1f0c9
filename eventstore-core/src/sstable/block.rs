//! SSTable data blocks

use crate::{EventStoreError, Result};
use bytes::{Buf, BufMut, Bytes, BytesMut};

const FLAG_RAW: u8 = 0;
const FLAG_LZ4: u8 = 1;

/// Block framing: flag + entry count + payload length, then CRC32
const BLOCK_OVERHEAD: usize = 1 + 4 + 4 + 4;

/// Accumulates sorted entries into one block payload
///
/// Entry format inside the payload:
/// - 4 bytes: key length
/// - N bytes: key
/// - 4 bytes: value length
/// - N bytes: value
pub struct BlockBuilder {
    payload: BytesMut,
    count: u32,
    first_key: Option<Bytes>,
    last_key: Option<Bytes>,
}

impl BlockBuilder {
    /// Create an empty block builder
    pub fn new() -> Self {
        Self {
            payload: BytesMut::new(),
            count: 0,
            first_key: None,
            last_key: None,
        }
    }

    /// Append an entry; keys must arrive in ascending order
    pub fn add(&mut self, key: &Bytes, value: &Bytes) {
        self.payload.put_u32_le(key.len() as u32);
        self.payload.put_slice(key);
        self.payload.put_u32_le(value.len() as u32);
        self.payload.put_slice(value);

        if self.first_key.is_none() {
            self.first_key = Some(key.clone());
        }
        self.last_key = Some(key.clone());
        self.count += 1;
    }

    /// Check if block has data
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Get entry count
    pub fn len(&self) -> usize {
        self.count as usize
    }

    /// Uncompressed payload size so far
    pub fn estimated_size(&self) -> usize {
        self.payload.len() + BLOCK_OVERHEAD
    }

    /// First and last key added
    pub fn key_range(&self) -> Option<(Bytes, Bytes)> {
        self.first_key.clone().zip(self.last_key.clone())
    }

    /// Encode the block, optionally LZ4-compressing the payload
    pub fn finish(self, use_lz4: bool) -> Bytes {
        let (flag, payload) = if use_lz4 {
            (FLAG_LZ4, lz4_flex::compress_prepend_size(&self.payload))
        } else {
            (FLAG_RAW, self.payload.to_vec())
        };

        let mut buf = BytesMut::with_capacity(payload.len() + BLOCK_OVERHEAD);
        buf.put_u8(flag);
        buf.put_u32_le(self.count);
        buf.put_u32_le(payload.len() as u32);
        buf.put_slice(&payload);

        let checksum = crc32fast::hash(&buf);
        buf.put_u32_le(checksum);

        buf.freeze()
    }
}

impl Default for BlockBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A decoded data block
#[derive(Debug, Clone)]
pub struct DataBlock {
    entries: Vec<(Bytes, Bytes)>,
    size_bytes: usize,
}

impl DataBlock {
    /// Decode a block, verifying its checksum
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < BLOCK_OVERHEAD {
            return Err(EventStoreError::InvalidFormat("Block too short".into()));
        }

        let (body, mut trailer) = data.split_at(data.len() - 4);
        let expected = trailer.get_u32_le();
        let actual = crc32fast::hash(body);
        if expected != actual {
            return Err(EventStoreError::ChecksumMismatch { expected, actual });
        }

        let mut cursor = body;
        let flag = cursor.get_u8();
        let count = cursor.get_u32_le() as usize;
        let payload_len = cursor.get_u32_le() as usize;
        if cursor.len() != payload_len {
            return Err(EventStoreError::Corruption(format!(
                "Block payload length {} does not match {} bytes",
                payload_len,
                cursor.len()
            )));
        }

        let payload = match flag {
            FLAG_RAW => Bytes::copy_from_slice(cursor),
            FLAG_LZ4 => Bytes::from(
                lz4_flex::decompress_size_prepended(cursor)
                    .map_err(|e| EventStoreError::Compression(e.to_string()))?,
            ),
            other => {
                return Err(EventStoreError::InvalidFormat(format!(
                    "Unknown block flag: {}",
                    other
                )))
            }
        };

        let size_bytes = payload.len();
        let entries = Self::parse_entries(payload, count)?;
        Ok(Self { entries, size_bytes })
    }

    fn parse_entries(mut payload: Bytes, count: usize) -> Result<Vec<(Bytes, Bytes)>> {
        let mut entries = Vec::with_capacity(count);
        for _ in 0..count {
            let key = Self::read_slice(&mut payload)?;
            let value = Self::read_slice(&mut payload)?;
            entries.push((key, value));
        }
        if payload.has_remaining() {
            return Err(EventStoreError::Corruption(
                "Trailing bytes after block entries".into(),
            ));
        }
        Ok(entries)
    }

    fn read_slice(payload: &mut Bytes) -> Result<Bytes> {
        if payload.remaining() < 4 {
            return Err(EventStoreError::Corruption("Truncated block entry".into()));
        }
        let len = payload.get_u32_le() as usize;
        if payload.remaining() < len {
            return Err(EventStoreError::Corruption("Truncated block entry".into()));
        }
        Ok(payload.split_to(len))
    }

    /// Value stored under `key`
    pub fn get(&self, key: &[u8]) -> Option<Bytes> {
        self.entries
            .binary_search_by(|(k, _)| k.as_ref().cmp(key))
            .ok()
            .map(|i| self.entries[i].1.clone())
    }

    /// Keys starting with `prefix`, ascending
    pub fn scan_prefix<'a>(&'a self, prefix: &'a [u8]) -> impl Iterator<Item = &'a Bytes> + 'a {
        let start = self.entries.partition_point(|(k, _)| k.as_ref() < prefix);
        self.entries[start..]
            .iter()
            .map(|(k, _)| k)
            .take_while(move |k| k.starts_with(prefix))
    }

    /// All entries in key order
    pub fn entries(&self) -> &[(Bytes, Bytes)] {
        &self.entries
    }

    /// Decoded payload size
    pub fn size(&self) -> usize {
        self.size_bytes
    }
}
