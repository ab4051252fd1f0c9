//! SSTable builder for writing sorted data to disk

use super::{
    BlockBuilder, BloomFilter, SSTableConfig, SSTableMeta, FOOTER_SIZE, FORMAT_VERSION,
    HEADER_SIZE, MAGIC,
};
use crate::{EventStoreError, Result};
use bytes::{BufMut, Bytes, BytesMut};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::PathBuf;

#[derive(Debug, Clone)]
struct IndexEntry {
    first_key: Bytes,
    last_key: Bytes,
    offset: u64,
    size: u32,
}

/// SSTable builder
///
/// Entries must be added in strictly ascending key order. The file is
/// written under a temporary name and renamed into place by
/// [`finish`](SSTableBuilder::finish).
pub struct SSTableBuilder {
    config: SSTableConfig,
    path: PathBuf,
    id: u64,
    wal_segment: u64,

    entries: Vec<(Bytes, Bytes)>,
}

impl SSTableBuilder {
    /// Create a new SSTable builder
    pub fn new(path: PathBuf, id: u64, wal_segment: u64, config: SSTableConfig) -> Self {
        Self {
            config,
            path,
            id,
            wal_segment,
            entries: Vec::new(),
        }
    }

    /// Add an entry
    pub fn add(&mut self, key: Bytes, value: Bytes) -> Result<()> {
        if let Some((last, _)) = self.entries.last() {
            if key <= *last {
                return Err(EventStoreError::Internal(
                    "SSTable keys must be added in ascending order".into(),
                ));
            }
        }
        self.entries.push((key, value));
        Ok(())
    }

    /// Build a table from already sorted entries
    pub fn build(
        path: PathBuf,
        id: u64,
        wal_segment: u64,
        entries: impl IntoIterator<Item = (Bytes, Bytes)>,
        config: SSTableConfig,
    ) -> Result<SSTableMeta> {
        let mut builder = Self::new(path, id, wal_segment, config);
        for (key, value) in entries {
            builder.add(key, value)?;
        }
        builder.finish()
    }

    /// Number of entries added so far
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if no entries were added
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Write the table to disk
    pub fn finish(self) -> Result<SSTableMeta> {
        let tmp_path = self.path.with_extension("tmp");
        let mut file = BufWriter::new(File::create(&tmp_path)?);

        file.write_all(&self.header())?;
        let mut offset = HEADER_SIZE as u64;

        let mut bloom = BloomFilter::new(self.entries.len(), self.config.bloom_bits_per_key);
        let mut index = Vec::new();
        let mut block = BlockBuilder::new();

        for (key, value) in &self.entries {
            bloom.add(key);
            block.add(key, value);

            if block.estimated_size() >= self.config.block_size {
                let full = std::mem::take(&mut block);
                offset += self.write_block(&mut file, full, offset, &mut index)?;
            }
        }
        if !block.is_empty() {
            offset += self.write_block(&mut file, block, offset, &mut index)?;
        }

        let index_offset = offset;
        let index_bytes = Self::encode_index(&index);
        file.write_all(&index_bytes)?;
        offset += index_bytes.len() as u64;

        let bloom_offset = offset;
        let bloom_bytes = Self::encode_bloom(&bloom);
        file.write_all(&bloom_bytes)?;
        offset += bloom_bytes.len() as u64;

        let mut footer = BytesMut::with_capacity(FOOTER_SIZE);
        footer.put_u64_le(index_offset);
        footer.put_u64_le(index_bytes.len() as u64);
        footer.put_u64_le(bloom_offset);
        footer.put_u64_le(bloom_bytes.len() as u64);
        footer.put_slice(MAGIC);
        file.write_all(&footer)?;

        file.flush()?;
        file.get_ref().sync_all()?;
        drop(file);
        fs::rename(&tmp_path, &self.path)?;

        let (min_key, max_key) = match (self.entries.first(), self.entries.last()) {
            (Some((first, _)), Some((last, _))) => (first.clone(), last.clone()),
            _ => (Bytes::new(), Bytes::new()),
        };

        Ok(SSTableMeta {
            path: self.path,
            id: self.id,
            entry_count: self.entries.len(),
            file_size: offset + FOOTER_SIZE as u64,
            wal_segment: self.wal_segment,
            min_key,
            max_key,
        })
    }

    fn header(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(HEADER_SIZE);
        buf.put_slice(MAGIC);
        buf.put_u32_le(FORMAT_VERSION);
        buf.put_u64_le(self.id);
        buf.put_u64_le(self.entries.len() as u64);
        buf.put_u64_le(self.wal_segment);
        buf
    }

    fn write_block(
        &self,
        file: &mut BufWriter<File>,
        block: BlockBuilder,
        offset: u64,
        index: &mut Vec<IndexEntry>,
    ) -> Result<u64> {
        let Some((first_key, last_key)) = block.key_range() else {
            return Ok(0);
        };
        let bytes = block.finish(self.config.compression);
        file.write_all(&bytes)?;

        index.push(IndexEntry {
            first_key,
            last_key,
            offset,
            size: bytes.len() as u32,
        });
        Ok(bytes.len() as u64)
    }

    fn encode_index(index: &[IndexEntry]) -> BytesMut {
        let mut buf = BytesMut::new();
        buf.put_u32_le(index.len() as u32);

        for entry in index {
            buf.put_u32_le(entry.first_key.len() as u32);
            buf.put_slice(&entry.first_key);
            buf.put_u32_le(entry.last_key.len() as u32);
            buf.put_slice(&entry.last_key);
            buf.put_u64_le(entry.offset);
            buf.put_u32_le(entry.size);
        }
        buf
    }

    fn encode_bloom(bloom: &BloomFilter) -> BytesMut {
        let data = bloom.as_bytes();
        let mut buf = BytesMut::with_capacity(5 + data.len());
        buf.put_u32_le(data.len() as u32);
        buf.put_u8(bloom.num_hashes() as u8);
        buf.put_slice(data);
        buf
    }
}
