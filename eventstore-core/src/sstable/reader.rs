//! SSTable reader

use super::{
    BloomFilter, DataBlock, SSTableMeta, FOOTER_SIZE, FORMAT_VERSION, HEADER_SIZE, MAGIC,
};
use crate::{EventStoreError, Result};
use bytes::{Buf, Bytes};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Decoded-block cache budget per table
const BLOCK_CACHE_SIZE: usize = 8 * 1024 * 1024;

/// SSTable reader
pub struct SSTableReader {
    path: PathBuf,
    meta: SSTableMeta,
    index: Vec<IndexEntry>,
    bloom_filter: BloomFilter,
    cache: RwLock<BlockCache>,
}

#[derive(Debug, Clone)]
struct IndexEntry {
    first_key: Bytes,
    last_key: Bytes,
    offset: u64,
    size: u32,
}

struct BlockCache {
    blocks: BTreeMap<u64, Arc<DataBlock>>,
    max_size: usize,
    current_size: usize,
}

impl BlockCache {
    fn new(max_size: usize) -> Self {
        Self {
            blocks: BTreeMap::new(),
            max_size,
            current_size: 0,
        }
    }

    fn get(&self, offset: u64) -> Option<Arc<DataBlock>> {
        self.blocks.get(&offset).cloned()
    }

    fn insert(&mut self, offset: u64, block: Arc<DataBlock>) {
        let size = block.size();
        while self.current_size + size > self.max_size {
            // Evict lowest offset first
            match self.blocks.pop_first() {
                Some((_, removed)) => self.current_size -= removed.size(),
                None => break,
            }
        }
        self.current_size += size;
        if let Some(previous) = self.blocks.insert(offset, block) {
            self.current_size -= previous.size();
        }
    }
}

impl SSTableReader {
    /// Open an SSTable file
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut file = File::open(&path)?;
        let file_size = file.metadata()?.len();

        if file_size < (HEADER_SIZE + FOOTER_SIZE) as u64 {
            return Err(EventStoreError::InvalidFormat(format!(
                "SSTable {:?} too short: {} bytes",
                path, file_size
            )));
        }

        file.seek(SeekFrom::End(-(FOOTER_SIZE as i64)))?;
        let mut footer = [0u8; FOOTER_SIZE];
        file.read_exact(&mut footer)?;

        let mut cursor = &footer[..];
        let index_offset = cursor.get_u64_le();
        let index_size = cursor.get_u64_le();
        let bloom_offset = cursor.get_u64_le();
        let bloom_size = cursor.get_u64_le();
        if cursor != MAGIC {
            return Err(EventStoreError::InvalidFormat("Invalid SSTable magic".into()));
        }

        file.seek(SeekFrom::Start(0))?;
        let mut header = [0u8; HEADER_SIZE];
        file.read_exact(&mut header)?;

        let mut cursor = &header[..];
        if &cursor[..4] != MAGIC {
            return Err(EventStoreError::InvalidFormat("Invalid SSTable header".into()));
        }
        cursor.advance(4);

        let version = cursor.get_u32_le();
        if version != FORMAT_VERSION {
            return Err(EventStoreError::InvalidFormat(format!(
                "Unsupported version: {}",
                version
            )));
        }

        let id = cursor.get_u64_le();
        let entry_count = cursor.get_u64_le() as usize;
        let wal_segment = cursor.get_u64_le();

        let index = Self::parse_index(&Self::read_at(&mut file, index_offset, index_size)?)?;
        let bloom_filter = Self::parse_bloom(&Self::read_at(&mut file, bloom_offset, bloom_size)?)?;

        let (min_key, max_key) = match (index.first(), index.last()) {
            (Some(first), Some(last)) => (first.first_key.clone(), last.last_key.clone()),
            _ => (Bytes::new(), Bytes::new()),
        };

        let meta = SSTableMeta {
            path: path.clone(),
            id,
            entry_count,
            file_size,
            wal_segment,
            min_key,
            max_key,
        };

        Ok(Self {
            path,
            meta,
            index,
            bloom_filter,
            cache: RwLock::new(BlockCache::new(BLOCK_CACHE_SIZE)),
        })
    }

    /// Get SSTable metadata
    pub fn meta(&self) -> &SSTableMeta {
        &self.meta
    }

    /// Table ID
    pub fn id(&self) -> u64 {
        self.meta.id
    }

    /// File path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Check if the table may contain `key` (bloom filter)
    pub fn may_contain(&self, key: &[u8]) -> bool {
        self.meta.may_contain_key(key) && self.bloom_filter.may_contain(key)
    }

    /// Value stored under `key`
    pub fn get(&self, key: &[u8]) -> Result<Option<Bytes>> {
        if !self.may_contain(key) {
            return Ok(None);
        }

        let pos = self.index.partition_point(|e| e.last_key.as_ref() < key);
        match self.index.get(pos) {
            Some(entry) if entry.first_key.as_ref() <= key => {
                Ok(self.read_block(entry)?.get(key))
            }
            _ => Ok(None),
        }
    }

    /// Keys starting with `prefix`, ascending
    pub fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<Bytes>> {
        let mut keys = Vec::new();
        if !self.meta.may_contain_prefix(prefix) {
            return Ok(keys);
        }

        let start = self.index.partition_point(|e| e.last_key.as_ref() < prefix);
        for entry in &self.index[start..] {
            if entry.first_key.as_ref() > prefix && !entry.first_key.starts_with(prefix) {
                break;
            }
            let block = self.read_block(entry)?;
            keys.extend(block.scan_prefix(prefix).cloned());
        }

        Ok(keys)
    }

    /// Every entry in key order
    pub fn entries(&self) -> Result<Vec<(Bytes, Bytes)>> {
        let mut entries = Vec::with_capacity(self.meta.entry_count);
        for entry in &self.index {
            entries.extend_from_slice(self.read_block(entry)?.entries());
        }
        Ok(entries)
    }

    fn read_block(&self, entry: &IndexEntry) -> Result<Arc<DataBlock>> {
        if let Some(block) = self.cache.read().get(entry.offset) {
            return Ok(block);
        }

        let mut file = File::open(&self.path)?;
        let data = Self::read_at(&mut file, entry.offset, entry.size as u64)?;
        let block = Arc::new(DataBlock::from_bytes(&data)?);

        self.cache.write().insert(entry.offset, block.clone());
        Ok(block)
    }

    fn read_at(file: &mut File, offset: u64, size: u64) -> Result<Vec<u8>> {
        file.seek(SeekFrom::Start(offset))?;
        let mut data = vec![0u8; size as usize];
        file.read_exact(&mut data)?;
        Ok(data)
    }

    fn parse_index(data: &[u8]) -> Result<Vec<IndexEntry>> {
        let mut cursor = data;
        let count = Self::take_u32(&mut cursor)? as usize;
        let mut entries = Vec::with_capacity(count);

        for _ in 0..count {
            let first_key = Self::take_key(&mut cursor)?;
            let last_key = Self::take_key(&mut cursor)?;
            if cursor.remaining() < 12 {
                return Err(EventStoreError::Corruption("Truncated SSTable index".into()));
            }
            let offset = cursor.get_u64_le();
            let size = cursor.get_u32_le();

            entries.push(IndexEntry {
                first_key,
                last_key,
                offset,
                size,
            });
        }

        Ok(entries)
    }

    fn take_u32(cursor: &mut &[u8]) -> Result<u32> {
        if cursor.remaining() < 4 {
            return Err(EventStoreError::Corruption("Truncated SSTable index".into()));
        }
        Ok(cursor.get_u32_le())
    }

    fn take_key(cursor: &mut &[u8]) -> Result<Bytes> {
        let len = Self::take_u32(cursor)? as usize;
        if cursor.remaining() < len {
            return Err(EventStoreError::Corruption("Truncated SSTable index".into()));
        }
        let key = Bytes::copy_from_slice(&cursor[..len]);
        cursor.advance(len);
        Ok(key)
    }

    fn parse_bloom(data: &[u8]) -> Result<BloomFilter> {
        if data.len() < 5 {
            return Err(EventStoreError::InvalidFormat(
                "Bloom filter data too short".into(),
            ));
        }

        let mut cursor = data;
        let size = cursor.get_u32_le() as usize;
        let num_hashes = cursor.get_u8() as usize;
        if cursor.len() < size {
            return Err(EventStoreError::Corruption("Truncated bloom filter".into()));
        }

        Ok(BloomFilter::from_bytes(cursor[..size].to_vec(), num_hashes))
    }
}
