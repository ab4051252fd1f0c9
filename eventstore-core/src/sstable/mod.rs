//! SSTable (Sorted String Table)
//!
//! Immutable on-disk run of sorted key-value pairs:
//!
//! ```text
//! | header (32) | data blocks ... | index | bloom | footer (36) |
//! ```
//!
//! - header: magic, format version, table id, entry count, WAL watermark
//! - data block: flag, entry count, payload length, payload (optionally
//!   LZ4), CRC32
//! - index: first key, last key, offset and size of every block
//! - footer: index offset/size, bloom offset/size, magic

mod block;
mod bloom;
mod builder;
mod reader;

pub use block::{BlockBuilder, DataBlock};
pub use bloom::BloomFilter;
pub use builder::SSTableBuilder;
pub use reader::SSTableReader;

use bytes::Bytes;
use std::path::{Path, PathBuf};

/// SSTable file format version
pub const FORMAT_VERSION: u32 = 1;

/// Magic bytes opening the header and closing the footer
pub const MAGIC: &[u8; 4] = b"EVST";

pub(crate) const HEADER_SIZE: usize = 32;
pub(crate) const FOOTER_SIZE: usize = 36;

/// SSTable metadata
#[derive(Debug, Clone)]
pub struct SSTableMeta {
    /// File path
    pub path: PathBuf,
    /// Unique ID, increasing with table age
    pub id: u64,
    /// Number of entries
    pub entry_count: usize,
    /// File size in bytes
    pub file_size: u64,
    /// First WAL segment whose writes are not contained in this table
    pub wal_segment: u64,
    /// Smallest key
    pub min_key: Bytes,
    /// Largest key
    pub max_key: Bytes,
}

impl SSTableMeta {
    /// Check if the table may hold keys starting with `prefix`
    pub fn may_contain_prefix(&self, prefix: &[u8]) -> bool {
        if self.entry_count == 0 {
            return false;
        }
        let below_max = self.max_key.as_ref() >= prefix;
        let above_min =
            self.min_key.as_ref() <= prefix || self.min_key.starts_with(prefix);
        below_max && above_min
    }

    /// Check if `key` lies in the table's key range
    pub fn may_contain_key(&self, key: &[u8]) -> bool {
        self.entry_count > 0 && self.min_key.as_ref() <= key && key <= self.max_key.as_ref()
    }
}

/// SSTable configuration
#[derive(Debug, Clone)]
pub struct SSTableConfig {
    /// Block size in bytes
    pub block_size: usize,
    /// LZ4-compress block payloads
    pub compression: bool,
    /// Bloom filter bits per key
    pub bloom_bits_per_key: usize,
}

impl Default for SSTableConfig {
    fn default() -> Self {
        Self {
            block_size: crate::config::BLOCK_SIZE,
            compression: true,
            bloom_bits_per_key: crate::config::BLOOM_BITS_PER_KEY,
        }
    }
}

/// Path of the table with the given id inside `dir`
pub fn sstable_path(dir: &Path, id: u64) -> PathBuf {
    dir.join(format!("sst_{:020}.evst", id))
}

/// Table id encoded in an SSTable file name
pub fn parse_sstable_id(path: &Path) -> Option<u64> {
    path.file_name()
        .and_then(|n| n.to_str())
        .and_then(|s| s.strip_prefix("sst_"))
        .and_then(|s| s.strip_suffix(".evst"))
        .and_then(|s| s.parse().ok())
}
