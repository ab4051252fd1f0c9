//! Storage contract and backends
//!
//! The index and the sequence leases only need a narrow ordered key-value
//! contract from the backing store, captured by [`Store`]. Two backends are
//! provided: [`MemoryStore`] for tests and ephemeral deployments, and
//! [`LsmStore`], a persistent log-structured store.

mod engine;
mod lsm;
mod memory;

pub use engine::{EngineConfig, EngineStats, EventStore};
pub use lsm::LsmStore;
pub use memory::MemoryStore;

use crate::compaction::CompactionConfig;
use crate::sstable::SSTableConfig;
use crate::wal::WalConfig;
use crate::{EventStoreError, Result};
use bytes::Bytes;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;

/// A key and its value, as written in one batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyValue {
    pub key: Bytes,
    pub value: Bytes,
}

impl KeyValue {
    pub fn new(key: impl Into<Bytes>, value: impl Into<Bytes>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }

    /// An existence-only entry
    pub fn key_only(key: impl Into<Bytes>) -> Self {
        Self {
            key: key.into(),
            value: Bytes::new(),
        }
    }

    /// Approximate in-memory size
    pub fn size(&self) -> usize {
        self.key.len() + self.value.len()
    }
}

/// Ordered, byte-keyed store the index is built on
///
/// Implementations must keep both guarantees below; the core never
/// re-validates them:
///
/// - a batch passed to [`write_batch`](Store::write_batch) becomes visible to
///   readers all at once, never partially;
/// - [`scan_prefix`](Store::scan_prefix) returns a consistent snapshot in
///   ascending byte order.
pub trait Store: Send + Sync {
    /// Look up the value stored under `key`
    fn lookup(&self, key: &[u8]) -> Result<Option<Bytes>>;

    /// Apply all entries as one indivisible batch
    fn write_batch(&self, entries: Vec<KeyValue>) -> Result<()>;

    /// All keys starting with `prefix`, in ascending byte order
    fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<Bytes>>;

    /// Remove every index entry
    ///
    /// Keys in the sequence namespace survive, so a lease written before the
    /// drop still bounds ids issued after it.
    fn drop_index(&self) -> Result<()>;

    /// Backend statistics
    fn stats(&self) -> StoreStats;

    /// Flush and release resources
    fn close(&self) -> Result<()>;
}

/// Backend statistics
#[derive(Debug, Clone, Default, Serialize)]
pub struct StoreStats {
    /// Backend name
    pub backend: &'static str,
    /// Approximate number of stored keys
    pub entries: usize,
    /// Bytes held in memory
    pub memory_bytes: usize,
    /// Number of on-disk tables
    pub sstables: usize,
    /// Bytes held on disk
    pub disk_bytes: u64,
}

/// Persistent backend configuration
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Data directory
    pub data_dir: PathBuf,
    /// WAL configuration
    pub wal: WalConfig,
    /// SSTable configuration
    pub sstable: SSTableConfig,
    /// Compaction configuration
    pub compaction: CompactionConfig,
    /// MemTable size limit in bytes
    pub memtable_size_limit: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(".db"),
            wal: WalConfig::default(),
            sstable: SSTableConfig::default(),
            compaction: CompactionConfig::default(),
            memtable_size_limit: crate::config::MEMTABLE_SIZE_LIMIT,
        }
    }
}

/// Backend selected by a storage location URI
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreLocation {
    /// `memory://`
    Memory,
    /// `lsm://<path>`
    Lsm(PathBuf),
}

impl StoreLocation {
    /// Parse a storage location such as `memory://` or `lsm://.db`
    pub fn parse(uri: &str) -> Result<Self> {
        let (scheme, rest) = uri
            .split_once("://")
            .ok_or_else(|| EventStoreError::Config(format!("Invalid storage URI: {}", uri)))?;

        match scheme {
            "memory" => Ok(StoreLocation::Memory),
            "lsm" if !rest.is_empty() => Ok(StoreLocation::Lsm(PathBuf::from(rest))),
            "lsm" => Err(EventStoreError::Config(
                "lsm storage URI requires a path, e.g. lsm://.db".into(),
            )),
            other => Err(EventStoreError::Config(format!(
                "Unknown storage backend: {}",
                other
            ))),
        }
    }
}

/// Construct the backend a storage URI points at
///
/// For `lsm://` URIs the path replaces `config.data_dir`.
pub fn open_store(uri: &str, config: StorageConfig) -> Result<Arc<dyn Store>> {
    match StoreLocation::parse(uri)? {
        StoreLocation::Memory => Ok(Arc::new(MemoryStore::new())),
        StoreLocation::Lsm(path) => {
            let config = StorageConfig {
                data_dir: path,
                ..config
            };
            Ok(Arc::new(LsmStore::open(config)?))
        }
    }
}
