//! MemTable
//!
//! Recent writes live in a lock-free ordered skip list until the table is
//! flushed to an SSTable. A batch gate makes every batch visible to readers
//! at once.

use crate::storage::KeyValue;
use bytes::Bytes;
use crossbeam_skiplist::SkipMap;
use parking_lot::RwLock;
use std::ops::Bound;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Per-entry bookkeeping overhead counted toward the size limit
const ENTRY_OVERHEAD: usize = 32;

/// In-memory sorted table of recent writes
pub struct MemTable {
    data: SkipMap<Bytes, Bytes>,
    /// Held exclusively while a batch is applied, shared while reading
    batch_gate: RwLock<()>,
    /// Approximate size in bytes
    size_bytes: AtomicUsize,
    id: u64,
}

impl MemTable {
    /// Create a new MemTable
    pub fn new(id: u64) -> Self {
        Self {
            data: SkipMap::new(),
            batch_gate: RwLock::new(()),
            size_bytes: AtomicUsize::new(0),
            id,
        }
    }

    /// Get the MemTable ID
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Apply a batch of writes
    pub fn apply_batch(&self, entries: &[KeyValue]) {
        let _gate = self.batch_gate.write();
        let mut total_size = 0;

        for entry in entries {
            total_size += entry.size() + ENTRY_OVERHEAD;
            self.data.insert(entry.key.clone(), entry.value.clone());
        }

        self.size_bytes.fetch_add(total_size, Ordering::Relaxed);
    }

    /// Look up a key
    pub fn get(&self, key: &[u8]) -> Option<Bytes> {
        let _gate = self.batch_gate.read();
        self.data.get(key).map(|entry| entry.value().clone())
    }

    /// Keys starting with `prefix`, ascending
    pub fn scan_prefix(&self, prefix: &[u8]) -> Vec<Bytes> {
        let _gate = self.batch_gate.read();
        self.data
            .range::<[u8], _>((Bound::Included(prefix), Bound::Unbounded))
            .take_while(|entry| entry.key().starts_with(prefix))
            .map(|entry| entry.key().clone())
            .collect()
    }

    /// All entries in key order
    pub fn entries(&self) -> Vec<(Bytes, Bytes)> {
        let _gate = self.batch_gate.read();
        self.data
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    /// Check if the MemTable should be flushed
    pub fn should_flush(&self, size_limit: usize) -> bool {
        self.size() >= size_limit
    }

    /// Approximate size in bytes
    pub fn size(&self) -> usize {
        self.size_bytes.load(Ordering::Relaxed)
    }

    /// Entry count
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}
