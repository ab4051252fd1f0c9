//! In-memory ordered store

use super::{KeyValue, Store, StoreStats};
use crate::codec::SEQUENCE_NAMESPACE;
use crate::Result;
use bytes::Bytes;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::ops::Bound;

/// Pure in-memory [`Store`] for tests and ephemeral deployments
///
/// A batch is applied under the write lock and scans run under the read
/// lock, so readers see either all of a batch or none of it.
#[derive(Default)]
pub struct MemoryStore {
    data: RwLock<BTreeMap<Bytes, Bytes>>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys
    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Store for MemoryStore {
    fn lookup(&self, key: &[u8]) -> Result<Option<Bytes>> {
        Ok(self.data.read().get(key).cloned())
    }

    fn write_batch(&self, entries: Vec<KeyValue>) -> Result<()> {
        let mut data = self.data.write();
        for entry in entries {
            data.insert(entry.key, entry.value);
        }
        Ok(())
    }

    fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<Bytes>> {
        let data = self.data.read();
        let start = Bound::Included(Bytes::copy_from_slice(prefix));

        Ok(data
            .range((start, Bound::Unbounded))
            .map(|(key, _)| key)
            .take_while(|key| key.starts_with(prefix))
            .cloned()
            .collect())
    }

    fn drop_index(&self) -> Result<()> {
        self.data
            .write()
            .retain(|key, _| key.starts_with(SEQUENCE_NAMESPACE));
        Ok(())
    }

    fn stats(&self) -> StoreStats {
        let data = self.data.read();
        StoreStats {
            backend: "memory",
            entries: data.len(),
            memory_bytes: data.iter().map(|(k, v)| k.len() + v.len()).sum(),
            sstables: 0,
            disk_bytes: 0,
        }
    }

    fn close(&self) -> Result<()> {
        Ok(())
    }
}
