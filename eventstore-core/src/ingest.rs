//! Ingestion pipeline

use crate::codec;
use crate::sequence::Sequence;
use crate::storage::{KeyValue, Store};
use crate::{Event, Result};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Ingestion counters
#[derive(Debug, Default)]
pub struct IngestStats {
    events: AtomicU64,
    index_entries: AtomicU64,
    batches: AtomicU64,
    failures: AtomicU64,
}

/// Point-in-time copy of [`IngestStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IngestStatsSnapshot {
    pub events: u64,
    pub index_entries: u64,
    pub batches: u64,
    pub failures: u64,
}

impl IngestStats {
    /// Read every counter
    pub fn snapshot(&self) -> IngestStatsSnapshot {
        IngestStatsSnapshot {
            events: self.events.load(Ordering::Relaxed),
            index_entries: self.index_entries.load(Ordering::Relaxed),
            batches: self.batches.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
        }
    }
}

/// Turns events into index entries and writes them as one batch
pub struct Ingestor {
    store: Arc<dyn Store>,
    sequence: Arc<Sequence>,
    stats: IngestStats,
}

impl Ingestor {
    pub fn new(store: Arc<dyn Store>, sequence: Arc<Sequence>) -> Self {
        Self {
            store,
            sequence,
            stats: IngestStats::default(),
        }
    }

    /// Index `events`, returning how many were processed
    ///
    /// Every event gets one id and one entry per data pair. Nothing is
    /// written when id allocation fails, and the batch is applied as a
    /// whole or not at all.
    pub fn ingest(&self, events: &[Event]) -> Result<usize> {
        if events.is_empty() {
            return Ok(0);
        }

        let result = self.build_batch(events).and_then(|batch| {
            let entries = batch.len();
            self.store
                .write_batch(batch)
                .map_err(|e| e.unavailable())
                .map(|_| entries)
        });

        match result {
            Ok(entries) => {
                self.stats.events.fetch_add(events.len() as u64, Ordering::Relaxed);
                self.stats.index_entries.fetch_add(entries as u64, Ordering::Relaxed);
                self.stats.batches.fetch_add(1, Ordering::Relaxed);
                debug!(events = events.len(), entries, "Ingested batch");
                Ok(events.len())
            }
            Err(e) => {
                self.stats.failures.fetch_add(1, Ordering::Relaxed);
                warn!(events = events.len(), error = %e, "Ingest failed");
                Err(e)
            }
        }
    }

    /// Ingestion counters
    pub fn stats(&self) -> IngestStatsSnapshot {
        self.stats.snapshot()
    }

    fn build_batch(&self, events: &[Event]) -> Result<Vec<KeyValue>> {
        let capacity = events.iter().map(Event::index_entry_count).sum();
        let mut batch = Vec::with_capacity(capacity);

        for event in events {
            let id = self.sequence.next()?;
            for (dimension, value) in &event.data {
                batch.push(KeyValue::key_only(codec::encode(
                    &event.tag, dimension, value, event.ts, id,
                )));
            }
        }

        Ok(batch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{MemoryStore, StoreStats};
    use crate::{EventStoreError, IndexKey};
    use bytes::Bytes;
    use std::sync::atomic::AtomicBool;

    struct FailingWrites(MemoryStore);

    impl Store for FailingWrites {
        fn lookup(&self, key: &[u8]) -> Result<Option<Bytes>> {
            self.0.lookup(key)
        }
        fn write_batch(&self, entries: Vec<KeyValue>) -> Result<()> {
            // Sequence leases go through, index batches do not
            if entries.iter().all(|e| e.key.starts_with(codec::SEQUENCE_NAMESPACE)) {
                return self.0.write_batch(entries);
            }
            Err(EventStoreError::Io(std::io::Error::other("disk full")))
        }
        fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<Bytes>> {
            self.0.scan_prefix(prefix)
        }
        fn drop_index(&self) -> Result<()> {
            self.0.drop_index()
        }
        fn stats(&self) -> StoreStats {
            self.0.stats()
        }
        fn close(&self) -> Result<()> {
            Ok(())
        }
    }

    /// Store that accepts the first sequence lease and rejects every later one
    struct SingleLease {
        inner: MemoryStore,
        leased: AtomicBool,
    }

    impl Store for SingleLease {
        fn lookup(&self, key: &[u8]) -> Result<Option<Bytes>> {
            self.inner.lookup(key)
        }
        fn write_batch(&self, entries: Vec<KeyValue>) -> Result<()> {
            let is_lease = entries.iter().all(|e| e.key.starts_with(codec::SEQUENCE_NAMESPACE));
            if is_lease && self.leased.swap(true, Ordering::SeqCst) {
                return Err(EventStoreError::Io(std::io::Error::other("disk full")));
            }
            self.inner.write_batch(entries)
        }
        fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<Bytes>> {
            self.inner.scan_prefix(prefix)
        }
        fn drop_index(&self) -> Result<()> {
            self.inner.drop_index()
        }
        fn stats(&self) -> StoreStats {
            self.inner.stats()
        }
        fn close(&self) -> Result<()> {
            Ok(())
        }
    }

    fn ingestor(store: Arc<dyn Store>) -> Ingestor {
        let sequence = Arc::new(Sequence::lease(store.clone(), "event_id", 10).unwrap());
        Ingestor::new(store, sequence)
    }

    #[test]
    fn test_one_entry_per_dimension() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let ingestor = ingestor(store.clone());

        let events = vec![
            Event::new("pageview", 100)
                .with_dimension("user", "alice")
                .with_dimension("page", "home"),
            Event::new("pageview", 101).with_dimension("user", "bob"),
        ];
        assert_eq!(ingestor.ingest(&events).unwrap(), 2);

        let keys = store.scan_prefix(codec::INDEX_NAMESPACE).unwrap();
        assert_eq!(keys.len(), 3);

        let decoded: Vec<IndexKey> = keys.iter().map(|k| codec::decode(k).unwrap()).collect();
        let alice = decoded.iter().find(|k| k.value == "alice").unwrap();
        let home = decoded.iter().find(|k| k.value == "home").unwrap();
        let bob = decoded.iter().find(|k| k.value == "bob").unwrap();
        assert_eq!(alice.event_id, home.event_id);
        assert_ne!(alice.event_id, bob.event_id);

        assert_eq!(
            ingestor.stats(),
            IngestStatsSnapshot {
                events: 2,
                index_entries: 3,
                batches: 1,
                failures: 0,
            }
        );
    }

    #[test]
    fn test_empty_input_allocates_nothing() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let ingestor = ingestor(store.clone());

        assert_eq!(ingestor.ingest(&[]).unwrap(), 0);
        assert!(store.scan_prefix(b"").unwrap().is_empty());
        assert_eq!(ingestor.stats().batches, 0);
    }

    #[test]
    fn test_event_without_data_consumes_an_id() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let sequence = Arc::new(Sequence::lease(store.clone(), "event_id", 10).unwrap());
        let ingestor = Ingestor::new(store.clone(), sequence.clone());

        ingestor.ingest(&[Event::new("pageview", 1)]).unwrap();
        assert_eq!(sequence.peek(), 1);
        assert!(store.scan_prefix(codec::INDEX_NAMESPACE).unwrap().is_empty());
    }

    #[test]
    fn test_storage_failure_is_unavailable() {
        let store: Arc<dyn Store> = Arc::new(FailingWrites(MemoryStore::new()));
        let ingestor = ingestor(store.clone());

        let result = ingestor.ingest(&[Event::new("pageview", 1).with_dimension("user", "a")]);
        assert!(matches!(result, Err(EventStoreError::StorageUnavailable(_))));
        assert!(store.scan_prefix(codec::INDEX_NAMESPACE).unwrap().is_empty());
        assert_eq!(ingestor.stats().failures, 1);
    }

    #[test]
    fn test_allocator_failure_writes_nothing() {
        let store: Arc<dyn Store> = Arc::new(SingleLease {
            inner: MemoryStore::new(),
            leased: AtomicBool::new(false),
        });
        let sequence = Arc::new(Sequence::lease(store.clone(), "event_id", 1).unwrap());
        let ingestor = Ingestor::new(store.clone(), sequence.clone());

        let events: Vec<Event> = (0..3)
            .map(|ts| Event::new("pageview", ts).with_dimension("user", "a"))
            .collect();
        let result = ingestor.ingest(&events);

        assert!(matches!(result, Err(EventStoreError::AllocatorUnavailable(_))));
        assert!(store.scan_prefix(codec::INDEX_NAMESPACE).unwrap().is_empty());
        assert_eq!(ingestor.stats().failures, 1);
        assert_eq!(ingestor.stats().events, 0);
        // The first event took the only leased id
        assert_eq!(sequence.peek(), 1);
    }
}
