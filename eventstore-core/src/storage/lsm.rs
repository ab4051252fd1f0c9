//! Persistent log-structured store
//!
//! Write path: WAL append, then memtable insert. Full memtables are frozen,
//! written out as SSTables and the WAL segments they cover are deleted.
//! Reads consult the memtable, frozen memtables and SSTables, newest first.

use super::{KeyValue, StorageConfig, Store, StoreStats};
use crate::codec::SEQUENCE_NAMESPACE;
use crate::compaction::Compactor;
use crate::memtable::MemTable;
use crate::sstable::{parse_sstable_id, sstable_path, SSTableBuilder, SSTableConfig, SSTableReader};
use crate::wal::{WalConfig, WalEntry, WalEntryType, WalReader, WalWriter};
use crate::{EventStoreError, Result};
use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Tables and memtables visible to readers
struct LsmState {
    memtable: Arc<MemTable>,
    /// Frozen memtables being flushed, oldest first
    immutables: Vec<Arc<MemTable>>,
    /// Flushed tables, oldest first
    sstables: Vec<Arc<SSTableReader>>,
}

impl LsmState {
    fn get(&self, key: &[u8]) -> Result<Option<Bytes>> {
        if let Some(value) = self.memtable.get(key) {
            return Ok(Some(value));
        }
        for memtable in self.immutables.iter().rev() {
            if let Some(value) = memtable.get(key) {
                return Ok(Some(value));
            }
        }
        for table in self.sstables.iter().rev() {
            if let Some(value) = table.get(key)? {
                return Ok(Some(value));
            }
        }
        Ok(None)
    }

    fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<Bytes>> {
        let mut keys = BTreeSet::new();

        keys.extend(self.memtable.scan_prefix(prefix));
        for memtable in &self.immutables {
            keys.extend(memtable.scan_prefix(prefix));
        }
        for table in &self.sstables {
            keys.extend(table.scan_prefix(prefix)?);
        }

        Ok(keys.into_iter().collect())
    }

    /// Current values of every sequence key
    fn sequence_entries(&self) -> Result<Vec<KeyValue>> {
        let mut entries = Vec::new();
        for key in self.scan_prefix(SEQUENCE_NAMESPACE)? {
            if let Some(value) = self.get(&key)? {
                entries.push(KeyValue::new(key, value));
            }
        }
        Ok(entries)
    }
}

/// LSM-tree backed [`Store`]
pub struct LsmStore {
    data_dir: PathBuf,
    wal: WalWriter,
    state: RwLock<LsmState>,

    /// Orders WAL appends with memtable inserts
    write_lock: Mutex<()>,
    /// Serializes flush, compaction and index drops
    flush_lock: Mutex<()>,

    compactor: Compactor,
    sstable_config: SSTableConfig,
    memtable_size_limit: usize,

    next_memtable_id: AtomicU64,
    next_sstable_id: AtomicU64,
    closed: AtomicBool,
}

impl LsmStore {
    /// Open or create a store in `config.data_dir`, replaying the WAL
    pub fn open(config: StorageConfig) -> Result<Self> {
        let data_dir = config.data_dir.clone();
        fs::create_dir_all(&data_dir)?;
        Self::remove_partial_tables(&data_dir)?;

        let wal_config = WalConfig {
            dir: data_dir.join("wal"),
            ..config.wal
        };

        let mut sstables = Self::load_sstables(&data_dir)?;
        let watermark = sstables
            .iter()
            .map(|t| t.meta().wal_segment)
            .max()
            .unwrap_or(0);

        let mut memtable = MemTable::new(0);
        let records = WalReader::new(wal_config.clone()).recover_from(watermark)?;
        if !records.is_empty() {
            info!(records = records.len(), watermark, "Replaying WAL");
        }

        for record in records {
            match record.entry.entry_type {
                WalEntryType::Batch => memtable.apply_batch(&record.entry.key_values()?),
                WalEntryType::DropIndex => {
                    // Tables written before the drop did not get deleted
                    memtable = MemTable::new(0);
                    memtable.apply_batch(&record.entry.key_values()?);
                    let (stale, kept): (Vec<_>, Vec<_>) = sstables
                        .into_iter()
                        .partition(|t| t.meta().wal_segment <= record.segment_id);
                    Self::delete_tables(&stale);
                    sstables = kept;
                }
            }
        }

        let next_sstable_id = sstables.iter().map(|t| t.id()).max().unwrap_or(0) + 1;
        let wal = WalWriter::new(wal_config)?;

        info!(
            path = %data_dir.display(),
            sstables = sstables.len(),
            recovered_entries = memtable.len(),
            "Opened LSM store"
        );

        Ok(Self {
            compactor: Compactor::new(
                data_dir.clone(),
                config.compaction,
                config.sstable.clone(),
            ),
            data_dir,
            wal,
            state: RwLock::new(LsmState {
                memtable: Arc::new(memtable),
                immutables: Vec::new(),
                sstables,
            }),
            write_lock: Mutex::new(()),
            flush_lock: Mutex::new(()),
            sstable_config: config.sstable,
            memtable_size_limit: config.memtable_size_limit,
            next_memtable_id: AtomicU64::new(1),
            next_sstable_id: AtomicU64::new(next_sstable_id),
            closed: AtomicBool::new(false),
        })
    }

    /// Data directory
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Number of flushed tables
    pub fn sstable_count(&self) -> usize {
        self.state.read().sstables.len()
    }

    /// Write the active memtable out as an SSTable
    pub fn flush(&self) -> Result<()> {
        let _flush = self.flush_lock.lock();

        let (frozen, watermark) = {
            let _writes = self.write_lock.lock();
            let mut state = self.state.write();
            if state.memtable.is_empty() {
                return Ok(());
            }

            let watermark = self.wal.rotate()?;
            let id = self.next_memtable_id.fetch_add(1, Ordering::SeqCst);
            let frozen = std::mem::replace(&mut state.memtable, Arc::new(MemTable::new(id)));
            state.immutables.push(frozen.clone());
            (frozen, watermark)
        };

        let sstable_id = self.next_sstable_id.fetch_add(1, Ordering::SeqCst);
        let meta = SSTableBuilder::build(
            sstable_path(&self.data_dir, sstable_id),
            sstable_id,
            watermark,
            frozen.entries(),
            self.sstable_config.clone(),
        )?;
        let reader = Arc::new(SSTableReader::open(&meta.path)?);

        {
            let mut state = self.state.write();
            state.immutables.retain(|m| m.id() != frozen.id());
            state.sstables.push(reader);
        }

        info!(
            memtable_id = frozen.id(),
            sstable_id,
            entries = meta.entry_count,
            "Flushed memtable"
        );

        let truncated = self.wal.truncate_before(watermark)?;
        debug!(truncated, watermark, "Truncated WAL");

        self.maybe_compact()
    }

    /// Compact when the table count reached the trigger
    ///
    /// Caller holds `flush_lock`, so the table set cannot grow meanwhile.
    fn maybe_compact(&self) -> Result<()> {
        let tables = self.state.read().sstables.clone();
        if !self.compactor.needs_compaction(tables.len()) {
            return Ok(());
        }

        let output_id = self.next_sstable_id.fetch_add(1, Ordering::SeqCst);
        let result = self.compactor.compact(&tables, output_id)?;
        let reader = Arc::new(SSTableReader::open(&result.output.path)?);

        {
            let mut state = self.state.write();
            state
                .sstables
                .retain(|t| !result.inputs.iter().any(|old| old.id == t.id()));
            state.sstables.push(reader);
        }

        Compactor::remove_inputs(&result.inputs);
        Ok(())
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(EventStoreError::StorageUnavailable("store is closed".into()));
        }
        Ok(())
    }

    fn load_sstables(dir: &Path) -> Result<Vec<Arc<SSTableReader>>> {
        let mut sstables = Vec::new();

        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            if parse_sstable_id(&path).is_none() {
                continue;
            }
            match SSTableReader::open(&path) {
                Ok(reader) => sstables.push(Arc::new(reader)),
                Err(e) => warn!("Failed to open SSTable {:?}: {}", path, e),
            }
        }

        sstables.sort_by_key(|t| t.id());
        Ok(sstables)
    }

    fn remove_partial_tables(dir: &Path) -> Result<()> {
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            if path.extension().is_some_and(|ext| ext == "tmp") {
                warn!("Removing partially written table {:?}", path);
                fs::remove_file(&path)?;
            }
        }
        Ok(())
    }

    fn delete_tables(tables: &[Arc<SSTableReader>]) {
        for table in tables {
            if let Err(e) = fs::remove_file(table.path()) {
                warn!("Failed to delete SSTable {:?}: {}", table.path(), e);
            }
        }
    }
}

impl Store for LsmStore {
    fn lookup(&self, key: &[u8]) -> Result<Option<Bytes>> {
        self.ensure_open()?;
        self.state.read().get(key)
    }

    fn write_batch(&self, entries: Vec<KeyValue>) -> Result<()> {
        self.ensure_open()?;
        if entries.is_empty() {
            return Ok(());
        }

        let entry = WalEntry::batch(&entries)?;
        let needs_flush = {
            let _writes = self.write_lock.lock();
            let state = self.state.read();
            self.wal.append(&entry)?;
            state.memtable.apply_batch(&entries);
            state.memtable.should_flush(self.memtable_size_limit)
        };

        if needs_flush {
            self.flush()?;
        }
        Ok(())
    }

    fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<Bytes>> {
        self.ensure_open()?;
        self.state.read().scan_prefix(prefix)
    }

    fn drop_index(&self) -> Result<()> {
        self.ensure_open()?;
        let _flush = self.flush_lock.lock();
        let _writes = self.write_lock.lock();
        let mut state = self.state.write();

        // The marker carries the surviving leases
        let kept = state.sequence_entries()?;
        let segment = self.wal.rotate()?;
        self.wal.append(&WalEntry::drop_index(&kept)?)?;
        self.wal.sync()?;

        let id = self.next_memtable_id.fetch_add(1, Ordering::SeqCst);
        let memtable = MemTable::new(id);
        memtable.apply_batch(&kept);

        let stale = std::mem::take(&mut state.sstables);
        state.immutables.clear();
        state.memtable = Arc::new(memtable);
        drop(state);

        Self::delete_tables(&stale);
        self.wal.truncate_before(segment)?;

        info!(tables = stale.len(), sequences = kept.len(), "Dropped index");
        Ok(())
    }

    fn stats(&self) -> StoreStats {
        let state = self.state.read();
        let memtables = std::iter::once(&state.memtable).chain(state.immutables.iter());

        let (memtable_entries, memory_bytes) = memtables
            .fold((0, 0), |(entries, bytes), m| (entries + m.len(), bytes + m.size()));

        StoreStats {
            backend: "lsm",
            entries: memtable_entries
                + state
                    .sstables
                    .iter()
                    .map(|t| t.meta().entry_count)
                    .sum::<usize>(),
            memory_bytes,
            sstables: state.sstables.len(),
            disk_bytes: state.sstables.iter().map(|t| t.meta().file_size).sum(),
        }
    }

    fn close(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Ok(());
        }
        self.flush()?;
        self.wal.sync()?;
        self.closed.store(true, Ordering::Release);
        info!(path = %self.data_dir.display(), "Closed LSM store");
        Ok(())
    }
}
