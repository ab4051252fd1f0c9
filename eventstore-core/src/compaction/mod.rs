//! SSTable compaction
//!
//! Flushed tables pile up in a single level. Once the count reaches the
//! trigger, every table is merged into one, newest value winning per key,
//! and the inputs are deleted.

use crate::sstable::{sstable_path, SSTableBuilder, SSTableConfig, SSTableMeta, SSTableReader};
use crate::Result;
use bytes::Bytes;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

/// Compaction configuration
#[derive(Debug, Clone)]
pub struct CompactionConfig {
    /// Compact when at least this many tables exist
    pub l0_file_trigger: usize,
    /// Run compaction after flushes
    pub enabled: bool,
}

impl Default for CompactionConfig {
    fn default() -> Self {
        Self {
            l0_file_trigger: crate::config::L0_COMPACTION_TRIGGER,
            enabled: true,
        }
    }
}

/// Outcome of one compaction run
#[derive(Debug)]
pub struct CompactionResult {
    /// The merged table
    pub output: SSTableMeta,
    /// Tables the output replaces
    pub inputs: Vec<SSTableMeta>,
}

/// Merges tables into one
pub struct Compactor {
    data_dir: PathBuf,
    config: CompactionConfig,
    sstable_config: SSTableConfig,
}

impl Compactor {
    /// Create a new compactor writing into `data_dir`
    pub fn new(data_dir: PathBuf, config: CompactionConfig, sstable_config: SSTableConfig) -> Self {
        Self {
            data_dir,
            config,
            sstable_config,
        }
    }

    /// Check if the current table set should be compacted
    pub fn needs_compaction(&self, table_count: usize) -> bool {
        self.config.enabled && table_count >= self.config.l0_file_trigger.max(2)
    }

    /// Merge `tables`, given oldest first, into a new table `output_id`
    pub fn compact(
        &self,
        tables: &[Arc<SSTableReader>],
        output_id: u64,
    ) -> Result<CompactionResult> {
        info!(tables = tables.len(), output_id, "Compacting SSTables");

        let merged = Self::merge(tables)?;
        let wal_segment = tables
            .iter()
            .map(|t| t.meta().wal_segment)
            .max()
            .unwrap_or(0);

        let output = SSTableBuilder::build(
            sstable_path(&self.data_dir, output_id),
            output_id,
            wal_segment,
            merged,
            self.sstable_config.clone(),
        )?;

        info!(
            output_id,
            entries = output.entry_count,
            bytes = output.file_size,
            "Compaction finished"
        );

        Ok(CompactionResult {
            output,
            inputs: tables.iter().map(|t| t.meta().clone()).collect(),
        })
    }

    /// Delete the files of replaced tables
    pub fn remove_inputs(inputs: &[SSTableMeta]) {
        for meta in inputs {
            if let Err(e) = std::fs::remove_file(&meta.path) {
                warn!("Failed to delete old SSTable {:?}: {}", meta.path, e);
            }
        }
    }

    fn merge(tables: &[Arc<SSTableReader>]) -> Result<BTreeMap<Bytes, Bytes>> {
        let mut merged = BTreeMap::new();
        for table in tables {
            for (key, value) in table.entries()? {
                merged.insert(key, value);
            }
        }
        Ok(merged)
    }
}
