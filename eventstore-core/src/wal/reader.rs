//! WAL reader for recovery

use super::{list_segments, WalConfig, WalEntry};
use crate::{EventStoreError, Result};
use std::fs;
use std::path::Path;
use tracing::{debug, warn};

/// An entry together with the segment it was read from
#[derive(Debug, Clone)]
pub struct WalRecord {
    pub segment_id: u64,
    pub entry: WalEntry,
}

/// WAL reader for recovering entries after a crash or restart
pub struct WalReader {
    config: WalConfig,
}

impl WalReader {
    /// Create a new WAL reader
    pub fn new(config: WalConfig) -> Self {
        Self { config }
    }

    /// Recover all entries from all segments
    pub fn recover(&self) -> Result<Vec<WalRecord>> {
        self.recover_from(0)
    }

    /// Recover entries from `start_segment` onwards, in write order
    pub fn recover_from(&self, start_segment: u64) -> Result<Vec<WalRecord>> {
        let mut records = Vec::new();

        for (segment_id, path) in list_segments(&self.config.dir)? {
            if segment_id < start_segment {
                continue;
            }
            let entries = Self::read_segment(&path)?;
            debug!(segment_id, entries = entries.len(), "Read WAL segment");
            records.extend(
                entries
                    .into_iter()
                    .map(|entry| WalRecord { segment_id, entry }),
            );
        }

        Ok(records)
    }

    fn read_segment(path: &Path) -> Result<Vec<WalEntry>> {
        let data = fs::read(path)?;
        let mut entries = Vec::new();
        let mut offset = 0;

        while offset < data.len() {
            match WalEntry::deserialize_with_checksum(&data[offset..]) {
                Ok((entry, bytes_read)) => {
                    entries.push(entry);
                    offset += bytes_read;
                }
                Err(EventStoreError::ChecksumMismatch { .. }) => {
                    warn!(
                        "Checksum mismatch at offset {} in {:?}, truncating",
                        offset, path
                    );
                    break;
                }
                Err(EventStoreError::InvalidFormat(msg))
                    if msg == "Entry too short" || msg == "Incomplete entry" =>
                {
                    // Torn write at the tail
                    warn!("Incomplete entry at offset {} in {:?}", offset, path);
                    break;
                }
                Err(e) => return Err(e),
            }
        }

        Ok(entries)
    }
}
