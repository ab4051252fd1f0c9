//! Write-Ahead Log (WAL)
//!
//! Every batch applied to the persistent store is appended here before it
//! reaches the memtable. Segments are rotated on every memtable flush, so a
//! flushed table can record the first segment it does not cover and recovery
//! only replays the tail.

mod entry;
mod reader;
mod writer;

pub use entry::{WalEntry, WalEntryType};
pub use reader::{WalReader, WalRecord};
pub use writer::WalWriter;

use std::path::{Path, PathBuf};

/// WAL configuration
#[derive(Debug, Clone)]
pub struct WalConfig {
    /// Directory for WAL files
    pub dir: PathBuf,
    /// Maximum segment size in bytes
    pub segment_size: usize,
}

impl Default for WalConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from(".db/wal"),
            segment_size: crate::config::WAL_SEGMENT_SIZE,
        }
    }
}

pub(crate) fn segment_path(dir: &Path, segment_id: u64) -> PathBuf {
    dir.join(format!("wal_{:020}.log", segment_id))
}

pub(crate) fn parse_segment_id(path: &Path) -> Option<u64> {
    path.file_name()
        .and_then(|n| n.to_str())
        .and_then(|s| s.strip_prefix("wal_"))
        .and_then(|s| s.strip_suffix(".log"))
        .and_then(|s| s.parse().ok())
}

/// Segment ids present in `dir`, ascending
pub(crate) fn list_segments(dir: &Path) -> std::io::Result<Vec<(u64, PathBuf)>> {
    let mut segments = Vec::new();
    if !dir.exists() {
        return Ok(segments);
    }

    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if let Some(id) = parse_segment_id(&path) {
            segments.push((id, path));
        }
    }
    segments.sort_by_key(|(id, _)| *id);
    Ok(segments)
}
