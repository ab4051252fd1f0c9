//! WAL writer

use super::{list_segments, segment_path, WalConfig, WalEntry};
use crate::Result;
use parking_lot::Mutex;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;

/// Appends entries to the active segment
///
/// Every append is synced before it returns.
pub struct WalWriter {
    config: WalConfig,
    inner: Mutex<WalWriterInner>,
}

struct WalWriterInner {
    file: BufWriter<File>,
    segment_id: u64,
    bytes_written: usize,
}

impl WalWriter {
    /// Open a writer on a fresh segment after the latest existing one
    pub fn new(config: WalConfig) -> Result<Self> {
        fs::create_dir_all(&config.dir)?;

        let segment_id = list_segments(&config.dir)?
            .last()
            .map(|(id, _)| id + 1)
            .unwrap_or(0);
        let file = Self::open_segment(&config.dir, segment_id)?;

        Ok(Self {
            config,
            inner: Mutex::new(WalWriterInner {
                file: BufWriter::new(file),
                segment_id,
                bytes_written: 0,
            }),
        })
    }

    /// Append an entry, returning the segment it landed in
    pub fn append(&self, entry: &WalEntry) -> Result<u64> {
        let serialized = entry.serialize_with_checksum();
        let mut inner = self.inner.lock();

        if inner.bytes_written > 0
            && inner.bytes_written + serialized.len() > self.config.segment_size
        {
            self.rotate_segment(&mut inner)?;
        }

        inner.file.write_all(&serialized)?;
        inner.bytes_written += serialized.len();
        Self::sync_inner(&mut inner)?;

        Ok(inner.segment_id)
    }

    /// Force sync to disk
    pub fn sync(&self) -> Result<()> {
        Self::sync_inner(&mut self.inner.lock())
    }

    /// Current segment ID
    pub fn current_segment(&self) -> u64 {
        self.inner.lock().segment_id
    }

    /// Close the active segment and start a new one
    ///
    /// Returns the new segment id. Every entry appended before the call
    /// lives in a segment with a smaller id.
    pub fn rotate(&self) -> Result<u64> {
        let mut inner = self.inner.lock();
        self.rotate_segment(&mut inner)?;
        Ok(inner.segment_id)
    }

    /// Delete every segment older than `segment_id`
    pub fn truncate_before(&self, segment_id: u64) -> Result<usize> {
        let mut truncated = 0;
        for (id, path) in list_segments(&self.config.dir)? {
            if id < segment_id {
                fs::remove_file(&path)?;
                truncated += 1;
            }
        }
        Ok(truncated)
    }

    fn sync_inner(inner: &mut WalWriterInner) -> Result<()> {
        inner.file.flush()?;
        inner.file.get_ref().sync_all()?;
        Ok(())
    }

    fn rotate_segment(&self, inner: &mut WalWriterInner) -> Result<()> {
        Self::sync_inner(inner)?;

        inner.segment_id += 1;
        let file = Self::open_segment(&self.config.dir, inner.segment_id)?;
        inner.file = BufWriter::new(file);
        inner.bytes_written = 0;

        Ok(())
    }

    fn open_segment(dir: &Path, segment_id: u64) -> Result<File> {
        Ok(OpenOptions::new()
            .create(true)
            .append(true)
            .open(segment_path(dir, segment_id))?)
    }
}

impl Drop for WalWriter {
    fn drop(&mut self) {
        let _ = self.inner.get_mut().file.flush();
    }
}
