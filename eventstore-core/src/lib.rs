//! Event Store Core - Append-Only Event Index
//!
//! Stores tagged, timestamped events with string dimensions and answers
//! filter/aggregate queries over them.
//!
//! # Architecture
//!
//! Every `(dimension, value)` pair of an event becomes one index key in an
//! ordered key-value store. Queries are prefix scans over those keys.
//!
//! - **Codec**: order-preserving index key encoding
//! - **Sequence**: durable monotonic event ids, leased in ranges
//! - **Ingest**: event batch to atomic index write
//! - **Query**: filter intersection, projection and aggregates
//! - **Storage**: the key-value contract plus in-memory and LSM backends
//!   (WAL, MemTable, SSTable, Compaction)

pub mod codec;
pub mod compaction;
pub mod ingest;
pub mod memtable;
pub mod query;
pub mod sequence;
pub mod sstable;
pub mod storage;
pub mod wal;

mod error;
mod types;

pub use codec::IndexKey;
pub use error::{EventStoreError, Result};
pub use query::{QueryRequest, QueryResponse};
pub use storage::{EngineConfig, EngineStats, EventStore, Store};
pub use types::*;

/// Event store version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default configuration values
pub mod config {
    /// Ids leased per sequence refill
    pub const SEQUENCE_BANDWIDTH: u64 = 1000;

    /// Maximum MemTable size before flush (64MB)
    pub const MEMTABLE_SIZE_LIMIT: usize = 64 * 1024 * 1024;

    /// SSTable block size (4KB)
    pub const BLOCK_SIZE: usize = 4 * 1024;

    /// SSTables before a full compaction
    pub const L0_COMPACTION_TRIGGER: usize = 4;

    /// WAL segment size (16MB)
    pub const WAL_SEGMENT_SIZE: usize = 16 * 1024 * 1024;

    /// Bloom filter bits per key (~1% false positives)
    pub const BLOOM_BITS_PER_KEY: usize = 10;
}
