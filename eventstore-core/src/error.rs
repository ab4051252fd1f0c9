//! Error types for the event store

use thiserror::Error;

/// Result type alias for event store operations
pub type Result<T> = std::result::Result<T, EventStoreError>;

/// Event store error types
#[derive(Error, Debug)]
pub enum EventStoreError {
    /// An index key failed to decode
    #[error("Malformed index key: {0}")]
    MalformedKey(String),

    /// The sequence lease could not be advanced
    #[error("Sequence allocator unavailable: {0}")]
    AllocatorUnavailable(String),

    /// A storage contract call failed
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    /// Filter type the query engine does not evaluate
    #[error("Unsupported filter type '{kind}' on key '{key}'")]
    UnsupportedFilterType { kind: String, key: String },

    /// Operation type the query engine does not compute
    #[error("Unsupported operation type '{kind}' on key '{key}'")]
    UnsupportedOperationType { kind: String, key: String },

    /// IO operation failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Data corruption detected
    #[error("Data corruption: {0}")]
    Corruption(String),

    /// Checksum mismatch
    #[error("Checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: u32, actual: u32 },

    /// Invalid on-disk format
    #[error("Invalid format: {0}")]
    InvalidFormat(String),

    /// Compression/decompression error
    #[error("Compression error: {0}")]
    Compression(String),

    /// Query error
    #[error("Query error: {0}")]
    Query(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl EventStoreError {
    /// Wrap a backend failure as seen through the storage contract.
    pub fn unavailable(self) -> Self {
        match self {
            EventStoreError::StorageUnavailable(_) => self,
            other => EventStoreError::StorageUnavailable(other.to_string()),
        }
    }
}
