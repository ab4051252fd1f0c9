//! Core types for the event store

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Event timestamp as supplied by the client
pub type Timestamp = i64;

/// Identifier assigned to every ingested event
pub type EventId = u64;

/// A single sampled event submitted for ingestion
///
/// Only the index projection of an event is persisted: one entry per
/// `(dimension, value)` pair in `data`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// Top-level category namespacing the index (e.g. "pageview")
    pub tag: String,
    /// Event timestamp
    pub ts: Timestamp,
    /// Sample rate the client applied, carried but not indexed
    #[serde(default = "default_samplerate")]
    pub samplerate: i64,
    /// Dimension name to value
    #[serde(default)]
    pub data: BTreeMap<String, String>,
}

fn default_samplerate() -> i64 {
    1
}

impl Event {
    /// Create an event with no dimensions
    pub fn new(tag: impl Into<String>, ts: Timestamp) -> Self {
        Self {
            tag: tag.into(),
            ts,
            samplerate: default_samplerate(),
            data: BTreeMap::new(),
        }
    }

    /// Add a dimension to the event
    pub fn with_dimension(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }

    /// Set the sample rate
    pub fn with_samplerate(mut self, samplerate: i64) -> Self {
        self.samplerate = samplerate;
        self
    }

    /// Number of index entries this event expands into
    pub fn index_entry_count(&self) -> usize {
        self.data.len()
    }
}

/// A `(key, value)` pair attached to a decoded event
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Dimension {
    pub key: String,
    pub value: String,
}

impl Dimension {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// An event reconstructed from index entries at query time
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecodedEvent {
    pub id: EventId,
    pub ts: Timestamp,
    pub tag: String,
    /// Pairs gathered across filters and projections, in fetch order
    pub data: Vec<Dimension>,
}

impl DecodedEvent {
    /// Create a decoded event seeded with one pair
    pub fn new(id: EventId, ts: Timestamp, tag: impl Into<String>, first: Dimension) -> Self {
        Self {
            id,
            ts,
            tag: tag.into(),
            data: vec![first],
        }
    }

    /// Value of `key`, if this event carries it
    pub fn value_of(&self, key: &str) -> Option<&str> {
        self.data
            .iter()
            .find(|d| d.key == key)
            .map(|d| d.value.as_str())
    }
}
