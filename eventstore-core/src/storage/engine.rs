//! Event store - top-level coordinator

use super::{open_store, StorageConfig, Store, StoreStats};
use crate::ingest::{IngestStatsSnapshot, Ingestor};
use crate::query::{QueryExecutor, QueryRequest, QueryResponse};
use crate::sequence::Sequence;
use crate::{Event, Result};
use serde::Serialize;
use std::sync::Arc;
use tracing::info;

/// Event store configuration
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Name of the event id sequence
    pub sequence_name: String,
    /// Ids leased per sequence refill
    pub sequence_bandwidth: u64,
    /// Persistent backend settings
    pub storage: StorageConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sequence_name: "event_id".to_string(),
            sequence_bandwidth: crate::config::SEQUENCE_BANDWIDTH,
            storage: StorageConfig::default(),
        }
    }
}

/// Event store statistics
#[derive(Debug, Clone, Serialize)]
pub struct EngineStats {
    pub ingest: IngestStatsSnapshot,
    pub storage: StoreStats,
    /// Next event id to be issued
    pub next_event_id: u64,
}

/// Event store: ingestion and queries over one backing store
pub struct EventStore {
    store: Arc<dyn Store>,
    sequence: Arc<Sequence>,
    ingestor: Ingestor,
    executor: QueryExecutor,
}

impl EventStore {
    /// Open the backend named by `uri` (`memory://` or `lsm://<path>`)
    pub fn open(uri: &str, config: EngineConfig) -> Result<Self> {
        let store = open_store(uri, config.storage.clone())?;
        info!(uri, "Opening event store");
        Self::with_store(store, config)
    }

    /// Build on an already opened backend
    pub fn with_store(store: Arc<dyn Store>, config: EngineConfig) -> Result<Self> {
        let sequence = Arc::new(Sequence::lease(
            store.clone(),
            &config.sequence_name,
            config.sequence_bandwidth,
        )?);

        Ok(Self {
            ingestor: Ingestor::new(store.clone(), sequence.clone()),
            executor: QueryExecutor::new(store.clone()),
            store,
            sequence,
        })
    }

    /// Index a batch of events
    pub fn ingest(&self, events: &[Event]) -> Result<usize> {
        self.ingestor.ingest(events)
    }

    /// Evaluate every data block of a query
    pub fn query(&self, request: &QueryRequest) -> QueryResponse {
        self.executor.execute(request)
    }

    /// Remove every indexed event
    ///
    /// Sequence leases are untouched, so ids keep increasing across a wipe
    /// and any later restart.
    pub fn wipe(&self) -> Result<()> {
        self.store.drop_index().map_err(|e| e.unavailable())?;
        info!("Wiped event store");
        Ok(())
    }

    /// Engine statistics
    pub fn stats(&self) -> EngineStats {
        EngineStats {
            ingest: self.ingestor.stats(),
            storage: self.store.stats(),
            next_event_id: self.sequence.peek(),
        }
    }

    /// Underlying store
    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    /// Flush and close the backend
    pub fn close(&self) -> Result<()> {
        self.store.close()
    }
}
