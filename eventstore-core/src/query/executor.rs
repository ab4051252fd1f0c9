//! Query executor
//!
//! Evaluates data blocks against the index through prefix scans and
//! id-ordered merge intersection.

use super::{
    accumulator_for, BlockResult, DataBlock, Filter, FilterKind, Meta, OperationKind,
    QueryRequest, QueryResponse,
};
use crate::codec::{self, IndexKey};
use crate::storage::Store;
use crate::{DecodedEvent, Dimension, EventStoreError, Result};
use regex::Regex;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

/// How a scanned value is tested against a filter
enum Matcher {
    /// The scan prefix already pins the value
    Equal,
    Regex(Regex),
}

impl Matcher {
    fn for_filter(filter: &Filter) -> Result<Option<Self>> {
        match filter.kind {
            FilterKind::Equal => Ok(Some(Matcher::Equal)),
            FilterKind::Regex => Regex::new(&filter.value)
                .map(|re| Some(Matcher::Regex(re)))
                .map_err(|e| {
                    EventStoreError::Query(format!(
                        "invalid regex for key '{}': {}",
                        filter.key, e
                    ))
                }),
            FilterKind::Unsupported(_) => Ok(None),
        }
    }

    fn matches(&self, value: &str) -> bool {
        match self {
            Matcher::Equal => true,
            Matcher::Regex(re) => re.is_match(value),
        }
    }
}

/// Query executor
pub struct QueryExecutor {
    store: Arc<dyn Store>,
}

impl QueryExecutor {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Evaluate every block of `request` independently
    pub fn execute(&self, request: &QueryRequest) -> QueryResponse {
        QueryResponse {
            data: request
                .data
                .iter()
                .map(|block| self.execute_block(block))
                .collect(),
        }
    }

    /// Evaluate one block; failures end up in the block's `error`
    pub fn execute_block(&self, block: &DataBlock) -> BlockResult {
        let start = Instant::now();
        let mut warnings = Vec::new();

        match self.evaluate(block, &mut warnings) {
            Ok((events, meta)) => {
                debug!(
                    block = %block.name,
                    matched = events.len(),
                    elapsed_ms = start.elapsed().as_secs_f64() * 1000.0,
                    "Evaluated query block"
                );

                BlockResult {
                    name: block.name.clone(),
                    result: if block.hide_data { Vec::new() } else { events },
                    meta,
                    warnings,
                    error: None,
                }
            }
            Err(e) => {
                warn!(block = %block.name, error = %e, "Query block failed");
                BlockResult {
                    name: block.name.clone(),
                    result: Vec::new(),
                    meta: Meta::default(),
                    warnings,
                    error: Some(e.to_string()),
                }
            }
        }
    }

    /// Matched rows and the block's aggregates
    fn evaluate(
        &self,
        block: &DataBlock,
        warnings: &mut Vec<String>,
    ) -> Result<(Vec<DecodedEvent>, Meta)> {
        let mut current: Option<Vec<DecodedEvent>> = None;
        let mut fetched: HashSet<&str> = HashSet::new();

        for filter in &block.filters {
            fetched.insert(filter.key.as_str());

            let Some(matcher) = Matcher::for_filter(filter)? else {
                warnings.push(
                    EventStoreError::UnsupportedFilterType {
                        kind: String::from(filter.kind.clone()),
                        key: filter.key.clone(),
                    }
                    .to_string(),
                );
                continue;
            };

            let prefix = match filter.kind {
                FilterKind::Equal => {
                    codec::prefix_by_tag_dimension_value(&block.tag, &filter.key, &filter.value)
                }
                _ => codec::prefix_by_tag_dimension(&block.tag, &filter.key),
            };

            let candidates = self
                .scan(&prefix, warnings)?
                .into_iter()
                .filter(|key| matcher.matches(&key.value));

            current = Some(match current.take() {
                None => Self::seed(candidates),
                Some(events) => Self::intersect(events, candidates),
            });
        }

        let mut events = current.unwrap_or_default();
        if events.is_empty() {
            let meta = Self::aggregate(block, &events, warnings);
            return Ok((events, meta));
        }

        for key in &block.keys {
            if !fetched.insert(key.as_str()) {
                continue;
            }
            let prefix = codec::prefix_by_tag_dimension(&block.tag, key);
            Self::project(&mut events, self.scan(&prefix, warnings)?);
        }

        // uniqueCount keys the rows do not carry are resolved on a copy
        let hidden: Vec<&str> = block
            .operations
            .iter()
            .filter(|op| op.kind == OperationKind::UniqueCount)
            .map(|op| op.key.as_str())
            .filter(|key| fetched.insert(*key))
            .collect();

        let meta = if hidden.is_empty() {
            Self::aggregate(block, &events, warnings)
        } else {
            let mut shadow = events.clone();
            for key in hidden {
                let prefix = codec::prefix_by_tag_dimension(&block.tag, key);
                Self::project(&mut shadow, self.scan(&prefix, warnings)?);
            }
            Self::aggregate(block, &shadow, warnings)
        };

        Ok((events, meta))
    }

    /// Start the event set, ordered by id
    fn seed(candidates: impl Iterator<Item = IndexKey>) -> Vec<DecodedEvent> {
        let mut events: Vec<DecodedEvent> = candidates
            .map(|key| {
                DecodedEvent::new(
                    key.event_id,
                    key.ts,
                    key.tag,
                    Dimension::new(key.dimension, key.value),
                )
            })
            .collect();
        events.sort_by_key(|e| e.id);
        events.dedup_by_key(|e| e.id);
        events
    }

    /// Keep only events hit by a candidate, attaching the candidate's pair
    fn intersect(
        mut events: Vec<DecodedEvent>,
        candidates: impl Iterator<Item = IndexKey>,
    ) -> Vec<DecodedEvent> {
        let mut matched = vec![false; events.len()];

        for key in candidates {
            if let Ok(i) = events.binary_search_by_key(&key.event_id, |e| e.id) {
                if !matched[i] {
                    matched[i] = true;
                    events[i].data.push(Dimension::new(key.dimension, key.value));
                }
            }
        }

        let mut flags = matched.into_iter();
        events.retain(|_| flags.next().unwrap_or(false));
        events
    }

    /// Attach pairs to events already in the set; never adds events
    fn project(events: &mut [DecodedEvent], keys: Vec<IndexKey>) {
        for key in keys {
            if let Ok(i) = events.binary_search_by_key(&key.event_id, |e| e.id) {
                let event = &mut events[i];
                if event.value_of(&key.dimension).is_none() {
                    event.data.push(Dimension::new(key.dimension, key.value));
                }
            }
        }
    }

    fn aggregate(block: &DataBlock, events: &[DecodedEvent], warnings: &mut Vec<String>) -> Meta {
        let mut meta = Meta::default();

        for operation in &block.operations {
            match accumulator_for(operation) {
                Some(mut acc) => {
                    for event in events {
                        acc.add(event);
                    }
                    meta.insert(acc.result());
                }
                None => warnings.push(
                    EventStoreError::UnsupportedOperationType {
                        kind: String::from(operation.kind.clone()),
                        key: operation.key.clone(),
                    }
                    .to_string(),
                ),
            }
        }

        meta
    }

    /// Scan and decode, skipping keys that fail to decode
    fn scan(&self, prefix: &[u8], warnings: &mut Vec<String>) -> Result<Vec<IndexKey>> {
        let raw = self.store.scan_prefix(prefix).map_err(|e| e.unavailable())?;
        let mut keys = Vec::with_capacity(raw.len());
        let mut skipped = 0usize;

        for bytes in &raw {
            match codec::decode(bytes) {
                Ok(key) => keys.push(key),
                Err(e) => {
                    warn!(error = %e, "Skipping malformed index key");
                    skipped += 1;
                }
            }
        }

        if skipped > 0 {
            warnings.push(format!("skipped {} malformed index keys", skipped));
        }
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::Ingestor;
    use crate::query::Aggregate;
    use crate::sequence::Sequence;
    use crate::storage::{KeyValue, MemoryStore, StoreStats};
    use crate::{Event, EventId};
    use bytes::Bytes;

    /// Store whose scans always fail
    struct BrokenScans;

    impl Store for BrokenScans {
        fn lookup(&self, _key: &[u8]) -> Result<Option<Bytes>> {
            Ok(None)
        }
        fn write_batch(&self, _entries: Vec<KeyValue>) -> Result<()> {
            Ok(())
        }
        fn scan_prefix(&self, _prefix: &[u8]) -> Result<Vec<Bytes>> {
            Err(EventStoreError::Corruption("bad block".into()))
        }
        fn drop_index(&self) -> Result<()> {
            Ok(())
        }
        fn stats(&self) -> StoreStats {
            StoreStats::default()
        }
        fn close(&self) -> Result<()> {
            Ok(())
        }
    }

    /// E1, E2, E3 of the pageview walkthrough, ids 0, 1, 2
    fn pageviews() -> (Arc<dyn Store>, QueryExecutor) {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let sequence = Arc::new(Sequence::lease(store.clone(), "event_id", 1000).unwrap());
        let ingestor = Ingestor::new(store.clone(), sequence);

        ingestor
            .ingest(&[
                Event::new("pageview", 100)
                    .with_dimension("user", "alice")
                    .with_dimension("page", "home"),
                Event::new("pageview", 101)
                    .with_dimension("user", "bob")
                    .with_dimension("page", "home"),
                Event::new("pageview", 102)
                    .with_dimension("user", "alice")
                    .with_dimension("page", "about"),
            ])
            .unwrap();

        let executor = QueryExecutor::new(store.clone());
        (store, executor)
    }

    fn home() -> DataBlock {
        DataBlock::new("home", "pageview").filter(FilterKind::Equal, "page", "home")
    }

    #[test]
    fn test_equal_filter() {
        let (_, executor) = pageviews();
        let result = executor.execute_block(&home());

        assert_eq!(result.ids(), vec![0, 1]);
        assert!(result.warnings.is_empty());
        assert_eq!(result.result[0].data, vec![Dimension::new("page", "home")]);
        assert_eq!(result.result[0].ts, 100);
        assert_eq!(result.result[0].tag, "pageview");
    }

    #[test]
    fn test_filters_intersect() {
        let (_, executor) = pageviews();
        let result =
            executor.execute_block(&home().filter(FilterKind::Equal, "user", "alice"));

        assert_eq!(result.ids(), vec![0]);
        assert_eq!(
            result.result[0].data,
            vec![Dimension::new("page", "home"), Dimension::new("user", "alice")]
        );
    }

    #[test]
    fn test_aggregates() {
        let (_, executor) = pageviews();
        let result = executor.execute_block(
            &home()
                .operation(OperationKind::Count, "")
                .operation(OperationKind::UniqueCount, "user"),
        );

        assert_eq!(result.meta.count(), Some(2));
        assert_eq!(result.meta.unique_count(), Some(2));
        // Counted without being asked for as a key
        assert_eq!(result.result[0].value_of("user"), None);
        assert_eq!(result.result[0].data, vec![Dimension::new("page", "home")]);

        let listed = executor.execute_block(
            &home()
                .key("user")
                .operation(OperationKind::UniqueCount, "user"),
        );
        assert_eq!(listed.meta.unique_count(), Some(2));
        assert_eq!(listed.result[1].value_of("user"), Some("bob"));

        let missing = executor.execute_block(
            &home().operation(OperationKind::UniqueCount, "country"),
        );
        assert_eq!(missing.meta.unique_count(), Some(0));
    }

    #[test]
    fn test_hide_data_keeps_aggregates() {
        let (_, executor) = pageviews();
        let result = executor.execute_block(
            &home()
                .operation(OperationKind::Count, "")
                .hide_data(true),
        );

        assert!(result.result.is_empty());
        assert_eq!(result.meta.iter().copied().collect::<Vec<_>>(), vec![Aggregate::Count(2)]);
    }

    #[test]
    fn test_regex_filter() {
        let (_, executor) = pageviews();
        let block = DataBlock::new("ho", "pageview").filter(FilterKind::Regex, "page", "^ho");
        assert_eq!(executor.execute_block(&block).ids(), vec![0, 1]);

        // Unanchored search
        let block = DataBlock::new("bo", "pageview").filter(FilterKind::Regex, "page", "bo");
        assert_eq!(executor.execute_block(&block).ids(), vec![2]);
    }

    #[test]
    fn test_invalid_regex_fails_block_only() {
        let (_, executor) = pageviews();
        let request = QueryRequest {
            data: vec![
                DataBlock::new("bad", "pageview").filter(FilterKind::Regex, "page", "(unclosed"),
                home(),
            ],
        };

        let response = executor.execute(&request);
        assert!(response.data[0].is_error());
        assert!(response.data[0].result.is_empty());
        assert!(!response.data[1].is_error());
        assert_eq!(response.data[1].ids(), vec![0, 1]);
    }

    #[test]
    fn test_projection_never_grows_set() {
        let (_, executor) = pageviews();
        let result = executor.execute_block(&home().key("user").key("page"));

        assert_eq!(result.ids(), vec![0, 1]);
        assert_eq!(result.result[1].value_of("user"), Some("bob"));
        // page came from the filter, not a second scan
        assert_eq!(result.result[1].data.len(), 2);
    }

    #[test]
    fn test_unsupported_filter_and_operation_warn() {
        let (_, executor) = pageviews();
        let block = DataBlock::new("w", "pageview")
            .filter(FilterKind::Unsupported("prefix".into()), "country", "US")
            .filter(FilterKind::Equal, "page", "about")
            .key("country")
            .operation(OperationKind::Unsupported("sum".into()), "duration");

        let result = executor.execute_block(&block);
        assert_eq!(result.ids(), vec![2]);
        assert_eq!(
            result.warnings,
            vec![
                "Unsupported filter type 'prefix' on key 'country'".to_string(),
                "Unsupported operation type 'sum' on key 'duration'".to_string(),
            ]
        );
        assert!(result.error.is_none());
    }

    #[test]
    fn test_no_filters_matches_nothing() {
        let (_, executor) = pageviews();
        let block = DataBlock::new("all", "pageview")
            .key("user")
            .operation(OperationKind::Count, "");

        let result = executor.execute_block(&block);
        assert!(result.result.is_empty());
        assert_eq!(result.meta.count(), Some(0));
    }

    #[test]
    fn test_tag_scopes_scans() {
        let (_, executor) = pageviews();
        let block = DataBlock::new("other", "click").filter(FilterKind::Equal, "page", "home");
        assert!(executor.execute_block(&block).result.is_empty());
    }

    #[test]
    fn test_out_of_order_timestamps_intersect() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let sequence = Arc::new(Sequence::lease(store.clone(), "event_id", 1000).unwrap());
        let ingestor = Ingestor::new(store.clone(), sequence);

        // Later ids carry earlier timestamps
        let events: Vec<Event> = (0..20)
            .map(|i| {
                Event::new("t", 1000 - i)
                    .with_dimension("a", "x")
                    .with_dimension("b", if i % 2 == 0 { "even" } else { "odd" })
            })
            .collect();
        ingestor.ingest(&events).unwrap();

        let block = DataBlock::new("q", "t")
            .filter(FilterKind::Equal, "a", "x")
            .filter(FilterKind::Equal, "b", "even");
        let ids = QueryExecutor::new(store).execute_block(&block).ids();

        let expected: Vec<EventId> = (0..20).filter(|i| i % 2 == 0).collect();
        assert_eq!(ids, expected);
    }

    #[test]
    fn test_malformed_key_is_skipped_with_warning() {
        let (store, executor) = pageviews();
        let mut bad = codec::prefix_by_tag_dimension_value("pageview", "page", "home").to_vec();
        bad.extend_from_slice(b"short");
        store.write_batch(vec![KeyValue::key_only(bad)]).unwrap();

        let result = executor.execute_block(&home());
        assert_eq!(result.ids(), vec![0, 1]);
        assert_eq!(result.warnings.len(), 1);
    }

    #[test]
    fn test_scan_failure_is_block_error() {
        let executor = QueryExecutor::new(Arc::new(BrokenScans));
        let result = executor.execute_block(&home().operation(OperationKind::Count, ""));

        let error = result.error.unwrap();
        assert!(error.contains("Storage unavailable"), "{}", error);
        assert!(result.meta.is_empty());
    }
}
