//! End-to-end tests driving the event store through JSON queries

use eventstore_core::{EngineConfig, Event, EventStore, QueryRequest};
use serde_json::{json, Value};
use tempfile::TempDir;

fn seed_basic(store: &EventStore) {
    store
        .ingest(&[
            Event::new("tag1", 1001)
                .with_dimension("dim1", "foo")
                .with_dimension("dim2", "bar2"),
            Event::new("tag1", 1002)
                .with_dimension("dim1", "foo")
                .with_dimension("dim2", "bar2")
                .with_dimension("dim3", "oof"),
        ])
        .unwrap();
}

fn run(store: &EventStore, query: Value) -> Value {
    let request: QueryRequest = serde_json::from_value(query).unwrap();
    serde_json::to_value(store.query(&request)).unwrap()
}

fn block(keys: Value, filters: Value, operations: Value, hide_data: bool) -> Value {
    json!({
        "data": [{
            "name": "test",
            "tag": "tag1",
            "keys": keys,
            "filters": filters,
            "operations": operations,
            "hideData": hide_data,
        }]
    })
}

/// Rows with the ids removed, since ids depend on the lease state
fn rows(result: &Value) -> Vec<Value> {
    result["data"][0]["result"]
        .as_array()
        .unwrap()
        .iter()
        .map(|row| {
            let mut row = row.clone();
            row.as_object_mut().unwrap().remove("id");
            row
        })
        .collect()
}

fn memory_store() -> EventStore {
    EventStore::open("memory://", EngineConfig::default()).unwrap()
}

#[test]
fn match_all_projects_keys() {
    let store = memory_store();
    seed_basic(&store);

    let result = run(
        &store,
        block(
            json!(["dim1", "dim2", "dim3"]),
            json!([{"type": "eq", "key": "dim1", "value": "foo"}]),
            json!([]),
            false,
        ),
    );

    assert_eq!(result["data"][0]["name"], "test");
    assert_eq!(result["data"][0]["meta"], json!({}));
    assert_eq!(
        rows(&result),
        vec![
            json!({
                "ts": 1001,
                "tag": "tag1",
                "data": [
                    {"key": "dim1", "value": "foo"},
                    {"key": "dim2", "value": "bar2"},
                ],
            }),
            json!({
                "ts": 1002,
                "tag": "tag1",
                "data": [
                    {"key": "dim1", "value": "foo"},
                    {"key": "dim2", "value": "bar2"},
                    {"key": "dim3", "value": "oof"},
                ],
            }),
        ]
    );
}

#[test]
fn conflicting_filters_match_nothing() {
    let store = memory_store();
    seed_basic(&store);

    let result = run(
        &store,
        block(
            json!(["dim1", "dim2"]),
            json!([
                {"type": "eq", "key": "dim1", "value": "foo"},
                {"type": "eq", "key": "dim2", "value": "foo"},
            ]),
            json!([]),
            false,
        ),
    );
    assert!(rows(&result).is_empty());
}

#[test]
fn filter_values_come_before_projected_values() {
    let store = memory_store();
    seed_basic(&store);

    let result = run(
        &store,
        block(
            json!(["dim1", "dim2"]),
            json!([
                {"type": "eq", "key": "dim1", "value": "foo"},
                {"type": "eq", "key": "dim3", "value": "oof"},
            ]),
            json!([]),
            false,
        ),
    );

    assert_eq!(
        rows(&result),
        vec![json!({
            "ts": 1002,
            "tag": "tag1",
            "data": [
                {"key": "dim1", "value": "foo"},
                {"key": "dim3", "value": "oof"},
                {"key": "dim2", "value": "bar2"},
            ],
        })]
    );
}

#[test]
fn aggregates_with_hidden_rows() {
    let store = memory_store();
    seed_basic(&store);

    let count_all = run(
        &store,
        block(
            json!(["dim1", "dim2", "dim3"]),
            json!([{"type": "eq", "key": "dim1", "value": "foo"}]),
            json!([{"type": "count"}]),
            true,
        ),
    );
    assert_eq!(count_all["data"][0]["meta"], json!({"count": 2}));
    assert!(rows(&count_all).is_empty());

    let count_one = run(
        &store,
        block(
            json!(["dim1", "dim2"]),
            json!([
                {"type": "eq", "key": "dim1", "value": "foo"},
                {"type": "eq", "key": "dim3", "value": "oof"},
            ]),
            json!([{"type": "count"}]),
            true,
        ),
    );
    assert_eq!(count_one["data"][0]["meta"], json!({"count": 1}));

    let unique = run(
        &store,
        block(
            json!(["dim1", "dim2", "dim3"]),
            json!([{"type": "eq", "key": "dim1", "value": "foo"}]),
            json!([{"type": "uniqueCount", "key": "dim1"}]),
            true,
        ),
    );
    assert_eq!(unique["data"][0]["meta"], json!({"uniqueCount": 1}));
}

#[test]
fn regex_filter() {
    let store = memory_store();
    store
        .ingest(&[
            Event::new("tag1", 1001).with_dimension("a", "foo1"),
            Event::new("tag1", 1002).with_dimension("a", "foobar"),
            Event::new("tag1", 1003).with_dimension("a", "foo2"),
        ])
        .unwrap();

    let result = run(
        &store,
        block(
            json!(["dim1", "dim2"]),
            json!([{"type": "regex", "key": "a", "value": r"foo\d"}]),
            json!([]),
            false,
        ),
    );

    assert_eq!(
        rows(&result),
        vec![
            json!({"ts": 1001, "tag": "tag1", "data": [{"key": "a", "value": "foo1"}]}),
            json!({"ts": 1003, "tag": "tag1", "data": [{"key": "a", "value": "foo2"}]}),
        ]
    );
}

#[test]
fn blocks_fail_independently() {
    let store = memory_store();
    seed_basic(&store);

    let result = run(
        &store,
        json!({
            "data": [
                {
                    "name": "broken",
                    "tag": "tag1",
                    "filters": [{"type": "regex", "key": "dim1", "value": "("}],
                },
                {
                    "name": "ok",
                    "tag": "tag1",
                    "filters": [{"type": "eq", "key": "dim3", "value": "oof"}],
                    "operations": [{"type": "count"}],
                },
            ]
        }),
    );

    assert_eq!(result["data"][0]["name"], "broken");
    assert!(result["data"][0]["error"].is_string());
    assert_eq!(result["data"][1]["name"], "ok");
    assert!(result["data"][1].get("error").is_none());
    assert_eq!(result["data"][1]["meta"], json!({"count": 1}));
}

#[test]
fn wipe_clears_index() {
    let store = memory_store();
    seed_basic(&store);
    store.wipe().unwrap();

    let result = run(
        &store,
        block(
            json!([]),
            json!([{"type": "eq", "key": "dim1", "value": "foo"}]),
            json!([{"type": "count"}]),
            false,
        ),
    );
    assert_eq!(result["data"][0]["meta"], json!({"count": 0}));
}

#[test]
fn lsm_index_and_ids_survive_restart() {
    let temp_dir = TempDir::new().unwrap();
    let uri = format!("lsm://{}", temp_dir.path().display());

    let first_ids = {
        let store = EventStore::open(&uri, EngineConfig::default()).unwrap();
        seed_basic(&store);
        let result = run(
            &store,
            block(
                json!([]),
                json!([{"type": "eq", "key": "dim1", "value": "foo"}]),
                json!([]),
                false,
            ),
        );
        store.close().unwrap();
        result["data"][0]["result"]
            .as_array()
            .unwrap()
            .iter()
            .map(|row| row["id"].as_u64().unwrap())
            .collect::<Vec<_>>()
    };
    assert_eq!(first_ids.len(), 2);

    let store = EventStore::open(&uri, EngineConfig::default()).unwrap();
    store
        .ingest(&[Event::new("tag1", 1003).with_dimension("dim1", "foo")])
        .unwrap();

    let result = run(
        &store,
        block(
            json!(["dim3"]),
            json!([{"type": "eq", "key": "dim1", "value": "foo"}]),
            json!([{"type": "count"}]),
            false,
        ),
    );

    assert_eq!(result["data"][0]["meta"], json!({"count": 3}));
    let ids: Vec<u64> = result["data"][0]["result"]
        .as_array()
        .unwrap()
        .iter()
        .map(|row| row["id"].as_u64().unwrap())
        .collect();
    assert_eq!(&ids[..2], &first_ids[..]);
    assert!(first_ids.iter().all(|id| *id < ids[2]));
    assert_eq!(
        result["data"][0]["result"][1]["data"][1],
        json!({"key": "dim3", "value": "oof"})
    );
}
