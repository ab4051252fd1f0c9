//! Query engine
//!
//! A query carries one or more named data blocks. Each block is evaluated on
//! its own against the index:
//!
//! 1. filters run in order; the first supported filter seeds the event set
//!    and every later filter intersects with it by event id
//! 2. projection keys not covered by a filter are attached to events already
//!    in the set
//! 3. aggregate operations run over the final set
//! 4. `hideData` drops the rows but keeps the aggregates
//!
//! A failing block reports its error without affecting sibling blocks.

mod aggregates;
mod executor;

pub use aggregates::*;
pub use executor::QueryExecutor;

use crate::DecodedEvent;
use serde::{Deserialize, Serialize};

/// A query request
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueryRequest {
    pub data: Vec<DataBlock>,
}

/// A named query block
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataBlock {
    /// Name echoed back in the block result
    #[serde(default)]
    pub name: String,
    /// Tag namespace every scan of the block runs in
    pub tag: String,
    /// Dimensions to attach to every matched event
    #[serde(default)]
    pub keys: Vec<String>,
    /// Filters, evaluated in order and combined with AND
    #[serde(default)]
    pub filters: Vec<Filter>,
    /// Aggregates to compute over the matched events; a `uniqueCount` key
    /// is resolved even when it is not listed in `keys`, without adding it
    /// to the rows
    #[serde(default)]
    pub operations: Vec<Operation>,
    /// Return aggregates only
    #[serde(default)]
    pub hide_data: bool,
}

impl DataBlock {
    pub fn new(name: impl Into<String>, tag: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tag: tag.into(),
            ..Default::default()
        }
    }

    /// Add a filter
    pub fn filter(mut self, kind: FilterKind, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.filters.push(Filter {
            kind,
            key: key.into(),
            value: value.into(),
        });
        self
    }

    /// Add a projection key
    pub fn key(mut self, key: impl Into<String>) -> Self {
        self.keys.push(key.into());
        self
    }

    /// Add an operation
    pub fn operation(mut self, kind: OperationKind, key: impl Into<String>) -> Self {
        self.operations.push(Operation {
            kind,
            key: key.into(),
        });
        self
    }

    /// Set `hideData`
    pub fn hide_data(mut self, hide: bool) -> Self {
        self.hide_data = hide;
        self
    }
}

/// A single dimension filter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Filter {
    #[serde(rename = "type")]
    pub kind: FilterKind,
    pub key: String,
    pub value: String,
}

/// Filter type
///
/// Unknown type strings are kept so the skip warning can name them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum FilterKind {
    /// Value equals the literal (`equal` or `eq`)
    Equal,
    /// Pattern matches somewhere in the value
    Regex,
    /// Any other type string; skipped with a warning
    Unsupported(String),
}

impl From<String> for FilterKind {
    fn from(kind: String) -> Self {
        match kind.as_str() {
            "equal" | "eq" => FilterKind::Equal,
            "regex" => FilterKind::Regex,
            _ => FilterKind::Unsupported(kind),
        }
    }
}

impl From<FilterKind> for String {
    fn from(kind: FilterKind) -> Self {
        match kind {
            FilterKind::Equal => "equal".to_string(),
            FilterKind::Regex => "regex".to_string(),
            FilterKind::Unsupported(kind) => kind,
        }
    }
}

/// An aggregate operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Operation {
    #[serde(rename = "type")]
    pub kind: OperationKind,
    #[serde(default)]
    pub key: String,
}

/// Operation type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum OperationKind {
    /// Number of matched events
    Count,
    /// Distinct values of a dimension among matched events
    UniqueCount,
    /// Any other type string; skipped with a warning
    Unsupported(String),
}

impl From<String> for OperationKind {
    fn from(kind: String) -> Self {
        match kind.as_str() {
            "count" => OperationKind::Count,
            "uniqueCount" => OperationKind::UniqueCount,
            _ => OperationKind::Unsupported(kind),
        }
    }
}

impl From<OperationKind> for String {
    fn from(kind: OperationKind) -> Self {
        match kind {
            OperationKind::Count => "count".to_string(),
            OperationKind::UniqueCount => "uniqueCount".to_string(),
            OperationKind::Unsupported(kind) => kind,
        }
    }
}

/// Query response
#[derive(Debug, Clone, Default, Serialize)]
pub struct QueryResponse {
    pub data: Vec<BlockResult>,
}

/// Result of one data block
#[derive(Debug, Clone, Default, Serialize)]
pub struct BlockResult {
    pub name: String,
    pub result: Vec<DecodedEvent>,
    pub meta: Meta,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl BlockResult {
    /// Check if the block failed
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    /// Ids of the returned events
    pub fn ids(&self) -> Vec<crate::EventId> {
        self.result.iter().map(|e| e.id).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_data_block() {
        let json = r#"{
            "name": "homepage",
            "tag": "pageview",
            "keys": ["user"],
            "filters": [
                {"type": "eq", "key": "page", "value": "home"},
                {"type": "regex", "key": "user", "value": "^a"},
                {"type": "prefix", "key": "country", "value": "U"}
            ],
            "operations": [
                {"type": "count"},
                {"type": "uniqueCount", "key": "user"},
                {"type": "sum", "key": "duration"}
            ],
            "hideData": true
        }"#;

        let block: DataBlock = serde_json::from_str(json).unwrap();
        assert_eq!(block.name, "homepage");
        assert!(block.hide_data);
        assert_eq!(
            block.filters.iter().map(|f| f.kind.clone()).collect::<Vec<_>>(),
            vec![
                FilterKind::Equal,
                FilterKind::Regex,
                FilterKind::Unsupported("prefix".into())
            ]
        );
        assert_eq!(
            block.operations.iter().map(|o| o.kind.clone()).collect::<Vec<_>>(),
            vec![
                OperationKind::Count,
                OperationKind::UniqueCount,
                OperationKind::Unsupported("sum".into())
            ]
        );
    }

    #[test]
    fn test_kinds_serialize_as_type_strings() {
        let filter: Filter =
            serde_json::from_str(r#"{"type": "eq", "key": "page", "value": "home"}"#).unwrap();
        assert_eq!(
            serde_json::to_value(&filter).unwrap(),
            serde_json::json!({"type": "equal", "key": "page", "value": "home"})
        );

        let op = Operation {
            kind: OperationKind::Unsupported("groupBy".into()),
            key: "user".into(),
        };
        assert_eq!(
            serde_json::to_value(&op).unwrap(),
            serde_json::json!({"type": "groupBy", "key": "user"})
        );
    }

    #[test]
    fn test_block_defaults() {
        let block: DataBlock = serde_json::from_str(r#"{"tag": "pageview"}"#).unwrap();
        assert!(block.filters.is_empty());
        assert!(block.keys.is_empty());
        assert!(!block.hide_data);
    }

    #[test]
    fn test_block_result_omits_empty_fields() {
        let result = BlockResult {
            name: "b".into(),
            ..Default::default()
        };
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json, serde_json::json!({"name": "b", "result": [], "meta": {}}));
    }
}
