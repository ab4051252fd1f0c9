//! Index key codec
//!
//! Every fact "event `id` of `tag` had `dimension = value` at `ts`" is stored as
//! an existence-only key:
//!
//! ```text
//! | "e:" | term(tag) | term(dimension) | term(value) | ts (i64, sign-flipped BE) | event_id (u64 BE) |
//! ```
//!
//! `term` is the escaped, `0x00`-terminated encoding from [`terminated`], so
//! any string round-trips and a prefix made of whole fields matches exactly
//! those fields. Flipping the sign bit of the timestamp makes byte order equal
//! numeric order for negative timestamps as well.
//!
//! Sequence leases live in a separate `"s:"` namespace.

pub mod terminated;

use crate::{EventId, EventStoreError, Result, Timestamp};
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Namespace prefix for index entries
pub const INDEX_NAMESPACE: &[u8] = b"e:";

/// Namespace prefix for persisted sequence leases
pub const SEQUENCE_NAMESPACE: &[u8] = b"s:";

/// Fixed-width trailer: timestamp + event id
const TRAILER_LEN: usize = 16;

const SIGN_BIT: u64 = 1 << 63;

/// A decoded index key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexKey {
    pub tag: String,
    pub dimension: String,
    pub value: String,
    pub ts: Timestamp,
    pub event_id: EventId,
}

impl IndexKey {
    /// Create a new index key
    pub fn new(
        tag: impl Into<String>,
        dimension: impl Into<String>,
        value: impl Into<String>,
        ts: Timestamp,
        event_id: EventId,
    ) -> Self {
        Self {
            tag: tag.into(),
            dimension: dimension.into(),
            value: value.into(),
            ts,
            event_id,
        }
    }

    /// Serialize the key for storage
    pub fn encode(&self) -> Bytes {
        encode(&self.tag, &self.dimension, &self.value, self.ts, self.event_id)
    }

    /// Deserialize a key read from storage
    pub fn decode(data: &[u8]) -> Result<Self> {
        decode(data)
    }
}

/// Encode an index key from its parts
pub fn encode(tag: &str, dimension: &str, value: &str, ts: Timestamp, event_id: EventId) -> Bytes {
    let mut buf = BytesMut::with_capacity(
        INDEX_NAMESPACE.len() + tag.len() + dimension.len() + value.len() + 3 + TRAILER_LEN,
    );
    put_fields(&mut buf, &[tag, dimension, value]);
    buf.put_u64(ts_to_ordered(ts));
    buf.put_u64(event_id);
    buf.freeze()
}

/// Decode an index key
pub fn decode(data: &[u8]) -> Result<IndexKey> {
    let mut rest = data.strip_prefix(INDEX_NAMESPACE).ok_or_else(|| {
        EventStoreError::MalformedKey(format!(
            "missing index namespace in key of {} bytes",
            data.len()
        ))
    })?;

    let tag = read_field(&mut rest, "tag")?;
    let dimension = read_field(&mut rest, "dimension")?;
    let value = read_field(&mut rest, "value")?;

    if rest.len() != TRAILER_LEN {
        return Err(EventStoreError::MalformedKey(format!(
            "expected {} trailing bytes, got {}",
            TRAILER_LEN,
            rest.len()
        )));
    }

    let mut cursor = rest;
    let ts = cursor.get_u64();
    let event_id = cursor.get_u64();

    Ok(IndexKey {
        tag,
        dimension,
        value,
        ts: ordered_to_ts(ts),
        event_id,
    })
}

/// Prefix shared by every entry of `tag` with `dimension = value`
///
/// Scanning it yields keys in ascending `(ts, event_id)` order.
pub fn prefix_by_tag_dimension_value(tag: &str, dimension: &str, value: &str) -> Bytes {
    let mut buf = BytesMut::new();
    put_fields(&mut buf, &[tag, dimension, value]);
    buf.freeze()
}

/// Prefix shared by every entry of `tag` carrying `dimension`
///
/// Scanning it yields keys in ascending `(value, ts, event_id)` order.
pub fn prefix_by_tag_dimension(tag: &str, dimension: &str) -> Bytes {
    let mut buf = BytesMut::new();
    put_fields(&mut buf, &[tag, dimension]);
    buf.freeze()
}

/// Key holding the persisted lease limit of the named sequence
pub fn sequence_key(name: &str) -> Bytes {
    let mut buf = BytesMut::with_capacity(SEQUENCE_NAMESPACE.len() + name.len() + 1);
    buf.put_slice(SEQUENCE_NAMESPACE);
    terminated::serialize(name.as_bytes(), &mut buf);
    buf.freeze()
}

fn put_fields(buf: &mut BytesMut, fields: &[&str]) {
    buf.put_slice(INDEX_NAMESPACE);
    for field in fields {
        terminated::serialize(field.as_bytes(), buf);
    }
}

fn read_field(rest: &mut &[u8], name: &str) -> Result<String> {
    let raw = terminated::deserialize(rest)
        .map_err(|e| EventStoreError::MalformedKey(format!("{} field: {}", name, e)))?;
    String::from_utf8(raw)
        .map_err(|_| EventStoreError::MalformedKey(format!("{} field is not UTF-8", name)))
}

fn ts_to_ordered(ts: Timestamp) -> u64 {
    (ts as u64) ^ SIGN_BIT
}

fn ordered_to_ts(raw: u64) -> Timestamp {
    (raw ^ SIGN_BIT) as i64
}
