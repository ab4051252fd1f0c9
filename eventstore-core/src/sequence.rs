//! Durable monotonic id sequence
//!
//! Ids are handed out from an in-memory range `[next, limit)`. When the range
//! runs dry, `limit + bandwidth` is persisted under the sequence key before any
//! id from the new range is returned, so a restart resumes from the persisted
//! limit and never re-issues an id. Ids leased but not handed out before a
//! restart are skipped.

use crate::codec;
use crate::storage::{KeyValue, Store};
use crate::{EventId, EventStoreError, Result};
use bytes::Bytes;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::debug;

/// Leased id range
#[derive(Debug)]
struct Lease {
    next: EventId,
    limit: EventId,
}

/// Monotonic id allocator backed by a [`Store`]
pub struct Sequence {
    store: Arc<dyn Store>,
    key: Bytes,
    bandwidth: u64,
    lease: Mutex<Lease>,
}

impl Sequence {
    /// Open the named sequence, resuming after any persisted lease
    ///
    /// No store write happens until the first [`next`](Sequence::next).
    pub fn lease(store: Arc<dyn Store>, name: &str, bandwidth: u64) -> Result<Self> {
        if bandwidth == 0 {
            return Err(EventStoreError::Config(
                "sequence bandwidth must be at least 1".into(),
            ));
        }

        let key = codec::sequence_key(name);
        let start = Self::read_limit(store.as_ref(), &key)?;
        debug!(name, start, bandwidth, "Leased sequence");

        Ok(Self {
            store,
            key,
            bandwidth,
            lease: Mutex::new(Lease {
                next: start,
                limit: start,
            }),
        })
    }

    /// Next id, strictly greater than every id previously returned
    pub fn next(&self) -> Result<EventId> {
        let mut lease = self.lease.lock();

        if lease.next >= lease.limit {
            let limit = lease.limit.checked_add(self.bandwidth).ok_or_else(|| {
                EventStoreError::AllocatorUnavailable("sequence exhausted".into())
            })?;
            self.persist(limit)?;
            debug!(from = lease.limit, to = limit, "Extended sequence lease");
            lease.limit = limit;
        }

        let id = lease.next;
        lease.next += 1;
        Ok(id)
    }

    /// Next id that would be returned, without allocating it
    pub fn peek(&self) -> EventId {
        self.lease.lock().next
    }

    fn persist(&self, limit: EventId) -> Result<()> {
        let value = Bytes::copy_from_slice(&limit.to_be_bytes());
        self.store
            .write_batch(vec![KeyValue::new(self.key.clone(), value)])
            .map_err(|e| EventStoreError::AllocatorUnavailable(e.to_string()))
    }

    fn read_limit(store: &dyn Store, key: &[u8]) -> Result<EventId> {
        let value = store
            .lookup(key)
            .map_err(|e| EventStoreError::AllocatorUnavailable(e.to_string()))?;

        match value {
            None => Ok(0),
            Some(raw) => {
                let bytes: [u8; 8] = raw.as_ref().try_into().map_err(|_| {
                    EventStoreError::AllocatorUnavailable(format!(
                        "persisted sequence value has {} bytes, expected 8",
                        raw.len()
                    ))
                })?;
                Ok(u64::from_be_bytes(bytes))
            }
        }
    }
}
