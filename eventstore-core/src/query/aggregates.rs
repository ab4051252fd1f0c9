//! Aggregate operations over matched events

use super::{Operation, OperationKind};
use crate::DecodedEvent;
use serde::ser::{Serialize, SerializeMap, Serializer};
use std::collections::HashSet;

/// A computed aggregate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Aggregate {
    Count(u64),
    UniqueCount(u64),
}

impl Aggregate {
    /// Name used as the key in block metadata
    pub fn name(&self) -> &'static str {
        match self {
            Aggregate::Count(_) => "count",
            Aggregate::UniqueCount(_) => "uniqueCount",
        }
    }

    pub fn value(&self) -> u64 {
        match self {
            Aggregate::Count(v) | Aggregate::UniqueCount(v) => *v,
        }
    }
}

/// Aggregates of one block, serialized as `{"count": n, "uniqueCount": n}`
///
/// A later aggregate of the same kind replaces an earlier one.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Meta {
    aggregates: Vec<Aggregate>,
}

impl Meta {
    /// Record an aggregate
    pub fn insert(&mut self, aggregate: Aggregate) {
        match self
            .aggregates
            .iter_mut()
            .find(|a| a.name() == aggregate.name())
        {
            Some(existing) => *existing = aggregate,
            None => self.aggregates.push(aggregate),
        }
    }

    /// Value recorded under `name`
    pub fn get(&self, name: &str) -> Option<u64> {
        self.aggregates
            .iter()
            .find(|a| a.name() == name)
            .map(Aggregate::value)
    }

    pub fn count(&self) -> Option<u64> {
        self.get("count")
    }

    pub fn unique_count(&self) -> Option<u64> {
        self.get("uniqueCount")
    }

    pub fn is_empty(&self) -> bool {
        self.aggregates.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Aggregate> {
        self.aggregates.iter()
    }
}

impl Serialize for Meta {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.aggregates.len()))?;
        for aggregate in &self.aggregates {
            map.serialize_entry(aggregate.name(), &aggregate.value())?;
        }
        map.end()
    }
}

/// Accumulator for computing an aggregate over events one at a time
pub trait Accumulator: Send + Sync {
    /// Add an event
    fn add(&mut self, event: &DecodedEvent);

    /// Get the current result
    fn result(&self) -> Aggregate;
}

/// Count accumulator
#[derive(Debug, Default)]
pub struct CountAccumulator {
    count: u64,
}

impl Accumulator for CountAccumulator {
    fn add(&mut self, _event: &DecodedEvent) {
        self.count += 1;
    }

    fn result(&self) -> Aggregate {
        Aggregate::Count(self.count)
    }
}

/// Distinct values of one dimension
///
/// Events that do not carry the dimension are skipped.
#[derive(Debug)]
pub struct UniqueCountAccumulator {
    key: String,
    values: HashSet<String>,
}

impl UniqueCountAccumulator {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            values: HashSet::new(),
        }
    }
}

impl Accumulator for UniqueCountAccumulator {
    fn add(&mut self, event: &DecodedEvent) {
        if let Some(value) = event.value_of(&self.key) {
            if !self.values.contains(value) {
                self.values.insert(value.to_string());
            }
        }
    }

    fn result(&self) -> Aggregate {
        Aggregate::UniqueCount(self.values.len() as u64)
    }
}

/// Accumulator computing `operation`, or `None` for unsupported types
pub fn accumulator_for(operation: &Operation) -> Option<Box<dyn Accumulator>> {
    match operation.kind {
        OperationKind::Count => Some(Box::new(CountAccumulator::default())),
        OperationKind::UniqueCount => Some(Box::new(UniqueCountAccumulator::new(&operation.key))),
        OperationKind::Unsupported(_) => None,
    }
}
