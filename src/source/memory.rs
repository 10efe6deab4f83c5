//! In-memory record source
//!
//! Used by tests and benchmarks. Records are kept per table in key order,
//! so listings page the same way the SQLite source does.

use crate::catalog::EntityClass;
use crate::error::{SourceError, SourceResult};
use crate::source::{ConnectionFactory, ListingRow, Record, RecordSource};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

#[derive(Debug, Default)]
struct Tables {
    records: BTreeMap<String, BTreeMap<String, Record>>,
    broken: HashSet<(String, String)>,
}

/// Shared table storage; clones see the same data
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<RwLock<Tables>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, table: &str, record: Record) {
        self.inner
            .write()
            .records
            .entry(table.to_string())
            .or_default()
            .insert(record.id.clone(), record);
    }

    /// Delete a record, as if it vanished after indexing
    pub fn remove(&self, table: &str, id: &str) -> Option<Record> {
        self.inner.write().records.get_mut(table)?.remove(id)
    }

    /// Make fetches of one record fail with a non-transient query error
    pub fn break_record(&self, table: &str, id: &str) {
        self.inner.write().broken.insert((table.to_string(), id.to_string()));
    }

    pub fn len(&self, table: &str) -> usize {
        self.inner.read().records.get(table).map_or(0, BTreeMap::len)
    }

    pub fn is_empty(&self, table: &str) -> bool {
        self.len(table) == 0
    }
}

/// Hands out connections to a [`MemoryStore`]
#[derive(Debug, Clone)]
pub struct MemoryFactory {
    store: MemoryStore,
}

impl MemoryFactory {
    pub fn new(store: MemoryStore) -> Self {
        Self { store }
    }
}

impl ConnectionFactory for MemoryFactory {
    type Connection = MemorySource;

    fn connect(&self) -> SourceResult<MemorySource> {
        Ok(MemorySource {
            store: self.store.clone(),
        })
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}

/// A connection to a [`MemoryStore`]
#[derive(Debug, Clone)]
pub struct MemorySource {
    store: MemoryStore,
}

impl MemorySource {
    pub fn new(store: MemoryStore) -> Self {
        Self { store }
    }
}

impl RecordSource for MemorySource {
    fn fetch(&mut self, class: &EntityClass, id: &str) -> SourceResult<Option<Record>> {
        let tables = self.store.inner.read();
        if tables.broken.contains(&(class.table.clone(), id.to_string())) {
            return Err(SourceError::Query {
                table: class.table.clone(),
                reason: format!("row '{}' is unreadable", id),
            });
        }
        Ok(tables
            .records
            .get(&class.table)
            .and_then(|t| t.get(id))
            .cloned())
    }

    fn list(&mut self, class: &EntityClass, offset: u64, limit: usize) -> SourceResult<Vec<ListingRow>> {
        let tables = self.store.inner.read();
        let Some(table) = tables.records.get(&class.table) else {
            return Ok(Vec::new());
        };
        Ok(table
            .values()
            .skip(offset as usize)
            .take(limit)
            .map(|record| ListingRow {
                id: record.id.clone(),
                label: class.label_column.as_deref().and_then(|c| record.text(c)),
            })
            .collect())
    }

    fn count(&mut self, class: &EntityClass) -> SourceResult<u64> {
        Ok(self.store.len(&class.table) as u64)
    }
}
