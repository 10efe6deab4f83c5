//! Record sources
//!
//! The relational store is consumed through [`RecordSource`]: look a record
//! up by identifier, list identifiers in a stable order, count a table.
//! Each worker owns one connection for its whole lifetime, checked out of a
//! [`ConnectionPool`].

pub mod memory;
pub mod pool;
pub mod sqlite;

pub use memory::{MemoryFactory, MemorySource, MemoryStore};
pub use pool::{ConnectionPool, PooledConnection, RetryPolicy, Retryable};
pub use sqlite::{SqliteFactory, SqliteSource};

use crate::catalog::EntityClass;
use crate::error::SourceResult;
use regex::Regex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::LazyLock;

/// Opaque primary key of a record
pub type Identifier = String;

static SQL_IDENTIFIER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("Invalid SQL identifier regex"));

/// Check that a table/column name can be interpolated into SQL safely
pub fn is_sql_identifier(name: &str) -> bool {
    SQL_IDENTIFIER.is_match(name)
}

/// A typed column value
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
}

impl FieldValue {
    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Null)
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Null => Ok(()),
            FieldValue::Integer(i) => write!(f, "{}", i),
            FieldValue::Real(r) => write!(f, "{}", r),
            FieldValue::Text(s) => f.write_str(s),
        }
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::Text(value.to_string())
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        FieldValue::Integer(value)
    }
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        FieldValue::Real(value)
    }
}

/// A record: identifier plus its typed fields
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Record {
    pub id: Identifier,
    pub fields: BTreeMap<String, FieldValue>,
}

impl Record {
    pub fn new(id: impl Into<Identifier>) -> Self {
        Self {
            id: id.into(),
            fields: BTreeMap::new(),
        }
    }

    /// Builder-style field setter
    pub fn with(mut self, name: &str, value: impl Into<FieldValue>) -> Self {
        self.fields.insert(name.to_string(), value.into());
        self
    }

    /// Text of a field, if present and not null
    pub fn text(&self, name: &str) -> Option<String> {
        self.fields
            .get(name)
            .filter(|v| !v.is_null())
            .map(|v| v.to_string())
    }
}

/// One row of a register listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListingRow {
    pub id: Identifier,
    pub label: Option<String>,
}

/// Read access to the relational store
pub trait RecordSource: Send {
    /// Fetch one record; `None` when the identifier does not resolve
    fn fetch(&mut self, class: &EntityClass, id: &str) -> SourceResult<Option<Record>>;

    /// List identifiers in key order
    fn list(&mut self, class: &EntityClass, offset: u64, limit: usize) -> SourceResult<Vec<ListingRow>>;

    /// Number of records of a class
    fn count(&mut self, class: &EntityClass) -> SourceResult<u64>;
}

/// Opens connections for the pool
pub trait ConnectionFactory: Send + Sync + 'static {
    type Connection: RecordSource + 'static;

    fn connect(&self) -> SourceResult<Self::Connection>;

    /// Human-readable description for logs
    fn describe(&self) -> String;
}
