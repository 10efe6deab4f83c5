//! Read-only SQLite record source
//!
//! Table and column names come from the catalog and are interpolated into
//! SQL only after passing [`is_sql_identifier`]; identifiers and paging
//! values are always bound parameters.

use crate::catalog::EntityClass;
use crate::error::{SourceError, SourceResult};
use crate::source::{is_sql_identifier, ConnectionFactory, FieldValue, ListingRow, Record, RecordSource};
use rusqlite::types::ValueRef;
use rusqlite::{params, Connection, ErrorCode, OpenFlags};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// SQLite pragmas for the read-only harvest connections
const READ_PRAGMAS: &str = r#"
PRAGMA query_only = ON;
PRAGMA cache_size = -64000;      -- 64MB cache
PRAGMA temp_store = MEMORY;
PRAGMA mmap_size = 268435456;    -- 256MB mmap
"#;

/// How long SQLite itself waits on a locked database before reporting busy
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Opens read-only connections to one database file
#[derive(Debug, Clone)]
pub struct SqliteFactory {
    path: PathBuf,
}

impl SqliteFactory {
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ConnectionFactory for SqliteFactory {
    type Connection = SqliteSource;

    fn connect(&self) -> SourceResult<SqliteSource> {
        let flags = OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        let conn = Connection::open_with_flags(&self.path, flags).map_err(|e| SourceError::Connect {
            reason: format!("{}: {}", self.path.display(), e),
        })?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.execute_batch(READ_PRAGMAS)?;
        Ok(SqliteSource { conn })
    }

    fn describe(&self) -> String {
        format!("sqlite:{}", self.path.display())
    }
}

/// One read-only SQLite connection
pub struct SqliteSource {
    conn: Connection,
}

impl RecordSource for SqliteSource {
    fn fetch(&mut self, class: &EntityClass, id: &str) -> SourceResult<Option<Record>> {
        let sql = format!(
            "SELECT * FROM {} WHERE {} = ?1",
            quoted(&class.table)?,
            quoted(&class.id_column)?
        );
        let mut stmt = self
            .conn
            .prepare_cached(&sql)
            .map_err(|e| query_error(&class.table, e))?;
        let names: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();

        let result = stmt.query_row([id], |row| {
            let mut fields = BTreeMap::new();
            for (i, name) in names.iter().enumerate() {
                fields.insert(name.clone(), field_value(row.get_ref(i)?));
            }
            Ok(fields)
        });

        match result {
            Ok(fields) => Ok(Some(Record {
                id: id.to_string(),
                fields,
            })),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(query_error(&class.table, e)),
        }
    }

    fn list(&mut self, class: &EntityClass, offset: u64, limit: usize) -> SourceResult<Vec<ListingRow>> {
        let key = quoted(&class.id_column)?;
        let label = match &class.label_column {
            Some(column) => quoted(column)?,
            None => "NULL".to_string(),
        };
        let sql = format!(
            "SELECT {key}, {label} FROM {} ORDER BY {key} LIMIT ?1 OFFSET ?2",
            quoted(&class.table)?
        );
        let mut stmt = self
            .conn
            .prepare_cached(&sql)
            .map_err(|e| query_error(&class.table, e))?;

        let rows = stmt
            .query_map(params![limit as i64, offset as i64], |row| {
                let id = field_value(row.get_ref(0)?).to_string();
                let label = match field_value(row.get_ref(1)?) {
                    FieldValue::Null => None,
                    v => Some(v.to_string()),
                };
                Ok(ListingRow { id, label })
            })
            .map_err(|e| query_error(&class.table, e))?;

        rows.collect::<Result<Vec<_>, _>>()
            .map_err(|e| query_error(&class.table, e))
    }

    fn count(&mut self, class: &EntityClass) -> SourceResult<u64> {
        let sql = format!("SELECT COUNT(*) FROM {}", quoted(&class.table)?);
        let count: i64 = self
            .conn
            .query_row(&sql, [], |row| row.get(0))
            .map_err(|e| query_error(&class.table, e))?;
        Ok(count.max(0) as u64)
    }
}

fn quoted(name: &str) -> SourceResult<String> {
    if !is_sql_identifier(name) {
        return Err(SourceError::InvalidIdentifier(name.to_string()));
    }
    Ok(format!("\"{}\"", name))
}

fn field_value(value: ValueRef<'_>) -> FieldValue {
    match value {
        ValueRef::Null => FieldValue::Null,
        ValueRef::Integer(i) => FieldValue::Integer(i),
        ValueRef::Real(r) => FieldValue::Real(r),
        ValueRef::Text(t) | ValueRef::Blob(t) => FieldValue::Text(String::from_utf8_lossy(t).into_owned()),
    }
}

/// Classify a query failure: lock contention is transient, the rest is not
fn query_error(table: &str, e: rusqlite::Error) -> SourceError {
    match &e {
        rusqlite::Error::SqliteFailure(err, _)
            if matches!(err.code, ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked) =>
        {
            SourceError::Busy(e.to_string())
        }
        _ => SourceError::Query {
            table: table.to_string(),
            reason: e.to_string(),
        },
    }
}
