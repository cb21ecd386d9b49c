//! Reference store backends.
//!
//! A [`ReferenceStore`] hands back every row of a named partition in one
//! pass. The SQLite implementation issues `SELECT *` and reports column
//! names verbatim, leaving the typed-record boundary to decide what to keep.

use rusqlite::types::ValueRef;
use rusqlite::{Connection, OpenFlags};
use snafu::prelude::*;

use crate::error::{PartitionQuerySnafu, ReferenceError, UnavailableSnafu};

/// Raw contents of one partition: column names plus each row's values in
/// column order. Values are text, coerced from whatever type the store
/// holds; NULL stays `None`.
#[derive(Debug)]
pub struct PartitionRows {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Option<String>>>,
}

/// A queryable source of reference partitions.
pub trait ReferenceStore: Send {
    /// Fetch every row of the named partition.
    fn fetch_all(&self, partition: &str) -> Result<PartitionRows, ReferenceError>;
}

/// SQLite-backed reference store.
///
/// Opened read-only: a missing or unreadable database must surface as an
/// error instead of SQLite creating an empty file.
#[derive(Debug)]
pub struct SqliteReferenceStore {
    conn: Connection,
}

impl SqliteReferenceStore {
    /// Open the reference database at `path`.
    pub fn open(path: &str) -> Result<Self, ReferenceError> {
        let flags = OpenFlags::SQLITE_OPEN_READ_ONLY
            | OpenFlags::SQLITE_OPEN_URI
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        let conn = Connection::open_with_flags(path, flags).context(UnavailableSnafu { path })?;
        Ok(Self { conn })
    }
}

impl ReferenceStore for SqliteReferenceStore {
    fn fetch_all(&self, partition: &str) -> Result<PartitionRows, ReferenceError> {
        let sql = format!("SELECT * FROM {}", quote_ident(partition));
        let mut stmt = self
            .conn
            .prepare(&sql)
            .context(PartitionQuerySnafu { partition })?;

        let columns: Vec<String> = stmt.column_names().iter().map(|c| c.to_string()).collect();
        let column_count = columns.len();

        let mut rows = stmt.query([]).context(PartitionQuerySnafu { partition })?;
        let mut out = Vec::new();
        while let Some(row) = rows.next().context(PartitionQuerySnafu { partition })? {
            let mut values = Vec::with_capacity(column_count);
            for idx in 0..column_count {
                let value_ref = row
                    .get_ref(idx)
                    .context(PartitionQuerySnafu { partition })?;
                values.push(coerce_text(value_ref));
            }
            out.push(values);
        }

        Ok(PartitionRows { columns, rows: out })
    }
}

/// Coerce any stored value to text, the way a dimension snapshot is
/// expected to read. Blobs have no text meaning here and map to NULL.
fn coerce_text(value: ValueRef<'_>) -> Option<String> {
    match value {
        ValueRef::Null => None,
        ValueRef::Integer(i) => Some(i.to_string()),
        ValueRef::Real(f) => Some(f.to_string()),
        ValueRef::Text(t) => Some(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(_) => None,
    }
}

/// Quote an identifier for SQLite.
fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}
