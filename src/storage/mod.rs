//! Storage Layer - row access over the physical layout
//!
//! Tables of the layout:
//! - objects(id, compact_class_id, ...inline columns)
//! - object_<type>_values(id, object_id, property_compact_id, value)
//! - object_relations(id, subject_id, object_id, predicate_class_compact_id)
//! - `_log` mirrors of each, append-only
//!
//! The engine only talks to the `RowStore` trait; `SqliteRowStore` is the
//! rusqlite-backed implementation.

pub mod schema;
pub mod sql;
pub mod sqlite;

pub use sqlite::{SqliteRowStore, TableCount};

use std::collections::BTreeMap;

use serde::Serialize;

use crate::query::{Condition, Query};
use crate::value::Value;
use crate::Result;

static NULL: Value = Value::Null;

/// One physical row: column name → value
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Row {
    values: BTreeMap<String, Value>,
}

impl Row {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style `set`
    pub fn with(mut self, column: &str, value: impl Into<Value>) -> Self {
        self.set(column, value);
        self
    }

    pub fn set(&mut self, column: &str, value: impl Into<Value>) {
        self.values.insert(column.to_string(), value.into());
    }

    /// Column value; missing columns read as null
    pub fn get(&self, column: &str) -> &Value {
        self.values.get(column).unwrap_or(&NULL)
    }

    pub fn get_i64(&self, column: &str) -> Option<i64> {
        self.get(column).as_i64()
    }

    pub fn columns(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// One pending row mutation of a table-level batched write
#[derive(Debug, Clone, PartialEq)]
pub enum RowChange {
    Insert(Row),
    Update { id: i64, values: Row },
    Delete { id: i64 },
}

/// Batched row access primitive the engine runs on.
///
/// Every method is one round trip to the underlying store.
pub trait RowStore {
    /// Stream the rows selected by a physical query
    fn for_each_row(&self, query: &Query, f: &mut dyn FnMut(Row) -> Result<()>) -> Result<()>;

    /// Number of rows matching the query condition (paging ignored)
    fn count(&self, query: &Query) -> Result<usize>;

    /// Insert a single row and return its generated ID
    fn insert_row(&self, table: &str, row: &Row) -> Result<i64>;

    /// Apply a set of changes to one table as a single batched write
    fn apply(&self, table: &str, changes: &[RowChange]) -> Result<()>;

    fn load_rows(&self, query: &Query) -> Result<Vec<Row>> {
        let mut rows = Vec::new();
        self.for_each_row(query, &mut |row| {
            rows.push(row);
            Ok(())
        })?;
        Ok(rows)
    }

    /// Values of the first selected field (or `id`), nulls skipped
    fn load_values(&self, query: &Query) -> Result<Vec<Value>> {
        let column = query.fields.first().map(|f| f.name.clone()).unwrap_or_else(|| "id".to_string());
        let mut values = Vec::new();
        self.for_each_row(query, &mut |row| {
            let value = row.get(&column);
            if !value.is_null() {
                values.push(value.clone());
            }
            Ok(())
        })?;
        Ok(values)
    }

    fn load_row(&self, table: &str, id: i64) -> Result<Option<Row>> {
        let query = Query::new(table).filter(Condition::eq("id", id));
        Ok(self.load_rows(&query)?.into_iter().next())
    }
}

impl<T: RowStore + ?Sized> RowStore for &T {
    fn for_each_row(&self, query: &Query, f: &mut dyn FnMut(Row) -> Result<()>) -> Result<()> {
        (**self).for_each_row(query, f)
    }

    fn count(&self, query: &Query) -> Result<usize> {
        (**self).count(query)
    }

    fn insert_row(&self, table: &str, row: &Row) -> Result<i64> {
        (**self).insert_row(table, row)
    }

    fn apply(&self, table: &str, changes: &[RowChange]) -> Result<()> {
        (**self).apply(table, changes)
    }

    fn load_rows(&self, query: &Query) -> Result<Vec<Row>> {
        (**self).load_rows(query)
    }

    fn load_values(&self, query: &Query) -> Result<Vec<Value>> {
        (**self).load_values(query)
    }

    fn load_row(&self, table: &str, id: i64) -> Result<Option<Row>> {
        (**self).load_row(table, id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_column_reads_null() {
        let row = Row::new().with("id", 3).with("value", "x");
        assert_eq!(row.get_i64("id"), Some(3));
        assert!(row.get("missing").is_null());
        assert_eq!(row.len(), 2);
    }
}
