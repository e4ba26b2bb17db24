//! SQLite storage implementation

use std::path::Path;
use std::rc::Rc;

use rusqlite::types::{ToSql, ToSqlOutput, Value as SqlValue, ValueRef};
use rusqlite::{params_from_iter, Connection};
use tracing::debug;

use super::sql::{self, SqlStatement};
use super::{schema, Row, RowChange, RowStore};
use crate::config::StorageConfig;
use crate::query::Query;
use crate::schema::DataSchema;
use crate::value::{Value, DATETIME_FORMAT, DATE_FORMAT};
use crate::Result;

/// SQLite-backed row store.
///
/// Clones share one connection, so an audit log and the engine can write
/// through the same transaction.
#[derive(Clone)]
pub struct SqliteRowStore {
    conn: Rc<Connection>,
}

impl SqliteRowStore {
    /// Open a database file (creates if doesn't exist)
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        Ok(Self { conn: Rc::new(conn) })
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Ok(Self { conn: Rc::new(conn) })
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Create the object, value, relation and log tables if missing
    pub fn create_layout(&self, config: &StorageConfig, schema: Option<&DataSchema>) -> Result<()> {
        let inline_columns = schema.map(DataSchema::inline_columns).unwrap_or_default();
        for stmt in schema::layout_statements(config, &inline_columns)? {
            self.conn.execute(&stmt, [])?;
        }
        Ok(())
    }

    /// Row counts of every layout table that exists
    pub fn table_counts(&self, config: &StorageConfig) -> Result<Vec<TableCount>> {
        let mut tables = vec![config.object_table.clone(), config.relation_table.clone()];
        tables.extend(config.value_tables().into_iter().map(String::from));
        if config.logging {
            tables.push(config.object_log_table.clone());
            tables.push(config.relation_log_table.clone());
            tables.extend(config.value_log_tables.values().cloned());
        }

        let mut counts = Vec::with_capacity(tables.len());
        for table in tables {
            let exists: bool = self.conn.query_row(
                "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1)",
                [&table],
                |row| row.get(0),
            )?;
            if exists {
                let rows = self.count(&Query::new(table.as_str()))?;
                counts.push(TableCount { table, rows });
            }
        }
        Ok(counts)
    }

    // ========== Bulk Operations ==========

    /// Begin a transaction for bulk operations
    pub fn begin_transaction(&self) -> Result<()> {
        self.conn.execute("BEGIN TRANSACTION", [])?;
        Ok(())
    }

    /// Commit a transaction
    pub fn commit(&self) -> Result<()> {
        self.conn.execute("COMMIT", [])?;
        Ok(())
    }

    /// Rollback a transaction
    pub fn rollback(&self) -> Result<()> {
        self.conn.execute("ROLLBACK", [])?;
        Ok(())
    }

    fn execute(&self, statement: &SqlStatement) -> Result<usize> {
        let mut stmt = self.conn.prepare_cached(&statement.sql)?;
        Ok(stmt.execute(params_from_iter(statement.params.iter()))?)
    }
}

impl RowStore for SqliteRowStore {
    fn for_each_row(&self, query: &Query, f: &mut dyn FnMut(Row) -> Result<()>) -> Result<()> {
        let statement = sql::select(query);
        debug!(sql = %statement.sql, params = statement.params.len(), "select");

        let mut stmt = self.conn.prepare(&statement.sql)?;
        let names: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
        let mut rows = stmt.query(params_from_iter(statement.params.iter()))?;
        while let Some(row) = rows.next()? {
            let mut record = Row::new();
            for (i, name) in names.iter().enumerate() {
                record.set(name, from_sql(row.get_ref(i)?));
            }
            f(record)?;
        }
        Ok(())
    }

    fn count(&self, query: &Query) -> Result<usize> {
        let statement = sql::count(query);
        let count: i64 = self
            .conn
            .query_row(&statement.sql, params_from_iter(statement.params.iter()), |row| row.get(0))?;
        Ok(count as usize)
    }

    fn insert_row(&self, table: &str, row: &Row) -> Result<i64> {
        self.execute(&sql::insert(table, row))?;
        Ok(self.conn.last_insert_rowid())
    }

    fn apply(&self, table: &str, changes: &[RowChange]) -> Result<()> {
        debug!(table, changes = changes.len(), "apply");
        for change in changes {
            match change {
                RowChange::Insert(row) => {
                    self.execute(&sql::insert(table, row))?;
                }
                RowChange::Update { values, .. } if values.is_empty() => {}
                RowChange::Update { id, values } => {
                    self.execute(&sql::update(table, *id, values))?;
                }
                RowChange::Delete { id } => {
                    self.execute(&sql::delete(table, *id))?;
                }
            }
        }
        Ok(())
    }
}

impl ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        let value = match self {
            Value::Null => SqlValue::Null,
            Value::Boolean(b) => SqlValue::Integer(i64::from(*b)),
            Value::Integer(i) => SqlValue::Integer(*i),
            Value::Decimal(d) => SqlValue::Real(*d),
            Value::String(s) => return Ok(ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes()))),
            Value::Date(d) => SqlValue::Text(d.format(DATE_FORMAT).to_string()),
            Value::DateTime(dt) => SqlValue::Text(dt.format(DATETIME_FORMAT).to_string()),
            Value::List(_) => {
                return Err(rusqlite::Error::ToSqlConversionFailure(
                    "list values must be stored element by element".into(),
                ));
            }
        };
        Ok(ToSqlOutput::Owned(value))
    }
}

fn from_sql(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::Integer(i),
        ValueRef::Real(d) => Value::Decimal(d),
        ValueRef::Text(bytes) | ValueRef::Blob(bytes) => Value::String(String::from_utf8_lossy(bytes).into_owned()),
    }
}

/// Row count of one table
#[derive(Debug, Clone)]
pub struct TableCount {
    pub table: String,
    pub rows: usize,
}

impl std::fmt::Display for TableCount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.table, self.rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::{Condition, SortField};
    use chrono::NaiveDate;

    fn store() -> SqliteRowStore {
        let store = SqliteRowStore::open_in_memory().unwrap();
        store.create_layout(&StorageConfig::default(), None).unwrap();
        store
    }

    #[test]
    fn test_row_crud() {
        let store = store();

        let id = store
            .insert_row("object_string_values", &Row::new().with("object_id", 1).with("property_compact_id", 4).with("value", "a"))
            .unwrap();
        let row = store.load_row("object_string_values", id).unwrap().unwrap();
        assert_eq!(row.get("value"), &Value::from("a"));

        store
            .apply(
                "object_string_values",
                &[
                    RowChange::Update { id, values: Row::new().with("value", "b") },
                    RowChange::Insert(Row::new().with("object_id", 2).with("property_compact_id", 4).with("value", "c")),
                ],
            )
            .unwrap();
        let values = store
            .load_values(&Query::new("object_string_values").field("value").sort_by(SortField::asc("value")))
            .unwrap();
        assert_eq!(values, vec![Value::from("b"), Value::from("c")]);

        store.apply("object_string_values", &[RowChange::Delete { id }]).unwrap();
        assert_eq!(store.count(&Query::new("object_string_values")).unwrap(), 1);
    }

    #[test]
    fn test_dates_stored_as_text() {
        let store = store();
        let date = NaiveDate::from_ymd_opt(1990, 5, 17).unwrap();
        let id = store
            .insert_row("object_datetime_values", &Row::new().with("object_id", 1).with("property_compact_id", 1).with("value", date))
            .unwrap();
        let row = store.load_row("object_datetime_values", id).unwrap().unwrap();
        assert_eq!(row.get("value"), &Value::from("1990-05-17"));
    }

    #[test]
    fn test_shared_connection_and_counts() {
        let store = store();
        let other = store.clone();
        other.insert_row("objects", &Row::new().with("compact_class_id", 1)).unwrap();

        let ids = store
            .load_values(&Query::new("objects").filter(Condition::eq("compact_class_id", 1)))
            .unwrap();
        assert_eq!(ids.len(), 1);

        let counts = store.table_counts(&StorageConfig::default()).unwrap();
        let objects = counts.iter().find(|c| c.table == "objects").unwrap();
        assert_eq!(objects.rows, 1);
        assert_eq!(counts.len(), 12);
    }
}
