//! Audit logging - append-only mirrors of object, value and relation mutations
//!
//! Entries are written synchronously, before the physical write they describe.
//! `NoAuditLog` is the default sink; `TableAuditLog` appends to the `_log`
//! tables of the layout.

use chrono::Utc;

use crate::config::StorageConfig;
use crate::storage::{Row, RowChange, RowStore};
use crate::value::Value;
use crate::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectAction {
    Insert,
    Update,
    Delete,
}

impl ObjectAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectAction::Insert => "insert",
            ObjectAction::Update => "update",
            ObjectAction::Delete => "delete",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ObjectLogEntry {
    pub object_id: i64,
    pub compact_class_id: i64,
    pub action: ObjectAction,
}

/// A value-row mutation; `value` is the physical value written (or removed)
#[derive(Debug, Clone, PartialEq)]
pub struct ValueLogEntry {
    pub object_id: i64,
    pub property_compact_id: i64,
    pub value: Value,
    pub deleted: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RelationLogEntry {
    pub subject_id: i64,
    pub object_id: i64,
    pub predicate_class_compact_id: i64,
    pub deleted: bool,
}

/// Sink for audit entries
pub trait AuditLog {
    fn log_object(&self, entry: &ObjectLogEntry) -> Result<()>;

    /// `value_table` is the table the logged row belongs to
    fn log_value(&self, value_table: &str, entry: &ValueLogEntry) -> Result<()>;

    fn log_relation(&self, entry: &RelationLogEntry) -> Result<()>;
}

/// Discards every entry
#[derive(Debug, Default, Clone, Copy)]
pub struct NoAuditLog;

impl AuditLog for NoAuditLog {
    fn log_object(&self, _entry: &ObjectLogEntry) -> Result<()> {
        Ok(())
    }

    fn log_value(&self, _value_table: &str, _entry: &ValueLogEntry) -> Result<()> {
        Ok(())
    }

    fn log_relation(&self, _entry: &RelationLogEntry) -> Result<()> {
        Ok(())
    }
}

/// Resolves the acting account recorded with each entry
pub type ActorResolver = Box<dyn Fn() -> Option<Value>>;

/// Appends entries to the configured `_log` tables
pub struct TableAuditLog<S: RowStore> {
    store: S,
    config: StorageConfig,
    actor: Option<ActorResolver>,
}

impl<S: RowStore> TableAuditLog<S> {
    pub fn new(store: S, config: &StorageConfig) -> Self {
        Self {
            store,
            config: config.clone(),
            actor: None,
        }
    }

    pub fn with_actor(mut self, actor: impl Fn() -> Option<Value> + 'static) -> Self {
        self.actor = Some(Box::new(actor));
        self
    }

    fn stamp(&self, row: Row) -> Row {
        let actor = self.actor.as_ref().and_then(|resolve| resolve()).unwrap_or_default();
        row.with("timestamp", Utc::now().naive_utc()).with("account_id", actor)
    }

    fn append(&self, table: &str, row: Row) -> Result<()> {
        self.store.apply(table, &[RowChange::Insert(self.stamp(row))])
    }
}

impl<S: RowStore> AuditLog for TableAuditLog<S> {
    fn log_object(&self, entry: &ObjectLogEntry) -> Result<()> {
        let row = Row::new()
            .with("object_id", entry.object_id)
            .with("compact_class_id", entry.compact_class_id)
            .with("action", entry.action.as_str());
        self.append(&self.config.object_log_table, row)
    }

    fn log_value(&self, value_table: &str, entry: &ValueLogEntry) -> Result<()> {
        let table = self.config.value_log_table(value_table)?;
        let row = Row::new()
            .with("object_id", entry.object_id)
            .with("property_compact_id", entry.property_compact_id)
            .with("value", entry.value.clone())
            .with("deleted", entry.deleted);
        self.append(table, row)
    }

    fn log_relation(&self, entry: &RelationLogEntry) -> Result<()> {
        let row = Row::new()
            .with("subject_id", entry.subject_id)
            .with("object_id", entry.object_id)
            .with("predicate_class_compact_id", entry.predicate_class_compact_id)
            .with("deleted", entry.deleted);
        self.append(&self.config.relation_log_table, row)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::Query;
    use crate::storage::SqliteRowStore;

    #[test]
    fn test_entries_carry_timestamp_and_actor() {
        let config = StorageConfig::default();
        let store = SqliteRowStore::open_in_memory().unwrap();
        store.create_layout(&config, None).unwrap();
        let log = TableAuditLog::new(store.clone(), &config).with_actor(|| Some(Value::from("alice")));

        log.log_value(
            "object_string_values",
            &ValueLogEntry {
                object_id: 1,
                property_compact_id: 4,
                value: Value::from("x"),
                deleted: true,
            },
        )
        .unwrap();
        log.log_object(&ObjectLogEntry {
            object_id: 1,
            compact_class_id: 2,
            action: ObjectAction::Delete,
        })
        .unwrap();

        let rows = store.load_rows(&Query::new("object_string_values_log")).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("account_id"), &Value::from("alice"));
        assert_eq!(rows[0].get_i64("deleted"), Some(1));
        assert!(!rows[0].get("timestamp").is_null());

        let rows = store.load_rows(&Query::new("objects_log")).unwrap();
        assert_eq!(rows[0].get("action"), &Value::from("delete"));
        assert_eq!(rows[0].get_i64("compact_class_id"), Some(2));
    }

    #[test]
    fn test_unknown_value_table_is_config_error() {
        let config = StorageConfig::default();
        let log = TableAuditLog::new(SqliteRowStore::open_in_memory().unwrap(), &config);
        let err = log
            .log_value(
                "nope",
                &ValueLogEntry {
                    object_id: 1,
                    property_compact_id: 1,
                    value: Value::Null,
                    deleted: false,
                },
            )
            .unwrap_err();
        assert!(matches!(err, crate::Error::Config(_)));
    }
}
