//! Save engine - diff-based reconciliation of containers against stored rows
//!
//! For every value-table property the existing rows and the desired value are
//! turned into a `ValueDiff` by a pure function; the diffs of one table are
//! then logged and applied as a single batched write.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use tracing::debug;

use super::ObjectStorage;
use crate::audit::{ObjectAction, ObjectLogEntry, RelationLogEntry, ValueLogEntry};
use crate::object::ObjectContainer;
use crate::query::{Condition, Query, QueryField, SortField};
use crate::schema::{Class, Property, PropertyLocation};
use crate::storage::{Row, RowChange, RowStore};
use crate::value::{self, values_equal, Value, ValueComparer};
use crate::{Error, Result};

/// A stored value row with its value in canonical physical form
#[derive(Debug, Clone, PartialEq)]
pub struct ValueRow {
    pub id: i64,
    pub value: Value,
}

impl ValueRow {
    pub fn new(id: i64, value: impl Into<Value>) -> Self {
        Self { id, value: value.into() }
    }
}

/// Row mutations needed to turn stored rows into the desired value
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValueDiff {
    pub inserts: Vec<Value>,
    pub updates: Vec<(i64, Value)>,
    pub deletes: Vec<i64>,
}

impl ValueDiff {
    pub fn is_empty(&self) -> bool {
        self.inserts.is_empty() && self.updates.is_empty() && self.deletes.is_empty()
    }
}

/// Diff of a single-valued property.
///
/// The first existing row is authoritative, surplus rows are deleted.
/// `desired` is the serialized value, null when empty.
pub fn diff_single(comparer: &dyn ValueComparer, existing: &[ValueRow], desired: &Value) -> ValueDiff {
    let mut diff = ValueDiff::default();
    let Some((current, surplus)) = existing.split_first() else {
        if !desired.is_null() {
            diff.inserts.push(desired.clone());
        }
        return diff;
    };

    diff.deletes.extend(surplus.iter().map(|row| row.id));
    if desired.is_null() {
        diff.deletes.insert(0, current.id);
    } else if !values_equal(comparer, Some(&current.value), Some(desired)) {
        diff.updates.push((current.id, desired.clone()));
    }
    diff
}

/// Diff of a multivalue property as set reconciliation.
///
/// Each existing row matches at most one equal desired element; matched rows
/// are left alone. Element order is not compared.
pub fn diff_multi(comparer: &dyn ValueComparer, existing: &[ValueRow], desired: &[Value]) -> ValueDiff {
    let mut diff = ValueDiff::default();
    let mut matched = vec![false; existing.len()];
    let mut seen: Vec<&Value> = Vec::with_capacity(desired.len());

    for element in desired {
        if element.is_null() || seen.iter().any(|s| values_equal(comparer, Some(*s), Some(element))) {
            continue;
        }
        seen.push(element);

        let found = existing
            .iter()
            .enumerate()
            .position(|(i, row)| !matched[i] && values_equal(comparer, Some(&row.value), Some(element)));
        match found {
            Some(i) => matched[i] = true,
            None => diff.inserts.push(element.clone()),
        }
    }

    diff.deletes.extend(
        existing
            .iter()
            .zip(&matched)
            .filter(|(_, matched)| !**matched)
            .map(|(row, _)| row.id),
    );
    diff
}

/// Pending writes and their log entries for one value table
#[derive(Default)]
struct TableWrite {
    changes: Vec<RowChange>,
    logs: Vec<ValueLogEntry>,
}

impl<S: RowStore> ObjectStorage<S> {
    /// Insert a new object and assign its ID
    pub fn insert(&self, object: &mut ObjectContainer) -> Result<i64> {
        if object.id().is_some() {
            return Err(Error::UnsupportedOperation(format!(
                "insert of an object that already has ID {}",
                object.id().unwrap_or_default()
            )));
        }
        let class = object.class().clone();
        ensure_object_table(&class, "insert")?;

        let mut row = Row::new().with("compact_class_id", class.compact_id);
        for (property, column) in column_properties(object) {
            let stored = object.get(&property.id).map(|v| value::serialize(property, v)).transpose()?;
            row.set(column, stored.unwrap_or_default());
        }

        let id = self.store.insert_row(&self.config.object_table, &row)?;
        object.assign_id(id);
        self.audit().log_object(&ObjectLogEntry {
            object_id: id,
            compact_class_id: class.compact_id,
            action: ObjectAction::Insert,
        })?;

        let writes = self.value_writes(object, id, &HashMap::new())?;
        self.apply_value_writes(writes)?;
        debug!(object_id = id, class = %class.id, "Inserted object");
        Ok(id)
    }

    /// Write the properties present in `object` over the stored state.
    ///
    /// Nothing is written or logged when the stored state already matches.
    pub fn update(&self, object: &ObjectContainer) -> Result<()> {
        let id = object.id().ok_or(Error::MissingObjectId("update"))?;
        let class = object.class();
        ensure_object_table(class, "update")?;

        let current = self
            .store
            .load_row(&self.config.object_table, id)?
            .ok_or(Error::ConcurrencyViolation { object_id: id })?;

        let mut column_changes = Row::new();
        for (property, column) in column_properties(object) {
            let Some(desired) = object.get(&property.id) else {
                continue;
            };
            let desired = value::serialize(property, desired)?;
            let stored = value::normalize_stored(property, current.get(column));
            if !values_equal(self.comparer(), Some(&stored), Some(&desired)) {
                column_changes.set(column, desired);
            }
        }

        let existing = self.existing_values(object, id)?;
        let writes = self.value_writes(object, id, &existing)?;

        if column_changes.is_empty() && writes.is_empty() {
            debug!(object_id = id, "Object unchanged");
            return Ok(());
        }

        self.audit().log_object(&ObjectLogEntry {
            object_id: id,
            compact_class_id: class.compact_id,
            action: ObjectAction::Update,
        })?;
        if !column_changes.is_empty() {
            self.store.apply(
                &self.config.object_table,
                &[RowChange::Update {
                    id,
                    values: column_changes,
                }],
            )?;
        }
        self.apply_value_writes(writes)
    }

    /// Delete objects with their value and relation rows; returns how many existed
    pub fn delete(&self, ids: &[i64]) -> Result<usize> {
        let requested: BTreeSet<i64> = ids.iter().copied().collect();
        let requested: Vec<i64> = requested.into_iter().collect();

        let mut existing: Vec<(i64, i64)> = Vec::new();
        for batch in requested.chunks(self.config.batch_size) {
            let query = Query::new(self.config.object_table.as_str())
                .fields(vec![QueryField::new("id"), QueryField::new("compact_class_id")])
                .filter(Condition::in_list("id", batch));
            for row in self.store.load_rows(&query)? {
                if let Some(id) = row.get_i64("id") {
                    existing.push((id, row.get_i64("compact_class_id").unwrap_or_default()));
                }
            }
        }
        if existing.is_empty() {
            return Ok(0);
        }
        let object_ids: Vec<i64> = existing.iter().map(|(id, _)| *id).collect();

        // ========== Value rows ==========

        for table in self.config.value_tables() {
            let mut changes = Vec::new();
            for batch in object_ids.chunks(self.config.batch_size) {
                let query = Query::new(table).filter(Condition::in_list("object_id", batch));
                for row in self.store.load_rows(&query)? {
                    let Some(row_id) = row.get_i64("id") else {
                        continue;
                    };
                    self.audit().log_value(
                        table,
                        &ValueLogEntry {
                            object_id: row.get_i64("object_id").unwrap_or_default(),
                            property_compact_id: row.get_i64("property_compact_id").unwrap_or_default(),
                            value: row.get("value").clone(),
                            deleted: true,
                        },
                    )?;
                    changes.push(RowChange::Delete { id: row_id });
                }
            }
            if !changes.is_empty() {
                self.store.apply(table, &changes)?;
            }
        }

        // ========== Relation rows (either endpoint) ==========

        let mut relation_rows = BTreeMap::new();
        for batch in object_ids.chunks(self.relation_batch_size()) {
            let query = Query::new(self.config.relation_table.as_str()).filter(Condition::or(vec![
                Condition::in_list("subject_id", batch),
                Condition::in_list("object_id", batch),
            ]));
            for row in self.store.load_rows(&query)? {
                if let Some(row_id) = row.get_i64("id") {
                    relation_rows.insert(row_id, row);
                }
            }
        }
        if !relation_rows.is_empty() {
            let mut changes = Vec::with_capacity(relation_rows.len());
            for (row_id, row) in &relation_rows {
                self.audit().log_relation(&RelationLogEntry {
                    subject_id: row.get_i64("subject_id").unwrap_or_default(),
                    object_id: row.get_i64("object_id").unwrap_or_default(),
                    predicate_class_compact_id: row.get_i64("predicate_class_compact_id").unwrap_or_default(),
                    deleted: true,
                })?;
                changes.push(RowChange::Delete { id: *row_id });
            }
            self.store.apply(&self.config.relation_table, &changes)?;
        }

        // ========== Object rows ==========

        let mut changes = Vec::with_capacity(existing.len());
        for (id, compact_class_id) in &existing {
            self.audit().log_object(&ObjectLogEntry {
                object_id: *id,
                compact_class_id: *compact_class_id,
                action: ObjectAction::Delete,
            })?;
            changes.push(RowChange::Delete { id: *id });
        }
        self.store.apply(&self.config.object_table, &changes)?;

        debug!(requested = requested.len(), deleted = existing.len(), "Deleted objects");
        Ok(existing.len())
    }

    /// Delete one stored object; fails if it no longer exists
    pub fn delete_object(&self, object: &ObjectContainer) -> Result<()> {
        let id = object.id().ok_or(Error::MissingObjectId("delete"))?;
        match self.delete(&[id])? {
            0 => Err(Error::ConcurrencyViolation { object_id: id }),
            _ => Ok(()),
        }
    }

    /// Stored value rows of the value-table properties present in `object`, by property compact ID
    fn existing_values(&self, object: &ObjectContainer, object_id: i64) -> Result<HashMap<i64, Vec<ValueRow>>> {
        let mut by_table: BTreeMap<&str, HashMap<i64, &Property>> = BTreeMap::new();
        for property in value_properties(object) {
            let table = self.config.value_table(property.data_type)?;
            by_table.entry(table).or_default().insert(property.compact_id, property);
        }

        let mut existing: HashMap<i64, Vec<ValueRow>> = HashMap::new();
        for (table, properties) in by_table {
            let compact_ids: Vec<i64> = properties.keys().copied().collect();
            let query = Query::new(table)
                .fields(vec![
                    QueryField::new("id"),
                    QueryField::new("property_compact_id"),
                    QueryField::new("value"),
                ])
                .filter(Condition::and(vec![
                    Condition::eq("object_id", object_id),
                    Condition::in_list("property_compact_id", &compact_ids),
                ]))
                .sort_by(SortField::asc("id"));
            for row in self.store.load_rows(&query)? {
                let (Some(id), Some(compact_id)) = (row.get_i64("id"), row.get_i64("property_compact_id")) else {
                    continue;
                };
                let Some(property) = properties.get(&compact_id) else {
                    continue;
                };
                existing
                    .entry(compact_id)
                    .or_default()
                    .push(ValueRow::new(id, value::normalize_stored(property, row.get("value"))));
            }
        }
        Ok(existing)
    }

    /// Per-table writes reconciling the value-table properties of `object`
    fn value_writes(
        &self,
        object: &ObjectContainer,
        object_id: i64,
        existing: &HashMap<i64, Vec<ValueRow>>,
    ) -> Result<BTreeMap<String, TableWrite>> {
        let mut writes: BTreeMap<String, TableWrite> = BTreeMap::new();

        for property in value_properties(object) {
            let Some(desired) = object.get(&property.id) else {
                continue;
            };
            let rows = existing.get(&property.compact_id).map(Vec::as_slice).unwrap_or(&[]);

            let diff = if property.multivalue {
                let elements = desired
                    .elements()
                    .iter()
                    .map(|element| value::serialize(property, element))
                    .collect::<Result<Vec<_>>>()?;
                diff_multi(self.comparer(), rows, &elements)
            } else {
                diff_single(self.comparer(), rows, &value::serialize(property, desired)?)
            };
            if diff.is_empty() {
                continue;
            }

            let table = self.config.value_table(property.data_type)?;
            let write = writes.entry(table.to_string()).or_default();
            let log = |value: Value, deleted: bool| ValueLogEntry {
                object_id,
                property_compact_id: property.compact_id,
                value,
                deleted,
            };

            for value in diff.inserts {
                write.logs.push(log(value.clone(), false));
                write.changes.push(RowChange::Insert(
                    Row::new()
                        .with("object_id", object_id)
                        .with("property_compact_id", property.compact_id)
                        .with("value", value),
                ));
            }
            for (id, value) in diff.updates {
                write.logs.push(log(value.clone(), false));
                write.changes.push(RowChange::Update {
                    id,
                    values: Row::new().with("value", value),
                });
            }
            for id in diff.deletes {
                let old = rows.iter().find(|r| r.id == id).map(|r| r.value.clone()).unwrap_or_default();
                write.logs.push(log(old, true));
                write.changes.push(RowChange::Delete { id });
            }
        }
        Ok(writes)
    }

    fn apply_value_writes(&self, writes: BTreeMap<String, TableWrite>) -> Result<()> {
        for (table, write) in writes {
            for entry in &write.logs {
                self.audit().log_value(&table, entry)?;
            }
            self.store.apply(&table, &write.changes)?;
        }
        Ok(())
    }
}

fn ensure_object_table(class: &Class, operation: &str) -> Result<()> {
    if class.is_object_table() {
        Ok(())
    } else {
        Err(Error::UnsupportedOperation(format!(
            "{} of class {} which is not stored in the object table",
            operation, class.id
        )))
    }
}

/// Inline-column properties of the container's class, with their columns
fn column_properties(object: &ObjectContainer) -> Vec<(&Property, &str)> {
    object
        .class()
        .class_properties()
        .iter()
        .filter(|cp| !cp.property.primary_key)
        .filter_map(|cp| match &cp.location {
            PropertyLocation::TableColumn(column) if object.contains(&cp.property.id) => {
                Some((cp.property.as_ref(), column.as_str()))
            }
            _ => None,
        })
        .collect()
}

/// Value-table properties present in the container
fn value_properties(object: &ObjectContainer) -> Vec<&Property> {
    object
        .class()
        .class_properties()
        .iter()
        .filter(|cp| cp.location == PropertyLocation::ValueTable && object.contains(&cp.property.id))
        .map(|cp| cp.property.as_ref())
        .collect()
}
