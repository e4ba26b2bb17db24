//! Load engine - assembles object containers from the physical layout
//!
//! Three passes over batched ID sets:
//! 1. object table rows (class, inline columns)
//! 2. one query per value table, with derived projections over value rows
//! 3. object table again for properties derived from inline columns

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use tracing::{debug, info, warn};

use super::ObjectStorage;
use crate::object::ObjectContainer;
use crate::query::{Condition, Query, QueryField};
use crate::schema::{Class, Property, PropertyLocation, SourceLocation};
use crate::storage::RowStore;
use crate::value::{self, Value};
use crate::Result;

/// What to read for the objects of one class
#[derive(Default)]
struct ClassPlan {
    /// Inline columns: (column, property)
    columns: Vec<(String, Arc<Property>)>,
    /// Value-table properties populated directly, by compact ID
    values: HashMap<i64, Arc<Property>>,
    /// Derived from a value-table source: (source compact ID, projection alias, property)
    derived_values: Vec<(i64, String, Arc<Property>)>,
    /// Derived from an inline column: (projection alias, property)
    derived_columns: Vec<(String, Arc<Property>)>,
    /// Value table → (property compact IDs to fetch, alias → projection expression)
    tables: BTreeMap<String, (BTreeSet<i64>, BTreeMap<String, String>)>,
    /// Alias → expression for the derived-column pass
    column_projections: BTreeMap<String, String>,
}

/// One value-table query set, merged across classes
#[derive(Default)]
struct TablePlan {
    property_ids: BTreeSet<i64>,
    projections: BTreeMap<String, String>,
    object_ids: BTreeSet<i64>,
}

fn derived_alias(class: &Class, property: &Property) -> String {
    format!("derived_{}_{}", class.compact_id, property.compact_id)
}

/// Logical value of a stored one; unreadable values are logged and skipped
fn read_value(property: &Property, stored: &Value, object_id: i64) -> Option<Value> {
    match value::deserialize(property, stored) {
        Ok(value) => value,
        Err(e) => {
            warn!(object_id, property = %property.id, error = %e, "Skipping unreadable value");
            None
        }
    }
}

impl<S: RowStore> ObjectStorage<S> {
    /// Load objects by ID.
    ///
    /// `properties = None` loads every property of each object's class,
    /// `Some(&[])` only the ID and class. Missing IDs are omitted.
    pub fn load(
        &self,
        ids: &[i64],
        properties: Option<&[Arc<Property>]>,
    ) -> Result<HashMap<i64, ObjectContainer>> {
        let mut objects: HashMap<i64, ObjectContainer> = HashMap::with_capacity(ids.len());
        let mut ids = ids.to_vec();
        ids.sort_unstable();
        ids.dedup();
        if ids.is_empty() {
            return Ok(objects);
        }

        let mut plans: HashMap<i64, ClassPlan> = HashMap::new();

        // ========== Object table ==========

        for batch in ids.chunks(self.config.batch_size) {
            let query = Query::new(self.config.object_table.as_str()).filter(Condition::in_list("id", batch));
            for row in self.store.load_rows(&query)? {
                let Some(id) = row.get_i64("id") else {
                    continue;
                };
                let compact_class_id = row.get_i64("compact_class_id").unwrap_or_default();
                let Some(class) = self.schema.find_class_by_compact_id(compact_class_id) else {
                    info!(object_id = id, compact_class_id, "Skipping object of unknown class");
                    continue;
                };

                let plan = plans
                    .entry(class.compact_id)
                    .or_insert_with(|| self.plan_class(class, properties));

                let mut object = ObjectContainer::with_id(class.clone(), id);
                for (column, property) in &plan.columns {
                    if let Some(value) = read_value(property, row.get(column), id) {
                        object.put(&property.id, value);
                    }
                }
                objects.insert(id, object);
            }
        }

        // ========== Value tables ==========

        let mut tables: BTreeMap<String, TablePlan> = BTreeMap::new();
        let mut column_projections: BTreeMap<String, String> = BTreeMap::new();
        let mut derived_column_ids = Vec::new();

        let mut object_ids: Vec<i64> = objects.keys().copied().collect();
        object_ids.sort_unstable();
        for id in &object_ids {
            let Some(plan) = objects.get(id).and_then(|o| plans.get(&o.class().compact_id)) else {
                continue;
            };
            for (table, (property_ids, projections)) in &plan.tables {
                let entry = tables.entry(table.clone()).or_default();
                entry.property_ids.extend(property_ids);
                entry.projections.extend(projections.iter().map(|(a, e)| (a.clone(), e.clone())));
                entry.object_ids.insert(*id);
            }
            if !plan.derived_columns.is_empty() {
                column_projections.extend(plan.column_projections.iter().map(|(a, e)| (a.clone(), e.clone())));
                derived_column_ids.push(*id);
            }
        }

        for (table, table_plan) in &tables {
            self.load_value_table(table, table_plan, &plans, &mut objects)?;
        }

        // ========== Derived from inline columns ==========

        if !derived_column_ids.is_empty() {
            let mut fields = vec![QueryField::new("id")];
            fields.extend(column_projections.iter().map(|(alias, expr)| QueryField::expression(alias.as_str(), expr.as_str())));

            for batch in derived_column_ids.chunks(self.config.batch_size) {
                let query = Query::new(self.config.object_table.as_str())
                    .fields(fields.clone())
                    .filter(Condition::in_list("id", batch));
                for row in self.store.load_rows(&query)? {
                    let Some(id) = row.get_i64("id") else {
                        continue;
                    };
                    let Some(object) = objects.get_mut(&id) else {
                        continue;
                    };
                    let Some(plan) = plans.get(&object.class().compact_id) else {
                        continue;
                    };
                    for (alias, property) in &plan.derived_columns {
                        if let Some(value) = read_value(property, row.get(alias), id) {
                            object.put(&property.id, value);
                        }
                    }
                }
            }
        }

        debug!(requested = ids.len(), loaded = objects.len(), "Loaded objects");
        Ok(objects)
    }

    fn load_value_table(
        &self,
        table: &str,
        plan: &TablePlan,
        plans: &HashMap<i64, ClassPlan>,
        objects: &mut HashMap<i64, ObjectContainer>,
    ) -> Result<()> {
        let property_ids: Vec<i64> = plan.property_ids.iter().copied().collect();
        let object_ids: Vec<i64> = plan.object_ids.iter().copied().collect();

        let mut fields = vec![
            QueryField::new("object_id"),
            QueryField::new("property_compact_id"),
            QueryField::new("value"),
        ];
        fields.extend(plan.projections.iter().map(|(alias, expr)| QueryField::expression(alias.as_str(), expr.as_str())));

        for batch in object_ids.chunks(self.value_batch_size(property_ids.len())) {
            let query = Query::new(table).fields(fields.clone()).filter(Condition::and(vec![
                Condition::in_list("object_id", batch),
                Condition::in_list("property_compact_id", &property_ids),
            ]));
            for row in self.store.load_rows(&query)? {
                let (Some(object_id), Some(property_compact_id)) =
                    (row.get_i64("object_id"), row.get_i64("property_compact_id"))
                else {
                    continue;
                };
                let Some(object) = objects.get_mut(&object_id) else {
                    continue;
                };
                let Some(class_plan) = plans.get(&object.class().compact_id) else {
                    continue;
                };

                if let Some(property) = class_plan.values.get(&property_compact_id) {
                    if let Some(value) = read_value(property, row.get("value"), object_id) {
                        if property.multivalue {
                            object.push_element(&property.id, value);
                        } else {
                            object.put(&property.id, value);
                        }
                    }
                }
                for (source, alias, property) in &class_plan.derived_values {
                    if *source == property_compact_id {
                        if let Some(value) = read_value(property, row.get(alias), object_id) {
                            object.put(&property.id, value);
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// Resolve the requested properties of `class` into read instructions
    fn plan_class(&self, class: &Class, properties: Option<&[Arc<Property>]>) -> ClassPlan {
        let mut plan = ClassPlan::default();

        if let Some(requested) = properties {
            for property in requested {
                if class.location(&property.id).is_none() {
                    info!(class = %class.id, property = %property.id, "Property not defined for class, skipped");
                }
            }
        }

        let translator = self.translator();
        for cp in class.class_properties() {
            let property = &cp.property;
            if property.primary_key {
                continue;
            }
            if let Some(requested) = properties {
                if !requested.iter().any(|p| p.id == property.id) {
                    continue;
                }
            }

            match &cp.location {
                PropertyLocation::TableColumn(column) => plan.columns.push((column.clone(), property.clone())),
                PropertyLocation::ValueTable => {
                    let Ok(table) = self.config.value_table(property.data_type) else {
                        warn!(property = %property.id, data_type = %property.data_type, "No value table for data type");
                        continue;
                    };
                    plan.tables.entry(table.to_string()).or_default().0.insert(property.compact_id);
                    plan.values.insert(property.compact_id, property.clone());
                }
                PropertyLocation::Derived(derived) => {
                    let alias = derived_alias(class, property);
                    match &derived.source_location {
                        SourceLocation::ValueTable => {
                            let Ok(table) = self.config.value_table(derived.source.data_type) else {
                                warn!(property = %property.id, "No value table for derived source");
                                continue;
                            };
                            let expression = translator.derived_expression(derived, &format!("{}.value", table));
                            let entry = plan.tables.entry(table.to_string()).or_default();
                            entry.0.insert(derived.source.compact_id);
                            entry.1.insert(alias.clone(), expression);
                            plan.derived_values.push((derived.source.compact_id, alias, property.clone()));
                        }
                        SourceLocation::TableColumn(column) => {
                            let field_ref = format!("{}.{}", self.config.object_table, column);
                            plan.column_projections
                                .insert(alias.clone(), translator.derived_expression(derived, &field_ref));
                            plan.derived_columns.push((alias, property.clone()));
                        }
                    }
                }
            }
        }
        plan
    }
}
