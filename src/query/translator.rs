//! Query translation - class-scoped conditions to physical conditions
//!
//! Logical field names are property IDs of the queried class (plus `id`).
//! Each field resolves through its `PropertyLocation`:
//! - `TableColumn` → the object-table column
//! - `ValueTable` → `id IN (SELECT object_id FROM <values> WHERE property_compact_id = ? AND ...)`
//! - `Derived` → the derive expression applied to the source field

use std::sync::Arc;

use super::{CompareOp, Condition, Operand, Query, SortField};
use crate::config::StorageConfig;
use crate::schema::{Class, DataSchema, DerivedLocation, Property, PropertyLocation, Relationship, SourceLocation};
use crate::value::{self, Value};
use crate::{Error, Result};

/// Physical shape of a logical field
enum ResolvedField {
    /// Usable directly in an object-table condition
    Inline {
        operand: Operand,
        property: Option<Arc<Property>>,
    },
    /// Lives in a value table; conditions become an `id IN (subquery)`
    Values {
        table: String,
        source: Arc<Property>,
        value: Operand,
        property: Arc<Property>,
    },
}

pub struct QueryTranslator<'a> {
    schema: &'a DataSchema,
    config: &'a StorageConfig,
}

impl<'a> QueryTranslator<'a> {
    pub fn new(schema: &'a DataSchema, config: &'a StorageConfig) -> Self {
        Self { schema, config }
    }

    pub fn schema(&self) -> &DataSchema {
        self.schema
    }

    /// Physical expression of a derived property over `field_ref`.
    ///
    /// The derive type is looked up in the rewrite table first, so dialects can
    /// replace a template without touching the schema.
    pub fn derived_expression(&self, location: &DerivedLocation, field_ref: &str) -> String {
        let template = self
            .config
            .derive_types
            .get(&location.derive_type)
            .unwrap_or(&location.derive_type);
        template.replace("{0}", field_ref)
    }

    /// Object-table condition for a class query: class filter plus the translated condition
    pub fn class_condition(&self, class: &Class, condition: Option<&Condition>) -> Result<Condition> {
        let mut nodes = vec![Condition::eq("compact_class_id", class.compact_id)];
        if let Some(condition) = condition {
            nodes.push(self.translate_condition(class, condition)?);
        }
        Ok(Condition::And(nodes))
    }

    pub fn translate_condition(&self, class: &Class, condition: &Condition) -> Result<Condition> {
        match condition {
            Condition::And(nodes) => Ok(Condition::And(self.translate_all(class, nodes)?)),
            Condition::Or(nodes) => Ok(Condition::Or(self.translate_all(class, nodes)?)),
            Condition::Not(inner) => Ok(Condition::Not(Box::new(self.translate_condition(class, inner)?))),
            Condition::IsNull(operand) => self.translate_is_null(class, operand),
            Condition::In(operand, values) => self.translate_in(class, operand, values),
            Condition::InQuery(operand, subquery) => match self.resolve_operand(class, operand)? {
                Some(ResolvedField::Values { property, .. }) => Err(Error::UnsupportedOperation(format!(
                    "sub-query condition on value-table property {}",
                    property.id
                ))),
                Some(ResolvedField::Inline { operand, .. }) => Ok(Condition::InQuery(operand, subquery.clone())),
                None => Ok(condition.clone()),
            },
            Condition::Compare(left, op, right) => self.translate_compare(class, left, *op, right),
        }
    }

    fn translate_all(&self, class: &Class, nodes: &[Condition]) -> Result<Vec<Condition>> {
        nodes.iter().map(|n| self.translate_condition(class, n)).collect()
    }

    fn translate_compare(&self, class: &Class, left: &Operand, op: CompareOp, right: &Operand) -> Result<Condition> {
        let left_field = self.resolve_operand(class, left)?;
        let right_field = self.resolve_operand(class, right)?;

        match (left_field, right_field) {
            (None, None) => Ok(Condition::Compare(left.clone(), op, right.clone())),
            (Some(field), None) => self.field_compare(field, op, right),
            (None, Some(field)) => self.field_compare(field, op.mirrored(), left),
            (
                Some(ResolvedField::Inline { operand: l, .. }),
                Some(ResolvedField::Inline { operand: r, .. }),
            ) => Ok(Condition::Compare(l, op, r)),
            _ => Err(Error::UnsupportedOperation(
                "comparing two fields where one is stored in a value table".to_string(),
            )),
        }
    }

    fn field_compare(&self, field: ResolvedField, op: CompareOp, other: &Operand) -> Result<Condition> {
        match field {
            ResolvedField::Inline { operand, property } => {
                let other = typed_operand(property.as_deref(), op, other)?;
                Ok(Condition::Compare(operand, op, other))
            }
            ResolvedField::Values { table, source, value, property } => {
                let other = typed_operand(Some(&property), op, other)?;
                // a missing value row is the stored form of null
                match (op, &other) {
                    (CompareOp::Eq, Operand::Const(Value::Null)) => Ok(values_is_null(&table, &source, value)),
                    (CompareOp::NotEq, Operand::Const(Value::Null)) => {
                        Ok(values_is_null(&table, &source, value).negate())
                    }
                    _ => Ok(value_subquery(&table, &source, Some(Condition::Compare(value, op, other)))),
                }
            }
        }
    }

    fn translate_in(&self, class: &Class, operand: &Operand, values: &[Value]) -> Result<Condition> {
        match self.resolve_operand(class, operand)? {
            None => Ok(Condition::In(operand.clone(), values.to_vec())),
            Some(ResolvedField::Inline { operand, property }) => {
                Ok(Condition::In(operand, typed_values(property.as_deref(), values)?))
            }
            Some(ResolvedField::Values { table, source, value, property }) => {
                let values = typed_values(Some(&property), values)?;
                Ok(value_subquery(&table, &source, Some(Condition::In(value, values))))
            }
        }
    }

    fn translate_is_null(&self, class: &Class, operand: &Operand) -> Result<Condition> {
        match self.resolve_operand(class, operand)? {
            None => Ok(Condition::IsNull(operand.clone())),
            Some(ResolvedField::Inline { operand, .. }) => Ok(Condition::IsNull(operand)),
            Some(ResolvedField::Values { table, source, value, .. }) => Ok(values_is_null(&table, &source, value)),
        }
    }

    /// Resolve a field operand of `class`; constants and expressions resolve to `None`
    fn resolve_operand(&self, class: &Class, operand: &Operand) -> Result<Option<ResolvedField>> {
        let Operand::Field(name) = operand else {
            return Ok(None);
        };
        if name == "id" {
            return Ok(Some(ResolvedField::Inline {
                operand: Operand::field("id"),
                property: None,
            }));
        }
        let cp = class.class_property(name).ok_or_else(|| {
            Error::SchemaInconsistency(format!("property {} is not defined for class {}", name, class.id))
        })?;
        let property = cp.property.clone();

        let resolved = match &cp.location {
            PropertyLocation::TableColumn(column) => ResolvedField::Inline {
                operand: Operand::Field(format!("{}.{}", self.config.object_table, column)),
                property: Some(property),
            },
            PropertyLocation::ValueTable => {
                let table = self.config.value_table(property.data_type)?.to_string();
                ResolvedField::Values {
                    value: Operand::Field(format!("{}.value", table)),
                    table,
                    source: property.clone(),
                    property,
                }
            }
            PropertyLocation::Derived(derived) => match &derived.source_location {
                SourceLocation::TableColumn(column) => {
                    let field_ref = format!("{}.{}", self.config.object_table, column);
                    ResolvedField::Inline {
                        operand: Operand::Expr(self.derived_expression(derived, &field_ref)),
                        property: Some(property),
                    }
                }
                SourceLocation::ValueTable => {
                    let table = self.config.value_table(derived.source.data_type)?.to_string();
                    let field_ref = format!("{}.value", table);
                    ResolvedField::Values {
                        value: Operand::Expr(self.derived_expression(derived, &field_ref)),
                        table,
                        source: derived.source.clone(),
                        property,
                    }
                }
            },
        };
        Ok(Some(resolved))
    }

    /// Physical sort for a class query, or `None` when a key is not an object-table column
    pub fn translate_sort(&self, class: &Class, sort: &[SortField]) -> Result<Option<Vec<SortField>>> {
        let mut physical = Vec::with_capacity(sort.len());
        for key in sort {
            if key.field == "id" {
                physical.push(key.clone());
                continue;
            }
            let location = class.location(&key.field).ok_or_else(|| {
                Error::SchemaInconsistency(format!("property {} is not defined for class {}", key.field, class.id))
            })?;
            match location {
                PropertyLocation::TableColumn(column) => physical.push(SortField {
                    field: column.clone(),
                    direction: key.direction,
                }),
                PropertyLocation::ValueTable | PropertyLocation::Derived(_) => return Ok(None),
            }
        }
        Ok(Some(physical))
    }

    /// Relation-table query for a relationship used as a virtual `(subject_id, object_id)` source
    pub fn relation_query(&self, relationship: &Relationship, query: &Query) -> Result<Query> {
        let predicate = relationship.predicate().ok_or_else(|| {
            Error::UnsupportedOperation(format!("querying inferred {} as a relation source", relationship))
        })?;
        let (subject_col, object_col) = relationship.subject_columns();
        let relation_table = &self.config.relation_table;

        let map_field = |name: &str| -> Result<String> {
            let column = match name {
                "subject_id" => subject_col,
                "object_id" => object_col,
                other => {
                    return Err(Error::SchemaInconsistency(format!(
                        "field {} is not available on relationship {}",
                        other, relationship.id
                    )));
                }
            };
            Ok(format!("{}.{}", relation_table, column))
        };

        let mut nodes = vec![Condition::eq("predicate_class_compact_id", predicate.compact_id)];
        if let Some(condition) = &query.condition {
            nodes.push(map_fields(condition, &map_field)?);
        }

        let sort = query
            .sort
            .iter()
            .map(|s| {
                Ok(SortField {
                    field: map_field(&s.field)?,
                    direction: s.direction,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Query {
            table: relation_table.clone(),
            condition: Some(Condition::And(nodes)),
            fields: vec![
                super::QueryField::expression("subject_id", format!("{}.{}", relation_table, subject_col)),
                super::QueryField::expression("object_id", format!("{}.{}", relation_table, object_col)),
            ],
            sort,
            start_record: query.start_record,
            record_count: query.record_count,
        })
    }
}

fn value_subquery(table: &str, property: &Property, condition: Option<Condition>) -> Condition {
    let mut nodes = vec![Condition::eq("property_compact_id", property.compact_id)];
    nodes.extend(condition);
    let subquery = Query::new(table).field("object_id").filter(Condition::And(nodes));
    Condition::InQuery(Operand::field("id"), Box::new(subquery))
}

/// No value row (or a null projection of it) for the object
fn values_is_null(table: &str, property: &Property, value: Operand) -> Condition {
    let present = match value {
        Operand::Field(_) => None,
        expr => Some(Condition::IsNull(expr).negate()),
    };
    value_subquery(table, property, present).negate()
}

/// Constant converted to the physical form of `property`; LIKE patterns stay text
fn typed_operand(property: Option<&Property>, op: CompareOp, operand: &Operand) -> Result<Operand> {
    match (property, operand) {
        (Some(property), Operand::Const(value)) if op != CompareOp::Like => {
            Ok(Operand::Const(value::serialize(property, value)?))
        }
        _ => Ok(operand.clone()),
    }
}

fn typed_values(property: Option<&Property>, values: &[Value]) -> Result<Vec<Value>> {
    match property {
        Some(property) => values.iter().map(|v| value::serialize(property, v)).collect(),
        None => Ok(values.to_vec()),
    }
}

fn map_fields(condition: &Condition, map_field: &dyn Fn(&str) -> Result<String>) -> Result<Condition> {
    let map_operand = |operand: &Operand| -> Result<Operand> {
        match operand {
            Operand::Field(name) => Ok(Operand::Field(map_field(name)?)),
            other => Ok(other.clone()),
        }
    };
    let map_all = |nodes: &[Condition]| -> Result<Vec<Condition>> {
        nodes.iter().map(|n| map_fields(n, map_field)).collect()
    };
    Ok(match condition {
        Condition::Compare(l, op, r) => Condition::Compare(map_operand(l)?, *op, map_operand(r)?),
        Condition::In(operand, values) => Condition::In(map_operand(operand)?, values.clone()),
        Condition::InQuery(operand, q) => Condition::InQuery(map_operand(operand)?, q.clone()),
        Condition::IsNull(operand) => Condition::IsNull(map_operand(operand)?),
        Condition::And(nodes) => Condition::And(map_all(nodes)?),
        Condition::Or(nodes) => Condition::Or(map_all(nodes)?),
        Condition::Not(inner) => Condition::Not(Box::new(map_fields(inner, map_field)?)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing;

    #[test]
    fn test_class_filter_prefix() {
        let schema = testing::schema();
        let config = StorageConfig::default();
        let translator = QueryTranslator::new(&schema, &config);
        let class = schema.find_class("contacts").unwrap();

        let translated = translator.class_condition(class, None).unwrap();
        assert_eq!(translated, Condition::And(vec![Condition::eq("compact_class_id", 2)]));
    }

    #[test]
    fn test_value_table_condition_becomes_subquery() {
        let schema = testing::schema();
        let config = StorageConfig::default();
        let translator = QueryTranslator::new(&schema, &config);
        let class = schema.find_class("contacts").unwrap();

        let translated = translator
            .translate_condition(class, &Condition::eq("is_primary", true))
            .unwrap();
        let Condition::InQuery(Operand::Field(field), subquery) = translated else {
            panic!("expected sub-query, got {:?}", translated);
        };
        assert_eq!(field, "id");
        assert_eq!(subquery.table, "object_integer_values");
        assert_eq!(
            subquery.condition,
            Some(Condition::And(vec![
                Condition::eq("property_compact_id", testing::IS_PRIMARY),
                Condition::Compare(
                    Operand::field("object_integer_values.value"),
                    CompareOp::Eq,
                    Operand::Const(Value::Integer(1))
                ),
            ]))
        );
    }

    #[test]
    fn test_null_equality_on_value_table_is_null_check() {
        let schema = testing::schema();
        let config = StorageConfig::default();
        let translator = QueryTranslator::new(&schema, &config);
        let class = schema.find_class("contacts").unwrap();

        let is_null = translator.translate_condition(class, &Condition::is_null("name")).unwrap();
        let eq_null = translator
            .translate_condition(class, &Condition::eq("name", Value::Null))
            .unwrap();
        assert_eq!(eq_null, is_null);

        let not_null = translator
            .translate_condition(class, &Condition::compare("name", CompareOp::NotEq, Value::Null))
            .unwrap();
        assert_eq!(not_null, is_null.negate());
    }

    #[test]
    fn test_derived_column_uses_rewrite_table() {
        let schema = testing::schema();
        let mut config = StorageConfig::default();
        config.derive_types.insert("upper({0})".to_string(), "lower({0})".to_string());
        let translator = QueryTranslator::new(&schema, &config);
        let class = schema.find_class("contacts").unwrap();

        let translated = translator
            .translate_condition(class, &Condition::eq("code_upper", "X"))
            .unwrap();
        assert_eq!(
            translated,
            Condition::Compare(
                Operand::Expr("lower(objects.code)".to_string()),
                CompareOp::Eq,
                Operand::Const(Value::from("X"))
            )
        );
    }

    #[test]
    fn test_unknown_property_is_schema_error() {
        let schema = testing::schema();
        let config = StorageConfig::default();
        let translator = QueryTranslator::new(&schema, &config);
        let class = schema.find_class("companies").unwrap();

        let err = translator
            .translate_condition(class, &Condition::eq("nickname", "x"))
            .unwrap_err();
        assert!(matches!(err, Error::SchemaInconsistency(_)));
    }

    #[test]
    fn test_sort_pushdown_only_for_columns() {
        let schema = testing::schema();
        let config = StorageConfig::default();
        let translator = QueryTranslator::new(&schema, &config);
        let class = schema.find_class("contacts").unwrap();

        let pushed = translator.translate_sort(class, &[SortField::desc("code")]).unwrap();
        assert_eq!(pushed, Some(vec![SortField::desc("code")]));
        assert_eq!(translator.translate_sort(class, &[SortField::asc("name")]).unwrap(), None);
    }
}
