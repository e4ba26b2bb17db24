//! Query model → parameterized SQL

use crate::query::{CompareOp, Condition, Operand, Query, SortDirection};
use crate::storage::Row;
use crate::value::Value;

/// SQL text plus positional parameters
#[derive(Debug, Clone, PartialEq)]
pub struct SqlStatement {
    pub sql: String,
    pub params: Vec<Value>,
}

/// Quote a possibly qualified identifier (`table.column`)
pub fn quote_identifier(name: &str) -> String {
    name.split('.')
        .map(|part| format!("\"{}\"", part.replace('"', "\"\"")))
        .collect::<Vec<_>>()
        .join(".")
}

struct SqlBuilder {
    sql: String,
    params: Vec<Value>,
}

impl SqlBuilder {
    fn new() -> Self {
        Self {
            sql: String::new(),
            params: Vec::new(),
        }
    }

    fn push(&mut self, text: &str) {
        self.sql.push_str(text);
    }

    fn bind(&mut self, value: Value) {
        self.sql.push('?');
        self.params.push(value);
    }

    fn select(&mut self, query: &Query) {
        self.push("SELECT ");
        if query.fields.is_empty() {
            self.push("*");
        }
        for (i, field) in query.fields.iter().enumerate() {
            if i > 0 {
                self.push(", ");
            }
            match &field.expression {
                Some(expression) => {
                    self.push(expression);
                    self.push(" AS ");
                    self.push(&quote_identifier(&field.name));
                }
                None => self.push(&quote_identifier(&field.name)),
            }
        }
        self.push(" FROM ");
        self.push(&quote_identifier(&query.table));
        self.where_clause(query.condition.as_ref());

        if !query.sort.is_empty() {
            self.push(" ORDER BY ");
            for (i, key) in query.sort.iter().enumerate() {
                if i > 0 {
                    self.push(", ");
                }
                self.push(&quote_identifier(&key.field));
                if key.direction == SortDirection::Descending {
                    self.push(" DESC");
                }
            }
        }

        if query.is_paged() {
            let limit = query.record_count.map(|c| c as i64).unwrap_or(-1);
            self.push(" LIMIT ");
            self.bind(Value::Integer(limit));
            self.push(" OFFSET ");
            self.bind(Value::Integer(query.start_record as i64));
        }
    }

    fn where_clause(&mut self, condition: Option<&Condition>) {
        if let Some(condition) = condition {
            self.push(" WHERE ");
            self.condition(condition);
        }
    }

    fn condition(&mut self, condition: &Condition) {
        match condition {
            Condition::Compare(left, CompareOp::Eq, Operand::Const(Value::Null)) => {
                self.operand(left);
                self.push(" IS NULL");
            }
            Condition::Compare(left, CompareOp::NotEq, Operand::Const(Value::Null)) => {
                self.operand(left);
                self.push(" IS NOT NULL");
            }
            Condition::Compare(left, op, right) => {
                self.operand(left);
                self.push(" ");
                self.push(op.as_sql());
                self.push(" ");
                self.operand(right);
            }
            Condition::In(_, values) if values.is_empty() => self.push("1=0"),
            Condition::In(operand, values) => {
                self.operand(operand);
                self.push(" IN (");
                for (i, value) in values.iter().enumerate() {
                    if i > 0 {
                        self.push(", ");
                    }
                    self.bind(value.clone());
                }
                self.push(")");
            }
            Condition::InQuery(operand, subquery) => {
                self.operand(operand);
                self.push(" IN (");
                self.select(subquery);
                self.push(")");
            }
            Condition::IsNull(operand) => {
                self.operand(operand);
                self.push(" IS NULL");
            }
            Condition::And(nodes) => self.group(nodes, " AND ", "1=1"),
            Condition::Or(nodes) => self.group(nodes, " OR ", "1=0"),
            Condition::Not(inner) => {
                self.push("NOT (");
                self.condition(inner);
                self.push(")");
            }
        }
    }

    fn group(&mut self, nodes: &[Condition], separator: &str, empty: &str) {
        if nodes.is_empty() {
            self.push(empty);
            return;
        }
        self.push("(");
        for (i, node) in nodes.iter().enumerate() {
            if i > 0 {
                self.push(separator);
            }
            self.condition(node);
        }
        self.push(")");
    }

    fn operand(&mut self, operand: &Operand) {
        match operand {
            Operand::Field(name) => self.push(&quote_identifier(name)),
            Operand::Const(value) => self.bind(value.clone()),
            Operand::Expr(expression) => {
                self.push("(");
                self.push(expression);
                self.push(")");
            }
        }
    }

    fn finish(self) -> SqlStatement {
        SqlStatement {
            sql: self.sql,
            params: self.params,
        }
    }
}

pub fn select(query: &Query) -> SqlStatement {
    let mut builder = SqlBuilder::new();
    builder.select(query);
    builder.finish()
}

pub fn count(query: &Query) -> SqlStatement {
    let mut builder = SqlBuilder::new();
    builder.push("SELECT COUNT(*) FROM ");
    builder.push(&quote_identifier(&query.table));
    builder.where_clause(query.condition.as_ref());
    builder.finish()
}

pub fn insert(table: &str, row: &Row) -> SqlStatement {
    let mut builder = SqlBuilder::new();
    builder.push("INSERT INTO ");
    builder.push(&quote_identifier(table));
    if row.is_empty() {
        builder.push(" DEFAULT VALUES");
        return builder.finish();
    }
    let columns: Vec<String> = row.columns().map(|(c, _)| quote_identifier(c)).collect();
    builder.push(" (");
    builder.push(&columns.join(", "));
    builder.push(") VALUES (");
    for (i, (_, value)) in row.columns().enumerate() {
        if i > 0 {
            builder.push(", ");
        }
        builder.bind(value.clone());
    }
    builder.push(")");
    builder.finish()
}

pub fn update(table: &str, id: i64, values: &Row) -> SqlStatement {
    let mut builder = SqlBuilder::new();
    builder.push("UPDATE ");
    builder.push(&quote_identifier(table));
    builder.push(" SET ");
    for (i, (column, value)) in values.columns().enumerate() {
        if i > 0 {
            builder.push(", ");
        }
        builder.push(&quote_identifier(column));
        builder.push(" = ");
        builder.bind(value.clone());
    }
    builder.push(" WHERE \"id\" = ");
    builder.bind(Value::Integer(id));
    builder.finish()
}

pub fn delete(table: &str, id: i64) -> SqlStatement {
    let mut builder = SqlBuilder::new();
    builder.push("DELETE FROM ");
    builder.push(&quote_identifier(table));
    builder.push(" WHERE \"id\" = ");
    builder.bind(Value::Integer(id));
    builder.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::{QueryField, SortField};

    #[test]
    fn test_select_with_subquery_and_paging() {
        let subquery = Query::new("object_string_values")
            .field("object_id")
            .filter(Condition::eq("property_compact_id", 4));
        let query = Query::new("objects")
            .field("id")
            .filter(Condition::and(vec![
                Condition::eq("compact_class_id", 2),
                Condition::InQuery(Operand::field("id"), Box::new(subquery)),
            ]))
            .sort_by(SortField::desc("objects.code"))
            .page(2, 2);

        let stmt = select(&query);
        assert_eq!(
            stmt.sql,
            "SELECT \"id\" FROM \"objects\" WHERE (\"compact_class_id\" = ? AND \"id\" IN \
             (SELECT \"object_id\" FROM \"object_string_values\" WHERE \"property_compact_id\" = ?)) \
             ORDER BY \"objects\".\"code\" DESC LIMIT ? OFFSET ?"
        );
        assert_eq!(
            stmt.params,
            vec![Value::Integer(2), Value::Integer(4), Value::Integer(2), Value::Integer(2)]
        );
    }

    #[test]
    fn test_edge_conditions() {
        let query = Query::new("t").filter(Condition::or(vec![
            Condition::in_list::<i64>("id", &[]),
            Condition::eq("code", Value::Null),
            Condition::and(vec![]),
        ]));
        assert_eq!(
            select(&query).sql,
            "SELECT * FROM \"t\" WHERE (1=0 OR \"code\" IS NULL OR 1=1)"
        );
    }

    #[test]
    fn test_expression_field_and_offset_only() {
        let mut query = Query::new("objects")
            .fields(vec![QueryField::new("id"), QueryField::expression("derived_2_9", "upper(objects.code)")]);
        query.start_record = 5;
        let stmt = select(&query);
        assert_eq!(
            stmt.sql,
            "SELECT \"id\", upper(objects.code) AS \"derived_2_9\" FROM \"objects\" LIMIT ? OFFSET ?"
        );
        assert_eq!(stmt.params, vec![Value::Integer(-1), Value::Integer(5)]);
    }

    #[test]
    fn test_write_statements() {
        let row = Row::new().with("object_id", 1).with("value", "x");
        let stmt = insert("object_string_values", &row);
        assert_eq!(stmt.sql, "INSERT INTO \"object_string_values\" (\"object_id\", \"value\") VALUES (?, ?)");

        let stmt = update("objects", 7, &Row::new().with("code", "c"));
        assert_eq!(stmt.sql, "UPDATE \"objects\" SET \"code\" = ? WHERE \"id\" = ?");
        assert_eq!(stmt.params, vec![Value::from("c"), Value::Integer(7)]);

        assert_eq!(delete("objects", 7).sql, "DELETE FROM \"objects\" WHERE \"id\" = ?");
        assert_eq!(insert("objects", &Row::new()).sql, "INSERT INTO \"objects\" DEFAULT VALUES");
    }
}
