//! Abstract query model
//!
//! The same model describes class-scoped logical queries (table = class ID,
//! fields = property IDs) and physical queries against the relational layout
//! (table = object/value/relation table). `QueryTranslator` maps the former
//! onto the latter.

pub mod translator;

pub use translator::QueryTranslator;

use crate::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    Like,
}

impl CompareOp {
    pub fn as_sql(&self) -> &'static str {
        match self {
            CompareOp::Eq => "=",
            CompareOp::NotEq => "<>",
            CompareOp::Lt => "<",
            CompareOp::LtEq => "<=",
            CompareOp::Gt => ">",
            CompareOp::GtEq => ">=",
            CompareOp::Like => "LIKE",
        }
    }

    /// Operator with operands swapped (`a < b` ⇔ `b > a`)
    pub fn mirrored(&self) -> CompareOp {
        match self {
            CompareOp::Lt => CompareOp::Gt,
            CompareOp::LtEq => CompareOp::GtEq,
            CompareOp::Gt => CompareOp::Lt,
            CompareOp::GtEq => CompareOp::LtEq,
            other => *other,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    /// Field reference, optionally qualified (`table.column`)
    Field(String),
    Const(Value),
    /// Raw expression, e.g. a derived property projection
    Expr(String),
}

impl Operand {
    pub fn field(name: impl Into<String>) -> Self {
        Operand::Field(name.into())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    Compare(Operand, CompareOp, Operand),
    In(Operand, Vec<Value>),
    InQuery(Operand, Box<Query>),
    IsNull(Operand),
    And(Vec<Condition>),
    Or(Vec<Condition>),
    Not(Box<Condition>),
}

impl Condition {
    pub fn compare(field: &str, op: CompareOp, value: impl Into<Value>) -> Self {
        Condition::Compare(Operand::field(field), op, Operand::Const(value.into()))
    }

    pub fn eq(field: &str, value: impl Into<Value>) -> Self {
        Condition::compare(field, CompareOp::Eq, value)
    }

    pub fn in_list<V: Into<Value> + Clone>(field: &str, values: &[V]) -> Self {
        Condition::In(Operand::field(field), values.iter().cloned().map(Into::into).collect())
    }

    pub fn is_null(field: &str) -> Self {
        Condition::IsNull(Operand::field(field))
    }

    pub fn and(nodes: Vec<Condition>) -> Self {
        Condition::And(nodes)
    }

    pub fn or(nodes: Vec<Condition>) -> Self {
        Condition::Or(nodes)
    }

    pub fn negate(self) -> Self {
        Condition::Not(Box::new(self))
    }
}

/// Selected field: plain column, or an expression projected under `name`
#[derive(Debug, Clone, PartialEq)]
pub struct QueryField {
    pub name: String,
    pub expression: Option<String>,
}

impl QueryField {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            expression: None,
        }
    }

    pub fn expression(name: impl Into<String>, expression: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            expression: Some(expression.into()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortDirection {
    #[default]
    Ascending,
    Descending,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SortField {
    pub field: String,
    pub direction: SortDirection,
}

impl SortField {
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: SortDirection::Ascending,
        }
    }

    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: SortDirection::Descending,
        }
    }
}

/// A query over one table (physical) or one class (logical).
///
/// Empty `fields` selects every column.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Query {
    pub table: String,
    pub condition: Option<Condition>,
    pub fields: Vec<QueryField>,
    pub sort: Vec<SortField>,
    pub start_record: usize,
    pub record_count: Option<usize>,
}

impl Query {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            ..Default::default()
        }
    }

    pub fn filter(mut self, condition: Condition) -> Self {
        self.condition = Some(condition);
        self
    }

    pub fn field(mut self, name: impl Into<String>) -> Self {
        self.fields.push(QueryField::new(name));
        self
    }

    pub fn fields(mut self, fields: Vec<QueryField>) -> Self {
        self.fields = fields;
        self
    }

    pub fn sort_by(mut self, sort: SortField) -> Self {
        self.sort.push(sort);
        self
    }

    pub fn page(mut self, start_record: usize, record_count: usize) -> Self {
        self.start_record = start_record;
        self.record_count = Some(record_count);
        self
    }

    pub fn is_paged(&self) -> bool {
        self.start_record > 0 || self.record_count.is_some()
    }
}
