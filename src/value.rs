//! Property values - logical values, storage codec and comparison
//!
//! A value travels in two shapes:
//! - logical: what an `ObjectContainer` holds (`Value::Boolean(true)`)
//! - physical: what an object-table column or value-table row holds (`Value::Integer(1)`)
//!
//! `serialize` and `deserialize` convert between the two for a given property.

use std::cmp::Ordering;
use std::fmt;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::Serialize;

use crate::Result;
use crate::schema::{DataType, Property};

/// Storage format for `Date` values
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Storage format for `DateTime` values
pub const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

/// A property value, either logical or physical.
///
/// Serializes as plain JSON with dates as text. Reading a value back needs the
/// property's data type, so there is no `Deserialize`; use [`deserialize`].
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
#[serde(untagged)]
pub enum Value {
    /// Storage null / absent value
    #[default]
    Null,
    Boolean(bool),
    Integer(i64),
    Decimal(f64),
    String(String),
    Date(NaiveDate),
    DateTime(NaiveDateTime),
    /// Elements of a multivalue property
    List(Vec<Value>),
}

static NULL: Value = Value::Null;

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Integer view of a numeric value
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            Value::Decimal(d) if d.fract() == 0.0 => Some(*d as i64),
            Value::Boolean(b) => Some(i64::from(*b)),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Integer(i) => Some(*i as f64),
            Value::Decimal(d) => Some(*d),
            Value::Boolean(b) => Some(if *b { 1.0 } else { 0.0 }),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Elements of a value: the list items, or the value itself
    pub fn elements(&self) -> &[Value] {
        match self {
            Value::List(items) => items,
            other => std::slice::from_ref(other),
        }
    }

    /// Short name of the variant, used in error messages
    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Boolean(_) => "boolean",
            Value::Integer(_) => "integer",
            Value::Decimal(_) => "decimal",
            Value::String(_) => "string",
            Value::Date(_) => "date",
            Value::DateTime(_) => "datetime",
            Value::List(_) => "list",
        }
    }

    fn rank(&self) -> u8 {
        match self {
            Value::Null => 0,
            Value::Boolean(_) | Value::Integer(_) | Value::Decimal(_) => 1,
            Value::String(_) => 2,
            Value::Date(_) | Value::DateTime(_) => 3,
            Value::List(_) => 4,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Boolean(b) => write!(f, "{}", b),
            Value::Integer(i) => write!(f, "{}", i),
            Value::Decimal(d) => write!(f, "{}", d),
            Value::String(s) => write!(f, "{}", s),
            Value::Date(d) => write!(f, "{}", d.format(DATE_FORMAT)),
            Value::DateTime(dt) => write!(f, "{}", dt.format(DATETIME_FORMAT)),
            Value::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Boolean(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Integer(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Integer(i64::from(v))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Decimal(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<NaiveDate> for Value {
    fn from(v: NaiveDate) -> Self {
        Value::Date(v)
    }
}

impl From<NaiveDateTime> for Value {
    fn from(v: NaiveDateTime) -> Self {
        Value::DateTime(v)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(v: Vec<T>) -> Self {
        Value::List(v.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

// ========== Codec ==========

/// Convert a logical value into its physical form for `property`.
///
/// Booleans are packed as 1/0 so they fit a numeric value table.
pub fn serialize(property: &Property, value: &Value) -> Result<Value> {
    if is_empty(property, value) {
        return Ok(Value::Null);
    }
    match property.data_type.convert(value)? {
        Value::Boolean(b) => Ok(Value::Integer(i64::from(b))),
        converted => Ok(converted),
    }
}

/// Convert a stored value back into its logical form; storage null is absent.
pub fn deserialize(property: &Property, stored: &Value) -> Result<Option<Value>> {
    if stored.is_null() {
        return Ok(None);
    }
    if property.data_type == DataType::Boolean {
        if let Some(n) = stored.as_f64() {
            return Ok(Some(Value::Boolean(n != 0.0)));
        }
    }
    property.data_type.convert(stored).map(Some)
}

/// True for storage null or when the data type considers the value empty
pub fn is_empty(property: &Property, value: &Value) -> bool {
    value.is_null() || property.data_type.is_empty(value)
}

/// Stored value in canonical physical form, for comparing against `serialize` output.
///
/// Storage backends may hand back a different representation (dates as text).
pub(crate) fn normalize_stored(property: &Property, stored: &Value) -> Value {
    match deserialize(property, stored).and_then(|v| serialize(property, &v.unwrap_or_default())) {
        Ok(v) => v,
        Err(_) => stored.clone(),
    }
}

// ========== Comparison ==========

/// Ordering and equality of property values.
///
/// Used by save-diffing and by the in-memory sort fallback of id queries.
pub trait ValueComparer {
    fn compare(&self, a: &Value, b: &Value) -> Ordering;
}

/// Default comparer: nulls first, numbers compared numerically across
/// integer/decimal, dates compared chronologically across date/datetime.
#[derive(Debug, Default, Clone, Copy)]
pub struct DbValueComparer;

impl ValueComparer for DbValueComparer {
    fn compare(&self, a: &Value, b: &Value) -> Ordering {
        match (a, b) {
            (Value::Null, Value::Null) => Ordering::Equal,
            (Value::Integer(x), Value::Integer(y)) => x.cmp(y),
            (Value::Boolean(x), Value::Boolean(y)) => x.cmp(y),
            (Value::String(x), Value::String(y)) => x.cmp(y),
            (Value::Date(x), Value::Date(y)) => x.cmp(y),
            (Value::DateTime(x), Value::DateTime(y)) => x.cmp(y),
            (Value::Date(x), Value::DateTime(y)) => x.and_time(NaiveTime::MIN).cmp(y),
            (Value::DateTime(x), Value::Date(y)) => x.cmp(&y.and_time(NaiveTime::MIN)),
            (Value::List(x), Value::List(y)) => {
                for (l, r) in x.iter().zip(y.iter()) {
                    let ord = self.compare(l, r);
                    if ord != Ordering::Equal {
                        return ord;
                    }
                }
                x.len().cmp(&y.len())
            }
            _ => match (a.as_f64(), b.as_f64()) {
                (Some(x), Some(y)) => x.total_cmp(&y),
                _ => a.rank().cmp(&b.rank()),
            },
        }
    }
}

/// Compare two possibly-absent values; absence and storage null are the same value.
pub fn compare_values(comparer: &dyn ValueComparer, a: Option<&Value>, b: Option<&Value>) -> Ordering {
    comparer.compare(a.unwrap_or(&NULL), b.unwrap_or(&NULL))
}

pub fn values_equal(comparer: &dyn ValueComparer, a: Option<&Value>, b: Option<&Value>) -> bool {
    compare_values(comparer, a, b) == Ordering::Equal
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prop(data_type: DataType) -> Property {
        Property::new("p", 1, data_type)
    }

    #[test]
    fn test_boolean_packed_as_number() {
        let p = prop(DataType::Boolean);
        assert_eq!(serialize(&p, &Value::Boolean(true)).unwrap(), Value::Integer(1));
        assert_eq!(serialize(&p, &Value::Boolean(false)).unwrap(), Value::Integer(0));
        assert_eq!(deserialize(&p, &Value::Integer(7)).unwrap(), Some(Value::Boolean(true)));
        assert_eq!(deserialize(&p, &Value::Decimal(0.0)).unwrap(), Some(Value::Boolean(false)));
    }

    #[test]
    fn test_null_and_empty() {
        let p = prop(DataType::String);
        assert_eq!(deserialize(&p, &Value::Null).unwrap(), None);
        assert!(is_empty(&p, &Value::from("")));
        assert!(is_empty(&p, &Value::Null));
        assert!(!is_empty(&p, &Value::from("x")));
        assert_eq!(serialize(&p, &Value::from("")).unwrap(), Value::Null);
    }

    #[test]
    fn test_stored_text_date_normalizes() {
        let p = prop(DataType::Date);
        let date = NaiveDate::from_ymd_opt(1999, 5, 20).unwrap();
        let stored = Value::from("1999-05-20");
        assert_eq!(deserialize(&p, &stored).unwrap(), Some(Value::Date(date)));
        assert_eq!(normalize_stored(&p, &stored), Value::Date(date));
    }

    #[test]
    fn test_comparer_normalizes_absence() {
        let cmp = DbValueComparer;
        assert!(values_equal(&cmp, None, Some(&Value::Null)));
        assert!(values_equal(&cmp, Some(&Value::Integer(2)), Some(&Value::Decimal(2.0))));
        assert_eq!(compare_values(&cmp, None, Some(&Value::from("a"))), Ordering::Less);
        assert_eq!(cmp.compare(&Value::from("b"), &Value::from("a")), Ordering::Greater);
    }

    #[test]
    fn test_json_output_is_plain() {
        let date = NaiveDate::from_ymd_opt(1999, 5, 20).unwrap();
        let list = Value::List(vec![Value::from("a"), Value::Integer(2), Value::Date(date), Value::Null]);
        assert_eq!(serde_json::to_string(&list).unwrap(), r#"["a",2,"1999-05-20",null]"#);
        assert_eq!(serde_json::to_string(&Value::Boolean(true)).unwrap(), "true");
    }

    #[test]
    fn test_conversion_failure() {
        let p = prop(DataType::Integer);
        assert!(serialize(&p, &Value::from("not a number")).is_err());
    }
}
