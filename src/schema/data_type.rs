//! Primitive data types of object properties

use std::fmt;
use std::str::FromStr;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};

use crate::value::{Value, DATE_FORMAT, DATETIME_FORMAT};
use crate::{Error, Result};

/// Primitive type of a property value.
///
/// Each data type maps to one value table (see `StorageConfig::data_type_tables`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    Boolean,
    Integer,
    Decimal,
    String,
    Date,
    DateTime,
}

impl DataType {
    /// Stable identifier, used as key in the data type → value table map
    pub fn id(&self) -> &'static str {
        match self {
            DataType::Boolean => "boolean",
            DataType::Integer => "integer",
            DataType::Decimal => "decimal",
            DataType::String => "string",
            DataType::Date => "date",
            DataType::DateTime => "datetime",
        }
    }

    pub fn all() -> &'static [DataType] {
        &[
            DataType::Boolean,
            DataType::Integer,
            DataType::Decimal,
            DataType::String,
            DataType::Date,
            DataType::DateTime,
        ]
    }

    /// SQL column type used for a value of this type
    pub fn sql_type(&self) -> &'static str {
        match self {
            DataType::Boolean | DataType::Integer => "INTEGER",
            DataType::Decimal => "REAL",
            DataType::String | DataType::Date | DataType::DateTime => "TEXT",
        }
    }

    /// Emptiness rule of the type (empty string, empty list)
    pub fn is_empty(&self, value: &Value) -> bool {
        match value {
            Value::Null => true,
            Value::String(s) => *self == DataType::String && s.is_empty(),
            Value::List(items) => items.iter().all(|item| self.is_empty(item)),
            _ => false,
        }
    }

    /// Convert a value to this type's value representation
    pub fn convert(&self, value: &Value) -> Result<Value> {
        if value.is_null() {
            return Ok(Value::Null);
        }
        let converted = match (self, value) {
            (DataType::Boolean, Value::Boolean(b)) => Some(Value::Boolean(*b)),
            (DataType::Boolean, Value::String(s)) => match s.trim().to_lowercase().as_str() {
                "true" | "1" => Some(Value::Boolean(true)),
                "false" | "0" => Some(Value::Boolean(false)),
                _ => None,
            },
            (DataType::Boolean, v) => v.as_f64().map(|n| Value::Boolean(n != 0.0)),

            (DataType::Integer, Value::String(s)) => s.trim().parse::<i64>().ok().map(Value::Integer),
            (DataType::Integer, v) => v.as_i64().map(Value::Integer),

            (DataType::Decimal, Value::String(s)) => s.trim().parse::<f64>().ok().map(Value::Decimal),
            (DataType::Decimal, v) => v.as_f64().map(Value::Decimal),

            (DataType::String, Value::List(_)) => None,
            (DataType::String, v) => Some(Value::String(v.to_string())),

            (DataType::Date, Value::Date(d)) => Some(Value::Date(*d)),
            (DataType::Date, Value::DateTime(dt)) => Some(Value::Date(dt.date())),
            (DataType::Date, Value::String(s)) => parse_date(s),

            (DataType::DateTime, Value::DateTime(dt)) => Some(Value::DateTime(*dt)),
            (DataType::DateTime, Value::Date(d)) => Some(Value::DateTime(d.and_time(NaiveTime::MIN))),
            (DataType::DateTime, Value::String(s)) => parse_datetime(s).map(Value::DateTime),

            _ => None,
        };
        converted.ok_or_else(|| Error::ValueConversion {
            data_type: self.id(),
            value: format!("{} ({})", value, value.kind_name()),
        })
    }
}

fn parse_datetime(s: &str) -> Option<NaiveDateTime> {
    let s = s.trim();
    NaiveDateTime::parse_from_str(s, DATETIME_FORMAT)
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f"))
        .ok()
        .or_else(|| {
            NaiveDate::parse_from_str(s, DATE_FORMAT)
                .ok()
                .map(|d| d.and_time(NaiveTime::MIN))
        })
}

fn parse_date(s: &str) -> Option<Value> {
    NaiveDate::parse_from_str(s.trim(), DATE_FORMAT)
        .ok()
        .or_else(|| parse_datetime(s).map(|dt| dt.date()))
        .map(Value::Date)
}

impl FromStr for DataType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "boolean" | "bool" => Ok(DataType::Boolean),
            "integer" | "int" => Ok(DataType::Integer),
            "decimal" | "number" => Ok(DataType::Decimal),
            "string" | "text" => Ok(DataType::String),
            "date" => Ok(DataType::Date),
            "datetime" | "timestamp" => Ok(DataType::DateTime),
            _ => Err(Error::SchemaInconsistency(format!("Unknown data type: {}", s))),
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.id())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_type_roundtrip() {
        for dt in DataType::all() {
            let parsed: DataType = dt.id().parse().unwrap();
            assert_eq!(*dt, parsed);
        }
        assert!("blob".parse::<DataType>().is_err());
    }

    #[test]
    fn test_convert_from_text() {
        assert_eq!(DataType::Integer.convert(&Value::from("1999")).unwrap(), Value::Integer(1999));
        assert_eq!(DataType::Decimal.convert(&Value::from("2.5")).unwrap(), Value::Decimal(2.5));
        let dt = DataType::DateTime.convert(&Value::from("2020-01-02 03:04:05")).unwrap();
        let expected = NaiveDate::from_ymd_opt(2020, 1, 2).unwrap().and_hms_opt(3, 4, 5).unwrap();
        assert_eq!(dt, Value::DateTime(expected));
    }

    #[test]
    fn test_emptiness() {
        assert!(DataType::String.is_empty(&Value::from("")));
        assert!(!DataType::Integer.is_empty(&Value::Integer(0)));
        assert!(DataType::String.is_empty(&Value::List(vec![Value::from(""), Value::Null])));
    }
}
