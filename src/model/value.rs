//! Field values and the name-keyed maps soft storage holds them in.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use super::FieldType;
use crate::Error;

/// Soft field name → value.
pub type PropertyMap = HashMap<String, Value>;

/// A dynamically typed field value. Every non-null variant corresponds to
/// exactly one [`FieldType`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Bytes(Vec<u8>),
    List(Vec<Value>),
    Map(PropertyMap),
    Date(NaiveDate),
    DateTime(DateTime<Utc>),
}

impl Value {
    /// The field type this value belongs to. `None` for `Null`.
    pub fn field_type(&self) -> Option<FieldType> {
        Some(match self {
            Value::Null => return None,
            Value::Bool(_) => FieldType::Bool,
            Value::Int(_) => FieldType::Int,
            Value::Float(_) => FieldType::Float,
            Value::String(_) => FieldType::String,
            Value::Bytes(_) => FieldType::Bytes,
            Value::List(_) => FieldType::List,
            Value::Map(_) => FieldType::Map,
            Value::Date(_) => FieldType::Date,
            Value::DateTime(_) => FieldType::DateTime,
        })
    }

    /// Name used in type errors; matches the `FieldType` display names.
    pub fn type_name(&self) -> String {
        self.field_type().map_or_else(|| "null".to_string(), |ty| ty.to_string())
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    fn mismatch(&self, expected: FieldType) -> Error {
        Error::TypeError { expected: expected.to_string(), got: self.type_name() }
    }
}

// ============================================================================
// Conversions
// ============================================================================

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v.into())
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_owned())
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(v: Vec<T>) -> Self {
        Value::List(v.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

/// `From<T> for Value` and the strict `TryFrom<Value> for T` host field
/// writers use. No numeric widening: a `Float` field only takes floats.
macro_rules! field_conversions {
    ($($rust:ty => $variant:ident),* $(,)?) => {$(
        impl From<$rust> for Value {
            fn from(v: $rust) -> Self {
                Value::$variant(v)
            }
        }

        impl TryFrom<Value> for $rust {
            type Error = Error;

            fn try_from(v: Value) -> Result<Self, Error> {
                match v {
                    Value::$variant(inner) => Ok(inner),
                    other => Err(other.mismatch(FieldType::$variant)),
                }
            }
        }
    )*};
}

field_conversions! {
    bool => Bool,
    i64 => Int,
    f64 => Float,
    String => String,
    NaiveDate => Date,
    DateTime<Utc> => DateTime,
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::String(s) => write!(f, "{s:?}"),
            Value::Bytes(b) => write!(f, "bytes({})", b.len()),
            Value::List(items) => {
                let items: Vec<String> = items.iter().map(ToString::to_string).collect();
                write!(f, "[{}]", items.join(", "))
            }
            Value::Map(m) => {
                let mut keys: Vec<&String> = m.keys().collect();
                keys.sort();
                let mut map = f.debug_map();
                for k in keys {
                    map.entry(k, &format_args!("{}", m[k]));
                }
                map.finish()
            }
            Value::Date(d) => write!(f, "{d}"),
            Value::DateTime(dt) => write!(f, "{}", dt.to_rfc3339()),
        }
    }
}
