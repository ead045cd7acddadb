//! Field declarations shared by view and host type definitions.

use std::fmt;

use serde::{Deserialize, Serialize};
use super::Value;

/// Declared type of a view or host field.
///
/// `Bool`, `Int` and `Float` are *primitive*: they never hold `Null` and are
/// only assignable from exactly themselves. `Object` names a domain type;
/// `Any` is the universal non-primitive slot.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FieldType {
    Bool,
    Int,
    Float,
    String,
    Bytes,
    List,
    Map,
    Date,
    DateTime,
    Object(String),
    Any,
}

impl FieldType {
    pub fn is_primitive(&self) -> bool {
        matches!(self, FieldType::Bool | FieldType::Int | FieldType::Float)
    }

    /// Whether a slot of type `self` can hold a value declared as `other`.
    pub fn is_assignable_from(&self, other: &FieldType) -> bool {
        if self == other {
            return true;
        }
        match self {
            FieldType::Any => !other.is_primitive(),
            _ => false,
        }
    }

    /// Whether a concrete value may be stored in a slot of this type.
    pub fn accepts(&self, value: &Value) -> bool {
        match (self, value) {
            (FieldType::Any, _) => true,
            (ty, Value::Null) => !ty.is_primitive(),
            (FieldType::Object(_), _) => true,
            (ty, v) => v.field_type().as_ref() == Some(ty),
        }
    }

    /// Value a freshly initialised soft field of this type starts with.
    pub fn default_value(&self) -> Value {
        match self {
            FieldType::Bool => Value::Bool(false),
            FieldType::Int => Value::Int(0),
            FieldType::Float => Value::Float(0.0),
            _ => Value::Null,
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldType::Bool => write!(f, "bool"),
            FieldType::Int => write!(f, "int"),
            FieldType::Float => write!(f, "float"),
            FieldType::String => write!(f, "string"),
            FieldType::Bytes => write!(f, "bytes"),
            FieldType::List => write!(f, "list"),
            FieldType::Map => write!(f, "map"),
            FieldType::Date => write!(f, "date"),
            FieldType::DateTime => write!(f, "datetime"),
            FieldType::Object(name) => write!(f, "{name}"),
            FieldType::Any => write!(f, "any"),
        }
    }
}

// ============================================================================
// View fields
// ============================================================================

/// A field declared on a view type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ViewField {
    pub name: String,
    pub ty: FieldType,
    /// Host field name this field binds to, when it differs from `name`.
    pub alias: Option<String>,
}

impl ViewField {
    pub fn new(name: impl Into<String>, ty: FieldType) -> Self {
        Self { name: name.into(), ty, alias: None }
    }

    pub fn aliased(name: impl Into<String>, ty: FieldType, alias: impl Into<String>) -> Self {
        Self { name: name.into(), ty, alias: Some(alias.into()) }
    }

    /// The name used to look up a matching host field.
    pub fn resolve_alias(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.name)
    }
}

// ============================================================================
// Host fields
// ============================================================================

/// Where the read/write accessors of a host field come from: the concrete
/// type that owns the field and the field's name on it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AccessorRef {
    pub owner: String,
    pub field: String,
}

impl fmt::Display for AccessorRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.owner, self.field)
    }
}

/// A field declared on a host type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HostField {
    pub name: String,
    pub ty: FieldType,
    pub alias: Option<String>,
    pub accessor: AccessorRef,
}

impl HostField {
    pub fn new(owner: impl Into<String>, name: impl Into<String>, ty: FieldType) -> Self {
        let name = name.into();
        Self {
            accessor: AccessorRef { owner: owner.into(), field: name.clone() },
            name,
            ty,
            alias: None,
        }
    }

    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    pub fn resolve_alias(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.name)
    }
}
