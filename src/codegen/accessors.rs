//! Closure-backed `FieldAccessorProvider`.
//!
//! Rust has no runtime reflection, so host types describe themselves once:
//!
//! ```rust
//! use trait_weave::{AccessorTable, FieldType, Value};
//!
//! #[derive(Default)]
//! struct Person { name: String }
//!
//! let table = AccessorTable::new();
//! table
//!     .describe::<Person>("Person")
//!     .field("name", FieldType::String, |p| Value::from(p.name.as_str()), |p, v| {
//!         p.name = v.try_into()?;
//!         Ok(())
//!     })
//!     .default_constructible()
//!     .finish();
//! ```

use std::any::Any;
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::host::HostObject;
use crate::model::{FieldType, Value};
use crate::registry::HostTypeDefinition;
use crate::Result;
use super::{FieldAccessor, FieldAccessorProvider, TypeShape};

type Constructor = Arc<dyn Fn() -> HostObject + Send + Sync>;

/// Registry of per-type accessors, shapes and constructors.
#[derive(Default)]
pub struct AccessorTable {
    /// (owner, field) → accessor
    accessors: RwLock<HashMap<(String, String), FieldAccessor>>,
    shapes: RwLock<HashMap<String, TypeShape>>,
    constructors: RwLock<HashMap<String, Constructor>>,
}

impl AccessorTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start describing the concrete type `T` under `name`.
    pub fn describe<T: Any + Send + Sync>(&self, name: impl Into<String>) -> TypeDescriber<'_, T> {
        TypeDescriber {
            table: self,
            shape: TypeShape { name: name.into(), fields: Vec::new(), logical: false },
            _marker: PhantomData,
        }
    }

    pub fn register_accessor(&self, owner: &str, field: &str, accessor: FieldAccessor) {
        self.accessors
            .write()
            .insert((owner.to_string(), field.to_string()), accessor);
    }

    /// A host definition mirroring a described type. Not composable until
    /// the caller says so.
    pub fn host_definition(&self, name: &str) -> Option<HostTypeDefinition> {
        let shape = self.shapes.read().get(name)?.clone();
        let mut def = HostTypeDefinition::new(name);
        def.logical = shape.logical;
        for (field, ty) in shape.fields {
            def = def.with_field(field, ty);
        }
        Some(def)
    }
}

impl FieldAccessorProvider for AccessorTable {
    fn accessor(&self, owner: &str, field: &str) -> Option<FieldAccessor> {
        self.accessors
            .read()
            .get(&(owner.to_string(), field.to_string()))
            .cloned()
    }

    fn inspect(&self, type_name: &str) -> Option<TypeShape> {
        self.shapes.read().get(type_name).cloned()
    }

    fn construct(&self, type_name: &str) -> Option<HostObject> {
        let ctor = self.constructors.read().get(type_name).cloned()?;
        Some(ctor())
    }
}

// ============================================================================
// TypeDescriber
// ============================================================================

/// Builder returned by [`AccessorTable::describe`].
pub struct TypeDescriber<'a, T> {
    table: &'a AccessorTable,
    shape: TypeShape,
    _marker: PhantomData<fn() -> T>,
}

impl<'a, T: Any + Send + Sync> TypeDescriber<'a, T> {
    pub fn field(
        mut self,
        name: impl Into<String>,
        ty: FieldType,
        read: impl Fn(&T) -> Value + Send + Sync + 'static,
        write: impl Fn(&mut T, Value) -> Result<()> + Send + Sync + 'static,
    ) -> Self {
        let name = name.into();
        self.table
            .register_accessor(&self.shape.name, &name, FieldAccessor::typed(read, write));
        self.shape.fields.push((name, ty));
        self
    }

    /// Mark the type as logically traitable.
    pub fn logical(mut self) -> Self {
        self.shape.logical = true;
        self
    }

    pub fn constructor(self, ctor: impl Fn() -> T + Send + Sync + 'static) -> Self {
        let ctor: Constructor = Arc::new(move || Box::new(ctor()) as HostObject);
        self.table
            .constructors
            .write()
            .insert(self.shape.name.clone(), ctor);
        self
    }

    pub fn finish(self) -> TypeShape {
        self.table
            .shapes
            .write()
            .insert(self.shape.name.clone(), self.shape.clone());
        self.shape
    }
}

impl<'a, T: Any + Send + Sync + Default> TypeDescriber<'a, T> {
    pub fn default_constructible(self) -> Self {
        self.constructor(T::default)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Person { age: i64 }

    fn table() -> AccessorTable {
        let table = AccessorTable::new();
        table
            .describe::<Person>("Person")
            .field("age", FieldType::Int, |p| Value::from(p.age), |p, v| {
                p.age = v.try_into()?;
                Ok(())
            })
            .default_constructible()
            .finish();
        table
    }

    #[test]
    fn test_accessor_roundtrip() {
        let table = table();
        let accessor = table.accessor("Person", "age").unwrap();
        let mut person = Person { age: 3 };

        assert_eq!(accessor.read(&person), Some(Value::Int(3)));
        accessor.write(&mut person, Value::Int(4)).unwrap();
        assert_eq!(person.age, 4);
        assert!(accessor.write(&mut person, Value::from("four")).is_err());

        // wrong concrete type
        assert_eq!(accessor.read(&"not a person"), None);
    }

    #[test]
    fn test_inspect_and_construct() {
        let table = table();
        let shape = table.inspect("Person").unwrap();
        assert_eq!(shape.fields, vec![("age".to_string(), FieldType::Int)]);
        assert!(!shape.logical);

        let object = table.construct("Person").unwrap();
        assert!(object.downcast_ref::<Person>().is_some());
        assert!(table.construct("Ghost").is_none());

        let def = table.host_definition("Person").unwrap();
        assert_eq!(def.fields[0].accessor.owner, "Person");
        assert!(!def.composable);
    }
}
