//! # Collaborators: Code Generator, Type Loader, Field Accessor Provider
//!
//! These are the contracts between the composition engine and whatever
//! manufactures view types. The engine never generates code or inspects
//! host values itself; it hands declarations to a `CodeGenerator`, loads
//! the result through a `TypeLoader`, and wires field slots with accessors
//! from a `FieldAccessorProvider`.
//!
//! ## Implementations
//!
//! | Collaborator | Type | Description |
//! |--------------|------|-------------|
//! | `CodeGenerator` | `SlotTableGenerator` | Emits slot tables (one slot per view field) |
//! | `TypeLoader` | `InProcessLoader` | Loads slot tables into `LoadedClass`es |
//! | `FieldAccessorProvider` | `AccessorTable` | Closure-based accessors registered per type |
//!
//! A generated type is an [`ExecutableTypeSpec`]: a named list of slots, each
//! either *hard* (bound later to a host accessor) or *soft* (served by the
//! virtual property store). Loading yields a [`LoadedClass`] whose hard
//! slots start unbound; binding fills them in.

pub mod slots;
pub mod accessors;

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};

use crate::host::{HostInstance, HostObject, HostRef};
use crate::model::{FieldType, Value};
use crate::registry::{FieldMask, HostTypeDefinition, ViewTypeDefinition};
use crate::storage::StorageMode;
use crate::view::{View, ViewArgs, ViewHandle};
use crate::{BindingFailure, Result};

pub use slots::{SlotTableGenerator, InProcessLoader, proxy_name, wrapper_name, soft_field_key};
pub use accessors::{AccessorTable, TypeDescriber};

// ============================================================================
// Field accessors
// ============================================================================

pub type ReadFn = Arc<dyn Fn(&dyn Any) -> Option<Value> + Send + Sync>;
pub type WriteFn = Arc<dyn Fn(&mut dyn Any, Value) -> Result<()> + Send + Sync>;

/// Read/write handles for one field of one concrete host type.
///
/// `read` returns `None` when handed a value of the wrong type.
#[derive(Clone)]
pub struct FieldAccessor {
    read: ReadFn,
    write: WriteFn,
}

impl FieldAccessor {
    pub fn new(read: ReadFn, write: WriteFn) -> Self {
        Self { read, write }
    }

    /// Accessor over a concrete `T`, downcasting the erased host value.
    pub fn typed<T: Any>(
        read: impl Fn(&T) -> Value + Send + Sync + 'static,
        write: impl Fn(&mut T, Value) -> Result<()> + Send + Sync + 'static,
    ) -> Self {
        let read: ReadFn = Arc::new(move |obj: &dyn Any| obj.downcast_ref::<T>().map(&read));
        let write: WriteFn = Arc::new(move |obj: &mut dyn Any, value: Value| {
            match obj.downcast_mut::<T>() {
                Some(target) => write(target, value),
                None => Err(crate::Error::TypeError {
                    expected: std::any::type_name::<T>().to_string(),
                    got: "foreign host value".into(),
                }),
            }
        });
        Self { read, write }
    }

    pub fn read(&self, obj: &dyn Any) -> Option<Value> {
        (self.read)(obj)
    }

    pub fn write(&self, obj: &mut dyn Any, value: Value) -> Result<()> {
        (self.write)(obj, value)
    }
}

impl fmt::Debug for FieldAccessor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("FieldAccessor")
    }
}

/// Inspected shape of a concrete host type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeShape {
    pub name: String,
    pub fields: Vec<(String, FieldType)>,
    /// Equivalent of a "logical traitable" marker on the type.
    pub logical: bool,
}

/// Field-level access to host types.
pub trait FieldAccessorProvider: Send + Sync {
    /// Accessor for `owner.field`, if the type has such a field.
    fn accessor(&self, owner: &str, field: &str) -> Option<FieldAccessor>;

    /// Field names and types of `type_name`.
    fn inspect(&self, type_name: &str) -> Option<TypeShape>;

    /// A fresh value of `type_name`.
    fn construct(&self, type_name: &str) -> Option<HostObject>;
}

// ============================================================================
// Executable type specs
// ============================================================================

/// What a generated type is for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TypeSpecKind {
    /// A view over a host type, reading soft fields from `mode` storage.
    Proxy { view: String, host: String, mode: StorageMode },
    /// A composable stand-in for a non-composable core type.
    Wrapper { core: String },
}

/// One field slot of a generated type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotSpec {
    pub field: String,
    pub ty: FieldType,
    pub soft: bool,
    /// Host field name for hard slots; storage key for soft slots.
    pub hook: String,
}

/// Output of a `CodeGenerator`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutableTypeSpec {
    pub name: String,
    pub kind: TypeSpecKind,
    pub slots: Vec<SlotSpec>,
}

/// Manufactures executable types from declarations.
///
/// Must be pure: the same inputs yield the same spec, and the spec name is
/// determined by the (view, host) names alone.
pub trait CodeGenerator: Send + Sync {
    fn synthesize(
        &self,
        view: &ViewTypeDefinition,
        host: &HostTypeDefinition,
        mask: &FieldMask,
    ) -> Result<ExecutableTypeSpec>;

    fn synthesize_wrapper(&self, core: &HostTypeDefinition) -> Result<ExecutableTypeSpec>;
}

// ============================================================================
// Loaded types
// ============================================================================

/// A loaded slot table: the spec plus one rebindable accessor cell per slot.
pub struct LoadedClass {
    spec: ExecutableTypeSpec,
    index: HashMap<String, usize>,
    bindings: Vec<RwLock<Option<FieldAccessor>>>,
    failures: Mutex<Vec<BindingFailure>>,
}

pub type LoadedType = Arc<LoadedClass>;

impl LoadedClass {
    pub fn new(spec: ExecutableTypeSpec) -> Self {
        let index = spec
            .slots
            .iter()
            .enumerate()
            .map(|(i, s)| (s.field.clone(), i))
            .collect();
        let bindings = spec.slots.iter().map(|_| RwLock::new(None)).collect();
        Self { spec, index, bindings, failures: Mutex::new(Vec::new()) }
    }

    pub fn spec(&self) -> &ExecutableTypeSpec {
        &self.spec
    }

    pub fn name(&self) -> &str {
        &self.spec.name
    }

    pub fn slot(&self, field: &str) -> Option<(usize, &SlotSpec)> {
        let i = *self.index.get(field)?;
        Some((i, &self.spec.slots[i]))
    }

    pub fn slots(&self) -> &[SlotSpec] {
        &self.spec.slots
    }

    /// Wire a hard slot to a host accessor.
    pub fn bind(&self, field: &str, accessor: FieldAccessor) -> std::result::Result<(), BindingFailure> {
        let failure = |reason: &str| BindingFailure {
            owner: self.spec.name.clone(),
            field: field.to_string(),
            reason: reason.to_string(),
        };
        let (i, slot) = self.slot(field).ok_or_else(|| failure("no such slot"))?;
        if slot.soft {
            return Err(failure("slot is soft"));
        }
        *self.bindings[i].write() = Some(accessor);
        Ok(())
    }

    pub fn accessor(&self, index: usize) -> Option<FieldAccessor> {
        self.bindings.get(index)?.read().clone()
    }

    pub fn is_bound(&self, field: &str) -> bool {
        self.slot(field)
            .is_some_and(|(i, _)| self.bindings[i].read().is_some())
    }

    pub fn record_failure(&self, failure: BindingFailure) {
        let mut failures = self.failures.lock();
        if !failures.contains(&failure) {
            failures.push(failure);
        }
    }

    /// Diagnostic record of slots that could not be bound.
    pub fn failures(&self) -> Vec<BindingFailure> {
        self.failures.lock().clone()
    }
}

impl fmt::Debug for LoadedClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadedClass")
            .field("name", &self.spec.name)
            .field("slots", &self.spec.slots.len())
            .finish_non_exhaustive()
    }
}

/// Makes generated types available and instantiates them.
pub trait TypeLoader: Send + Sync {
    /// Load a spec. Loading an identical spec under an already-loaded name
    /// returns the loaded type.
    fn load(&self, spec: ExecutableTypeSpec) -> Result<LoadedType>;

    fn instantiate_view(&self, ty: &LoadedType, args: ViewArgs) -> Result<ViewHandle> {
        View::instantiate(ty.clone(), args)
    }

    /// A fresh composable host whose value is `core`.
    fn instantiate_wrapper(&self, ty: &LoadedType, core: HostObject) -> Result<HostRef> {
        Ok(HostInstance::from_boxed(ty.name(), core, true))
    }
}
