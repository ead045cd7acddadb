//! # Host Wrapper Synthesizer
//!
//! Retrofits composability onto host types that were not declared
//! composable. For a core type `Person` it synthesizes `PersonWrapper`:
//!
//! - a host definition with every inspected `Person` field, marked
//!   composable, keeping `Person`'s logical flag, whose accessor references
//!   point at `Person`'s own accessors;
//! - a loaded wrapper type whose slots are bound to those accessors.
//!
//! Wrappers are built once per core type. Each instantiation yields a fresh
//! composable host holding a freshly constructed core value.

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::cache::BuildContext;
use crate::codegen::{ExecutableTypeSpec, FieldAccessorProvider, LoadedType, SlotSpec, TypeLoader};
use crate::host::{HostObject, HostRef};
use crate::model::{HostField, Value};
use crate::registry::HostTypeDefinition;
use crate::{BindingFailure, Error, Result};

/// A built wrapper type for one core type.
#[derive(Debug)]
pub struct WrapperRecipe {
    core_type: String,
    class: LoadedType,
    definition: Arc<HostTypeDefinition>,
}

impl WrapperRecipe {
    pub fn core_type(&self) -> &str {
        &self.core_type
    }

    pub fn wrapper_type(&self) -> &str {
        &self.definition.name
    }

    pub fn definition(&self) -> &Arc<HostTypeDefinition> {
        &self.definition
    }

    pub fn loaded_type(&self) -> &LoadedType {
        &self.class
    }

    pub fn instantiate(
        self: &Arc<Self>,
        loader: &dyn TypeLoader,
        accessors: &dyn FieldAccessorProvider,
    ) -> Result<CoreWrapper> {
        let core = accessors
            .construct(&self.core_type)
            .ok_or_else(|| Error::Loader(format!("no constructor for {}", self.core_type)))?;
        let host = loader.instantiate_wrapper(&self.class, core)?;
        Ok(CoreWrapper { host, recipe: self.clone() })
    }
}

// ============================================================================
// WrapperSynthesizer
// ============================================================================

#[derive(Default)]
pub struct WrapperSynthesizer {
    /// core type → wrapper
    cache: Mutex<HashMap<String, Arc<WrapperRecipe>>>,
    restored: Mutex<HashMap<String, ExecutableTypeSpec>>,
}

impl WrapperSynthesizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn wrapper_for(&self, core_type: &str, ctx: &BuildContext<'_>) -> Result<Arc<WrapperRecipe>> {
        let mut cache = self.cache.lock();
        if let Some(recipe) = cache.get(core_type) {
            tracing::debug!(core = core_type, "wrapper cache hit");
            return Ok(recipe.clone());
        }

        let core_def = core_definition(core_type, ctx)?;

        let restored = self.restored.lock().remove(core_type);
        let spec = match restored {
            Some(spec) => spec,
            None => ctx.generator.synthesize_wrapper(&core_def)?,
        };
        let class = ctx.loader.load(spec)?;

        let wrapper_def = wrapper_definition(class.name(), &core_def);
        let definition = match ctx.registry.declare_host(wrapper_def) {
            Ok(def) => def,
            Err(Error::DuplicateDeclaration(name)) => ctx.registry.host(&name)?,
            Err(e) => return Err(e),
        };

        for failure in bind_core_accessors(&class, &core_def, ctx.accessors) {
            tracing::warn!(core = core_type, %failure, "wrapper field left unbound");
            class.record_failure(failure);
        }

        let recipe = Arc::new(WrapperRecipe {
            core_type: core_type.to_string(),
            class,
            definition,
        });
        cache.insert(core_type.to_string(), recipe.clone());
        tracing::debug!(core = core_type, wrapper = recipe.wrapper_type(), "wrapper type built");
        Ok(recipe)
    }

    pub fn len(&self) -> usize {
        self.cache.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.lock().is_empty()
    }

    pub fn specs(&self) -> Vec<(String, ExecutableTypeSpec)> {
        let mut specs: Vec<_> = self
            .cache
            .lock()
            .iter()
            .map(|(core, r)| (core.clone(), r.class.spec().clone()))
            .collect();
        specs.sort_by(|a, b| a.0.cmp(&b.0));
        specs
    }

    pub fn restore_specs(&self, specs: impl IntoIterator<Item = (String, ExecutableTypeSpec)>) {
        self.restored.lock().extend(specs);
    }
}

/// The core type as inspected, falling back to its declaration.
fn core_definition(core_type: &str, ctx: &BuildContext<'_>) -> Result<HostTypeDefinition> {
    let declared = ctx.registry.host(core_type).ok();
    match ctx.accessors.inspect(core_type) {
        Some(shape) => {
            let mut def = HostTypeDefinition::new(core_type);
            def.logical = shape.logical || declared.as_ref().is_some_and(|d| d.logical);
            for (name, ty) in shape.fields {
                def = def.with_field(name, ty);
            }
            Ok(def)
        }
        None => declared
            .map(|d| d.as_ref().clone())
            .ok_or_else(|| Error::UnknownHostType(core_type.to_string())),
    }
}

fn wrapper_definition(wrapper_type: &str, core: &HostTypeDefinition) -> HostTypeDefinition {
    let mut def = HostTypeDefinition::new(wrapper_type).composable();
    def.logical = core.logical;
    def.wrapper_of = Some(core.name.clone());
    for field in &core.fields {
        let mut inherited = HostField::new(core.name.clone(), field.name.clone(), field.ty.clone());
        inherited.alias = field.alias.clone();
        inherited.accessor = field.accessor.clone();
        def = def.with_host_field(inherited);
    }
    def
}

/// Bind every wrapper slot to the core type's accessors.
fn bind_core_accessors(
    class: &LoadedType,
    core: &HostTypeDefinition,
    accessors: &dyn FieldAccessorProvider,
) -> Vec<BindingFailure> {
    let mut failures = Vec::new();
    for field in &core.fields {
        match accessors.accessor(&field.accessor.owner, &field.accessor.field) {
            Some(accessor) => {
                if let Err(e) = class.bind(&field.name, accessor) {
                    failures.push(e);
                }
            }
            None => failures.push(BindingFailure {
                owner: class.name().to_string(),
                field: field.name.clone(),
                reason: format!("no accessor for {}", field.accessor),
            }),
        }
    }
    failures
}

// ============================================================================
// CoreWrapper
// ============================================================================

/// A composable stand-in host holding a core value.
#[derive(Debug, Clone)]
pub struct CoreWrapper {
    host: HostRef,
    recipe: Arc<WrapperRecipe>,
}

impl CoreWrapper {
    /// The composable host; attach views to this.
    pub fn host(&self) -> &HostRef {
        &self.host
    }

    pub fn core_type(&self) -> &str {
        &self.recipe.core_type
    }

    pub fn wrapper_type(&self) -> &str {
        self.recipe.wrapper_type()
    }

    /// Read a core field through the wrapper's bound slot.
    pub fn get(&self, field: &str) -> Result<Value> {
        let (i, _) = self.slot(field)?;
        let Some(accessor) = self.recipe.class.accessor(i) else {
            return Ok(Value::Null);
        };
        let object = self.host.object().read();
        Ok(accessor.read(&**object).unwrap_or(Value::Null))
    }

    pub fn set(&self, field: &str, value: Value) -> Result<()> {
        let (i, slot) = self.slot(field)?;
        if !slot.ty.accepts(&value) {
            return Err(Error::TypeError {
                expected: slot.ty.to_string(),
                got: value.type_name(),
            });
        }
        let Some(accessor) = self.recipe.class.accessor(i) else {
            return Ok(());
        };
        let mut object = self.host.object().write();
        accessor.write(&mut **object, value)
    }

    /// Borrow the core value as `T`.
    pub fn read_core<T: Any, R>(&self, f: impl FnOnce(&T) -> R) -> Option<R> {
        self.host.read(f)
    }

    /// Wrap an existing core value instead of the constructed one. The value
    /// must be of the same concrete type.
    pub fn init<T: Any + Send + Sync>(&self, core: T) -> Result<()> {
        let matches = self.host.object().read().is::<T>();
        if !matches {
            return Err(Error::TypeError {
                expected: self.recipe.core_type.clone(),
                got: std::any::type_name::<T>().to_string(),
            });
        }
        let _previous: HostObject = self.host.replace_object(Box::new(core));
        Ok(())
    }

    fn slot(&self, field: &str) -> Result<(usize, &SlotSpec)> {
        self.recipe.class.slot(field).ok_or_else(|| Error::UnknownField {
            owner: self.recipe.wrapper_type().to_string(),
            field: field.to_string(),
        })
    }
}
