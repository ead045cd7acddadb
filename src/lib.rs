//! # trait-weave: Runtime Trait Composition
//!
//! Attach typed *views* (traits) to host objects at runtime without touching
//! the host's declared type. A view exposes some of the host's fields
//! ("hard" fields, read and written straight through to the host) plus
//! fields the host does not have ("soft" fields, kept in a virtual
//! property store).
//!
//! ## Design Principles
//!
//! 1. **Declarations first**: views and hosts are declared in the `TypeRegistry`;
//!    nothing is discovered by reflection inside the engine
//! 2. **Collaborators behind traits**: code generation, type loading and field
//!    access are `CodeGenerator`, `TypeLoader` and `FieldAccessorProvider`
//! 3. **Build once per key**: one recipe per (host type, view type), built under a
//!    per-key guard and shared read-only afterwards
//! 4. **Codes never move**: hierarchy bit codes are append-only
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use trait_weave::{
//!     AccessorTable, Collaborators, Composer, ComposerConfig, FieldType,
//!     ViewTypeDefinition, Value,
//! };
//!
//! #[derive(Default)]
//! struct Person { age: i64 }
//!
//! # fn main() -> trait_weave::Result<()> {
//! let accessors = Arc::new(AccessorTable::new());
//! accessors
//!     .describe::<Person>("Person")
//!     .field("age", FieldType::Int, |p| Value::from(p.age), |p, v| { p.age = v.try_into()?; Ok(()) })
//!     .finish();
//!
//! let composer = Composer::new(ComposerConfig::default(), Collaborators::in_process(accessors.clone()));
//! composer.declare_host(accessors.host_definition("Person").unwrap().composable())?;
//! composer.declare_view(
//!     ViewTypeDefinition::new("Student")
//!         .with_field("age", FieldType::Int)
//!         .with_field("school", FieldType::String),
//! )?;
//!
//! let host = composer.new_host("Person", Person { age: 20 })?;
//! let student = composer.attach_view(&host, "Student", false)?;
//! student.set("school", "Hogwarts".into())?;
//! assert_eq!(student.get("age")?, Value::Int(20));
//! # Ok(())
//! # }
//! ```
//!
//! ## Soft Storage Modes
//!
//! | Mode | Store | Description |
//! |------|-------|-------------|
//! | `Map` | `MapStore` | One property map per host instance |
//! | `Eav` | `TripleStore` | One shared (instance, attribute) → value store |

// ============================================================================
// Modules
// ============================================================================

pub mod model;
pub mod host;
pub mod hierarchy;
pub mod registry;
pub mod storage;
pub mod codegen;
pub mod view;
pub mod cache;
pub mod wrapper;
pub mod compose;
pub mod snapshot;

// ============================================================================
// Re-exports: Model
// ============================================================================

pub use model::{
    Value, PropertyMap, FieldType, ViewField, HostField, AccessorRef,
};

// ============================================================================
// Re-exports: Engine components
// ============================================================================

pub use host::{HostInstance, HostRef, InstanceId};
pub use hierarchy::{BitCode, HierarchyEncoder, HierarchyTable, ROOT_VIEW};
pub use registry::{TypeRegistry, ViewTypeDefinition, HostTypeDefinition, FieldMask};
pub use storage::{StorageMode, VirtualPropertyStore, SoftStorage, MapStore, TripleStore};
pub use codegen::{
    CodeGenerator, TypeLoader, FieldAccessorProvider, FieldAccessor,
    ExecutableTypeSpec, LoadedClass, LoadedType, TypeShape,
    SlotTableGenerator, InProcessLoader, AccessorTable,
};
pub use view::{View, ViewHandle, ViewArgs};
pub use cache::{ConstructionCache, CacheKey, Recipe, BuildContext};
pub use wrapper::{WrapperSynthesizer, WrapperRecipe, CoreWrapper};
pub use compose::{Composer, ComposerConfig, Collaborators};
pub use snapshot::{Snapshot, RecipeSnapshot, WrapperSnapshot};

// ============================================================================
// Error Types
// ============================================================================

/// A single field whose accessor could not be wired into a generated type.
///
/// Recovered locally: the slot stays unbound and the failure is recorded on
/// the loaded type.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Accessor binding failed for {owner}.{field}: {reason}")]
pub struct BindingFailure {
    pub owner: String,
    pub field: String,
    pub reason: String,
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Unknown view type: {0}")]
    UnknownViewType(String),

    #[error("Unknown host type: {0}")]
    UnknownHostType(String),

    #[error("Duplicate declaration: {0}")]
    DuplicateDeclaration(String),

    #[error("Hierarchy conflict for {name}: {message}")]
    HierarchyConflict { name: String, message: String },

    #[error("Cannot compose view {view} over host type {host}: {reason}")]
    Composition { view: String, host: String, reason: String },

    #[error(transparent)]
    AccessorBinding(#[from] BindingFailure),

    #[error("Storage mode mismatch for {key}: built for {expected}, invoked with {found}")]
    StorageModeMismatch { key: String, expected: StorageMode, found: StorageMode },

    #[error("Logical type inconsistency: field {field} of view {view} expects {expected}, found {found}")]
    LogicalTypeInconsistency { view: String, field: String, expected: String, found: String },

    #[error("Type error: expected {expected}, got {got}")]
    TypeError { expected: String, got: String },

    #[error("Unknown field {field} on {owner}")]
    UnknownField { owner: String, field: String },

    #[error("Host instance {0} is no longer alive")]
    Detached(InstanceId),

    #[error("Type loader error: {0}")]
    Loader(String),

    #[error("Code generation error: {0}")]
    CodeGen(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// True for failures caused by missing or conflicting declarations,
    /// i.e. "this trait is not applicable here" rather than an
    /// infrastructure fault.
    pub fn is_declaration_error(&self) -> bool {
        matches!(
            self,
            Error::UnknownViewType(_)
                | Error::UnknownHostType(_)
                | Error::DuplicateDeclaration(_)
                | Error::HierarchyConflict { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
