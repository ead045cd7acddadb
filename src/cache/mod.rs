//! # View Construction Cache
//!
//! Memoizes one [`Recipe`] per (host type, view type):
//!
//! ```text
//! get(key)
//!   ├─ ready map hit ───────────────────────────────► recipe
//!   └─ miss
//!        ├─ both types declared?  no ─► UnknownViewType / UnknownHostType (cache untouched)
//!        ├─ lock per-key build guard
//!        ├─ re-check ready map (another caller may have built it)
//!        ├─ mask ← registry, code ← hierarchy
//!        ├─ spec ← restored spec | CodeGenerator::synthesize
//!        ├─ type ← TypeLoader::load(spec)
//!        ├─ bind hard slots to host accessors
//!        └─ publish to ready map ───────────────────► recipe
//! ```
//!
//! A failed build publishes nothing. Callers already queued on the key's
//! guard then retry one at a time.
//!
//! Lookups only take the ready map's read lock. Builds for different keys
//! hold different guards and run in parallel.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};

use crate::codegen::{
    CodeGenerator, ExecutableTypeSpec, FieldAccessorProvider, LoadedType, TypeLoader, TypeSpecKind,
};
use crate::hierarchy::BitCode;
use crate::registry::{is_hard_compatible, FieldMask, HostTypeDefinition, TypeRegistry, ViewTypeDefinition};
use crate::storage::{StorageMode, VirtualPropertyStore};
use crate::view::{ViewArgs, ViewHandle};
use crate::{BindingFailure, Error, Result};

// ============================================================================
// Key and recipe
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CacheKey {
    pub host: String,
    pub view: String,
}

impl CacheKey {
    pub fn new(host: impl Into<String>, view: impl Into<String>) -> Self {
        Self { host: host.into(), view: view.into() }
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.view, self.host)
    }
}

/// A built, bound view type ready to be instantiated over hosts of one type.
pub struct Recipe {
    key: CacheKey,
    class: LoadedType,
    mask: FieldMask,
    mode: StorageMode,
    type_code: BitCode,
}

impl Recipe {
    pub fn key(&self) -> &CacheKey { &self.key }
    pub fn loaded_type(&self) -> &LoadedType { &self.class }
    pub fn mask(&self) -> &FieldMask { &self.mask }
    pub fn mode(&self) -> StorageMode { self.mode }
    pub fn type_code(&self) -> &BitCode { &self.type_code }

    /// Fields whose accessors could not be bound.
    pub fn unbound(&self) -> Vec<BindingFailure> {
        self.class.failures()
    }

    /// Produce a view over `args.host`. A storage handle of the other mode is
    /// an internal-consistency failure.
    pub fn instantiate(&self, loader: &dyn TypeLoader, args: ViewArgs) -> Result<ViewHandle> {
        let found = args.storage.mode();
        if found != self.mode {
            return Err(Error::StorageModeMismatch {
                key: self.key.to_string(),
                expected: self.mode,
                found,
            });
        }
        loader.instantiate_view(&self.class, args)
    }
}

impl fmt::Debug for Recipe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Recipe")
            .field("key", &self.key)
            .field("type", &self.class.name())
            .field("mask", &self.mask.to_string())
            .field("mode", &self.mode)
            .finish()
    }
}

/// Collaborators and settings a build runs with.
pub struct BuildContext<'a> {
    pub registry: &'a TypeRegistry,
    pub generator: &'a dyn CodeGenerator,
    pub loader: &'a dyn TypeLoader,
    pub accessors: &'a dyn FieldAccessorProvider,
    pub mode: StorageMode,
}

// ============================================================================
// ConstructionCache
// ============================================================================

#[derive(Default)]
pub struct ConstructionCache {
    ready: RwLock<HashMap<CacheKey, Arc<Recipe>>>,
    /// Per-key build guards; present only while a build is in flight.
    building: Mutex<HashMap<CacheKey, Arc<Mutex<()>>>>,
    /// Specs restored from a checkpoint, loaded instead of re-synthesized.
    restored: Mutex<HashMap<CacheKey, ExecutableTypeSpec>>,
}

impl ConstructionCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached recipe for `key`, building it on first request.
    pub fn get(&self, key: &CacheKey, ctx: &BuildContext<'_>) -> Result<Arc<Recipe>> {
        if let Some(recipe) = self.peek(key) {
            return Ok(recipe);
        }

        // Declaration errors leave the cache untouched.
        let view = ctx.registry.view(&key.view)?;
        let host = ctx.registry.host(&key.host)?;

        let guard = self.building.lock().entry(key.clone()).or_default().clone();
        let _build = guard.lock();

        if let Some(recipe) = self.peek(key) {
            return Ok(recipe);
        }

        let built = self.build(key, &view, &host, ctx);
        let mut building = self.building.lock();
        if let Ok(recipe) = &built {
            self.ready.write().insert(key.clone(), recipe.clone());
        }
        // After a failed build, waiters still queued on this guard retry one
        // at a time; the entry goes once nobody but the map holds it.
        if built.is_ok() || Arc::strong_count(&guard) <= 2 {
            building.remove(key);
        }
        built
    }

    /// Lookup without building.
    pub fn peek(&self, key: &CacheKey) -> Option<Arc<Recipe>> {
        self.ready.read().get(key).cloned()
    }

    fn build(
        &self,
        key: &CacheKey,
        view: &ViewTypeDefinition,
        host: &HostTypeDefinition,
        ctx: &BuildContext<'_>,
    ) -> Result<Arc<Recipe>> {
        let composition = |reason: String| Error::Composition {
            view: key.view.clone(),
            host: key.host.clone(),
            reason,
        };

        let mask = ctx.registry.field_mask(&view.name, &host.name)?;
        let type_code = ctx.registry.code_of(&view.name)?;

        let restored = self.restored.lock().remove(key);
        let spec = match restored {
            Some(spec) => {
                tracing::debug!(%key, "loading checkpointed view type");
                spec
            }
            None => ctx
                .generator
                .synthesize(view, host, &mask)
                .map_err(|e| composition(e.to_string()))?,
        };
        let class = ctx.loader.load(spec).map_err(|e| composition(e.to_string()))?;

        let mode = match &class.spec().kind {
            TypeSpecKind::Proxy { mode, .. } => *mode,
            TypeSpecKind::Wrapper { core } => {
                return Err(composition(format!("loader returned the wrapper of {core}")));
            }
        };
        if mode != ctx.mode {
            tracing::warn!(%key, built = %mode, current = %ctx.mode, "view type built for another storage mode");
        }

        let failures = bind_accessors(&class, view, host, &mask, ctx.accessors);
        for failure in failures {
            tracing::warn!(%key, %failure, "hard field left unbound");
            class.record_failure(failure);
        }

        tracing::debug!(%key, mask = %mask, %mode, "view type built");
        Ok(Arc::new(Recipe { key: key.clone(), class, mask, mode, type_code }))
    }

    // ========================================================================
    // Maintenance
    // ========================================================================

    pub fn contains(&self, key: &CacheKey) -> bool {
        self.ready.read().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.ready.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.ready.read().is_empty()
    }

    pub fn keys(&self) -> Vec<CacheKey> {
        let mut keys: Vec<CacheKey> = self.ready.read().keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Recipes built under a mode other than `mode`.
    pub fn stale_for(&self, mode: StorageMode) -> usize {
        self.ready.read().values().filter(|r| r.mode != mode).count()
    }

    pub fn invalidate(&self, key: &CacheKey) -> Option<Arc<Recipe>> {
        self.ready.write().remove(key)
    }

    pub fn invalidate_all(&self) -> usize {
        let mut ready = self.ready.write();
        let n = ready.len();
        ready.clear();
        n
    }

    /// Specs of every cached recipe, for checkpointing.
    pub fn specs(&self) -> Vec<(CacheKey, ExecutableTypeSpec)> {
        let ready = self.ready.read();
        let mut specs: Vec<_> = ready
            .iter()
            .map(|(k, r)| (k.clone(), r.class.spec().clone()))
            .collect();
        specs.sort_by(|a, b| a.0.cmp(&b.0));
        specs
    }

    pub fn restore_specs(&self, specs: impl IntoIterator<Item = (CacheKey, ExecutableTypeSpec)>) {
        self.restored.lock().extend(specs);
    }

    pub fn pending_restores(&self) -> usize {
        self.restored.lock().len()
    }
}

// ============================================================================
// Accessor binding
// ============================================================================

/// Wire every hard slot of `class` to its host field accessor. Returns the
/// slots that could not be wired; those stay unbound.
pub fn bind_accessors(
    class: &LoadedType,
    view: &ViewTypeDefinition,
    host: &HostTypeDefinition,
    mask: &FieldMask,
    accessors: &dyn FieldAccessorProvider,
) -> Vec<BindingFailure> {
    let mut failures = Vec::new();
    for (i, field) in view.fields.iter().enumerate() {
        if mask.is_soft(i) {
            continue;
        }
        let failure = |reason: String| BindingFailure {
            owner: class.name().to_string(),
            field: field.name.clone(),
            reason,
        };

        let Some(host_field) = host.field_by_alias(field.resolve_alias()) else {
            failures.push(failure(format!("no host field {}", field.resolve_alias())));
            continue;
        };
        if !is_hard_compatible(host, field, host_field) {
            failures.push(failure(format!("{} is not assignable to {}", field.ty, host_field.ty)));
            continue;
        }
        let Some(accessor) = accessors.accessor(&host_field.accessor.owner, &host_field.accessor.field) else {
            failures.push(failure(format!("no accessor for {}", host_field.accessor)));
            continue;
        };
        if let Err(e) = class.bind(&field.name, accessor) {
            failures.push(e);
        }
    }
    failures
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codegen::{AccessorTable, InProcessLoader, SlotTableGenerator};
    use crate::model::{FieldType, Value};
    use crate::registry::ViewTypeDefinition;

    struct Person { age: i64 }

    fn fixture() -> (TypeRegistry, AccessorTable) {
        let registry = TypeRegistry::new();
        registry
            .declare_host(
                HostTypeDefinition::new("Person")
                    .composable()
                    .with_field("age", FieldType::Int)
                    .with_field("name", FieldType::String),
            )
            .unwrap();
        registry
            .declare_view(
                ViewTypeDefinition::new("Nicknamed")
                    .with_field("age", FieldType::Int)
                    .with_field("name", FieldType::String)
                    .with_field("nickname", FieldType::String),
            )
            .unwrap();

        let accessors = AccessorTable::new();
        // `name` is deliberately left without an accessor
        accessors
            .describe::<Person>("Person")
            .field("age", FieldType::Int, |p| Value::from(p.age), |p, v| {
                p.age = v.try_into()?;
                Ok(())
            })
            .finish();
        (registry, accessors)
    }

    #[test]
    fn test_build_once_and_record_failures() {
        let (registry, accessors) = fixture();
        let generator = SlotTableGenerator::new(StorageMode::Map);
        let loader = InProcessLoader::new();
        let ctx = BuildContext {
            registry: &registry,
            generator: &generator,
            loader: &loader,
            accessors: &accessors,
            mode: StorageMode::Map,
        };
        let cache = ConstructionCache::new();
        let key = CacheKey::new("Person", "Nicknamed");

        let first = cache.get(&key, &ctx).unwrap();
        let second = cache.get(&key, &ctx).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(cache.len(), 1);
        assert_eq!(first.mask().to_string(), "001");

        let unbound = first.unbound();
        assert_eq!(unbound.len(), 1);
        assert_eq!(unbound[0].field, "name");
        assert!(first.loaded_type().is_bound("age"));
    }

    #[test]
    fn test_unknown_types_leave_cache_untouched() {
        let (registry, accessors) = fixture();
        let generator = SlotTableGenerator::new(StorageMode::Eav);
        let loader = InProcessLoader::new();
        let ctx = BuildContext {
            registry: &registry,
            generator: &generator,
            loader: &loader,
            accessors: &accessors,
            mode: StorageMode::Eav,
        };
        let cache = ConstructionCache::new();

        let err = cache.get(&CacheKey::new("Person", "Ghost"), &ctx).unwrap_err();
        assert!(matches!(err, Error::UnknownViewType(_)));
        let err = cache.get(&CacheKey::new("Robot", "Nicknamed"), &ctx).unwrap_err();
        assert!(matches!(err, Error::UnknownHostType(_)));
        assert!(cache.is_empty());
        assert!(loader.is_empty());
    }

    #[test]
    fn test_invalidate() {
        let (registry, accessors) = fixture();
        let generator = SlotTableGenerator::new(StorageMode::Eav);
        let loader = InProcessLoader::new();
        let ctx = BuildContext {
            registry: &registry,
            generator: &generator,
            loader: &loader,
            accessors: &accessors,
            mode: StorageMode::Eav,
        };
        let cache = ConstructionCache::new();
        let key = CacheKey::new("Person", "Nicknamed");
        cache.get(&key, &ctx).unwrap();

        assert_eq!(cache.stale_for(StorageMode::Map), 1);
        assert!(cache.invalidate(&key).is_some());
        assert!(!cache.contains(&key));
        cache.get(&key, &ctx).unwrap();
        assert_eq!(cache.invalidate_all(), 1);
    }
}
