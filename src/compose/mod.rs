//! # Composition Facade
//!
//! [`Composer`] ties the registry, the construction cache, the wrapper
//! synthesizer and the soft stores together behind the operations a rule
//! engine calls:
//!
//! ```text
//! attach_view(host, "Student")
//!   ├─ already attached?              ─► existing handle
//!   ├─ registry: view + host declared? ─► UnknownViewType / UnknownHostType
//!   ├─ host composable?               ─► Composition ("wrap it first")
//!   ├─ cache.get((host type, view))   ─► Recipe (built at most once)
//!   ├─ storage handle of current mode
//!   └─ recipe.instantiate ─► host.register_view ─► ViewHandle
//! ```

use std::any::Any;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::cache::{BuildContext, CacheKey, ConstructionCache};
use crate::codegen::{
    CodeGenerator, FieldAccessorProvider, InProcessLoader, SlotTableGenerator, TypeLoader,
};
use crate::hierarchy::HierarchyEncoder;
use crate::host::{HostInstance, HostRef};
use crate::registry::{HostTypeDefinition, TypeRegistry, ViewTypeDefinition};
use crate::snapshot::{RecipeSnapshot, Snapshot, WrapperSnapshot};
use crate::storage::{triple::DEFAULT_SHARDS, MapStore, SoftStorage, StorageMode, TripleStore};
use crate::view::{ViewArgs, ViewHandle};
use crate::wrapper::{CoreWrapper, WrapperSynthesizer};
use crate::{Error, Result};

// ============================================================================
// Configuration
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ComposerConfig {
    pub storage_mode: StorageMode,
    /// Shard count of the shared EAV store.
    pub eav_shards: usize,
}

impl Default for ComposerConfig {
    fn default() -> Self {
        Self {
            storage_mode: StorageMode::default(),
            eav_shards: DEFAULT_SHARDS,
        }
    }
}

impl ComposerConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn with_storage_mode(mut self, mode: StorageMode) -> Self {
        self.storage_mode = mode;
        self
    }
}

/// The replaceable collaborators a composer builds with.
#[derive(Clone)]
pub struct Collaborators {
    pub map_generator: Arc<dyn CodeGenerator>,
    pub eav_generator: Arc<dyn CodeGenerator>,
    pub loader: Arc<dyn TypeLoader>,
    pub accessors: Arc<dyn FieldAccessorProvider>,
}

impl Collaborators {
    /// Slot-table generators and the in-process loader over `accessors`.
    pub fn in_process(accessors: Arc<dyn FieldAccessorProvider>) -> Self {
        Self {
            map_generator: Arc::new(SlotTableGenerator::new(StorageMode::Map)),
            eav_generator: Arc::new(SlotTableGenerator::new(StorageMode::Eav)),
            loader: Arc::new(InProcessLoader::new()),
            accessors,
        }
    }

    pub fn with_generator(mut self, mode: StorageMode, generator: Arc<dyn CodeGenerator>) -> Self {
        match mode {
            StorageMode::Map => self.map_generator = generator,
            StorageMode::Eav => self.eav_generator = generator,
        }
        self
    }

    pub fn with_loader(mut self, loader: Arc<dyn TypeLoader>) -> Self {
        self.loader = loader;
        self
    }

    pub fn generator(&self, mode: StorageMode) -> &dyn CodeGenerator {
        match mode {
            StorageMode::Map => self.map_generator.as_ref(),
            StorageMode::Eav => self.eav_generator.as_ref(),
        }
    }
}

// ============================================================================
// Composer
// ============================================================================

pub struct Composer {
    registry: TypeRegistry,
    cache: ConstructionCache,
    wrappers: WrapperSynthesizer,
    collab: Collaborators,
    mode: RwLock<StorageMode>,
    triples: Arc<TripleStore>,
}

impl Composer {
    pub fn new(config: ComposerConfig, collab: Collaborators) -> Self {
        Self::with_registry(config, collab, TypeRegistry::new())
    }

    fn with_registry(config: ComposerConfig, collab: Collaborators, registry: TypeRegistry) -> Self {
        Self {
            registry,
            cache: ConstructionCache::new(),
            wrappers: WrapperSynthesizer::new(),
            collab,
            mode: RwLock::new(config.storage_mode),
            triples: Arc::new(TripleStore::with_shards(config.eav_shards)),
        }
    }

    pub fn registry(&self) -> &TypeRegistry {
        &self.registry
    }

    pub fn cache(&self) -> &ConstructionCache {
        &self.cache
    }

    pub fn triple_store(&self) -> &Arc<TripleStore> {
        &self.triples
    }

    pub fn collaborators(&self) -> &Collaborators {
        &self.collab
    }

    // ========================================================================
    // Declarations
    // ========================================================================

    pub fn declare_view(&self, def: ViewTypeDefinition) -> Result<Arc<ViewTypeDefinition>> {
        self.registry.declare_view(def)
    }

    pub fn declare_host(&self, def: HostTypeDefinition) -> Result<Arc<HostTypeDefinition>> {
        self.registry.declare_host(def)
    }

    /// `a` is a (reflexive) ancestor of `b`.
    pub fn is_ancestor(&self, a: &str, b: &str) -> Result<bool> {
        self.registry.hierarchy().is_ancestor(a, b)
    }

    // ========================================================================
    // Storage mode
    // ========================================================================

    pub fn storage_mode(&self) -> StorageMode {
        *self.mode.read()
    }

    /// Switch the mode future builds use. Cached recipes keep the mode they
    /// were built with; call [`ConstructionCache::invalidate_all`] to drop them.
    pub fn set_storage_mode(&self, mode: StorageMode) {
        let previous = std::mem::replace(&mut *self.mode.write(), mode);
        if previous == mode {
            return;
        }
        tracing::debug!(from = %previous, to = %mode, "storage mode switched");
        let stale = self.cache.stale_for(mode);
        if stale > 0 {
            tracing::warn!(stale, %mode, "cached view types were built for the previous storage mode");
        }
    }

    fn build_context(&self, mode: StorageMode) -> BuildContext<'_> {
        BuildContext {
            registry: &self.registry,
            generator: self.collab.generator(mode),
            loader: self.collab.loader.as_ref(),
            accessors: self.collab.accessors.as_ref(),
            mode,
        }
    }

    fn storage_for(&self, host: &HostInstance, view_type: &str, mode: StorageMode) -> Result<SoftStorage> {
        match mode {
            StorageMode::Eav => Ok(SoftStorage::Eav(self.triples.clone())),
            StorageMode::Map => host
                .dynamic_properties()
                .map(|map| SoftStorage::Map(MapStore::new(map)))
                .ok_or_else(|| Error::Composition {
                    view: view_type.to_string(),
                    host: host.type_name().to_string(),
                    reason: "host has no soft storage".into(),
                }),
        }
    }

    // ========================================================================
    // Hosts and views
    // ========================================================================

    /// A host of the declared type `host_type`, composable if the type is.
    pub fn new_host<T: Any + Send + Sync>(&self, host_type: &str, object: T) -> Result<HostRef> {
        let def = self.registry.host(host_type)?;
        Ok(HostInstance::from_boxed(host_type, Box::new(object), def.composable))
    }

    /// Attach `view_type` to `host`, or return the view already attached.
    pub fn attach_view(&self, host: &HostRef, view_type: &str, logical: bool) -> Result<ViewHandle> {
        if let Some(existing) = host.view(view_type) {
            return Ok(existing);
        }

        self.registry.view(view_type)?;
        let host_def = self.registry.host(host.type_name())?;
        if !host.is_composable() {
            return Err(Error::Composition {
                view: view_type.to_string(),
                host: host_def.name.clone(),
                reason: "host is not composable; wrap it first".into(),
            });
        }

        let mode = self.storage_mode();
        let key = CacheKey::new(host.type_name(), view_type);
        let recipe = self.cache.get(&key, &self.build_context(mode))?;

        let args = ViewArgs {
            host: host.clone(),
            storage: self.storage_for(host, view_type, mode)?,
            type_code: recipe.type_code().clone(),
            bottom: self.registry.hierarchy().bottom_code(),
            logical: logical || host_def.logical,
        };
        let view = recipe.instantiate(self.collab.loader.as_ref(), args)?;

        host.register_view(view_type, view).ok_or_else(|| Error::Composition {
            view: view_type.to_string(),
            host: host_def.name.clone(),
            reason: "host has no view table".into(),
        })
    }

    /// Remove `view_type` from `host`. Soft values stay in storage.
    pub fn detach_view(&self, host: &HostRef, view_type: &str) -> Option<ViewHandle> {
        let removed = host.remove_view(view_type);
        if removed.is_some() {
            tracing::debug!(host = %host.id(), view = view_type, "view detached");
        }
        removed
    }

    /// A fresh composable wrapper around a new `host_type` value. `None` if
    /// the type cannot be inspected, synthesized, loaded or constructed.
    pub fn wrap_host(&self, host_type: &str) -> Option<CoreWrapper> {
        let ctx = self.build_context(self.storage_mode());
        let built = self
            .wrappers
            .wrapper_for(host_type, &ctx)
            .and_then(|recipe| recipe.instantiate(ctx.loader, ctx.accessors));
        match built {
            Ok(wrapper) => Some(wrapper),
            Err(e) => {
                tracing::debug!(host_type, error = %e, "host type cannot be wrapped");
                None
            }
        }
    }

    // ========================================================================
    // Checkpointing
    // ========================================================================

    /// Everything needed to rebuild the generated types without calling the
    /// code generator again.
    pub fn checkpoint(&self) -> Snapshot {
        Snapshot {
            storage_mode: self.storage_mode(),
            hierarchy: self.registry.hierarchy().snapshot(),
            recipes: self
                .cache
                .specs()
                .into_iter()
                .map(|(key, spec)| RecipeSnapshot { key, spec })
                .collect(),
            wrappers: self
                .wrappers
                .specs()
                .into_iter()
                .map(|(core_type, spec)| WrapperSnapshot { core_type, spec })
                .collect(),
        }
    }

    /// A composer whose hierarchy codes and generated types come from
    /// `snapshot`. Views and hosts must be declared again; their codes are
    /// the checkpointed ones as long as the parents match.
    pub fn from_snapshot(snapshot: Snapshot, collab: Collaborators) -> Result<Self> {
        Self::from_snapshot_with(snapshot, collab, ComposerConfig::default().eav_shards)
    }

    pub fn from_snapshot_with(snapshot: Snapshot, collab: Collaborators, eav_shards: usize) -> Result<Self> {
        let hierarchy = HierarchyEncoder::new();
        hierarchy.restore(snapshot.hierarchy)?;
        let config = ComposerConfig { storage_mode: snapshot.storage_mode, eav_shards };
        let composer = Self::with_registry(config, collab, TypeRegistry::with_hierarchy(hierarchy));

        composer
            .cache
            .restore_specs(snapshot.recipes.into_iter().map(|r| (r.key, r.spec)));
        composer
            .wrappers
            .restore_specs(snapshot.wrappers.into_iter().map(|w| (w.core_type, w.spec)));
        Ok(composer)
    }
}

impl std::fmt::Debug for Composer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Composer")
            .field("mode", &self.storage_mode())
            .field("recipes", &self.cache.len())
            .field("wrappers", &self.wrappers.len())
            .finish_non_exhaustive()
    }
}
