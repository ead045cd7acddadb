//! Host instances: the objects views are attached to.
//!
//! A host wraps an arbitrary Rust value behind a lock. Composable hosts
//! additionally carry a [`TraitCore`]: their own soft-field map and the
//! table of views currently attached to them.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};

use crate::hierarchy::BitCode;
use crate::model::PropertyMap;
use crate::storage::TripleStore;
use crate::view::ViewHandle;

/// Type-erased host value.
pub type HostObject = Box<dyn Any + Send + Sync>;

/// Shared handle to a host instance.
pub type HostRef = Arc<HostInstance>;

static NEXT_INSTANCE_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique instance identity; keys rows in the triple store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct InstanceId(pub u64);

impl InstanceId {
    pub fn next() -> Self {
        InstanceId(NEXT_INSTANCE_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

// ============================================================================
// TraitCore
// ============================================================================

/// The soft-storage slot of a composable host.
#[derive(Default)]
pub struct TraitCore {
    dynamic: Arc<RwLock<PropertyMap>>,
    views: RwLock<HashMap<String, ViewHandle>>,
    /// Shared EAV stores holding rows of this instance; purged on drop.
    stores: Mutex<Vec<Weak<TripleStore>>>,
}

// ============================================================================
// HostInstance
// ============================================================================

pub struct HostInstance {
    id: InstanceId,
    type_name: String,
    object: RwLock<HostObject>,
    core: Option<TraitCore>,
}

impl HostInstance {
    /// A plain, non-composable host.
    pub fn new<T: Any + Send + Sync>(type_name: impl Into<String>, object: T) -> HostRef {
        Self::from_boxed(type_name, Box::new(object), false)
    }

    /// A host with its own soft storage and view table.
    pub fn composable<T: Any + Send + Sync>(type_name: impl Into<String>, object: T) -> HostRef {
        Self::from_boxed(type_name, Box::new(object), true)
    }

    pub fn from_boxed(type_name: impl Into<String>, object: HostObject, composable: bool) -> HostRef {
        Arc::new(Self {
            id: InstanceId::next(),
            type_name: type_name.into(),
            object: RwLock::new(object),
            core: composable.then(TraitCore::default),
        })
    }

    pub fn id(&self) -> InstanceId {
        self.id
    }

    /// Runtime type name; the host half of every construction cache key.
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn is_composable(&self) -> bool {
        self.core.is_some()
    }

    /// Borrow the wrapped value as `T`. `None` if it is not a `T`.
    pub fn read<T: Any, R>(&self, f: impl FnOnce(&T) -> R) -> Option<R> {
        let guard = self.object.read();
        guard.downcast_ref::<T>().map(f)
    }

    /// Mutably borrow the wrapped value as `T`. `None` if it is not a `T`.
    pub fn write<T: Any, R>(&self, f: impl FnOnce(&mut T) -> R) -> Option<R> {
        let mut guard = self.object.write();
        guard.downcast_mut::<T>().map(f)
    }

    pub(crate) fn object(&self) -> &RwLock<HostObject> {
        &self.object
    }

    /// Swap the wrapped value, returning the previous one.
    pub(crate) fn replace_object(&self, object: HostObject) -> HostObject {
        std::mem::replace(&mut *self.object.write(), object)
    }

    // ========================================================================
    // Soft storage and attached views
    // ========================================================================

    /// The per-instance soft-field map (composable hosts only).
    pub fn dynamic_properties(&self) -> Option<Arc<RwLock<PropertyMap>>> {
        self.core.as_ref().map(|c| c.dynamic.clone())
    }

    pub fn has_view(&self, view_type: &str) -> bool {
        self.core
            .as_ref()
            .is_some_and(|c| c.views.read().contains_key(view_type))
    }

    pub fn view(&self, view_type: &str) -> Option<ViewHandle> {
        self.core.as_ref()?.views.read().get(view_type).cloned()
    }

    pub fn views(&self) -> Vec<ViewHandle> {
        self.core
            .as_ref()
            .map(|c| c.views.read().values().cloned().collect())
            .unwrap_or_default()
    }

    /// Union of the codes of every attached view; empty when none.
    pub fn type_code(&self) -> BitCode {
        let mut code = BitCode::new();
        for view in self.views() {
            code.union_with(view.type_code());
        }
        code
    }

    /// Register `view` unless one of the same type got there first; returns
    /// whichever handle is now attached.
    pub(crate) fn register_view(&self, view_type: &str, view: ViewHandle) -> Option<ViewHandle> {
        let core = self.core.as_ref()?;
        let mut views = core.views.write();
        Some(views.entry(view_type.to_string()).or_insert(view).clone())
    }

    pub(crate) fn remove_view(&self, view_type: &str) -> Option<ViewHandle> {
        self.core.as_ref()?.views.write().remove(view_type)
    }

    /// Remember that `store` holds rows of this instance.
    pub(crate) fn track_store(&self, store: &Arc<TripleStore>) {
        let Some(core) = self.core.as_ref() else { return };
        let mut stores = core.stores.lock();
        if !stores.iter().any(|s| std::ptr::eq(s.as_ptr(), Arc::as_ptr(store))) {
            stores.push(Arc::downgrade(store));
        }
    }
}

impl Drop for HostInstance {
    fn drop(&mut self) {
        let Some(core) = self.core.as_ref() else { return };
        for store in core.stores.lock().drain(..) {
            if let Some(store) = store.upgrade() {
                let purged = store.purge(self.id);
                tracing::trace!(host = %self.id, purged, "soft rows of dropped host purged");
            }
        }
    }
}

impl fmt::Debug for HostInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostInstance")
            .field("id", &self.id)
            .field("type_name", &self.type_name)
            .field("composable", &self.is_composable())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::VirtualPropertyStore;

    struct Counter { hits: u32 }

    #[test]
    fn test_typed_access() {
        let host = HostInstance::new("Counter", Counter { hits: 1 });
        host.write(|c: &mut Counter| c.hits += 1).unwrap();
        assert_eq!(host.read(|c: &Counter| c.hits), Some(2));
        assert_eq!(host.read(|s: &String| s.len()), None);
        assert!(!host.is_composable());
        assert!(host.dynamic_properties().is_none());
    }

    #[test]
    fn test_drop_purges_tracked_stores() {
        let store = Arc::new(TripleStore::new());
        let host = HostInstance::composable("Counter", Counter { hits: 0 });
        let other = HostInstance::composable("Counter", Counter { hits: 0 });
        host.track_store(&store);
        host.track_store(&store);
        store.set(host.id(), "label", crate::model::Value::from("a"));
        store.set(other.id(), "label", crate::model::Value::from("b"));

        drop(host);
        assert_eq!(store.len(), 1);
        assert_eq!(store.instance_count(), 1);
    }

    #[test]
    fn test_ids_are_unique() {
        let a = HostInstance::composable("Counter", Counter { hits: 0 });
        let b = HostInstance::composable("Counter", Counter { hits: 0 });
        assert_ne!(a.id(), b.id());
        assert!(a.type_code().is_empty());
    }
}
