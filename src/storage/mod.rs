//! # Virtual Property Store
//!
//! Soft fields live outside the host object. Two interchangeable backends:
//!
//! | Store | Mode | Description |
//! |-------|------|-------------|
//! | `MapStore` | `Map` | The host's own map; keyed by attribute name only |
//! | `TripleStore` | `Eav` | One shared store; keyed by (instance, attribute) |
//!
//! The mode is chosen once per composer. Recipes remember the mode they were
//! built for and refuse a handle of the other kind.

pub mod map;
pub mod triple;

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::host::InstanceId;
use crate::model::{PropertyMap, Value};

pub use map::MapStore;
pub use triple::TripleStore;

// ============================================================================
// StorageMode
// ============================================================================

/// Which virtual property backend soft fields use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum StorageMode {
    /// Per-instance map.
    Map,
    /// Shared entity–attribute–value store.
    #[default]
    Eav,
}

impl fmt::Display for StorageMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageMode::Map => write!(f, "MAP"),
            StorageMode::Eav => write!(f, "EAV"),
        }
    }
}

// ============================================================================
// VirtualPropertyStore trait
// ============================================================================

/// Storage contract for soft field values.
///
/// `instance` identifies the host; map-backed stores belong to a single
/// host and ignore it.
pub trait VirtualPropertyStore: Send + Sync {
    fn mode(&self) -> StorageMode;

    fn get(&self, instance: InstanceId, key: &str) -> Option<Value>;

    /// Upsert; returns the previous value.
    fn set(&self, instance: InstanceId, key: &str, value: Value) -> Option<Value>;

    fn remove(&self, instance: InstanceId, key: &str) -> Option<Value>;

    fn contains(&self, instance: InstanceId, key: &str) -> bool {
        self.get(instance, key).is_some()
    }

    /// Every soft value stored for `instance`.
    fn properties(&self, instance: InstanceId) -> PropertyMap;
}

// ============================================================================
// SoftStorage handle
// ============================================================================

/// The storage handle a view is instantiated with.
#[derive(Clone)]
pub enum SoftStorage {
    Map(MapStore),
    Eav(Arc<TripleStore>),
}

impl SoftStorage {
    fn store(&self) -> &dyn VirtualPropertyStore {
        match self {
            SoftStorage::Map(m) => m,
            SoftStorage::Eav(t) => t.as_ref(),
        }
    }
}

impl VirtualPropertyStore for SoftStorage {
    fn mode(&self) -> StorageMode { self.store().mode() }

    fn get(&self, instance: InstanceId, key: &str) -> Option<Value> {
        self.store().get(instance, key)
    }

    fn set(&self, instance: InstanceId, key: &str, value: Value) -> Option<Value> {
        self.store().set(instance, key, value)
    }

    fn remove(&self, instance: InstanceId, key: &str) -> Option<Value> {
        self.store().remove(instance, key)
    }

    fn properties(&self, instance: InstanceId) -> PropertyMap {
        self.store().properties(instance)
    }
}

impl fmt::Debug for SoftStorage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SoftStorage({})", self.mode())
    }
}
