//! Map-backed soft storage: the host instance's own property map.

use std::sync::Arc;

use parking_lot::RwLock;

use crate::host::InstanceId;
use crate::model::{PropertyMap, Value};
use super::{StorageMode, VirtualPropertyStore};

/// Handle onto one host's soft-field map. Cloning shares the map.
#[derive(Clone, Default)]
pub struct MapStore {
    map: Arc<RwLock<PropertyMap>>,
}

impl MapStore {
    pub fn new(map: Arc<RwLock<PropertyMap>>) -> Self {
        Self { map }
    }

    pub fn len(&self) -> usize {
        self.map.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.read().is_empty()
    }
}

impl VirtualPropertyStore for MapStore {
    fn mode(&self) -> StorageMode { StorageMode::Map }

    fn get(&self, _instance: InstanceId, key: &str) -> Option<Value> {
        self.map.read().get(key).cloned()
    }

    fn set(&self, _instance: InstanceId, key: &str, value: Value) -> Option<Value> {
        self.map.write().insert(key.to_string(), value)
    }

    fn remove(&self, _instance: InstanceId, key: &str) -> Option<Value> {
        self.map.write().remove(key)
    }

    fn contains(&self, _instance: InstanceId, key: &str) -> bool {
        self.map.read().contains_key(key)
    }

    fn properties(&self, _instance: InstanceId) -> PropertyMap {
        self.map.read().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shared_handle() {
        let backing = Arc::new(RwLock::new(PropertyMap::new()));
        let a = MapStore::new(backing.clone());
        let b = MapStore::new(backing);
        let id = InstanceId(1);

        assert_eq!(a.set(id, "nickname", Value::from("Ada")), None);
        assert_eq!(b.get(id, "nickname"), Some(Value::from("Ada")));
        assert!(b.contains(id, "nickname"));
        assert_eq!(a.remove(id, "nickname"), Some(Value::from("Ada")));
        assert!(b.is_empty());
    }
}
