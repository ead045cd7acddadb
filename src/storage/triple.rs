//! Entity–attribute–value soft storage shared by every host of a composer.
//!
//! Rows are `(instance, attribute) → value`. The store is split into shards
//! by instance id so that hosts on different shards never contend; within a
//! shard, rows are grouped per instance.

use parking_lot::RwLock;

use crate::host::InstanceId;
use crate::model::{PropertyMap, Value};
use super::{StorageMode, VirtualPropertyStore};

type Shard = hashbrown::HashMap<InstanceId, PropertyMap>;

pub const DEFAULT_SHARDS: usize = 16;

pub struct TripleStore {
    shards: Box<[RwLock<Shard>]>,
}

impl TripleStore {
    pub fn new() -> Self {
        Self::with_shards(DEFAULT_SHARDS)
    }

    pub fn with_shards(shards: usize) -> Self {
        let shards = (0..shards.max(1)).map(|_| RwLock::new(Shard::new())).collect();
        Self { shards }
    }

    fn shard(&self, instance: InstanceId) -> &RwLock<Shard> {
        &self.shards[(instance.0 % self.shards.len() as u64) as usize]
    }

    /// Drop every row of `instance`; returns how many were removed.
    pub fn purge(&self, instance: InstanceId) -> usize {
        self.shard(instance)
            .write()
            .remove(&instance)
            .map_or(0, |props| props.len())
    }

    /// Total number of rows.
    pub fn len(&self) -> usize {
        self.shards
            .iter()
            .map(|s| s.read().values().map(|p| p.len()).sum::<usize>())
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of instances with at least one row.
    pub fn instance_count(&self) -> usize {
        self.shards.iter().map(|s| s.read().len()).sum()
    }

    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }
}

impl Default for TripleStore {
    fn default() -> Self {
        Self::new()
    }
}

impl VirtualPropertyStore for TripleStore {
    fn mode(&self) -> StorageMode { StorageMode::Eav }

    fn get(&self, instance: InstanceId, key: &str) -> Option<Value> {
        self.shard(instance)
            .read()
            .get(&instance)
            .and_then(|props| props.get(key).cloned())
    }

    fn set(&self, instance: InstanceId, key: &str, value: Value) -> Option<Value> {
        self.shard(instance)
            .write()
            .entry(instance)
            .or_default()
            .insert(key.to_string(), value)
    }

    fn remove(&self, instance: InstanceId, key: &str) -> Option<Value> {
        let mut shard = self.shard(instance).write();
        let props = shard.get_mut(&instance)?;
        let removed = props.remove(key);
        if props.is_empty() {
            shard.remove(&instance);
        }
        removed
    }

    fn properties(&self, instance: InstanceId) -> PropertyMap {
        self.shard(instance)
            .read()
            .get(&instance)
            .cloned()
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rows_are_per_instance() {
        let store = TripleStore::with_shards(4);
        let a = InstanceId(10);
        let b = InstanceId(14); // same shard as `a`

        store.set(a, "nickname", Value::from("Ada"));
        assert_eq!(store.get(a, "nickname"), Some(Value::from("Ada")));
        assert_eq!(store.get(b, "nickname"), None);

        store.set(b, "nickname", Value::from("Bob"));
        assert_eq!(store.get(a, "nickname"), Some(Value::from("Ada")));
        assert_eq!(store.len(), 2);
        assert_eq!(store.instance_count(), 2);
    }

    #[test]
    fn test_remove_and_purge() {
        let store = TripleStore::new();
        let a = InstanceId(1);
        store.set(a, "x", Value::Int(1));
        store.set(a, "y", Value::Int(2));

        assert_eq!(store.remove(a, "x"), Some(Value::Int(1)));
        assert_eq!(store.remove(a, "x"), None);
        assert_eq!(store.purge(a), 1);
        assert!(store.is_empty());
        assert_eq!(store.instance_count(), 0);
    }

    #[test]
    fn test_concurrent_writers() {
        let store = TripleStore::new();
        std::thread::scope(|s| {
            for t in 0..8u64 {
                let store = &store;
                s.spawn(move || {
                    for i in 0..100 {
                        store.set(InstanceId(t), "counter", Value::Int(i));
                    }
                });
            }
        });
        for t in 0..8u64 {
            assert_eq!(store.get(InstanceId(t), "counter"), Some(Value::Int(99)));
        }
    }
}
