use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use ograph_object::ObjectPtr;
use ograph_types::ResourceKey;
use tracing::debug;

use crate::error::{ResourceError, ResourceResult};
use crate::loader::ResourceLoader;

/// Map of resources currently held in memory, keyed by path and class.
///
/// Entries are held strongly until removed. All access goes through a
/// `RwLock`, so the cache can be shared between concurrent loads.
pub struct ResourceCache {
    entries: RwLock<HashMap<ResourceKey, ObjectPtr>>,
}

impl ResourceCache {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn get(&self, key: &ResourceKey) -> Option<ObjectPtr> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries.get(key).cloned()
    }

    /// Insert a resource, returning the one it replaced.
    pub fn insert(&self, key: ResourceKey, resource: ObjectPtr) -> Option<ObjectPtr> {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        debug!(key = %key, "resource made resident");
        entries.insert(key, resource)
    }

    /// Insert unless another load got there first; returns the resident entry.
    pub fn get_or_insert(&self, key: ResourceKey, resource: ObjectPtr) -> ObjectPtr {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        entries.entry(key).or_insert(resource).clone()
    }

    pub fn remove(&self, key: &ResourceKey) -> Option<ObjectPtr> {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        entries.remove(key)
    }

    pub fn contains(&self, key: &ResourceKey) -> bool {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.entries.write().unwrap_or_else(PoisonError::into_inner).clear();
    }
}

impl Default for ResourceCache {
    fn default() -> Self {
        Self::new()
    }
}

/// A bare cache serves resident resources only.
#[async_trait]
impl ResourceLoader for ResourceCache {
    fn acquire_if_resident(&self, key: &ResourceKey) -> Option<ObjectPtr> {
        self.get(key)
    }

    async fn load(&self, key: ResourceKey) -> ResourceResult<ObjectPtr> {
        self.get(&key).ok_or(ResourceError::NotFound(key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ograph_object::{BinaryReader, BinaryWriter, Object, Serializable, StreamResult};

    struct Texture;

    impl Serializable for Texture {
        fn write_binary(&self, _writer: &mut BinaryWriter<'_>) -> StreamResult<()> {
            Ok(())
        }
        fn read_binary(&mut self, _reader: &mut BinaryReader<'_>) -> StreamResult<()> {
            Ok(())
        }
    }

    impl Object for Texture {
        fn class_name(&self) -> &str {
            "Texture"
        }
    }

    fn key() -> ResourceKey {
        ResourceKey::new("/t/wall.png", "Texture")
    }

    #[test]
    fn insert_and_get() {
        let cache = ResourceCache::new();
        assert!(cache.is_empty());
        let tex = ObjectPtr::new(Texture);
        assert!(cache.insert(key(), tex.clone()).is_none());
        assert_eq!(cache.get(&key()), Some(tex));
        assert!(cache.contains(&key()));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn get_or_insert_keeps_first() {
        let cache = ResourceCache::new();
        let first = ObjectPtr::new(Texture);
        let second = ObjectPtr::new(Texture);
        assert_eq!(cache.get_or_insert(key(), first.clone()), first);
        assert_eq!(cache.get_or_insert(key(), second), first);
    }

    #[test]
    fn remove_and_clear() {
        let cache = ResourceCache::new();
        cache.insert(key(), ObjectPtr::new(Texture));
        assert!(cache.remove(&key()).is_some());
        assert!(cache.remove(&key()).is_none());
        cache.insert(key(), ObjectPtr::new(Texture));
        cache.clear();
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn loader_serves_resident_only() {
        let cache = ResourceCache::new();
        assert!(cache.load(key()).await.is_err());
        let tex = ObjectPtr::new(Texture);
        cache.insert(key(), tex.clone());
        assert_eq!(cache.acquire_if_resident(&key()), Some(tex.clone()));
        assert_eq!(cache.load(key()).await.unwrap(), tex);
    }
}
