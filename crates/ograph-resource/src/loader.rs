use async_trait::async_trait;
use ograph_object::ObjectPtr;
use ograph_types::ResourceKey;

use crate::chain::LoadChain;
use crate::error::{ResourceError, ResourceResult};

/// Source of external resources referenced by a file's imports.
///
/// Implementations must be safe to call from several concurrent loads.
#[async_trait]
pub trait ResourceLoader: Send + Sync {
    /// Return the resource if it is already in memory. Never blocks.
    fn acquire_if_resident(&self, key: &ResourceKey) -> Option<ObjectPtr>;

    /// Load the resource, suspending while it is read.
    async fn load(&self, key: ResourceKey) -> ResourceResult<ObjectPtr>;

    /// Load the resource on behalf of the loads in `chain`, the outermost
    /// first. Loaders that resolve imports recursively override this to
    /// detect cycles; the default ignores the chain.
    async fn load_chained(&self, key: ResourceKey, chain: &LoadChain) -> ResourceResult<ObjectPtr> {
        let _ = chain;
        self.load(key).await
    }
}

/// Loader that knows no resources.
pub struct NullResourceLoader;

#[async_trait]
impl ResourceLoader for NullResourceLoader {
    fn acquire_if_resident(&self, _key: &ResourceKey) -> Option<ObjectPtr> {
        None
    }

    async fn load(&self, key: ResourceKey) -> ResourceResult<ObjectPtr> {
        Err(ResourceError::NotFound(key))
    }
}
