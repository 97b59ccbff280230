use std::collections::{HashMap, VecDeque};
use std::io::Cursor;
use std::sync::{Arc, Mutex, PoisonError, RwLock, Weak};

use async_trait::async_trait;
use bytes::Bytes;
use ograph_object::{ObjectPtr, TypeRegistry};
use ograph_resource::{LoadChain, ResourceCache, ResourceError, ResourceLoader, ResourceResult};
use ograph_types::{ResourceKey, ResourcePath};
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use crate::config::{LoaderConfig, SaverConfig};
use crate::error::SaveResult;
use crate::loader::{BinaryLoader, LoadContext};
use crate::saver::{BinarySaver, SaveContext, SaveSummary};

type LoadSlot = Arc<OnceCell<ResourceResult<ObjectPtr>>>;

/// Resource loader over an in-memory depot of saved files.
///
/// Each path holds the bytes of one saved graph; loading a key reads that
/// file (resolving its own imports through the depot) and returns its first
/// root. Loaded resources stay resident in the depot's cache.
///
/// Concurrent requests for a key that is still loading share that load.
/// A request that would wait on its own load, directly or through other
/// loads, fails with [`ResourceError::Cycle`].
pub struct DepotResourceLoader {
    files: RwLock<HashMap<ResourcePath, Bytes>>,
    cache: ResourceCache,
    in_flight: Mutex<InFlight>,
    registry: Arc<TypeRegistry>,
    config: LoaderConfig,
    this: Weak<DepotResourceLoader>,
}

impl DepotResourceLoader {
    pub fn new(registry: Arc<TypeRegistry>, config: LoaderConfig) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            files: RwLock::new(HashMap::new()),
            cache: ResourceCache::new(),
            in_flight: Mutex::new(InFlight::default()),
            registry,
            config,
            this: this.clone(),
        })
    }

    /// Store file bytes under `path`, replacing any previous file.
    pub fn insert(&self, path: impl Into<ResourcePath>, data: impl Into<Bytes>) {
        let mut files = self.files.write().unwrap_or_else(PoisonError::into_inner);
        files.insert(path.into(), data.into());
    }

    /// Save `roots` and store the result under `path`.
    pub fn save(
        &self,
        path: impl Into<ResourcePath>,
        roots: Vec<ObjectPtr>,
        config: SaverConfig,
    ) -> SaveResult<SaveSummary> {
        let mut out = Cursor::new(Vec::new());
        let summary = BinarySaver::new(config).save(&mut out, &SaveContext::new(roots))?;
        let path = path.into();
        debug!(path = %path, size = summary.size, "saved into depot");
        self.insert(path, out.into_inner());
        Ok(summary)
    }

    pub fn contains(&self, path: &ResourcePath) -> bool {
        let files = self.files.read().unwrap_or_else(PoisonError::into_inner);
        files.contains_key(path)
    }

    pub fn len(&self) -> usize {
        self.files.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Resources loaded so far.
    pub fn cache(&self) -> &ResourceCache {
        &self.cache
    }

    /// Number of keys with a load in progress.
    pub fn loads_in_flight(&self) -> usize {
        let in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        in_flight.slots.len()
    }

    fn file(&self, path: &ResourcePath) -> Option<Bytes> {
        let files = self.files.read().unwrap_or_else(PoisonError::into_inner);
        files.get(path).cloned()
    }

    async fn load_uncached(&self, key: &ResourceKey, chain: LoadChain) -> ResourceResult<ObjectPtr> {
        let data = self
            .file(&key.path)
            .ok_or_else(|| ResourceError::NotFound(key.clone()))?;

        let mut context = LoadContext::new(Arc::clone(&self.registry)).with_load_chain(chain);
        if let Some(this) = self.this.upgrade() {
            context = context.with_resource_loader(this);
        }
        let loaded = BinaryLoader::new(self.config.clone())
            .load_from_bytes(data, &context)
            .await
            .map_err(|e| ResourceError::Load {
                key: key.clone(),
                reason: e.to_string(),
            })?;

        let root = loaded.root().cloned().ok_or_else(|| ResourceError::Load {
            key: key.clone(),
            reason: "file has no root object".into(),
        })?;
        if !self.registry.is_a(root.class().as_str(), key.class.as_str()) {
            return Err(ResourceError::ClassMismatch {
                key: key.clone(),
                expected: key.class.to_string(),
                actual: root.class().to_string(),
            });
        }
        info!(key = %key, objects = loaded.len(), "resource loaded");
        Ok(self.cache.get_or_insert(key.clone(), root))
    }

    /// Join or start the load of `key` for `requester`, unless that would
    /// make the requester wait on itself.
    fn enter(&self, key: &ResourceKey, requester: Option<&ResourceKey>) -> ResourceResult<(LoadSlot, WaitGuard<'_>)> {
        let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(requester) = requester {
            if in_flight.reaches(key, requester) {
                return Err(ResourceError::Cycle(key.clone()));
            }
            in_flight.waits.push((requester.clone(), key.clone()));
        }
        let slot = Arc::clone(in_flight.slots.entry(key.clone()).or_default());
        let guard = WaitGuard {
            in_flight: &self.in_flight,
            edge: requester.map(|requester| (requester.clone(), key.clone())),
        };
        Ok((slot, guard))
    }

    fn leave(&self, key: &ResourceKey, slot: &LoadSlot) {
        let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        if in_flight.slots.get(key).is_some_and(|current| Arc::ptr_eq(current, slot)) {
            in_flight.slots.remove(key);
        }
    }
}

/// Loads in progress and which load waits on which.
#[derive(Default)]
struct InFlight {
    slots: HashMap<ResourceKey, LoadSlot>,
    /// `(waiter, loading)` pairs.
    waits: Vec<(ResourceKey, ResourceKey)>,
}

impl InFlight {
    /// Whether the load of `from` waits, directly or transitively, on `to`.
    fn reaches(&self, from: &ResourceKey, to: &ResourceKey) -> bool {
        let mut queue = VecDeque::from([from]);
        let mut seen = vec![from];
        while let Some(current) = queue.pop_front() {
            if current == to {
                return true;
            }
            for (_, next) in self.waits.iter().filter(|(waiter, _)| waiter == current) {
                if !seen.contains(&next) {
                    seen.push(next);
                    queue.push_back(next);
                }
            }
        }
        false
    }
}

/// Removes a wait edge when the waiting request finishes.
struct WaitGuard<'a> {
    in_flight: &'a Mutex<InFlight>,
    edge: Option<(ResourceKey, ResourceKey)>,
}

impl Drop for WaitGuard<'_> {
    fn drop(&mut self) {
        let Some(edge) = self.edge.take() else {
            return;
        };
        let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(pos) = in_flight.waits.iter().position(|e| *e == edge) {
            in_flight.waits.swap_remove(pos);
        }
    }
}

#[async_trait]
impl ResourceLoader for DepotResourceLoader {
    fn acquire_if_resident(&self, key: &ResourceKey) -> Option<ObjectPtr> {
        self.cache.get(key)
    }

    async fn load(&self, key: ResourceKey) -> ResourceResult<ObjectPtr> {
        self.load_chained(key, &LoadChain::new()).await
    }

    async fn load_chained(&self, key: ResourceKey, chain: &LoadChain) -> ResourceResult<ObjectPtr> {
        if let Some(resident) = self.cache.get(&key) {
            return Ok(resident);
        }
        if chain.contains(&key) {
            warn!(key = %key, chain = ?chain, "resource imports itself");
            return Err(ResourceError::Cycle(key));
        }
        let (slot, _wait) = self.enter(&key, chain.last()).inspect_err(|_| {
            warn!(key = %key, chain = ?chain, "import would wait on its own load");
        })?;
        let result = slot
            .get_or_init(|| self.load_uncached(&key, chain.with(key.clone())))
            .await
            .clone();
        self.leave(&key, &slot);
        result
    }
}
