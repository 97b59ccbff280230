use std::collections::HashMap;
use std::sync::Arc;

use ograph_format::{ExportRecord, FileTables, FormatError, PropertyRecord, FLAG_PROTECTED_LAYOUT};
use ograph_object::{
    BinaryReader, DataBuffer, DataUnmapper, LatentBuffer, MappedResource, ObjectPtr, PropertyInfo,
    ResourceRef, Serializable, TypeDescriptor, TypeRegistry,
};
use ograph_resource::{LoadChain, ResourceError, ResourceLoader};
use ograph_types::{Name, ResourceKey};
use tokio::task::JoinSet;
use tracing::{debug, error, warn};

use crate::buffers::{BufferCache, FileBackedBuffer};
use crate::config::{ErrorMode, IntegrityPolicy, LoaderConfig};
use crate::error::{ExportDiagnostic, ExportFailure, LoadError, LoadResult};
use crate::source::FileSource;

/// Load-time view of a file's tables, resolved into live handles.
///
/// Owns everything created by one load until the loader hands the objects
/// to the caller.
pub struct RuntimeTables {
    tables: FileTables,
    registry: Arc<TypeRegistry>,
    names: Vec<Name>,
    types: HashMap<u32, Option<Arc<TypeDescriptor>>>,
    properties: Vec<Option<Arc<PropertyInfo>>>,
    imports: Vec<ResourceRef>,
    exports: Vec<Option<ObjectPtr>>,
    buffers: Vec<DataBuffer>,
}

impl RuntimeTables {
    /// Resolve names, properties and import keys. Types are resolved lazily.
    pub fn new(tables: FileTables, registry: Arc<TypeRegistry>) -> LoadResult<Self> {
        let names = (1..=tables.names.len() as u32)
            .map(|i| Ok(tables.name(i)?.map(Name::new).unwrap_or_default()))
            .collect::<LoadResult<Vec<_>>>()?;

        let imports = tables
            .imports
            .iter()
            .map(|import| -> LoadResult<ResourceRef> {
                let path = tables.string_at(import.path)?;
                let class = tables.name(import.class_name)?.unwrap_or_default();
                Ok(ResourceRef {
                    must_load: import.must_load(),
                    must_fully_load: import.must_fully_load(),
                    ..ResourceRef::new(path, class)
                })
            })
            .collect::<LoadResult<Vec<_>>>()?;

        let mut runtime = Self {
            registry,
            names,
            types: HashMap::new(),
            properties: Vec::new(),
            imports,
            exports: vec![None; tables.exports.len()],
            buffers: Vec::new(),
            tables,
        };
        runtime.properties = runtime
            .tables
            .properties
            .iter()
            .map(|record| runtime.resolve_property(record))
            .collect();
        Ok(runtime)
    }

    /// The file tables this view was resolved from.
    pub fn tables(&self) -> &FileTables {
        &self.tables
    }

    fn name(&self, index: u32) -> Name {
        index
            .checked_sub(1)
            .and_then(|i| self.names.get(i as usize))
            .cloned()
            .unwrap_or_default()
    }

    /// Structural-hash fast path first, then a by-name search on the owning
    /// class and its bases.
    fn resolve_property(&self, record: &PropertyRecord) -> Option<Arc<PropertyInfo>> {
        let class = self.name(record.class_name);
        let type_name = self.name(record.type_name);
        let name = self.name(record.property_name);

        if let Some(info) = self.registry.find_property_by_hash(record.hash) {
            if info.owner == class && info.name == name && info.type_name == type_name {
                return Some(info);
            }
        }
        match self.registry.find_property(class.as_str(), name.as_str()) {
            Some(info) if info.type_name == type_name => {
                debug!(class = %class, property = %name, "property bound by name");
                Some(info)
            }
            Some(info) => {
                warn!(
                    class = %class,
                    property = %name,
                    stored = %type_name,
                    live = %info.type_name,
                    "property changed type; stored values will be skipped"
                );
                None
            }
            None => {
                warn!(
                    class = %class,
                    property = %name,
                    "property no longer exists; stored values will be skipped"
                );
                None
            }
        }
    }

    // -----------------------------------------------------------------------
    // Imports
    // -----------------------------------------------------------------------

    /// Bind imports to live resources.
    ///
    /// Resident resources are bound directly. Every other distinct import
    /// flagged must-load is loaded concurrently and this call waits for all
    /// of them. `chain` names the loads that led to this one and is passed
    /// on to the loader. Failed imports stay null unless the config turns
    /// them into errors. Must run inside a Tokio runtime.
    pub async fn resolve_imports(
        &mut self,
        loader: Option<Arc<dyn ResourceLoader>>,
        chain: &LoadChain,
        config: &LoaderConfig,
    ) -> LoadResult<()> {
        let Some(loader) = loader else {
            if !self.imports.is_empty() {
                debug!(imports = self.imports.len(), "no resource loader; imports left unbound");
            }
            return Ok(());
        };

        let mut pending: HashMap<ResourceKey, Vec<usize>> = HashMap::new();
        for (i, import) in self.imports.iter_mut().enumerate() {
            let key = import.key();
            if let Some(handle) = loader.acquire_if_resident(&key) {
                import.handle = Some(handle);
            } else if import.must_load && config.load_imports {
                pending.entry(key).or_default().push(i);
            }
        }
        if pending.is_empty() {
            return Ok(());
        }

        debug!(count = pending.len(), "loading imports");
        let mut tasks = JoinSet::new();
        for key in pending.keys() {
            let loader = Arc::clone(&loader);
            let key = key.clone();
            let chain = chain.clone();
            tasks.spawn(async move {
                let result = loader.load_chained(key.clone(), &chain).await;
                (key, result)
            });
        }

        let mut failure: Option<(ResourceKey, ResourceError)> = None;
        while let Some(joined) = tasks.join_next().await {
            let (key, result) = match joined {
                Ok(done) => done,
                Err(e) => {
                    warn!(error = %e, "import task aborted");
                    continue;
                }
            };
            let Some(indices) = pending.remove(&key) else {
                continue;
            };
            let result = result.and_then(|handle| self.check_import_class(&key, handle));
            match result {
                Ok(handle) => {
                    for i in indices {
                        self.imports[i].handle = Some(handle.clone());
                    }
                }
                Err(e) => {
                    warn!(key = %key, error = %e, "import failed to load; reference left null");
                    failure.get_or_insert((key, e));
                }
            }
        }
        for key in pending.into_keys() {
            warn!(key = %key, "import load never completed; reference left null");
            let reason = "load task aborted".to_string();
            failure.get_or_insert((key.clone(), ResourceError::Load { key, reason }));
        }

        match failure {
            Some((key, source)) if config.fail_on_missing_imports => {
                Err(LoadError::ImportFailed { key, source })
            }
            _ => Ok(()),
        }
    }

    fn check_import_class(&self, key: &ResourceKey, handle: ObjectPtr) -> Result<ObjectPtr, ResourceError> {
        let actual = handle.class();
        if *actual == key.class || self.registry.is_a(actual.as_str(), key.class.as_str()) {
            Ok(handle)
        } else {
            Err(ResourceError::ClassMismatch {
                key: key.clone(),
                expected: key.class.to_string(),
                actual: actual.to_string(),
            })
        }
    }

    // -----------------------------------------------------------------------
    // Exports
    // -----------------------------------------------------------------------

    /// Instantiate one empty object per loadable export, parents first.
    ///
    /// With `selective` set, only the first export whose class is (or derives
    /// from) that class is created, and it is left unparented. With
    /// `root_class` set, exports without a parent are created as that class
    /// when it derives from the stored one. Returns the number of objects
    /// created.
    pub fn create_exports(&mut self, selective: Option<&Name>, root_class: Option<&Name>) -> usize {
        let mut created = 0;
        for i in 0..self.tables.exports.len() {
            let record = self.tables.exports[i];
            let index = i as u32 + 1;
            let stored = self.name(record.class_name);
            let class = match root_class {
                Some(root) if record.parent == 0 => self.root_class(&stored, root),
                _ => stored,
            };

            let Some(descriptor) = self.registry.find_class(class.as_str()) else {
                error!(export = index, class = %class, "class not found; export skipped");
                continue;
            };
            if descriptor.is_abstract() {
                warn!(export = index, class = %class, "abstract class; export skipped");
                continue;
            }
            if let Some(wanted) = selective {
                if created > 0 || !self.registry.is_a(class.as_str(), wanted.as_str()) {
                    continue;
                }
            }
            let Some(body) = descriptor.construct() else {
                warn!(export = index, class = %class, "class cannot be constructed; export skipped");
                continue;
            };

            let object = ObjectPtr::from_box(body);
            if selective.is_none() && record.parent != 0 {
                match self.exports.get(record.parent as usize - 1) {
                    Some(Some(parent)) => object.set_parent(Some(parent)),
                    _ => debug!(export = index, parent = record.parent, "parent not loaded"),
                }
            }
            self.exports[i] = Some(object);
            created += 1;
        }
        debug!(created, total = self.tables.exports.len(), "exports created");
        created
    }

    fn root_class(&self, stored: &Name, root: &Name) -> Name {
        if self.registry.is_a(root.as_str(), stored.as_str()) {
            root.clone()
        } else {
            warn!(stored = %stored, requested = %root, "root class override is not compatible; ignored");
            stored.clone()
        }
    }

    /// Read each created export's body from `region`, which holds the file
    /// bytes starting at header-relative offset `region_start`.
    pub fn load_exports(&mut self, region: &[u8], region_start: u64, config: &LoaderConfig) -> LoadResult<()> {
        let mut failures = Vec::new();
        for i in 0..self.exports.len() {
            let Some(object) = self.exports[i].clone() else {
                continue;
            };
            if let Err(diagnostic) = self.load_export(i, &object, region, region_start, config) {
                if config.error_mode == ErrorMode::FailFast {
                    return Err(diagnostic.into());
                }
                warn!(%diagnostic, "export failed to load");
                failures.push(diagnostic);
            }
        }
        if failures.is_empty() {
            Ok(())
        } else {
            Err(LoadError::Exports(failures))
        }
    }

    fn load_export(
        &mut self,
        i: usize,
        object: &ObjectPtr,
        region: &[u8],
        region_start: u64,
        config: &LoaderConfig,
    ) -> Result<(), ExportDiagnostic> {
        let record: ExportRecord = self.tables.exports[i];
        let offset = self.tables.base_offset + record.data_offset as u64;
        let diagnostic = |failure, reason: String| ExportDiagnostic {
            export: i as u32 + 1,
            class: object.class().to_string(),
            offset,
            failure,
            reason,
        };

        let start = (record.data_offset as u64)
            .checked_sub(region_start)
            .map(|s| s as usize)
            .filter(|s| s + record.data_size as usize <= region.len())
            .ok_or_else(|| {
                diagnostic(ExportFailure::Integrity, "body lies outside the objects region".into())
            })?;
        let size = record.data_size as usize;

        if config.integrity.is_enabled() && self.tables.header.has_flag(FLAG_PROTECTED_LAYOUT) {
            let actual = crc32fast::hash(&region[start..start + size]);
            if actual != record.crc {
                let reason = format!("crc {actual:#010x} does not match stored {:#010x}", record.crc);
                if config.integrity == IntegrityPolicy::Strict {
                    return Err(diagnostic(ExportFailure::Integrity, reason));
                }
                warn!(export = i + 1, class = %object.class(), %reason, "export integrity check failed");
            }
        }

        let mut body = object.write();
        let mut reader = BinaryReader::new(&region[start..], self).with_base_offset(offset);
        let result = body.read_binary(&mut reader);
        let consumed = reader.position();
        drop(reader);
        drop(body);

        result.map_err(|e| diagnostic(ExportFailure::Read, e.to_string()))?;
        if consumed > size as u64 {
            return Err(diagnostic(
                ExportFailure::Overrun,
                format!("read {consumed} bytes of a {size} byte body"),
            ));
        }
        Ok(())
    }

    /// Notify every created object, in export order.
    pub fn post_load(&self) {
        for object in self.exports.iter().flatten() {
            object.write().on_post_load();
        }
    }

    /// Created objects by export index (0-based); `None` for skipped exports.
    pub fn exports(&self) -> &[Option<ObjectPtr>] {
        &self.exports
    }

    /// Import references, bound to their resources where loading succeeded.
    pub fn imports(&self) -> &[ResourceRef] {
        &self.imports
    }

    // -----------------------------------------------------------------------
    // Buffers
    // -----------------------------------------------------------------------

    /// Bind every buffer slot.
    ///
    /// A buffer whose content key is resident in `cache` is bound to the
    /// resident bytes and never read. Every other buffer becomes a latent
    /// buffer over `source` that is read and verified on first access, or
    /// right away when the config asks for preloading.
    pub fn load_buffers(
        &mut self,
        source: &Arc<dyn FileSource>,
        cache: Option<&Arc<BufferCache>>,
        config: &LoaderConfig,
    ) -> LoadResult<()> {
        let mut buffers = Vec::with_capacity(self.tables.buffers.len());
        let mut resident = 0;
        for (i, record) in self.tables.buffers.iter().enumerate() {
            let index = i as u32 + 1;
            if let Some(data) = cache.and_then(|cache| cache.get(&record.content_key)) {
                resident += 1;
                buffers.push(DataBuffer::Resident(data));
                continue;
            }

            let offset = self.tables.base_offset + record.data_offset as u64;
            if offset + record.size_on_disk as u64 > source.len() {
                return Err(LoadError::Format(FormatError::Truncated {
                    offset,
                    reason: format!("buffer {index} needs {} bytes", record.size_on_disk),
                }));
            }
            let mut latent = FileBackedBuffer::new(Arc::clone(source), *record, offset, config.integrity);
            if let Some(cache) = cache {
                latent = latent.with_cache(Arc::clone(cache));
            }
            if config.preload_buffers {
                if let Err(e) = latent.load() {
                    if config.integrity == IntegrityPolicy::Strict {
                        return Err(LoadError::BufferIntegrity {
                            buffer: index,
                            offset,
                            reason: e.to_string(),
                        });
                    }
                    warn!(buffer = index, offset, error = %e, "unreadable buffer dropped");
                    buffers.push(DataBuffer::Empty);
                    continue;
                }
            }
            buffers.push(DataBuffer::Latent(Arc::new(latent)));
        }
        debug!(buffers = buffers.len(), resident, preloaded = config.preload_buffers, "buffers bound");
        self.buffers = buffers;
        Ok(())
    }

    /// Header-relative byte range covering the bodies of every created
    /// export, clamped to the objects region. `None` when nothing was
    /// created.
    pub fn body_span(&self) -> Option<(u64, u64)> {
        let low = self.tables.header.tables_end();
        let high = (self.tables.header.objects_end as u64).max(low);
        self.tables
            .exports
            .iter()
            .zip(&self.exports)
            .filter(|(_, object)| object.is_some())
            .map(|(record, _)| self.tables.export_range(record))
            .map(|(start, end)| (start.clamp(low, high), end.clamp(low, high)))
            .reduce(|(start, end), (s, e)| (start.min(s), end.max(e)))
    }
}

impl DataUnmapper for RuntimeTables {
    fn unmap_name(&mut self, index: u32) -> Name {
        if index as usize > self.names.len() {
            error!(index, names = self.names.len(), "name index out of range");
        }
        self.name(index)
    }

    fn unmap_type(&mut self, index: u32) -> Option<Arc<TypeDescriptor>> {
        if index == 0 {
            return None;
        }
        if let Some(cached) = self.types.get(&index) {
            return cached.clone();
        }
        let name = self.name(index);
        let resolved = self.registry.find_type(name.as_str());
        if resolved.is_none() {
            error!(index, name = %name, "type no longer exists");
        }
        self.types.insert(index, resolved.clone());
        resolved
    }

    fn unmap_property(&mut self, index: u32) -> Option<Arc<PropertyInfo>> {
        index
            .checked_sub(1)
            .and_then(|i| self.properties.get(i as usize))
            .cloned()
            .flatten()
    }

    fn unmap_pointer(&mut self, index: u32) -> Option<ObjectPtr> {
        index
            .checked_sub(1)
            .and_then(|i| self.exports.get(i as usize))
            .cloned()
            .flatten()
    }

    fn unmap_resource_reference(&mut self, mapped: MappedResource) -> ResourceRef {
        match mapped {
            MappedResource::Null => ResourceRef::default(),
            MappedResource::Import(index) => index
                .checked_sub(1)
                .and_then(|i| self.imports.get(i as usize))
                .cloned()
                .unwrap_or_else(|| {
                    error!(index, "import index out of range");
                    ResourceRef::default()
                }),
            MappedResource::Export(index) => match self.unmap_pointer(index) {
                Some(object) => ResourceRef::embedded(object),
                None => ResourceRef::default(),
            },
        }
    }

    fn unmap_buffer(&mut self, index: u32) -> DataBuffer {
        index
            .checked_sub(1)
            .and_then(|i| self.buffers.get(i as usize))
            .cloned()
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{drifted_registry, registry, save_bytes, TestMesh, TestMetadata, TestObject};
    use crate::SaverConfig;
    use async_trait::async_trait;
    use ograph_format::{ChunkMask, TableLoadOptions};
    use ograph_resource::{NullResourceLoader, ResourceCache, ResourceResult};
    use std::io::Cursor;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn runtime_for(data: &[u8], registry: Arc<TypeRegistry>) -> RuntimeTables {
        let tables =
            FileTables::load(&mut Cursor::new(data), ChunkMask::ALL, &TableLoadOptions::default()).unwrap();
        RuntimeTables::new(tables, registry).unwrap()
    }

    #[test]
    fn properties_bind_through_fingerprint() {
        let data = save_bytes(&[ObjectPtr::new(TestObject::new("x"))], SaverConfig::default());
        let runtime = runtime_for(&data, registry());
        assert_eq!(runtime.properties.len(), 3);
        assert!(runtime.properties.iter().all(Option::is_some));
    }

    #[test]
    fn removed_property_does_not_bind() {
        let data = save_bytes(&[ObjectPtr::new(TestObject::new("x"))], SaverConfig::default());
        let runtime = runtime_for(&data, drifted_registry());
        let bound: Vec<_> = runtime.properties.iter().flatten().map(|p| p.name.to_string()).collect();
        assert_eq!(bound, vec!["data".to_string(), "ref".to_string()]);
    }

    #[test]
    fn unknown_class_is_skipped() {
        let root = ObjectPtr::new(TestMesh::new("root"));
        let meta = ObjectPtr::with_parent(TestMetadata::new("a", 1), &root);
        root.with_mut(|m: &mut TestMesh| m.parts.push(meta.clone()));
        let data = save_bytes(&[root], SaverConfig::default());

        let mut runtime = runtime_for(&data, drifted_registry());
        assert_eq!(runtime.create_exports(None, None), 1);
        assert!(runtime.exports()[0].is_some());
        assert!(runtime.exports()[1].is_none());
    }

    #[test]
    fn children_linked_to_parents() {
        let root = ObjectPtr::new(TestMesh::new("root"));
        let meta = ObjectPtr::with_parent(TestMetadata::new("a", 1), &root);
        root.with_mut(|m: &mut TestMesh| m.parts.push(meta.clone()));
        let data = save_bytes(&[root], SaverConfig::default());

        let mut runtime = runtime_for(&data, registry());
        assert_eq!(runtime.create_exports(None, None), 2);
        let parent = runtime.exports()[0].clone().unwrap();
        let child = runtime.exports()[1].clone().unwrap();
        assert_eq!(child.parent(), Some(parent));
    }

    #[test]
    fn selective_creates_one_unparented_object() {
        let root = ObjectPtr::new(TestMesh::new("root"));
        let first = ObjectPtr::with_parent(TestMetadata::new("first", 1), &root);
        let second = ObjectPtr::with_parent(TestMetadata::new("second", 2), &root);
        root.with_mut(|m: &mut TestMesh| m.parts = vec![first.clone(), second.clone()]);
        let data = save_bytes(&[root], SaverConfig::default());

        let mut runtime = runtime_for(&data, registry());
        assert_eq!(runtime.create_exports(Some(&Name::new("TestMetadata")), None), 1);
        let created: Vec<_> = runtime.exports().iter().flatten().collect();
        assert_eq!(created.len(), 1);
        assert_eq!(created[0].class(), "TestMetadata");
        assert!(created[0].parent().is_none());
    }

    #[test]
    fn unmapping_out_of_range_is_null() {
        let data = save_bytes(&[ObjectPtr::new(TestObject::new("x"))], SaverConfig::default());
        let mut runtime = runtime_for(&data, registry());
        assert!(runtime.unmap_name(999).is_none());
        assert!(runtime.unmap_pointer(999).is_none());
        assert!(runtime.unmap_property(999).is_none());
        assert!(runtime.unmap_buffer(999).is_empty());
        assert!(runtime.unmap_resource_reference(MappedResource::Import(999)).is_null());
    }

    #[test]
    fn types_resolved_lazily_and_cached() {
        let data = save_bytes(&[ObjectPtr::new(TestObject::new("x"))], SaverConfig::default());
        let mut runtime = runtime_for(&data, registry());
        let index = runtime.names.iter().position(|n| n == "String").unwrap() as u32 + 1;
        assert!(runtime.types.is_empty());
        assert!(runtime.unmap_type(index).is_some());
        assert_eq!(runtime.types.len(), 1);
    }

    struct Counting {
        inner: ResourceCache,
        loads: AtomicUsize,
    }

    #[async_trait]
    impl ResourceLoader for Counting {
        fn acquire_if_resident(&self, _key: &ResourceKey) -> Option<ObjectPtr> {
            None
        }

        async fn load(&self, key: ResourceKey) -> ResourceResult<ObjectPtr> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            tokio::task::yield_now().await;
            self.inner.load(key).await
        }
    }

    fn mesh_importing(paths: &[&str]) -> Vec<u8> {
        let mut mesh = TestMesh::new("m");
        mesh.extra = paths.iter().map(|p| ResourceRef::new(*p, "TestMetadata")).collect();
        save_bytes(&[ObjectPtr::new(mesh)], SaverConfig::default())
    }

    #[tokio::test]
    async fn imports_loaded_once_per_key() {
        let data = mesh_importing(&["/meta/a", "/meta/b"]);
        let cache = ResourceCache::new();
        let a = ObjectPtr::new(TestMetadata::new("a", 1));
        let b = ObjectPtr::new(TestMetadata::new("b", 2));
        cache.insert(ResourceKey::new("/meta/a", "TestMetadata"), a.clone());
        cache.insert(ResourceKey::new("/meta/b", "TestMetadata"), b.clone());
        let loader = Arc::new(Counting {
            inner: cache,
            loads: AtomicUsize::new(0),
        });

        let mut runtime = runtime_for(&data, registry());
        runtime
            .resolve_imports(Some(loader.clone()), &LoadChain::new(), &LoaderConfig::default())
            .await
            .unwrap();
        assert_eq!(loader.loads.load(Ordering::SeqCst), 2);
        assert_eq!(runtime.imports()[0].handle, Some(a));
        assert_eq!(runtime.imports()[1].handle, Some(b));
    }

    #[tokio::test]
    async fn resident_imports_skip_loading() {
        let data = mesh_importing(&["/meta/a"]);
        let cache = Arc::new(ResourceCache::new());
        let a = ObjectPtr::new(TestMetadata::new("a", 1));
        cache.insert(ResourceKey::new("/meta/a", "TestMetadata"), a.clone());
        let mut runtime = runtime_for(&data, registry());
        runtime
            .resolve_imports(Some(cache), &LoadChain::new(), &LoaderConfig::default())
            .await
            .unwrap();
        assert_eq!(runtime.imports()[0].handle, Some(a));
    }

    #[tokio::test]
    async fn failed_import_is_null_or_error() {
        let data = mesh_importing(&["/meta/missing"]);
        let mut runtime = runtime_for(&data, registry());
        runtime
            .resolve_imports(Some(Arc::new(NullResourceLoader)), &LoadChain::new(), &LoaderConfig::default())
            .await
            .unwrap();
        assert!(runtime.imports()[0].handle.is_none());

        let config = LoaderConfig {
            fail_on_missing_imports: true,
            ..Default::default()
        };
        let mut runtime = runtime_for(&data, registry());
        let err = runtime
            .resolve_imports(Some(Arc::new(NullResourceLoader)), &LoadChain::new(), &config)
            .await
            .unwrap_err();
        assert!(matches!(err, LoadError::ImportFailed { .. }));
    }

    #[tokio::test]
    async fn wrong_class_import_rejected() {
        let data = mesh_importing(&["/meta/a"]);
        let loader = Arc::new(Counting {
            inner: ResourceCache::new(),
            loads: AtomicUsize::new(0),
        });
        loader.inner.insert(
            ResourceKey::new("/meta/a", "TestMetadata"),
            ObjectPtr::new(TestObject::new("not metadata")),
        );
        let mut runtime = runtime_for(&data, registry());
        runtime
            .resolve_imports(Some(loader.clone()), &LoadChain::new(), &LoaderConfig::default())
            .await
            .unwrap();
        assert_eq!(loader.loads.load(Ordering::SeqCst), 1);
        assert!(runtime.imports()[0].handle.is_none());
    }

    #[tokio::test]
    async fn deferred_imports_not_loaded() {
        let mut mesh = TestMesh::new("m");
        mesh.extra = vec![ResourceRef::deferred("/meta/a", "TestMetadata")];
        let data = save_bytes(&[ObjectPtr::new(mesh)], SaverConfig::default());
        let loader = Arc::new(Counting {
            inner: ResourceCache::new(),
            loads: AtomicUsize::new(0),
        });
        let mut runtime = runtime_for(&data, registry());
        runtime
            .resolve_imports(Some(loader.clone()), &LoadChain::new(), &LoaderConfig::default())
            .await
            .unwrap();
        assert_eq!(loader.loads.load(Ordering::SeqCst), 0);
        assert!(!runtime.imports()[0].must_load);
        assert!(!runtime.imports()[0].must_fully_load);
    }

    /// Records the chain each load was asked for on behalf of.
    #[derive(Default)]
    struct ChainRecorder {
        chains: std::sync::Mutex<Vec<LoadChain>>,
    }

    #[async_trait]
    impl ResourceLoader for ChainRecorder {
        fn acquire_if_resident(&self, _key: &ResourceKey) -> Option<ObjectPtr> {
            None
        }

        async fn load(&self, key: ResourceKey) -> ResourceResult<ObjectPtr> {
            Err(ResourceError::NotFound(key))
        }

        async fn load_chained(&self, key: ResourceKey, chain: &LoadChain) -> ResourceResult<ObjectPtr> {
            self.chains.lock().unwrap().push(chain.clone());
            self.load(key).await
        }
    }

    #[tokio::test]
    async fn import_loads_carry_the_chain() {
        let data = mesh_importing(&["/meta/a"]);
        let loader = Arc::new(ChainRecorder::default());
        let chain = LoadChain::new().with(ResourceKey::new("/scene", "TestMesh"));
        let mut runtime = runtime_for(&data, registry());
        runtime
            .resolve_imports(Some(loader.clone()), &chain, &LoaderConfig::default())
            .await
            .unwrap();
        assert_eq!(*loader.chains.lock().unwrap(), vec![chain]);
    }

    fn mesh_file(vertices: &[u8]) -> (Vec<u8>, Arc<dyn FileSource>) {
        let mesh = TestMesh::new("m").with_vertices(vertices);
        let data = save_bytes(&[ObjectPtr::new(mesh)], SaverConfig::uncompressed());
        let source: Arc<dyn FileSource> = Arc::new(bytes::Bytes::from(data.clone()));
        (data, source)
    }

    #[test]
    fn buffers_are_latent_until_touched() {
        let (data, source) = mesh_file(b"vertex data");
        let mut runtime = runtime_for(&data, registry());
        runtime.load_buffers(&source, None, &LoaderConfig::diagnostic()).unwrap();
        let DataBuffer::Latent(latent) = runtime.unmap_buffer(1) else {
            panic!("expected a latent buffer");
        };
        assert!(format!("{latent:?}").contains("loaded: false"));
        assert_eq!(&latent.load().unwrap()[..], b"vertex data");
    }

    #[test]
    fn resident_buffer_bound_without_reading() {
        let (data, _) = mesh_file(b"vertex data");
        // A source with no bytes: any read of it fails.
        let empty: Arc<dyn FileSource> = Arc::new(bytes::Bytes::new());
        let cache = Arc::new(BufferCache::new());
        cache.insert(ograph_types::ContentKey::of(b"vertex data"), bytes::Bytes::from_static(b"vertex data"));

        let mut runtime = runtime_for(&data, registry());
        runtime.load_buffers(&empty, Some(&cache), &LoaderConfig::diagnostic()).unwrap();
        assert!(matches!(runtime.unmap_buffer(1), DataBuffer::Resident(ref b) if &b[..] == b"vertex data"));
    }

    #[test]
    fn buffer_past_end_of_file_is_truncation() {
        let (data, _) = mesh_file(b"vertex data");
        let short: Arc<dyn FileSource> = Arc::new(bytes::Bytes::copy_from_slice(&data[..data.len() - 2]));
        let mut runtime = runtime_for(&data, registry());
        let err = runtime.load_buffers(&short, None, &LoaderConfig::diagnostic()).unwrap_err();
        assert!(matches!(err, LoadError::Format(FormatError::Truncated { .. })));
    }

    #[test]
    fn body_span_covers_created_exports_only() {
        let root = ObjectPtr::new(TestMesh::new("root"));
        let first = ObjectPtr::with_parent(TestMetadata::new("first", 1), &root);
        root.with_mut(|m: &mut TestMesh| m.parts = vec![first.clone()]);
        let data = save_bytes(&[root], SaverConfig::default());

        let mut runtime = runtime_for(&data, registry());
        assert_eq!(runtime.body_span(), None);
        runtime.create_exports(Some(&Name::new("TestMetadata")), None);
        let selected = runtime.tables().exports[1];
        assert_eq!(runtime.body_span(), Some(runtime.tables().export_range(&selected)));

        let mut runtime = runtime_for(&data, registry());
        runtime.create_exports(None, None);
        let header = &runtime.tables().header;
        assert_eq!(runtime.body_span(), Some((header.tables_end(), header.objects_end as u64)));
    }
}
