use std::fmt;
use std::io::{Read, Seek};
use std::path::Path;
use std::sync::Arc;

use bytes::Bytes;
use ograph_format::{inspect, ChunkMask, FileReport, FileTables};
use ograph_object::{ObjectPtr, TypeRegistry};
use ograph_resource::{CancellationFlag, LoadChain, ResourceLoader};
use ograph_types::Name;
use tracing::{debug, info};

use crate::buffers::BufferCache;
use crate::config::LoaderConfig;
use crate::dependency::{self, FileDependency, SourceDependency};
use crate::error::{LoadError, LoadResult};
use crate::runtime::RuntimeTables;
use crate::source::{read_block, FileSource, ReaderSource, SourceCursor};

// ---------------------------------------------------------------------------
// LoadContext
// ---------------------------------------------------------------------------

/// Everything a load needs besides the bytes.
#[derive(Clone)]
pub struct LoadContext {
    pub registry: Arc<TypeRegistry>,
    /// Resolves imports. Without one, imports stay unbound.
    pub resource_loader: Option<Arc<dyn ResourceLoader>>,
    /// Instantiate only the first export of this class (or a subclass).
    pub selective_class: Option<Name>,
    /// Create parentless exports as this class when it derives from the
    /// stored one.
    pub root_class_override: Option<Name>,
    pub cancellation: CancellationFlag,
    /// Buffers already in memory. Matching buffers are not read, and
    /// buffers read by this load are added.
    pub buffer_cache: Option<Arc<BufferCache>>,
    /// Loads that led to this one, passed on to the resource loader.
    pub load_chain: LoadChain,
}

impl LoadContext {
    pub fn new(registry: Arc<TypeRegistry>) -> Self {
        Self {
            registry,
            resource_loader: None,
            selective_class: None,
            root_class_override: None,
            cancellation: CancellationFlag::new(),
            buffer_cache: None,
            load_chain: LoadChain::new(),
        }
    }

    pub fn with_resource_loader(mut self, loader: Arc<dyn ResourceLoader>) -> Self {
        self.resource_loader = Some(loader);
        self
    }

    pub fn selective(mut self, class: impl Into<Name>) -> Self {
        self.selective_class = Some(class.into());
        self
    }

    pub fn with_root_class(mut self, class: impl Into<Name>) -> Self {
        self.root_class_override = Some(class.into());
        self
    }

    pub fn with_cancellation(mut self, flag: CancellationFlag) -> Self {
        self.cancellation = flag;
        self
    }

    pub fn with_buffer_cache(mut self, cache: Arc<BufferCache>) -> Self {
        self.buffer_cache = Some(cache);
        self
    }

    pub fn with_load_chain(mut self, chain: LoadChain) -> Self {
        self.load_chain = chain;
        self
    }

    fn check_cancelled(&self, stage: &str) -> LoadResult<()> {
        if self.cancellation.is_cancelled() {
            info!(stage, "load cancelled");
            return Err(LoadError::Cancelled);
        }
        Ok(())
    }
}

impl fmt::Debug for LoadContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadContext")
            .field("types", &self.registry.len())
            .field("resource_loader", &self.resource_loader.is_some())
            .field("selective_class", &self.selective_class)
            .field("root_class_override", &self.root_class_override)
            .field("buffer_cache", &self.buffer_cache.is_some())
            .field("load_chain", &self.load_chain)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// LoadedObjects
// ---------------------------------------------------------------------------

/// Result of a successful load.
#[derive(Clone, Debug, Default)]
pub struct LoadedObjects {
    /// Objects stored without a parent, in export order. In selective mode
    /// this is the selected object.
    pub roots: Vec<ObjectPtr>,
    /// Every object created, in export order.
    pub objects: Vec<ObjectPtr>,
}

impl LoadedObjects {
    pub fn root(&self) -> Option<&ObjectPtr> {
        self.roots.first()
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

// ---------------------------------------------------------------------------
// BinaryLoader
// ---------------------------------------------------------------------------

/// Reads object graphs written by [`BinarySaver`](crate::BinarySaver).
#[derive(Clone, Debug, Default)]
pub struct BinaryLoader {
    config: LoaderConfig,
}

impl BinaryLoader {
    pub fn new(config: LoaderConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }

    /// Load the file that starts at the reader's current position.
    ///
    /// The reader is kept for the lifetime of the returned buffers, which
    /// read their bodies from it on first access.
    pub async fn load<R>(&self, mut reader: R, context: &LoadContext) -> LoadResult<LoadedObjects>
    where
        R: Read + Seek + Send + 'static,
    {
        let base = reader.stream_position()?;
        let source = ReaderSource::new(reader)?;
        self.load_source(Arc::new(source), base, context).await
    }

    /// Load the file whose header starts at absolute offset `base` of
    /// `source`.
    ///
    /// Imports are resolved before any export is created, so every import
    /// handle is bound (or known to be missing) by the time bodies are read.
    /// In selective mode only the selected body is read.
    pub async fn load_source(
        &self,
        source: Arc<dyn FileSource>,
        base: u64,
        context: &LoadContext,
    ) -> LoadResult<LoadedObjects> {
        let config = &self.config;
        let tables = FileTables::load(
            &mut SourceCursor::new(source.as_ref(), base),
            ChunkMask::ALL,
            &config.table_options(),
        )?;
        debug!(
            base,
            exports = tables.exports.len(),
            imports = tables.imports.len(),
            buffers = tables.buffers.len(),
            "tables loaded"
        );
        context.check_cancelled("tables")?;

        let mut runtime = RuntimeTables::new(tables, Arc::clone(&context.registry))?;
        runtime
            .resolve_imports(context.resource_loader.clone(), &context.load_chain, config)
            .await?;
        context.check_cancelled("imports")?;

        runtime.create_exports(
            context.selective_class.as_ref(),
            context.root_class_override.as_ref(),
        );
        runtime.load_buffers(&source, context.buffer_cache.as_ref(), config)?;
        context.check_cancelled("buffers")?;

        let span = if context.selective_class.is_some() {
            runtime.body_span()
        } else {
            // Full loads read the whole region so an over-reading export is
            // caught as an overrun, not a truncation.
            let header = &runtime.tables().header;
            let start = header.tables_end();
            runtime
                .body_span()
                .map(|_| (start, (header.objects_end as u64).max(start)))
        };
        if let Some((start, end)) = span {
            let region = read_block(source.as_ref(), base + start, end - start)?;
            debug!(start, size = region.len(), "object bodies read");
            runtime.load_exports(&region, start, config)?;
        }
        runtime.post_load();

        let objects: Vec<ObjectPtr> = runtime.exports().iter().flatten().cloned().collect();
        let roots = if context.selective_class.is_some() {
            objects.clone()
        } else {
            runtime
                .tables()
                .exports
                .iter()
                .zip(runtime.exports())
                .filter(|(record, _)| record.parent == 0)
                .filter_map(|(_, object)| object.clone())
                .collect()
        };
        info!(
            objects = objects.len(),
            roots = roots.len(),
            imports = runtime.imports().len(),
            "object graph loaded"
        );
        Ok(LoadedObjects { roots, objects })
    }

    /// Load a file held in memory. Buffers are slices of `data`.
    pub async fn load_from_bytes(
        &self,
        data: impl Into<Bytes>,
        context: &LoadContext,
    ) -> LoadResult<LoadedObjects> {
        let data: Bytes = data.into();
        self.load_source(Arc::new(data), 0, context).await
    }

    /// Load a file from disk. Buffers stay on disk until first accessed.
    pub async fn load_from_path(&self, path: &Path, context: &LoadContext) -> LoadResult<LoadedObjects> {
        let file = tokio::fs::File::open(path).await?.into_std().await;
        let source = ReaderSource::new(file)?;
        debug!(path = %path.display(), size = source.len(), "file opened");
        self.load_source(Arc::new(source), 0, context).await
    }

    /// Imports of the file, read from the name and import tables only.
    pub fn list_dependencies<R: Read + Seek>(&self, reader: &mut R) -> LoadResult<Vec<FileDependency>> {
        dependency::list_dependencies(reader, &self.config.table_options())
    }

    /// Source records of the file.
    pub fn list_sources<R: Read + Seek>(&self, reader: &mut R) -> LoadResult<Vec<SourceDependency>> {
        dependency::list_sources(reader, &self.config.table_options())
    }

    /// Table summary without instantiating anything.
    pub fn inspect<R: Read + Seek>(&self, reader: &mut R) -> LoadResult<FileReport> {
        Ok(inspect(reader, &self.config.table_options())?)
    }
}
