use std::fs;
use std::io::{BufWriter, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::Arc;

use bytes::Bytes;
use ograph_format::codec::encode_buffer;
use ograph_format::{BufferCodec, FileTablesBuilder, ImportRecord, FLAG_PROTECTED_LAYOUT};
use ograph_object::{
    BinaryWriter, DataMapper, MappedResource, ObjectPtr, PropertyDesc, ResourceRef, StreamError,
    StreamResult,
};
use ograph_resource::ProgressTracker;
use ograph_types::{ContentKey, Name};
use tempfile::NamedTempFile;
use tracing::{debug, info};

use crate::config::SaverConfig;
use crate::dependency::SourceDependency;
use crate::error::{SaveError, SaveResult};
use crate::mapper::StructureMapper;

/// What to save.
#[derive(Clone, Default)]
pub struct SaveContext {
    /// Objects saved as roots, together with everything reachable from them.
    pub roots: Vec<ObjectPtr>,
    /// Provenance records stored alongside the graph.
    pub sources: Vec<SourceDependency>,
    pub progress: Option<Arc<dyn ProgressTracker>>,
}

impl SaveContext {
    pub fn new(roots: Vec<ObjectPtr>) -> Self {
        Self {
            roots,
            ..Default::default()
        }
    }

    pub fn with_source(mut self, source: SourceDependency) -> Self {
        self.sources.push(source);
        self
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressTracker>) -> Self {
        self.progress = Some(progress);
        self
    }

    fn is_cancelled(&self) -> bool {
        self.progress.as_ref().is_some_and(|p| p.check_cancellation())
    }
}

/// Outcome of a successful save.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SaveSummary {
    pub exports: usize,
    pub imports: usize,
    pub buffers: usize,
    pub compressed_buffers: usize,
    /// Total file size.
    pub size: u64,
}

/// Writes object graphs to the binary format.
pub struct BinarySaver {
    config: SaverConfig,
}

impl BinarySaver {
    pub fn new(config: SaverConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SaverConfig {
        &self.config
    }

    /// Save the graph at the writer's current position.
    ///
    /// On error the writer holds an incomplete file; use
    /// [`BinarySaver::save_to_path`] to never leave one behind.
    pub fn save<W: Write + Seek>(
        &self,
        writer: &mut W,
        context: &SaveContext,
    ) -> SaveResult<SaveSummary> {
        let mut structure = StructureMapper::new(&context.roots);
        structure.map()?;

        let mut builder = self.build_tables(&structure, &context.sources)?;

        let base = writer.stream_position()?;
        let tables_end = builder.tables_mut().save(writer)?;
        debug!(tables_end, "placeholder tables written");

        // Export bodies.
        let protected = self.config.protected_layout;
        let total = structure.exports().len();
        let mut bodies = Vec::with_capacity(total);
        {
            let mut mapper = SavingMapper {
                structure: &structure,
                builder: &builder,
            };
            for (i, object) in structure.exports().iter().enumerate() {
                if context.is_cancelled() {
                    info!(written = i, total, "save cancelled");
                    return Err(SaveError::Cancelled);
                }
                let offset = writer.stream_position()? - base;
                let mut body = Vec::new();
                {
                    let guard = object.read();
                    let mut out = BinaryWriter::new(&mut body, &mut mapper);
                    guard.write_binary(&mut out).map_err(|source| SaveError::Stream {
                        export: i as u32 + 1,
                        class: object.class().clone(),
                        source,
                    })?;
                }
                writer.write_all(&body)?;
                let crc = if protected { crc32fast::hash(&body) } else { 0 };
                bodies.push((
                    to_u32(offset, "export offset")?,
                    to_u32(body.len() as u64, "export size")?,
                    crc,
                ));
                if let Some(progress) = &context.progress {
                    progress.report_progress(i as u64 + 1, total as u64, "exports");
                }
            }
        }

        // Buffer bodies.
        let settings = self.config.compression_settings();
        let mut stored = Vec::with_capacity(structure.buffers().len());
        let mut compressed_buffers = 0;
        for buffer in structure.buffers() {
            let offset = writer.stream_position()? - base;
            let encoded = encode_buffer(&buffer.data, &settings)?;
            if encoded.codec != BufferCodec::Raw {
                compressed_buffers += 1;
            }
            writer.write_all(&encoded.bytes)?;
            stored.push((
                to_u32(offset, "buffer offset")?,
                to_u32(encoded.bytes.len() as u64, "buffer size")?,
                encoded.codec.id(),
            ));
        }

        // Patch and rewrite the tables.
        let tables = builder.tables_mut();
        for (record, (offset, size, crc)) in tables.exports.iter_mut().zip(bodies) {
            record.data_offset = offset;
            record.data_size = size;
            record.crc = crc;
        }
        for (record, (offset, size, codec)) in tables.buffers.iter_mut().zip(stored) {
            record.data_offset = offset;
            record.size_on_disk = size;
            record.codec = codec;
        }
        writer.seek(SeekFrom::Start(base))?;
        let rewritten_end = tables.save(writer)?;
        debug_assert_eq!(rewritten_end, tables_end);
        let size = tables.header.buffers_end as u64;
        writer.seek(SeekFrom::Start(base + size))?;
        writer.flush()?;

        let summary = SaveSummary {
            exports: tables.exports.len(),
            imports: tables.imports.len(),
            buffers: tables.buffers.len(),
            compressed_buffers,
            size,
        };
        info!(
            exports = summary.exports,
            imports = summary.imports,
            buffers = summary.buffers,
            size = summary.size,
            "object graph saved"
        );
        Ok(summary)
    }

    /// Save to `path` through a temporary file in the same directory that
    /// replaces the target only once the save has succeeded.
    pub fn save_to_path(&self, path: &Path, context: &SaveContext) -> SaveResult<SaveSummary> {
        let dir = match path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => Path::new("."),
        };
        fs::create_dir_all(dir)?;
        let mut temp = NamedTempFile::new_in(dir)?;
        let summary = {
            let mut writer = BufWriter::new(temp.as_file_mut());
            let summary = self.save(&mut writer, context)?;
            writer.flush()?;
            summary
        };
        temp.as_file().sync_all()?;
        temp.persist(path).map_err(|e| SaveError::Io(e.error))?;
        debug!(path = %path.display(), "save persisted");
        Ok(summary)
    }

    /// Turn the mapper's logical tables into file tables.
    fn build_tables(
        &self,
        structure: &StructureMapper,
        sources: &[SourceDependency],
    ) -> SaveResult<FileTablesBuilder> {
        let mut builder = FileTablesBuilder::new();
        for name in structure.names() {
            builder.map_name(name)?;
        }
        for property in structure.properties() {
            builder.map_property(
                &Name::new(property.class),
                &Name::new(property.type_name),
                &Name::new(property.name),
                property.fingerprint(),
            )?;
        }
        for import in structure.imports() {
            builder.map_import(import.path.as_str(), &import.class, import.flags)?;
        }
        for (i, object) in structure.exports().iter().enumerate() {
            let class = builder.map_name(object.class())?;
            builder.add_export(class, structure.parent_index(i as u32 + 1));
        }
        for buffer in structure.buffers() {
            builder.add_buffer(buffer.key, to_u32(buffer.data.len() as u64, "buffer")?);
        }
        for source in sources {
            builder.add_source(
                source.path.as_str(),
                source.size,
                source.timestamp,
                source.content_key,
            )?;
        }
        if self.config.protected_layout {
            builder.set_flags(FLAG_PROTECTED_LAYOUT);
        }
        Ok(builder)
    }
}

impl Default for BinarySaver {
    fn default() -> Self {
        Self::new(SaverConfig::default())
    }
}

fn to_u32(value: u64, what: &str) -> SaveResult<u32> {
    u32::try_from(value).map_err(|_| SaveError::FileTooLarge(format!("{what} {value}")))
}

/// Write-pass mapper: looks up indices recorded by the structure pass.
struct SavingMapper<'a> {
    structure: &'a StructureMapper,
    builder: &'a FileTablesBuilder,
}

impl DataMapper for SavingMapper<'_> {
    fn map_name(&mut self, name: &Name) -> StreamResult<u32> {
        self.builder
            .name_index(name)
            .ok_or_else(|| StreamError::Unmapped(format!("name {name}")))
    }

    fn map_type(&mut self, type_name: &Name) -> StreamResult<u32> {
        self.map_name(type_name)
    }

    fn map_property(&mut self, property: &PropertyDesc) -> StreamResult<u32> {
        self.builder
            .property_index(
                &Name::new(property.class),
                &Name::new(property.type_name),
                &Name::new(property.name),
            )
            .ok_or_else(|| {
                StreamError::Unmapped(format!("property {}.{}", property.class, property.name))
            })
    }

    fn map_pointer(&mut self, object: &ObjectPtr) -> StreamResult<u32> {
        self.structure
            .export_index(object)
            .ok_or_else(|| StreamError::Unmapped(format!("{object:?}")))
    }

    fn map_resource_reference(&mut self, reference: &ResourceRef) -> StreamResult<MappedResource> {
        if let Some(target) = self.structure.internal_target(reference) {
            return self.map_pointer(target).map(MappedResource::Export);
        }
        let flags = ImportRecord::flags_for(reference.must_load, reference.must_fully_load);
        self.builder
            .import_index(reference.path.as_str(), &reference.class, flags)
            .map(MappedResource::Import)
            .ok_or_else(|| StreamError::Unmapped(format!("import {}", reference.key())))
    }

    fn map_buffer(&mut self, data: &Bytes) -> StreamResult<u32> {
        let key = ContentKey::of(data);
        self.structure
            .buffer_index(&key)
            .ok_or_else(|| StreamError::Unmapped(format!("buffer {key}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{save_bytes, TestMesh, TestObject};
    use ograph_format::{ChunkMask, FileTables, TableLoadOptions};
    use ograph_resource::{CancellationFlag, ProgressTracker};
    use std::io::Cursor;
    use std::sync::Mutex;

    fn tables_of(data: &[u8]) -> FileTables {
        FileTables::load(&mut Cursor::new(data), ChunkMask::ALL, &TableLoadOptions::default()).unwrap()
    }

    /// Deterministic, poorly compressible bytes.
    fn noise(len: usize) -> Vec<u8> {
        let mut state: u64 = 0x2545_F491_4F6C_DD1D;
        (0..len)
            .map(|_| {
                state ^= state << 13;
                state ^= state >> 7;
                state ^= state << 17;
                (state >> 32) as u8
            })
            .collect()
    }

    #[test]
    fn two_objects_two_exports_no_imports() {
        let a = ObjectPtr::new(TestObject::new("x"));
        let b = ObjectPtr::new(TestObject::new("y").with_ref(&a));
        let data = save_bytes(&[a, b], SaverConfig::default());
        let tables = tables_of(&data);
        assert_eq!(tables.exports.len(), 2);
        assert!(tables.imports.is_empty());
        assert_eq!(tables.header.buffers_end as usize, data.len());
    }

    #[test]
    fn identical_buffers_stored_once() {
        let a = ObjectPtr::new(TestMesh::new("a").with_vertices(b"vertex block"));
        let b = ObjectPtr::new(TestMesh::new("b").with_vertices(b"vertex block"));
        let tables = tables_of(&save_bytes(&[a.clone(), b.clone()], SaverConfig::default()));
        assert_eq!(tables.buffers.len(), 1);

        let c = ObjectPtr::new(TestMesh::new("c").with_vertices(b"another block"));
        let tables = tables_of(&save_bytes(&[a, c], SaverConfig::default()));
        assert_eq!(tables.buffers.len(), 2);
    }

    #[test]
    fn compressible_buffer_is_compressed() {
        let big = vec![0x5Au8; 10 * 1024 * 1024];
        let mesh = ObjectPtr::new(TestMesh::new("big").with_vertices(&big));
        let data = save_bytes(&[mesh], SaverConfig::default());
        let tables = tables_of(&data);
        let record = tables.buffers[0];
        assert_eq!(record.codec, BufferCodec::Zstd.id());
        assert_eq!(record.size_in_memory as usize, big.len());
        assert!((record.size_on_disk as usize) < big.len() / 10);
    }

    #[test]
    fn incompressible_buffer_is_stored_raw() {
        let raw = noise(1024 * 1024);
        let mesh = ObjectPtr::new(TestMesh::new("noise").with_vertices(&raw));
        let tables = tables_of(&save_bytes(&[mesh], SaverConfig::default()));
        let record = tables.buffers[0];
        assert_eq!(record.codec, BufferCodec::Raw.id());
        assert_eq!(record.size_on_disk, record.size_in_memory);
    }

    #[test]
    fn protected_layout_records_export_crcs() {
        let obj = ObjectPtr::new(TestObject::new("guarded"));
        let data = save_bytes(&[obj.clone()], SaverConfig::default());
        let tables = tables_of(&data);
        assert!(tables.header.has_flag(FLAG_PROTECTED_LAYOUT));
        let (start, end) = tables.export_range(&tables.exports[0]);
        assert_eq!(tables.exports[0].crc, crc32fast::hash(&data[start as usize..end as usize]));

        let config = SaverConfig {
            protected_layout: false,
            ..Default::default()
        };
        let tables = tables_of(&save_bytes(&[obj], config));
        assert!(!tables.header.has_flag(FLAG_PROTECTED_LAYOUT));
        assert_eq!(tables.exports[0].crc, 0);
    }

    #[test]
    fn embedded_at_offset() {
        let obj = ObjectPtr::new(TestObject::new("inner"));
        let mut out = Cursor::new(Vec::new());
        out.write_all(b"CONTAINER-PREFIX").unwrap();
        let summary = BinarySaver::default()
            .save(&mut out, &SaveContext::new(vec![obj]))
            .unwrap();
        let data = out.into_inner();
        assert_eq!(data.len() as u64, 16 + summary.size);
        let mut cursor = Cursor::new(&data[..]);
        cursor.set_position(16);
        let tables = FileTables::load(&mut cursor, ChunkMask::ALL, &TableLoadOptions::default()).unwrap();
        assert_eq!(tables.base_offset, 16);
        assert_eq!(tables.exports.len(), 1);
    }

    #[test]
    fn sources_are_stored() {
        let obj = ObjectPtr::new(TestObject::new("cooked"));
        let context = SaveContext::new(vec![obj]).with_source(SourceDependency {
            path: "/src/model.fbx".into(),
            size: 1234,
            timestamp: 99,
            content_key: ContentKey::of(b"fbx"),
        });
        let mut out = Cursor::new(Vec::new());
        BinarySaver::default().save(&mut out, &context).unwrap();
        let tables = tables_of(out.get_ref());
        assert_eq!(tables.sources.len(), 1);
        assert_eq!(tables.string_at(tables.sources[0].path).unwrap(), "/src/model.fbx");
        assert_eq!(tables.sources[0].size, 1234);
    }

    #[derive(Default)]
    struct Recorder {
        reports: Mutex<Vec<(u64, u64)>>,
    }

    impl ProgressTracker for Recorder {
        fn check_cancellation(&self) -> bool {
            false
        }

        fn report_progress(&self, done: u64, total: u64, _message: &str) {
            self.reports.lock().unwrap().push((done, total));
        }
    }

    #[test]
    fn progress_reported_per_export() {
        let a = ObjectPtr::new(TestObject::new("a"));
        let b = ObjectPtr::new(TestObject::new("b"));
        let recorder = Arc::new(Recorder::default());
        let context = SaveContext::new(vec![a, b]).with_progress(recorder.clone());
        BinarySaver::default()
            .save(&mut Cursor::new(Vec::new()), &context)
            .unwrap();
        assert_eq!(*recorder.reports.lock().unwrap(), vec![(1, 2), (2, 2)]);
    }

    #[test]
    fn cancelled_save_leaves_no_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scene.bin");
        let flag = CancellationFlag::new();
        flag.cancel();
        let context = SaveContext::new(vec![ObjectPtr::new(TestObject::new("a"))])
            .with_progress(Arc::new(flag));
        let err = BinarySaver::default().save_to_path(&path, &context).unwrap_err();
        assert!(matches!(err, SaveError::Cancelled));
        assert!(!path.exists());
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn failed_save_keeps_previous_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scene.bin");
        fs::write(&path, b"previous good file").unwrap();
        let flag = CancellationFlag::new();
        flag.cancel();
        let context = SaveContext::new(vec![ObjectPtr::new(TestObject::new("a"))])
            .with_progress(Arc::new(flag));
        assert!(BinarySaver::default().save_to_path(&path, &context).is_err());
        assert_eq!(fs::read(&path).unwrap(), b"previous good file");
    }

    #[test]
    fn save_to_path_writes_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("scene.bin");
        let context = SaveContext::new(vec![ObjectPtr::new(TestObject::new("a"))]);
        let summary = BinarySaver::default().save_to_path(&path, &context).unwrap();
        assert_eq!(fs::metadata(&path).unwrap().len(), summary.size);
    }
}
