//! Object types and helpers shared by the engine tests.

use std::io::{self, Cursor};
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use ograph_object::{
    BinaryReader, BinaryWriter, DataBuffer, Object, ObjectPtr, PropertyDesc, ResourceRef,
    Serializable, StreamError, StreamResult, TypeDescriptor, TypeRegistry,
};

use crate::config::{LoaderConfig, SaverConfig};
use crate::error::LoadResult;
use crate::loader::{BinaryLoader, LoadContext, LoadedObjects};
use crate::saver::{BinarySaver, SaveContext};
use crate::source::FileSource;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

// ---------------------------------------------------------------------------
// TestObject
// ---------------------------------------------------------------------------

const OBJECT_DATA: PropertyDesc = PropertyDesc::new("TestObject", "data", "String");
const OBJECT_REF: PropertyDesc = PropertyDesc::new("TestObject", "ref", "ObjectPtr");
const OBJECT_VALUE: PropertyDesc = PropertyDesc::new("TestObject", "value", "Int32");

#[derive(Debug, Default)]
pub struct TestObject {
    pub data: String,
    pub reference: Option<ObjectPtr>,
    pub value: i32,
    pub post_loads: u32,
}

impl TestObject {
    pub fn new(data: &str) -> Self {
        Self {
            data: data.to_owned(),
            ..Default::default()
        }
    }

    pub fn with_ref(mut self, target: &ObjectPtr) -> Self {
        self.reference = Some(target.clone());
        self
    }

    pub fn with_value(mut self, value: i32) -> Self {
        self.value = value;
        self
    }
}

impl Serializable for TestObject {
    fn write_binary(&self, writer: &mut BinaryWriter<'_>) -> StreamResult<()> {
        writer.write_property(&OBJECT_DATA, |w| w.write_string(&self.data))?;
        writer.write_property(&OBJECT_REF, |w| w.write_pointer(self.reference.as_ref()))?;
        writer.write_property(&OBJECT_VALUE, |w| w.write_i32(self.value))?;
        writer.end_properties()
    }

    fn read_binary(&mut self, reader: &mut BinaryReader<'_>) -> StreamResult<()> {
        reader.read_properties(|r, property| {
            match property.name.as_str() {
                "data" => self.data = r.read_string()?,
                "ref" => self.reference = r.read_pointer()?,
                "value" => self.value = r.read_i32()?,
                _ => {}
            }
            Ok(())
        })
    }
}

impl Object for TestObject {
    fn class_name(&self) -> &str {
        "TestObject"
    }

    fn on_post_load(&mut self) {
        self.post_loads += 1;
    }
}

/// Newer revision of [`TestObject`] that reads the same data.
#[derive(Debug, Default)]
pub struct TestObjectV2 {
    pub base: TestObject,
}

impl Serializable for TestObjectV2 {
    fn write_binary(&self, writer: &mut BinaryWriter<'_>) -> StreamResult<()> {
        self.base.write_binary(writer)
    }

    fn read_binary(&mut self, reader: &mut BinaryReader<'_>) -> StreamResult<()> {
        self.base.read_binary(reader)
    }
}

impl Object for TestObjectV2 {
    fn class_name(&self) -> &str {
        "TestObjectV2"
    }
}

// ---------------------------------------------------------------------------
// TestMesh
// ---------------------------------------------------------------------------

const MESH_NAME: PropertyDesc = PropertyDesc::new("TestMesh", "name", "String");
const MESH_VERTICES: PropertyDesc = PropertyDesc::new("TestMesh", "vertices", "Buffer");
const MESH_MATERIAL: PropertyDesc = PropertyDesc::new("TestMesh", "material", "ResourceRef");
const MESH_EXTRA: PropertyDesc = PropertyDesc::new("TestMesh", "extra", "Array<ResourceRef>");
const MESH_PARTS: PropertyDesc = PropertyDesc::new("TestMesh", "parts", "Array<ObjectPtr>");

#[derive(Debug, Default)]
pub struct TestMesh {
    pub name: String,
    pub vertices: DataBuffer,
    pub material: ResourceRef,
    pub extra: Vec<ResourceRef>,
    pub parts: Vec<ObjectPtr>,
}

impl TestMesh {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            ..Default::default()
        }
    }

    pub fn with_vertices(mut self, data: &[u8]) -> Self {
        self.vertices = DataBuffer::from_bytes(Bytes::copy_from_slice(data));
        self
    }

    pub fn with_material(mut self, material: ResourceRef) -> Self {
        self.material = material;
        self
    }

    pub fn with_part(mut self, part: &ObjectPtr) -> Self {
        self.parts.push(part.clone());
        self
    }

    /// Vertex bytes, materialized.
    pub fn vertex_bytes(&self) -> Option<Bytes> {
        self.vertices.materialize().ok().flatten()
    }
}

impl Serializable for TestMesh {
    fn write_binary(&self, writer: &mut BinaryWriter<'_>) -> StreamResult<()> {
        writer.write_property(&MESH_NAME, |w| w.write_string(&self.name))?;
        writer.write_property(&MESH_VERTICES, |w| w.write_buffer(&self.vertices))?;
        writer.write_property(&MESH_MATERIAL, |w| w.write_resource(&self.material))?;
        writer.write_property(&MESH_EXTRA, |w| {
            w.write_u32(self.extra.len() as u32)?;
            self.extra.iter().try_for_each(|r| w.write_resource(r))
        })?;
        writer.write_property(&MESH_PARTS, |w| {
            w.write_u32(self.parts.len() as u32)?;
            self.parts.iter().try_for_each(|p| w.write_pointer(Some(p)))
        })?;
        writer.end_properties()
    }

    fn read_binary(&mut self, reader: &mut BinaryReader<'_>) -> StreamResult<()> {
        reader.read_properties(|r, property| {
            match property.name.as_str() {
                "name" => self.name = r.read_string()?,
                "vertices" => self.vertices = r.read_buffer()?,
                "material" => self.material = r.read_resource()?,
                "extra" => {
                    let count = r.read_u32()?;
                    self.extra = (0..count)
                        .map(|_| r.read_resource())
                        .collect::<StreamResult<_>>()?;
                }
                "parts" => {
                    let count = r.read_u32()?;
                    self.parts.clear();
                    for _ in 0..count {
                        if let Some(part) = r.read_pointer()? {
                            self.parts.push(part);
                        }
                    }
                }
                _ => {}
            }
            Ok(())
        })
    }
}

impl Object for TestMesh {
    fn class_name(&self) -> &str {
        "TestMesh"
    }
}

// ---------------------------------------------------------------------------
// TestMetadata
// ---------------------------------------------------------------------------

const METADATA_AUTHOR: PropertyDesc = PropertyDesc::new("TestMetadata", "author", "String");
const METADATA_VERSION: PropertyDesc = PropertyDesc::new("TestMetadata", "version", "Uint32");

#[derive(Debug, Default)]
pub struct TestMetadata {
    pub author: String,
    pub version: u32,
}

impl TestMetadata {
    pub fn new(author: &str, version: u32) -> Self {
        Self {
            author: author.to_owned(),
            version,
        }
    }
}

impl Serializable for TestMetadata {
    fn write_binary(&self, writer: &mut BinaryWriter<'_>) -> StreamResult<()> {
        writer.write_property(&METADATA_AUTHOR, |w| w.write_string(&self.author))?;
        writer.write_property(&METADATA_VERSION, |w| w.write_u32(self.version))?;
        writer.end_properties()
    }

    fn read_binary(&mut self, reader: &mut BinaryReader<'_>) -> StreamResult<()> {
        reader.read_properties(|r, property| {
            match property.name.as_str() {
                "author" => self.author = r.read_string()?,
                "version" => self.version = r.read_u32()?,
                _ => {}
            }
            Ok(())
        })
    }
}

impl Object for TestMetadata {
    fn class_name(&self) -> &str {
        "TestMetadata"
    }
}

// ---------------------------------------------------------------------------
// Misbehaving objects
// ---------------------------------------------------------------------------

/// Reads one more word than it writes.
#[derive(Debug, Default)]
pub struct TestGreedy {
    pub value: u32,
}

impl Serializable for TestGreedy {
    fn write_binary(&self, writer: &mut BinaryWriter<'_>) -> StreamResult<()> {
        writer.write_u32(self.value)
    }

    fn read_binary(&mut self, reader: &mut BinaryReader<'_>) -> StreamResult<()> {
        self.value = reader.read_u32()?;
        reader.read_u32()?;
        Ok(())
    }
}

impl Object for TestGreedy {
    fn class_name(&self) -> &str {
        "TestGreedy"
    }
}

/// Always fails to read.
#[derive(Debug, Default)]
pub struct TestFailing;

impl Serializable for TestFailing {
    fn write_binary(&self, writer: &mut BinaryWriter<'_>) -> StreamResult<()> {
        writer.write_u8(0xAB)
    }

    fn read_binary(&mut self, reader: &mut BinaryReader<'_>) -> StreamResult<()> {
        Err(StreamError::InvalidData {
            offset: reader.position(),
            reason: "refusing to read".into(),
        })
    }
}

impl Object for TestFailing {
    fn class_name(&self) -> &str {
        "TestFailing"
    }
}

// ---------------------------------------------------------------------------
// Registries
// ---------------------------------------------------------------------------

fn object_descriptor(with_value: bool) -> TypeDescriptor {
    let desc = TypeDescriptor::class("TestObject", || Box::new(TestObject::default()))
        .with_property("data", "String")
        .with_property("ref", "ObjectPtr");
    if with_value {
        desc.with_property("value", "Int32")
    } else {
        desc
    }
}

fn base_registry(with_value: bool) -> TypeRegistry {
    let mut registry = TypeRegistry::new();
    registry.register(TypeDescriptor::abstract_class("TestAsset"));
    registry.register(object_descriptor(with_value));
    registry.register(
        TypeDescriptor::class("TestObjectV2", || Box::new(TestObjectV2::default()))
            .with_base("TestObject"),
    );
    registry.register(
        TypeDescriptor::class("TestMesh", || Box::new(TestMesh::default()))
            .with_base("TestAsset")
            .with_property("name", "String")
            .with_property("vertices", "Buffer")
            .with_property("material", "ResourceRef")
            .with_property("extra", "Array<ResourceRef>")
            .with_property("parts", "Array<ObjectPtr>"),
    );
    registry.register(TypeDescriptor::class("TestGreedy", || Box::new(TestGreedy::default())));
    registry.register(TypeDescriptor::class("TestFailing", || Box::new(TestFailing)));
    registry
}

fn metadata_descriptor() -> TypeDescriptor {
    TypeDescriptor::class("TestMetadata", || Box::new(TestMetadata::default()))
        .with_base("TestAsset")
        .with_property("author", "String")
        .with_property("version", "Uint32")
}

/// Registry that knows every test type.
pub fn registry() -> Arc<TypeRegistry> {
    let mut registry = base_registry(true);
    registry.register(metadata_descriptor());
    Arc::new(registry)
}

/// Registry in which `TestObject.value` and the whole `TestMetadata` class
/// were removed after the files were written.
pub fn drifted_registry() -> Arc<TypeRegistry> {
    Arc::new(base_registry(false))
}

// ---------------------------------------------------------------------------
// Save / load helpers
// ---------------------------------------------------------------------------

pub fn save_bytes(roots: &[ObjectPtr], config: SaverConfig) -> Vec<u8> {
    let mut out = Cursor::new(Vec::new());
    BinarySaver::new(config)
        .save(&mut out, &SaveContext::new(roots.to_vec()))
        .unwrap();
    out.into_inner()
}

pub async fn load_bytes(
    data: &[u8],
    config: LoaderConfig,
    context: &LoadContext,
) -> LoadResult<LoadedObjects> {
    BinaryLoader::new(config)
        .load_from_bytes(Bytes::copy_from_slice(data), context)
        .await
}

/// In-memory file that records every read as `(offset, size)`.
#[derive(Debug)]
pub struct RecordingSource {
    data: Bytes,
    reads: Mutex<Vec<(u64, usize)>>,
}

impl RecordingSource {
    pub fn new(data: &[u8]) -> Arc<Self> {
        Arc::new(Self {
            data: Bytes::copy_from_slice(data),
            reads: Mutex::new(Vec::new()),
        })
    }

    pub fn reads(&self) -> Vec<(u64, usize)> {
        self.reads.lock().unwrap().clone()
    }

    /// Reads that touched any byte of `[start, end)`.
    pub fn reads_within(&self, start: u64, end: u64) -> usize {
        self.reads()
            .iter()
            .filter(|(offset, size)| *offset < end && offset + *size as u64 > start)
            .count()
    }

    pub fn clear(&self) {
        self.reads.lock().unwrap().clear();
    }
}

impl FileSource for RecordingSource {
    fn len(&self) -> u64 {
        self.data.len() as u64
    }

    fn read_at(&self, offset: u64, size: usize) -> io::Result<Bytes> {
        self.reads.lock().unwrap().push((offset, size));
        self.data.read_at(offset, size)
    }
}
