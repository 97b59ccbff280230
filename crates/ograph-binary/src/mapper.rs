use std::collections::{BTreeMap, HashMap, HashSet};
use std::io;

use bytes::Bytes;
use ograph_format::ImportRecord;
use ograph_object::{
    BinaryWriter, DataMapper, MappedResource, ObjectPtr, PropertyDesc, ResourceRef, StreamResult,
};
use ograph_types::{ContentKey, Name, ResourcePath};
use tracing::debug;

use crate::error::{SaveError, SaveResult};

/// An external resource observed during mapping.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct MappedImport {
    pub path: ResourcePath,
    pub class: Name,
    pub flags: u32,
}

/// A distinct buffer observed during mapping.
#[derive(Clone, Debug)]
pub struct MappedBuffer {
    pub key: ContentKey,
    pub data: Bytes,
}

/// Save-time analysis pass.
///
/// Drives every reachable object's [`Serializable::write_binary`] against a
/// null sink and records what it touches. Because the real write runs the
/// same code, the write pass can only ever ask for values recorded here.
///
/// Exports are numbered in discovery order, except that an object's
/// ancestors inside the save closure are always numbered before it.
///
/// [`Serializable::write_binary`]: ograph_object::Serializable::write_binary
pub struct StructureMapper {
    roots: Vec<ObjectPtr>,
    root_set: HashSet<ObjectPtr>,

    exports: Vec<ObjectPtr>,
    export_index: HashMap<ObjectPtr, u32>,
    pending: Vec<ObjectPtr>,

    names: Vec<Name>,
    name_set: HashSet<Name>,
    properties: Vec<PropertyDesc>,
    property_set: HashSet<PropertyDesc>,
    imports: Vec<MappedImport>,
    import_index: HashMap<MappedImport, u32>,
    buffers: Vec<MappedBuffer>,
    buffer_index: HashMap<ContentKey, u32>,
    used_resources: BTreeMap<ResourcePath, u32>,
}

impl StructureMapper {
    pub fn new(roots: &[ObjectPtr]) -> Self {
        Self {
            roots: roots.to_vec(),
            root_set: roots.iter().cloned().collect(),
            exports: Vec::new(),
            export_index: HashMap::new(),
            pending: Vec::new(),
            names: Vec::new(),
            name_set: HashSet::new(),
            properties: Vec::new(),
            property_set: HashSet::new(),
            imports: Vec::new(),
            import_index: HashMap::new(),
            buffers: Vec::new(),
            buffer_index: HashMap::new(),
            used_resources: BTreeMap::new(),
        }
    }

    /// Walk the graph from the roots until no unvisited export remains.
    pub fn map(&mut self) -> SaveResult<()> {
        for root in self.roots.clone() {
            self.add_export(&root);
        }
        while let Some(object) = self.pending.pop() {
            self.visit(&object)?;
        }
        debug!(
            exports = self.exports.len(),
            names = self.names.len(),
            properties = self.properties.len(),
            imports = self.imports.len(),
            buffers = self.buffers.len(),
            "structure mapped"
        );
        Ok(())
    }

    fn visit(&mut self, object: &ObjectPtr) -> SaveResult<()> {
        let export = self.export_index(object).unwrap_or(0);
        let mut sink = io::sink();
        let body = object.read();
        let mut writer = BinaryWriter::new(&mut sink, self);
        body.write_binary(&mut writer).map_err(|source| SaveError::Stream {
            export,
            class: object.class().clone(),
            source,
        })
    }

    /// An object is saved with the file when it is a root or lives under one.
    pub fn should_save(&self, object: &ObjectPtr) -> bool {
        if self.root_set.contains(object) {
            return true;
        }
        let mut current = object.parent();
        while let Some(parent) = current {
            if self.root_set.contains(&parent) {
                return true;
            }
            current = parent.parent();
        }
        false
    }

    fn add_export(&mut self, object: &ObjectPtr) -> u32 {
        if let Some(&index) = self.export_index.get(object) {
            return index;
        }

        // Saved ancestors first, outermost first. Roots are not exempt: a root
        // may live under another root.
        if self.should_save(object) {
            let mut chain = Vec::new();
            let mut current = object.parent();
            while let Some(parent) = current {
                if self.export_index.contains_key(&parent) || !self.should_save(&parent) {
                    break;
                }
                current = parent.parent();
                chain.push(parent);
            }
            for ancestor in chain.into_iter().rev() {
                self.push_export(ancestor);
            }
        }
        self.push_export(object.clone())
    }

    fn push_export(&mut self, object: ObjectPtr) -> u32 {
        self.record_name(object.class());
        self.exports.push(object.clone());
        let index = self.exports.len() as u32;
        self.export_index.insert(object.clone(), index);
        self.pending.push(object);
        index
    }

    fn record_name(&mut self, name: &Name) {
        if !name.is_none() && self.name_set.insert(name.clone()) {
            self.names.push(name.clone());
        }
    }

    /// The export a resource reference resolves to, if it is stored in this
    /// file rather than imported.
    pub(crate) fn internal_target<'r>(&self, reference: &'r ResourceRef) -> Option<&'r ObjectPtr> {
        let handle = reference.handle.as_ref()?;
        (reference.path.is_empty() || self.should_save(handle)).then_some(handle)
    }

    // -----------------------------------------------------------------------
    // Results
    // -----------------------------------------------------------------------

    pub fn exports(&self) -> &[ObjectPtr] {
        &self.exports
    }

    pub fn export_index(&self, object: &ObjectPtr) -> Option<u32> {
        self.export_index.get(object).copied()
    }

    /// Parent export of the 1-based export `index`, or 0 when the live parent
    /// is not saved with the file.
    pub fn parent_index(&self, index: u32) -> u32 {
        let Some(object) = index.checked_sub(1).and_then(|i| self.exports.get(i as usize)) else {
            return 0;
        };
        if !self.should_save(object) {
            return 0;
        }
        object
            .parent()
            .filter(|parent| self.should_save(parent))
            .and_then(|parent| self.export_index(&parent))
            .filter(|parent| *parent < index)
            .unwrap_or(0)
    }

    pub fn names(&self) -> &[Name] {
        &self.names
    }

    pub fn properties(&self) -> &[PropertyDesc] {
        &self.properties
    }

    pub fn imports(&self) -> &[MappedImport] {
        &self.imports
    }

    pub fn buffers(&self) -> &[MappedBuffer] {
        &self.buffers
    }

    pub fn buffer_index(&self, key: &ContentKey) -> Option<u32> {
        self.buffer_index.get(key).copied()
    }

    /// Number of times each external resource path was referenced.
    pub fn used_resources(&self) -> &BTreeMap<ResourcePath, u32> {
        &self.used_resources
    }
}

impl DataMapper for StructureMapper {
    fn map_name(&mut self, name: &Name) -> StreamResult<u32> {
        self.record_name(name);
        Ok(0)
    }

    fn map_type(&mut self, type_name: &Name) -> StreamResult<u32> {
        self.record_name(type_name);
        Ok(0)
    }

    fn map_property(&mut self, property: &PropertyDesc) -> StreamResult<u32> {
        if self.property_set.insert(*property) {
            self.record_name(&Name::new(property.class));
            self.record_name(&Name::new(property.type_name));
            self.record_name(&Name::new(property.name));
            self.properties.push(*property);
        }
        Ok(0)
    }

    fn map_pointer(&mut self, object: &ObjectPtr) -> StreamResult<u32> {
        Ok(self.add_export(object))
    }

    fn map_resource_reference(&mut self, reference: &ResourceRef) -> StreamResult<MappedResource> {
        if let Some(target) = self.internal_target(reference) {
            let target = target.clone();
            return Ok(MappedResource::Export(self.add_export(&target)));
        }

        *self.used_resources.entry(reference.path.clone()).or_insert(0) += 1;
        self.record_name(&reference.class);
        let import = MappedImport {
            path: reference.path.clone(),
            class: reference.class.clone(),
            flags: ImportRecord::flags_for(reference.must_load, reference.must_fully_load),
        };
        if let Some(&index) = self.import_index.get(&import) {
            return Ok(MappedResource::Import(index));
        }
        self.imports.push(import.clone());
        let index = self.imports.len() as u32;
        self.import_index.insert(import, index);
        Ok(MappedResource::Import(index))
    }

    fn map_buffer(&mut self, data: &Bytes) -> StreamResult<u32> {
        let key = ContentKey::of(data);
        if let Some(&index) = self.buffer_index.get(&key) {
            return Ok(index);
        }
        self.buffers.push(MappedBuffer {
            key,
            data: data.clone(),
        });
        let index = self.buffers.len() as u32;
        self.buffer_index.insert(key, index);
        Ok(index)
    }
}

/// Map the graph under `roots` and report how often each external resource
/// path is referenced, without writing anything.
pub fn extract_used_resources(roots: &[ObjectPtr]) -> SaveResult<BTreeMap<ResourcePath, u32>> {
    let mut mapper = StructureMapper::new(roots);
    mapper.map()?;
    Ok(mapper.used_resources)
}
