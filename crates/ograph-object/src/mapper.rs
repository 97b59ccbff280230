use std::sync::Arc;

use bytes::Bytes;
use ograph_types::Name;

use crate::buffer::DataBuffer;
use crate::error::StreamResult;
use crate::object::ObjectPtr;
use crate::reference::ResourceRef;
use crate::registry::{PropertyDesc, PropertyInfo, TypeDescriptor};

/// How a resource reference was stored.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MappedResource {
    Null,
    /// 1-based index into the import table.
    Import(u32),
    /// 1-based index into the export table.
    Export(u32),
}

impl MappedResource {
    pub const TAG_NULL: u8 = 0;
    pub const TAG_IMPORT: u8 = 1;
    pub const TAG_EXPORT: u8 = 2;

    pub fn tag(&self) -> u8 {
        match self {
            Self::Null => Self::TAG_NULL,
            Self::Import(_) => Self::TAG_IMPORT,
            Self::Export(_) => Self::TAG_EXPORT,
        }
    }

    pub fn index(&self) -> u32 {
        match self {
            Self::Null => 0,
            Self::Import(i) | Self::Export(i) => *i,
        }
    }
}

/// Save-time translation from live values to 1-based ordinals.
///
/// Index 0 always means "none". Implementations either record what they see
/// (the structure pass) or look up what was recorded (the write pass).
pub trait DataMapper {
    fn map_name(&mut self, name: &Name) -> StreamResult<u32>;
    fn map_type(&mut self, type_name: &Name) -> StreamResult<u32>;
    fn map_property(&mut self, property: &PropertyDesc) -> StreamResult<u32>;
    fn map_pointer(&mut self, object: &ObjectPtr) -> StreamResult<u32>;
    fn map_resource_reference(&mut self, reference: &ResourceRef) -> StreamResult<MappedResource>;
    fn map_buffer(&mut self, data: &Bytes) -> StreamResult<u32>;
}

/// Load-time translation from ordinals back to live values.
///
/// Out-of-range ordinals map to the null value.
pub trait DataUnmapper {
    fn unmap_name(&mut self, index: u32) -> Name;
    fn unmap_type(&mut self, index: u32) -> Option<Arc<TypeDescriptor>>;
    /// `None` when the stored property no longer binds to a live one.
    fn unmap_property(&mut self, index: u32) -> Option<Arc<PropertyInfo>>;
    fn unmap_pointer(&mut self, index: u32) -> Option<ObjectPtr>;
    fn unmap_resource_reference(&mut self, mapped: MappedResource) -> ResourceRef;
    fn unmap_buffer(&mut self, index: u32) -> DataBuffer;
}
