use std::io::Write;
use std::sync::Arc;

use ograph_types::Name;
use tracing::debug;

use crate::buffer::DataBuffer;
use crate::error::{StreamError, StreamResult};
use crate::mapper::{DataMapper, DataUnmapper, MappedResource};
use crate::object::ObjectPtr;
use crate::reference::ResourceRef;
use crate::registry::{PropertyDesc, PropertyInfo, TypeDescriptor};

/// Property index that terminates a property list.
const END_OF_PROPERTIES: u32 = 0;

// ---------------------------------------------------------------------------
// Writer
// ---------------------------------------------------------------------------

/// Save-side stream handed to [`Serializable::write_binary`](crate::Serializable).
///
/// Plain values are written little-endian. Graph values (names, types,
/// pointers, resource references, buffers) go through the mapper and are
/// stored as ordinals.
///
/// Property blocks are framed as:
/// ```text
/// [4 bytes: property ordinal] [4 bytes: payload length] [payload]
/// ...
/// [4 bytes: 0]
/// ```
/// so a reader that no longer knows a property can skip it by length.
pub struct BinaryWriter<'a> {
    sink: &'a mut dyn Write,
    mapper: &'a mut dyn DataMapper,
    position: u64,
}

impl<'a> BinaryWriter<'a> {
    pub fn new(sink: &'a mut dyn Write, mapper: &'a mut dyn DataMapper) -> Self {
        Self {
            sink,
            mapper,
            position: 0,
        }
    }

    /// Bytes written so far.
    pub fn position(&self) -> u64 {
        self.position
    }

    pub fn write_bytes(&mut self, data: &[u8]) -> StreamResult<()> {
        self.sink.write_all(data)?;
        self.position += data.len() as u64;
        Ok(())
    }

    pub fn write_u8(&mut self, value: u8) -> StreamResult<()> {
        self.write_bytes(&[value])
    }

    pub fn write_u16(&mut self, value: u16) -> StreamResult<()> {
        self.write_bytes(&value.to_le_bytes())
    }

    pub fn write_u32(&mut self, value: u32) -> StreamResult<()> {
        self.write_bytes(&value.to_le_bytes())
    }

    pub fn write_u64(&mut self, value: u64) -> StreamResult<()> {
        self.write_bytes(&value.to_le_bytes())
    }

    pub fn write_i32(&mut self, value: i32) -> StreamResult<()> {
        self.write_bytes(&value.to_le_bytes())
    }

    pub fn write_i64(&mut self, value: i64) -> StreamResult<()> {
        self.write_bytes(&value.to_le_bytes())
    }

    pub fn write_f32(&mut self, value: f32) -> StreamResult<()> {
        self.write_bytes(&value.to_le_bytes())
    }

    pub fn write_f64(&mut self, value: f64) -> StreamResult<()> {
        self.write_bytes(&value.to_le_bytes())
    }

    pub fn write_bool(&mut self, value: bool) -> StreamResult<()> {
        self.write_u8(u8::from(value))
    }

    /// Length-prefixed byte block.
    pub fn write_blob(&mut self, data: &[u8]) -> StreamResult<()> {
        let len = u32::try_from(data.len()).map_err(|_| StreamError::InvalidData {
            offset: self.position,
            reason: format!("block of {} bytes exceeds the 4 GiB limit", data.len()),
        })?;
        self.write_u32(len)?;
        self.write_bytes(data)
    }

    /// Length-prefixed UTF-8 string.
    pub fn write_string(&mut self, text: &str) -> StreamResult<()> {
        self.write_blob(text.as_bytes())
    }

    pub fn write_name(&mut self, name: &Name) -> StreamResult<()> {
        let index = if name.is_none() {
            0
        } else {
            self.mapper.map_name(name)?
        };
        self.write_u32(index)
    }

    /// Reference to a live type by name.
    pub fn write_type(&mut self, type_name: &Name) -> StreamResult<()> {
        let index = if type_name.is_none() {
            0
        } else {
            self.mapper.map_type(type_name)?
        };
        self.write_u32(index)
    }

    pub fn write_pointer(&mut self, object: Option<&ObjectPtr>) -> StreamResult<()> {
        let index = match object {
            Some(object) => self.mapper.map_pointer(object)?,
            None => 0,
        };
        self.write_u32(index)
    }

    pub fn write_resource(&mut self, reference: &ResourceRef) -> StreamResult<()> {
        let mapped = if reference.is_null() {
            MappedResource::Null
        } else {
            self.mapper.map_resource_reference(reference)?
        };
        self.write_u8(mapped.tag())?;
        self.write_u32(mapped.index())
    }

    /// Buffers must be materializable at save time; latent buffers are loaded.
    pub fn write_buffer(&mut self, buffer: &DataBuffer) -> StreamResult<()> {
        let index = match buffer.materialize()? {
            Some(data) => self.mapper.map_buffer(&data)?,
            None => 0,
        };
        self.write_u32(index)
    }

    /// Write one framed property block whose payload is produced by `body`.
    pub fn write_property(
        &mut self,
        property: &PropertyDesc,
        body: impl FnOnce(&mut BinaryWriter<'_>) -> StreamResult<()>,
    ) -> StreamResult<()> {
        let index = self.mapper.map_property(property)?;
        let mut payload = Vec::new();
        {
            let mut inner = BinaryWriter::new(&mut payload, &mut *self.mapper);
            body(&mut inner)?;
        }
        self.write_u32(index)?;
        self.write_blob(&payload)
    }

    /// Terminate a property list started with [`BinaryWriter::write_property`].
    pub fn end_properties(&mut self) -> StreamResult<()> {
        self.write_u32(END_OF_PROPERTIES)
    }
}

// ---------------------------------------------------------------------------
// Reader
// ---------------------------------------------------------------------------

/// Load-side stream handed to [`Serializable::read_binary`](crate::Serializable).
///
/// The reader may be given more data than the object it is reading owns; the
/// caller compares [`BinaryReader::position`] against the recorded size
/// afterwards to detect objects that read past their bounds.
pub struct BinaryReader<'a> {
    data: &'a [u8],
    pos: usize,
    base: u64,
    unmapper: &'a mut dyn DataUnmapper,
}

impl<'a> BinaryReader<'a> {
    pub fn new(data: &'a [u8], unmapper: &'a mut dyn DataUnmapper) -> Self {
        Self {
            data,
            pos: 0,
            base: 0,
            unmapper,
        }
    }

    /// Absolute offset of `data[0]`, used in error messages.
    pub fn with_base_offset(mut self, base: u64) -> Self {
        self.base = base;
        self
    }

    /// Bytes consumed so far.
    pub fn position(&self) -> u64 {
        self.pos as u64
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    fn offset(&self) -> u64 {
        self.base + self.pos as u64
    }

    pub fn read_slice(&mut self, len: usize) -> StreamResult<&'a [u8]> {
        if len > self.remaining() {
            return Err(StreamError::Truncated {
                offset: self.offset(),
                needed: (len - self.remaining()) as u64,
            });
        }
        let data: &'a [u8] = self.data;
        let slice = &data[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    pub fn skip(&mut self, len: usize) -> StreamResult<()> {
        self.read_slice(len).map(|_| ())
    }

    fn read_array<const N: usize>(&mut self) -> StreamResult<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.read_slice(N)?);
        Ok(out)
    }

    pub fn read_u8(&mut self) -> StreamResult<u8> {
        Ok(self.read_array::<1>()?[0])
    }

    pub fn read_u16(&mut self) -> StreamResult<u16> {
        self.read_array().map(u16::from_le_bytes)
    }

    pub fn read_u32(&mut self) -> StreamResult<u32> {
        self.read_array().map(u32::from_le_bytes)
    }

    pub fn read_u64(&mut self) -> StreamResult<u64> {
        self.read_array().map(u64::from_le_bytes)
    }

    pub fn read_i32(&mut self) -> StreamResult<i32> {
        self.read_array().map(i32::from_le_bytes)
    }

    pub fn read_i64(&mut self) -> StreamResult<i64> {
        self.read_array().map(i64::from_le_bytes)
    }

    pub fn read_f32(&mut self) -> StreamResult<f32> {
        self.read_array().map(f32::from_le_bytes)
    }

    pub fn read_f64(&mut self) -> StreamResult<f64> {
        self.read_array().map(f64::from_le_bytes)
    }

    pub fn read_bool(&mut self) -> StreamResult<bool> {
        Ok(self.read_u8()? != 0)
    }

    /// Length-prefixed byte block, copied into a freshly allocated vector.
    pub fn read_blob(&mut self) -> StreamResult<Vec<u8>> {
        let len = self.read_u32()? as usize;
        let slice = self.read_slice(len)?;
        let mut out = Vec::new();
        out.try_reserve_exact(len)
            .map_err(|_| StreamError::AllocationFailed { size: len as u64 })?;
        out.extend_from_slice(slice);
        Ok(out)
    }

    pub fn read_string(&mut self) -> StreamResult<String> {
        let start = self.offset();
        let bytes = self.read_blob()?;
        String::from_utf8(bytes).map_err(|_| StreamError::InvalidUtf8 { offset: start })
    }

    pub fn read_name(&mut self) -> StreamResult<Name> {
        let index = self.read_u32()?;
        Ok(self.unmapper.unmap_name(index))
    }

    pub fn read_type(&mut self) -> StreamResult<Option<Arc<TypeDescriptor>>> {
        let index = self.read_u32()?;
        Ok(self.unmapper.unmap_type(index))
    }

    pub fn read_pointer(&mut self) -> StreamResult<Option<ObjectPtr>> {
        let index = self.read_u32()?;
        Ok(self.unmapper.unmap_pointer(index))
    }

    pub fn read_resource(&mut self) -> StreamResult<ResourceRef> {
        let offset = self.offset();
        let tag = self.read_u8()?;
        let index = self.read_u32()?;
        let mapped = match tag {
            MappedResource::TAG_NULL => MappedResource::Null,
            MappedResource::TAG_IMPORT => MappedResource::Import(index),
            MappedResource::TAG_EXPORT => MappedResource::Export(index),
            other => {
                return Err(StreamError::InvalidData {
                    offset,
                    reason: format!("unknown resource reference tag {other}"),
                })
            }
        };
        Ok(self.unmapper.unmap_resource_reference(mapped))
    }

    pub fn read_buffer(&mut self) -> StreamResult<DataBuffer> {
        let index = self.read_u32()?;
        Ok(self.unmapper.unmap_buffer(index))
    }

    /// Read a property list written with [`BinaryWriter::write_property`].
    ///
    /// `visit` is called for every block that binds to a live property and is
    /// positioned at the start of its payload. Blocks whose property no longer
    /// exists are skipped. Unread payload bytes are skipped too; reading past
    /// the block is an error.
    pub fn read_properties(
        &mut self,
        mut visit: impl FnMut(&mut BinaryReader<'a>, &PropertyInfo) -> StreamResult<()>,
    ) -> StreamResult<()> {
        loop {
            let index = self.read_u32()?;
            if index == END_OF_PROPERTIES {
                return Ok(());
            }
            let len = self.read_u32()? as usize;
            if len > self.remaining() {
                return Err(StreamError::Truncated {
                    offset: self.offset(),
                    needed: (len - self.remaining()) as u64,
                });
            }
            let end = self.pos + len;
            match self.unmapper.unmap_property(index) {
                Some(property) => {
                    visit(self, &*property)?;
                    if self.pos > end {
                        return Err(StreamError::PropertyOverrun {
                            property: property.name.clone(),
                            end: self.base + end as u64,
                        });
                    }
                }
                None => {
                    debug!(index, len, "skipping unbound property");
                }
            }
            self.pos = end;
        }
    }
}
