//! Fixed-size on-disk records. Every record is encoded field by field in
//! little-endian order; there is no implicit padding.

use ograph_types::ContentKey;

use crate::header::{le_u32, le_u64};

/// A name record is a single string offset.
pub const NAME_RECORD_SIZE: usize = 4;

/// Import flag: load the resource together with the importing file.
pub const IMPORT_MUST_LOAD: u32 = 1 << 0;
/// Import flag: the resource must be fully loaded, not just resident.
pub const IMPORT_MUST_FULLY_LOAD: u32 = 1 << 1;

/// Reference to a resource outside the file.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct ImportRecord {
    /// Offset of the path in the strings chunk.
    pub path: u32,
    /// 1-based name index of the expected class.
    pub class_name: u32,
    pub flags: u32,
}

impl ImportRecord {
    pub const SIZE: usize = 12;

    /// Flag word for an import with the given load requirements.
    pub fn flags_for(must_load: bool, must_fully_load: bool) -> u32 {
        let mut flags = 0;
        if must_load {
            flags |= IMPORT_MUST_LOAD;
        }
        if must_fully_load {
            flags |= IMPORT_MUST_FULLY_LOAD;
        }
        flags
    }

    pub fn must_load(&self) -> bool {
        self.flags & IMPORT_MUST_LOAD != 0
    }

    pub fn must_fully_load(&self) -> bool {
        self.flags & IMPORT_MUST_FULLY_LOAD != 0
    }

    pub fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.path.to_le_bytes());
        out.extend_from_slice(&self.class_name.to_le_bytes());
        out.extend_from_slice(&self.flags.to_le_bytes());
    }

    pub fn decode(b: &[u8]) -> Self {
        Self {
            path: le_u32(b, 0),
            class_name: le_u32(b, 4),
            flags: le_u32(b, 8),
        }
    }
}

/// Stored property identity plus its structural fingerprint.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct PropertyRecord {
    pub class_name: u32,
    pub type_name: u32,
    pub property_name: u32,
    pub hash: u64,
}

impl PropertyRecord {
    pub const SIZE: usize = 24;

    pub fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.class_name.to_le_bytes());
        out.extend_from_slice(&self.type_name.to_le_bytes());
        out.extend_from_slice(&self.property_name.to_le_bytes());
        out.extend_from_slice(&0u32.to_le_bytes());
        out.extend_from_slice(&self.hash.to_le_bytes());
    }

    pub fn decode(b: &[u8]) -> Self {
        Self {
            class_name: le_u32(b, 0),
            type_name: le_u32(b, 4),
            property_name: le_u32(b, 8),
            hash: le_u64(b, 16),
        }
    }
}

/// An object embedded in the file.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ExportRecord {
    pub class_name: u32,
    /// 1-based export index of the parent, or 0 for roots. Always smaller
    /// than this export's own index.
    pub parent: u32,
    pub data_offset: u32,
    pub data_size: u32,
    /// CRC32 of the body; only meaningful with a protected layout.
    pub crc: u32,
}

impl ExportRecord {
    pub const SIZE: usize = 20;

    pub fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.class_name.to_le_bytes());
        out.extend_from_slice(&self.parent.to_le_bytes());
        out.extend_from_slice(&self.data_offset.to_le_bytes());
        out.extend_from_slice(&self.data_size.to_le_bytes());
        out.extend_from_slice(&self.crc.to_le_bytes());
    }

    pub fn decode(b: &[u8]) -> Self {
        Self {
            class_name: le_u32(b, 0),
            parent: le_u32(b, 4),
            data_offset: le_u32(b, 8),
            data_size: le_u32(b, 12),
            crc: le_u32(b, 16),
        }
    }
}

/// A content-keyed data buffer.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BufferRecord {
    pub content_key: ContentKey,
    pub data_offset: u32,
    pub size_on_disk: u32,
    pub size_in_memory: u32,
    /// [`BufferCodec`](crate::codec::BufferCodec) id.
    pub codec: u32,
}

impl BufferRecord {
    pub const SIZE: usize = 24;

    pub fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.content_key.value().to_le_bytes());
        out.extend_from_slice(&self.data_offset.to_le_bytes());
        out.extend_from_slice(&self.size_on_disk.to_le_bytes());
        out.extend_from_slice(&self.size_in_memory.to_le_bytes());
        out.extend_from_slice(&self.codec.to_le_bytes());
    }

    pub fn decode(b: &[u8]) -> Self {
        Self {
            content_key: ContentKey::from_raw(le_u64(b, 0)),
            data_offset: le_u32(b, 8),
            size_on_disk: le_u32(b, 12),
            size_in_memory: le_u32(b, 16),
            codec: le_u32(b, 20),
        }
    }
}

/// Provenance: a source file the saved content was produced from.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SourceRecord {
    /// Offset of the path in the strings chunk.
    pub path: u32,
    pub size: u64,
    /// Seconds since the Unix epoch.
    pub timestamp: u64,
    pub content_key: ContentKey,
}

impl SourceRecord {
    pub const SIZE: usize = 32;

    pub fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.path.to_le_bytes());
        out.extend_from_slice(&0u32.to_le_bytes());
        out.extend_from_slice(&self.size.to_le_bytes());
        out.extend_from_slice(&self.timestamp.to_le_bytes());
        out.extend_from_slice(&self.content_key.value().to_le_bytes());
    }

    pub fn decode(b: &[u8]) -> Self {
        Self {
            path: le_u32(b, 0),
            size: le_u64(b, 8),
            timestamp: le_u64(b, 16),
            content_key: ContentKey::from_raw(le_u64(b, 24)),
        }
    }
}
