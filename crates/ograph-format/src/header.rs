use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{FormatError, FormatResult};

/// File magic, "OPH1" in little-endian byte order.
pub const MAGIC: u32 = 0x3148_504F;

/// Newest format version this crate reads and the one it writes.
pub const FORMAT_VERSION: u32 = 1;

/// Export bodies carry a CRC32 that the loader verifies.
pub const FLAG_PROTECTED_LAYOUT: u32 = 1 << 0;

/// Magic + version, read and validated before the rest of the header.
pub const PREAMBLE_SIZE: usize = 8;

/// Number of chunks in a file.
pub const CHUNK_COUNT: usize = 7;

/// Size of one chunk descriptor: offset, count, crc.
pub const CHUNK_DESC_SIZE: usize = 12;

/// Fixed header size in bytes.
pub const HEADER_SIZE: usize = 28 + CHUNK_COUNT * CHUNK_DESC_SIZE;

const _: () = assert!(HEADER_SIZE == 112);

/// Byte position of the header CRC field.
const CRC_FIELD: usize = 20;

/// The seven index chunks, in on-disk order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ChunkKind {
    Strings = 0,
    Names = 1,
    Imports = 2,
    Properties = 3,
    Exports = 4,
    Buffers = 5,
    Sources = 6,
}

impl ChunkKind {
    pub const ALL: [ChunkKind; CHUNK_COUNT] = [
        ChunkKind::Strings,
        ChunkKind::Names,
        ChunkKind::Imports,
        ChunkKind::Properties,
        ChunkKind::Exports,
        ChunkKind::Buffers,
        ChunkKind::Sources,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    /// Size of one element; the strings chunk counts bytes.
    pub fn element_size(self) -> usize {
        use crate::records::*;
        match self {
            Self::Strings => 1,
            Self::Names => NAME_RECORD_SIZE,
            Self::Imports => ImportRecord::SIZE,
            Self::Properties => PropertyRecord::SIZE,
            Self::Exports => ExportRecord::SIZE,
            Self::Buffers => BufferRecord::SIZE,
            Self::Sources => SourceRecord::SIZE,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Strings => "strings",
            Self::Names => "names",
            Self::Imports => "imports",
            Self::Properties => "properties",
            Self::Exports => "exports",
            Self::Buffers => "buffers",
            Self::Sources => "sources",
        }
    }
}

impl fmt::Display for ChunkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Selects which chunks a load reads.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChunkMask(u32);

impl ChunkMask {
    pub const NONE: Self = Self(0);
    pub const ALL: Self = Self((1 << CHUNK_COUNT) - 1);
    /// Enough to list the file's dependencies.
    pub const DEPENDENCIES: Self = Self(1 << 0 | 1 << 1 | 1 << 2);

    pub const fn with(self, chunk: ChunkKind) -> Self {
        Self(self.0 | 1 << chunk as u32)
    }

    pub fn contains(self, chunk: ChunkKind) -> bool {
        self.0 & (1 << chunk as u32) != 0
    }
}

impl Default for ChunkMask {
    fn default() -> Self {
        Self::ALL
    }
}

/// Location and checksum of one chunk.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkDesc {
    /// Offset relative to the header start.
    pub offset: u32,
    /// Element count (byte count for strings).
    pub count: u32,
    /// CRC32 of the raw chunk bytes.
    pub crc: u32,
}

/// Fixed-size file header.
///
/// On-disk layout (little-endian):
/// ```text
/// [4: magic] [4: version] [4: flags] [4: objects_end] [4: buffers_end]
/// [4: crc]   [4: num_chunks] [7 x 12: chunk descriptors]
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileHeader {
    pub magic: u32,
    pub version: u32,
    pub flags: u32,
    pub objects_end: u32,
    pub buffers_end: u32,
    pub crc: u32,
    pub num_chunks: u32,
    pub chunks: [ChunkDesc; CHUNK_COUNT],
}

impl Default for FileHeader {
    fn default() -> Self {
        Self {
            magic: MAGIC,
            version: FORMAT_VERSION,
            flags: 0,
            objects_end: 0,
            buffers_end: 0,
            crc: 0,
            num_chunks: CHUNK_COUNT as u32,
            chunks: [ChunkDesc::default(); CHUNK_COUNT],
        }
    }
}

impl FileHeader {
    pub fn chunk(&self, kind: ChunkKind) -> &ChunkDesc {
        &self.chunks[kind.index()]
    }

    pub fn chunk_mut(&mut self, kind: ChunkKind) -> &mut ChunkDesc {
        &mut self.chunks[kind.index()]
    }

    pub fn has_flag(&self, flag: u32) -> bool {
        self.flags & flag != 0
    }

    /// Byte size of a chunk's body.
    pub fn chunk_size(&self, kind: ChunkKind) -> u64 {
        self.chunk(kind).count as u64 * kind.element_size() as u64
    }

    /// Offset of the first byte after the last chunk body.
    pub fn tables_end(&self) -> u64 {
        ChunkKind::ALL
            .iter()
            .map(|&k| self.chunk(k).offset as u64 + self.chunk_size(k))
            .max()
            .unwrap_or(HEADER_SIZE as u64)
            .max(HEADER_SIZE as u64)
    }

    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut out = [0u8; HEADER_SIZE];
        let fields = [
            self.magic,
            self.version,
            self.flags,
            self.objects_end,
            self.buffers_end,
            self.crc,
            self.num_chunks,
        ];
        for (i, value) in fields.iter().enumerate() {
            out[i * 4..i * 4 + 4].copy_from_slice(&value.to_le_bytes());
        }
        for (i, chunk) in self.chunks.iter().enumerate() {
            let at = 28 + i * CHUNK_DESC_SIZE;
            out[at..at + 4].copy_from_slice(&chunk.offset.to_le_bytes());
            out[at + 4..at + 8].copy_from_slice(&chunk.count.to_le_bytes());
            out[at + 8..at + 12].copy_from_slice(&chunk.crc.to_le_bytes());
        }
        out
    }

    pub fn from_bytes(bytes: &[u8; HEADER_SIZE]) -> Self {
        let field = |i: usize| le_u32(bytes, i * 4);
        let mut chunks = [ChunkDesc::default(); CHUNK_COUNT];
        for (i, chunk) in chunks.iter_mut().enumerate() {
            let at = 28 + i * CHUNK_DESC_SIZE;
            *chunk = ChunkDesc {
                offset: le_u32(bytes, at),
                count: le_u32(bytes, at + 4),
                crc: le_u32(bytes, at + 8),
            };
        }
        Self {
            magic: field(0),
            version: field(1),
            flags: field(2),
            objects_end: field(3),
            buffers_end: field(4),
            crc: field(5),
            num_chunks: field(6),
            chunks,
        }
    }

    /// CRC32 of the serialized header with the CRC field held at zero.
    pub fn compute_crc(&self) -> u32 {
        let mut bytes = self.to_bytes();
        bytes[CRC_FIELD..CRC_FIELD + 4].fill(0);
        crc32fast::hash(&bytes)
    }

    /// Validate magic and version from the preamble bytes alone.
    pub fn check_preamble(preamble: &[u8; PREAMBLE_SIZE]) -> FormatResult<u32> {
        let magic = le_u32(preamble, 0);
        if magic != MAGIC {
            return Err(FormatError::InvalidMagic {
                expected: MAGIC,
                actual: magic,
            });
        }
        let version = le_u32(preamble, 4);
        if version > FORMAT_VERSION {
            return Err(FormatError::UnsupportedVersion {
                version,
                max: FORMAT_VERSION,
            });
        }
        Ok(version)
    }

    /// Structural checks that need no CRC: chunk count, chunk bounds and
    /// table size limits. `available` is the number of stream bytes from the
    /// start of the header; every chunk must end within it.
    pub fn validate(&self, max_table_size: u64, available: u64) -> FormatResult<()> {
        if self.num_chunks as usize != CHUNK_COUNT {
            return Err(FormatError::InvalidHeader(format!(
                "expected {CHUNK_COUNT} chunks, header declares {}",
                self.num_chunks
            )));
        }
        for kind in ChunkKind::ALL {
            let chunk = self.chunk(kind);
            let size = self.chunk_size(kind);
            if size > max_table_size {
                return Err(FormatError::TableTooLarge {
                    chunk: kind,
                    size,
                    limit: max_table_size,
                });
            }
            if size > 0 && (chunk.offset as usize) < HEADER_SIZE {
                return Err(FormatError::InvalidHeader(format!(
                    "{kind} chunk at offset {} overlaps the header",
                    chunk.offset
                )));
            }
            let end = chunk.offset as u64 + size;
            if size > 0 && end > available {
                return Err(FormatError::ChunkOutOfBounds {
                    chunk: kind,
                    end,
                    len: available,
                });
            }
        }
        let tables_end = self.tables_end();
        if (self.objects_end as u64) < tables_end && self.objects_end != 0 {
            return Err(FormatError::InvalidHeader(format!(
                "objects end {} lies inside the index tables ending at {tables_end}",
                self.objects_end
            )));
        }
        if self.buffers_end < self.objects_end {
            return Err(FormatError::InvalidHeader(format!(
                "buffers end {} precedes objects end {}",
                self.buffers_end, self.objects_end
            )));
        }
        Ok(())
    }
}

pub(crate) fn le_u32(bytes: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
}

pub(crate) fn le_u64(bytes: &[u8], at: usize) -> u64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&bytes[at..at + 8]);
    u64::from_le_bytes(raw)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> FileHeader {
        let mut header = FileHeader {
            flags: FLAG_PROTECTED_LAYOUT,
            objects_end: 400,
            buffers_end: 900,
            ..FileHeader::default()
        };
        *header.chunk_mut(ChunkKind::Strings) = ChunkDesc { offset: HEADER_SIZE as u32, count: 40, crc: 7 };
        *header.chunk_mut(ChunkKind::Exports) = ChunkDesc { offset: 152, count: 3, crc: 9 };
        header
    }

    #[test]
    fn bytes_roundtrip() {
        let header = sample();
        assert_eq!(FileHeader::from_bytes(&header.to_bytes()), header);
    }

    #[test]
    fn magic_is_readable_ascii() {
        let bytes = FileHeader::default().to_bytes();
        assert_eq!(&bytes[..4], b"OPH1");
    }

    #[test]
    fn crc_ignores_crc_field() {
        let mut header = sample();
        let crc = header.compute_crc();
        header.crc = crc;
        assert_eq!(header.compute_crc(), crc);
    }

    #[test]
    fn crc_covers_other_fields() {
        let header = sample();
        let mut changed = header.clone();
        changed.objects_end += 1;
        assert_ne!(header.compute_crc(), changed.compute_crc());
    }

    #[test]
    fn preamble_rejects_bad_magic() {
        let mut preamble = [0u8; PREAMBLE_SIZE];
        preamble[..4].copy_from_slice(b"BADM");
        let err = FileHeader::check_preamble(&preamble).unwrap_err();
        assert!(matches!(err, FormatError::InvalidMagic { .. }));
    }

    #[test]
    fn preamble_rejects_newer_version() {
        let mut preamble = [0u8; PREAMBLE_SIZE];
        preamble[..4].copy_from_slice(&MAGIC.to_le_bytes());
        preamble[4..].copy_from_slice(&99u32.to_le_bytes());
        let err = FileHeader::check_preamble(&preamble).unwrap_err();
        assert!(matches!(err, FormatError::UnsupportedVersion { version: 99, .. }));
    }

    #[test]
    fn preamble_accepts_current_version() {
        let bytes = FileHeader::default().to_bytes();
        let mut preamble = [0u8; PREAMBLE_SIZE];
        preamble.copy_from_slice(&bytes[..PREAMBLE_SIZE]);
        assert_eq!(FileHeader::check_preamble(&preamble).unwrap(), FORMAT_VERSION);
    }

    #[test]
    fn validate_rejects_wrong_chunk_count() {
        let header = FileHeader { num_chunks: 3, ..sample() };
        assert!(matches!(header.validate(u64::MAX, u64::MAX), Err(FormatError::InvalidHeader(_))));
    }

    #[test]
    fn validate_rejects_oversized_table() {
        let header = sample();
        let err = header.validate(10, u64::MAX).unwrap_err();
        assert!(matches!(err, FormatError::TableTooLarge { chunk: ChunkKind::Strings, .. }));
    }

    #[test]
    fn validate_rejects_chunk_past_stream_end() {
        let header = sample();
        assert!(header.validate(u64::MAX, 212).is_ok());
        let err = header.validate(u64::MAX, 200).unwrap_err();
        assert!(matches!(
            err,
            FormatError::ChunkOutOfBounds { chunk: ChunkKind::Exports, end: 212, len: 200 }
        ));
        assert!(err.to_string().contains("exports"));
    }

    #[test]
    fn tables_end_is_furthest_chunk() {
        let header = sample();
        assert_eq!(header.tables_end(), 152 + 3 * 20);
    }

    #[test]
    fn chunk_mask() {
        assert!(ChunkMask::ALL.contains(ChunkKind::Sources));
        assert!(ChunkMask::DEPENDENCIES.contains(ChunkKind::Imports));
        assert!(!ChunkMask::DEPENDENCIES.contains(ChunkKind::Exports));
        assert!(ChunkMask::NONE.with(ChunkKind::Buffers).contains(ChunkKind::Buffers));
    }
}
