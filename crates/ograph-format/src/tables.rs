use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{FormatError, FormatResult};
use crate::header::{
    le_u32, ChunkDesc, ChunkKind, ChunkMask, FileHeader, HEADER_SIZE, PREAMBLE_SIZE,
};
use crate::records::{BufferRecord, ExportRecord, ImportRecord, PropertyRecord, SourceRecord};

/// Options controlling how strictly tables are checked on load.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TableLoadOptions {
    /// Verify header and chunk CRCs and the export/buffer layout.
    pub verify_crc: bool,
    /// Upper bound on any single chunk's byte size.
    pub max_table_size: u64,
}

impl Default for TableLoadOptions {
    fn default() -> Self {
        Self {
            verify_crc: true,
            max_table_size: 64 * 1024 * 1024, // 64 MiB
        }
    }
}

/// In-memory image of a file's header and index chunks.
///
/// Created fresh for every save or load and discarded once consumed.
#[derive(Clone, Debug, Default)]
pub struct FileTables {
    pub header: FileHeader,
    /// NUL-terminated strings; offset 0 is the empty string.
    pub strings: Vec<u8>,
    /// String offset of each name (1-based name index).
    pub names: Vec<u32>,
    pub imports: Vec<ImportRecord>,
    pub properties: Vec<PropertyRecord>,
    pub exports: Vec<ExportRecord>,
    pub buffers: Vec<BufferRecord>,
    pub sources: Vec<SourceRecord>,
    /// Stream position of the header when loaded; not stored.
    pub base_offset: u64,
}

impl FileTables {
    // -----------------------------------------------------------------------
    // Save
    // -----------------------------------------------------------------------

    /// Write the header and every chunk at the writer's current position.
    ///
    /// Writes a placeholder header, the chunk bodies, then seeks back and
    /// rewrites the header with offsets, bounds and CRCs. Leaves the writer
    /// positioned after the last chunk and returns that position relative to
    /// the header start. Called twice per save: once to reserve space, and
    /// again after export and buffer records have been patched.
    pub fn save<W: Write + Seek>(&mut self, writer: &mut W) -> FormatResult<u64> {
        let base = writer.stream_position()?;
        writer.write_all(&[0u8; HEADER_SIZE])?;

        for kind in ChunkKind::ALL {
            let bytes = self.chunk_bytes(kind);
            let offset = writer.stream_position()? - base;
            let count = bytes.len() / kind.element_size();
            *self.header.chunk_mut(kind) = ChunkDesc {
                offset: to_u32(offset, "chunk offset")?,
                count: to_u32(count as u64, "chunk element count")?,
                crc: crc32fast::hash(&bytes),
            };
            writer.write_all(&bytes)?;
        }

        let end = writer.stream_position()?;
        let tables_end = end - base;
        let objects_end = self
            .exports
            .last()
            .map(|e| e.data_offset as u64 + e.data_size as u64)
            .unwrap_or(tables_end)
            .max(tables_end);
        let buffers_end = self
            .buffers
            .last()
            .map(|b| b.data_offset as u64 + b.size_on_disk as u64)
            .unwrap_or(objects_end)
            .max(objects_end);
        self.header.objects_end = to_u32(objects_end, "objects end")?;
        self.header.buffers_end = to_u32(buffers_end, "buffers end")?;
        self.header.crc = 0;
        self.header.crc = self.header.compute_crc();

        writer.seek(SeekFrom::Start(base))?;
        writer.write_all(&self.header.to_bytes())?;
        writer.seek(SeekFrom::Start(end))?;

        debug!(
            tables_end,
            exports = self.exports.len(),
            buffers = self.buffers.len(),
            "file tables written"
        );
        Ok(tables_end)
    }

    fn chunk_bytes(&self, kind: ChunkKind) -> Vec<u8> {
        let mut out = Vec::new();
        match kind {
            ChunkKind::Strings => out.extend_from_slice(&self.strings),
            ChunkKind::Names => {
                for offset in &self.names {
                    out.extend_from_slice(&offset.to_le_bytes());
                }
            }
            ChunkKind::Imports => self.imports.iter().for_each(|r| r.encode(&mut out)),
            ChunkKind::Properties => self.properties.iter().for_each(|r| r.encode(&mut out)),
            ChunkKind::Exports => self.exports.iter().for_each(|r| r.encode(&mut out)),
            ChunkKind::Buffers => self.buffers.iter().for_each(|r| r.encode(&mut out)),
            ChunkKind::Sources => self.sources.iter().for_each(|r| r.encode(&mut out)),
        }
        out
    }

    // -----------------------------------------------------------------------
    // Load
    // -----------------------------------------------------------------------

    /// Read the header and the chunks selected by `mask` from the reader's
    /// current position.
    ///
    /// The 8-byte preamble is validated before anything else is read, so a
    /// foreign or corrupt file costs only a few bytes.
    pub fn load<R: Read + Seek>(
        reader: &mut R,
        mask: ChunkMask,
        options: &TableLoadOptions,
    ) -> FormatResult<Self> {
        let base = reader.stream_position()?;

        let mut raw = [0u8; HEADER_SIZE];
        let mut preamble = [0u8; PREAMBLE_SIZE];
        read_exact_at(reader, &mut preamble, base)?;
        FileHeader::check_preamble(&preamble)?;
        raw[..PREAMBLE_SIZE].copy_from_slice(&preamble);
        read_exact_at(reader, &mut raw[PREAMBLE_SIZE..], base + PREAMBLE_SIZE as u64)?;

        let header = FileHeader::from_bytes(&raw);
        if options.verify_crc {
            let actual = header.compute_crc();
            if actual != header.crc {
                return Err(FormatError::HeaderCrcMismatch {
                    expected: header.crc,
                    actual,
                });
            }
        }
        let stream_end = reader.seek(SeekFrom::End(0))?;
        header.validate(options.max_table_size, stream_end.saturating_sub(base))?;

        let mut tables = FileTables {
            header,
            base_offset: base,
            ..FileTables::default()
        };

        for kind in ChunkKind::ALL {
            if !mask.contains(kind) {
                continue;
            }
            let desc = *tables.header.chunk(kind);
            // Extent already checked against the stream by `validate`.
            let size = tables.header.chunk_size(kind) as usize;
            let mut bytes = vec![0u8; size];
            if size > 0 {
                reader.seek(SeekFrom::Start(base + desc.offset as u64))?;
                read_exact_at(reader, &mut bytes, base + desc.offset as u64)?;
            }
            if options.verify_crc {
                let actual = crc32fast::hash(&bytes);
                if actual != desc.crc {
                    return Err(FormatError::ChunkCrcMismatch {
                        chunk: kind,
                        expected: desc.crc,
                        actual,
                    });
                }
            }
            tables.decode_chunk(kind, &bytes);
        }

        if mask.contains(ChunkKind::Strings) && tables.strings.first().is_some_and(|b| *b != 0) {
            return Err(FormatError::InvalidString { offset: 0 });
        }
        if mask.contains(ChunkKind::Exports) {
            tables.validate_parents()?;
        }
        if options.verify_crc && mask.contains(ChunkKind::Exports) {
            tables.validate_layout(mask.contains(ChunkKind::Buffers))?;
        }

        debug!(
            version = tables.header.version,
            names = tables.names.len(),
            imports = tables.imports.len(),
            exports = tables.exports.len(),
            buffers = tables.buffers.len(),
            "file tables loaded"
        );
        Ok(tables)
    }

    fn decode_chunk(&mut self, kind: ChunkKind, bytes: &[u8]) {
        let records = bytes.chunks_exact(kind.element_size());
        match kind {
            ChunkKind::Strings => self.strings = bytes.to_vec(),
            ChunkKind::Names => self.names = records.map(|b| le_u32(b, 0)).collect(),
            ChunkKind::Imports => self.imports = records.map(ImportRecord::decode).collect(),
            ChunkKind::Properties => {
                self.properties = records.map(PropertyRecord::decode).collect()
            }
            ChunkKind::Exports => self.exports = records.map(ExportRecord::decode).collect(),
            ChunkKind::Buffers => self.buffers = records.map(BufferRecord::decode).collect(),
            ChunkKind::Sources => self.sources = records.map(SourceRecord::decode).collect(),
        }
    }

    /// Every parent index must point at an earlier export.
    fn validate_parents(&self) -> FormatResult<()> {
        for (i, export) in self.exports.iter().enumerate() {
            let index = i as u64 + 1;
            if export.parent as u64 >= index {
                return Err(FormatError::LayoutViolation {
                    what: format!("parent of export {index}"),
                    expected: index - 1,
                    actual: export.parent as u64,
                });
            }
        }
        Ok(())
    }

    /// Walk exports (and optionally buffers) in order and check that each
    /// body starts exactly where the previous one ended. Catches tables that
    /// alias two bodies onto the same bytes.
    pub fn validate_layout(&self, include_buffers: bool) -> FormatResult<()> {
        let mut expected = self.header.tables_end();
        for (i, export) in self.exports.iter().enumerate() {
            if export.data_offset as u64 != expected {
                return Err(FormatError::LayoutViolation {
                    what: format!("export {}", i + 1),
                    expected,
                    actual: export.data_offset as u64,
                });
            }
            expected += export.data_size as u64;
        }
        if self.header.objects_end as u64 != expected {
            return Err(FormatError::LayoutViolation {
                what: "objects end".into(),
                expected,
                actual: self.header.objects_end as u64,
            });
        }
        if !include_buffers {
            return Ok(());
        }
        for (i, buffer) in self.buffers.iter().enumerate() {
            if buffer.data_offset as u64 != expected {
                return Err(FormatError::LayoutViolation {
                    what: format!("buffer {}", i + 1),
                    expected,
                    actual: buffer.data_offset as u64,
                });
            }
            expected += buffer.size_on_disk as u64;
        }
        if self.header.buffers_end as u64 != expected {
            return Err(FormatError::LayoutViolation {
                what: "buffers end".into(),
                expected,
                actual: self.header.buffers_end as u64,
            });
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Lookups
    // -----------------------------------------------------------------------

    /// String stored at `offset` in the strings chunk.
    pub fn string_at(&self, offset: u32) -> FormatResult<&str> {
        let start = offset as usize;
        let tail = self
            .strings
            .get(start..)
            .ok_or(FormatError::InvalidString { offset })?;
        let len = tail
            .iter()
            .position(|b| *b == 0)
            .ok_or(FormatError::InvalidString { offset })?;
        std::str::from_utf8(&tail[..len]).map_err(|_| FormatError::InvalidString { offset })
    }

    /// Text of the 1-based name `index`; `None` for index 0.
    pub fn name(&self, index: u32) -> FormatResult<Option<&str>> {
        if index == 0 {
            return Ok(None);
        }
        let offset = *self
            .names
            .get(index as usize - 1)
            .ok_or(FormatError::IndexOutOfRange {
                table: "names",
                index,
                len: self.names.len(),
            })?;
        self.string_at(offset).map(Some)
    }

    /// Like [`FileTables::name`] but mapping unknown indices to `""` with a warning.
    pub fn name_or_empty(&self, index: u32) -> &str {
        match self.name(index) {
            Ok(name) => name.unwrap_or(""),
            Err(e) => {
                warn!(index, error = %e, "unresolvable name index");
                ""
            }
        }
    }

    /// Byte range `[start, end)` of an export body, relative to the header.
    pub fn export_range(&self, export: &ExportRecord) -> (u64, u64) {
        let start = export.data_offset as u64;
        (start, start + export.data_size as u64)
    }
}

fn to_u32(value: u64, what: &str) -> FormatResult<u32> {
    u32::try_from(value).map_err(|_| FormatError::TooLarge(format!("{what} {value}")))
}

/// `read_exact` that reports a short read as a truncation at `offset`.
pub(crate) fn read_exact_at<R: Read>(reader: &mut R, buf: &mut [u8], offset: u64) -> FormatResult<()> {
    reader.read_exact(buf).map_err(|e| match e.kind() {
        ErrorKind::UnexpectedEof => FormatError::Truncated {
            offset,
            reason: format!("{} bytes expected", buf.len()),
        },
        _ => FormatError::Io(e),
    })
}
