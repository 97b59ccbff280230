//! Structural report of a file, built from its tables alone.

use std::collections::BTreeMap;
use std::fmt;
use std::io::{Read, Seek};

use serde::Serialize;

use crate::codec::BufferCodec;
use crate::error::FormatResult;
use crate::header::{ChunkMask, FLAG_PROTECTED_LAYOUT};
use crate::tables::{FileTables, TableLoadOptions};

/// One buffer entry in a [`FileReport`].
#[derive(Debug, Clone, Serialize)]
pub struct BufferReport {
    pub content_key: String,
    pub codec: String,
    pub size_on_disk: u32,
    pub size_in_memory: u32,
}

/// A structural report of a saved file.
#[derive(Debug, Clone, Serialize)]
pub struct FileReport {
    pub version: u32,
    pub protected_layout: bool,
    pub objects_end: u32,
    pub buffers_end: u32,
    pub name_count: usize,
    pub import_count: usize,
    pub property_count: usize,
    pub export_count: usize,
    pub root_count: usize,
    pub source_count: usize,
    /// Number of exports per class name.
    pub classes: BTreeMap<String, usize>,
    /// `class:path` of every import.
    pub imports: Vec<String>,
    pub buffers: Vec<BufferReport>,
}

impl FileReport {
    /// Summarize already loaded tables.
    pub fn from_tables(tables: &FileTables) -> Self {
        let mut classes = BTreeMap::new();
        for export in &tables.exports {
            let class = tables.name_or_empty(export.class_name).to_owned();
            *classes.entry(class).or_insert(0) += 1;
        }
        let imports = tables
            .imports
            .iter()
            .map(|import| {
                let path = tables.string_at(import.path).unwrap_or("<invalid>");
                format!("{}:{}", tables.name_or_empty(import.class_name), path)
            })
            .collect();
        let buffers = tables
            .buffers
            .iter()
            .map(|b| BufferReport {
                content_key: b.content_key.to_hex(),
                codec: match BufferCodec::from_id(b.codec) {
                    Some(codec) => format!("{codec:?}"),
                    None => format!("Unknown({})", b.codec),
                },
                size_on_disk: b.size_on_disk,
                size_in_memory: b.size_in_memory,
            })
            .collect();

        Self {
            version: tables.header.version,
            protected_layout: tables.header.has_flag(FLAG_PROTECTED_LAYOUT),
            objects_end: tables.header.objects_end,
            buffers_end: tables.header.buffers_end,
            name_count: tables.names.len(),
            import_count: tables.imports.len(),
            property_count: tables.properties.len(),
            export_count: tables.exports.len(),
            root_count: tables.exports.iter().filter(|e| e.parent == 0).count(),
            source_count: tables.sources.len(),
            classes,
            imports,
            buffers,
        }
    }

    /// Ratio of on-disk to in-memory buffer bytes (1.0 when nothing is stored).
    pub fn buffer_ratio(&self) -> f64 {
        let disk: u64 = self.buffers.iter().map(|b| b.size_on_disk as u64).sum();
        let memory: u64 = self.buffers.iter().map(|b| b.size_in_memory as u64).sum();
        if memory == 0 {
            1.0
        } else {
            disk as f64 / memory as f64
        }
    }
}

impl fmt::Display for FileReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "version {}{}",
            self.version,
            if self.protected_layout { " (protected layout)" } else { "" }
        )?;
        writeln!(
            f,
            "{} exports ({} roots), {} imports, {} names, {} properties, {} sources",
            self.export_count,
            self.root_count,
            self.import_count,
            self.name_count,
            self.property_count,
            self.source_count
        )?;
        writeln!(f, "objects end at {}, buffers end at {}", self.objects_end, self.buffers_end)?;
        for (class, count) in &self.classes {
            writeln!(f, "  {class}: {count}")?;
        }
        for import in &self.imports {
            writeln!(f, "  import {import}")?;
        }
        for b in &self.buffers {
            writeln!(
                f,
                "  buffer {} {} {} -> {} bytes",
                b.content_key, b.codec, b.size_in_memory, b.size_on_disk
            )?;
        }
        Ok(())
    }
}

/// Read a file's tables and summarize them without touching any body.
pub fn inspect<R: Read + Seek>(reader: &mut R, options: &TableLoadOptions) -> FormatResult<FileReport> {
    let tables = FileTables::load(reader, ChunkMask::ALL, options)?;
    Ok(FileReport::from_tables(&tables))
}
