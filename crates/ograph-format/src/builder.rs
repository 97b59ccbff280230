use std::collections::HashMap;

use ograph_types::{ContentKey, Name};

use crate::error::{FormatError, FormatResult};
use crate::records::{BufferRecord, ExportRecord, ImportRecord, PropertyRecord, SourceRecord};
use crate::tables::FileTables;

/// Builds [`FileTables`] content while keeping the reverse maps needed to
/// translate live values into indices in O(1).
///
/// All `map_*` methods are idempotent: mapping an equal value twice returns
/// the same index.
#[derive(Debug)]
pub struct FileTablesBuilder {
    tables: FileTables,
    strings: HashMap<String, u32>,
    names: HashMap<Name, u32>,
    imports: HashMap<ImportRecord, u32>,
    properties: HashMap<(u32, u32, u32), u32>,
}

impl FileTablesBuilder {
    /// Create a new builder holding only the empty string.
    pub fn new() -> Self {
        let mut tables = FileTables::default();
        tables.strings.push(0);
        let mut strings = HashMap::new();
        strings.insert(String::new(), 0);
        Self {
            tables,
            strings,
            names: HashMap::new(),
            imports: HashMap::new(),
            properties: HashMap::new(),
        }
    }

    /// Add a string to the strings chunk, returning its offset.
    pub fn add_string(&mut self, text: &str) -> FormatResult<u32> {
        if let Some(&offset) = self.strings.get(text) {
            return Ok(offset);
        }
        if text.contains('\0') {
            return Err(FormatError::InvalidString {
                offset: self.tables.strings.len() as u32,
            });
        }
        let offset = u32::try_from(self.tables.strings.len())
            .map_err(|_| FormatError::TooLarge("strings chunk".into()))?;
        self.tables.strings.extend_from_slice(text.as_bytes());
        self.tables.strings.push(0);
        self.strings.insert(text.to_owned(), offset);
        Ok(offset)
    }

    /// Map a name to its 1-based index; the empty name maps to 0.
    pub fn map_name(&mut self, name: &Name) -> FormatResult<u32> {
        if name.is_none() {
            return Ok(0);
        }
        if let Some(&index) = self.names.get(name) {
            return Ok(index);
        }
        let offset = self.add_string(name.as_str())?;
        self.tables.names.push(offset);
        let index = self.tables.names.len() as u32;
        self.names.insert(name.clone(), index);
        Ok(index)
    }

    /// Index of an already mapped name.
    pub fn name_index(&self, name: &Name) -> Option<u32> {
        if name.is_none() {
            return Some(0);
        }
        self.names.get(name).copied()
    }

    /// Map an import, deduplicated by `(path, class, flags)`.
    pub fn map_import(&mut self, path: &str, class: &Name, flags: u32) -> FormatResult<u32> {
        let record = ImportRecord {
            path: self.add_string(path)?,
            class_name: self.map_name(class)?,
            flags,
        };
        if let Some(&index) = self.imports.get(&record) {
            return Ok(index);
        }
        self.tables.imports.push(record);
        let index = self.tables.imports.len() as u32;
        self.imports.insert(record, index);
        Ok(index)
    }

    /// Reverse lookup of an already mapped import.
    pub fn import_index(&self, path: &str, class: &Name, flags: u32) -> Option<u32> {
        let record = ImportRecord {
            path: *self.strings.get(path)?,
            class_name: self.name_index(class)?,
            flags,
        };
        self.imports.get(&record).copied()
    }

    /// Map a property triple, deduplicated by its three names.
    pub fn map_property(
        &mut self,
        class: &Name,
        type_name: &Name,
        property: &Name,
        hash: u64,
    ) -> FormatResult<u32> {
        let key = (
            self.map_name(class)?,
            self.map_name(type_name)?,
            self.map_name(property)?,
        );
        if let Some(&index) = self.properties.get(&key) {
            return Ok(index);
        }
        self.tables.properties.push(PropertyRecord {
            class_name: key.0,
            type_name: key.1,
            property_name: key.2,
            hash,
        });
        let index = self.tables.properties.len() as u32;
        self.properties.insert(key, index);
        Ok(index)
    }

    /// Reverse lookup of an already mapped property triple.
    pub fn property_index(&self, class: &Name, type_name: &Name, property: &Name) -> Option<u32> {
        let key = (
            self.name_index(class)?,
            self.name_index(type_name)?,
            self.name_index(property)?,
        );
        self.properties.get(&key).copied()
    }

    /// Append an export; offsets, size and CRC are patched by the saver.
    pub fn add_export(&mut self, class_name: u32, parent: u32) -> u32 {
        self.tables.exports.push(ExportRecord {
            class_name,
            parent,
            ..ExportRecord::default()
        });
        self.tables.exports.len() as u32
    }

    /// Append a buffer slot; offset and on-disk size are patched by the saver.
    pub fn add_buffer(&mut self, content_key: ContentKey, size_in_memory: u32) -> u32 {
        self.tables.buffers.push(BufferRecord {
            content_key,
            size_in_memory,
            ..BufferRecord::default()
        });
        self.tables.buffers.len() as u32
    }

    /// Record a source file the content was produced from.
    pub fn add_source(
        &mut self,
        path: &str,
        size: u64,
        timestamp: u64,
        content_key: ContentKey,
    ) -> FormatResult<u32> {
        let path = self.add_string(path)?;
        self.tables.sources.push(SourceRecord {
            path,
            size,
            timestamp,
            content_key,
        });
        Ok(self.tables.sources.len() as u32)
    }

    /// Set the header flag word.
    pub fn set_flags(&mut self, flags: u32) {
        self.tables.header.flags = flags;
    }

    /// The tables built so far.
    pub fn tables(&self) -> &FileTables {
        &self.tables
    }

    /// Mutable access for patching record offsets.
    pub fn tables_mut(&mut self) -> &mut FileTables {
        &mut self.tables
    }

    /// Consume the builder, returning the tables.
    pub fn finish(self) -> FileTables {
        self.tables
    }
}

impl Default for FileTablesBuilder {
    fn default() -> Self {
        Self::new()
    }
}
