//! Chunked binary container format for ograph.
//!
//! A file is a fixed-size header followed by seven index chunks, then the
//! export bodies, then the buffer bodies:
//!
//! ```text
//! +--------+---------+-------+---------+------------+---------+---------+---------+
//! | header | strings | names | imports | properties | exports | buffers | sources |
//! +--------+---------+-------+---------+------------+---------+---------+---------+
//! | export bodies ...                              | buffer bodies ...            |
//! +------------------------------------------------+------------------------------+
//!                                              objects_end                 buffers_end
//! ```
//!
//! All offsets are relative to the start of the header so a file can be
//! embedded anywhere inside a larger stream. Every chunk and the header itself
//! carry a CRC32; export bodies carry one when the file is saved with a
//! protected layout.
//!
//! This crate is pure data: it knows nothing about objects or types.

pub mod builder;
pub mod codec;
pub mod error;
pub mod header;
pub mod inspect;
pub mod records;
pub mod tables;

pub use builder::FileTablesBuilder;
pub use codec::{BufferCodec, CompressionMode, CompressionSettings, EncodedBuffer};
pub use error::{FormatError, FormatResult};
pub use header::{ChunkDesc, ChunkKind, ChunkMask, FileHeader, FLAG_PROTECTED_LAYOUT, FORMAT_VERSION, HEADER_SIZE, MAGIC};
pub use inspect::{inspect, BufferReport, FileReport};
pub use records::{BufferRecord, ExportRecord, ImportRecord, PropertyRecord, SourceRecord};
pub use tables::{FileTables, TableLoadOptions};
