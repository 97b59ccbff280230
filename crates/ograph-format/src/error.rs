use thiserror::Error;

use crate::header::ChunkKind;

#[derive(Debug, Error)]
pub enum FormatError {
    #[error("invalid file magic: expected {expected:#010x}, got {actual:#010x}")]
    InvalidMagic { expected: u32, actual: u32 },

    #[error("unsupported format version {version} (newest supported is {max})")]
    UnsupportedVersion { version: u32, max: u32 },

    #[error("header CRC mismatch: expected {expected:#010x}, computed {actual:#010x}")]
    HeaderCrcMismatch { expected: u32, actual: u32 },

    #[error("{chunk} chunk CRC mismatch: expected {expected:#010x}, computed {actual:#010x}")]
    ChunkCrcMismatch {
        chunk: ChunkKind,
        expected: u32,
        actual: u32,
    },

    #[error("invalid header: {0}")]
    InvalidHeader(String),

    #[error("{chunk} chunk is {size} bytes, above the {limit} byte limit")]
    TableTooLarge { chunk: ChunkKind, size: u64, limit: u64 },

    #[error("{chunk} chunk ends at offset {end}, past the {len} bytes available")]
    ChunkOutOfBounds { chunk: ChunkKind, end: u64, len: u64 },

    #[error("file truncated at offset {offset}: {reason}")]
    Truncated { offset: u64, reason: String },

    #[error("layout violation in {what}: found offset {actual}, expected {expected}")]
    LayoutViolation {
        what: String,
        expected: u64,
        actual: u64,
    },

    #[error("invalid string at offset {offset} of the strings chunk")]
    InvalidString { offset: u32 },

    #[error("{table} index {index} out of range ({len} entries)")]
    IndexOutOfRange {
        table: &'static str,
        index: u32,
        len: usize,
    },

    #[error("compression failed: {0}")]
    CompressionFailed(String),

    #[error("decompression failed: {0}")]
    DecompressionFailed(String),

    #[error("file exceeds the 4 GiB addressable limit: {0}")]
    TooLarge(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type FormatResult<T> = Result<T, FormatError>;
