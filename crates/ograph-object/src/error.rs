use ograph_types::Name;
use thiserror::Error;

/// Errors raised while an object writes itself to, or reads itself from, a
/// binary stream.
#[derive(Debug, Error)]
pub enum StreamError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("unexpected end of data at offset {offset}: {needed} more bytes needed")]
    Truncated { offset: u64, needed: u64 },

    #[error("invalid UTF-8 string at offset {offset}")]
    InvalidUtf8 { offset: u64 },

    #[error("property {property} read past its block ending at offset {end}")]
    PropertyOverrun { property: Name, end: u64 },

    #[error("value was not observed by the structure pass: {0}")]
    Unmapped(String),

    #[error("allocation of {size} bytes failed")]
    AllocationFailed { size: u64 },

    #[error("buffer could not be materialized: {0}")]
    BufferUnavailable(String),

    #[error("invalid data at offset {offset}: {reason}")]
    InvalidData { offset: u64, reason: String },
}

pub type StreamResult<T> = Result<T, StreamError>;
