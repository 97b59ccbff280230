use std::fmt;

use ograph_format::FormatError;
use ograph_object::StreamError;
use ograph_resource::ResourceError;
use ograph_types::{Name, ResourceKey};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SaveError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid table content: {0}")]
    Format(FormatError),

    #[error("export {export} ({class}) failed to write: {source}")]
    Stream {
        export: u32,
        class: Name,
        #[source]
        source: StreamError,
    },

    #[error("buffer compression failed: {0}")]
    Compression(String),

    #[error("file too large: {0}")]
    FileTooLarge(String),

    #[error("save cancelled")]
    Cancelled,
}

impl From<FormatError> for SaveError {
    fn from(e: FormatError) -> Self {
        match e {
            FormatError::Io(e) => Self::Io(e),
            FormatError::CompressionFailed(reason) => Self::Compression(reason),
            FormatError::TooLarge(what) => Self::FileTooLarge(what),
            other => Self::Format(other),
        }
    }
}

pub type SaveResult<T> = Result<T, SaveError>;

/// What went wrong with one export during a load.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExportFailure {
    /// Stored CRC does not match the body, or the body lies outside the
    /// objects region.
    Integrity,
    /// The object consumed more bytes than were recorded for it.
    Overrun,
    /// The object's own read routine failed.
    Read,
}

impl fmt::Display for ExportFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Integrity => "integrity check failed",
            Self::Overrun => "object accessed data beyond its bounds",
            Self::Read => "read failed",
        })
    }
}

/// Human-readable account of a failed export.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExportDiagnostic {
    /// 1-based export index.
    pub export: u32,
    pub class: String,
    /// Absolute byte offset of the export body.
    pub offset: u64,
    pub failure: ExportFailure,
    pub reason: String,
}

impl fmt::Display for ExportDiagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "export {} ({}) at offset {}: {}: {}",
            self.export, self.class, self.offset, self.failure, self.reason
        )
    }
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error(transparent)]
    Format(#[from] FormatError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    ExportIntegrity(ExportDiagnostic),

    #[error("{0}")]
    ExportOverrun(ExportDiagnostic),

    #[error("{0}")]
    ExportRead(ExportDiagnostic),

    #[error("{} exports failed to load: {}", .0.len(), join_diagnostics(.0))]
    Exports(Vec<ExportDiagnostic>),

    #[error("buffer {buffer} at offset {offset} is corrupt: {reason}")]
    BufferIntegrity { buffer: u32, offset: u64, reason: String },

    #[error("allocation of {size} bytes failed")]
    AllocationFailed { size: u64 },

    #[error("import {key} failed to load: {source}")]
    ImportFailed {
        key: ResourceKey,
        #[source]
        source: ResourceError,
    },

    #[error("load cancelled")]
    Cancelled,
}

impl LoadError {
    /// Every export diagnostic carried by this error.
    pub fn diagnostics(&self) -> Vec<&ExportDiagnostic> {
        match self {
            Self::ExportIntegrity(d) | Self::ExportOverrun(d) | Self::ExportRead(d) => vec![d],
            Self::Exports(all) => all.iter().collect(),
            _ => Vec::new(),
        }
    }
}

impl From<ExportDiagnostic> for LoadError {
    fn from(diagnostic: ExportDiagnostic) -> Self {
        match diagnostic.failure {
            ExportFailure::Integrity => Self::ExportIntegrity(diagnostic),
            ExportFailure::Overrun => Self::ExportOverrun(diagnostic),
            ExportFailure::Read => Self::ExportRead(diagnostic),
        }
    }
}

fn join_diagnostics(all: &[ExportDiagnostic]) -> String {
    all.iter().map(ToString::to_string).collect::<Vec<_>>().join("; ")
}

pub type LoadResult<T> = Result<T, LoadError>;
