//! Binary persistence engine for ograph object graphs.
//!
//! Saving runs in two passes over the same [`Serializable`] code: the
//! [`StructureMapper`] drives every object against a null sink to discover
//! the names, properties, pointers, resource references and buffers it
//! touches, then the [`BinarySaver`] writes the file tables and streams each
//! export body through a mapper that only looks up what the first pass
//! recorded.
//!
//! Loading reverses this: [`BinaryLoader`] reads the tables, resolves them
//! into live handles through [`RuntimeTables`] (fanning out import loads
//! concurrently), instantiates the exports parent-first, reads their bodies
//! and finally runs post-load hooks in export order.
//!
//! [`Serializable`]: ograph_object::Serializable

pub mod buffers;
pub mod config;
pub mod dependency;
pub mod depot;
pub mod error;
pub mod loader;
pub mod mapper;
pub mod runtime;
pub mod saver;
pub mod source;

#[cfg(test)]
pub(crate) mod fixtures;

pub use buffers::{BufferCache, FileBackedBuffer};
pub use config::{EngineConfig, ErrorMode, IntegrityPolicy, LoaderConfig, SaverConfig};
pub use dependency::{list_dependencies, list_sources, FileDependency, SourceDependency};
pub use depot::DepotResourceLoader;
pub use error::{ExportDiagnostic, ExportFailure, LoadError, LoadResult, SaveError, SaveResult};
pub use loader::{BinaryLoader, LoadContext, LoadedObjects};
pub use mapper::{extract_used_resources, StructureMapper};
pub use runtime::RuntimeTables;
pub use saver::{BinarySaver, SaveContext, SaveSummary};
pub use source::{FileSource, ReaderSource};
