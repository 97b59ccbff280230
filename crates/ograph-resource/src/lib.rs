//! Resource loading seam for ograph.
//!
//! The engine resolves a file's imports through a caller-supplied
//! [`ResourceLoader`]. It only ever asks two questions: "is this key already
//! resident?" ([`ResourceLoader::acquire_if_resident`]) and "please load this
//! key" ([`ResourceLoader::load`]). Locking inside the loader is the loader's
//! own business; the engine never mutates it otherwise.

pub mod cache;
pub mod chain;
pub mod error;
pub mod loader;
pub mod progress;

pub use cache::ResourceCache;
pub use chain::LoadChain;
pub use error::{ResourceError, ResourceResult};
pub use loader::{NullResourceLoader, ResourceLoader};
pub use progress::{CancellationFlag, NullProgress, ProgressTracker};
