//! Foundation types for ograph, the binary object-graph persistence engine.
//!
//! Every other ograph crate depends on `ograph-types`.
//!
//! # Key Types
//!
//! - [`Name`] — Interned symbolic identifier (class, type and property names)
//! - [`ContentKey`] — 64-bit content hash used to deduplicate data buffers
//! - [`ResourcePath`] — Location of an external resource
//! - [`ResourceKey`] — Path plus expected class of an external resource

pub mod content;
pub mod error;
pub mod name;
pub mod resource;

pub use content::{property_fingerprint, ContentHasher, ContentKey};
pub use error::TypeError;
pub use name::Name;
pub use resource::{ResourceKey, ResourcePath};
