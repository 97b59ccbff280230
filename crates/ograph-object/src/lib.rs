//! Object model seam for ograph.
//!
//! Types participate in persistence by implementing [`Serializable`] (and
//! [`Object`] for graph nodes). During a save they write themselves to a
//! [`BinaryWriter`] whose [`DataMapper`] turns names, pointers, resource
//! references and buffers into ordinals; during a load a [`BinaryReader`]
//! reverses the translation through a [`DataUnmapper`]. Neither side knows
//! anything about the file layout.
//!
//! # Key Types
//!
//! - [`ObjectPtr`] — Shared, lockable handle to a polymorphic object
//! - [`TypeRegistry`] — Explicit registry of classes, primitives and properties
//! - [`DataBuffer`] — Raw payload, either resident or behind a [`LatentBuffer`]
//! - [`ResourceRef`] — Reference to a resource by path and class

pub mod buffer;
pub mod error;
pub mod mapper;
pub mod object;
pub mod reference;
pub mod registry;
pub mod stream;

pub use buffer::{DataBuffer, LatentBuffer, PreloadedBuffer};
pub use error::{StreamError, StreamResult};
pub use mapper::{DataMapper, DataUnmapper, MappedResource};
pub use object::{AsAny, Object, ObjectPtr, Serializable, WeakObjectPtr};
pub use reference::ResourceRef;
pub use registry::{ObjectFactory, PropertyDesc, PropertyInfo, TypeDescriptor, TypeRegistry};
pub use stream::{BinaryReader, BinaryWriter};
