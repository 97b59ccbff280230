use std::any::Any;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};

use ograph_types::Name;

use crate::error::StreamResult;
use crate::stream::{BinaryReader, BinaryWriter};

/// Binary read/write capability of a type.
pub trait Serializable {
    /// Write the value to `writer`, routing every name, pointer, resource
    /// reference and buffer through the writer's mapper.
    fn write_binary(&self, writer: &mut BinaryWriter<'_>) -> StreamResult<()>;

    /// Read the value back. The object was default-constructed beforehand.
    fn read_binary(&mut self, reader: &mut BinaryReader<'_>) -> StreamResult<()>;
}

/// Upcast helper so `dyn Object` can be downcast to its concrete type.
pub trait AsAny: Any {
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T: Any> AsAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// A polymorphic node of a persistable object graph.
pub trait Object: Serializable + AsAny + Send + Sync {
    /// Name of the object's class as registered in the type registry.
    fn class_name(&self) -> &str;

    /// Called once every object of the same load has been read, in export
    /// order. Must not lock the object's own handle.
    fn on_post_load(&mut self) {}
}

/// Storage behind an [`ObjectPtr`].
pub struct ObjectNode {
    class: Name,
    parent: RwLock<Weak<ObjectNode>>,
    body: RwLock<Box<dyn Object>>,
}

/// Shared handle to an object in a graph.
///
/// Equality and hashing are by identity, not by content. The parent link is
/// weak: parents own their children through ordinary pointer fields.
#[derive(Clone)]
pub struct ObjectPtr(Arc<ObjectNode>);

/// Non-owning counterpart of [`ObjectPtr`].
#[derive(Clone, Default)]
pub struct WeakObjectPtr(Weak<ObjectNode>);

impl ObjectPtr {
    pub fn new<T: Object>(object: T) -> Self {
        Self::from_box(Box::new(object))
    }

    pub fn from_box(object: Box<dyn Object>) -> Self {
        let class = Name::new(object.class_name());
        Self(Arc::new(ObjectNode {
            class,
            parent: RwLock::new(Weak::new()),
            body: RwLock::new(object),
        }))
    }

    /// Create an object already attached to `parent`.
    pub fn with_parent<T: Object>(object: T, parent: &ObjectPtr) -> Self {
        let ptr = Self::new(object);
        ptr.set_parent(Some(parent));
        ptr
    }

    /// Class name captured at construction; readable without locking the body.
    pub fn class(&self) -> &Name {
        &self.0.class
    }

    pub fn parent(&self) -> Option<ObjectPtr> {
        let guard = self.0.parent.read().unwrap_or_else(PoisonError::into_inner);
        guard.upgrade().map(ObjectPtr)
    }

    pub fn set_parent(&self, parent: Option<&ObjectPtr>) {
        let mut guard = self.0.parent.write().unwrap_or_else(PoisonError::into_inner);
        *guard = parent.map(|p| Arc::downgrade(&p.0)).unwrap_or_default();
    }

    /// Returns `true` if `ancestor` is this object's parent, grandparent, ...
    pub fn is_descendant_of(&self, ancestor: &ObjectPtr) -> bool {
        let mut current = self.parent();
        while let Some(p) = current {
            if p.ptr_eq(ancestor) {
                return true;
            }
            current = p.parent();
        }
        false
    }

    pub fn read(&self) -> RwLockReadGuard<'_, Box<dyn Object>> {
        self.0.body.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, Box<dyn Object>> {
        self.0.body.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `f` against the concrete object if it is a `T`.
    pub fn with<T: Object, R>(&self, f: impl FnOnce(&T) -> R) -> Option<R> {
        let guard = self.read();
        (**guard).as_any().downcast_ref::<T>().map(f)
    }

    /// Mutable variant of [`ObjectPtr::with`].
    pub fn with_mut<T: Object, R>(&self, f: impl FnOnce(&mut T) -> R) -> Option<R> {
        let mut guard = self.write();
        (**guard).as_any_mut().downcast_mut::<T>().map(f)
    }

    pub fn is<T: Object>(&self) -> bool {
        (**self.read()).as_any().is::<T>()
    }

    pub fn ptr_eq(&self, other: &ObjectPtr) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// Address of the shared node; stable for the lifetime of the object.
    pub fn addr(&self) -> usize {
        Arc::as_ptr(&self.0) as usize
    }

    pub fn downgrade(&self) -> WeakObjectPtr {
        WeakObjectPtr(Arc::downgrade(&self.0))
    }
}

impl WeakObjectPtr {
    pub fn upgrade(&self) -> Option<ObjectPtr> {
        self.0.upgrade().map(ObjectPtr)
    }
}

impl PartialEq for ObjectPtr {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl Eq for ObjectPtr {}

impl Hash for ObjectPtr {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.addr().hash(state);
    }
}

impl fmt::Debug for ObjectPtr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectPtr({}@{:#x})", self.0.class, self.addr())
    }
}

impl fmt::Debug for WeakObjectPtr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.upgrade() {
            Some(ptr) => write!(f, "WeakObjectPtr({ptr:?})"),
            None => f.write_str("WeakObjectPtr(<dropped>)"),
        }
    }
}
