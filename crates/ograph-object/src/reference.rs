use ograph_types::{Name, ResourceKey, ResourcePath};

use crate::object::ObjectPtr;

/// Reference from one object to a resource, by path and class.
///
/// `handle` is the loaded resource when available. A reference whose handle
/// belongs to the graph being saved is stored as an internal export; every
/// other reference becomes an import of the file.
#[derive(Clone, Debug, Default)]
pub struct ResourceRef {
    pub path: ResourcePath,
    pub class: Name,
    pub handle: Option<ObjectPtr>,
    /// Load the resource together with the referencing file.
    pub must_load: bool,
    /// The resource must be completely loaded, not merely resident, before
    /// the referencing file is usable.
    pub must_fully_load: bool,
}

impl ResourceRef {
    /// Reference that is loaded along with the file that holds it.
    pub fn new(path: impl Into<ResourcePath>, class: impl Into<Name>) -> Self {
        Self {
            path: path.into(),
            class: class.into(),
            handle: None,
            must_load: true,
            must_fully_load: true,
        }
    }

    /// Reference that is recorded but left for the caller to load later.
    pub fn deferred(path: impl Into<ResourcePath>, class: impl Into<Name>) -> Self {
        Self {
            must_load: false,
            must_fully_load: false,
            ..Self::new(path, class)
        }
    }

    /// Reference to an object held directly.
    pub fn embedded(handle: ObjectPtr) -> Self {
        Self {
            path: ResourcePath::default(),
            class: handle.class().clone(),
            handle: Some(handle),
            must_load: true,
            must_fully_load: true,
        }
    }

    /// Accept the resource once it is resident, even if still loading.
    pub fn partially_loaded(mut self) -> Self {
        self.must_fully_load = false;
        self
    }

    pub fn with_handle(mut self, handle: ObjectPtr) -> Self {
        self.handle = Some(handle);
        self
    }

    pub fn is_null(&self) -> bool {
        self.path.is_empty() && self.handle.is_none()
    }

    pub fn key(&self) -> ResourceKey {
        ResourceKey {
            path: self.path.clone(),
            class: self.class.clone(),
        }
    }
}

impl PartialEq for ResourceRef {
    fn eq(&self, other: &Self) -> bool {
        self.path == other.path && self.class == other.class && self.handle == other.handle
    }
}
