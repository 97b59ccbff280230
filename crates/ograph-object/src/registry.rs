use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use ograph_types::{property_fingerprint, Name};

use crate::object::Object;

/// Default-constructs an empty instance of a class.
pub type ObjectFactory = fn() -> Box<dyn Object>;

/// Static description of a serialized property, used on the write side.
///
/// The triple `(class, type_name, name)` identifies the property on disk.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PropertyDesc {
    pub class: &'static str,
    pub name: &'static str,
    pub type_name: &'static str,
}

impl PropertyDesc {
    pub const fn new(class: &'static str, name: &'static str, type_name: &'static str) -> Self {
        Self {
            class,
            name,
            type_name,
        }
    }

    /// Structural fingerprint used as the fast-path lookup key on load.
    pub fn fingerprint(&self) -> u64 {
        property_fingerprint(self.class, self.type_name, self.name)
    }
}

/// A property registered with a live class.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PropertyInfo {
    pub owner: Name,
    pub name: Name,
    pub type_name: Name,
    pub hash: u64,
}

impl PropertyInfo {
    pub fn new(owner: impl Into<Name>, name: impl Into<Name>, type_name: impl Into<Name>) -> Self {
        let owner = owner.into();
        let name = name.into();
        let type_name = type_name.into();
        let hash = property_fingerprint(owner.as_str(), type_name.as_str(), name.as_str());
        Self {
            owner,
            name,
            type_name,
            hash,
        }
    }

    /// Returns `true` if this live property is the one `desc` describes.
    pub fn matches(&self, desc: &PropertyDesc) -> bool {
        self.owner == desc.class && self.name == desc.name
    }
}

#[derive(Clone)]
enum TypeKind {
    Primitive,
    Class {
        is_abstract: bool,
        factory: Option<ObjectFactory>,
    },
}

/// Capability object describing one live type.
#[derive(Clone)]
pub struct TypeDescriptor {
    name: Name,
    base: Option<Name>,
    kind: TypeKind,
    properties: Vec<Arc<PropertyInfo>>,
}

impl TypeDescriptor {
    /// A non-object value type (integers, strings, ...).
    pub fn primitive(name: impl Into<Name>) -> Self {
        Self {
            name: name.into(),
            base: None,
            kind: TypeKind::Primitive,
            properties: Vec::new(),
        }
    }

    /// A concrete object class built with `factory`.
    pub fn class(name: impl Into<Name>, factory: ObjectFactory) -> Self {
        Self {
            name: name.into(),
            base: None,
            kind: TypeKind::Class {
                is_abstract: false,
                factory: Some(factory),
            },
            properties: Vec::new(),
        }
    }

    /// An abstract object class; never instantiated.
    pub fn abstract_class(name: impl Into<Name>) -> Self {
        Self {
            name: name.into(),
            base: None,
            kind: TypeKind::Class {
                is_abstract: true,
                factory: None,
            },
            properties: Vec::new(),
        }
    }

    /// Set the base class.
    pub fn with_base(mut self, base: impl Into<Name>) -> Self {
        self.base = Some(base.into());
        self
    }

    /// Declare a property owned by this class.
    pub fn with_property(mut self, name: impl Into<Name>, type_name: impl Into<Name>) -> Self {
        let info = PropertyInfo::new(self.name.clone(), name, type_name);
        self.properties.push(Arc::new(info));
        self
    }

    pub fn name(&self) -> &Name {
        &self.name
    }

    pub fn base(&self) -> Option<&Name> {
        self.base.as_ref()
    }

    /// Returns `true` for object classes (abstract or not).
    pub fn is_object(&self) -> bool {
        matches!(self.kind, TypeKind::Class { .. })
    }

    pub fn is_abstract(&self) -> bool {
        matches!(self.kind, TypeKind::Class { is_abstract: true, .. })
    }

    /// Properties declared directly on this class.
    pub fn own_properties(&self) -> &[Arc<PropertyInfo>] {
        &self.properties
    }

    /// Default-construct an instance; `None` for primitives and abstract classes.
    pub fn construct(&self) -> Option<Box<dyn Object>> {
        match self.kind {
            TypeKind::Class {
                is_abstract: false,
                factory: Some(factory),
            } => Some(factory()),
            _ => None,
        }
    }
}

impl fmt::Debug for TypeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeDescriptor")
            .field("name", &self.name)
            .field("base", &self.base)
            .field("is_object", &self.is_object())
            .field("is_abstract", &self.is_abstract())
            .field("properties", &self.properties.len())
            .finish()
    }
}

/// Names of the value types every registry knows about.
pub const PRIMITIVE_TYPES: &[&str] = &[
    "Bool", "Int8", "Int16", "Int32", "Int64", "Uint8", "Uint16", "Uint32", "Uint64", "Float",
    "Double", "String", "Name", "Type", "ObjectPtr", "ResourceRef", "Buffer",
];

/// Explicit registry of live types.
///
/// Built once, then shared read-only (typically behind an `Arc`) by every
/// saver and loader that needs to construct objects or bind properties.
#[derive(Debug)]
pub struct TypeRegistry {
    types: HashMap<Name, Arc<TypeDescriptor>>,
    properties_by_hash: HashMap<u64, Arc<PropertyInfo>>,
}

impl TypeRegistry {
    /// Create a registry that knows only the primitive value types.
    pub fn new() -> Self {
        let mut registry = Self {
            types: HashMap::new(),
            properties_by_hash: HashMap::new(),
        };
        for name in PRIMITIVE_TYPES {
            registry.register(TypeDescriptor::primitive(*name));
        }
        registry
    }

    /// Register (or replace) a type.
    pub fn register(&mut self, descriptor: TypeDescriptor) -> Arc<TypeDescriptor> {
        for prop in &descriptor.properties {
            self.properties_by_hash.insert(prop.hash, Arc::clone(prop));
        }
        let descriptor = Arc::new(descriptor);
        self.types
            .insert(descriptor.name.clone(), Arc::clone(&descriptor));
        descriptor
    }

    /// Look up any type by name.
    pub fn find_type(&self, name: &str) -> Option<Arc<TypeDescriptor>> {
        self.types.get(name).cloned()
    }

    /// Look up an object class by name.
    pub fn find_class(&self, name: &str) -> Option<Arc<TypeDescriptor>> {
        self.types.get(name).filter(|t| t.is_object()).cloned()
    }

    /// Fast-path property lookup by structural fingerprint.
    pub fn find_property_by_hash(&self, hash: u64) -> Option<Arc<PropertyInfo>> {
        self.properties_by_hash.get(&hash).cloned()
    }

    /// Find a property by name on `class` or any of its base classes.
    pub fn find_property(&self, class: &str, name: &str) -> Option<Arc<PropertyInfo>> {
        self.ancestry(class)
            .flat_map(|t| t.properties.iter())
            .find(|p| p.name == name)
            .cloned()
    }

    /// All properties of `class`, base classes first.
    pub fn enumerate_properties(&self, class: &str) -> Vec<Arc<PropertyInfo>> {
        let chain: Vec<_> = self.ancestry(class).collect();
        chain
            .iter()
            .rev()
            .flat_map(|t| t.properties.iter().cloned())
            .collect()
    }

    /// Returns `true` if `class` is `base` or derives from it.
    pub fn is_a(&self, class: &str, base: &str) -> bool {
        self.ancestry(class).any(|t| t.name == base)
    }

    /// Default-construct an instance of `class`.
    pub fn construct(&self, class: &str) -> Option<Box<dyn Object>> {
        self.find_class(class).and_then(|t| t.construct())
    }

    /// Number of registered types, primitives included.
    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    fn ancestry<'a>(&'a self, class: &str) -> impl Iterator<Item = &'a Arc<TypeDescriptor>> + 'a {
        let mut next = self.types.get(class);
        // Bounded by the number of types, so a malformed base cycle terminates.
        let mut budget = self.types.len();
        std::iter::from_fn(move || {
            if budget == 0 {
                return None;
            }
            budget -= 1;
            let current = next?;
            next = current.base.as_ref().and_then(|b| self.types.get(b.as_str()));
            Some(current)
        })
    }
}

impl Default for TypeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StreamResult;
    use crate::object::Serializable;
    use crate::stream::{BinaryReader, BinaryWriter};

    #[derive(Default)]
    struct Dummy;

    impl Serializable for Dummy {
        fn write_binary(&self, writer: &mut BinaryWriter<'_>) -> StreamResult<()> {
            writer.end_properties()
        }
        fn read_binary(&mut self, reader: &mut BinaryReader<'_>) -> StreamResult<()> {
            reader.read_properties(|_, _| Ok(()))
        }
    }

    impl Object for Dummy {
        fn class_name(&self) -> &str {
            "Dummy"
        }
    }

    fn registry() -> TypeRegistry {
        let mut reg = TypeRegistry::new();
        reg.register(TypeDescriptor::abstract_class("Resource").with_property("path", "String"));
        reg.register(
            TypeDescriptor::class("Dummy", || Box::new(Dummy))
                .with_base("Resource")
                .with_property("value", "Int32"),
        );
        reg
    }

    #[test]
    fn primitives_are_not_classes() {
        let reg = registry();
        assert!(reg.find_type("Int32").is_some());
        assert!(reg.find_class("Int32").is_none());
        assert!(reg.construct("Int32").is_none());
    }

    #[test]
    fn abstract_class_cannot_be_constructed() {
        let reg = registry();
        let resource = reg.find_class("Resource").unwrap();
        assert!(resource.is_abstract());
        assert!(resource.construct().is_none());
    }

    #[test]
    fn construct_concrete_class() {
        let reg = registry();
        let obj = reg.construct("Dummy").unwrap();
        assert_eq!(obj.class_name(), "Dummy");
    }

    #[test]
    fn property_lookup_walks_bases() {
        let reg = registry();
        let path = reg.find_property("Dummy", "path").unwrap();
        assert_eq!(path.owner, "Resource");
        assert!(reg.find_property("Dummy", "missing").is_none());
    }

    #[test]
    fn property_lookup_by_hash() {
        let reg = registry();
        let desc = PropertyDesc::new("Dummy", "value", "Int32");
        let prop = reg.find_property_by_hash(desc.fingerprint()).unwrap();
        assert!(prop.matches(&desc));
    }

    #[test]
    fn enumerate_base_first() {
        let reg = registry();
        let names: Vec<_> = reg
            .enumerate_properties("Dummy")
            .iter()
            .map(|p| p.name.to_string())
            .collect();
        assert_eq!(names, vec!["path", "value"]);
    }

    #[test]
    fn is_a_relation() {
        let reg = registry();
        assert!(reg.is_a("Dummy", "Resource"));
        assert!(reg.is_a("Dummy", "Dummy"));
        assert!(!reg.is_a("Resource", "Dummy"));
        assert!(!reg.is_a("Unknown", "Resource"));
    }

    #[test]
    fn base_cycle_terminates() {
        let mut reg = TypeRegistry::new();
        reg.register(TypeDescriptor::abstract_class("A").with_base("B"));
        reg.register(TypeDescriptor::abstract_class("B").with_base("A"));
        assert!(!reg.is_a("A", "C"));
    }
}
