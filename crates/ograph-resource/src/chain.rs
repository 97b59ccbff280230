use std::fmt;

use ograph_types::ResourceKey;

/// The resources whose loads led to the current one, outermost first.
///
/// A load that imports other resources passes its chain, extended by its
/// own key, to every nested load.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct LoadChain {
    keys: Vec<ResourceKey>,
}

impl LoadChain {
    /// Create an empty chain, for a load started directly by a caller.
    pub fn new() -> Self {
        Self::default()
    }

    /// This chain extended by `key`.
    pub fn with(&self, key: ResourceKey) -> Self {
        let mut keys = self.keys.clone();
        keys.push(key);
        Self { keys }
    }

    pub fn contains(&self, key: &ResourceKey) -> bool {
        self.keys.contains(key)
    }

    /// The innermost load, which is the one making the request.
    pub fn last(&self) -> Option<&ResourceKey> {
        self.keys.last()
    }

    /// Number of loads in the chain.
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ResourceKey> {
        self.keys.iter()
    }
}

impl fmt::Debug for LoadChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.keys.iter().map(ToString::to_string)).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extending_leaves_the_original_untouched() {
        let scene = ResourceKey::new("/scene", "Scene");
        let mesh = ResourceKey::new("/mesh", "Mesh");
        let outer = LoadChain::new().with(scene.clone());
        let inner = outer.with(mesh.clone());

        assert_eq!(outer.len(), 1);
        assert!(!outer.contains(&mesh));
        assert_eq!(inner.len(), 2);
        assert!(inner.contains(&scene) && inner.contains(&mesh));
        assert_eq!(inner.last(), Some(&mesh));
        assert_eq!(inner.iter().next(), Some(&scene));
        assert!(LoadChain::new().is_empty());
    }

    #[test]
    fn debug_lists_keys() {
        let chain = LoadChain::new().with(ResourceKey::new("/scene", "Scene"));
        assert_eq!(format!("{chain:?}"), r#"["Scene:/scene"]"#);
    }
}
