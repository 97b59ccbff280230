use std::io::{Read, Seek};

use ograph_format::{ChunkKind, ChunkMask, FileTables, TableLoadOptions};
use ograph_types::{ContentKey, Name, ResourcePath};
use serde::{Deserialize, Serialize};

use crate::error::LoadResult;

/// An external resource a file imports.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileDependency {
    pub path: ResourcePath,
    pub class: Name,
    /// The resource is loaded together with the file.
    pub must_load: bool,
    /// The resource must finish loading before the file is usable.
    pub must_fully_load: bool,
}

/// A source file the saved content was produced from.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceDependency {
    pub path: String,
    pub size: u64,
    /// Modification time of the source, in the producer's clock.
    pub timestamp: u64,
    pub content_key: ContentKey,
}

/// List a file's imports from its index chunks alone.
pub fn list_dependencies<R: Read + Seek>(
    reader: &mut R,
    options: &TableLoadOptions,
) -> LoadResult<Vec<FileDependency>> {
    let tables = FileTables::load(reader, ChunkMask::DEPENDENCIES, options)?;
    tables
        .imports
        .iter()
        .map(|import| -> LoadResult<FileDependency> {
            Ok(FileDependency {
                path: ResourcePath::new(tables.string_at(import.path)?),
                class: Name::new(tables.name(import.class_name)?.unwrap_or_default()),
                must_load: import.must_load(),
                must_fully_load: import.must_fully_load(),
            })
        })
        .collect()
}

/// List the provenance records stored in a file.
pub fn list_sources<R: Read + Seek>(
    reader: &mut R,
    options: &TableLoadOptions,
) -> LoadResult<Vec<SourceDependency>> {
    let mask = ChunkMask::NONE.with(ChunkKind::Strings).with(ChunkKind::Sources);
    let tables = FileTables::load(reader, mask, options)?;
    tables
        .sources
        .iter()
        .map(|source| -> LoadResult<SourceDependency> {
            Ok(SourceDependency {
                path: tables.string_at(source.path)?.to_owned(),
                size: source.size,
                timestamp: source.timestamp,
                content_key: source.content_key,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{save_bytes, TestMesh};
    use crate::{BinarySaver, SaveContext, SaverConfig};
    use ograph_object::{ObjectPtr, ResourceRef};
    use std::io::Cursor;

    fn mesh_with_imports() -> ObjectPtr {
        let mut mesh = TestMesh::new("m").with_material(ResourceRef::new("/m/stone.mat", "Material"));
        mesh.extra = vec![
            ResourceRef::deferred("/t/stone.png", "Texture"),
            ResourceRef::new("/m/stone.mat", "Material"),
        ];
        ObjectPtr::new(mesh)
    }

    #[test]
    fn dependencies_listed_without_loading_objects() {
        let data = save_bytes(&[mesh_with_imports()], SaverConfig::default());
        let deps = list_dependencies(&mut Cursor::new(&data), &TableLoadOptions::default()).unwrap();
        assert_eq!(
            deps,
            vec![
                FileDependency {
                    path: "/m/stone.mat".into(),
                    class: "Material".into(),
                    must_load: true,
                    must_fully_load: true,
                },
                FileDependency {
                    path: "/t/stone.png".into(),
                    class: "Texture".into(),
                    must_load: false,
                    must_fully_load: false,
                },
            ]
        );
    }

    #[test]
    fn load_requirements_survive_save() {
        let mut mesh = TestMesh::new("m").with_material(ResourceRef::new("/m/stone.mat", "Material"));
        mesh.extra = vec![ResourceRef::new("/m/stone.mat", "Material").partially_loaded()];
        let data = save_bytes(&[ObjectPtr::new(mesh)], SaverConfig::default());

        let deps = list_dependencies(&mut Cursor::new(&data), &TableLoadOptions::default()).unwrap();
        let flags: Vec<_> = deps.iter().map(|d| (d.must_load, d.must_fully_load)).collect();
        assert_eq!(flags, vec![(true, true), (true, false)]);
        assert!(deps.iter().all(|d| d.path.as_str() == "/m/stone.mat"));
    }

    #[test]
    fn dependency_listing_ignores_object_corruption() {
        let mut data = save_bytes(&[mesh_with_imports()], SaverConfig::default());
        let last = data.len() - 1;
        data[last] ^= 0xFF;
        let deps = list_dependencies(&mut Cursor::new(&data), &TableLoadOptions::default()).unwrap();
        assert_eq!(deps.len(), 2);
    }

    #[test]
    fn sources_listed() {
        let source = SourceDependency {
            path: "/src/stone.fbx".into(),
            size: 4096,
            timestamp: 1_700_000_000,
            content_key: ContentKey::of(b"fbx bytes"),
        };
        let context = SaveContext::new(vec![mesh_with_imports()]).with_source(source.clone());
        let mut out = Cursor::new(Vec::new());
        BinarySaver::default().save(&mut out, &context).unwrap();
        out.set_position(0);
        let sources = list_sources(&mut out, &TableLoadOptions::default()).unwrap();
        assert_eq!(sources, vec![source]);
    }

    #[test]
    fn dependency_report_serializes() {
        let dep = FileDependency {
            path: "/m/stone.mat".into(),
            class: "Material".into(),
            must_load: true,
            must_fully_load: true,
        };
        let json = serde_json::to_value(&dep).unwrap();
        assert_eq!(json["path"], "/m/stone.mat");
        assert_eq!(json["class"], "Material");
        let back: FileDependency = serde_json::from_value(json).unwrap();
        assert_eq!(back, dep);
    }
}
