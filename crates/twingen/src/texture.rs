//! Texture resolution. Each texture key is resolved exactly once at
//! startup to either a file on disk or a procedural placeholder the viewer
//! generates; nothing probes the filesystem at packaging time.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Keys the packager knows how to ship.
pub const TEXTURE_KEYS: &[&str] = &[
    "facade_atlas.png",
    "facade_normal_atlas.png",
    "facade_atlas_meta.json",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TextureSource {
    /// A texture produced by an upstream texturing step, copied verbatim.
    Loaded(PathBuf),
    /// Nothing on disk: the viewer substitutes a procedural texture.
    Procedural,
}

#[derive(Debug, Default)]
pub struct TextureCatalog {
    pub entries: BTreeMap<String, TextureSource>,
}

impl TextureCatalog {
    /// Resolve every known key against the textures directory once.
    pub fn resolve(textures_dir: &Path) -> TextureCatalog {
        let mut entries = BTreeMap::new();
        for key in TEXTURE_KEYS {
            let candidate = textures_dir.join(key);
            let source = if candidate.is_file() {
                TextureSource::Loaded(candidate)
            } else {
                TextureSource::Procedural
            };
            entries.insert((*key).to_string(), source);
        }
        TextureCatalog { entries }
    }

    pub fn loaded(&self) -> impl Iterator<Item = (&str, &Path)> {
        self.entries.iter().filter_map(|(key, source)| match source {
            TextureSource::Loaded(path) => Some((key.as_str(), path.as_path())),
            TextureSource::Procedural => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_directory_resolves_everything_procedural() {
        let catalog = TextureCatalog::resolve(Path::new("/nonexistent/textures"));
        assert_eq!(catalog.entries.len(), TEXTURE_KEYS.len());
        assert!(catalog
            .entries
            .values()
            .all(|s| *s == TextureSource::Procedural));
        assert_eq!(catalog.loaded().count(), 0);
    }

    #[test]
    fn present_files_resolve_as_loaded() {
        let dir = std::env::temp_dir().join(format!("twingen-tex-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("facade_atlas.png"), b"png").unwrap();

        let catalog = TextureCatalog::resolve(&dir);
        assert!(matches!(
            catalog.entries["facade_atlas.png"],
            TextureSource::Loaded(_)
        ));
        assert_eq!(catalog.entries["facade_normal_atlas.png"], TextureSource::Procedural);
        assert_eq!(catalog.loaded().count(), 1);

        std::fs::remove_dir_all(&dir).ok();
    }
}
